// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.

use abi::FOREVER;

/// In-kernel timestamp representation.
///
/// This is measured in clock ticks since boot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The tick following this one.
    pub(crate) fn next(self) -> Self {
        Timestamp(self.0.wrapping_add(1))
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}

/// How long a blocking call is prepared to wait.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Timeout {
    /// Zero: try once, never block.
    Poll,
    /// Block for at most this many ticks.
    Ticks(u32),
    /// Block until woken.
    Forever,
}

impl Timeout {
    pub(crate) fn from_msecs(ms: u32, config: &crate::config::KernelConfig) -> Self {
        match ms {
            0 => Self::Poll,
            FOREVER => Self::Forever,
            ms => Self::Ticks(config.msecs_to_ticks(ms)),
        }
    }
}
