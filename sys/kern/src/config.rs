// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel configuration.
//!
//! The kernel takes the shape described by a `KernelConfig` at boot and keeps
//! it for its lifetime. Applications usually leave everything at the default;
//! the type derives `Deserialize` so the same values can be read from an
//! application's TOML configuration, with any field left out keeping its
//! default.

use serde::Deserialize;
use static_assertions::const_assert;

/// Clock period, in milliseconds.
pub const MS_PER_TICK: u32 = 10;
/// Ticks a task may run before yielding to a ready task of equal priority.
pub const QUANTUM: u32 = 10;
/// Smallest stack handed to a task, whatever it asks for.
pub const MIN_STACK: usize = 0x1000;
/// Stack size used when a task is created without an explicit one.
pub const DEFAULT_STACK: usize = 0x4000;
/// Number of virtual consoles a task can be associated with.
pub const NUM_CONSOLES: u32 = 9;

const_assert!(MS_PER_TICK > 0);
const_assert!(QUANTUM > 0);
const_assert!(DEFAULT_STACK >= MIN_STACK);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelConfig {
    pub ms_per_tick: u32,
    pub quantum_ticks: u32,
    pub min_stack: usize,
    pub default_stack: usize,
    pub consoles: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            ms_per_tick: MS_PER_TICK,
            quantum_ticks: QUANTUM,
            min_stack: MIN_STACK,
            default_stack: DEFAULT_STACK,
            consoles: NUM_CONSOLES,
        }
    }
}

/// Reasons a configuration is refused at boot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    ZeroTickPeriod,
    ZeroQuantum,
    NoConsoles,
    StackTooSmall,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Self::ZeroTickPeriod => "clock period must be at least 1 ms",
            Self::ZeroQuantum => "quantum must be at least one tick",
            Self::NoConsoles => "at least one console is required",
            Self::StackTooSmall => "default stack is below the minimum stack",
        };
        f.write_str(msg)
    }
}

impl KernelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ms_per_tick == 0 {
            return Err(ConfigError::ZeroTickPeriod);
        }
        if self.quantum_ticks == 0 {
            return Err(ConfigError::ZeroQuantum);
        }
        if self.consoles == 0 {
            return Err(ConfigError::NoConsoles);
        }
        if self.default_stack < self.min_stack {
            return Err(ConfigError::StackTooSmall);
        }
        Ok(())
    }

    /// Converts a timeout to clock ticks, rounding up so a task never wakes
    /// early.
    pub fn msecs_to_ticks(&self, ms: u32) -> u32 {
        let ms = u64::from(ms);
        let period = u64::from(self.ms_per_tick);
        ((ms + period - 1) / period) as u32
    }

    pub fn ticks_to_msecs(&self, ticks: u32) -> u32 {
        ticks.saturating_mul(self.ms_per_tick)
    }

    /// Stack actually handed to a task that asked for `requested` bytes.
    pub fn stack_size(&self, requested: usize) -> usize {
        requested.max(self.min_stack)
    }
}
