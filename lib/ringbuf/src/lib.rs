// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for instrumenting the kernel.
//!
//! This contains a fixed-size ring buffer meant to be embedded in whatever
//! structure owns the events being recorded (the kernel keeps one per booted
//! instance, next to its scheduler state). Recording an entry never allocates
//! and never fails; once the buffer is full, the oldest entries are
//! overwritten. Buffers can be read back through [`Ringbuf::iter`], or simply
//! printed from a debugger.
//!
//! ## Constraints
//!
//! The payload type must implement both `Copy` and `PartialEq`.
//!
//! ## Recording entries
//!
//! Entries are recorded with [`ringbuf_entry!`], which tags each one with the
//! source line that recorded it:
//!
//! ```
//! # use ringbuf::{Ringbuf, ringbuf_entry};
//! let mut buf: Ringbuf<u32, 16> = Ringbuf::new(0);
//! ringbuf_entry!(buf, 42);
//! ```
//!
//! If the same line records the same payload twice in a row, the existing
//! entry's `count` is incremented rather than spending a new slot, so a tight
//! loop does not wash out the rest of the history.
//!
//! Enabling the `disabled` feature turns [`ringbuf_entry!`] into a no-op that
//! still evaluates (and type-checks) its arguments.

#![cfg_attr(not(test), no_std)]

/// Inserts `payload` into the ring buffer `buf`.
///
/// `buf` is any place expression of type `Ringbuf<T, N>` that can be borrowed
/// mutably.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload before borrowing the buffer, so that the
        // payload expression may itself read from the owner of the buffer.
        let p = $payload;
        $crate::Ringbuf::entry(&mut $buf, line!() as u16, p);
    }};
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$buf;
        let _ = &$payload;
    }};
}

/// One slot of a [`Ringbuf`]. `count` is the number of times in a row the
/// same line recorded the same payload; zero marks a slot never written.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// A ring buffer of `N` entries carrying payloads of type `T`.
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, { N }> {
    /// Makes an empty ring buffer, with every slot holding `init` and a count
    /// of zero.
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    /// Records `payload` as coming from source line `line`.
    pub fn entry(&mut self, line: u16, payload: T) {
        if let Some(ent) = self.last.and_then(|l| self.buffer.get_mut(l)) {
            if ent.line == line && ent.payload == payload {
                // A saturated count starts a fresh entry instead.
                if let Some(count) = ent.count.checked_add(1) {
                    ent.count = count;
                    return;
                }
            }
        }

        let slot = match self.last {
            Some(l) if l + 1 < N => l + 1,
            _ => 0,
        };
        let ent = &mut self.buffer[slot];
        ent.generation = ent.generation.wrapping_add(1);
        ent.line = line;
        ent.count = 1;
        ent.payload = payload;
        self.last = Some(slot);
    }

    /// Walks the recorded entries from oldest to newest, skipping slots that
    /// have never been written.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) => last + 1,
            None => N,
        };
        (0..N)
            .map(move |i| &self.buffer[(start + i) % N])
            .filter(|ent| ent.count != 0)
    }

    /// Most recently recorded entry.
    pub fn latest(&self) -> Option<&RingbufEntry<T>> {
        self.buffer.get(self.last?)
    }
}
