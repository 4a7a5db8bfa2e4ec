// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte pipes.
//!
//! A pipe is a fixed-size byte ring guarded by a monitor. Readers sleep on
//! the "get" condition while it is empty and writers on the "put" condition
//! while it is full. Transfers may be short: a reader takes whatever is
//! there, up to what it asked for, and a writer leaves whatever fits.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::RefCell;

use abi::FOREVER;

use crate::err::Fault;
use crate::fail;
use crate::kernel::POLL;
use crate::sync::{Condition, Monitor};
use crate::Kernel;

struct Ring {
    buf: Box<[u8]>,
    /// Index of the oldest byte.
    head: usize,
    len: usize,
}

impl Ring {
    fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// Copies out as much as fits in `dest`. Returns the count and whether
    /// the ring was full beforehand.
    fn read(&mut self, dest: &mut [u8]) -> (usize, bool) {
        let was_full = self.is_full();
        let n = dest.len().min(self.len);
        for byte in &mut dest[..n] {
            *byte = self.buf[self.head];
            self.head = (self.head + 1) % self.buf.len();
        }
        self.len -= n;
        (n, was_full)
    }

    /// Copies in as much of `src` as there is room for. Returns the count and
    /// whether the ring was empty beforehand.
    fn write(&mut self, src: &[u8]) -> (usize, bool) {
        let was_empty = self.len == 0;
        let n = src.len().min(self.buf.len() - self.len);
        let mut tail = (self.head + self.len) % self.buf.len().max(1);
        for &byte in &src[..n] {
            self.buf[tail] = byte;
            tail = (tail + 1) % self.buf.len();
        }
        self.len += n;
        (n, was_empty)
    }
}

pub struct Pipe {
    monitor: Arc<Monitor>,
    readable: Condition,
    writable: Condition,
    ring: critical_section::Mutex<RefCell<Ring>>,
}

impl Pipe {
    /// Creates a pipe holding up to `size` bytes.
    pub fn new(kernel: &Kernel, name: &str, size: usize) -> Self {
        let mut buf = Vec::new();
        if buf.try_reserve_exact(size).is_err() {
            fail::die(kernel, Fault::OutOfMemory);
        }
        buf.resize(size, 0u8);

        let monitor = Arc::new(Monitor::new(kernel, name));
        Self {
            readable: Condition::new(&monitor, &format!("get {name}")),
            writable: Condition::new(&monitor, &format!("put {name}")),
            monitor,
            ring: critical_section::Mutex::new(RefCell::new(Ring {
                buf: buf.into_boxed_slice(),
                head: 0,
                len: 0,
            })),
        }
    }

    pub fn name(&self) -> String {
        self.monitor.name()
    }

    /// Bytes waiting to be read.
    pub fn avail(&self) -> usize {
        critical_section::with(|cs| self.ring.borrow_ref(cs).len)
    }

    fn kernel(&self) -> &Kernel {
        self.monitor.kernel()
    }

    pub fn get(&self, buf: &mut [u8]) -> usize {
        self.get_timed(buf, FOREVER)
    }

    pub fn try_get(&self, buf: &mut [u8]) -> usize {
        self.get_timed(buf, POLL)
    }

    /// Reads up to `buf.len()` bytes, waiting up to `ms` milliseconds for the
    /// first of them to arrive. Returns how many were read.
    pub fn get_timed(&self, buf: &mut [u8], ms: u32) -> usize {
        if buf.is_empty() || !self.monitor.enter() {
            return 0;
        }
        if !self.await_until(&self.readable, ms, |ring| ring.len == 0) {
            self.monitor.leave();
            return 0;
        }
        let (n, was_full) = self
            .kernel()
            .without_interrupts(|cs| self.ring.borrow_ref_mut(cs).read(buf));
        if was_full {
            self.writable.broadcast();
        }
        self.monitor.leave();
        n
    }

    pub fn put(&self, data: &[u8]) -> usize {
        self.put_timed(data, FOREVER)
    }

    pub fn try_put(&self, data: &[u8]) -> usize {
        self.put_timed(data, POLL)
    }

    /// Writes up to `data.len()` bytes, waiting up to `ms` milliseconds for
    /// room for the first of them. Returns how many were written.
    pub fn put_timed(&self, data: &[u8], ms: u32) -> usize {
        if data.is_empty() || !self.monitor.enter() {
            return 0;
        }
        if !self.await_until(&self.writable, ms, Ring::is_full) {
            self.monitor.leave();
            return 0;
        }
        let (n, was_empty) = self
            .kernel()
            .without_interrupts(|cs| self.ring.borrow_ref_mut(cs).write(data));
        if was_empty {
            self.readable.broadcast();
        }
        self.monitor.leave();
        n
    }

    /// Waits on `cond` while `blocked` holds, within an overall budget of
    /// `ms` milliseconds. Called and returns with the monitor held. Returns
    /// whether `blocked` ended up false.
    fn await_until(
        &self,
        cond: &Condition,
        mut ms: u32,
        blocked: impl Fn(&Ring) -> bool,
    ) -> bool {
        let kernel = self.kernel();
        let deadline = (ms != POLL && ms != FOREVER)
            .then(|| kernel.time() + u64::from(ms));
        let is_blocked = || {
            critical_section::with(|cs| blocked(&*self.ring.borrow_ref(cs)))
        };
        while is_blocked() {
            if ms == POLL || !cond.wait_timed(ms) {
                return false;
            }
            if let Some(deadline) = deadline {
                let left = deadline.saturating_sub(kernel.time());
                ms = u32::try_from(left).unwrap_or(POLL);
            }
        }
        true
    }
}
