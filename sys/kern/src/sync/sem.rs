// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Counting semaphores.

use core::cell::Cell;

use abi::FOREVER;

use crate::kernel::POLL;
use crate::sched::Wait;
use crate::sync::WaitQueue;
use crate::Kernel;

/// A counting semaphore.
///
/// The count only goes up when nobody is waiting; a signal with waiters hands
/// the unit straight to the next one in line.
pub struct Semaphore {
    queue: WaitQueue,
    count: critical_section::Mutex<Cell<u32>>,
}

impl Semaphore {
    pub fn new(kernel: &Kernel, name: &str, count: u32) -> Self {
        Self {
            queue: WaitQueue::new(kernel, name),
            count: critical_section::Mutex::new(Cell::new(count)),
        }
    }

    pub(crate) fn kernel(&self) -> &Kernel {
        self.queue.kernel()
    }

    #[must_use]
    pub fn wait(&self) -> bool {
        self.wait_timed(FOREVER)
    }

    #[must_use]
    pub fn try_wait(&self) -> bool {
        self.wait_timed(POLL)
    }

    /// Takes one unit, waiting up to `ms` milliseconds for one to appear.
    #[must_use]
    pub fn wait_timed(&self, ms: u32) -> bool {
        let kernel = self.queue.kernel();
        let timeout = kernel.timeout(ms);
        kernel.block_on(|cs, s| {
            let count = self.count.borrow(cs);
            if count.get() > 0 {
                count.set(count.get() - 1);
                return Ok(Wait::Done(true));
            }
            Ok(s.wait_current(self.queue.id(), timeout))
        })
    }

    /// Releases one unit, to the next waiter if there is one.
    pub fn signal(&self) {
        let kernel = self.queue.kernel();
        let woke = kernel.with_sched(|cs, s| {
            if s.signal(self.queue.id()).is_some() {
                return true;
            }
            let count = self.count.borrow(cs);
            count.set(count.get().saturating_add(1));
            false
        });
        if woke {
            kernel.reschedule();
        }
    }

    /// Wakes every waiter with `success` and drops the count to zero.
    pub fn flush(&self, success: bool) {
        let kernel = self.queue.kernel();
        let woke = kernel.with_sched(|cs, s| {
            self.count.borrow(cs).set(0);
            s.flush(self.queue.id(), success)
        });
        if woke {
            kernel.reschedule();
        }
    }

    pub fn value(&self) -> u32 {
        critical_section::with(|cs| self.count.borrow(cs).get())
    }

    pub fn name(&self) -> alloc::string::String {
        self.queue.name()
    }
}
