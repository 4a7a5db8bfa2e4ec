// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Named wait queues.

use abi::{TaskId, FOREVER};

use crate::kernel::POLL;
use crate::sched::Wait;
use crate::Kernel;

/// A priority-ordered queue of blocked tasks, the building block of every
/// other primitive.
///
/// Dropping a queue wakes anything still waiting in it, unsuccessfully.
pub struct WaitQueue {
    kernel: Kernel,
    id: usize,
}

impl WaitQueue {
    pub fn new(kernel: &Kernel, name: &str) -> Self {
        let id = match kernel.with_sched(|_, s| s.alloc_queue(name.into())) {
            Ok(id) => id,
            Err(fault) => crate::fail::die(kernel, fault),
        };
        Self {
            kernel: kernel.clone(),
            id,
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn name(&self) -> alloc::string::String {
        self.kernel.with_sched(|_, s| s.queue_name(self.id).into())
    }

    /// Blocks until signalled. Returns the result the waker chose.
    pub fn wait(&self) -> bool {
        self.wait_timed(FOREVER)
    }

    /// Never blocks, so always fails.
    pub fn try_wait(&self) -> bool {
        self.wait_timed(POLL)
    }

    /// Blocks until signalled or until `ms` milliseconds have passed.
    pub fn wait_timed(&self, ms: u32) -> bool {
        let timeout = self.kernel.timeout(ms);
        self.kernel
            .block_on(|_, s| Ok(s.wait_current(self.id, timeout)))
    }

    /// Wakes the waiter due to be served next, successfully, and tells which
    /// one it was.
    pub fn signal(&self) -> Option<TaskId> {
        let woken = self.kernel.with_sched(|_, s| {
            let t = s.signal(self.id)?;
            Some(s.id_of(t))
        });
        if woken.is_some() {
            self.kernel.reschedule();
        }
        woken
    }

    /// Wakes every waiter, each one returning `success` from its wait.
    /// Returns whether there were any.
    pub fn flush(&self, success: bool) -> bool {
        let any = self.kernel.with_sched(|_, s| s.flush(self.id, success));
        if any {
            self.kernel.reschedule();
        }
        any
    }

    pub fn is_empty(&self) -> bool {
        self.kernel.with_sched(|_, s| s.queue_is_empty(self.id))
    }

    /// Masked-section access for primitives that keep state alongside the
    /// queue.
    pub(crate) fn id(&self) -> usize {
        self.id
    }
}

impl Drop for WaitQueue {
    fn drop(&mut self) {
        let id = self.id;
        let any = self.kernel.with_sched(|_, s| {
            let any = s.flush(id, false);
            s.free_queue(id);
            any
        });
        if any {
            self.kernel.reschedule();
        }
    }
}
