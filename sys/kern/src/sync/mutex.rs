// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recursive mutexes.

use core::cell::Cell;

use abi::{TaskId, FOREVER};

use crate::err::Fault;
use crate::fail;
use crate::kernel::POLL;
use crate::sched::Wait;
use crate::sync::WaitQueue;
use crate::Kernel;

#[derive(Copy, Clone, Default)]
struct Hold {
    owner: Option<TaskId>,
    depth: u32,
}

/// A lock its owner may take again without deadlocking; it is released when
/// every `enter` has been matched by a `leave`.
pub struct Mutex {
    queue: WaitQueue,
    hold: critical_section::Mutex<Cell<Hold>>,
}

impl Mutex {
    pub fn new(kernel: &Kernel, name: &str) -> Self {
        Self {
            queue: WaitQueue::new(kernel, name),
            hold: critical_section::Mutex::new(Cell::new(Hold::default())),
        }
    }

    #[must_use]
    pub fn enter(&self) -> bool {
        self.enter_timed(FOREVER)
    }

    /// Takes the mutex if it is free or already ours.
    #[must_use]
    pub fn try_enter(&self) -> bool {
        self.enter_timed(POLL)
    }

    #[must_use]
    pub fn enter_timed(&self, ms: u32) -> bool {
        let kernel = self.queue.kernel();
        let timeout = kernel.timeout(ms);
        kernel.block_on(|cs, s| {
            let me = s.id_of(s.current);
            let hold = self.hold.borrow(cs);
            let mut h = hold.get();
            match h.owner {
                Some(owner) if owner == me => h.depth += 1,
                None => {
                    h.owner = Some(me);
                    h.depth = 1;
                }
                // Ownership arrives with the wake-up; see `leave`.
                Some(_) => return Ok(s.wait_current(self.queue.id(), timeout)),
            }
            hold.set(h);
            Ok(Wait::Done(true))
        })
    }

    /// Undoes one `enter`. The last one passes the mutex to the next waiter.
    /// Leaving a mutex the caller doesn't own is fatal.
    pub fn leave(&self) {
        let kernel = self.queue.kernel();
        let result = kernel.with_sched(|cs, s| {
            let me = s.id_of(s.current);
            let hold = self.hold.borrow(cs);
            let mut h = hold.get();
            if h.owner != Some(me) {
                return Err(Fault::NotOwner {
                    kind: "mutex",
                    name: s.queue_name(self.queue.id()).into(),
                });
            }
            h.depth -= 1;
            let mut woke = false;
            if h.depth == 0 {
                h.owner = s.signal(self.queue.id()).map(|t| s.id_of(t));
                if h.owner.is_some() {
                    h.depth = 1;
                    woke = true;
                }
            }
            hold.set(h);
            Ok(woke)
        });
        match result {
            Err(fault) => fail::die(kernel, fault),
            Ok(true) => kernel.reschedule(),
            Ok(false) => (),
        }
    }

    pub fn owner(&self) -> Option<TaskId> {
        critical_section::with(|cs| self.hold.borrow(cs).get().owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KernelConfig;

    #[test]
    fn nested_entries_need_as_many_leaves() {
        let status = Kernel::boot(KernelConfig::default(), |kernel| {
            let m = Mutex::new(&kernel, "m");
            let me = kernel.current();
            for _ in 0..3 {
                assert!(m.try_enter());
            }
            m.leave();
            m.leave();
            assert_eq!(m.owner(), Some(me));
            m.leave();
            assert_eq!(m.owner(), None);
            0
        });
        assert_eq!(status, Ok(0));
    }

    #[test]
    #[should_panic(expected = "mutex m: not owned by this task")]
    fn leaving_a_free_mutex_is_fatal() {
        let _ = Kernel::boot(KernelConfig::default(), |kernel| {
            let m = Mutex::new(&kernel, "m");
            m.leave();
            0
        });
    }
}
