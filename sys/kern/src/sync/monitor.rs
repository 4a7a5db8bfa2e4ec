// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Monitors and their condition variables.
//!
//! A monitor is a non-recursive lock. A condition belongs to one monitor and
//! can only be waited on, signalled or broadcast by the monitor's owner.
//! Waiting gives the monitor up for the duration of the wait and takes it back
//! before returning, so a waiter never holds the monitor while it sleeps.

use alloc::string::String;
use alloc::sync::Arc;
use core::cell::Cell;

use abi::{TaskId, FOREVER};

use crate::err::Fault;
use crate::fail;
use crate::kernel::POLL;
use crate::sched::Wait;
use crate::sync::WaitQueue;
use crate::Kernel;

pub struct Monitor {
    queue: WaitQueue,
    owner: critical_section::Mutex<Cell<Option<TaskId>>>,
}

impl Monitor {
    pub fn new(kernel: &Kernel, name: &str) -> Self {
        Self {
            queue: WaitQueue::new(kernel, name),
            owner: critical_section::Mutex::new(Cell::new(None)),
        }
    }

    pub(crate) fn kernel(&self) -> &Kernel {
        self.queue.kernel()
    }

    pub fn name(&self) -> String {
        self.queue.name()
    }

    #[must_use]
    pub fn enter(&self) -> bool {
        self.enter_timed(FOREVER)
    }

    #[must_use]
    pub fn try_enter(&self) -> bool {
        self.enter_timed(POLL)
    }

    /// Takes the monitor, waiting up to `ms` milliseconds. Entering a monitor
    /// the caller already owns is fatal.
    #[must_use]
    pub fn enter_timed(&self, ms: u32) -> bool {
        let kernel = self.queue.kernel();
        let timeout = kernel.timeout(ms);
        kernel.block_on(|cs, s| {
            let me = s.id_of(s.current);
            let owner = self.owner.borrow(cs);
            match owner.get() {
                Some(o) if o == me => Err(Fault::MonitorReentered {
                    monitor: s.queue_name(self.queue.id()).into(),
                }),
                None => {
                    owner.set(Some(me));
                    Ok(Wait::Done(true))
                }
                Some(_) => Ok(s.wait_current(self.queue.id(), timeout)),
            }
        })
    }

    /// Gives the monitor up, handing it to the next waiting entrant if any.
    pub fn leave(&self) {
        let kernel = self.queue.kernel();
        let result = kernel.with_sched(|cs, s| {
            self.check_owner(cs, s, "monitor")?;
            let next = s.signal(self.queue.id()).map(|t| s.id_of(t));
            self.owner.borrow(cs).set(next);
            Ok(next.is_some())
        });
        match result {
            Err(fault) => fail::die(kernel, fault),
            Ok(true) => kernel.reschedule(),
            Ok(false) => (),
        }
    }

    pub fn owner(&self) -> Option<TaskId> {
        critical_section::with(|cs| self.owner.borrow(cs).get())
    }

    fn check_owner(
        &self,
        cs: critical_section::CriticalSection<'_>,
        s: &crate::sched::Sched,
        kind: &'static str,
    ) -> Result<(), Fault> {
        if self.owner.borrow(cs).get() == Some(s.id_of(s.current)) {
            Ok(())
        } else {
            Err(Fault::NotOwner {
                kind,
                name: s.queue_name(self.queue.id()).into(),
            })
        }
    }

    /// Raises the fault for an operation on `condition` by a task that does
    /// not own the monitor. The condition is only named once that happens.
    fn require_owner(&self, condition: &WaitQueue) {
        let kernel = self.queue.kernel();
        let result = kernel.with_sched(|cs, s| {
            self.check_owner(cs, s, "condition").map_err(|_| Fault::NotOwner {
                kind: "condition",
                name: s.queue_name(condition.id()).into(),
            })
        });
        if let Err(fault) = result {
            fail::die(kernel, fault);
        }
    }
}

/// A condition variable tied to a monitor.
pub struct Condition {
    queue: WaitQueue,
    monitor: Arc<Monitor>,
}

impl Condition {
    pub fn new(monitor: &Arc<Monitor>, name: &str) -> Self {
        Self {
            queue: WaitQueue::new(monitor.kernel(), name),
            monitor: monitor.clone(),
        }
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn wait(&self) -> bool {
        self.wait_timed(FOREVER)
    }

    /// Waits for up to `ms` milliseconds for a signal. Whatever the outcome,
    /// the caller owns the monitor again when this returns.
    pub fn wait_timed(&self, ms: u32) -> bool {
        self.monitor.require_owner(&self.queue);
        let kernel = self.queue.kernel();
        let _atomic = kernel.atomic();
        self.monitor.leave();
        let signalled = self.queue.wait_timed(ms);
        while !self.monitor.enter() {}
        signalled
    }

    /// Wakes one waiter, reporting whether there was one.
    pub fn signal(&self) -> bool {
        self.monitor.require_owner(&self.queue);
        self.queue.signal().is_some()
    }

    /// Wakes every waiter, reporting whether there were any.
    pub fn broadcast(&self) -> bool {
        self.monitor.require_owner(&self.queue);
        self.queue.flush(true)
    }
}
