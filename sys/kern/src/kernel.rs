// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel handle and the scheduling entry points.
//!
//! A `Kernel` is a cheap, cloneable handle on one booted kernel. Every task
//! gets one when it starts, and every synchronization primitive keeps one.
//! All operations act on behalf of the task holding the CPU, which is always
//! the task calling them.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::cell::RefCell;

use abi::{Priority, TaskId, TaskInfo, TaskState, FOREVER};
use critical_section::CriticalSection;

use crate::arch;
use crate::config::{ConfigError, KernelConfig};
use crate::err::Fault;
use crate::fail;
use crate::sched::{Sched, Wait};
use crate::task::{ArchContext, SaveRestore};
use crate::time::Timeout;
use crate::trace::Trace;

struct Shared {
    sched: critical_section::Mutex<RefCell<Sched>>,
    machine: arch::Machine,
    config: KernelConfig,
}

/// Handle on a booted kernel.
#[derive(Clone)]
pub struct Kernel {
    shared: Arc<Shared>,
}

/// Defers preemption of the current task until dropped.
///
/// Sections nest. The task can still block while inside one; it just cannot
/// be preempted while it holds the CPU.
#[must_use = "the section ends as soon as the guard is dropped"]
pub struct AtomicSection<'a> {
    kernel: &'a Kernel,
}

impl Drop for AtomicSection<'_> {
    fn drop(&mut self) {
        self.kernel.leave_atomic();
    }
}

impl Kernel {
    /// Boots a kernel on the calling thread.
    ///
    /// The calling thread becomes the initial task: named `main`, default
    /// priority, protected, console 0. It runs `main`, and when that task
    /// exits (by returning, calling `exit`, or being deleted) the machine
    /// powers off and its exit status is returned. If the kernel dies, the
    /// failure report is raised as a panic on the calling thread.
    pub fn boot(
        config: KernelConfig,
        main: impl FnOnce(Kernel) -> i32,
    ) -> Result<i32, ConfigError> {
        config.validate()?;
        let machine = arch::Machine::new();
        let boot = arch::Context::adopt_current(&machine);
        let kernel = Kernel {
            shared: Arc::new(Shared {
                sched: critical_section::Mutex::new(RefCell::new(Sched::new(
                    config,
                    boot.clone(),
                ))),
                machine: machine.clone(),
                config,
            }),
        };

        Ok(arch::boot_guard(&machine, || {
            kernel.start_idle();
            let outcome = arch::run_guarded(&boot, || main(kernel.clone()));
            kernel.power_off(outcome)
        }))
    }

    pub fn config(&self) -> KernelConfig {
        self.shared.config
    }

    pub(crate) fn machine(&self) -> &arch::Machine {
        &self.shared.machine
    }

    /// Runs `f` on the scheduler state, with interrupts masked.
    pub(crate) fn with_sched<R>(
        &self,
        f: impl FnOnce(CriticalSection<'_>, &mut Sched) -> R,
    ) -> R {
        critical_section::with(|cs| {
            let mut sched = self.shared.sched.borrow_ref_mut(cs);
            f(cs, &mut sched)
        })
    }

    /// Runs the masked half of a blocking operation, then does whatever it
    /// asked for once interrupts are back on: raise a fault, reschedule, or
    /// give up the CPU and report how the wait ended.
    pub(crate) fn block_on(
        &self,
        f: impl FnOnce(CriticalSection<'_>, &mut Sched) -> Result<Wait, Fault>,
    ) -> bool {
        match self.with_sched(f) {
            Err(fault) => fail::die(self, fault),
            Ok(Wait::Done(result)) => result,
            Ok(Wait::Resched(result)) => {
                self.reschedule();
                result
            }
            Ok(Wait::Blocked) => {
                self.reschedule();
                self.with_sched(|_, s| s.current_task().success)
            }
        }
    }

    pub(crate) fn timeout(&self, ms: u32) -> Timeout {
        Timeout::from_msecs(ms, &self.shared.config)
    }

    /// Lets the scheduler reconsider who should hold the CPU, and switches if
    /// the answer changed. Does nothing inside an interrupt; the switch
    /// happens when the outermost interrupt returns.
    pub(crate) fn reschedule(&self) {
        if self.shared.machine.is_halted() {
            return;
        }
        let switch = self.with_sched(|_, s| {
            if s.int_level == 0 {
                s.select_next()
            } else {
                Ok(None)
            }
        });
        match switch {
            Ok(Some((from, to))) => from.switch_to(&to),
            Ok(None) => {}
            Err(fault) => fail::die(self, fault),
        }
    }

    /// Runs `handler` as an interrupt handler. Handlers may wake tasks but
    /// must not block; any context switch they cause is performed when the
    /// outermost interrupt returns.
    pub fn interrupt<R>(&self, handler: impl FnOnce(&Kernel) -> R) -> R {
        self.with_sched(|_, s| s.int_level += 1);
        let result = handler(self);
        self.with_sched(|_, s| s.int_level -= 1);
        self.reschedule();
        result
    }

    /// Delivers one tick of the periodic clock.
    pub fn clock_interrupt(&self) {
        self.interrupt(|k| k.with_sched(|_, s| s.tick()));
    }

    /// Runs `f` with interrupts masked, restoring the previous state on the
    /// way out. `f` must not block.
    pub fn without_interrupts<R>(
        &self,
        f: impl FnOnce(CriticalSection<'_>) -> R,
    ) -> R {
        critical_section::with(f)
    }

    pub fn atomic(&self) -> AtomicSection<'_> {
        self.enter_atomic();
        AtomicSection { kernel: self }
    }

    pub fn enter_atomic(&self) {
        self.with_sched(|_, s| s.current_task_mut().atomic_level += 1);
    }

    /// Leaves one level of atomic section; leaving the outermost one lets any
    /// deferred preemption happen.
    pub fn leave_atomic(&self) {
        let outermost = self.with_sched(|_, s| {
            let task = s.current_task_mut();
            if task.atomic_level == 0 {
                return false;
            }
            task.atomic_level -= 1;
            task.atomic_level == 0
        });
        if outermost {
            self.reschedule();
        }
    }

    // Scheduling control.

    pub fn current(&self) -> TaskId {
        self.with_sched(|_, s| s.id_of(s.current))
    }

    /// Makes a task runnable. Fails if the task is gone or terminated, or on
    /// permission denial.
    pub fn ready(&self, id: TaskId) -> bool {
        let ok = self.with_sched(|_, s| {
            let Some(t) = s.resolve(id) else {
                return false;
            };
            if !s.permitted(s.current, t)
                || s.task(t).state == TaskState::Terminated
            {
                return false;
            }
            s.ready(t, false);
            true
        });
        if ok {
            self.reschedule();
        }
        ok
    }

    /// Takes a task off the CPU and every queue until somebody readies it.
    pub fn suspend(&self, id: TaskId) -> bool {
        let result = self.with_sched(|_, s| {
            let t = s.resolve(id)?;
            if !s.permitted(s.current, t)
                || s.task(t).state == TaskState::Terminated
            {
                return None;
            }
            s.block(t, TaskState::Suspended);
            Some(t == s.current)
        });
        match result {
            Some(myself) => {
                if myself {
                    self.reschedule();
                }
                true
            }
            None => false,
        }
    }

    /// Gives up the CPU to a ready task of equal or higher priority, if any.
    pub fn yield_now(&self) {
        self.with_sched(|_, s| {
            let me = s.current;
            s.ready(me, false);
        });
        self.reschedule();
    }

    /// Suspends the calling task.
    pub fn pause(&self) {
        let me = self.current();
        self.suspend(me);
    }

    /// Sleeps for at least `ms` milliseconds. Zero yields; `FOREVER` sleeps
    /// until another task readies the caller.
    pub fn delay(&self, ms: u32) {
        let timeout = self.timeout(ms);
        self.with_sched(|_, s| {
            let me = s.current;
            if ms == 0 {
                s.ready(me, false);
            } else {
                s.block(me, TaskState::Delaying);
                s.arm_timer(me, timeout);
            }
        });
        self.reschedule();
    }

    /// Busy-waits for at least `us` microseconds without giving up the CPU.
    pub fn udelay(&self, us: u32) {
        arch::udelay(us);
    }

    /// Milliseconds since boot, at clock resolution.
    pub fn time(&self) -> u64 {
        self.with_sched(|_, s| s.now_ms())
    }

    pub fn set_priority(&self, id: TaskId, priority: Priority) -> bool {
        let result = self.with_sched(|_, s| {
            let t = s.resolve(id)?;
            let state = s.task(t).state;
            if !s.permitted(s.current, t) || state == TaskState::Terminated {
                return None;
            }
            s.set_priority(t, priority);
            Some(t == s.current || state == TaskState::Ready)
        });
        match result {
            Some(resched) => {
                if resched {
                    self.reschedule();
                }
                true
            }
            None => false,
        }
    }

    /// Associates a task with a console. The console of the running task is
    /// the one that has the focus.
    pub fn set_console(&self, id: TaskId, console: u32) -> bool {
        let consoles = self.shared.config.consoles;
        self.with_sched(|_, s| {
            let Some(t) = s.resolve(id) else {
                return false;
            };
            if console >= consoles || !s.permitted(s.current, t) {
                return false;
            }
            s.task_mut(t).console = console;
            if t == s.current {
                s.focus = console;
            }
            true
        })
    }

    /// Console that currently has the focus.
    pub fn focus(&self) -> u32 {
        self.with_sched(|_, s| s.focus)
    }

    /// Installs (or with `None`, removes) hooks run whenever the task gains
    /// or loses the CPU.
    pub fn set_save_restore(
        &self,
        id: TaskId,
        hooks: Option<Box<dyn SaveRestore>>,
    ) -> bool {
        let result = self.with_sched(|_, s| {
            let Some(t) = s.resolve(id) else {
                return Err(hooks);
            };
            if !s.permitted(s.current, t) {
                return Err(hooks);
            }
            Ok(core::mem::replace(&mut s.task_mut(t).hooks, hooks))
        });
        // Whatever got displaced is dropped out here, with interrupts on.
        result.is_ok()
    }

    /// Installs a hook run once when the task exits, before anything is torn
    /// down. The hook must not call `exit`.
    pub fn set_cleanup(
        &self,
        id: TaskId,
        cleanup: impl FnOnce() + Send + 'static,
    ) -> bool {
        let cleanup: Box<dyn FnOnce() + Send> = Box::new(cleanup);
        let result = self.with_sched(|_, s| {
            let Some(t) = s.resolve(id) else {
                return Err(cleanup);
            };
            if !s.permitted(s.current, t) {
                return Err(cleanup);
            }
            Ok(s.task_mut(t).cleanup.replace(cleanup))
        });
        result.is_ok()
    }

    pub fn name(&self, id: TaskId) -> Option<String> {
        self.with_sched(|_, s| {
            let t = s.resolve(id)?;
            Some(s.task(t).name.clone())
        })
    }

    pub fn info(&self, id: TaskId) -> Option<TaskInfo> {
        self.with_sched(|_, s| {
            let t = s.resolve(id)?;
            Some(s.info(t))
        })
    }

    /// Snapshot of every task not yet reclaimed.
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.with_sched(|_, s| s.live_tasks().map(|t| s.info(t)).collect())
    }

    /// Replaces the calling task's local storage. Tasks created afterwards
    /// share it.
    pub fn set_local<T: Any + Send + Sync>(&self, value: T) {
        let local: crate::task::Local = Arc::new(value);
        let old = self
            .with_sched(|_, s| s.current_task_mut().local.replace(local));
        drop(old);
    }

    /// The calling task's local storage, if it holds a `T`.
    pub fn local<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let local = self.with_sched(|_, s| s.current_task().local.clone())?;
        local.downcast::<T>().ok()
    }

    /// Recent scheduling events, oldest first, each with the number of times
    /// it was recorded in a row.
    pub fn trace(&self) -> Vec<(Trace, u32)> {
        self.with_sched(|_, s| {
            s.trace.iter().map(|e| (e.payload, e.count)).collect()
        })
    }
}

/// Timeout meaning "don't wait at all".
pub(crate) const POLL: u32 = 0;

const _: () = assert!(POLL != FOREVER);
