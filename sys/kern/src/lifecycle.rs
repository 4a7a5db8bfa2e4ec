// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task creation, exit, and the attach/join protocol.
//!
//! A task that is attached to a parent does not vanish when it exits. It
//! lingers as a Zombie holding its exit status until the parent collects it
//! with `join` or lets go of it with `detach`, or until the parent itself
//! exits. Only then does it become Terminated, after which the idle task
//! reclaims its slot.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use abi::{Priority, TaskId, TaskState, FOREVER};
use ringbuf::ringbuf_entry;

use crate::arch::{self, Outcome};
use crate::err::Fault;
use crate::fail;
use crate::kernel::POLL;
use crate::sched::Wait;
use crate::task::ArchContext;
use crate::time::Timeout;
use crate::trace::Trace;
use crate::Kernel;

enum Deletion {
    Myself,
    Redirected,
    AlreadyExiting,
}

impl Kernel {
    /// Creates a Suspended task that will run `entry` once readied. The task
    /// exits with whatever `entry` returns.
    ///
    /// The new task starts out on the creator's console and shares its local
    /// storage. Running out of memory or task slots is fatal.
    pub fn create_task(
        &self,
        name: &str,
        priority: Priority,
        stack_size: usize,
        entry: impl FnOnce(Kernel) -> i32 + Send + 'static,
    ) -> TaskId {
        let stack_size = self.config().stack_size(stack_size);
        let kernel = self.clone();
        let trampoline: Box<dyn FnOnce() + Send> =
            Box::new(move || kernel.run_task(entry));
        let context = match arch::Context::initialize(
            self.machine(),
            name,
            stack_size,
            trampoline,
        ) {
            Ok(context) => context,
            Err(fault) => fail::die(self, fault),
        };

        let created = self.with_sched(|_, s| {
            let t = s.insert_task(
                String::from(name),
                priority,
                context,
                stack_size,
            )?;
            let (console, local) = {
                let me = s.current_task();
                (me.console, me.local.clone())
            };
            let task = s.task_mut(t);
            task.console = console;
            task.local = local;
            Ok(s.id_of(t))
        });
        match created {
            Ok(id) => id,
            Err(fault) => fail::die(self, fault),
        }
    }

    /// Creates a task with the default stack and readies it.
    pub fn spawn(
        &self,
        name: &str,
        priority: Priority,
        entry: impl FnOnce(Kernel) -> i32 + Send + 'static,
    ) -> TaskId {
        let id = self.create_task(
            name,
            priority,
            self.config().default_stack,
            entry,
        );
        self.ready(id);
        id
    }

    /// Bottom of every task but the first: runs the body, then the exit path.
    fn run_task(&self, entry: impl FnOnce(Kernel) -> i32) {
        let context = self.with_sched(|_, s| s.current_task().context.clone());
        let outcome = arch::run_guarded(&context, || entry(self.clone()));
        let status = self.exit_status(outcome);
        self.retire(status);
    }

    fn exit_status(&self, outcome: Outcome) -> i32 {
        match outcome {
            Outcome::Returned(status) | Outcome::Exited(status) => status,
            Outcome::Panicked(message) => {
                fail::die(self, Fault::TaskPanicked { message })
            }
        }
    }

    /// Ends the calling task with `status`. Calling this again while the task
    /// is already on its way out (from a cleanup hook, say) is fatal.
    pub fn exit(&self, status: i32) -> ! {
        let recursive = self.with_sched(|_, s| {
            let me = s.current_task_mut();
            core::mem::replace(&mut me.exiting, true)
        });
        if recursive {
            fail::die(self, Fault::RecursiveExit);
        }
        arch::unwind_exit(status)
    }

    /// Marks the calling task as exiting and runs its cleanup hook.
    fn run_cleanup(&self) {
        let (context, cleanup) = self.with_sched(|_, s| {
            let me = s.current_task_mut();
            me.exiting = true;
            (me.context.clone(), me.cleanup.take())
        });
        if let Some(cleanup) = cleanup {
            let outcome = arch::run_guarded(&context, || {
                cleanup();
                0
            });
            if let Outcome::Panicked(message) = outcome {
                fail::die(self, Fault::TaskPanicked { message });
            }
        }
    }

    /// Exit path of every task but the first.
    fn retire(&self, status: i32) {
        self.run_cleanup();

        let linger = self.with_sched(|_, s| {
            let me = s.current;
            let my_id = s.id_of(me);
            s.task_mut(me).status = status;

            let children: Vec<usize> = s
                .live_tasks()
                .filter(|&c| s.task(c).attached_to == Some(my_id))
                .collect();
            for c in children {
                s.task_mut(c).attached_to = None;
                if s.task(c).state == TaskState::Zombie {
                    s.ready(c, true);
                }
            }
            s.task_mut(me).nattached = 0;

            let Some(parent_id) = s.task(me).attached_to else {
                return false;
            };
            let Some(p) = s.resolve(parent_id) else {
                s.task_mut(me).attached_to = None;
                return false;
            };
            let parent = s.task_mut(p);
            if parent.state == TaskState::Joining && parent.join == Some(my_id)
            {
                parent.join_status = status;
                parent.nattached = parent.nattached.saturating_sub(1);
                s.task_mut(me).attached_to = None;
                s.ready(p, true);
                return false;
            }
            true
        });

        if linger {
            // Whoever releases us says so with a successful wake-up; anything
            // else sends us back to sleep.
            while !self.block_on(|_, s| {
                let me = s.current;
                s.block(me, TaskState::Zombie);
                s.task_mut(me).success = false;
                Ok(Wait::Blocked)
            }) {}
        }

        let switch = self.with_sched(|_, s| {
            let me = s.current;
            s.terminate(me, status);
            s.select_next()
        });
        match switch {
            Ok(Some((from, to))) => from.finish(&to),
            Ok(None) => fail::die(self, Fault::NoRunnableTasks),
            Err(fault) => fail::die(self, fault),
        }
    }

    /// Exit path of the first task: the machine powers off.
    pub(crate) fn power_off(&self, outcome: Outcome) -> i32 {
        let status = self.exit_status(outcome);
        self.run_cleanup();
        self.with_sched(|_, s| {
            let me = s.id_of(s.current);
            ringbuf_entry!(s.trace, Trace::Exit { task: me, status });
        });
        self.machine().shutdown();
        status
    }

    /// Forces a task to exit with `status`. Deleting the calling task is the
    /// same as `exit`.
    ///
    /// Any other task is woken (its blocking call fails), abandons whatever
    /// it was doing including atomic sections, and runs its exit path the
    /// next time it gets the CPU. A task that is already exiting is left to
    /// finish on its own.
    pub fn delete(&self, id: TaskId, status: i32) -> bool {
        let deletion = self.with_sched(|_, s| {
            let t = s.resolve(id)?;
            if !s.permitted(s.current, t)
                || s.task(t).state == TaskState::Terminated
            {
                return None;
            }
            if t == s.current {
                return Some(Deletion::Myself);
            }
            let task = s.task_mut(t);
            if task.exiting {
                return Some(Deletion::AlreadyExiting);
            }
            task.exiting = true;
            task.atomic_level = 0;
            task.context.redirect_to_exit(status);
            ringbuf_entry!(s.trace, Trace::Deleted { task: id, status });
            s.ready(t, false);
            Some(Deletion::Redirected)
        });
        match deletion {
            None => false,
            Some(Deletion::Myself) => self.exit(status),
            Some(Deletion::AlreadyExiting) => true,
            Some(Deletion::Redirected) => {
                self.reschedule();
                true
            }
        }
    }

    /// Grants a task the protected attribute. Only protected tasks can.
    pub fn protect(&self, id: TaskId) -> bool {
        self.with_sched(|_, s| {
            let Some(t) = s.resolve(id) else {
                return false;
            };
            if !s.current_task().protected {
                return false;
            }
            s.task_mut(t).protected = true;
            true
        })
    }

    /// Makes the calling task the parent of `id`, so that it can later join
    /// it.
    pub fn attach(&self, id: TaskId) -> bool {
        self.with_sched(|_, s| {
            let Some(t) = s.resolve(id) else {
                return false;
            };
            let me = s.current;
            let child = s.task(t);
            if t == me
                || !s.permitted(me, t)
                || child.attached_to.is_some()
                || child.exiting
                || child.state == TaskState::Terminated
            {
                return false;
            }
            let my_id = s.id_of(me);
            s.task_mut(t).attached_to = Some(my_id);
            s.task_mut(me).nattached += 1;
            true
        })
    }

    /// Gives up the parenthood of `id`. A child that has already exited is
    /// released to terminate.
    pub fn detach(&self, id: TaskId) -> bool {
        let released = self.with_sched(|_, s| {
            let t = s.resolve(id)?;
            let me = s.current;
            if s.task(t).attached_to != Some(s.id_of(me)) {
                return None;
            }
            s.task_mut(t).attached_to = None;
            let parent = s.task_mut(me);
            parent.nattached = parent.nattached.saturating_sub(1);
            let zombie = s.task(t).state == TaskState::Zombie;
            if zombie {
                s.ready(t, true);
            }
            Some(zombie)
        });
        match released {
            Some(zombie) => {
                if zombie {
                    self.reschedule();
                }
                true
            }
            None => false,
        }
    }

    /// Waits for an attached child to exit and returns its status.
    pub fn join(&self, id: TaskId) -> Option<i32> {
        self.join_timed(id, FOREVER)
    }

    /// Collects an attached child's status if it has already exited.
    pub fn try_join(&self, id: TaskId) -> Option<i32> {
        self.join_timed(id, POLL)
    }

    /// Waits up to `ms` milliseconds for an attached child to exit. A
    /// successful join ends the relationship, so a child can be joined once.
    pub fn join_timed(&self, id: TaskId, ms: u32) -> Option<i32> {
        let timeout = self.timeout(ms);
        let joined = self.block_on(|_, s| {
            let Some(t) = s.resolve(id) else {
                return Ok(Wait::Done(false));
            };
            let me = s.current;
            if s.task(t).attached_to != Some(s.id_of(me)) {
                return Ok(Wait::Done(false));
            }
            if s.task(t).state == TaskState::Zombie {
                let status = s.task(t).status;
                s.task_mut(t).attached_to = None;
                let parent = s.task_mut(me);
                parent.join_status = status;
                parent.nattached = parent.nattached.saturating_sub(1);
                s.ready(t, true);
                return Ok(Wait::Resched(true));
            }
            if timeout == Timeout::Poll {
                return Ok(Wait::Done(false));
            }
            s.block(me, TaskState::Joining);
            s.task_mut(me).join = Some(id);
            s.arm_timer(me, timeout);
            Ok(Wait::Blocked)
        });
        let status = self.with_sched(|_, s| {
            let me = s.current_task_mut();
            me.join = None;
            me.join_status
        });
        joined.then_some(status)
    }

    /// Starts the idle task, which soaks up the CPU whenever nobody else
    /// wants it.
    pub(crate) fn start_idle(&self) {
        let id = self.create_task(
            "idle",
            Priority::MIN,
            self.config().min_stack,
            |kernel| kernel.idle(),
        );
        self.with_sched(|_, s| {
            if let Some(t) = s.resolve(id) {
                s.task_mut(t).protected = true;
                s.ready(t, false);
            }
        });
    }

    fn idle(&self) -> i32 {
        loop {
            self.reclaim_terminated();
            // Nothing can ever make a task runnable again: no interrupt
            // source exists on this machine besides the clock.
            if self.with_sched(|_, s| s.is_stalled()) {
                fail::die(self, Fault::NoRunnableTasks);
            }
            self.clock_interrupt();
        }
    }

    fn reclaim_terminated(&self) {
        while let Some(task) = self.with_sched(|_, s| s.reclaim_one()) {
            drop(task);
        }
    }
}
