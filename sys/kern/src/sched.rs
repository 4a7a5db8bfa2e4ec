// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduler state.
//!
//! `Sched` is everything the kernel knows: the task table, the queue table,
//! the time queue and the scheduling counters. It is only ever touched with
//! interrupts masked (see `Kernel::with_sched`), so nothing in this module
//! blocks or switches; operations that make some task runnable leave it to
//! the caller to reschedule once interrupts are unmasked again.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use abi::{
    Generation, Priority, TaskId, TaskInfo, TaskState, WaitTarget,
};
use kerncore::{Links, ListEnds, TimeLink, WaitLink};
use ringbuf::{ringbuf_entry, Ringbuf};

use crate::arch::Context;
use crate::config::KernelConfig;
use crate::err::Fault;
use crate::task::{Pending, Task};
use crate::time::{Timeout, Timestamp};
use crate::trace::{Trace, TRACE_DEPTH};

/// What a blocking operation decided to do, computed with interrupts masked.
pub(crate) enum Wait {
    /// Finished without blocking or waking anybody.
    Done(bool),
    /// Finished without blocking, but woke somebody who may deserve the CPU.
    Resched(bool),
    /// The caller has been parked; the result arrives with the wake-up.
    Blocked,
}

struct Slot {
    generation: Generation,
    task: Option<Task>,
}

struct QueueSlot {
    name: String,
    ends: ListEnds,
}

pub(crate) struct Sched {
    config: KernelConfig,
    slots: Vec<Slot>,
    queues: Vec<QueueSlot>,
    free_queues: Vec<usize>,
    time: ListEnds,
    /// Task holding the CPU.
    pub current: usize,
    ready_q: usize,
    terminated_q: usize,
    ticks: Timestamp,
    /// Ticks left in the current task's quantum.
    ticks_to_run: u32,
    /// Interrupt nesting depth; context switches only happen at zero.
    pub int_level: u32,
    /// Console whose input is routed to the running task.
    pub focus: u32,
    pub trace: Ringbuf<Trace, TRACE_DEPTH>,
}

impl Sched {
    /// Builds the scheduler with its first task, the one running on `boot`,
    /// already Current.
    pub fn new(config: KernelConfig, boot: Context) -> Self {
        let queue = |name: &str| QueueSlot {
            name: String::from(name),
            ends: ListEnds::EMPTY,
        };
        let mut main = Task::new(
            String::from("main"),
            Priority::DEFAULT,
            boot,
            config.default_stack,
            2,
        );
        main.state = TaskState::Current;
        main.protected = true;

        let mut sched = Sched {
            config,
            slots: vec![Slot {
                generation: Generation::ZERO,
                task: Some(main),
            }],
            queues: vec![queue("ready"), queue("terminated"), queue("main")],
            free_queues: Vec::new(),
            time: ListEnds::EMPTY,
            current: 0,
            ready_q: 0,
            terminated_q: 1,
            ticks: Timestamp::default(),
            ticks_to_run: config.quantum_ticks,
            int_level: 0,
            focus: 0,
            trace: Ringbuf::new(Trace::None),
        };
        ringbuf_entry!(sched.trace, Trace::Created(sched.id_of(0)));
        sched
    }

    // Queue table.

    pub fn alloc_queue(&mut self, name: String) -> Result<usize, Fault> {
        let slot = QueueSlot {
            name,
            ends: ListEnds::EMPTY,
        };
        if let Some(q) = self.free_queues.pop() {
            self.queues[q] = slot;
            return Ok(q);
        }
        self.queues.try_reserve(1).map_err(|_| Fault::OutOfMemory)?;
        self.free_queues
            .try_reserve(1)
            .map_err(|_| Fault::OutOfMemory)?;
        self.queues.push(slot);
        Ok(self.queues.len() - 1)
    }

    /// Returns queue `q` to the free list. The queue must be empty.
    pub fn free_queue(&mut self, q: usize) {
        debug_assert!(self.queues[q].ends.is_empty());
        self.queues[q].name = String::new();
        self.free_queues.push(q);
    }

    pub fn queue_name(&self, q: usize) -> &str {
        &self.queues[q].name
    }

    pub fn queue_is_empty(&self, q: usize) -> bool {
        self.queues[q].ends.is_empty()
    }

    // Task table.

    /// Creates a Suspended task in a free slot, along with its sender queue.
    pub fn insert_task(
        &mut self,
        name: String,
        priority: Priority,
        context: Context,
        stack_size: usize,
    ) -> Result<usize, Fault> {
        let vacant = self.slots.iter().position(|slot| slot.task.is_none());
        let t = match vacant {
            Some(t) => t,
            None if self.slots.len() > TaskId::INDEX_MASK as usize => {
                return Err(Fault::TaskTableFull);
            }
            None => {
                self.slots.try_reserve(1).map_err(|_| Fault::OutOfMemory)?;
                self.slots.push(Slot {
                    generation: Generation::ZERO,
                    task: None,
                });
                self.slots.len() - 1
            }
        };
        let send_queue = self.alloc_queue(name.clone())?;
        self.slots[t].task =
            Some(Task::new(name, priority, context, stack_size, send_queue));
        ringbuf_entry!(self.trace, Trace::Created(self.id_of(t)));
        Ok(t)
    }

    pub fn task(&self, t: usize) -> &Task {
        match &self.slots[t].task {
            Some(task) => task,
            None => panic!("task slot {t} is vacant"),
        }
    }

    pub fn task_mut(&mut self, t: usize) -> &mut Task {
        match &mut self.slots[t].task {
            Some(task) => task,
            None => panic!("task slot {t} is vacant"),
        }
    }

    pub fn current_task(&self) -> &Task {
        self.task(self.current)
    }

    pub fn current_task_mut(&mut self) -> &mut Task {
        self.task_mut(self.current)
    }

    pub fn id_of(&self, t: usize) -> TaskId {
        TaskId::for_index_and_gen(t, self.slots[t].generation)
    }

    /// Finds the slot a `TaskId` names, unless the task it named is gone.
    pub fn resolve(&self, id: TaskId) -> Option<usize> {
        let slot = self.slots.get(id.index())?;
        (slot.generation == id.generation() && slot.task.is_some())
            .then_some(id.index())
    }

    /// Indices of every task not yet reclaimed.
    pub fn live_tasks(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.task.is_some())
            .map(|(t, _)| t)
    }

    /// Checks whether `actor` may meddle with `target`: protected tasks can
    /// only be touched by protected tasks.
    pub fn permitted(&self, actor: usize, target: usize) -> bool {
        self.task(actor).protected || !self.task(target).protected
    }

    // Scheduling.

    /// Makes `t` runnable, cancelling whatever it was blocked on. `success` is
    /// what its blocking call will report. Does nothing to a task that is
    /// already Ready.
    pub fn ready(&mut self, t: usize, success: bool) {
        if self.task(t).state == TaskState::Ready {
            return;
        }
        kerncore::dequeue(self, t);
        kerncore::dequeue_time(self, t);
        let ready_q = self.ready_q;
        kerncore::enqueue(self, t, ready_q);
        let task = self.task_mut(t);
        task.pending = Pending::None;
        task.success = success;
        task.state = TaskState::Ready;
    }

    /// Takes `t` off every list and leaves it in `state`.
    pub fn block(&mut self, t: usize, state: TaskState) {
        kerncore::dequeue(self, t);
        kerncore::dequeue_time(self, t);
        let task = self.task_mut(t);
        task.pending = Pending::None;
        task.state = state;
    }

    pub fn arm_timer(&mut self, t: usize, timeout: Timeout) {
        if let Timeout::Ticks(n) = timeout {
            kerncore::enqueue_time(self, t, n);
        }
    }

    /// Parks the current task in queue `q`.
    pub fn wait_current(&mut self, q: usize, timeout: Timeout) -> Wait {
        if timeout == Timeout::Poll {
            return Wait::Done(false);
        }
        let me = self.current;
        self.block(me, TaskState::Waiting);
        kerncore::enqueue(self, me, q);
        self.arm_timer(me, timeout);
        Wait::Blocked
    }

    /// Wakes the member of `q` due to be served next, with success.
    pub fn signal(&mut self, q: usize) -> Option<usize> {
        let t = kerncore::get_last(self, q)?;
        self.ready(t, true);
        Some(t)
    }

    /// Wakes every member of `q`. Returns whether there were any.
    pub fn flush(&mut self, q: usize, success: bool) -> bool {
        let mut any = false;
        while let Some(t) = kerncore::get_last(self, q) {
            self.ready(t, success);
            any = true;
        }
        any
    }

    /// Retires an exiting task: it will never run again once the CPU moves
    /// on, and the idle task will eventually reclaim its slot.
    pub fn terminate(&mut self, t: usize, status: i32) {
        let send_queue = self.task(t).send_queue;
        self.flush(send_queue, false);
        self.block(t, TaskState::Terminated);
        self.task_mut(t).priority = Priority::MIN;
        let terminated_q = self.terminated_q;
        kerncore::enqueue(self, t, terminated_q);
        ringbuf_entry!(self.trace, Trace::Exit {
            task: self.id_of(t),
            status,
        });
    }

    /// Frees the slot of one terminated task, if any. The task is handed back
    /// so that its remains are dropped after interrupts are unmasked.
    pub fn reclaim_one(&mut self) -> Option<Task> {
        let terminated_q = self.terminated_q;
        let t = kerncore::get_last(self, terminated_q)?;
        ringbuf_entry!(self.trace, Trace::Reclaimed(self.id_of(t)));
        let slot = &mut self.slots[t];
        slot.generation = slot.generation.next();
        let task = slot.task.take()?;
        self.free_queue(task.send_queue);
        Some(task)
    }

    /// Advances time by one clock tick, waking the tasks whose timers ran out.
    pub fn tick(&mut self) {
        self.ticks = self.ticks.next();
        self.ticks_to_run = self.ticks_to_run.saturating_sub(1);
        kerncore::tick(self, |s, t| {
            ringbuf_entry!(s.trace, Trace::Timeout(s.id_of(t)));
            s.ready(t, false);
        });
    }

    pub fn now_ms(&self) -> u64 {
        u64::from(self.ticks) * u64::from(self.config.ms_per_tick)
    }

    /// Nothing is runnable and no timer is pending.
    pub fn is_stalled(&self) -> bool {
        self.queues[self.ready_q].ends.is_empty() && self.time.is_empty()
    }

    /// Decides who runs next, hands the CPU over in the bookkeeping, and runs
    /// the switch hooks. Returns the contexts to switch between, or `None` if
    /// the current task keeps the CPU.
    ///
    /// A current task that has given up the CPU with nobody ready to take it
    /// is a deadlock: `NoRunnableTasks`.
    pub fn select_next(&mut self) -> Result<Option<(Context, Context)>, Fault> {
        let curr = self.current;
        let ready_q = self.ready_q;
        if self.task(curr).state == TaskState::Current {
            let me = self.task(curr);
            if me.atomic_level > 0 {
                return Ok(None);
            }
            let Some(candidate) = kerncore::peek_last(&*self, ready_q) else {
                return Ok(None);
            };
            let theirs = self.task(candidate).priority;
            let mine = self.task(curr).priority;
            let preempt = theirs.is_more_urgent_than(mine)
                || (theirs == mine && self.ticks_to_run == 0);
            if !preempt {
                return Ok(None);
            }
            self.task_mut(curr).state = TaskState::Ready;
            kerncore::enqueue(self, curr, ready_q);
        }

        let next =
            kerncore::get_last(self, ready_q).ok_or(Fault::NoRunnableTasks)?;
        self.task_mut(next).state = TaskState::Current;
        if next == curr {
            return Ok(None);
        }

        self.task_mut(curr).save();
        self.current = next;
        self.ticks_to_run = self.config.quantum_ticks;
        self.focus = self.task(next).console;
        self.task_mut(next).restore();
        ringbuf_entry!(self.trace, Trace::Switch {
            from: self.id_of(curr),
            to: self.id_of(next),
        });

        Ok(Some((
            self.task(curr).context.clone(),
            self.task(next).context.clone(),
        )))
    }

    /// Puts `t` back in its place after its priority changed.
    pub fn set_priority(&mut self, t: usize, priority: Priority) {
        self.task_mut(t).priority = priority;
        kerncore::requeue(self, t);
    }

    pub fn info(&self, t: usize) -> TaskInfo {
        let task = self.task(t);
        let waiting = match task.state {
            TaskState::Waiting | TaskState::Sending => task
                .wait
                .queue
                .map(|q| WaitTarget::Queue(self.queues[q].name.clone())),
            TaskState::Receiving => task.expecting.map(WaitTarget::Task),
            TaskState::Joining => task.join.map(WaitTarget::Task),
            TaskState::Zombie => task.attached_to.map(WaitTarget::Task),
            _ => None,
        };
        TaskInfo {
            id: self.id_of(t),
            name: task.name.clone(),
            console: task.console,
            priority: task.priority,
            state: task.state,
            stack_size: task.stack_size,
            waiting,
            timeout: kerncore::remaining_ticks(self, t)
                .map(|n| self.config.ticks_to_msecs(n)),
            protected: task.protected,
        }
    }
}

impl Links for Sched {
    fn priority(&self, t: usize) -> u32 {
        self.task(t).priority.0
    }

    fn wait_link(&self, t: usize) -> &WaitLink {
        &self.task(t).wait
    }

    fn wait_link_mut(&mut self, t: usize) -> &mut WaitLink {
        &mut self.task_mut(t).wait
    }

    fn time_link(&self, t: usize) -> &TimeLink {
        &self.task(t).time
    }

    fn time_link_mut(&mut self, t: usize) -> &mut TimeLink {
        &mut self.task_mut(t).time
    }

    fn queue_ends(&self, q: usize) -> &ListEnds {
        &self.queues[q].ends
    }

    fn queue_ends_mut(&mut self, q: usize) -> &mut ListEnds {
        &mut self.queues[q].ends
    }

    fn time_ends(&self) -> &ListEnds {
        &self.time
    }

    fn time_ends_mut(&mut self) -> &mut ListEnds {
        &mut self.time
    }
}
