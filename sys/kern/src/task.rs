// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::any::Any;

use abi::{Priority, TaskId, TaskState};
use kerncore::{TimeLink, WaitLink};

use crate::err::Fault;
use crate::umem::{MsgBuf, MsgBufMut};

/// Per-task local storage: shared, type-erased, checked on the way out.
pub type Local = Arc<dyn Any + Send + Sync>;

/// Hooks run around every context switch involving a task, for state the
/// kernel does not know how to save (an FPU, a graphics mode, ...).
///
/// Both hooks run with interrupts masked and must not call back into the
/// kernel.
pub trait SaveRestore: Send {
    /// The task is about to lose the CPU.
    fn save(&mut self);
    /// The task has just been given the CPU.
    fn restore(&mut self);
}

/// Interface that must be implemented by the `arch::Context` type. This gives
/// the scheduler a way to start, stop and redirect tasks without knowing how
/// the platform represents them.
pub trait ArchContext: Clone + Send + Sync + Sized {
    type Machine;

    /// Prepares a context whose first dispatch runs `entry`. `entry` must
    /// never return into the kernel except by way of `finish`.
    fn initialize(
        machine: &Self::Machine,
        name: &str,
        stack_size: usize,
        entry: Box<dyn FnOnce() + Send>,
    ) -> Result<Self, Fault>;

    /// Arranges for the task to abandon whatever it is doing the next time it
    /// is dispatched and enter its exit path with `status`.
    fn redirect_to_exit(&self, status: i32);

    /// Saves the current context in `self` and resumes `next`. Returns when
    /// something switches back to `self`.
    fn switch_to(&self, next: &Self);

    /// Like `switch_to`, but `self` is finished and is never resumed.
    fn finish(&self, next: &Self);
}

/// A buffer a blocked task has left with the kernel.
pub(crate) enum Pending {
    None,
    Send(MsgBuf),
    Receive(MsgBufMut),
}

/// Result of a completed receive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Received {
    /// Task the message came from.
    pub from: TaskId,
    /// Number of bytes copied into the caller's buffer.
    pub len: usize,
}

/// Internal representation of a task.
pub(crate) struct Task {
    pub name: String,
    pub priority: Priority,
    pub state: TaskState,
    pub context: crate::arch::Context,
    /// Stack granted at creation, after applying the configured floor.
    pub stack_size: usize,
    /// Nesting depth of atomic sections; preemption is deferred while nonzero.
    pub atomic_level: u32,
    pub console: u32,
    pub local: Option<Local>,
    pub hooks: Option<Box<dyn SaveRestore>>,
    pub cleanup: Option<Box<dyn FnOnce() + Send>>,

    pub wait: WaitLink,
    pub time: TimeLink,
    /// Outcome of the most recent wake-up.
    pub success: bool,

    /// Queue of tasks blocked sending to this one.
    pub send_queue: usize,
    pub pending: Pending,
    /// Sender a receiving task insists on, if any.
    pub expecting: Option<TaskId>,
    pub received: Option<Received>,

    /// Child a joining task is waiting for.
    pub join: Option<TaskId>,
    pub join_status: i32,
    /// Status the task exited with, held for a joining parent.
    pub status: i32,
    pub attached_to: Option<TaskId>,
    pub nattached: u32,
    pub exiting: bool,
    pub protected: bool,
}

impl Task {
    pub fn new(
        name: String,
        priority: Priority,
        context: crate::arch::Context,
        stack_size: usize,
        send_queue: usize,
    ) -> Self {
        Task {
            name,
            priority,
            state: TaskState::Suspended,
            context,
            stack_size,
            atomic_level: 0,
            console: 0,
            local: None,
            hooks: None,
            cleanup: None,
            wait: WaitLink::default(),
            time: TimeLink::default(),
            success: false,
            send_queue,
            pending: Pending::None,
            expecting: None,
            received: None,
            join: None,
            join_status: 0,
            status: 0,
            attached_to: None,
            nattached: 0,
            exiting: false,
            protected: false,
        }
    }

    pub fn save(&mut self) {
        if let Some(hooks) = &mut self.hooks {
            hooks.save();
        }
    }

    pub fn restore(&mut self) {
        if let Some(hooks) = &mut self.hooks {
            hooks.restore();
        }
    }
}
