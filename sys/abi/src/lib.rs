// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and the code running in
//! its tasks.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::string::String;
use serde::{Deserialize, Serialize};

/// Timeout value meaning "wait as long as it takes."
pub const FOREVER: u32 = u32::MAX;

/// Names a particular incarnation of a task.
///
/// A `TaskId` combines two fields, a slot index in the kernel's task arena and
/// a generation number. The generation number of a slot is incremented when
/// the task occupying it is reclaimed, so a `TaskId` held after its task has
/// been reclaimed no longer matches the slot, and operations naming it fail
/// instead of acting on whatever task was created into the slot later.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize,
    Deserialize,
)]
pub struct TaskId(pub u32);

impl TaskId {
    /// Number of bits in a `TaskId` used to represent the slot index, rather
    /// than generation number.
    pub const INDEX_BITS: u32 = 16;

    /// Derived mask of the index bits portion.
    pub const INDEX_MASK: u32 = (1 << Self::INDEX_BITS) - 1;

    /// Fabricates a `TaskId` for a known index and generation number.
    pub const fn for_index_and_gen(index: usize, gen: Generation) -> Self {
        TaskId(
            (index as u32 & Self::INDEX_MASK)
                | (gen.0 as u32) << Self::INDEX_BITS,
        )
    }

    /// Extracts the index part of this ID.
    pub fn index(&self) -> usize {
        (self.0 & Self::INDEX_MASK) as usize
    }

    /// Extracts the generation part of this ID.
    pub fn generation(&self) -> Generation {
        Generation((self.0 >> Self::INDEX_BITS) as u16)
    }
}

impl core::fmt::Display for TaskId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}.{}", self.index(), self.generation().0)
    }
}

/// Type used to track generation numbers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Generation(u16);

impl Generation {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}

impl From<u16> for Generation {
    fn from(x: u16) -> Self {
        Self(x)
    }
}

/// Indicates priority of a task.
///
/// Numerically *higher* priorities are more urgent: a ready task with a larger
/// number preempts one with a smaller number. `Priority::MAX` is reserved to
/// mean "never loses a priority comparison"; two `MAX` tasks still share the
/// CPU by quantum.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`, to
/// keep us from confusing ourselves on whether `>` means numerically greater
/// or more urgent. Use the named comparisons.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Priority(pub u32);

impl Priority {
    /// Priority of the idle task. Nothing runs below it.
    pub const MIN: Self = Self(0);
    /// Priority given to the boot task.
    pub const DEFAULT: Self = Self(100);
    /// Sentinel meaning "always wins".
    pub const MAX: Self = Self(u32::MAX);

    /// Checks if `self` is strictly more urgent than `other`.
    pub fn is_more_urgent_than(self, other: Self) -> bool {
        self.0 > other.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Scheduling state of a task.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskState {
    /// Created or explicitly suspended; not eligible to run.
    Suspended,
    /// Sitting in the ready queue.
    Ready,
    /// Running on the CPU.
    Current,
    /// Blocked in a delay.
    Delaying,
    /// Blocked in a wait queue belonging to some primitive.
    Waiting,
    /// Blocked trying to deliver a message.
    Sending,
    /// Blocked waiting for a message.
    Receiving,
    /// Blocked waiting for an attached child to exit.
    Joining,
    /// Exited while attached; holding its status for the parent.
    Zombie,
    /// Finished. Waiting to be reclaimed.
    Terminated,
}

/// What a blocked task is waiting on, as reported in a `TaskInfo`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum WaitTarget {
    /// A named wait queue (including another task's sender queue).
    Queue(String),
    /// A particular task: the expected sender, the joined child, or the parent
    /// a zombie is waiting for.
    Task(TaskId),
}

/// Snapshot of a task, as produced by the kernel's query operations.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub console: u32,
    pub priority: Priority,
    pub state: TaskState,
    /// Bytes of stack granted at creation.
    pub stack_size: usize,
    pub waiting: Option<WaitTarget>,
    /// Milliseconds left before the task's timer fires, if it has one.
    pub timeout: Option<u32>,
    pub protected: bool,
}
