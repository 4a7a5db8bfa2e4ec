// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! The kernel sorts everything that can go wrong into two tiers:
//!
//! - Expected outcomes (a timeout, a zero-length request, a permission check
//!   failing, a non-blocking call finding nothing to do) are reported to the
//!   caller as `bool`, a count, or an `Option`, and never abort anything.
//!
//! - Broken contracts between cooperating tasks are a `Fault`. All tasks share
//!   one address space, so there is nothing to contain the damage: a fault is
//!   handed to `fail::die` and the machine halts.
//!
//! Kernel code that detects a fault while interrupts are masked returns it as
//! an `Err` and lets the caller raise it after unmasking.

use alloc::string::String;
use core::fmt;

/// A fatal condition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Fault {
    /// A task tried to enter a monitor it already owns.
    MonitorReentered { monitor: String },
    /// A task released, waited on or signalled something it does not own.
    NotOwner { kind: &'static str, name: String },
    /// A message didn't fit the receiver's buffer.
    MessageTooLarge { len: usize, capacity: usize },
    /// `exit` was called again while the task was already exiting (e.g. from
    /// its cleanup hook).
    RecursiveExit,
    /// A message queue's record size times its capacity overflows.
    QueueCapacity { name: String },
    /// A record of the wrong size was offered to, or requested from, a
    /// message queue.
    RecordSize {
        name: String,
        expected: usize,
        got: usize,
    },
    /// The allocator could not satisfy a kernel request.
    OutOfMemory,
    /// Every slot a `TaskId` can name is in use.
    TaskTableFull,
    /// A task body panicked.
    TaskPanicked { message: String },
    /// Nothing is ready, nothing is timed, and nothing else can ever happen.
    NoRunnableTasks,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MonitorReentered { monitor } => {
                write!(f, "EnterMonitor {monitor}: monitor already owned")
            }
            Self::NotOwner { kind, name } => {
                write!(f, "{kind} {name}: not owned by this task")
            }
            Self::MessageTooLarge { len, capacity } => write!(
                f,
                "message of {len} bytes exceeds receiver buffer of {capacity}"
            ),
            Self::RecursiveExit => f.write_str("recursive exit"),
            Self::QueueCapacity { name } => {
                write!(f, "message queue {name}: capacity exceeded")
            }
            Self::RecordSize {
                name,
                expected,
                got,
            } => write!(
                f,
                "message queue {name}: record of {got} bytes, expected {expected}"
            ),
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::TaskTableFull => f.write_str("task table full"),
            Self::TaskPanicked { message } => {
                write!(f, "task panicked: {message}")
            }
            Self::NoRunnableTasks => {
                f.write_str("no runnable tasks and no timers pending")
            }
        }
    }
}
