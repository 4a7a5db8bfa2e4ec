// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel event trace.
//!
//! Every kernel records its scheduling history into a small ring buffer, which
//! can be read back with `Kernel::trace` or inspected from a debugger.

use abi::TaskId;

/// Number of entries kept per kernel.
pub const TRACE_DEPTH: usize = 64;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    Created(TaskId),
    Switch { from: TaskId, to: TaskId },
    /// A timer ran out before the task was woken by anything else.
    Timeout(TaskId),
    Exit { task: TaskId, status: i32 },
    Deleted { task: TaskId, status: i32 },
    Reclaimed(TaskId),
    Fault(TaskId),
}
