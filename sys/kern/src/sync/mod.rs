// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synchronization primitives.
//!
//! Everything here is built on `WaitQueue` plus a little state kept next to
//! it, guarded by the same interrupt mask as the scheduler. Each blocking
//! operation comes in three flavors: `op` waits forever, `try_op` doesn't
//! wait, and `op_timed` waits up to a number of milliseconds.

mod monitor;
mod msgqueue;
mod mutex;
mod pipe;
mod queue;
mod sem;

pub use monitor::{Condition, Monitor};
pub use msgqueue::MsgQueue;
pub use mutex::Mutex;
pub use pipe::Pipe;
pub use queue::WaitQueue;
pub use sem::Semaphore;
