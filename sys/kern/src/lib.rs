// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A priority-preemptive kernel for a single CPU.
//!
//! All tasks share one address space and one processor. The kernel decides
//! which of them runs, parks the ones waiting for something, and provides the
//! primitives they coordinate with: wait queues, counting semaphores,
//! recursive mutexes, monitors with condition variables, byte pipes, message
//! queues of fixed-size records, and synchronous message passing between
//! tasks.
//!
//! # Design principles
//!
//! 1. No global state. A kernel is booted explicitly with `Kernel::boot` and
//!    reached through the `Kernel` handle every task is given; several
//!    kernels can coexist in one host process.
//! 2. Static configuration. The kernel takes the shape described by its
//!    `KernelConfig` at boot and keeps it.
//! 3. Switches happen in one place. Anything that may change who should run
//!    updates the scheduler state with interrupts masked and then asks for a
//!    reschedule once they are unmasked again; interrupt handlers only ever
//!    defer the switch to the point where the outermost one returns.
//! 4. Broken contracts are fatal. There is no isolation between tasks, so a
//!    `Fault` halts the machine with a report naming the task at fault.
//!
//! The code outside of `arch` is portable. The only machine implemented is
//! the hosted one, which runs each task on a host thread of its own and lets
//! exactly one of them execute at a time.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod err;
mod fail;
mod kernel;
mod lifecycle;
mod rendezvous;
mod sched;
pub mod sync;
pub mod task;
pub mod time;
pub mod trace;
mod umem;

pub use abi::{Priority, TaskId, TaskInfo, TaskState, WaitTarget, FOREVER};
pub use config::{ConfigError, KernelConfig};
pub use err::Fault;
pub use kernel::{AtomicSection, Kernel};
pub use sync::{
    Condition, Monitor, MsgQueue, Mutex, Pipe, Semaphore, WaitQueue,
};
pub use task::{Received, SaveRestore};
pub use trace::Trace;
