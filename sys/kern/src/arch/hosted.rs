// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hosted machine support.
//!
//! Each task runs on a host thread of its own. A single baton, shared by all
//! the threads of one machine, names the thread allowed to run; every other
//! thread of the machine is parked on the baton's condition variable. A
//! context switch passes the baton and parks the outgoing thread until the
//! baton comes back to it, so exactly one task of a machine executes at any
//! time, just as on a single CPU.
//!
//! Redirecting a task into its exit path is done by unwinding: the next time
//! the redirected thread gets the baton it raises an `ExitRedirect` payload,
//! which `run_guarded` catches at the bottom of the task.
//!
//! Halting (or powering off) marks the machine dead and wakes every thread,
//! and each of them unwinds with a `Halted` payload. On the boot thread (the
//! host thread that called `Kernel::boot`) `boot_guard` turns that back into
//! an ordinary panic carrying the epitaph. Task threads unwind out of their
//! bodies and end, dropping whatever they held.

use std::any::Any;
use std::boxed::Box;
use std::panic::{self, AssertUnwindSafe};
use std::string::{String, ToString};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::err::Fault;
use crate::task::ArchContext;

/// Host threads get at least this much stack, whatever the task asked for;
/// the test harness and formatting machinery need more than a small task
/// would on a bare machine.
const MIN_THREAD_STACK: usize = 256 * 1024;

/// Unwind payload carrying a task into its exit path.
struct ExitRedirect(i32);

/// Unwind payload raised on every thread of a machine that has halted.
struct Halted;

struct Baton {
    state: Mutex<BatonState>,
    turn: Condvar,
}

struct BatonState {
    /// Serial number of the context allowed to run.
    running: u64,
    next_serial: u64,
    halted: bool,
    epitaph: Option<String>,
}

impl Baton {
    fn lock(&self) -> MutexGuard<'_, BatonState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

}

/// Platform state of one booted kernel.
#[derive(Clone)]
pub struct Machine {
    baton: Arc<Baton>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            baton: Arc::new(Baton {
                state: Mutex::new(BatonState {
                    running: 0,
                    next_serial: 1,
                    halted: false,
                    epitaph: None,
                }),
                turn: Condvar::new(),
            }),
        }
    }

    fn issue_serial(&self) -> u64 {
        let mut state = self.baton.lock();
        let serial = state.next_serial;
        state.next_serial += 1;
        serial
    }

    pub fn is_halted(&self) -> bool {
        self.baton.lock().halted
    }

    /// Powers the machine off without a failure. Threads still parked wake
    /// up and unwind.
    pub fn shutdown(&self) {
        self.baton.lock().halted = true;
        self.baton.turn.notify_all();
    }

    /// Failure report left by `halt`, if the machine died.
    pub fn epitaph(&self) -> Option<String> {
        self.baton.lock().epitaph.clone()
    }
}

struct Cpu {
    serial: u64,
    baton: Arc<Baton>,
    redirect: Mutex<Option<i32>>,
}

/// Saved execution context of a task: a handle on the thread running it.
#[derive(Clone)]
pub struct Context(Arc<Cpu>);

impl Context {
    /// Turns the calling thread into the machine's first context, holding
    /// the baton.
    pub fn adopt_current(machine: &Machine) -> Self {
        let serial = machine.issue_serial();
        machine.baton.lock().running = serial;
        Context(Arc::new(Cpu {
            serial,
            baton: machine.baton.clone(),
            redirect: Mutex::new(None),
        }))
    }

    fn take_redirect(&self) -> Option<i32> {
        self.0
            .redirect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Parks the calling thread until this context holds the baton. Returns
    /// `false` if the machine halted instead.
    fn await_turn(&self) -> bool {
        let mut state = self.0.baton.lock();
        loop {
            if state.halted {
                return false;
            }
            if state.running == self.0.serial {
                return true;
            }
            state = self
                .0
                .baton
                .turn
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn pass_baton(&self, next: &Self) {
        self.0.baton.lock().running = next.0.serial;
        self.0.baton.turn.notify_all();
    }

    fn halted_here(&self) -> ! {
        panic::resume_unwind(Box::new(Halted))
    }
}

impl ArchContext for Context {
    type Machine = Machine;

    fn initialize(
        machine: &Machine,
        name: &str,
        stack_size: usize,
        entry: Box<dyn FnOnce() + Send>,
    ) -> Result<Self, Fault> {
        let ctx = Context(Arc::new(Cpu {
            serial: machine.issue_serial(),
            baton: machine.baton.clone(),
            redirect: Mutex::new(None),
        }));
        let me = ctx.clone();
        std::thread::Builder::new()
            .name(name.to_string())
            .stack_size(stack_size.max(MIN_THREAD_STACK))
            .spawn(move || {
                if !me.await_turn() {
                    return;
                }
                // A halt unwinds this far and ends the thread quietly.
                if let Err(payload) =
                    panic::catch_unwind(AssertUnwindSafe(entry))
                {
                    if !payload.is::<Halted>() {
                        panic::resume_unwind(payload);
                    }
                }
            })
            .map_err(|_| Fault::OutOfMemory)?;
        Ok(ctx)
    }

    fn redirect_to_exit(&self, status: i32) {
        *self.0.redirect.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(status);
    }

    fn switch_to(&self, next: &Self) {
        self.pass_baton(next);
        if !self.await_turn() {
            self.halted_here();
        }
        if let Some(status) = self.take_redirect() {
            unwind_exit(status);
        }
    }

    fn finish(&self, next: &Self) {
        self.pass_baton(next);
    }
}

/// How a task body came to an end.
pub enum Outcome {
    /// The body returned this status.
    Returned(i32),
    /// The task called `exit` or was deleted.
    Exited(i32),
    /// The body panicked with this message.
    Panicked(String),
}

/// Runs a task body on the current thread, catching the ways it can leave
/// other than returning.
pub fn run_guarded(ctx: &Context, body: impl FnOnce() -> i32) -> Outcome {
    // Deleted before it ever ran.
    if let Some(status) = ctx.take_redirect() {
        return Outcome::Exited(status);
    }
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(status) => Outcome::Returned(status),
        Err(payload) => {
            if let Some(exit) = payload.downcast_ref::<ExitRedirect>() {
                return Outcome::Exited(exit.0);
            }
            if payload.is::<Halted>() {
                panic::resume_unwind(payload);
            }
            Outcome::Panicked(panic_message(&*payload))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Abandons the current task body and resumes at its exit path.
pub fn unwind_exit(status: i32) -> ! {
    panic::resume_unwind(Box::new(ExitRedirect(status)))
}

/// Runs the boot thread's share of a machine's life. If the machine halts,
/// the epitaph is raised as a panic on the calling thread.
pub fn boot_guard(machine: &Machine, f: impl FnOnce() -> i32) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(status) => status,
        Err(payload) if payload.is::<Halted>() => {
            let epitaph = machine.epitaph().unwrap_or_default();
            panic!("{epitaph}");
        }
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Stops the machine. Only the first epitaph is kept.
pub fn halt(machine: &Machine, current: &Context, epitaph: &str) -> ! {
    {
        let mut state = machine.baton.lock();
        if !state.halted {
            state.halted = true;
            state.epitaph = Some(epitaph.to_string());
        }
    }
    machine.baton.turn.notify_all();
    current.halted_here()
}

/// Spins for at least `us` microseconds without giving up the CPU.
pub fn udelay(us: u32) {
    let until = Instant::now() + Duration::from_micros(u64::from(us));
    while Instant::now() < until {
        core::hint::spin_loop();
    }
}
