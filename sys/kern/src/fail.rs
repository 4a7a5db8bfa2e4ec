// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for recording kernel failures.
//!
//! `die` is the single way down. It focuses the console of the task that was
//! running, writes an "epitaph" describing the failure into a fixed-size
//! buffer (truncating if the buffer fills, and never allocating), and hands
//! it to `arch::halt`, which stops the machine. On the hosted machine the
//! epitaph resurfaces as a panic on the thread that booted the kernel.
//!
//! If the machine is already going down, a second failure does not write a
//! new epitaph; the first one stands.

use core::fmt::Write;

use ringbuf::ringbuf_entry;

use crate::arch;
use crate::err::Fault;
use crate::trace::Trace;
use crate::Kernel;

const EPITAPH_LEN: usize = 256;

pub(crate) fn die(kernel: &Kernel, fault: Fault) -> ! {
    let mut epitaph = [0u8; EPITAPH_LEN];
    let machine = kernel.machine();
    let (context, len) = kernel.with_sched(|_, s| {
        let t = s.current;
        let id = s.id_of(t);
        ringbuf_entry!(s.trace, Trace::Fault(id));
        let task = s.task(t);
        let console = task.console;
        let mut writer = Eulogist {
            dest: &mut epitaph[..],
        };
        write!(writer, "PANIC: {} (cons {console}): {fault}", task.name).ok();
        let len = EPITAPH_LEN - writer.dest.len();
        let context = task.context.clone();
        s.focus = console;
        (context, len)
    });

    if machine.is_halted() {
        arch::halt(machine, &context, "");
    }
    arch::halt(machine, &context, utf8_prefix(&epitaph[..len]))
}

/// Longest prefix of `bytes` that is valid UTF-8; truncation may have split
/// a character.
fn utf8_prefix(bytes: &[u8]) -> &str {
    match core::str::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default()
        }
    }
}

struct Eulogist<'a> {
    dest: &'a mut [u8],
}

impl Write for Eulogist<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, leftovers) = {
            let taken = core::mem::take(&mut self.dest);
            taken.split_at_mut(n)
        };
        dest.copy_from_slice(&s[..n]);
        self.dest = leftovers;
        Ok(())
    }
}
