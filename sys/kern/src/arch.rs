// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Machine support.
//!
//! Exactly one machine module is compiled in and re-exported from here, so
//! the rest of the kernel names `arch::Context` and friends without caring
//! which machine it runs on. Every machine module provides:
//!
//! - `Context`, implementing `crate::task::ArchContext`;
//! - `Machine`, the per-kernel platform state, with `new`, `is_halted`,
//!   `shutdown` and `epitaph`;
//! - `Outcome`, `run_guarded`, `unwind_exit`, `boot_guard`, `halt` and
//!   `udelay`.

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        compile_error!("no bare-metal port: context switching is only implemented for hosted targets");
    } else {
        pub mod hosted;
        pub use hosted::*;
    }
}
