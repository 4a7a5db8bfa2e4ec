// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for moving messages between the buffers of two tasks.
//!
//! A task blocked in send or receive leaves a description of its buffer with
//! the kernel, and whichever task completes the rendezvous copies into or out
//! of it. The buffer lives in the blocked task's stack frame, which the
//! borrow checker cannot see across the switch, so it is recorded as a raw
//! pointer and length.
//!
//! The invariant that makes this sound: a buffer is registered only while its
//! owner is parked inside the call that lent it, and the kernel forgets it
//! (see `Sched::ready` and `Sched::block`) before that owner can run again.

use crate::err::Fault;

/// Bytes a blocked sender is offering.
pub(crate) struct MsgBuf {
    base: *const u8,
    len: usize,
}

/// Space a blocked receiver has lent for an incoming message.
pub(crate) struct MsgBufMut {
    base: *mut u8,
    len: usize,
}

// Safety: the pointers are only dereferenced by whichever task holds the CPU,
// under the registration invariant described above.
unsafe impl Send for MsgBuf {}
unsafe impl Send for MsgBufMut {}

impl MsgBuf {
    pub fn new(data: &[u8]) -> Self {
        Self {
            base: data.as_ptr(),
            len: data.len(),
        }
    }

    /// Copies the offered bytes into `dest`.
    ///
    /// # Safety
    ///
    /// The owner of the buffer must still be parked in the call that
    /// registered it.
    pub unsafe fn copy_into(&self, dest: &mut [u8]) -> Result<usize, Fault> {
        // Safety: per this function's contract the source is live and not
        // being written.
        let src = unsafe { core::slice::from_raw_parts(self.base, self.len) };
        transfer(src, dest)
    }
}

impl MsgBufMut {
    pub fn new(data: &mut [u8]) -> Self {
        Self {
            base: data.as_mut_ptr(),
            len: data.len(),
        }
    }

    /// Copies `src` into the lent space.
    ///
    /// # Safety
    ///
    /// The owner of the buffer must still be parked in the call that
    /// registered it.
    pub unsafe fn copy_from(&self, src: &[u8]) -> Result<usize, Fault> {
        // Safety: per this function's contract nobody else is looking at the
        // destination.
        let dest =
            unsafe { core::slice::from_raw_parts_mut(self.base, self.len) };
        transfer(src, dest)
    }
}

/// Copies a whole message. An empty side carries no data: the transfer is a
/// pure handshake and reports zero bytes. Otherwise a message bigger than its
/// destination is fatal.
pub(crate) fn transfer(src: &[u8], dest: &mut [u8]) -> Result<usize, Fault> {
    if src.is_empty() || dest.is_empty() {
        return Ok(0);
    }
    let capacity = dest.len();
    let dest = dest.get_mut(..src.len()).ok_or(Fault::MessageTooLarge {
        len: src.len(),
        capacity,
    })?;
    dest.copy_from_slice(src);
    Ok(src.len())
}
