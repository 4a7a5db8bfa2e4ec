// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message queues of fixed-size records.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use abi::FOREVER;

use crate::err::Fault;
use crate::fail;
use crate::kernel::POLL;
use crate::sync::Semaphore;
use crate::Kernel;

struct Records {
    buf: Box<[u8]>,
    /// Record slot the next `get` reads.
    head: usize,
    /// Record slot the next `put` writes.
    tail: usize,
}

/// A bounded FIFO of records, all exactly `record_size` bytes long.
///
/// Each call moves exactly one whole record. Two semaphores do all the
/// waiting: `slots` counts free records and `items` counts queued ones.
pub struct MsgQueue {
    name: String,
    record_size: usize,
    capacity: usize,
    items: Semaphore,
    slots: Semaphore,
    records: critical_section::Mutex<RefCell<Records>>,
}

impl MsgQueue {
    /// Creates a queue of `capacity` records. A size that cannot be
    /// represented is fatal.
    pub fn new(
        kernel: &Kernel,
        name: &str,
        record_size: usize,
        capacity: usize,
    ) -> Self {
        let fault = || Fault::QueueCapacity { name: name.into() };
        let Some(bytes) = record_size.checked_mul(capacity) else {
            fail::die(kernel, fault());
        };
        let Ok(slot_count) = u32::try_from(capacity) else {
            fail::die(kernel, fault());
        };
        let mut buf = Vec::new();
        if buf.try_reserve_exact(bytes).is_err() {
            fail::die(kernel, Fault::OutOfMemory);
        }
        buf.resize(bytes, 0u8);

        Self {
            name: name.into(),
            record_size,
            capacity,
            items: Semaphore::new(kernel, &format!("get {name}"), 0),
            slots: Semaphore::new(kernel, &format!("put {name}"), slot_count),
            records: critical_section::Mutex::new(RefCell::new(Records {
                buf: buf.into_boxed_slice(),
                head: 0,
                tail: 0,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Records waiting to be read.
    pub fn avail(&self) -> usize {
        self.items.value() as usize
    }

    #[must_use]
    pub fn put(&self, record: &[u8]) -> bool {
        self.put_timed(record, FOREVER)
    }

    #[must_use]
    pub fn try_put(&self, record: &[u8]) -> bool {
        self.put_timed(record, POLL)
    }

    /// Queues `record`, waiting up to `ms` milliseconds for a free slot.
    #[must_use]
    pub fn put_timed(&self, record: &[u8], ms: u32) -> bool {
        self.check_size(record.len());
        if !self.slots.wait_timed(ms) {
            return false;
        }
        let size = self.record_size;
        let capacity = self.capacity;
        self.slots.kernel().without_interrupts(|cs| {
            let mut r = self.records.borrow_ref_mut(cs);
            let at = r.tail * size;
            r.buf[at..at + size].copy_from_slice(record);
            r.tail = (r.tail + 1) % capacity;
        });
        self.items.signal();
        true
    }

    #[must_use]
    pub fn get(&self, record: &mut [u8]) -> bool {
        self.get_timed(record, FOREVER)
    }

    #[must_use]
    pub fn try_get(&self, record: &mut [u8]) -> bool {
        self.get_timed(record, POLL)
    }

    /// Takes the oldest record into `record`, waiting up to `ms` milliseconds
    /// for one to arrive.
    #[must_use]
    pub fn get_timed(&self, record: &mut [u8], ms: u32) -> bool {
        self.check_size(record.len());
        if !self.items.wait_timed(ms) {
            return false;
        }
        let size = self.record_size;
        let capacity = self.capacity;
        self.items.kernel().without_interrupts(|cs| {
            let mut r = self.records.borrow_ref_mut(cs);
            let at = r.head * size;
            record.copy_from_slice(&r.buf[at..at + size]);
            r.head = (r.head + 1) % capacity;
        });
        self.slots.signal();
        true
    }

    fn check_size(&self, got: usize) {
        if got != self.record_size {
            fail::die(
                self.items.kernel(),
                Fault::RecordSize {
                    name: self.name.clone(),
                    expected: self.record_size,
                    got,
                },
            );
        }
    }
}
