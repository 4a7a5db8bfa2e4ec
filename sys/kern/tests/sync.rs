// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The synchronization primitives, exercised by several tasks at once.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use prio_kern::{
    Condition, Kernel, KernelConfig, Monitor, MsgQueue, Mutex, Pipe,
    Priority, Semaphore, TaskState, WaitQueue,
};

#[test]
fn dining_philosophers_share_forks_safely() {
    const N: usize = 5;
    const MEALS: u32 = 4;

    struct Table {
        monitor: Arc<Monitor>,
        changed: Condition,
        eating: std::sync::Mutex<[bool; N]>,
        meals: AtomicU32,
    }

    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let monitor = Arc::new(Monitor::new(&kernel, "table"));
        let table = Arc::new(Table {
            changed: Condition::new(&monitor, "forks"),
            monitor,
            eating: std::sync::Mutex::new([false; N]),
            meals: AtomicU32::new(0),
        });

        let mut diners = Vec::new();
        for i in 0..N {
            let t = table.clone();
            let id = kernel.create_task("philosopher", Priority(100), 0, move |k| {
                let left = (i + N - 1) % N;
                let right = (i + 1) % N;
                for _ in 0..MEALS {
                    assert!(t.monitor.enter());
                    loop {
                        let e = t.eating.lock().unwrap();
                        if !e[left] && !e[right] {
                            break;
                        }
                        drop(e);
                        t.changed.wait();
                    }
                    t.eating.lock().unwrap()[i] = true;
                    t.monitor.leave();

                    // Eat for a while, letting the others get at the table.
                    k.delay(10 * (i as u32 + 1));
                    {
                        let e = t.eating.lock().unwrap();
                        assert!(!e[left] && !e[right], "neighbor ate too");
                    }
                    t.meals.fetch_add(1, Ordering::SeqCst);

                    assert!(t.monitor.enter());
                    t.eating.lock().unwrap()[i] = false;
                    t.changed.broadcast();
                    t.monitor.leave();
                    k.yield_now();
                }
                0
            });
            assert!(kernel.attach(id));
            diners.push(id);
        }
        for &id in &diners {
            assert!(kernel.ready(id));
        }
        for id in diners {
            assert_eq!(kernel.join(id), Some(0));
        }
        assert_eq!(table.meals.load(Ordering::SeqCst), N as u32 * MEALS);
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn producer_blocks_on_a_full_queue_until_a_get() {
    const K: usize = 3;
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let q = Arc::new(MsgQueue::new(&kernel, "work", 4, K));
        for n in 0..K as u32 {
            assert!(q.try_put(&n.to_le_bytes()));
        }
        let p = q.clone();
        let producer = kernel.spawn("producer", Priority(200), move |_| {
            assert!(p.put(&99u32.to_le_bytes()));
            0
        });
        assert_eq!(kernel.info(producer).unwrap().state, TaskState::Waiting);
        assert_eq!(q.avail(), K);

        let mut rec = [0u8; 4];
        assert!(q.get(&mut rec));
        assert_eq!(u32::from_le_bytes(rec), 0);
        // The producer outranks us and has already refilled the slot.
        assert_eq!(q.avail(), K);
        assert!(kernel.info(producer).map_or(true, |i| i.state != TaskState::Waiting));

        let mut got = Vec::new();
        while q.try_get(&mut rec) {
            got.push(u32::from_le_bytes(rec));
        }
        assert_eq!(got, [1, 2, 99]);
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn semaphore_hands_units_to_waiters_first() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let sem = Arc::new(Semaphore::new(&kernel, "units", 0));
        let woken = Arc::new(AtomicU32::new(0));
        for _ in 0..2 {
            let (s, w) = (sem.clone(), woken.clone());
            kernel.spawn("waiter", Priority(200), move |_| {
                if s.wait() {
                    w.fetch_add(1, Ordering::SeqCst);
                }
                0
            });
        }
        sem.signal();
        assert_eq!(sem.value(), 0, "went straight to a waiter");
        assert_eq!(woken.load(Ordering::SeqCst), 1);
        sem.flush(false);
        assert_eq!(woken.load(Ordering::SeqCst), 1, "flushed, not signalled");
        sem.signal();
        assert_eq!(sem.value(), 1);
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn mutex_passes_to_the_next_waiter() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let m = Arc::new(Mutex::new(&kernel, "m"));
        assert!(m.enter());
        assert!(m.enter());

        let w = m.clone();
        let waiter = kernel.spawn("waiter", Priority(200), move |k| {
            assert!(!w.try_enter());
            assert!(!w.enter_timed(20));
            assert!(w.enter());
            assert_eq!(w.owner(), Some(k.current()));
            w.leave();
            0
        });
        // The waiter's timed attempt ran out while we slept.
        kernel.delay(50);
        assert_eq!(kernel.info(waiter).unwrap().state, TaskState::Waiting);
        m.leave();
        assert_eq!(m.owner(), Some(kernel.current()), "one leave to go");
        m.leave();
        assert_eq!(m.owner(), None, "taken and released by the waiter");
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn signal_wakes_one_and_broadcast_wakes_all() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let monitor = Arc::new(Monitor::new(&kernel, "m"));
        let cond = Arc::new(Condition::new(&monitor, "c"));
        let woken = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let (m, c, w) = (monitor.clone(), cond.clone(), woken.clone());
            kernel.spawn("waiter", Priority(200), move |k| {
                assert!(m.enter());
                assert!(c.wait());
                assert_eq!(m.owner(), Some(k.current()));
                w.fetch_add(1, Ordering::SeqCst);
                m.leave();
                0
            });
        }

        assert!(monitor.enter());
        assert!(cond.signal());
        monitor.leave();
        assert_eq!(woken.load(Ordering::SeqCst), 1);

        assert!(monitor.enter());
        assert!(cond.broadcast());
        assert!(!cond.signal(), "nobody left waiting");
        monitor.leave();
        assert_eq!(woken.load(Ordering::SeqCst), 3);
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn pipe_round_trips_and_transfers_short() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let pipe = Pipe::new(&kernel, "p", 8);
        assert_eq!(pipe.put(b"abcde"), 5);
        assert_eq!(pipe.avail(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(pipe.get(&mut buf), 5);
        assert_eq!(&buf, b"abcde");

        assert_eq!(pipe.put(b"0123456789"), 8, "only what fits");
        assert_eq!(pipe.try_put(b"x"), 0);
        assert_eq!(pipe.put_timed(b"x", 30), 0);
        let mut buf = [0u8; 16];
        assert_eq!(pipe.get(&mut buf), 8);
        assert_eq!(&buf[..8], b"01234567");
        assert_eq!(pipe.try_get(&mut buf), 0);
        assert_eq!(pipe.get(&mut []), 0);
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn pipe_reader_waits_for_a_writer() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let pipe = Arc::new(Pipe::new(&kernel, "p", 4));
        let p = pipe.clone();
        let reader = kernel.spawn("reader", Priority(200), move |_| {
            let mut buf = [0u8; 16];
            let n = p.get(&mut buf);
            assert_eq!(&buf[..n], b"hi");
            0
        });
        assert_eq!(kernel.info(reader).unwrap().state, TaskState::Waiting);
        assert_eq!(pipe.put(b"hi"), 2);
        assert!(kernel.info(reader).map_or(true, |i| i.state != TaskState::Waiting));

        let mut buf = [0u8; 1];
        let before = kernel.time();
        assert_eq!(pipe.get_timed(&mut buf, 35), 0);
        assert!(kernel.time() >= before + 35);
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn flushed_waiters_see_failure() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let q = Arc::new(WaitQueue::new(&kernel, "doomed"));
        let outcome = Arc::new(AtomicU32::new(0));
        let (waiter_q, o) = (q.clone(), outcome.clone());
        kernel.spawn("waiter", Priority(200), move |_| {
            let ok = waiter_q.wait();
            o.store(if ok { 1 } else { 2 }, Ordering::SeqCst);
            0
        });
        assert!(!q.is_empty());
        assert!(q.flush(false));
        assert_eq!(outcome.load(Ordering::SeqCst), 2);
        drop(q);
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn semaphore_waits_time_out_without_taking_a_unit() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let sem = Semaphore::new(&kernel, "empty", 0);
        assert!(!sem.try_wait());

        let before = kernel.time();
        assert!(!sem.wait_timed(30));
        assert!(kernel.time() >= before + 30);

        // A unit released after the timeout stays for the next taker.
        sem.signal();
        assert_eq!(sem.value(), 1);
        assert!(sem.try_wait());
        assert_eq!(sem.value(), 0);
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn message_queue_timed_calls_give_up_on_time() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let q = Arc::new(MsgQueue::new(&kernel, "timed", 2, 1));
        let mut rec = [0u8; 2];

        assert!(!q.try_get(&mut rec));
        let before = kernel.time();
        assert!(!q.get_timed(&mut rec, 40));
        assert!(kernel.time() >= before + 40);

        assert!(q.put_timed(b"hi", 40));
        assert!(!q.try_put(b"no"));
        let before = kernel.time();
        assert!(!q.put_timed(b"no", 40));
        assert!(kernel.time() >= before + 40);
        assert_eq!(q.avail(), 1);

        assert!(q.get_timed(&mut rec, 40));
        assert_eq!(&rec, b"hi");

        // A record that shows up within the budget is taken.
        let p = q.clone();
        kernel.spawn("late", Priority(50), move |k| {
            k.delay(20);
            assert!(p.try_put(b"ok"));
            0
        });
        assert!(q.get_timed(&mut rec, 200));
        assert_eq!(&rec, b"ok");
        0
    });
    assert_eq!(status, Ok(0));
}

#[cfg(target_pointer_width = "64")]
#[test]
#[should_panic(expected = "message queue wide: capacity exceeded")]
fn message_queue_with_more_slots_than_a_count_can_hold_is_fatal() {
    let _ = Kernel::boot(KernelConfig::default(), |kernel| {
        let _q = MsgQueue::new(&kernel, "wide", 0, u32::MAX as usize + 1);
        0
    });
}

#[test]
fn pipe_reader_beaten_to_the_data_waits_out_its_budget() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let pipe = Arc::new(Pipe::new(&kernel, "p", 8));
        let results = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut readers = Vec::new();
        for _ in 0..2 {
            let (p, r) = (pipe.clone(), results.clone());
            let id = kernel.create_task("reader", Priority(200), 0, move |k| {
                let start = k.time();
                let mut buf = [0u8; 16];
                let n = p.get_timed(&mut buf, 100);
                r.lock().unwrap().push((n, k.time() - start));
                0
            });
            assert!(kernel.attach(id));
            assert!(kernel.ready(id));
            readers.push(id);
        }

        // Both readers wake up for this; only one of them gets anything.
        kernel.delay(40);
        assert_eq!(pipe.put(b"hi"), 2);
        for id in readers {
            assert_eq!(kernel.join(id), Some(0));
        }

        let mut results = results.lock().unwrap().clone();
        results.sort();
        let (starved, waited) = results[0];
        assert_eq!(starved, 0);
        assert_eq!(results[1].0, 2);
        // The second wait only gets what was left of the first budget.
        assert!(
            (100..130).contains(&waited),
            "starved reader gave up after {waited} ms"
        );
        0
    });
    assert_eq!(status, Ok(0));
}
