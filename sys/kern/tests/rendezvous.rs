// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synchronous message passing.

use std::sync::{Arc, Mutex};

use prio_kern::{Kernel, KernelConfig, Priority, Received, TaskState};

#[test]
fn send_to_a_waiting_receiver_completes_at_once() {
    let inbox = Arc::new(Mutex::new(Vec::new()));
    let seen = inbox.clone();
    let status = Kernel::boot(KernelConfig::default(), move |kernel| {
        let main = kernel.current();
        let s = seen.clone();
        let receiver = kernel.spawn("receiver", Priority(200), move |k| {
            let mut buf = [0u8; 16];
            let got = k.receive(None, &mut buf).unwrap();
            assert_eq!(got.from, main);
            s.lock().unwrap().extend_from_slice(&buf[..got.len]);
            0
        });
        assert_eq!(kernel.info(receiver).unwrap().state, TaskState::Receiving);
        assert!(kernel.send(receiver, b"hello"));
        // The receiver outranks us, so it has already consumed the message.
        assert_eq!(seen.lock().unwrap().as_slice(), b"hello");
        0
    });
    assert_eq!(status, Ok(0));
    assert_eq!(inbox.lock().unwrap().as_slice(), b"hello");
}

#[test]
fn sender_waits_for_the_receiver() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let main = kernel.current();
        let sender = kernel.spawn("sender", Priority(200), move |k| {
            assert!(k.send(main, b"ping"));
            assert!(!k.try_send(main, b"nobody listening"));
            0
        });
        assert_eq!(kernel.info(sender).unwrap().state, TaskState::Sending);

        let mut buf = [0u8; 8];
        let got = kernel.try_receive(Some(sender), &mut buf);
        assert_eq!(got, Some(Received { from: sender, len: 4 }));
        assert_eq!(&buf[..4], b"ping");
        assert_eq!(kernel.try_receive(None, &mut buf), None);
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn named_receive_skips_other_senders() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let main = kernel.current();
        let first = kernel.spawn("first", Priority(200), move |k| {
            let _ = k.send_timed(main, b"1", 100);
            0
        });
        let second = kernel.spawn("second", Priority(200), move |k| {
            let _ = k.send(main, b"2");
            0
        });

        let mut buf = [0u8; 1];
        let got = kernel.receive(Some(second), &mut buf).unwrap();
        assert_eq!((got.from, buf[0]), (second, b'2'));

        // The first sender gives up after its timeout.
        kernel.delay(200);
        assert!(kernel.info(first).is_none());
        assert_eq!(kernel.try_receive(None, &mut buf), None);
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn empty_message_is_a_handshake() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let main = kernel.current();
        kernel.spawn("knocker", Priority(200), move |k| {
            assert!(k.send(main, &[]));
            0
        });
        let got = kernel.receive(None, &mut [0u8; 4]).unwrap();
        assert_eq!(got.len, 0);
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn receive_times_out() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let before = kernel.time();
        assert_eq!(kernel.receive_timed(None, &mut [0u8; 4], 40), None);
        assert!(kernel.time() >= before + 40);
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn queued_senders_fail_when_the_receiver_exits() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let target = kernel.spawn("target", Priority(50), |k| {
            k.pause();
            0
        });
        let results = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let r = results.clone();
            kernel.spawn("sender", Priority(200), move |k| {
                let sent = k.send(target, b"x");
                r.lock().unwrap().push(sent);
                0
            });
        }
        assert!(kernel.delete(target, 0));
        kernel.delay(10);
        assert_eq!(results.lock().unwrap().as_slice(), [false, false]);
        assert!(!kernel.try_send(target, b"x"), "target is gone");
        0
    });
    assert_eq!(status, Ok(0));
}
