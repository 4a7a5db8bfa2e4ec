// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Creation, exit, deletion and the attach/join protocol.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use prio_kern::{
    Kernel, KernelConfig, Priority, Semaphore, TaskState, WaitTarget, FOREVER,
};

#[test]
fn child_status_is_joined_exactly_once() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let child = kernel.create_task("child", Priority::DEFAULT, 0, |_| 7);
        assert!(kernel.attach(child));
        assert!(kernel.ready(child));
        kernel.yield_now();

        let info = kernel.info(child).unwrap();
        assert_eq!(info.state, TaskState::Zombie);
        assert_eq!(info.waiting, Some(WaitTarget::Task(kernel.current())));

        assert_eq!(kernel.join(child), Some(7));
        assert_eq!(kernel.join(child), None);
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn joining_parent_is_woken_by_the_exit() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let child = kernel.create_task("child", Priority::DEFAULT, 0, |k| {
            k.delay(50);
            k.exit(-3)
        });
        assert!(kernel.attach(child));
        assert!(kernel.ready(child));
        assert_eq!(kernel.try_join(child), None, "still running");
        assert_eq!(kernel.join_timed(child, 10), None, "still sleeping");
        assert_eq!(kernel.join(child), Some(-3));
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn only_the_parent_may_join() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let child = kernel.spawn("child", Priority(50), |k| {
            k.pause();
            0
        });
        assert_eq!(kernel.try_join(child), None, "not attached");
        assert!(!kernel.detach(child));
        assert!(kernel.attach(child));
        assert!(!kernel.attach(child), "a task has one parent");
        assert!(!kernel.attach(kernel.current()), "nor is its own parent");
        assert!(kernel.detach(child));
        assert!(kernel.delete(child, 0));
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn detaching_releases_a_zombie() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let child = kernel.create_task("child", Priority(200), 0, |_| 1);
        assert!(kernel.attach(child));
        assert!(kernel.ready(child));
        assert_eq!(kernel.info(child).unwrap().state, TaskState::Zombie);
        assert!(kernel.detach(child));
        // Released, terminated and eventually reclaimed by the idle task.
        kernel.delay(10);
        assert!(kernel.info(child).is_none());
        assert!(!kernel.ready(child), "stale handle");
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn deleted_task_exits_with_the_given_status() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let gate = Arc::new(Semaphore::new(&kernel, "gate", 0));
        let cleaned = Arc::new(AtomicBool::new(false));

        let g = gate.clone();
        let c = cleaned.clone();
        let victim = kernel.spawn("victim", Priority(200), move |k| {
            let me = k.current();
            k.set_cleanup(me, move || c.store(true, Ordering::SeqCst));
            let _atomic = k.atomic();
            let _ = g.wait();
            unreachable!("woken only to be deleted");
        });
        assert_eq!(kernel.info(victim).unwrap().state, TaskState::Waiting);
        assert!(kernel.attach(victim));
        assert!(kernel.delete(victim, 5));
        assert_eq!(kernel.join(victim), Some(5));
        assert!(cleaned.load(Ordering::SeqCst));
        assert_eq!(gate.value(), 0);
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn deleting_an_exiting_task_leaves_its_exit_alone() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let gate = Arc::new(Semaphore::new(&kernel, "gate", 0));
        let g = gate.clone();
        let victim = kernel.spawn("victim", Priority(200), move |k| {
            let me = k.current();
            k.set_cleanup(me, move || {
                let _ = g.wait();
            });
            k.pause();
            0
        });
        assert!(kernel.attach(victim));
        assert!(kernel.delete(victim, 5));

        // Parked in its cleanup hook, on the way out with status 5.
        assert_eq!(kernel.info(victim).unwrap().state, TaskState::Waiting);
        assert!(kernel.delete(victim, 9));
        assert_eq!(kernel.info(victim).unwrap().state, TaskState::Waiting);

        gate.signal();
        assert_eq!(kernel.join(victim), Some(5));
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn unstarted_task_can_be_deleted() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let never = kernel.create_task("never", Priority(200), 0, |_| {
            unreachable!("deleted before it ran")
        });
        assert!(kernel.attach(never));
        assert!(kernel.delete(never, 9));
        assert_eq!(kernel.join(never), Some(9));
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn protected_tasks_are_off_limits() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let main = kernel.current();
        assert!(kernel.info(main).unwrap().protected);
        let done = Arc::new(Semaphore::new(&kernel, "done", 0));
        let d = done.clone();
        kernel.spawn("meddler", Priority(200), move |k| {
            assert!(!k.suspend(main));
            assert!(!k.delete(main, 1));
            assert!(!k.set_priority(main, Priority(1)));
            assert!(!k.protect(k.current()));
            d.signal();
            0
        });
        assert!(done.try_wait());
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn exiting_parent_releases_its_zombies() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        let done = Arc::new(Semaphore::new(&kernel, "done", 0));
        let d = done.clone();
        let parent = kernel.spawn("parent", Priority(150), move |k| {
            let child = k.create_task("child", Priority(200), 0, |_| 2);
            assert!(k.attach(child));
            assert!(k.ready(child));
            assert_eq!(k.info(child).unwrap().state, TaskState::Zombie);
            d.signal();
            0
        });
        assert!(done.wait());
        // Both the parent and its zombie child go away.
        kernel.delay(10);
        assert!(kernel.info(parent).is_none());
        assert_eq!(kernel.tasks().len(), 2, "only main and idle remain");
        0
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn main_exit_status_is_returned_from_boot() {
    let status = Kernel::boot(KernelConfig::default(), |kernel| {
        kernel.spawn("bystander", Priority(50), |k| {
            k.delay(FOREVER);
            0
        });
        kernel.exit(42)
    });
    assert_eq!(status, Ok(42));
}
