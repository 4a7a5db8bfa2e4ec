// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Generic kernel algorithms.
//!
//! This crate holds the wait-list bookkeeping shared by the scheduler and every
//! synchronization primitive, written against the [`Links`] trait rather than
//! the kernel's concrete task table. That keeps it free of kernel state (and
//! of `unsafe`) and lets it be tested on the host against a plain vector.
//!
//! Two kinds of list are maintained:
//!
//! - **Task queues.** Ordered ascending by priority from head to tail. A new
//!   member is inserted in front of the first member whose priority is not
//!   lower than its own, so among equal priorities the member that has been
//!   waiting longest sits closest to the tail. The tail is always the member
//!   to serve next.
//!
//! - **The time queue.** Ordered by wake-up time, delta encoded: each member's
//!   `ticks` counts the ticks between the previous member's wake-up and its
//!   own. Only the head is ever decremented by the clock.
//!
//! Every member index is an index into the task table; every queue index is an
//! index into whatever queue table the implementor keeps. All operations are
//! linear in the length of the list they touch.

// Allow std-y things to be used in test. Note that this attribute is a bit of a
// trap for the programmer, because rust-analyzer by default seems to build
// things with test set. This means it's easy to introduce code incompatible
// with no_std without your editor hassling you about it. Beware.
#![cfg_attr(not(test), no_std)]
#![forbid(clippy::wildcard_imports)]

/// Membership of one task in (at most) one task queue.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct WaitLink {
    /// Queue this task currently sits in, if any.
    pub queue: Option<usize>,
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

/// Membership of one task in the time queue.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TimeLink {
    pub queued: bool,
    pub prev: Option<usize>,
    pub next: Option<usize>,
    /// Ticks relative to the previous member (absolute for the head).
    pub ticks: u32,
}

/// Both ends of a list.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ListEnds {
    pub head: Option<usize>,
    pub tail: Option<usize>,
}

impl ListEnds {
    pub const EMPTY: Self = Self {
        head: None,
        tail: None,
    };

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// Access to the link fields the list algorithms need.
///
/// Implementations must return the same storage from the `_ref` and `_mut`
/// flavors of each accessor, and must not move entries around while a task is
/// linked into any list.
pub trait Links {
    /// Scheduling priority of task `t`. Larger numbers are more urgent.
    fn priority(&self, t: usize) -> u32;

    fn wait_link(&self, t: usize) -> &WaitLink;
    fn wait_link_mut(&mut self, t: usize) -> &mut WaitLink;

    fn time_link(&self, t: usize) -> &TimeLink;
    fn time_link_mut(&mut self, t: usize) -> &mut TimeLink;

    /// Ends of task queue `q`.
    fn queue_ends(&self, q: usize) -> &ListEnds;
    fn queue_ends_mut(&mut self, q: usize) -> &mut ListEnds;

    /// Ends of the time queue.
    fn time_ends(&self) -> &ListEnds;
    fn time_ends_mut(&mut self) -> &mut ListEnds;
}

/// Inserts task `t` into queue `q` according to the ordering rule.
///
/// `t` must not currently be in a task queue.
pub fn enqueue<L: Links + ?Sized>(links: &mut L, t: usize, q: usize) {
    debug_assert!(links.wait_link(t).queue.is_none());

    let prio = links.priority(t);
    let mut cursor = links.queue_ends(q).head;
    while let Some(c) = cursor {
        if prio <= links.priority(c) {
            break;
        }
        cursor = links.wait_link(c).next;
    }

    match cursor {
        Some(before) => {
            let prev = links.wait_link(before).prev;
            match prev {
                Some(p) => links.wait_link_mut(p).next = Some(t),
                None => links.queue_ends_mut(q).head = Some(t),
            }
            links.wait_link_mut(before).prev = Some(t);
            *links.wait_link_mut(t) = WaitLink {
                queue: Some(q),
                prev,
                next: Some(before),
            };
        }
        None => {
            let tail = links.queue_ends(q).tail;
            match tail {
                Some(last) => links.wait_link_mut(last).next = Some(t),
                None => links.queue_ends_mut(q).head = Some(t),
            }
            links.queue_ends_mut(q).tail = Some(t);
            *links.wait_link_mut(t) = WaitLink {
                queue: Some(q),
                prev: tail,
                next: None,
            };
        }
    }
}

/// Removes task `t` from whatever task queue it occupies. Does nothing if it
/// isn't in one.
pub fn dequeue<L: Links + ?Sized>(links: &mut L, t: usize) {
    let WaitLink { queue, prev, next } = *links.wait_link(t);
    let Some(q) = queue else {
        return;
    };

    match prev {
        Some(p) => links.wait_link_mut(p).next = next,
        None => links.queue_ends_mut(q).head = next,
    }
    match next {
        Some(n) => links.wait_link_mut(n).prev = prev,
        None => links.queue_ends_mut(q).tail = prev,
    }
    *links.wait_link_mut(t) = WaitLink::default();
}

/// Returns the member of `q` that should be served next, without removing it.
pub fn peek_last<L: Links + ?Sized>(links: &L, q: usize) -> Option<usize> {
    links.queue_ends(q).tail
}

/// Removes and returns the member of `q` that should be served next.
pub fn get_last<L: Links + ?Sized>(links: &mut L, q: usize) -> Option<usize> {
    let t = links.queue_ends(q).tail?;
    dequeue(links, t);
    Some(t)
}

/// Repositions `t` within its queue after its priority has changed. Does
/// nothing if `t` isn't queued.
pub fn requeue<L: Links + ?Sized>(links: &mut L, t: usize) {
    if let Some(q) = links.wait_link(t).queue {
        dequeue(links, t);
        enqueue(links, t, q);
    }
}

/// Walks queue `q` from head to tail.
pub fn iter<L: Links + ?Sized>(
    links: &L,
    q: usize,
) -> impl Iterator<Item = usize> + '_ {
    let mut cursor = links.queue_ends(q).head;
    core::iter::from_fn(move || {
        let t = cursor?;
        cursor = links.wait_link(t).next;
        Some(t)
    })
}

/// Inserts `t` into the time queue so that it expires `ticks` ticks after the
/// current head's reference point.
///
/// `t` must not currently be in the time queue.
pub fn enqueue_time<L: Links + ?Sized>(links: &mut L, t: usize, ticks: u32) {
    debug_assert!(!links.time_link(t).queued);

    let mut remaining = ticks;
    let mut cursor = links.time_ends().head;
    while let Some(c) = cursor {
        let delta = links.time_link(c).ticks;
        if remaining <= delta {
            break;
        }
        remaining -= delta;
        cursor = links.time_link(c).next;
    }

    match cursor {
        Some(before) => {
            let prev = links.time_link(before).prev;
            match prev {
                Some(p) => links.time_link_mut(p).next = Some(t),
                None => links.time_ends_mut().head = Some(t),
            }
            let b = links.time_link_mut(before);
            b.prev = Some(t);
            b.ticks -= remaining;
            *links.time_link_mut(t) = TimeLink {
                queued: true,
                prev,
                next: Some(before),
                ticks: remaining,
            };
        }
        None => {
            let tail = links.time_ends().tail;
            match tail {
                Some(last) => links.time_link_mut(last).next = Some(t),
                None => links.time_ends_mut().head = Some(t),
            }
            links.time_ends_mut().tail = Some(t);
            *links.time_link_mut(t) = TimeLink {
                queued: true,
                prev: tail,
                next: None,
                ticks: remaining,
            };
        }
    }
}

/// Removes `t` from the time queue, handing its delta on to its successor. Does
/// nothing if `t` isn't in the time queue.
pub fn dequeue_time<L: Links + ?Sized>(links: &mut L, t: usize) {
    let TimeLink {
        queued,
        prev,
        next,
        ticks,
    } = *links.time_link(t);
    if !queued {
        return;
    }

    match prev {
        Some(p) => links.time_link_mut(p).next = next,
        None => links.time_ends_mut().head = next,
    }
    match next {
        Some(n) => {
            let n = links.time_link_mut(n);
            n.ticks += ticks;
            n.prev = prev;
        }
        None => links.time_ends_mut().tail = prev,
    }
    *links.time_link_mut(t) = TimeLink::default();
}

/// Returns the first member of the time queue to expire.
pub fn peek_first_time<L: Links + ?Sized>(links: &L) -> Option<usize> {
    links.time_ends().head
}

/// Removes and returns the first member of the time queue to expire.
pub fn get_first_time<L: Links + ?Sized>(links: &mut L) -> Option<usize> {
    let t = links.time_ends().head?;
    dequeue_time(links, t);
    Some(t)
}

/// Absolute number of ticks until `t` expires, or `None` if it isn't in the
/// time queue.
pub fn remaining_ticks<L: Links + ?Sized>(links: &L, t: usize) -> Option<u32> {
    if !links.time_link(t).queued {
        return None;
    }
    let mut total = 0u32;
    let mut cursor = links.time_ends().head;
    while let Some(c) = cursor {
        total = total.saturating_add(links.time_link(c).ticks);
        if c == t {
            return Some(total);
        }
        cursor = links.time_link(c).next;
    }
    None
}

/// Advances the time queue by one clock tick.
///
/// Every member at the head whose delta has already reached zero is removed
/// and passed to `expired`, in order; then the delta of the new head (if any)
/// is decremented. A member inserted with `n` ticks is therefore released by
/// the `n + 1`th call, which guarantees at least `n` whole tick periods have
/// elapsed no matter where in a period it was inserted.
pub fn tick<L: Links + ?Sized>(links: &mut L, mut expired: impl FnMut(&mut L, usize)) {
    while let Some(t) = peek_first_time(links) {
        if links.time_link(t).ticks != 0 {
            links.time_link_mut(t).ticks -= 1;
            return;
        }
        dequeue_time(links, t);
        expired(links, t);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Node {
        priority: u32,
        wait: WaitLink,
        time: TimeLink,
    }

    #[derive(Default)]
    struct Table {
        nodes: Vec<Node>,
        queues: Vec<ListEnds>,
        time: ListEnds,
    }

    impl Table {
        fn with_priorities(prios: &[u32]) -> Self {
            Table {
                nodes: prios
                    .iter()
                    .map(|&priority| Node {
                        priority,
                        ..Node::default()
                    })
                    .collect(),
                queues: vec![ListEnds::EMPTY; 2],
                time: ListEnds::EMPTY,
            }
        }

        fn queue(&self, q: usize) -> Vec<usize> {
            iter(self, q).collect()
        }

        fn time_order(&self) -> Vec<(usize, u32)> {
            let mut out = vec![];
            let mut cursor = self.time.head;
            while let Some(c) = cursor {
                out.push((c, self.nodes[c].time.ticks));
                cursor = self.nodes[c].time.next;
            }
            out
        }
    }

    impl Links for Table {
        fn priority(&self, t: usize) -> u32 {
            self.nodes[t].priority
        }
        fn wait_link(&self, t: usize) -> &WaitLink {
            &self.nodes[t].wait
        }
        fn wait_link_mut(&mut self, t: usize) -> &mut WaitLink {
            &mut self.nodes[t].wait
        }
        fn time_link(&self, t: usize) -> &TimeLink {
            &self.nodes[t].time
        }
        fn time_link_mut(&mut self, t: usize) -> &mut TimeLink {
            &mut self.nodes[t].time
        }
        fn queue_ends(&self, q: usize) -> &ListEnds {
            &self.queues[q]
        }
        fn queue_ends_mut(&mut self, q: usize) -> &mut ListEnds {
            &mut self.queues[q]
        }
        fn time_ends(&self) -> &ListEnds {
            &self.time
        }
        fn time_ends_mut(&mut self) -> &mut ListEnds {
            &mut self.time
        }
    }

    #[test]
    fn queue_orders_by_priority_then_arrival() {
        let mut t = Table::with_priorities(&[100, 200, 100, 50, 200]);
        for i in 0..5 {
            enqueue(&mut t, i, 0);
        }
        // Lowest priority at the head; among equals the later arrival is
        // closer to the head.
        assert_eq!(t.queue(0), vec![3, 2, 0, 4, 1]);
        assert_eq!(peek_last(&t, 0), Some(1));

        let order: Vec<_> =
            core::iter::from_fn(|| get_last(&mut t, 0)).collect();
        assert_eq!(order, vec![1, 4, 0, 2, 3]);
        assert!(t.queues[0].is_empty());
    }

    #[test]
    fn dequeue_from_middle_and_ends() {
        let mut t = Table::with_priorities(&[1, 2, 3, 4]);
        for i in 0..4 {
            enqueue(&mut t, i, 1);
        }
        dequeue(&mut t, 2);
        assert_eq!(t.queue(1), vec![0, 1, 3]);
        dequeue(&mut t, 0);
        assert_eq!(t.queue(1), vec![1, 3]);
        dequeue(&mut t, 3);
        assert_eq!(t.queue(1), vec![1]);
        assert_eq!(t.queues[1].tail, Some(1));
        // Not queued: no-op.
        dequeue(&mut t, 3);
        assert_eq!(t.nodes[3].wait, WaitLink::default());
    }

    #[test]
    fn requeue_follows_priority_change() {
        let mut t = Table::with_priorities(&[10, 20, 30]);
        for i in 0..3 {
            enqueue(&mut t, i, 0);
        }
        t.nodes[0].priority = 40;
        requeue(&mut t, 0);
        assert_eq!(peek_last(&t, 0), Some(0));
        assert_eq!(t.queue(0), vec![1, 2, 0]);
    }

    #[test]
    fn time_queue_is_delta_encoded() {
        let mut t = Table::with_priorities(&[0; 4]);
        enqueue_time(&mut t, 0, 5);
        enqueue_time(&mut t, 1, 2);
        enqueue_time(&mut t, 2, 9);
        enqueue_time(&mut t, 3, 5);
        assert_eq!(t.time_order(), vec![(1, 2), (3, 3), (0, 0), (2, 4)]);
        assert_eq!(remaining_ticks(&t, 2), Some(9));

        dequeue_time(&mut t, 3);
        assert_eq!(t.time_order(), vec![(1, 2), (0, 3), (2, 4)]);
        assert_eq!(remaining_ticks(&t, 0), Some(5));
        assert_eq!(remaining_ticks(&t, 3), None);
    }

    #[test]
    fn tick_releases_after_full_periods() {
        let mut t = Table::with_priorities(&[0; 3]);
        enqueue_time(&mut t, 0, 1);
        enqueue_time(&mut t, 1, 1);
        enqueue_time(&mut t, 2, 3);

        let mut woken = vec![];
        tick(&mut t, |_, i| woken.push(i));
        assert!(woken.is_empty(), "a one-tick timer must survive one tick");
        tick(&mut t, |_, i| woken.push(i));
        assert_eq!(woken, vec![1, 0]);
        tick(&mut t, |_, i| woken.push(i));
        tick(&mut t, |_, i| woken.push(i));
        assert_eq!(woken, vec![1, 0, 2]);
        assert!(t.time.is_empty());
    }
}
