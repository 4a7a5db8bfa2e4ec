// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synchronous message passing between tasks.
//!
//! Every task has a queue of tasks blocked sending to it. A message is copied
//! exactly once, directly from the sender's buffer into the receiver's, by
//! whichever of the two arrives second; the other one is parked until then.
//! Sending an empty message (or receiving into an empty buffer) is a pure
//! handshake.

use abi::{TaskId, TaskState, FOREVER};

use crate::kernel::POLL;
use crate::sched::Wait;
use crate::task::{Pending, Received};
use crate::time::Timeout;
use crate::umem::{MsgBuf, MsgBufMut};
use crate::Kernel;

impl Kernel {
    /// Sends `msg` to `to`, waiting for as long as it takes to be received.
    #[must_use]
    pub fn send(&self, to: TaskId, msg: &[u8]) -> bool {
        self.send_timed(to, msg, FOREVER)
    }

    /// Sends `msg` to `to` only if it is already waiting to receive it.
    #[must_use]
    pub fn try_send(&self, to: TaskId, msg: &[u8]) -> bool {
        self.send_timed(to, msg, POLL)
    }

    /// Sends `msg` to `to`, giving up after `ms` milliseconds.
    ///
    /// Fails if the receiver does not exist, has terminated, or exits while
    /// the sender is queued. A message larger than the receiver's buffer is
    /// fatal.
    #[must_use]
    pub fn send_timed(&self, to: TaskId, msg: &[u8], ms: u32) -> bool {
        let timeout = self.timeout(ms);
        self.block_on(|_, s| {
            let me = s.current;
            let Some(r) = s.resolve(to) else {
                return Ok(Wait::Done(false));
            };
            if r == me || s.task(r).state == TaskState::Terminated {
                return Ok(Wait::Done(false));
            }
            let my_id = s.id_of(me);
            let receiver = s.task(r);
            if receiver.state == TaskState::Receiving
                && receiver.expecting.map_or(true, |id| id == my_id)
            {
                let len = match &receiver.pending {
                    // Safety: the receiver is parked in `receive_timed`.
                    Pending::Receive(dest) => unsafe { dest.copy_from(msg)? },
                    _ => 0,
                };
                s.task_mut(r).received = Some(Received { from: my_id, len });
                s.ready(r, true);
                return Ok(Wait::Resched(true));
            }

            if timeout == Timeout::Poll {
                return Ok(Wait::Done(false));
            }
            let q = s.task(r).send_queue;
            s.block(me, TaskState::Sending);
            s.task_mut(me).pending = Pending::Send(MsgBuf::new(msg));
            kerncore::enqueue(s, me, q);
            s.arm_timer(me, timeout);
            Ok(Wait::Blocked)
        })
    }

    /// Receives a message into `buf`, waiting for as long as it takes. With
    /// `from` set, only that task's message is accepted.
    pub fn receive(
        &self,
        from: Option<TaskId>,
        buf: &mut [u8],
    ) -> Option<Received> {
        self.receive_timed(from, buf, FOREVER)
    }

    /// Receives a message only if a suitable sender is already queued.
    pub fn try_receive(
        &self,
        from: Option<TaskId>,
        buf: &mut [u8],
    ) -> Option<Received> {
        self.receive_timed(from, buf, POLL)
    }

    /// Receives a message into `buf`, giving up after `ms` milliseconds.
    ///
    /// Reports who sent the message and how many bytes were copied. Naming a
    /// sender that no longer exists fails at once.
    pub fn receive_timed(
        &self,
        from: Option<TaskId>,
        buf: &mut [u8],
        ms: u32,
    ) -> Option<Received> {
        let timeout = self.timeout(ms);
        let received = self.block_on(|_, s| {
            let me = s.current;
            let inbox = s.task(me).send_queue;
            s.task_mut(me).received = None;

            let sender = match from {
                Some(id) => match s.resolve(id) {
                    None => return Ok(Wait::Done(false)),
                    Some(t) => (s.task(t).state == TaskState::Sending
                        && s.task(t).wait.queue == Some(inbox))
                    .then_some(t),
                },
                None => kerncore::peek_last(&*s, inbox),
            };

            if let Some(t) = sender {
                let len = match &s.task(t).pending {
                    // Safety: the sender is parked in `send_timed`.
                    Pending::Send(src) => unsafe { src.copy_into(buf)? },
                    _ => 0,
                };
                let from = s.id_of(t);
                s.task_mut(me).received = Some(Received { from, len });
                s.ready(t, true);
                return Ok(Wait::Resched(true));
            }

            if timeout == Timeout::Poll {
                return Ok(Wait::Done(false));
            }
            s.block(me, TaskState::Receiving);
            let task = s.task_mut(me);
            task.expecting = from;
            task.pending = Pending::Receive(MsgBufMut::new(buf));
            s.arm_timer(me, timeout);
            Ok(Wait::Blocked)
        });

        let message = self.with_sched(|_, s| {
            let me = s.current_task_mut();
            me.expecting = None;
            me.received.take()
        });
        if received {
            message
        } else {
            None
        }
    }
}
