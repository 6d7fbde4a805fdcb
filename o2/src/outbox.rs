//! The pending-dispatch queue handlers append to instead of recursing
//! (§4.8, §3 invariant 6: "the poll loop runs on exactly one thread;
//! re-entry from a handler is forbidden").

use std::collections::VecDeque;

use o2_proto::Message;

/// Handed to every method handler in place of direct access to the `O2`
/// process handle. A handler that wants to send a follow-up message calls
/// [`Outbox::send`]; the poll loop drains the queue after the scheduler
/// sweep completes (§4.9 step 6), so no handler ever triggers dispatch
/// recursively.
pub struct Outbox<'a> {
    queue: &'a mut VecDeque<Message<'static>>,
}

impl<'a> Outbox<'a> {
    pub fn new(queue: &'a mut VecDeque<Message<'static>>) -> Self {
        Self { queue }
    }

    pub fn send(&mut self, msg: Message<'static>) {
        self.queue.push_back(msg);
    }
}
