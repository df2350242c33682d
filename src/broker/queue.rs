use std::collections::VecDeque;

use crate::broker::message::Message;
use crate::utils::error::BrokerError;

/// A bounded FIFO of pending messages for one named topic.
///
/// `buffer_size` bounds *unacknowledged* messages: the pending buffer plus
/// the in-flight count (delivered but not yet acknowledged). Delivering a
/// message therefore does not free capacity; only an acknowledgment does,
/// so producers see `QueueFull` until consumers keep up. Old messages are
/// never evicted to make room.
#[derive(Debug)]
pub struct Queue {
    name: String,
    buffer_size: usize,
    pending: VecDeque<Message>,
    in_flight: usize,
}

impl Queue {
    pub fn new(name: impl Into<String>, buffer_size: usize) -> Self {
        Self {
            name: name.into(),
            buffer_size,
            pending: VecDeque::new(),
            in_flight: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Unacknowledged messages held by this queue.
    pub fn depth(&self) -> usize {
        self.pending.len() + self.in_flight
    }

    pub fn is_full(&self) -> bool {
        self.depth() >= self.buffer_size
    }

    /// Buffers a message at the tail. Fails fast with `QueueFull` when the
    /// capacity invariant would be violated; the caller decides whether to
    /// retry, drop, or surface the error.
    pub fn enqueue(&mut self, message: Message) -> Result<(), BrokerError> {
        if self.is_full() {
            return Err(BrokerError::QueueFull(self.name.clone()));
        }
        self.pending.push_back(message);
        Ok(())
    }

    /// Pops the head for delivery, moving it to the in-flight count.
    /// The message stays in durable storage until acknowledged.
    pub fn dequeue_next(&mut self) -> Option<Message> {
        let message = self.pending.pop_front()?;
        self.in_flight += 1;
        Some(message)
    }

    /// Rolls an undeliverable message back to the head, in order, so the
    /// next dispatch or a reconnecting consumer picks it up first.
    pub fn requeue_front(&mut self, message: Message) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.pending.push_front(message);
    }

    /// Settles one in-flight message after its acknowledgment.
    pub fn settle(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub fn peek_head(&self) -> Option<&Message> {
        self.pending.front()
    }

    /// Recovery path: rebuilds the pre-crash pending sequence. Recovered
    /// messages passed the capacity check when first accepted, so it is not
    /// re-applied here.
    pub fn restore(&mut self, message: Message) {
        self.pending.push_back(message);
    }
}
