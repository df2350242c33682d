use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::broker::queue::Queue;
use crate::utils::error::BrokerError;

/// A queue shared between connection tasks. The mutex is the queue's
/// serialization point: enqueue, dequeue, and the associated persistence
/// write all happen inside it, so producers targeting one queue are totally
/// ordered while distinct queues proceed independently.
pub type SharedQueue = Arc<Mutex<Queue>>;

/// Creates, looks up, and enumerates queues by name.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queues: HashMap<String, SharedQueue>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
        }
    }

    /// Explicit creation. Idempotent: asking for an existing queue with the
    /// same buffer size returns it unchanged (`created = false`); a
    /// conflicting buffer size is `QueueAlreadyExists`.
    pub fn create(
        &mut self,
        name: &str,
        buffer_size: usize,
    ) -> Result<(SharedQueue, bool), BrokerError> {
        if let Some(existing) = self.queues.get(name) {
            let same_size = existing.lock().unwrap().buffer_size() == buffer_size;
            return if same_size {
                Ok((existing.clone(), false))
            } else {
                Err(BrokerError::QueueAlreadyExists(name.to_string()))
            };
        }
        let queue = Arc::new(Mutex::new(Queue::new(name, buffer_size)));
        self.queues.insert(name.to_string(), queue.clone());
        Ok((queue, true))
    }

    /// Implicit creation used by `add` when a producer targets a queue that
    /// was never declared. A deliberate convenience policy (see the
    /// `auto_create_queues` setting), not an accident.
    pub fn get_or_create(&mut self, name: &str, default_buffer_size: usize) -> (SharedQueue, bool) {
        if let Some(queue) = self.queues.get(name) {
            return (queue.clone(), false);
        }
        let queue = Arc::new(Mutex::new(Queue::new(name, default_buffer_size)));
        self.queues.insert(name.to_string(), queue.clone());
        (queue, true)
    }

    pub fn get(&self, name: &str) -> Option<SharedQueue> {
        self.queues.get(name).cloned()
    }

    /// Drops a just-created entry whose durable definition failed to commit.
    pub fn remove(&mut self, name: &str) {
        self.queues.remove(name);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SharedQueue)> {
        self.queues.iter()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
