//! Broker engine
//!
//! This module orchestrates the queue registry, subscription manager, id
//! generator, and persistence store into the five operations the transport
//! invokes: `create_queue`, `add`, `subscribe`, `acknowledge`, `get_state`.
//!
//! Concurrency notes:
//! - The engine takes `&self` and is shared as `Arc<Broker>` across
//!   connection tasks. There is no global lock: each queue has its own
//!   mutex (guarding enqueue/dequeue and the matching persistence write)
//!   and each consumer's outstanding slot has its own, so traffic on
//!   different queues proceeds independently.
//! - Lock order is always queue, then consumers map (read), then consumer.
//!   No lock is held across an `.await`; the only sends issued under a lock
//!   go to unbounded channels and cannot block.
//! - Delivery is push-based: `add`, `subscribe`, `acknowledge`, and
//!   `handle_disconnect` each end with a dispatch sweep that hands queue
//!   heads to idle connected consumers. Consumers never poll.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::idgen::IdGenerator;
use crate::broker::message::Message;
use crate::broker::queue::Queue;
use crate::broker::registry::{QueueRegistry, SharedQueue};
use crate::broker::subscription::{ConsumerSnapshot, SubscriptionManager};
use crate::persistence::sled_store::{Persistence, QueueRecord};
use crate::utils::error::BrokerError;

/// Engine policy knobs, derived from `BrokerSettings` at startup.
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// Buffer size for queues created implicitly by `add`.
    pub default_buffer_size: usize,
    /// Whether `add` to an undeclared queue creates it (the reference
    /// behavior) or fails with `QueueNotFound`.
    pub auto_create_queues: bool,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            default_buffer_size: 64,
            auto_create_queues: true,
        }
    }
}

/// Descriptor returned by `create_queue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    pub buffer_size: usize,
}

/// Read-only snapshot served by `get_state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerState {
    pub queues: Vec<QueueState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueState {
    pub name: String,
    pub buffer_size: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub consumers: Vec<ConsumerSnapshot>,
}

/// The broker engine. One explicitly constructed instance per process (or
/// per test), with a defined startup (`recover`) and shutdown (`shutdown`)
/// lifecycle.
#[derive(Debug)]
pub struct Broker {
    registry: RwLock<QueueRegistry>,
    subscriptions: SubscriptionManager,
    ids: IdGenerator,
    persistence: Persistence,
    options: BrokerOptions,
}

impl Broker {
    /// Builds an engine from the durable snapshot. Runs `load()` once,
    /// rebuilding every queue and its pre-crash pending order, and seeds
    /// the id generator above the highest recovered id. Must complete
    /// before the transport accepts connections; failure is fatal.
    pub fn recover(persistence: Persistence, options: BrokerOptions) -> Result<Self, BrokerError> {
        let recovered = persistence.load()?;

        let mut registry = QueueRegistry::new();
        for record in &recovered.queues {
            registry.get_or_create(&record.name, record.buffer_size);
        }

        let mut restored = 0usize;
        for message in recovered.messages {
            let (queue, created) =
                registry.get_or_create(&message.queue, options.default_buffer_size);
            if created {
                // A message without a stored definition; re-save one so the
                // next restart sees a consistent snapshot.
                persistence.save_queue(&QueueRecord {
                    name: message.queue.clone(),
                    buffer_size: options.default_buffer_size,
                })?;
            }
            queue.lock().unwrap().restore(message);
            restored += 1;
        }

        info!(
            "recovered {} queue(s) and {} unacknowledged message(s)",
            registry.len(),
            restored
        );

        Ok(Self {
            registry: RwLock::new(registry),
            subscriptions: SubscriptionManager::new(),
            ids: IdGenerator::starting_after(recovered.highest_id),
            persistence,
            options,
        })
    }

    pub fn default_buffer_size(&self) -> usize {
        self.options.default_buffer_size
    }

    /// Explicitly declares a queue. Idempotent when called again with the
    /// same buffer size.
    pub fn create_queue(&self, name: &str, buffer_size: usize) -> Result<QueueInfo, BrokerError> {
        let mut registry = self.registry.write().unwrap();
        let (_, created) = registry.create(name, buffer_size)?;
        if created {
            if let Err(e) = self.persistence.save_queue(&QueueRecord {
                name: name.to_string(),
                buffer_size,
            }) {
                registry.remove(name);
                return Err(e);
            }
            info!("queue '{name}' created with buffer size {buffer_size}");
        }
        Ok(QueueInfo {
            name: name.to_string(),
            buffer_size,
        })
    }

    /// Accepts a message onto `queue_name`, returning its id. The id is
    /// not returned (and the producer must not be acked) until the
    /// durable append has committed.
    pub fn add(&self, queue_name: &str, payload: String) -> Result<u64, BrokerError> {
        let queue = self.resolve_queue(queue_name)?;
        let mut q = queue.lock().unwrap();

        if q.is_full() {
            return Err(BrokerError::QueueFull(queue_name.to_string()));
        }

        let message = Message {
            id: self.ids.next(),
            queue: queue_name.to_string(),
            payload,
            enqueued_at: chrono::Utc::now().timestamp_millis(),
        };
        let id = message.id;

        self.persistence.append_message(&message)?;
        q.enqueue(message)?;
        debug!("message {id} enqueued on '{queue_name}'");

        self.dispatch(&mut q);
        Ok(id)
    }

    /// Registers a consumer on `queue_name` and immediately attempts
    /// delivery of the queue head. The queue must already exist;
    /// subscribing never creates one.
    pub fn subscribe(
        &self,
        queue_name: &str,
        consumer_id: Option<String>,
        sender: UnboundedSender<WsMessage>,
    ) -> Result<String, BrokerError> {
        let queue = self
            .registry
            .read()
            .unwrap()
            .get(queue_name)
            .ok_or_else(|| BrokerError::QueueNotFound(queue_name.to_string()))?;

        let id = self.subscriptions.register(queue_name, consumer_id, sender)?;
        info!("consumer '{id}' subscribed to '{queue_name}'");

        let mut q = queue.lock().unwrap();
        self.dispatch(&mut q);
        Ok(id)
    }

    /// Clears the consumer's outstanding slot, prunes the acknowledged
    /// message from durable storage, and pushes the next pending message
    /// (if any) to that consumer.
    ///
    /// Acks that do not match an outstanding delivery (unknown consumer,
    /// wrong queue, or an empty slot after a disconnect/reconnect race)
    /// are deliberate no-ops, logged and swallowed.
    pub fn acknowledge(&self, queue_name: &str, consumer_id: &str) -> Result<(), BrokerError> {
        let Some(handle) = self.subscriptions.handle(consumer_id) else {
            debug!("ack from unknown consumer '{consumer_id}' ignored");
            return Ok(());
        };
        if handle.queue != queue_name {
            debug!("ack from '{consumer_id}' names '{queue_name}' but it is bound to '{}'; ignored", handle.queue);
            return Ok(());
        }
        let Some(queue) = self.registry.read().unwrap().get(queue_name) else {
            debug!("ack for unknown queue '{queue_name}' ignored");
            return Ok(());
        };

        let mut q = queue.lock().unwrap();
        let mut state = handle.state.lock().unwrap();

        let Some(message) = state.outstanding.take() else {
            debug!("ack from '{consumer_id}' with no outstanding message ignored");
            return Ok(());
        };

        if let Err(e) = self.persistence.remove_message(message.id) {
            // A failed durable prune aborts the ack; the slot is restored
            // so the at-least-once invariant holds.
            state.outstanding = Some(message);
            return Err(e);
        }
        debug!(
            "message {} on '{queue_name}' acknowledged by '{consumer_id}'",
            message.id
        );
        q.settle();

        // The freed consumer gets the next message right away.
        if let Some(next) = q.dequeue_next() {
            let id = next.id;
            match state.deliver(next) {
                Ok(()) => debug!("message {id} delivered to '{consumer_id}'"),
                Err(returned) => {
                    warn!("redelivery to '{consumer_id}' failed; returning message to queue head");
                    q.requeue_front(returned);
                }
            }
        }
        drop(state);

        // Anything still at the head may suit another idle consumer.
        self.dispatch(&mut q);
        Ok(())
    }

    /// Point-in-time snapshot of queue names, depths, and consumers.
    pub fn get_state(&self) -> BrokerState {
        let registry = self.registry.read().unwrap();
        let mut queues: Vec<QueueState> = registry
            .iter()
            .map(|(name, queue)| {
                let q = queue.lock().unwrap();
                QueueState {
                    name: name.clone(),
                    buffer_size: q.buffer_size(),
                    pending: q.pending_len(),
                    in_flight: q.in_flight(),
                    consumers: self.subscriptions.snapshot_for(name),
                }
            })
            .collect();
        queues.sort_by(|a, b| a.name.cmp(&b.name));
        BrokerState { queues }
    }

    /// Transport notification of connection loss. The consumer's slot is
    /// released and its outstanding message, if any, returns to the head of
    /// the queue for redelivery, either to another idle consumer now or to
    /// this consumer id when it subscribes again.
    pub fn handle_disconnect(&self, consumer_id: &str) {
        let Some(handle) = self.subscriptions.handle(consumer_id) else {
            return;
        };
        let queue = self.registry.read().unwrap().get(&handle.queue);

        match queue {
            Some(queue) => {
                let mut q = queue.lock().unwrap();
                {
                    let mut state = handle.state.lock().unwrap();
                    state.connected = false;
                    if let Some(message) = state.outstanding.take() {
                        debug!(
                            "returning undelivered message {} to the head of '{}'",
                            message.id, handle.queue
                        );
                        q.requeue_front(message);
                    }
                }
                info!("consumer '{consumer_id}' disconnected from '{}'", handle.queue);
                self.dispatch(&mut q);
            }
            None => {
                let mut state = handle.state.lock().unwrap();
                state.connected = false;
                state.outstanding = None;
            }
        }
    }

    /// Final flush of the durable store. Pending state stays on disk for
    /// the next `recover`.
    pub fn shutdown(&self) {
        if let Err(e) = self.persistence.flush() {
            warn!("final persistence flush failed: {e}");
        }
        info!("broker shut down");
    }

    /// Looks the queue up, applying the auto-create policy for producers.
    fn resolve_queue(&self, name: &str) -> Result<SharedQueue, BrokerError> {
        if let Some(queue) = self.registry.read().unwrap().get(name) {
            return Ok(queue);
        }
        if !self.options.auto_create_queues {
            return Err(BrokerError::QueueNotFound(name.to_string()));
        }

        let mut registry = self.registry.write().unwrap();
        let (queue, created) = registry.get_or_create(name, self.options.default_buffer_size);
        if created {
            if let Err(e) = self.persistence.save_queue(&QueueRecord {
                name: name.to_string(),
                buffer_size: self.options.default_buffer_size,
            }) {
                registry.remove(name);
                return Err(e);
            }
            info!(
                "queue '{name}' auto-created on add with default buffer size {}",
                self.options.default_buffer_size
            );
        }
        Ok(queue)
    }

    /// Pushes queue heads to idle connected consumers. Called with the
    /// queue lock held after any transition that can make delivery
    /// possible. A failed send marks that consumer disconnected, rolls the
    /// message back to the head, and tries the next candidate.
    fn dispatch(&self, q: &mut Queue) {
        if q.peek_head().is_none() {
            return;
        }
        for (consumer_id, handle) in self.subscriptions.candidates_for(q.name()) {
            if q.peek_head().is_none() {
                break;
            }
            let mut state = handle.state.lock().unwrap();
            if !state.connected || state.outstanding.is_some() {
                continue;
            }
            let Some(message) = q.dequeue_next() else {
                break;
            };
            let id = message.id;
            match state.deliver(message) {
                Ok(()) => debug!("message {id} delivered to '{consumer_id}'"),
                Err(returned) => {
                    warn!(
                        "delivery of message {id} to '{consumer_id}' failed; consumer marked disconnected"
                    );
                    q.requeue_front(returned);
                }
            }
        }
    }
}
