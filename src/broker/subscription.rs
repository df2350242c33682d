use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::error;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::message::Message;
use crate::transport::message::ServerMessage;
use crate::utils::error::BrokerError;

pub type ConsumerId = String;

/// Mutable per-consumer state, guarded by its own mutex so the
/// outstanding-slot transition never blocks unrelated consumers.
#[derive(Debug)]
pub struct ConsumerState {
    pub outstanding: Option<Message>,
    pub sender: UnboundedSender<WsMessage>,
    pub connected: bool,
}

impl ConsumerState {
    /// Pushes `message` over the consumer's channel and marks it
    /// outstanding. On a dead channel the consumer is marked disconnected
    /// and the message is handed back so the caller can roll it back to the
    /// head of its queue, undelivered.
    pub fn deliver(&mut self, message: Message) -> Result<(), Message> {
        let frame = match serde_json::to_string(&ServerMessage::delivery(&message)) {
            Ok(json) => json,
            Err(e) => {
                error!("failed to serialize delivery frame: {e}");
                return Err(message);
            }
        };
        if self.sender.send(WsMessage::text(frame)).is_err() {
            self.connected = false;
            return Err(message);
        }
        self.outstanding = Some(message);
        Ok(())
    }

    pub fn phase(&self) -> ConsumerPhase {
        if !self.connected {
            ConsumerPhase::Disconnected
        } else if self.outstanding.is_some() {
            ConsumerPhase::AwaitingAck
        } else {
            ConsumerPhase::Idle
        }
    }
}

/// Where a consumer sits in its lifecycle: subscribed and ready for a
/// delivery, waiting on an ack, or gone (reclaimable by a re-subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerPhase {
    Idle,
    AwaitingAck,
    Disconnected,
}

/// One registered consumer: the queue it is bound to plus its lockable
/// state. The queue binding only changes under the manager's write lock
/// (on a re-subscribe after a disconnect).
#[derive(Debug, Clone)]
pub struct ConsumerHandle {
    pub queue: String,
    pub state: Arc<Mutex<ConsumerState>>,
}

/// Entry in a `get_state` snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerSnapshot {
    pub consumer_id: ConsumerId,
    pub state: ConsumerPhase,
}

/// Binds consumer identifiers to live delivery channels and to one queue
/// each, and tracks the single outstanding message per consumer.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    consumers: RwLock<HashMap<ConsumerId, ConsumerHandle>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            consumers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a consumer against `queue`. A missing id gets a generated
    /// one; an id still bound to a live channel is rejected so two
    /// connections can never race for one logical consumer's ack slot. A
    /// disconnected id is reclaimed, rebinding it to `queue`.
    pub fn register(
        &self,
        queue: &str,
        requested_id: Option<String>,
        sender: UnboundedSender<WsMessage>,
    ) -> Result<ConsumerId, BrokerError> {
        let mut consumers = self.consumers.write().unwrap();
        let id = requested_id.unwrap_or_else(|| format!("consumer-{}", Uuid::new_v4()));

        if let Some(handle) = consumers.get_mut(&id) {
            {
                let mut state = handle.state.lock().unwrap();
                if state.connected {
                    return Err(BrokerError::ConsumerAlreadyConnected(id));
                }
                state.connected = true;
                state.sender = sender;
            }
            handle.queue = queue.to_string();
        } else {
            consumers.insert(
                id.clone(),
                ConsumerHandle {
                    queue: queue.to_string(),
                    state: Arc::new(Mutex::new(ConsumerState {
                        outstanding: None,
                        sender,
                        connected: true,
                    })),
                },
            );
        }
        Ok(id)
    }

    pub fn handle(&self, consumer_id: &str) -> Option<ConsumerHandle> {
        self.consumers.read().unwrap().get(consumer_id).cloned()
    }

    /// Consumers bound to `queue`, for a dispatch sweep. The caller still
    /// has to lock each one and re-check that it is connected and idle.
    pub fn candidates_for(&self, queue: &str) -> Vec<(ConsumerId, ConsumerHandle)> {
        self.consumers
            .read()
            .unwrap()
            .iter()
            .filter(|(_, handle)| handle.queue == queue)
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect()
    }

    pub fn snapshot_for(&self, queue: &str) -> Vec<ConsumerSnapshot> {
        let mut snapshot: Vec<ConsumerSnapshot> = self
            .consumers
            .read()
            .unwrap()
            .iter()
            .filter(|(_, handle)| handle.queue == queue)
            .map(|(id, handle)| ConsumerSnapshot {
                consumer_id: id.clone(),
                state: handle.state.lock().unwrap().phase(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.consumer_id.cmp(&b.consumer_id));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sender() -> UnboundedSender<WsMessage> {
        mpsc::unbounded_channel().0
    }

    #[test]
    fn register_generates_consumer_ids() {
        let manager = SubscriptionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = manager.register("orders", None, tx).unwrap();
        assert!(id.starts_with("consumer-"));
        assert_eq!(manager.handle(&id).unwrap().queue, "orders");
    }

    #[test]
    fn live_consumer_id_cannot_be_taken_twice() {
        let manager = SubscriptionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        manager
            .register("orders", Some("c1".into()), tx)
            .unwrap();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        assert!(matches!(
            manager.register("orders", Some("c1".into()), tx2),
            Err(BrokerError::ConsumerAlreadyConnected(_))
        ));
    }

    #[test]
    fn disconnected_id_is_reclaimed_and_rebound() {
        let manager = SubscriptionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = manager
            .register("orders", Some("c1".into()), tx)
            .unwrap();
        manager
            .handle(&id)
            .unwrap()
            .state
            .lock()
            .unwrap()
            .connected = false;

        let (tx2, _rx2) = mpsc::unbounded_channel();
        let reclaimed = manager
            .register("audit", Some("c1".into()), tx2)
            .unwrap();
        assert_eq!(reclaimed, "c1");
        let handle = manager.handle("c1").unwrap();
        assert_eq!(handle.queue, "audit");
        assert!(handle.state.lock().unwrap().connected);
    }

    #[test]
    fn deliver_on_dead_channel_rolls_back() {
        let manager = SubscriptionManager::new();
        let id = manager
            .register("orders", Some("c1".into()), sender())
            .unwrap();
        let handle = manager.handle(&id).unwrap();
        let mut state = handle.state.lock().unwrap();

        let message = Message {
            id: 1,
            queue: "orders".into(),
            payload: "m1".into(),
            enqueued_at: 0,
        };
        let returned = state.deliver(message.clone()).unwrap_err();
        assert_eq!(returned, message);
        assert!(!state.connected);
        assert!(state.outstanding.is_none());
    }

    #[test]
    fn phases_follow_the_consumer_state_machine() {
        let manager = SubscriptionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = manager.register("orders", Some("c1".into()), tx).unwrap();
        let handle = manager.handle(&id).unwrap();

        let mut state = handle.state.lock().unwrap();
        assert_eq!(state.phase(), ConsumerPhase::Idle);

        state
            .deliver(Message {
                id: 1,
                queue: "orders".into(),
                payload: "m1".into(),
                enqueued_at: 0,
            })
            .unwrap();
        assert_eq!(state.phase(), ConsumerPhase::AwaitingAck);
        assert!(rx.try_recv().is_ok());

        state.outstanding = None;
        state.connected = false;
        assert_eq!(state.phase(), ConsumerPhase::Disconnected);
    }
}
