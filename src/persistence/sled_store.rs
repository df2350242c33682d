use serde::{Deserialize, Serialize};
use sled::Db;

use crate::broker::message::Message;
use crate::utils::error::BrokerError;

/// Tree of queue definitions, keyed by queue name.
const QUEUES_TREE: &str = "queues";
/// Tree of unacknowledged messages, keyed by big-endian message id so that
/// iteration yields enqueue order.
const MESSAGES_TREE: &str = "messages";
/// Tree of broker-level bookkeeping. Currently the highest id ever minted,
/// so id monotonicity survives a restart even after every message was acked.
const META_TREE: &str = "meta";
const LAST_ID_KEY: &[u8] = b"last_id";

/// Durable definition of one queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueRecord {
    pub name: String,
    pub buffer_size: usize,
}

/// Everything `load` recovers at startup: queue definitions, unacknowledged
/// messages in original enqueue order, and the highest id ever assigned.
#[derive(Debug, Default)]
pub struct RecoveredState {
    pub queues: Vec<QueueRecord>,
    pub messages: Vec<Message>,
    pub highest_id: u64,
}

/// The broker's durable store.
///
/// Every mutation flushes sled before returning, so a crash immediately
/// after a successful call never loses the effect and a crash immediately
/// before it never fabricates one. Appends are keyed by the message's
/// unique id, which makes retried appends idempotent.
#[derive(Clone)]
pub struct Persistence {
    db: Db,
}

impl Persistence {
    /// Opens (or creates) the store at `path`. Failure here is fatal to
    /// startup: serving without the recovered state would silently drop the
    /// at-least-once guarantee.
    pub fn open(path: &str) -> Result<Self, BrokerError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Reads the durable snapshot, once, at startup.
    pub fn load(&self) -> Result<RecoveredState, BrokerError> {
        let queues_tree = self.db.open_tree(QUEUES_TREE)?;
        let mut queues = Vec::new();
        for entry in queues_tree.iter() {
            let (_, value) = entry?;
            queues.push(serde_json::from_slice(&value)?);
        }

        let messages_tree = self.db.open_tree(MESSAGES_TREE)?;
        let mut messages: Vec<Message> = Vec::new();
        for entry in messages_tree.iter() {
            let (_, value) = entry?;
            messages.push(serde_json::from_slice(&value)?);
        }

        let last_minted = match self.db.open_tree(META_TREE)?.get(LAST_ID_KEY)? {
            Some(raw) if raw.len() == 8 => u64::from_be_bytes(raw[..].try_into().unwrap()),
            _ => 0,
        };
        let highest_id = messages.last().map(|m: &Message| m.id).unwrap_or(0);

        Ok(RecoveredState {
            queues,
            messages,
            highest_id: highest_id.max(last_minted),
        })
    }

    /// Durably appends one accepted message. The engine must not report the
    /// message id to the producer until this returns `Ok`.
    pub fn append_message(&self, message: &Message) -> Result<(), BrokerError> {
        let encoded = serde_json::to_vec(message)?;
        self.db
            .open_tree(META_TREE)?
            .insert(LAST_ID_KEY, &message.id.to_be_bytes()[..])?;
        self.db
            .open_tree(MESSAGES_TREE)?
            .insert(&message.id.to_be_bytes()[..], encoded)?;
        self.db.flush()?;
        Ok(())
    }

    /// Prunes an acknowledged message. Removing an id that is already gone
    /// is fine; duplicate acks after a reconnect race hit this path.
    pub fn remove_message(&self, id: u64) -> Result<(), BrokerError> {
        self.db
            .open_tree(MESSAGES_TREE)?
            .remove(&id.to_be_bytes()[..])?;
        self.db.flush()?;
        Ok(())
    }

    /// Durably records a queue definition (explicit or auto-created).
    pub fn save_queue(&self, record: &QueueRecord) -> Result<(), BrokerError> {
        let encoded = serde_json::to_vec(record)?;
        self.db
            .open_tree(QUEUES_TREE)?
            .insert(record.name.as_bytes(), encoded)?;
        self.db.flush()?;
        Ok(())
    }

    /// Final flush on shutdown.
    pub fn flush(&self) -> Result<(), BrokerError> {
        self.db.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("db", &"sled::Db")
            .finish()
    }
}
