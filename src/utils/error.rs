//! Broker error taxonomy.
//!
//! Every caller-facing failure the engine can report is one of these
//! variants. The wire protocol never serializes the error value itself;
//! it sends a stable `{kind, message}` pair built from [`BrokerError::kind`]
//! and the `Display` output, so internal representations do not leak into
//! wire compatibility.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Backpressure: the queue holds `buffer_size` unacknowledged messages.
    /// Transient: the producer decides whether to retry, drop, or surface it.
    #[error("queue '{0}' is full")]
    QueueFull(String),

    /// The named queue has not been created (and auto-creation is off for
    /// the operation in question).
    #[error("queue '{0}' does not exist")]
    QueueNotFound(String),

    /// A queue with this name exists with a different buffer size.
    /// Re-creating with identical parameters is not an error.
    #[error("queue '{0}' already exists with a different buffer size")]
    QueueAlreadyExists(String),

    /// The consumer id is already bound to a live connection.
    #[error("consumer '{0}' is already connected")]
    ConsumerAlreadyConnected(String),

    /// The backing store could not be read or written. Fatal at startup;
    /// at runtime it aborts the operation that needed the write.
    #[error("storage unavailable: {reason}")]
    StorageUnavailable { reason: String },
}

impl BrokerError {
    /// Stable snake_case label used as the `kind` field of wire errors.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::QueueFull(_) => "queue_full",
            BrokerError::QueueNotFound(_) => "queue_not_found",
            BrokerError::QueueAlreadyExists(_) => "queue_already_exists",
            BrokerError::ConsumerAlreadyConnected(_) => "consumer_already_connected",
            BrokerError::StorageUnavailable { .. } => "storage_unavailable",
        }
    }
}

impl From<sled::Error> for BrokerError {
    fn from(e: sled::Error) -> Self {
        BrokerError::StorageUnavailable {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        BrokerError::StorageUnavailable {
            reason: e.to_string(),
        }
    }
}
