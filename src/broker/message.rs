use serde::{Deserialize, Serialize};

/// A single message accepted by the broker.
///
/// Minted by the engine on `add`, a message is immutable once created. It is
/// owned by its queue until it has been delivered *and* acknowledged, at
/// which point it is destroyed: removed from memory and from the durable
/// store. The same struct is used for persistence, so a recovered broker
/// rebuilds exactly the pre-crash pending sequence.
///
/// # Fields
///
/// - `id` - Broker-wide unique, strictly increasing identifier.
/// - `queue` - The name of the queue this message belongs to.
/// - `payload` - Opaque message content, passed through untouched.
/// - `enqueued_at` - Unix timestamp in milliseconds when the broker accepted it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub queue: String,
    pub payload: String,
    pub enqueued_at: i64,
}
