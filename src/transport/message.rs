use serde::{Deserialize, Serialize};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::message::Message;
use crate::utils::error::BrokerError;

/// Inbound wire frames, discriminated by the `type` field.
///
/// `ack_id` and `producer_id` are opaque correlation values chosen by the
/// caller; the broker echoes them back on the matching response so a client
/// multiplexing many requests over one connection can pair them up.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Producer declares a queue up front. `buffer_size` falls back to the
    /// broker's configured default when omitted.
    #[serde(rename = "create_queue")]
    CreateQueue {
        queue: String,
        buffer_size: Option<usize>,
        ack_id: Option<String>,
    },

    /// Producer wants to add a message to a queue.
    #[serde(rename = "add")]
    Add {
        queue: String,
        payload: String,
        ack_id: Option<String>,
        producer_id: Option<String>,
    },

    /// Consumer wants to subscribe to a queue. A missing `consumer_id` asks
    /// the broker to generate one.
    #[serde(rename = "subscribe")]
    Subscribe {
        queue: String,
        consumer_id: Option<String>,
    },

    /// Consumer acknowledges its outstanding message. Fire-and-forget:
    /// no response frame is sent.
    #[serde(rename = "ack")]
    Ack { queue: String, consumer_id: String },
}

/// Outbound wire frames.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "queue_created")]
    QueueCreated {
        queue: String,
        buffer_size: usize,
        ack_id: Option<String>,
    },

    /// The producer-facing receipt: the message was durably accepted under
    /// this id.
    #[serde(rename = "enqueued")]
    Enqueued {
        id: u64,
        queue: String,
        ack_id: Option<String>,
        producer_id: Option<String>,
    },

    #[serde(rename = "subscribed")]
    Subscribed { queue: String, consumer_id: String },

    /// A message pushed to the consumer. Exactly one of these is
    /// outstanding per consumer until it acks.
    #[serde(rename = "delivery")]
    Delivery {
        id: u64,
        queue: String,
        payload: String,
        enqueued_at: i64,
    },

    /// Stable `{kind, message}` error taxonomy; internal error values are
    /// never serialized directly.
    #[serde(rename = "error")]
    Error {
        kind: String,
        message: String,
        ack_id: Option<String>,
        producer_id: Option<String>,
    },
}

impl ServerMessage {
    pub fn delivery(message: &Message) -> Self {
        ServerMessage::Delivery {
            id: message.id,
            queue: message.queue.clone(),
            payload: message.payload.clone(),
            enqueued_at: message.enqueued_at,
        }
    }

    pub fn error(
        error: &BrokerError,
        ack_id: Option<String>,
        producer_id: Option<String>,
    ) -> Self {
        ServerMessage::Error {
            kind: error.kind().to_string(),
            message: error.to_string(),
            ack_id,
            producer_id,
        }
    }

    /// An inbound frame the broker could not parse.
    pub fn bad_request(detail: String) -> Self {
        ServerMessage::Error {
            kind: "bad_request".to_string(),
            message: detail,
            ack_id: None,
            producer_id: None,
        }
    }

    pub fn to_ws(&self) -> WsMessage {
        // Wire frames are plain data; serialization cannot fail.
        WsMessage::text(serde_json::to_string(self).unwrap())
    }
}
