use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

/// One accepted WebSocket connection.
///
/// Each connection is uniquely identified by an `id` and has a channel
/// (`sender`) for pushing frames to the peer; a forwarding task drains the
/// channel onto the socket. Cloning is cheap; the clone shares the
/// channel.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Unique identifier for the connection, used in logs.
    pub id: String,

    /// Channel to send WebSocket frames to the peer.
    pub sender: UnboundedSender<WsMessage>,
}

impl Connection {
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: format!("conn-{}", Uuid::new_v4()),
            sender,
        }
    }
}
