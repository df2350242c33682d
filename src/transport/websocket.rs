//! WebSocket transport
//!
//! This file implements the WebSocket server that translates protocol JSON
//! frames into broker operations. Responsibilities:
//! - Accept TCP/WebSocket connections
//! - Create a `Connection` for each socket, with an outbound channel and a
//!   forwarding task that owns the socket's write half
//! - Deserialize inbound frames, dispatch them to the engine, and send each
//!   result or error back tagged with the caller's correlation ids
//! - Notify the engine on connection loss so outstanding deliveries are
//!   released back to their queue
//!
//! The forwarding task bounds every socket send with a timeout; a peer that
//! cannot drain its socket within it is treated as disconnected.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::broker::Broker;
use crate::client::Connection;
use crate::transport::message::{ClientMessage, ServerMessage};

/// A socket send that stays blocked longer than this is a dead peer.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn start_websocket_server(addr: String, broker: Arc<Broker>) {
    let listener = TcpListener::bind(&addr).await.expect("Can't bind");

    info!("WebSocket server listening on ws://{addr}");

    while let Ok((stream, _)) = listener.accept().await {
        let broker = broker.clone();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake error: {e}");
                    return;
                }
            };
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (tx, mut rx) = mpsc::unbounded_channel();
            let connection = Connection::new(tx);
            let conn_id = connection.id.clone();
            debug!("{conn_id} connected");

            // Consumer ids this connection subscribed; released on loss.
            let subscribed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

            let cleanup_called = Arc::new(AtomicBool::new(false));
            let do_cleanup = {
                let broker = broker.clone();
                let subscribed = subscribed.clone();
                let cleanup_called = cleanup_called.clone();

                move || {
                    if !cleanup_called.swap(true, Ordering::SeqCst) {
                        for consumer_id in subscribed.lock().unwrap().drain(..) {
                            broker.handle_disconnect(&consumer_id);
                        }
                    }
                }
            };

            // Forward broker → peer; a slow or dead socket ends the loop.
            {
                let conn_id = conn_id.clone();
                let do_cleanup = do_cleanup.clone();

                spawn(async move {
                    while let Some(msg) = rx.recv().await {
                        match tokio::time::timeout(SEND_TIMEOUT, ws_sender.send(msg)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                debug!("failed to send to {conn_id}: {e}");
                                break;
                            }
                            Err(_) => {
                                warn!("send to {conn_id} timed out; treating as disconnect");
                                break;
                            }
                        }
                    }

                    do_cleanup();
                    debug!("send loop closed for {conn_id}");
                });
            }

            while let Some(Ok(msg)) = ws_receiver.next().await {
                if !msg.is_text() {
                    continue;
                }
                let text = msg.to_text().unwrap();
                match serde_json::from_str::<ClientMessage>(text) {
                    Ok(request) => {
                        if let Some(reply) =
                            handle_message(&broker, &connection, &subscribed, request)
                        {
                            let _ = connection.sender.send(reply.to_ws());
                        }
                    }
                    Err(err) => {
                        warn!(
                            "invalid frame from {conn_id}: {err} | {}",
                            &text.chars().take(100).collect::<String>()
                        );
                        let _ = connection
                            .sender
                            .send(ServerMessage::bad_request(err.to_string()).to_ws());
                    }
                }
            }

            do_cleanup();
            debug!("{conn_id} disconnected");
        });
    }
}

/// Dispatches one parsed frame to the engine and builds the reply, if the
/// frame warrants one (`ack` is fire-and-forget). Factored out of the read
/// loop so protocol handling is testable without sockets.
pub(crate) fn handle_message(
    broker: &Broker,
    connection: &Connection,
    subscribed: &Mutex<Vec<String>>,
    request: ClientMessage,
) -> Option<ServerMessage> {
    match request {
        ClientMessage::CreateQueue {
            queue,
            buffer_size,
            ack_id,
        } => {
            let buffer_size = buffer_size.unwrap_or_else(|| broker.default_buffer_size());
            match broker.create_queue(&queue, buffer_size) {
                Ok(info) => Some(ServerMessage::QueueCreated {
                    queue: info.name,
                    buffer_size: info.buffer_size,
                    ack_id,
                }),
                Err(e) => Some(ServerMessage::error(&e, ack_id, None)),
            }
        }

        ClientMessage::Add {
            queue,
            payload,
            ack_id,
            producer_id,
        } => match broker.add(&queue, payload) {
            // Let the producer know the message was enqueued, by sending
            // the producer the message id.
            Ok(id) => Some(ServerMessage::Enqueued {
                id,
                queue,
                ack_id,
                producer_id,
            }),
            Err(e) => Some(ServerMessage::error(&e, ack_id, producer_id)),
        },

        ClientMessage::Subscribe { queue, consumer_id } => {
            match broker.subscribe(&queue, consumer_id, connection.sender.clone()) {
                Ok(consumer_id) => {
                    subscribed.lock().unwrap().push(consumer_id.clone());
                    Some(ServerMessage::Subscribed { queue, consumer_id })
                }
                Err(e) => Some(ServerMessage::error(&e, None, None)),
            }
        }

        ClientMessage::Ack { queue, consumer_id } => {
            // No reply frame; a failed durable prune is logged here and the
            // message will simply be redelivered later.
            if let Err(e) = broker.acknowledge(&queue, &consumer_id) {
                warn!("acknowledge from '{consumer_id}' on '{queue}' failed: {e}");
            }
            None
        }
    }
}
