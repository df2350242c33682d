use std::sync::Arc;

use tracing::{error, info};

use relaymq::broker::{Broker, BrokerOptions};
use relaymq::config::load_config;
use relaymq::persistence::Persistence;
use relaymq::transport::status::start_status_server;
use relaymq::transport::websocket::start_websocket_server;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let config = load_config().expect("Failed to load configuration");
    relaymq::utils::logging::init(&config.log.level);

    // Recovery runs to completion before any listener accepts connections;
    // an unreadable store is fatal.
    let persistence =
        Persistence::open(&config.broker.data_dir).expect("Failed to open the message store");
    let options = BrokerOptions {
        default_buffer_size: config.broker.default_buffer_size,
        auto_create_queues: config.broker.auto_create_queues,
    };
    let broker = Arc::new(
        Broker::recover(persistence, options).expect("Failed to recover broker state"),
    );

    let ws_addr = format!("{}:{}", config.server.host, config.server.port);
    let status_addr = format!("{}:{}", config.server.host, config.server.status_port);

    tokio::spawn(start_status_server(status_addr, broker.clone()));

    tokio::select! {
        _ = start_websocket_server(ws_addr, broker.clone()) => {
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    broker.shutdown();
}
