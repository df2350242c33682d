//! Read-only HTTP status surface.
//!
//! Serves the engine's `get_state` snapshot as JSON on a separate port, so
//! operators can inspect queue depths and connected consumers without
//! speaking the WebSocket protocol. Strictly read-only: no operation of the
//! broker can be invoked from here.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::broker::Broker;
use crate::broker::engine::BrokerState;

pub fn status_router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/", get(state_handler))
        .route("/state", get(state_handler))
        .with_state(broker)
}

pub async fn start_status_server(addr: String, broker: Arc<Broker>) {
    let listener = TcpListener::bind(&addr).await.expect("Can't bind");
    info!("HTTP status server listening on http://{addr}");

    if let Err(e) = axum::serve(listener, status_router(broker)).await {
        error!("status server error: {e}");
    }
}

pub(crate) async fn state_handler(State(broker): State<Arc<Broker>>) -> Json<BrokerState> {
    Json(broker.get_state())
}
