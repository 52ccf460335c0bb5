//! Room document store server.
//!
//! Keyed JSON documents with atomic field-path writes and subscribe-on-change
//! over WebSocket. Exposes the components for tests and binaries.

pub mod config;
pub mod store;
pub mod store_loop;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;
use crate::store::DocumentStore;
use crate::store_loop::{run_store_loop, StoreBroadcast, StoreCommand};
use crate::ws::{ws_handler, AppState};

/// Room for the envelope around a full-size document in one request
const MESSAGE_OVERHEAD_BYTES: usize = 16 * 1024;

/// Spawn the store loop and build the router serving `/ws`.
/// Must be called from within a tokio runtime.
pub fn build_app(config: &ServerConfig, store: DocumentStore) -> Router {
    let (store_tx, store_rx) = mpsc::channel::<StoreCommand>(256);
    let (broadcast_tx, _) = broadcast::channel::<StoreBroadcast>(config.broadcast_capacity);

    let bc_tx = broadcast_tx.clone();
    let loop_config = config.clone();
    tokio::spawn(async move {
        run_store_loop(store, store_rx, bc_tx, loop_config).await;
    });

    let app_state = AppState {
        store_tx,
        broadcast_tx,
        connections: Arc::new(Semaphore::new(config.max_connections)),
        allowed_origins: Arc::new(config.allowed_origins.clone()),
        max_message_bytes: config.max_document_bytes + MESSAGE_OVERHEAD_BYTES,
    };
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}
