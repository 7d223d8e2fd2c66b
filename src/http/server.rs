//! HTTP server
//!
//! Serves the shared broadcast over chunked transfer plus a small JSON API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::info;

use crate::broadcast::{BroadcastState, ListenerRegistry};
use crate::catalog::Track;
use crate::http::handlers;

/// Shared state behind every handler.
pub struct AppState {
    pub registry: Arc<ListenerRegistry>,
    pub now_playing: Arc<Mutex<Option<Track>>>,
    pub broadcast_state: Arc<Mutex<BroadcastState>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        registry: Arc<ListenerRegistry>,
        now_playing: Arc<Mutex<Option<Track>>>,
        broadcast_state: Arc<Mutex<BroadcastState>>,
    ) -> Self {
        Self {
            registry,
            now_playing,
            broadcast_state,
            started_at: Instant::now(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stream.mp3", get(handlers::stream_audio))
        .route("/api/status", get(handlers::get_status))
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> crate::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "http server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
