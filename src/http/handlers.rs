//! HTTP API handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use tracing::debug;

use crate::constants::STREAM_CONTENT_TYPE;
use crate::http::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Station status
#[derive(serde::Serialize)]
pub struct StationStatus {
    pub state: String,
    pub now_playing: Option<NowPlaying>,
    pub listeners: usize,
    pub uptime_seconds: u64,
}

#[derive(serde::Serialize)]
pub struct NowPlaying {
    pub title: String,
    pub artists: Vec<String>,
}

/// The broadcast itself: one unbounded chunked response per listener.
///
/// The session's guard lives inside the response stream, so the listener is
/// detached from the registry the moment the connection goes away and the
/// body stream is dropped.
pub async fn stream_audio(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (guard, rx) = state.registry.attach();
    debug!(listener = %guard.id(), "audio stream opened");

    let body = Body::from_stream(futures_util::stream::unfold(
        (guard, rx),
        |(guard, mut rx)| async move {
            let chunk = rx.recv().await?;
            Some((Ok::<_, Infallible>(chunk), (guard, rx)))
        },
    ));

    (
        [
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store"),
        ],
        body,
    )
}

/// Get station status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StationStatus>> {
    let now_playing = state.now_playing.lock().as_ref().map(|track| NowPlaying {
        title: track.title.clone(),
        artists: track.artists.clone(),
    });
    let status = StationStatus {
        state: state.broadcast_state.lock().to_string(),
        now_playing,
        listeners: state.registry.listener_count(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    };

    Json(ApiResponse::ok(status))
}

/// Liveness probe
pub async fn health() -> &'static str {
    "ok"
}
