//! # Radiocast
//!
//! Continuous "web radio" broadcaster: one shared audio stream assembled on
//! the fly from a remote music library and served to any number of HTTP
//! listeners, all of whom hear the same live position.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            RADIOCAST                                 │
//! │                                                                      │
//! │  ┌───────────┐   tracks    ┌────────────┐   raw audio  ┌──────────┐  │
//! │  │  Catalog  │◄────────────│  Playlist  │              │  ffmpeg  │  │
//! │  │  (remote  │             │  Scheduler │              │ (CBR MP3)│  │
//! │  │  library) │             └─────┬──────┘              └────▲─────┘  │
//! │  └─────▲─────┘                   │ next track               │        │
//! │        │      ┌──────────────────▼──────────────────────────┴─────┐  │
//! │        └──────│  Prefetch Pipeline (K concurrent fetch+encode)    │  │
//! │               └──────────────────┬────────────────────────────────┘  │
//! │                                  │ PlayQueue (bounded, ordered)      │
//! │               ┌──────────────────▼────────────────────────────────┐  │
//! │               │  Broadcast Multiplexer (real-time paced emission) │  │
//! │               └──────────────────┬────────────────────────────────┘  │
//! │                                  │ fan-out (non-blocking)            │
//! │          ┌───────────────┬───────┴───────┬───────────────┐           │
//! │    ┌─────▼─────┐   ┌─────▼─────┐   ┌─────▼─────┐   ┌─────▼─────┐     │
//! │    │ Listener  │   │ Listener  │   │ Listener  │   │ Listener  │     │
//! │    │  backlog  │   │  backlog  │   │  backlog  │   │  backlog  │     │
//! │    └─────┬─────┘   └─────┬─────┘   └─────┬─────┘   └─────┬─────┘     │
//! └──────────┼───────────────┼───────────────┼───────────────┼───────────┘
//!            ▼               ▼               ▼               ▼
//!      GET /stream.mp3 (chunked audio/mpeg, joins at the live position)
//! ```
//!
//! The multiplexer releases encoded bytes at the rate implied by the fixed
//! output bitrate, never as fast as the buffer allows. That pacing is what
//! makes every listener hear the same broadcast position, radio-style,
//! instead of each connection racing through a download.

pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod encode;
pub mod error;
pub mod http;
pub mod scheduler;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default constant output bitrate in kbit/s
    pub const DEFAULT_BITRATE_KBPS: u32 = 128;

    /// Size of encoded chunks read from the encoder, in bytes
    pub const ENCODED_CHUNK_SIZE: usize = 4096;

    /// Default number of tracks kept fetched/encoded ahead of playback
    pub const DEFAULT_PREFETCH_DEPTH: usize = 2;

    /// Default number of recent plays excluded from repeat selection
    pub const DEFAULT_HISTORY_WINDOW: usize = 10;

    /// Default per-listener backlog bound, in chunks
    pub const DEFAULT_LISTENER_BACKLOG: usize = 64;

    /// Default catalog listing cache lifetime in seconds
    pub const DEFAULT_CATALOG_REFRESH_SECS: u64 = 300;

    /// Default attempts before a failing track is permanently skipped
    pub const DEFAULT_FETCH_RETRY_CAP: u32 = 3;

    /// Base backoff between fetch/encode retries, in milliseconds
    pub const RETRY_BACKOFF_MS: u64 = 500;

    /// How often a starved multiplexer re-polls the play queue
    pub const STARVED_POLL_INTERVAL_MS: u64 = 1000;

    /// Sample rate fed to the encoder
    pub const ENCODER_SAMPLE_RATE: u32 = 44_100;

    /// Channel count fed to the encoder
    pub const ENCODER_CHANNELS: u32 = 2;

    /// Content type of the broadcast stream
    pub const STREAM_CONTENT_TYPE: &str = "audio/mpeg";
}
