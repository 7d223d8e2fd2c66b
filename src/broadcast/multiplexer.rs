//! Broadcast multiplexer
//!
//! Owns the single logical "now playing" timeline. One dedicated task pops
//! prepared tracks off the play queue and paces their chunks out against a
//! broadcast clock: a chunk is released only once wall-clock elapsed time
//! has caught up with its byte offset (`bytes * 8 / bitrate`). The loop
//! never fast-forwards a backlog and never blocks on listener I/O — fan-out
//! is the registry's non-blocking publish.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::broadcast::listeners::ListenerRegistry;
use crate::broadcast::prefetch::PreparedTrack;
use crate::catalog::Track;
use crate::constants::STARVED_POLL_INTERVAL_MS;

/// Multiplexer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastState {
    /// No track has ever been ready.
    AwaitingFirstTrack,
    /// A track's buffer is being paced out.
    Streaming,
    /// Current track exhausted, popping the next one.
    Advancing,
    /// Queue empty; holding listeners open until a track arrives.
    IdleStarved,
}

impl fmt::Display for BroadcastState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BroadcastState::AwaitingFirstTrack => "awaiting_first_track",
            BroadcastState::Streaming => "streaming",
            BroadcastState::Advancing => "advancing",
            BroadcastState::IdleStarved => "idle_starved",
        };
        f.write_str(name)
    }
}

/// The pacing loop at the heart of the broadcast.
pub struct Multiplexer {
    queue: mpsc::Receiver<PreparedTrack>,
    registry: Arc<ListenerRegistry>,
    bytes_per_second: f64,
    now_playing: Arc<Mutex<Option<Track>>>,
    state: Arc<Mutex<BroadcastState>>,
    starved_poll: Duration,
}

impl Multiplexer {
    pub fn new(
        queue: mpsc::Receiver<PreparedTrack>,
        registry: Arc<ListenerRegistry>,
        bitrate_kbps: u32,
        now_playing: Arc<Mutex<Option<Track>>>,
    ) -> Self {
        Self {
            queue,
            registry,
            bytes_per_second: f64::from(bitrate_kbps) * 1000.0 / 8.0,
            now_playing,
            state: Arc::new(Mutex::new(BroadcastState::AwaitingFirstTrack)),
            starved_poll: Duration::from_millis(STARVED_POLL_INTERVAL_MS),
        }
    }

    /// Shared view of the state machine, for the status endpoint.
    pub fn state_handle(&self) -> Arc<Mutex<BroadcastState>> {
        Arc::clone(&self.state)
    }

    /// Run the pacing loop until the play queue closes.
    pub async fn run(mut self) {
        info!(
            bytes_per_second = self.bytes_per_second,
            "broadcast multiplexer started"
        );
        while let Some(prepared) = self.next_ready().await {
            self.set_state(BroadcastState::Streaming);
            self.stream_track(prepared).await;
            self.set_state(BroadcastState::Advancing);
        }
        *self.now_playing.lock() = None;
        info!("broadcast multiplexer stopped");
    }

    fn set_state(&self, next: BroadcastState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = %*state, to = %next, "broadcast state change");
            *state = next;
        }
    }

    /// Pop the next prepared track, entering `IdleStarved` if the queue is
    /// empty after the first track has played. Returns `None` on shutdown.
    async fn next_ready(&mut self) -> Option<PreparedTrack> {
        match self.queue.try_recv() {
            Ok(prepared) => Some(prepared),
            Err(TryRecvError::Disconnected) => None,
            Err(TryRecvError::Empty) => {
                if *self.state.lock() != BroadcastState::AwaitingFirstTrack {
                    warn!("play queue empty, holding broadcast");
                    self.set_state(BroadcastState::IdleStarved);
                }
                loop {
                    match timeout(self.starved_poll, self.queue.recv()).await {
                        Ok(next) => return next,
                        Err(_) => debug!("still waiting for a ready track"),
                    }
                }
            }
        }
    }

    async fn stream_track(&mut self, prepared: PreparedTrack) {
        let total_bytes = prepared.byte_len();
        let PreparedTrack { track, chunks } = prepared;
        info!(
            track = %track.display_name(),
            bytes = total_bytes,
            listeners = self.registry.listener_count(),
            "now playing"
        );
        *self.now_playing.lock() = Some(track);

        let start = Instant::now();
        let mut sent: u64 = 0;
        for chunk in chunks {
            // Release the chunk only once real time has caught up with its
            // byte offset; an encoder running behind simply makes us wait.
            sleep_until(start + self.playback_time(sent)).await;
            self.registry.publish(&chunk);
            sent += chunk.len() as u64;
        }
        // Hold for the tail of the track so the next one starts exactly on
        // the boundary rather than when the last chunk was handed out.
        sleep_until(start + self.playback_time(sent)).await;
    }

    /// Broadcast-clock position of a byte offset.
    fn playback_time(&self, bytes: u64) -> Duration {
        Duration::from_secs_f64(bytes as f64 / self.bytes_per_second)
    }
}
