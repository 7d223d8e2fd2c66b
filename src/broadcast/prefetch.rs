//! Prefetch pipeline
//!
//! Keeps the play queue at its target depth K: the scheduler feed picks
//! tracks one at a time, each track is fetched and encoded as an
//! independent unit of work, and `buffered(K)` runs up to K of those units
//! concurrently while preserving scheduling order. A track that fails
//! repeatedly is banned for the session and silently replaced by the next
//! pick; a bad track never stalls the queue or reaches the multiplexer.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::catalog::{Catalog, Track};
use crate::constants::RETRY_BACKOFF_MS;
use crate::encode::Encoder;
use crate::error::{EncodeError, Error};
use crate::scheduler::Scheduler;

/// One track, fully fetched and encoded, ready to broadcast.
pub struct PreparedTrack {
    pub track: Track,
    pub chunks: Vec<Bytes>,
}

impl PreparedTrack {
    pub fn byte_len(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PrefetchConfig {
    /// Number of tracks kept fetched/encoded ahead of playback (K)
    pub depth: usize,
    /// Attempts per track before it is permanently skipped
    pub retry_cap: u32,
}

/// Backoff between scheduling retries when the catalog is unavailable.
const SCHEDULE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Start the pipeline and hand back the play queue.
///
/// The returned receiver is the PlayQueue: a bounded channel holding at
/// most `depth` prepared tracks, appended here and popped by the
/// multiplexer. Dropping the receiver shuts the pipeline down.
pub fn spawn_pipeline(
    catalog: Arc<dyn Catalog>,
    encoder: Arc<dyn Encoder>,
    scheduler: Scheduler,
    config: PrefetchConfig,
) -> mpsc::Receiver<PreparedTrack> {
    let (tx, rx) = mpsc::channel(config.depth);
    let scheduler = Arc::new(Mutex::new(scheduler));
    tokio::spawn(run_pipeline(catalog, encoder, scheduler, config, tx));
    rx
}

async fn run_pipeline(
    catalog: Arc<dyn Catalog>,
    encoder: Arc<dyn Encoder>,
    scheduler: Arc<Mutex<Scheduler>>,
    config: PrefetchConfig,
    tx: mpsc::Sender<PreparedTrack>,
) {
    let feed = futures_util::stream::unfold(scheduler.clone(), |scheduler| async move {
        loop {
            let picked = { scheduler.lock().await.next_track().await };
            match picked {
                Ok(track) => return Some((track, scheduler)),
                Err(e) => {
                    // Starvation is the multiplexer's problem; ours is to
                    // keep asking until the catalog comes back.
                    warn!(error = %e, "scheduling failed, retrying");
                    tokio::time::sleep(SCHEDULE_RETRY_DELAY).await;
                }
            }
        }
    });

    let prepared = feed
        .map(|track| {
            let catalog = Arc::clone(&catalog);
            let encoder = Arc::clone(&encoder);
            let scheduler = Arc::clone(&scheduler);
            async move { prepare_track(catalog, encoder, scheduler, track, config.retry_cap).await }
        })
        .buffered(config.depth);
    futures_util::pin_mut!(prepared);

    while let Some(outcome) = prepared.next().await {
        if let Some(ready) = outcome {
            if tx.send(ready).await.is_err() {
                // Queue receiver gone: engine shutdown.
                break;
            }
        }
    }
}

/// Fetch and encode one track, retrying up to the cap with linear backoff.
/// Returns `None` after banning the track when every attempt failed.
async fn prepare_track(
    catalog: Arc<dyn Catalog>,
    encoder: Arc<dyn Encoder>,
    scheduler: Arc<Mutex<Scheduler>>,
    track: Track,
    retry_cap: u32,
) -> Option<PreparedTrack> {
    for attempt in 1..=retry_cap {
        match fetch_and_encode(&*catalog, &*encoder, &track).await {
            Ok(chunks) => {
                info!(
                    track = %track.display_name(),
                    chunks = chunks.len(),
                    "track prefetched"
                );
                return Some(PreparedTrack { track, chunks });
            }
            Err(e) => {
                warn!(
                    track = %track.display_name(),
                    attempt,
                    error = %e,
                    "prefetch attempt failed"
                );
                if attempt < retry_cap {
                    tokio::time::sleep(Duration::from_millis(
                        RETRY_BACKOFF_MS * u64::from(attempt),
                    ))
                    .await;
                }
            }
        }
    }

    warn!(track = %track.display_name(), "skipping track permanently after repeated failures");
    scheduler.lock().await.ban(&track.id);
    None
}

async fn fetch_and_encode(
    catalog: &dyn Catalog,
    encoder: &dyn Encoder,
    track: &Track,
) -> Result<Vec<Bytes>, Error> {
    let source = catalog.open_audio(&track.id).await?;
    let mut encoded = encoder.encode(source).await?;

    let mut chunks = Vec::new();
    while let Some(chunk) = encoded.next().await {
        chunks.push(chunk?);
    }
    if chunks.is_empty() {
        return Err(EncodeError::DecodeFailed("encoder produced no output".into()).into());
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::catalog::ByteStream;
    use crate::encode::ChunkStream;
    use crate::error::CatalogError;

    /// Catalog whose track "bad" always fails to open.
    struct FlakyCatalog {
        tracks: Vec<Track>,
        bad_attempts: AtomicUsize,
    }

    impl FlakyCatalog {
        fn new(ids: &[&str]) -> Self {
            Self {
                tracks: ids
                    .iter()
                    .map(|id| Track {
                        id: id.to_string(),
                        title: id.to_string(),
                        artists: vec![],
                        duration_secs: None,
                    })
                    .collect(),
                bad_attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Catalog for FlakyCatalog {
        async fn list_tracks(&self) -> Result<Vec<Track>, CatalogError> {
            Ok(self.tracks.clone())
        }

        async fn open_audio(&self, track_id: &str) -> Result<ByteStream, CatalogError> {
            if track_id == "bad" {
                self.bad_attempts.fetch_add(1, Ordering::Relaxed);
                return Err(CatalogError::NotFound(track_id.to_string()));
            }
            let payload = Bytes::from(track_id.as_bytes().repeat(64));
            Ok(Box::pin(futures_util::stream::iter(vec![Ok(payload)])))
        }
    }

    /// Encoder that passes source bytes through unchanged.
    struct PassthroughEncoder;

    #[async_trait]
    impl Encoder for PassthroughEncoder {
        async fn encode(&self, source: ByteStream) -> Result<ChunkStream, EncodeError> {
            Ok(Box::pin(source.map(|item| {
                item.map_err(|e| EncodeError::SourceRead(e.to_string()))
            })))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failing_track_is_retried_then_replaced() {
        let catalog = Arc::new(FlakyCatalog::new(&["good", "bad"]));
        // Window of 1 over a 2-track catalog forces alternation, so "bad"
        // is guaranteed to be scheduled within the first two picks.
        let scheduler = Scheduler::with_seed(
            catalog.clone(),
            1,
            Duration::from_secs(3600),
            5,
        );
        let mut queue = spawn_pipeline(
            catalog.clone(),
            Arc::new(PassthroughEncoder),
            scheduler,
            PrefetchConfig {
                depth: 2,
                retry_cap: 3,
            },
        );

        for _ in 0..4 {
            let ready = queue.recv().await.expect("pipeline stalled");
            assert_eq!(ready.track.id, "good");
            assert!(ready.byte_len() > 0);
        }

        // Exactly the retry cap, then banned for the session.
        assert_eq!(catalog.bad_attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn prepared_tracks_carry_encoded_bytes() {
        let catalog = Arc::new(FlakyCatalog::new(&["solo"]));
        let scheduler = Scheduler::with_seed(
            catalog.clone(),
            0,
            Duration::from_secs(3600),
            1,
        );
        let mut queue = spawn_pipeline(
            catalog,
            Arc::new(PassthroughEncoder),
            scheduler,
            PrefetchConfig {
                depth: 1,
                retry_cap: 1,
            },
        );

        let ready = queue.recv().await.unwrap();
        assert_eq!(ready.track.id, "solo");
        assert_eq!(ready.byte_len(), "solo".len() * 64);
    }
}
