//! End-to-end engine tests: scheduler, prefetch pipeline, multiplexer and
//! listener registry wired together the way the server wires them, with a
//! stub catalog and a passthrough encoder standing in for the network and
//! ffmpeg.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use radiocast::broadcast::{spawn_pipeline, ListenerRegistry, Multiplexer, PrefetchConfig};
use radiocast::catalog::{ByteStream, Catalog, Track};
use radiocast::encode::{ChunkStream, Encoder};
use radiocast::error::{CatalogError, EncodeError};
use radiocast::scheduler::Scheduler;

/// Bytes per track in the stub catalog: 4 chunks of 800 bytes, which is
/// 200ms of air time at the 128 kbit/s used throughout these tests.
const TRACK_BYTES: usize = 3200;
const CHUNK_BYTES: usize = 800;

/// Catalog whose tracks each decode to a distinct repeated byte. A track
/// with a `!` suffix in its id always fails to open.
struct StubCatalog {
    tracks: Vec<Track>,
}

impl StubCatalog {
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
        }
    }
}

fn fill_byte(id: &str) -> u8 {
    id.as_bytes().iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

#[async_trait]
impl Catalog for StubCatalog {
    async fn list_tracks(&self) -> Result<Vec<Track>, CatalogError> {
        Ok(self.tracks.clone())
    }

    async fn open_audio(&self, track_id: &str) -> Result<ByteStream, CatalogError> {
        if track_id.ends_with('!') {
            return Err(CatalogError::NotFound(track_id.to_string()));
        }
        let byte = fill_byte(track_id);
        let chunks: Vec<std::io::Result<Bytes>> = (0..TRACK_BYTES / CHUNK_BYTES)
            .map(|_| Ok(Bytes::from(vec![byte; CHUNK_BYTES])))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

struct PassthroughEncoder;

#[async_trait]
impl Encoder for PassthroughEncoder {
    async fn encode(&self, source: ByteStream) -> Result<ChunkStream, EncodeError> {
        Ok(Box::pin(source.map(|item| {
            item.map_err(|e| EncodeError::SourceRead(e.to_string()))
        })))
    }
}

fn start_engine(
    ids: &[&str],
    history_window: usize,
    depth: usize,
    seed: u64,
) -> (Arc<ListenerRegistry>, tokio::task::JoinHandle<()>) {
    let catalog = Arc::new(StubCatalog::new(ids));
    let scheduler = Scheduler::with_seed(
        catalog.clone(),
        history_window,
        Duration::from_secs(3600),
        seed,
    );
    let queue = spawn_pipeline(
        catalog,
        Arc::new(PassthroughEncoder),
        scheduler,
        PrefetchConfig {
            depth,
            retry_cap: 3,
        },
    );
    let registry = Arc::new(ListenerRegistry::new(1024));
    let multiplexer = Multiplexer::new(queue, registry.clone(), 128, Arc::new(Mutex::new(None)));
    let runner = tokio::spawn(multiplexer.run());
    (registry, runner)
}

fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<u8> {
    let mut received = Vec::new();
    while let Ok(chunk) = rx.try_recv() {
        received.extend_from_slice(&chunk);
    }
    received
}

#[tokio::test(start_paused = true)]
async fn every_listener_hears_the_same_paced_broadcast() {
    let (registry, runner) = start_engine(&["t1", "t2", "t3", "t4"], 1, 2, 7);

    let (_guard_early, mut rx_early) = registry.attach();
    // 790ms of air time: within the fourth 200ms track, just shy of its
    // final boundary, so exactly 16 chunks have been released.
    tokio::time::sleep(Duration::from_millis(310)).await;
    let (_guard_late, mut rx_late) = registry.attach();
    tokio::time::sleep(Duration::from_millis(480)).await;
    runner.abort();

    let early = drain(&mut rx_early);
    let late = drain(&mut rx_late);

    // Pacing: four full tracks of bytes in 790ms at 16_000 B/s, no more.
    assert_eq!(early.len(), 4 * TRACK_BYTES);

    // Continuity and rotation: the stream splits into whole tracks, and
    // with a history window of 1 no track ever plays twice in a row.
    let mut previous = None;
    for segment in early.chunks(TRACK_BYTES) {
        let byte = segment[0];
        assert!(segment.iter().all(|b| *b == byte), "track bytes interleaved");
        assert_ne!(previous, Some(byte), "track repeated back to back");
        previous = Some(byte);
    }

    // The late joiner saw nothing from before it attached, and everything
    // after: its stream is exactly the tail of the early listener's.
    assert!(!late.is_empty());
    assert!(late.len() < early.len());
    assert!(early.ends_with(&late));
}

#[tokio::test(start_paused = true)]
async fn broken_tracks_never_reach_the_air() {
    // "bad!" always fails to open; after the retry cap it is banned and the
    // broadcast carries on with the remaining track alone.
    let (registry, runner) = start_engine(&["good", "bad!"], 0, 2, 3);

    let (_guard, mut rx) = registry.attach();
    tokio::time::sleep(Duration::from_secs(2)).await;
    runner.abort();

    let received = drain(&mut rx);
    assert!(!received.is_empty());
    let good = fill_byte("good");
    assert!(received.iter().all(|b| *b == good));
}
