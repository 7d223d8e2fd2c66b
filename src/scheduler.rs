//! Playlist scheduling
//!
//! Picks the next track to broadcast: uniformly at random over the cached
//! catalog listing, excluding the last H plays so the rotation doesn't
//! immediately repeat itself. The exclusion window is a plain FIFO of play
//! order — "recently played" is purely positional, not frequency-based.
//!
//! Tracks that repeatedly fail to fetch or encode get banned for the rest
//! of the session via [`Scheduler::ban`].

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::catalog::{Catalog, Track};
use crate::error::CatalogError;

/// Bounded FIFO window of the last H played track ids.
#[derive(Debug, Default)]
pub struct RecentHistory {
    entries: VecDeque<String>,
    window: usize,
}

impl RecentHistory {
    pub fn new(window: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Record a play, evicting the oldest entry once the window is full.
    pub fn push(&mut self, track_id: String) {
        if self.window == 0 {
            return;
        }
        if self.entries.len() == self.window {
            self.entries.pop_front();
        }
        self.entries.push_back(track_id);
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.entries.iter().any(|id| id == track_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.entries.iter()
    }
}

/// Chooses the next track to play against the remote catalog.
pub struct Scheduler {
    catalog: Arc<dyn Catalog>,
    history: RecentHistory,
    banned: HashSet<String>,
    cached: Vec<Track>,
    fetched_at: Option<Instant>,
    refresh: Duration,
    rng: StdRng,
}

impl Scheduler {
    pub fn new(catalog: Arc<dyn Catalog>, history_window: usize, refresh: Duration) -> Self {
        Self::with_rng(catalog, history_window, refresh, StdRng::from_entropy())
    }

    /// Deterministic selection order for tests.
    pub fn with_seed(
        catalog: Arc<dyn Catalog>,
        history_window: usize,
        refresh: Duration,
        seed: u64,
    ) -> Self {
        Self::with_rng(catalog, history_window, refresh, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        catalog: Arc<dyn Catalog>,
        history_window: usize,
        refresh: Duration,
        rng: StdRng,
    ) -> Self {
        Self {
            catalog,
            history: RecentHistory::new(history_window),
            banned: HashSet::new(),
            cached: Vec::new(),
            fetched_at: None,
            refresh,
            rng,
        }
    }

    /// Pick the next track to broadcast.
    ///
    /// Filters the cached listing against the recent-history window and the
    /// session ban list, falling back to the full (unbanned) catalog when
    /// the filter empties the candidate set — a library smaller than the
    /// window must never deadlock selection. The chosen id is pushed into
    /// the history window as a side effect.
    pub async fn next_track(&mut self) -> Result<Track, CatalogError> {
        self.refresh_if_stale().await?;
        if self.cached.is_empty() {
            return Err(CatalogError::EmptyCollection);
        }

        let fresh: Vec<&Track> = self
            .cached
            .iter()
            .filter(|t| !self.banned.contains(&t.id) && !self.history.contains(&t.id))
            .collect();
        let pool = if fresh.is_empty() {
            let unbanned: Vec<&Track> = self
                .cached
                .iter()
                .filter(|t| !self.banned.contains(&t.id))
                .collect();
            if unbanned.is_empty() {
                // Every track in the library has been permanently skipped.
                return Err(CatalogError::EmptyCollection);
            }
            debug!("all candidates recently played, falling back to full catalog");
            unbanned
        } else {
            fresh
        };

        let track = pool
            .choose(&mut self.rng)
            .map(|t| (*t).clone())
            .ok_or(CatalogError::EmptyCollection)?;

        self.history.push(track.id.clone());
        debug!(track = %track.display_name(), "scheduled next track");
        Ok(track)
    }

    /// Permanently skip a track for the rest of this session.
    pub fn ban(&mut self, track_id: &str) {
        self.banned.insert(track_id.to_string());
    }

    async fn refresh_if_stale(&mut self) -> Result<(), CatalogError> {
        let stale = match self.fetched_at {
            None => true,
            Some(at) => at.elapsed() >= self.refresh,
        };
        if !stale && !self.cached.is_empty() {
            return Ok(());
        }

        match self.catalog.list_tracks().await {
            Ok(tracks) => {
                debug!(count = tracks.len(), "refreshed catalog listing");
                self.cached = tracks;
                self.fetched_at = Some(Instant::now());
                Ok(())
            }
            Err(e) if !self.cached.is_empty() => {
                // A stale listing beats a dead broadcast; try again next
                // refresh interval.
                warn!(error = %e, "catalog refresh failed, reusing cached listing");
                self.fetched_at = Some(Instant::now());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use proptest::prelude::*;

    use crate::catalog::ByteStream;

    struct StubCatalog {
        tracks: Vec<Track>,
        list_calls: AtomicUsize,
    }

    impl StubCatalog {
        fn new(ids: &[&str]) -> Self {
            Self {
                tracks: ids.iter().map(|id| stub_track(id)).collect(),
                list_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Catalog for StubCatalog {
        async fn list_tracks(&self) -> Result<Vec<Track>, CatalogError> {
            self.list_calls.fetch_add(1, Ordering::Relaxed);
            Ok(self.tracks.clone())
        }

        async fn open_audio(&self, track_id: &str) -> Result<ByteStream, CatalogError> {
            Err(CatalogError::NotFound(track_id.to_string()))
        }
    }

    fn stub_track(id: &str) -> Track {
        Track {
            id: id.to_string(),
            title: id.to_uppercase(),
            artists: vec![],
            duration_secs: None,
        }
    }

    const LONG_REFRESH: Duration = Duration::from_secs(3600);

    #[test]
    fn history_evicts_oldest_first() {
        let mut history = RecentHistory::new(3);
        for id in ["a", "b", "c", "d"] {
            history.push(id.to_string());
        }
        assert_eq!(history.len(), 3);
        assert!(!history.contains("a"));
        assert!(history.contains("b"));
        assert!(history.contains("d"));
    }

    #[test]
    fn zero_window_records_nothing() {
        let mut history = RecentHistory::new(0);
        history.push("a".to_string());
        assert!(history.is_empty());
        assert!(!history.contains("a"));
    }

    proptest! {
        #[test]
        fn history_is_a_bounded_fifo(
            window in 1usize..16,
            plays in proptest::collection::vec("[a-z]{1,4}", 0..64),
        ) {
            let mut history = RecentHistory::new(window);
            for id in &plays {
                history.push(id.clone());
            }
            prop_assert!(history.len() <= window);
            let expected: Vec<String> = plays
                .iter()
                .rev()
                .take(window)
                .rev()
                .cloned()
                .collect();
            let actual: Vec<String> = history.iter().cloned().collect();
            prop_assert_eq!(actual, expected);
        }
    }

    #[tokio::test]
    async fn never_repeats_within_window() {
        let catalog = Arc::new(StubCatalog::new(&[
            "a", "b", "c", "d", "e", "f", "g", "h", "i", "j",
        ]));
        let mut scheduler = Scheduler::with_seed(catalog, 4, LONG_REFRESH, 7);

        let mut window: VecDeque<String> = VecDeque::new();
        for _ in 0..50 {
            let track = scheduler.next_track().await.unwrap();
            assert!(
                !window.contains(&track.id),
                "{} repeated within the window",
                track.id
            );
            window.push_back(track.id);
            if window.len() > 4 {
                window.pop_front();
            }
        }
    }

    #[tokio::test]
    async fn small_catalog_falls_back_instead_of_deadlocking() {
        let catalog = Arc::new(StubCatalog::new(&["x", "y"]));
        let mut scheduler = Scheduler::with_seed(catalog, 5, LONG_REFRESH, 1);

        for _ in 0..10 {
            assert!(scheduler.next_track().await.is_ok());
        }
    }

    #[tokio::test]
    async fn three_track_rotation_with_window_two() {
        let catalog = Arc::new(StubCatalog::new(&["t1", "t2", "t3"]));
        let mut scheduler = Scheduler::with_seed(catalog, 2, LONG_REFRESH, 42);

        let mut picks = Vec::new();
        for _ in 0..5 {
            picks.push(scheduler.next_track().await.unwrap().id);
        }
        for i in 1..picks.len() {
            assert_ne!(picks[i], picks[i - 1], "consecutive repeat at {}", i);
            if i >= 2 {
                assert_ne!(picks[i], picks[i - 2], "repeat before 2 other plays at {}", i);
            }
        }
    }

    #[tokio::test]
    async fn empty_catalog_is_an_error() {
        let catalog = Arc::new(StubCatalog::new(&[]));
        let mut scheduler = Scheduler::with_seed(catalog, 2, LONG_REFRESH, 0);
        assert!(matches!(
            scheduler.next_track().await,
            Err(CatalogError::EmptyCollection)
        ));
    }

    #[tokio::test]
    async fn banned_tracks_are_never_selected() {
        let catalog = Arc::new(StubCatalog::new(&["good", "bad", "ugly"]));
        let mut scheduler = Scheduler::with_seed(catalog, 1, LONG_REFRESH, 3);
        scheduler.ban("bad");

        for _ in 0..20 {
            let track = scheduler.next_track().await.unwrap();
            assert_ne!(track.id, "bad");
        }
    }

    #[tokio::test]
    async fn banning_the_whole_catalog_empties_it() {
        let catalog = Arc::new(StubCatalog::new(&["only"]));
        let mut scheduler = Scheduler::with_seed(catalog, 1, LONG_REFRESH, 0);
        scheduler.ban("only");
        assert!(matches!(
            scheduler.next_track().await,
            Err(CatalogError::EmptyCollection)
        ));
    }

    #[tokio::test]
    async fn listing_is_cached_between_picks() {
        let catalog = Arc::new(StubCatalog::new(&["a", "b", "c"]));
        let mut scheduler = Scheduler::with_seed(catalog.clone(), 1, LONG_REFRESH, 9);

        for _ in 0..5 {
            scheduler.next_track().await.unwrap();
        }
        assert_eq!(catalog.list_calls.load(Ordering::Relaxed), 1);
    }
}
