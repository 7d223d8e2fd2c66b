//! Listener session registry
//!
//! Each HTTP connection maps 1:1 to a session: a bounded chunk queue the
//! multiplexer publishes into without ever blocking. A listener that cannot
//! drain its backlog is forcibly dropped (its queue is closed, which ends
//! the HTTP response) instead of being allowed to backpressure the shared
//! broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};
use uuid::Uuid;

/// Registry of connected listener sessions.
pub struct ListenerRegistry {
    sessions: Mutex<HashMap<Uuid, mpsc::Sender<Bytes>>>,
    backlog: usize,
}

impl ListenerRegistry {
    /// `backlog` is the per-listener bound, in chunks, before a session is
    /// considered stalled and dropped.
    pub fn new(backlog: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            backlog,
        }
    }

    /// Register a new listener starting at the current broadcast position.
    ///
    /// Joining mid-track is expected radio behavior; the session only ever
    /// sees chunks published after this call. The returned guard detaches
    /// the session when dropped.
    pub fn attach(self: &Arc<Self>) -> (ListenerGuard, mpsc::Receiver<Bytes>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.backlog);
        self.sessions.lock().insert(id, tx);
        info!(listener = %id, total = self.listener_count(), "listener attached");
        let guard = ListenerGuard {
            id,
            registry: Arc::clone(self),
        };
        (guard, rx)
    }

    /// Remove a session. Idempotent; publish may already have dropped it.
    pub fn detach(&self, id: Uuid) {
        if self.sessions.lock().remove(&id).is_some() {
            info!(listener = %id, total = self.listener_count(), "listener detached");
        }
    }

    /// Copy one chunk to every live session without blocking.
    ///
    /// Sessions whose backlog is full are dropped on the spot; closed
    /// sessions are swept out. Other listeners are never delayed by either.
    pub fn publish(&self, chunk: &Bytes) {
        let mut sessions = self.sessions.lock();
        let mut stale = Vec::new();
        for (id, tx) in sessions.iter() {
            match tx.try_send(chunk.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(listener = %id, "listener backlog exceeded, dropping session");
                    stale.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    stale.push(*id);
                }
            }
        }
        for id in stale {
            sessions.remove(&id);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

/// Detaches its session from the registry on drop.
pub struct ListenerGuard {
    id: Uuid,
    registry: Arc<ListenerRegistry>,
}

impl ListenerGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.registry.detach(self.id);
    }
}
