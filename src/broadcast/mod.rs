//! Broadcast engine
//!
//! Everything between the scheduler and the HTTP surface: the prefetch
//! pipeline that keeps encoded tracks ready ahead of need, the multiplexer
//! that paces one shared timeline in real time, and the listener registry
//! that fans identical chunks out to every connected session.

pub mod listeners;
pub mod multiplexer;
pub mod prefetch;

pub use listeners::{ListenerGuard, ListenerRegistry};
pub use multiplexer::{BroadcastState, Multiplexer};
pub use prefetch::{spawn_pipeline, PrefetchConfig, PreparedTrack};
