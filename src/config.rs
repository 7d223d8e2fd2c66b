//! Startup configuration
//!
//! All values come from flags or the environment and are validated before
//! anything touches the network. A missing or nonsensical value is a fatal
//! startup error, never a runtime surprise.

use std::net::{IpAddr, SocketAddr};

use clap::Parser;

use crate::constants;
use crate::error::{Error, Result};

/// Command-line / environment configuration
#[derive(Parser, Debug, Clone)]
#[command(name = "radiocast", about = "Continuous web radio from a remote music library")]
pub struct Config {
    /// Base URL of the media catalog server
    #[arg(long, env = "CATALOG_URL")]
    pub catalog_url: String,

    /// API key for the catalog server
    #[arg(long, env = "CATALOG_API_KEY")]
    pub api_key: String,

    /// Name of the collection to broadcast from
    #[arg(long, env = "CATALOG_COLLECTION")]
    pub collection: String,

    /// Address to bind the HTTP listener surface to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the HTTP listener surface to
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Number of tracks kept fetched and encoded ahead of playback (K)
    #[arg(long, env = "PREFETCH_DEPTH", default_value_t = constants::DEFAULT_PREFETCH_DEPTH)]
    pub prefetch_depth: usize,

    /// Number of recent plays excluded from repeat selection (H)
    #[arg(long, env = "HISTORY_WINDOW", default_value_t = constants::DEFAULT_HISTORY_WINDOW)]
    pub history_window: usize,

    /// Per-listener backlog bound in chunks before the listener is dropped
    #[arg(long, env = "LISTENER_BACKLOG", default_value_t = constants::DEFAULT_LISTENER_BACKLOG)]
    pub listener_backlog: usize,

    /// Constant output bitrate in kbit/s
    #[arg(long, env = "BITRATE_KBPS", default_value_t = constants::DEFAULT_BITRATE_KBPS)]
    pub bitrate_kbps: u32,

    /// Path to the ffmpeg binary used for transcoding
    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    pub ffmpeg_path: String,

    /// Catalog listing cache lifetime in seconds
    #[arg(long, env = "CATALOG_REFRESH_SECS", default_value_t = constants::DEFAULT_CATALOG_REFRESH_SECS)]
    pub catalog_refresh_secs: u64,

    /// Attempts before a failing track is permanently skipped
    #[arg(long, env = "FETCH_RETRY_CAP", default_value_t = constants::DEFAULT_FETCH_RETRY_CAP)]
    pub retry_cap: u32,
}

impl Config {
    /// Validate value ranges. Required-but-missing values are already
    /// rejected by argument parsing before this runs.
    pub fn validate(&self) -> Result<()> {
        if self.catalog_url.trim().is_empty() {
            return Err(Error::Config("catalog URL must not be empty".into()));
        }
        if self.api_key.trim().is_empty() {
            return Err(Error::Config("API key must not be empty".into()));
        }
        if self.collection.trim().is_empty() {
            return Err(Error::Config("collection name must not be empty".into()));
        }
        if self.prefetch_depth == 0 {
            return Err(Error::Config("prefetch depth must be at least 1".into()));
        }
        if self.listener_backlog == 0 {
            return Err(Error::Config("listener backlog must be at least 1".into()));
        }
        if self.bitrate_kbps < 8 {
            return Err(Error::Config(format!(
                "bitrate of {} kbit/s is below the 8 kbit/s minimum",
                self.bitrate_kbps
            )));
        }
        if self.retry_cap == 0 {
            return Err(Error::Config("retry cap must be at least 1".into()));
        }
        Ok(())
    }

    /// Catalog listing cache lifetime
    pub fn catalog_refresh(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.catalog_refresh_secs)
    }

    /// Resolved socket address for the HTTP surface
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| Error::Config(format!("invalid bind host: {}", self.host)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
