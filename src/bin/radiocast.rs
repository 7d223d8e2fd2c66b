//! Radiocast server
//!
//! Connects to the media catalog, starts the prefetch pipeline and the
//! broadcast multiplexer, and serves the shared stream over HTTP.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use radiocast::{
    broadcast::{spawn_pipeline, ListenerRegistry, Multiplexer, PrefetchConfig},
    catalog::{Catalog, JellyfinCatalog},
    config::Config,
    encode::{Encoder, FfmpegEncoder},
    http::{self, AppState},
    scheduler::Scheduler,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    config.validate().context("invalid configuration")?;

    tracing::info!("Starting radiocast");

    // Fail fast if the catalog is unreachable or the collection is missing.
    let catalog: Arc<dyn Catalog> = Arc::new(
        JellyfinCatalog::connect(&config.catalog_url, &config.api_key, &config.collection)
            .await
            .context("catalog connection failed")?,
    );
    tracing::info!(collection = %config.collection, "connected to media catalog");

    let encoder: Arc<dyn Encoder> =
        Arc::new(FfmpegEncoder::new(config.ffmpeg_path.clone(), config.bitrate_kbps));

    let scheduler = Scheduler::new(
        Arc::clone(&catalog),
        config.history_window,
        config.catalog_refresh(),
    );
    let queue = spawn_pipeline(
        catalog,
        encoder,
        scheduler,
        PrefetchConfig {
            depth: config.prefetch_depth,
            retry_cap: config.retry_cap,
        },
    );

    let registry = Arc::new(ListenerRegistry::new(config.listener_backlog));
    let now_playing = Arc::new(parking_lot::Mutex::new(None));
    let multiplexer = Multiplexer::new(
        queue,
        Arc::clone(&registry),
        config.bitrate_kbps,
        Arc::clone(&now_playing),
    );
    let state = Arc::new(AppState::new(
        registry,
        now_playing,
        multiplexer.state_handle(),
    ));
    tokio::spawn(multiplexer.run());

    let addr = config.bind_addr().context("invalid bind address")?;
    tracing::info!("Stream available at http://{}/stream.mp3", addr);
    http::serve(addr, state).await?;
    Ok(())
}
