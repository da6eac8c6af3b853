//! Sync entrypoint: poll the now-playing feed and push new finds into this month's playlist.
//!
//! Configuration comes from `.env`, the environment and an optional TOML file (see `config.rs`).

use anyhow::{Context, Result};
use std::sync::Arc;

use nowplaying_sync::catalog::spotify::SpotifyCatalog;
use nowplaying_sync::catalog::CatalogService;
use nowplaying_sync::{
    init_tracing, DestinationWriter, FeedClient, FeedSource, SyncConfig, SyncScheduler,
};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();
    nowplaying_sync::ingest::ensure_metrics_described();

    let cfg = SyncConfig::load_from_env()?;

    let feed: Arc<dyn FeedSource> =
        Arc::new(FeedClient::new(cfg.feed_config()?).context("building feed client")?);
    let catalog: Arc<dyn CatalogService> =
        Arc::new(SpotifyCatalog::new(cfg.spotify_config()?).context("building catalog client")?);

    let tz = cfg.timezone()?;
    let prefix = cfg.spotify.playlist_name_prefix.clone();
    let writer = DestinationWriter::new(catalog.clone()).with_timezone(tz);
    let playlist = writer
        .resolve_or_create_period_collection(&prefix)
        .await
        .context("resolving monthly playlist")?;
    tracing::info!(playlist = %playlist.name, id = %playlist.id, "using playlist as sync target");

    let mut scheduler =
        SyncScheduler::new(feed, catalog, playlist, cfg.scheduler_config()).with_period(prefix, tz);
    if cfg.sync.continuous {
        scheduler.run_continuous().await;
    } else {
        let summary = scheduler.run_once().await;
        if let Some(err) = summary.fetch_error {
            tracing::warn!(error = %err, "sync finished without processing any records");
        }
    }
    Ok(())
}
