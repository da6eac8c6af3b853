//! Fetch today's feed and print the plays matching a query (all plays when no query is given).

use anyhow::{Context, Result};
use chrono::Utc;
use nowplaying_sync::{init_tracing, FeedClient, SyncConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cfg = SyncConfig::load_from_env()?;
    let client = FeedClient::new(cfg.feed_config()?).context("building feed client")?;

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let batch = client.fetch(Utc::now()).await?;
    let tz = client.config().timezone;

    let hits = batch.search(&query);
    for rec in &hits {
        println!(
            "{}  {}",
            rec.played_at.with_timezone(&tz).format("%H:%M"),
            rec.display()
        );
    }
    println!("{} of {} plays match {:?}", hits.len(), batch.len(), query);
    Ok(())
}
