// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod catalog;
pub mod config;
pub mod dedup;
pub mod destination;
pub mod ingest;
pub mod matcher;
pub mod scheduler;

// ---- Re-exports for stable public API ----
pub use crate::catalog::{CatalogError, CatalogService, Playlist, Track};
pub use crate::config::SyncConfig;
pub use crate::dedup::{DedupStore, DuplicateGuard, DuplicateResult, InMemoryDedupStore};
pub use crate::destination::{AddResult, DestinationWriter, WriteError};
pub use crate::ingest::{FeedBatch, FeedClient, FeedRecord, FeedSource, FetchError};
pub use crate::matcher::{CatalogMatcher, MatchError, SongMatch};
pub use crate::scheduler::{CycleSummary, RecordOutcome, SchedulerConfig, SyncScheduler};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over the default filter;
/// `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("nowplaying_sync=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if let Err(e) = res {
        eprintln!("tracing already initialized: {e}");
    }
}
