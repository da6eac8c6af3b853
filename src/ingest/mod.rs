// src/ingest/mod.rs
pub mod client;
pub mod parse;
pub mod types;

pub use client::{FeedClient, FeedConfig, FetchError};
pub use parse::{parse_entries, parse_entry, parse_timestamp, RecordParseError};
pub use types::{FeedBatch, FeedRecord, FeedSource};

use metrics::{describe_counter, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration for the ingest side.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_records_total", "Valid records parsed from the feed.");
        describe_counter!(
            "ingest_records_rejected_total",
            "Feed entries skipped as malformed or missing artist/title."
        );
        describe_counter!(
            "ingest_fetch_retries_total",
            "Feed requests retried after a transient failure."
        );
        describe_histogram!("ingest_fetch_ms", "Feed fetch time in milliseconds.");
    });
}
