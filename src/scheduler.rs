// src/scheduler.rs
//! Sync cycles: fetch → drop seen → match → membership check → write.
//!
//! One cycle runs at a time and records are handled strictly in feed order. A failed fetch ends the
//! cycle with nothing processed; a failed record only ends that record.

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{CatalogService, Playlist};
use crate::dedup::{filter_new, CycleSeen, DedupStore, InMemoryDedupStore};
use crate::destination::{period_name, DestinationWriter, WriteError};
use crate::ingest::{FeedRecord, FeedSource};
use crate::matcher::CatalogMatcher;

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;
pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_JITTER_MAX: Duration = Duration::from_secs(3600);

pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("sync_cycles_total", "Sync cycles started.");
        describe_counter!(
            "sync_cycle_failures_total",
            "Cycles aborted because the feed could not be fetched."
        );
        describe_counter!("sync_records_synced_total", "Tracks written to the destination.");
        describe_counter!(
            "sync_records_skipped_total",
            "Records skipped: no match, low confidence, duplicate or failed write."
        );
        describe_gauge!("sync_last_cycle_ts", "Unix time of the last finished cycle.");
    });
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Synced { track_id: String, track_name: String },
    NoMatch { reason: String },
    LowConfidence { confidence: f64 },
    Duplicate { track_id: String },
    WriteFailed { reason: String, rate_limited: bool },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSummary {
    pub fetched: usize,
    pub new_records: usize,
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Per-record outcomes keyed by `"artist - title"`, in processing order.
    pub outcomes: Vec<(String, RecordOutcome)>,
    /// Set when the fetch failed and nothing was processed.
    pub fetch_error: Option<String>,
}

impl CycleSummary {
    fn record(&mut self, key: String, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Synced { .. } => self.synced += 1,
            RecordOutcome::WriteFailed { .. } => self.failed += 1,
            _ => self.skipped += 1,
        }
        self.outcomes.push((key, outcome));
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub min_confidence: f64,
    pub base_interval: Duration,
    pub jitter_max: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            base_interval: DEFAULT_BASE_INTERVAL,
            jitter_max: DEFAULT_JITTER_MAX,
        }
    }
}

pub struct SyncScheduler {
    feed: Arc<dyn FeedSource>,
    matcher: CatalogMatcher,
    writer: DestinationWriter,
    dedup: Box<dyn DedupStore>,
    collection: Playlist,
    /// Monthly playlist prefix. Empty pins `collection` for the process lifetime.
    prefix: String,
    cfg: SchedulerConfig,
}

impl SyncScheduler {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        catalog: Arc<dyn CatalogService>,
        collection: Playlist,
        cfg: SchedulerConfig,
    ) -> Self {
        ensure_metrics_described();
        Self {
            feed,
            matcher: CatalogMatcher::new(catalog.clone()),
            writer: DestinationWriter::new(catalog),
            dedup: Box::new(InMemoryDedupStore::new()),
            collection,
            prefix: String::new(),
            cfg,
        }
    }

    /// Swap the process-lifetime dedup store.
    pub fn with_dedup_store(mut self, store: Box<dyn DedupStore>) -> Self {
        self.dedup = store;
        self
    }

    /// Rotate into `"{prefix}-YYYY-MM"` whenever the month in `tz` moves on.
    pub fn with_period(mut self, prefix: impl Into<String>, tz: Tz) -> Self {
        self.prefix = prefix.into();
        self.writer = self.writer.with_timezone(tz);
        self
    }

    pub fn dedup_store(&self) -> &dyn DedupStore {
        self.dedup.as_ref()
    }

    pub fn collection(&self) -> &Playlist {
        &self.collection
    }

    /// Base interval plus a uniform jitter in `[0, jitter_max]`.
    pub fn next_delay(&self) -> Duration {
        let max_ms = self.cfg.jitter_max.as_millis() as u64;
        let jitter = rand::rng().random_range(0..=max_ms);
        self.cfg.base_interval + Duration::from_millis(jitter)
    }

    pub async fn run_once(&mut self) -> CycleSummary {
        let mut cycle = CycleSeen::new();
        self.run_cycle(&mut cycle).await
    }

    /// Initial cycle, then sleep/cycle forever with a fresh cycle map each time.
    pub async fn run_continuous(&mut self) {
        tracing::info!(
            target: "scheduler",
            base_interval_secs = self.cfg.base_interval.as_secs(),
            jitter_max_secs = self.cfg.jitter_max.as_secs(),
            playlist = %self.collection.name,
            "starting continuous sync"
        );
        self.run_once().await;
        loop {
            let delay = self.next_delay();
            let next_at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
            tracing::info!(
                target: "scheduler",
                delay_secs = delay.as_secs(),
                next_sync = %next_at.format("%Y-%m-%d %H:%M:%S"),
                "scheduled next sync"
            );
            tokio::time::sleep(delay).await;
            self.run_once().await;
        }
    }

    pub async fn run_cycle(&mut self, cycle: &mut CycleSeen) -> CycleSummary {
        let today = self.writer.today();
        self.run_cycle_on(today, cycle).await
    }

    /// [`Self::run_cycle`] with `date` deciding which monthly playlist receives writes.
    pub async fn run_cycle_on(&mut self, date: NaiveDate, cycle: &mut CycleSeen) -> CycleSummary {
        counter!("sync_cycles_total").increment(1);
        let mut summary = CycleSummary::default();

        let batch = match self.feed.fetch_latest().await {
            Ok(b) => b,
            Err(e) => {
                counter!("sync_cycle_failures_total").increment(1);
                tracing::error!(
                    target: "scheduler",
                    source = self.feed.name(),
                    error = %e,
                    transient = e.is_transient(),
                    "feed fetch failed, ending cycle"
                );
                summary.fetch_error = Some(e.to_string());
                return summary;
            }
        };
        summary.fetched = batch.len();

        let (fresh, _) = filter_new(batch.records, cycle, self.dedup.as_mut());
        summary.new_records = fresh.len();
        if fresh.is_empty() {
            tracing::debug!(target: "scheduler", fetched = summary.fetched, "no new records");
            self.finish(&summary);
            return summary;
        }
        tracing::info!(target: "scheduler", new_records = fresh.len(), "found new records to sync");
        self.rotate_collection(date).await;

        for (i, rec) in fresh.iter().enumerate() {
            tracing::info!(
                target: "scheduler",
                n = i + 1,
                of = fresh.len(),
                song = %rec.display(),
                "processing record"
            );
            let outcome = self.process_record(rec).await;
            summary.record(rec.seen_key(), outcome);
        }

        self.finish(&summary);
        summary
    }

    /// Switch to the period playlist for `date` if it differs from the current one.
    /// On failure the previous playlist stays in use.
    async fn rotate_collection(&mut self, date: NaiveDate) {
        if self.prefix.is_empty() || period_name(&self.prefix, date) == self.collection.name {
            return;
        }
        match self
            .writer
            .resolve_period_collection_for(&self.prefix, date)
            .await
        {
            Ok(next) => {
                tracing::info!(
                    target: "scheduler",
                    from = %self.collection.name,
                    to = %next.name,
                    id = %next.id,
                    "rotated to new monthly playlist"
                );
                self.collection = next;
            }
            Err(e) => tracing::warn!(
                target: "scheduler",
                playlist = %self.collection.name,
                error = %e,
                "could not resolve monthly playlist, keeping current one"
            ),
        }
    }

    async fn process_record(&self, rec: &FeedRecord) -> RecordOutcome {
        let m = match self
            .matcher
            .find_best_match(&rec.artist, &rec.title, &rec.album)
            .await
        {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(target: "scheduler", song = %rec.display(), error = %e, "no catalog match, skipping");
                return RecordOutcome::NoMatch {
                    reason: e.to_string(),
                };
            }
        };

        if m.overall_confidence < self.cfg.min_confidence {
            tracing::debug!(
                target: "scheduler",
                song = %rec.display(),
                overall_confidence = m.overall_confidence,
                artist_confidence = m.artist_confidence,
                song_confidence = m.song_confidence,
                "low confidence match, skipping"
            );
            return RecordOutcome::LowConfidence {
                confidence: m.overall_confidence,
            };
        }

        let track_id = m.track.id.clone();
        match self
            .writer
            .guard()
            .check_destination(&self.collection.id, std::slice::from_ref(&m.track))
            .await
        {
            Ok(dup) if dup.has_duplicates => {
                tracing::debug!(target: "scheduler", track = %m.track.name, playlist = %self.collection.name, "already in playlist, skipping");
                return RecordOutcome::Duplicate { track_id };
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(
                target: "scheduler",
                playlist = %self.collection.name,
                error = %e,
                "membership check failed, adding anyway"
            ),
        }

        match self
            .writer
            .write(&self.collection.id, std::slice::from_ref(&track_id))
            .await
        {
            Ok(()) => {
                tracing::info!(
                    target: "scheduler",
                    song = %rec.display(),
                    track = %m.track.name,
                    playlist = %self.collection.name,
                    "synced"
                );
                RecordOutcome::Synced {
                    track_id,
                    track_name: m.track.name,
                }
            }
            Err(e) => {
                tracing::warn!(target: "scheduler", song = %rec.display(), error = %e, "write failed");
                RecordOutcome::WriteFailed {
                    rate_limited: matches!(e, WriteError::RateLimited { .. }),
                    reason: e.to_string(),
                }
            }
        }
    }

    fn finish(&self, summary: &CycleSummary) {
        counter!("sync_records_synced_total").increment(summary.synced as u64);
        counter!("sync_records_skipped_total").increment((summary.skipped + summary.failed) as u64);
        gauge!("sync_last_cycle_ts").set(Utc::now().timestamp() as f64);
        tracing::info!(
            target: "scheduler",
            fetched = summary.fetched,
            new_records = summary.new_records,
            synced = summary.synced,
            skipped = summary.skipped,
            failed = summary.failed,
            playlist = %self.collection.name,
            "sync cycle finished"
        );
    }
}
