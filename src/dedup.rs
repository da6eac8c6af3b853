// src/dedup.rs
//! Two layers of duplicate suppression:
//! - in-memory `seen` keys, per cycle and for the process lifetime (scheduler only)
//! - destination membership checks against the catalog ([`DuplicateGuard`])

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::catalog::{CatalogError, CatalogService, Track};
use crate::ingest::FeedRecord;

/// Keys already handled, outliving a single cycle.
pub trait DedupStore: Send + Sync {
    fn seen(&self, key: &str) -> bool;
    fn mark(&mut self, key: &str);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default store: a plain map from key to first-seen time. Never pruned.
#[derive(Debug, Default)]
pub struct InMemoryDedupStore {
    first_seen: HashMap<String, DateTime<Utc>>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first_seen(&self, key: &str) -> Option<DateTime<Utc>> {
        self.first_seen.get(key).copied()
    }
}

impl DedupStore for InMemoryDedupStore {
    fn seen(&self, key: &str) -> bool {
        self.first_seen.contains_key(key)
    }

    fn mark(&mut self, key: &str) {
        self.first_seen
            .entry(key.to_string())
            .or_insert_with(Utc::now);
    }

    fn len(&self) -> usize {
        self.first_seen.len()
    }
}

/// Keys handled during the current cycle. A fresh one is allocated per cycle.
pub type CycleSeen = HashSet<String>;

/// True if `key` was already handled this cycle or earlier in the process; otherwise marks it in both.
pub fn seen(key: &str, cycle: &mut CycleSeen, store: &mut dyn DedupStore) -> bool {
    if cycle.contains(key) || store.seen(key) {
        return true;
    }
    cycle.insert(key.to_string());
    store.mark(key);
    false
}

/// Keep only valid records not seen before, in feed order. Returns (new records, skipped count).
pub fn filter_new(
    records: Vec<FeedRecord>,
    cycle: &mut CycleSeen,
    store: &mut dyn DedupStore,
) -> (Vec<FeedRecord>, usize) {
    let total = records.len();
    let fresh: Vec<FeedRecord> = records
        .into_iter()
        .filter(|r| r.is_valid() && !seen(&r.seen_key(), cycle, store))
        .collect();
    let skipped = total - fresh.len();
    tracing::debug!(target: "dedup", total, new = fresh.len(), skipped, "filtered seen records");
    (fresh, skipped)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DuplicateResult {
    pub has_duplicates: bool,
    pub duplicate_tracks: Vec<Track>,
    pub last_added: Option<DateTime<Utc>>,
    pub artist_name: String,
    pub message: String,
}

/// Membership checks against a destination playlist.
pub struct DuplicateGuard {
    catalog: Arc<dyn CatalogService>,
}

impl DuplicateGuard {
    pub fn new(catalog: Arc<dyn CatalogService>) -> Self {
        Self { catalog }
    }

    pub async fn check_destination(
        &self,
        collection_id: &str,
        tracks: &[Track],
    ) -> Result<DuplicateResult, CatalogError> {
        if tracks.is_empty() {
            tracing::debug!(target: "dedup", collection_id, "no tracks to check");
            return Ok(DuplicateResult {
                message: "No tracks to check".into(),
                ..Default::default()
            });
        }

        let ids: Vec<String> = tracks.iter().map(|t| t.id.clone()).collect();
        let present = self
            .catalog
            .check_tracks_in_playlist(collection_id, &ids)
            .await
            .inspect_err(|e| {
                tracing::error!(target: "dedup", collection_id, error = %e, "membership check failed")
            })?;

        // zip tolerates a short answer from the service
        let duplicates: Vec<Track> = tracks
            .iter()
            .zip(present)
            .filter_map(|(t, hit)| hit.then(|| t.clone()))
            .collect();

        if duplicates.is_empty() {
            tracing::debug!(target: "dedup", collection_id, checked = tracks.len(), "no duplicates");
            return Ok(DuplicateResult {
                last_added: Some(Utc::now()),
                message: "No duplicate tracks found".into(),
                ..Default::default()
            });
        }

        let names: Vec<&str> = duplicates.iter().map(|t| t.name.as_str()).collect();
        let message = format!(
            "Found {} duplicate track(s): {}",
            duplicates.len(),
            names.join(", ")
        );
        tracing::info!(
            target: "dedup",
            collection_id,
            duplicates = duplicates.len(),
            checked = tracks.len(),
            tracks = ?names,
            "duplicate tracks detected"
        );
        Ok(DuplicateResult {
            has_duplicates: true,
            duplicate_tracks: duplicates,
            last_added: Some(Utc::now()),
            artist_name: String::new(),
            message,
        })
    }

    /// Check an artist's top tracks against the playlist, with an override hint on duplicates.
    pub async fn check_artist_in_destination(
        &self,
        collection_id: &str,
        artist_id: &str,
    ) -> Result<DuplicateResult, CatalogError> {
        let tracks = self.catalog.artist_top_tracks(artist_id).await?;
        if tracks.is_empty() {
            tracing::debug!(target: "dedup", artist_id, "artist has no tracks to check");
            return Ok(DuplicateResult {
                message: "Artist has no tracks".into(),
                ..Default::default()
            });
        }

        let artist_name = tracks[0].primary_artist().unwrap_or_default().to_string();
        let mut result = self.check_destination(collection_id, &tracks).await?;
        result.message = if result.has_duplicates {
            let when = result
                .last_added
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            format!(
                "Artist '{artist_name}' already has {} track(s) in this playlist (last added: {when}). \
                 Use force to add anyway.",
                result.duplicate_tracks.len()
            )
        } else {
            format!("Artist '{artist_name}' tracks not found in playlist, safe to add")
        };
        result.artist_name = artist_name;
        Ok(result)
    }
}
