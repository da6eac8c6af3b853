// src/ingest/types.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::client::FetchError;

/// One play from the now-playing feed, normalized. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedRecord {
    pub artist: String,
    pub title: String,
    pub album: String,
    pub played_at: DateTime<Utc>,
    pub raw_text: String, // original JSON of the entry
}

impl FeedRecord {
    /// Artist and title must both be non-empty. Whitespace-only counts as non-empty.
    pub fn is_valid(&self) -> bool {
        !self.artist.is_empty() && !self.title.is_empty()
    }

    /// Dedup key: `"artist - title"`.
    pub fn seen_key(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }

    pub fn display(&self) -> String {
        if self.album.is_empty() {
            format!("{} - {}", self.artist, self.title)
        } else {
            format!("{} - {} ({})", self.artist, self.title, self.album)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedBatch {
    pub records: Vec<FeedRecord>,
    pub last_updated: DateTime<Utc>,
    pub source: String,
}

impl FeedBatch {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            last_updated: Utc::now(),
            source: source.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Case-insensitive substring search over artist, title, album and raw text, in feed order.
    pub fn search(&self, query: &str) -> Vec<&FeedRecord> {
        let q = query.to_lowercase();
        self.records
            .iter()
            .filter(|r| {
                r.artist.to_lowercase().contains(&q)
                    || r.title.to_lowercase().contains(&q)
                    || r.album.to_lowercase().contains(&q)
                    || r.raw_text.to_lowercase().contains(&q)
            })
            .collect()
    }
}

/// Anything that can hand the scheduler a batch of plays for "now".
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_latest(&self) -> Result<FeedBatch, FetchError>;
    fn name(&self) -> &'static str;
}
