// src/ingest/parse.rs
//! Tolerant parsing of feed entries. Each entry is tried against known shapes in order
//! (complete → minimal → generic map); one bad entry never fails the batch.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use metrics::counter;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::types::{FeedBatch, FeedRecord};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordParseError {
    #[error("entry matches no known shape: {0}")]
    Malformed(String),
    #[error("missing required fields: artistName={artist:?}, trackName={title:?}")]
    MissingFields { artist: String, title: String },
}

// --- known entry shapes ---

/// Full entry with the storefront metadata some plays carry.
#[derive(Debug, Deserialize)]
#[allow(dead_code)] // metadata fields are accepted but unused by matching
struct CompleteEntry {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_duration")]
    duration: i64,
    #[serde(rename = "_start_time")]
    start_time: String,
    #[serde(rename = "artistName")]
    artist_name: String,
    #[serde(rename = "trackName")]
    track_name: String,
    #[serde(rename = "collectionName", default)]
    collection_name: Option<String>,
    #[serde(rename = "artistId", default)]
    artist_id: Option<i64>,
    #[serde(rename = "collectionId", default)]
    collection_id: Option<i64>,
    #[serde(rename = "trackId", default)]
    track_id: Option<i64>,
    #[serde(rename = "previewUrl", default)]
    preview_url: Option<String>,
    #[serde(rename = "artworkUrl100", default)]
    artwork_url: Option<String>,
    #[serde(rename = "releaseDate", default)]
    release_date: Option<String>,
    #[serde(rename = "primaryGenreName", default)]
    primary_genre: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MinimalEntry {
    #[serde(rename = "artistName")]
    artist_name: String,
    #[serde(rename = "trackName")]
    track_name: String,
    #[serde(rename = "collectionName", default)]
    collection_name: Option<String>,
    #[serde(rename = "_start_time", default)]
    start_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Complete(CompleteEntry),
    Minimal(MinimalEntry),
    Generic(Map<String, Value>),
}

struct EntryFields {
    artist: String,
    title: String,
    album: String,
    start_time: Option<String>,
}

fn str_field(map: &Map<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl RawEntry {
    fn into_fields(self) -> EntryFields {
        match self {
            RawEntry::Complete(c) => EntryFields {
                artist: c.artist_name,
                title: c.track_name,
                album: c.collection_name.unwrap_or_default(),
                start_time: Some(c.start_time),
            },
            RawEntry::Minimal(m) => EntryFields {
                artist: m.artist_name,
                title: m.track_name,
                album: m.collection_name.unwrap_or_default(),
                start_time: m.start_time,
            },
            RawEntry::Generic(map) => EntryFields {
                artist: str_field(&map, "artistName"),
                title: str_field(&map, "trackName"),
                album: str_field(&map, "collectionName"),
                start_time: map
                    .get("_start_time")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
        }
    }
}

// --- timestamps ---

enum TsFormat {
    Rfc3339,
    /// Pattern carries its own offset.
    WithOffset(&'static str),
    /// Pattern ends in a literal `Z`.
    Utc(&'static str),
    /// No offset at all: read as wall time in the feed's timezone.
    FeedLocal(&'static str),
}

const TIMESTAMP_FORMATS: &[TsFormat] = &[
    TsFormat::Rfc3339,
    TsFormat::WithOffset("%Y-%m-%dT%H:%M:%S%.f%:z"),
    TsFormat::WithOffset("%Y-%m-%dT%H:%M:%S%.f%z"),
    TsFormat::Utc("%Y-%m-%dT%H:%M:%S%.fZ"),
    TsFormat::FeedLocal("%Y-%m-%dT%H:%M:%S%.f"),
];

/// Try each known ISO-8601 shape in order. `None` when nothing fits.
pub fn parse_timestamp(ts: &str, feed_tz: Tz) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    for fmt in TIMESTAMP_FORMATS {
        let parsed = match fmt {
            TsFormat::Rfc3339 => DateTime::parse_from_rfc3339(ts)
                .ok()
                .map(|d| d.with_timezone(&Utc)),
            TsFormat::WithOffset(p) => DateTime::parse_from_str(ts, p)
                .ok()
                .map(|d| d.with_timezone(&Utc)),
            TsFormat::Utc(p) => NaiveDateTime::parse_from_str(ts, p)
                .ok()
                .map(|n| Utc.from_utc_datetime(&n)),
            TsFormat::FeedLocal(p) => NaiveDateTime::parse_from_str(ts, p)
                .ok()
                .and_then(|n| feed_tz.from_local_datetime(&n).earliest())
                .map(|d| d.with_timezone(&Utc)),
        };
        if parsed.is_some() {
            return parsed;
        }
    }
    None
}

// --- entries ---

/// Parse one raw entry into a record. Strings are trimmed before validation.
pub fn parse_entry(raw: &Value, feed_tz: Tz) -> Result<FeedRecord, RecordParseError> {
    let entry: RawEntry = serde_json::from_value(raw.clone())
        .map_err(|e| RecordParseError::Malformed(e.to_string()))?;
    let fields = entry.into_fields();

    let record = FeedRecord {
        artist: fields.artist.trim().to_string(),
        title: fields.title.trim().to_string(),
        album: fields.album.trim().to_string(),
        played_at: played_at(fields.start_time.as_deref(), feed_tz),
        raw_text: raw.to_string(),
    };
    if !record.is_valid() {
        return Err(RecordParseError::MissingFields {
            artist: record.artist,
            title: record.title,
        });
    }
    Ok(record)
}

fn played_at(start_time: Option<&str>, feed_tz: Tz) -> DateTime<Utc> {
    match start_time.filter(|s| !s.trim().is_empty()) {
        Some(ts) => parse_timestamp(ts, feed_tz).unwrap_or_else(|| {
            tracing::warn!(target: "ingest", timestamp = ts, "unparseable timestamp, using now");
            Utc::now()
        }),
        None => Utc::now(),
    }
}

/// Parse a whole feed response, skipping (and logging) entries that do not yield a valid record.
/// Output order follows the feed.
pub fn parse_entries(entries: &[Value], feed_tz: Tz, source: &str) -> FeedBatch {
    let mut batch = FeedBatch::new(source);
    batch.records.reserve(entries.len());

    for (index, raw) in entries.iter().enumerate() {
        match parse_entry(raw, feed_tz) {
            Ok(rec) => {
                tracing::debug!(target: "ingest", index, song = %rec.display(), "parsed record");
                batch.records.push(rec);
            }
            Err(e) => {
                tracing::warn!(target: "ingest", index, error = %e, "skipping feed entry");
                counter!("ingest_records_rejected_total").increment(1);
            }
        }
    }
    counter!("ingest_records_total").increment(batch.records.len() as u64);
    batch
}
