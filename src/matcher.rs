// src/matcher.rs
//! Fuzzy catalog matching: find the catalog track that best fits a feed record.
//!
//! Overall confidence = 0.5*artist + 0.35*song + 0.15*album, every component in [0,1].
//! Only the top hit of the artist search is considered, and only that artist's top tracks are scored.

use serde::Serialize;
use std::sync::Arc;
use strsim::normalized_levenshtein;
use thiserror::Error;

use crate::catalog::{Artist, CatalogError, CatalogService, Track};

pub const ARTIST_WEIGHT: f64 = 0.5;
pub const SONG_WEIGHT: f64 = 0.35;
pub const ALBUM_WEIGHT: f64 = 0.15;

/// Album score used when there is nothing to compare.
pub const NEUTRAL_ALBUM_CONFIDENCE: f64 = 0.5;

pub const HIGH_CONFIDENCE: f64 = 0.8;
pub const LOW_CONFIDENCE: f64 = 0.5;

const FUZZY_FLOOR: f64 = 0.1;
const FUZZY_CEIL: f64 = 0.7;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("artist query cannot be empty")]
    EmptyArtistQuery,
    #[error("no artist found for {0:?}")]
    NoArtist(String),
    #[error("no tracks found for artist {0}")]
    NoTracks(String),
    #[error("catalog lookup failed: {0}")]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone, Serialize)]
pub struct SongMatch {
    pub artist: Artist,
    pub track: Track,
    pub artist_query: String,
    pub song_query: String,
    pub album_query: String,
    pub artist_confidence: f64,
    pub song_confidence: f64,
    pub album_confidence: f64,
    pub overall_confidence: f64,
}

impl SongMatch {
    pub fn is_high_confidence(&self) -> bool {
        self.overall_confidence >= HIGH_CONFIDENCE
    }

    pub fn is_low_confidence(&self) -> bool {
        self.overall_confidence < LOW_CONFIDENCE
    }
}

pub fn overall_confidence(artist: f64, song: f64, album: f64) -> f64 {
    artist * ARTIST_WEIGHT + song * SONG_WEIGHT + album * ALBUM_WEIGHT
}

/// How well `candidate` matches `query`, in [0,1]. Case-insensitive, trimmed.
///
/// - exact: 1.0
/// - candidate contains query: 0.8..=1.0 by length ratio
/// - query contains candidate: 0.7..=0.9 by length ratio
/// - otherwise edit-distance similarity scaled into [0.1, 0.7]; 0.1 when nothing lines up
pub fn match_confidence(query: &str, candidate: &str) -> f64 {
    let q = query.trim().to_lowercase();
    let c = candidate.trim().to_lowercase();

    if q == c {
        return 1.0;
    }

    let q_len = q.chars().count() as f64;
    let c_len = c.chars().count() as f64;

    if c.contains(&q) {
        return 0.8 + 0.2 * (q_len / c_len);
    }
    if q.contains(&c) {
        return 0.7 + 0.2 * (c_len / q_len);
    }

    let raw = normalized_levenshtein(&q, &c);
    if raw <= 0.0 {
        return FUZZY_FLOOR;
    }
    (raw * FUZZY_CEIL).clamp(FUZZY_FLOOR, FUZZY_CEIL)
}

/// Album agreement. Neutral when either side has no album, so missing data neither helps nor hurts.
pub fn album_confidence(album_query: &str, track: &Track) -> f64 {
    if album_query.trim().is_empty() || track.album.name.trim().is_empty() {
        return NEUTRAL_ALBUM_CONFIDENCE;
    }
    match_confidence(album_query, &track.album.name)
}

pub struct CatalogMatcher {
    catalog: Arc<dyn CatalogService>,
}

impl CatalogMatcher {
    pub fn new(catalog: Arc<dyn CatalogService>) -> Self {
        Self { catalog }
    }

    pub async fn find_best_match(
        &self,
        artist_query: &str,
        song_query: &str,
        album_query: &str,
    ) -> Result<SongMatch, MatchError> {
        if artist_query.trim().is_empty() {
            return Err(MatchError::EmptyArtistQuery);
        }

        let artist = match self.catalog.search_artist(artist_query).await {
            Ok(a) => a,
            Err(CatalogError::NotFound(_)) => {
                return Err(MatchError::NoArtist(artist_query.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let artist_confidence = match_confidence(artist_query, &artist.name);

        let tracks = self.catalog.artist_top_tracks(&artist.id).await?;
        if tracks.is_empty() {
            return Err(MatchError::NoTracks(artist.name));
        }

        let (best, song_confidence, album_conf) = if song_query.trim().is_empty() {
            (0, 1.0, album_confidence(album_query, &tracks[0]))
        } else {
            pick_best_track(&tracks, artist_confidence, song_query, album_query)
        };
        let overall = overall_confidence(artist_confidence, song_confidence, album_conf);

        let track = tracks[best].clone();
        tracing::info!(
            target: "matcher",
            artist_query,
            song_query,
            matched_artist = %artist.name,
            matched_song = %track.name,
            overall_confidence = overall,
            "found song match"
        );
        if !album_query.is_empty() {
            tracing::debug!(
                target: "matcher",
                album_query,
                matched_album = %track.album.name,
                artist_confidence,
                song_confidence,
                album_confidence = album_conf,
                "album matching details"
            );
        }

        Ok(SongMatch {
            artist,
            track,
            artist_query: artist_query.to_string(),
            song_query: song_query.to_string(),
            album_query: album_query.to_string(),
            artist_confidence,
            song_confidence,
            album_confidence: album_conf,
            overall_confidence: overall,
        })
    }
}

/// Index, song confidence and album confidence of the highest-scoring track. Ties keep the earlier track.
fn pick_best_track(
    tracks: &[Track],
    artist_confidence: f64,
    song_query: &str,
    album_query: &str,
) -> (usize, f64, f64) {
    let mut best = (0, 0.0, 0.0);
    let mut best_overall = f64::NEG_INFINITY;
    for (i, t) in tracks.iter().enumerate() {
        let song = match_confidence(song_query, &t.name);
        let album = album_confidence(album_query, t);
        let overall = overall_confidence(artist_confidence, song, album);
        if overall > best_overall {
            best_overall = overall;
            best = (i, song, album);
        }
    }
    best
}
