// src/catalog/mod.rs
//! Catalog/destination service boundary: the music service we search for artists and tracks and
//! whose playlists we write into. Authentication is assumed to be settled before any call here.

pub mod spotify;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Integrations cap an artist's top tracks to this many entries.
pub const TOP_TRACKS_LIMIT: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    #[serde(rename = "album_type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub duration_ms: u32,
    #[serde(default)]
    pub album: Album,
}

impl Track {
    /// Name of the first credited artist, if any.
    pub fn primary_artist(&self) -> Option<&str> {
        self.artists.first().map(|a| a.name.as_str())
    }
}

/// A destination collection (playlist) owned by the catalog service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub uri: String,
    pub track_count: u32,
    pub embed_url: String,
    pub is_incoming: bool,
}

/// Failure kinds surfaced by a catalog implementation. Rate limiting is a kind of its own so callers
/// never need to inspect message text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited by catalog service (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("catalog rejected credentials: {0}")]
    Unauthorized(String),
    #[error("catalog returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("catalog transport error: {0}")]
    Transport(String),
    #[error("catalog response could not be decoded: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CatalogError::Decode(e.to_string())
        } else {
            CatalogError::Transport(e.to_string())
        }
    }
}

/// Operations the sync engine needs from the catalog service.
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Best search hit for `query`; no disambiguation among several candidates.
    async fn search_artist(&self, query: &str) -> Result<Artist, CatalogError>;

    /// At most [`TOP_TRACKS_LIMIT`] tracks, most popular first.
    async fn artist_top_tracks(&self, artist_id: &str) -> Result<Vec<Track>, CatalogError>;

    /// Playlists owned by the current user. `folder_hint` is advisory; the service has no folders API.
    async fn user_playlists(&self, folder_hint: &str) -> Result<Vec<Playlist>, CatalogError>;

    async fn add_tracks_to_playlist(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), CatalogError>;

    /// Membership flags in the same order and length as `track_ids`.
    async fn check_tracks_in_playlist(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<Vec<bool>, CatalogError>;

    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<Playlist, CatalogError>;
}

/// Case-insensitive name filter over playlists. An empty term keeps everything.
pub fn filter_collections_by_search(playlists: &[Playlist], term: &str) -> Vec<Playlist> {
    if term.is_empty() {
        return playlists.to_vec();
    }
    let needle = term.to_lowercase();
    let out: Vec<Playlist> = playlists
        .iter()
        .filter(|p| p.name.to_lowercase().contains(&needle))
        .cloned()
        .collect();
    tracing::debug!(
        target: "destination",
        term,
        original = playlists.len(),
        filtered = out.len(),
        "playlist filter"
    );
    out
}
