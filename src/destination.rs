// src/destination.rs
//! Monthly destination playlists and batch writes into them.

use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::catalog::{Artist, CatalogError, CatalogService, Playlist, Track};
use crate::dedup::DuplicateGuard;

/// Folder name the service would use for grouping, if folders were reachable through its API.
pub const INCOMING_FOLDER: &str = "Incoming";

pub const RATE_LIMITED_MESSAGE: &str = "Rate limited by the catalog service. Please try again later.";

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("{message}")]
    RateLimited { message: String },
    #[error("no tracks to write")]
    EmptyBatch,
    #[error("failed to add tracks to playlist: {0}")]
    Failed(#[source] CatalogError),
}

impl From<CatalogError> for WriteError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::RateLimited { .. } => WriteError::RateLimited {
                message: RATE_LIMITED_MESSAGE.to_string(),
            },
            other => WriteError::Failed(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum DestinationError {
    #[error("no playlists found and no prefix configured; create a playlist or set SPOTIFY_PLAYLIST_NAME_PREFIX")]
    NoCollections,
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Outcome of the interactive add-artist path.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AddResult {
    pub success: bool,
    pub artist: Artist,
    pub tracks_added: Vec<Track>,
    pub collection: String,
    pub was_duplicate: bool,
    pub message: String,
}

/// `"{prefix}-{year}-{month:02}"`, e.g. `KMHD-2025-10`.
pub fn period_name(prefix: &str, date: NaiveDate) -> String {
    format!("{}-{:04}-{:02}", prefix, date.year(), date.month())
}

fn period_description(prefix: &str, date: NaiveDate) -> String {
    format!(
        "Radio plays for {}. Move into the '{}' folder to keep things organized.",
        date.format("%B %Y"),
        prefix
    )
}

pub struct DestinationWriter {
    catalog: Arc<dyn CatalogService>,
    guard: DuplicateGuard,
    timezone: Tz,
}

impl DestinationWriter {
    pub fn new(catalog: Arc<dyn CatalogService>) -> Self {
        Self {
            guard: DuplicateGuard::new(catalog.clone()),
            catalog,
            timezone: chrono_tz::America::Los_Angeles,
        }
    }

    /// Timezone that decides which month "now" falls in.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.timezone = tz;
        self
    }

    /// Membership checks share this guard with every other caller of the writer.
    pub fn guard(&self) -> &DuplicateGuard {
        &self.guard
    }

    /// Current date in the writer's timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    pub async fn resolve_or_create_period_collection(
        &self,
        prefix: &str,
    ) -> Result<Playlist, DestinationError> {
        self.resolve_period_collection_for(prefix, self.today()).await
    }

    /// Same as [`Self::resolve_or_create_period_collection`] for an explicit date.
    pub async fn resolve_period_collection_for(
        &self,
        prefix: &str,
        date: NaiveDate,
    ) -> Result<Playlist, DestinationError> {
        let playlists = self.catalog.user_playlists("").await?;

        if prefix.is_empty() {
            let first = playlists
                .into_iter()
                .next()
                .ok_or(DestinationError::NoCollections)?;
            tracing::warn!(
                target: "destination",
                playlist = %first.name,
                "no playlist prefix configured, using first playlist"
            );
            return Ok(first);
        }

        let name = period_name(prefix, date);
        if let Some(existing) = playlists.into_iter().find(|p| p.name == name) {
            tracing::info!(target: "destination", playlist = %existing.name, id = %existing.id, "using existing monthly playlist");
            return Ok(existing);
        }

        let description = period_description(prefix, date);
        let created = self
            .catalog
            .create_playlist(&name, &description, false)
            .await?;
        tracing::info!(
            target: "destination",
            playlist = %created.name,
            id = %created.id,
            folder_hint = prefix,
            "created monthly playlist"
        );
        tracing::info!(
            target: "destination",
            folder = prefix,
            playlist = %created.name,
            "folders cannot be managed through the API; create a folder named '{prefix}' in the desktop app and move the playlist into it"
        );
        Ok(created)
    }

    /// All owned playlists, flagged as incoming. The service cannot filter by folder,
    /// so the "Incoming" hint does not narrow the list.
    pub async fn incoming_collections(&self) -> Result<Vec<Playlist>, CatalogError> {
        let mut playlists = self.catalog.user_playlists(INCOMING_FOLDER).await?;
        for p in &mut playlists {
            p.is_incoming = true;
        }
        tracing::info!(target: "destination", count = playlists.len(), "fetched incoming playlists");
        Ok(playlists)
    }

    /// Submit all ids in one batch call.
    pub async fn write(&self, collection_id: &str, track_ids: &[String]) -> Result<(), WriteError> {
        if track_ids.is_empty() {
            return Err(WriteError::EmptyBatch);
        }
        self.catalog
            .add_tracks_to_playlist(collection_id, track_ids)
            .await
            .map_err(|e| {
                let err = WriteError::from(e);
                match &err {
                    WriteError::RateLimited { .. } => tracing::warn!(
                        target: "destination",
                        collection_id,
                        event = "rate_limit_hit",
                        "catalog rate limit encountered"
                    ),
                    _ => tracing::error!(
                        target: "destination",
                        collection_id,
                        tracks = track_ids.len(),
                        error = %err,
                        "failed to add tracks"
                    ),
                }
                err
            })?;
        tracing::debug!(target: "destination", collection_id, tracks = track_ids.len(), "tracks added");
        Ok(())
    }

    /// Add an artist's top tracks. Unless `force` is set, existing membership vetoes the write.
    pub async fn add_artist(&self, artist_name: &str, collection_id: &str, force: bool) -> AddResult {
        tracing::info!(target: "destination", artist_name, collection_id, force, "adding artist to playlist");
        let mut result = AddResult {
            collection: collection_id.to_string(),
            ..Default::default()
        };

        let artist = match self.catalog.search_artist(artist_name).await {
            Ok(a) => a,
            Err(e) => {
                tracing::error!(target: "destination", artist_name, error = %e, "artist search failed");
                result.message = format!("Failed to find artist: {e}");
                return result;
            }
        };
        result.artist = artist.clone();

        let tracks = match self.catalog.artist_top_tracks(&artist.id).await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(target: "destination", artist_id = %artist.id, error = %e, "top tracks lookup failed");
                result.message = format!("Failed to get artist's top tracks: {e}");
                return result;
            }
        };
        if tracks.is_empty() {
            tracing::warn!(target: "destination", artist = %artist.name, "artist has no tracks available");
            result.message = "Artist has no tracks available".into();
            return result;
        }

        if !force {
            match self
                .guard
                .check_artist_in_destination(collection_id, &artist.id)
                .await
            {
                Ok(dup) if dup.has_duplicates => {
                    tracing::info!(target: "destination", artist = %artist.name, collection_id, "artist already in playlist");
                    result.was_duplicate = true;
                    result.message = dup.message;
                    return result;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    target: "destination",
                    artist_id = %artist.id,
                    error = %e,
                    "duplicate check failed, proceeding anyway"
                ),
            }
        }

        let ids: Vec<String> = tracks.iter().map(|t| t.id.clone()).collect();
        result.tracks_added = tracks;
        match self.write(collection_id, &ids).await {
            Ok(()) => {
                tracing::info!(target: "destination", artist = %artist.name, collection_id, tracks = ids.len(), "artist tracks added");
                result.success = true;
                result.message = format!("Successfully added {}'s top tracks to playlist", artist.name);
            }
            Err(WriteError::RateLimited { message }) => result.message = message,
            Err(e) => result.message = e.to_string(),
        }
        result
    }
}
