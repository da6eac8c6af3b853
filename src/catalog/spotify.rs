// src/catalog/spotify.rs
//! Spotify Web API implementation of [`CatalogService`]. Takes an already-issued bearer token.

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

use super::{Album, Artist, CatalogError, CatalogService, Playlist, Track, TOP_TRACKS_LIMIT};

const PAGE_LIMIT: u32 = 50;
const ITEMS_PAGE_LIMIT: u32 = 100;
const EMBED_BASE: &str = "https://open.spotify.com/embed/playlist/";

#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub api_base: Url,
    pub access_token: String,
    pub market: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct SpotifyCatalog {
    http: Client,
    cfg: SpotifyConfig,
}

// --- wire shapes ---

#[derive(Debug, Deserialize)]
struct ApiArtist {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    genres: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiAlbum {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    album_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    #[serde(default)]
    duration_ms: u32,
    #[serde(default)]
    album: ApiAlbum,
}

#[derive(Debug, Deserialize)]
struct ArtistSearch {
    artists: Page<ApiArtist>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    items: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TopTracks {
    tracks: Vec<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Owner {
    id: String,
}

#[derive(Debug, Deserialize, Default)]
struct TrackTotal {
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct ApiPlaylist {
    id: String,
    name: String,
    #[serde(default)]
    uri: String,
    owner: Owner,
    #[serde(default)]
    tracks: TrackTotal,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    #[serde(default)]
    track: Option<ItemTrack>,
}

#[derive(Debug, Deserialize)]
struct ItemTrack {
    #[serde(default)]
    id: Option<String>,
}

impl From<ApiArtist> for Artist {
    fn from(a: ApiArtist) -> Self {
        Artist {
            id: a.id.unwrap_or_default(),
            name: a.name,
            uri: a.uri.unwrap_or_default(),
            genres: a.genres,
        }
    }
}

impl From<ApiTrack> for Track {
    fn from(t: ApiTrack) -> Self {
        Track {
            id: t.id.unwrap_or_default(),
            name: t.name,
            uri: t.uri.unwrap_or_default(),
            artists: t.artists.into_iter().map(Artist::from).collect(),
            duration_ms: t.duration_ms,
            album: Album {
                id: t.album.id.unwrap_or_default(),
                name: t.album.name,
                kind: t.album.album_type.unwrap_or_default(),
            },
        }
    }
}

fn to_playlist(p: ApiPlaylist) -> Playlist {
    Playlist {
        embed_url: format!("{EMBED_BASE}{}", p.id),
        id: p.id,
        name: p.name,
        uri: p.uri,
        track_count: p.tracks.total,
        is_incoming: false,
    }
}

/// Map a non-success response into a structured error kind.
async fn check(resp: Response) -> Result<Response, CatalogError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = resp
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        return Err(CatalogError::RateLimited { retry_after_secs });
    }
    let message = resp.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CatalogError::Unauthorized(message),
        StatusCode::NOT_FOUND => CatalogError::NotFound(message),
        _ => CatalogError::Status {
            status: status.as_u16(),
            message,
        },
    })
}

impl SpotifyCatalog {
    pub fn new(cfg: SpotifyConfig) -> Result<Self, CatalogError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        let http = Client::builder()
            .timeout(cfg.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| CatalogError::Transport(format!("build client: {e}")))?;

        let mut cfg = cfg;
        if !cfg.api_base.path().ends_with('/') {
            let path = format!("{}/", cfg.api_base.path());
            cfg.api_base.set_path(&path);
        }
        Ok(Self { http, cfg })
    }

    fn url(&self, path: &str) -> Result<Url, CatalogError> {
        self.cfg
            .api_base
            .join(path)
            .map_err(|e| CatalogError::Transport(format!("bad path {path}: {e}")))
    }

    fn get(&self, url: Url) -> RequestBuilder {
        self.http.get(url).bearer_auth(&self.cfg.access_token)
    }

    fn post(&self, url: Url) -> RequestBuilder {
        self.http.post(url).bearer_auth(&self.cfg.access_token)
    }

    async fn current_user(&self) -> Result<CurrentUser, CatalogError> {
        let resp = self.get(self.url("me")?).send().await?;
        Ok(check(resp).await?.json::<CurrentUser>().await?)
    }

    /// Follow `next` links until the page chain ends.
    async fn all_pages<T: for<'de> Deserialize<'de>>(
        &self,
        first: Url,
    ) -> Result<Vec<T>, CatalogError> {
        let mut out = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next.take() {
            let resp = self.get(url).send().await?;
            let page: Page<T> = check(resp).await?.json().await?;
            out.extend(page.items);
            next = match page.next {
                Some(n) => Some(
                    Url::parse(&n).map_err(|e| CatalogError::Decode(format!("next link: {e}")))?,
                ),
                None => None,
            };
        }
        Ok(out)
    }
}

#[async_trait]
impl CatalogService for SpotifyCatalog {
    async fn search_artist(&self, query: &str) -> Result<Artist, CatalogError> {
        let url = self.url("search")?;
        let resp = self
            .get(url)
            .query(&[("q", query), ("type", "artist"), ("limit", "1")])
            .send()
            .await?;
        let found: ArtistSearch = check(resp).await?.json().await?;
        let artist = found
            .artists
            .items
            .into_iter()
            .next()
            .map(Artist::from)
            .ok_or_else(|| CatalogError::NotFound(format!("no artists found for query: {query}")))?;
        tracing::debug!(target: "catalog", query, artist_id = %artist.id, artist = %artist.name, "artist search");
        Ok(artist)
    }

    async fn artist_top_tracks(&self, artist_id: &str) -> Result<Vec<Track>, CatalogError> {
        let url = self.url(&format!("artists/{artist_id}/top-tracks"))?;
        let resp = self
            .get(url)
            .query(&[("market", self.cfg.market.as_str())])
            .send()
            .await?;
        let top: TopTracks = check(resp).await?.json().await?;
        let tracks: Vec<Track> = top
            .tracks
            .into_iter()
            .take(TOP_TRACKS_LIMIT)
            .map(Track::from)
            .collect();
        tracing::debug!(target: "catalog", artist_id, found = tracks.len(), "top tracks");
        Ok(tracks)
    }

    async fn user_playlists(&self, folder_hint: &str) -> Result<Vec<Playlist>, CatalogError> {
        let me = self.current_user().await?;
        let mut url = self.url("me/playlists")?;
        url.query_pairs_mut()
            .append_pair("limit", &PAGE_LIMIT.to_string());
        let all: Vec<ApiPlaylist> = self.all_pages(url).await?;
        let total = all.len();
        let owned: Vec<Playlist> = all
            .into_iter()
            .filter(|p| p.owner.id == me.id)
            .map(to_playlist)
            .collect();
        tracing::debug!(
            target: "catalog",
            folder_hint,
            total,
            owned = owned.len(),
            "user playlists"
        );
        Ok(owned)
    }

    async fn add_tracks_to_playlist(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), CatalogError> {
        let uris: Vec<String> = track_ids
            .iter()
            .map(|id| format!("spotify:track:{id}"))
            .collect();
        let url = self.url(&format!("playlists/{playlist_id}/tracks"))?;
        let resp = self.post(url).json(&json!({ "uris": uris })).send().await?;
        check(resp).await?;
        Ok(())
    }

    async fn check_tracks_in_playlist(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<Vec<bool>, CatalogError> {
        if track_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut url = self.url(&format!("playlists/{playlist_id}/tracks"))?;
        url.query_pairs_mut()
            .append_pair("fields", "items(track(id)),next")
            .append_pair("limit", &ITEMS_PAGE_LIMIT.to_string());
        let items: Vec<PlaylistItem> = self.all_pages(url).await?;
        let existing: std::collections::HashSet<String> = items
            .into_iter()
            .filter_map(|it| it.track.and_then(|t| t.id))
            .filter(|id| !id.is_empty())
            .collect();
        Ok(track_ids.iter().map(|id| existing.contains(id)).collect())
    }

    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<Playlist, CatalogError> {
        let me = self.current_user().await?;
        let url = self.url(&format!("users/{}/playlists", me.id))?;
        let body = json!({ "name": name, "description": description, "public": public });
        let resp = self.post(url).json(&body).send().await?;
        let created: ApiPlaylist = check(resp).await?.json().await?;
        let playlist = to_playlist(created);
        tracing::info!(target: "catalog", playlist_id = %playlist.id, name = %playlist.name, "playlist created");
        Ok(playlist)
    }
}
