// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use nowplaying_sync::catalog::{Album, Artist, CatalogError, CatalogService, Playlist, Track};
use nowplaying_sync::ingest::{FeedBatch, FeedRecord, FeedSource, FetchError};

/// In-memory catalog with a call log and switchable failures.
#[derive(Default)]
pub struct FakeCatalog {
    artists: Mutex<HashMap<String, Artist>>,
    top_tracks: Mutex<HashMap<String, Vec<Track>>>,
    playlists: Mutex<Vec<Playlist>>,
    contents: Mutex<HashMap<String, Vec<String>>>,
    pub calls: Mutex<Vec<String>>,
    add_failures: Mutex<HashMap<String, CatalogError>>,
    search_failure: Mutex<Option<CatalogError>>,
    check_failure: Mutex<Option<CatalogError>>,
    list_failure: Mutex<Option<CatalogError>>,
}

pub fn track(id: &str, name: &str, album: &str, artist: &str) -> Track {
    Track {
        id: id.into(),
        name: name.into(),
        uri: format!("spotify:track:{id}"),
        artists: vec![Artist {
            name: artist.into(),
            ..Default::default()
        }],
        duration_ms: 180_000,
        album: Album {
            id: format!("al-{id}"),
            name: album.into(),
            kind: "album".into(),
        },
    }
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artist reachable by its (case-insensitive) name, with `(id, title, album)` tracks.
    pub fn with_artist(self, id: &str, name: &str, tracks: &[(&str, &str, &str)]) -> Self {
        self.artists.lock().unwrap().insert(
            name.to_lowercase(),
            Artist {
                id: id.into(),
                name: name.into(),
                uri: format!("spotify:artist:{id}"),
                genres: vec!["jazz".into()],
            },
        );
        let ts = tracks
            .iter()
            .map(|(tid, title, album)| track(tid, title, album, name))
            .collect();
        self.top_tracks.lock().unwrap().insert(id.into(), ts);
        self
    }

    pub fn with_playlist(self, id: &str, name: &str) -> Self {
        self.playlists.lock().unwrap().push(Playlist {
            id: id.into(),
            name: name.into(),
            uri: format!("spotify:playlist:{id}"),
            ..Default::default()
        });
        self
    }

    pub fn with_contents(self, playlist_id: &str, track_ids: &[&str]) -> Self {
        self.contents.lock().unwrap().insert(
            playlist_id.into(),
            track_ids.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn fail_add_of(&self, track_id: &str, err: CatalogError) {
        self.add_failures
            .lock()
            .unwrap()
            .insert(track_id.into(), err);
    }

    pub fn fail_search(&self, err: CatalogError) {
        *self.search_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_checks(&self, err: CatalogError) {
        *self.check_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_playlist_listing(&self, err: CatalogError) {
        *self.list_failure.lock().unwrap() = Some(err);
    }

    pub fn playlist_tracks(&self, playlist_id: &str) -> Vec<String> {
        self.contents
            .lock()
            .unwrap()
            .get(playlist_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn playlists(&self) -> Vec<Playlist> {
        self.playlists.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CatalogService for FakeCatalog {
    async fn search_artist(&self, query: &str) -> Result<Artist, CatalogError> {
        self.log(format!("search_artist:{query}"));
        if let Some(e) = self.search_failure.lock().unwrap().clone() {
            return Err(e);
        }
        self.artists
            .lock()
            .unwrap()
            .get(&query.trim().to_lowercase())
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("artist {query}")))
    }

    async fn artist_top_tracks(&self, artist_id: &str) -> Result<Vec<Track>, CatalogError> {
        self.log(format!("top_tracks:{artist_id}"));
        Ok(self
            .top_tracks
            .lock()
            .unwrap()
            .get(artist_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn user_playlists(&self, folder_hint: &str) -> Result<Vec<Playlist>, CatalogError> {
        self.log(format!("user_playlists:{folder_hint}"));
        if let Some(e) = self.list_failure.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self.playlists.lock().unwrap().clone())
    }

    async fn add_tracks_to_playlist(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), CatalogError> {
        self.log(format!("add:{playlist_id}:{}", track_ids.join(",")));
        {
            let failures = self.add_failures.lock().unwrap();
            if let Some(e) = track_ids.iter().find_map(|id| failures.get(id)) {
                return Err(e.clone());
            }
        }
        self.contents
            .lock()
            .unwrap()
            .entry(playlist_id.into())
            .or_default()
            .extend(track_ids.iter().cloned());
        Ok(())
    }

    async fn check_tracks_in_playlist(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<Vec<bool>, CatalogError> {
        self.log(format!("check:{playlist_id}:{}", track_ids.join(",")));
        if let Some(e) = self.check_failure.lock().unwrap().clone() {
            return Err(e);
        }
        let contents = self.playlist_tracks(playlist_id);
        Ok(track_ids.iter().map(|id| contents.contains(id)).collect())
    }

    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<Playlist, CatalogError> {
        self.log(format!("create:{name}:{public}:{description}"));
        let mut playlists = self.playlists.lock().unwrap();
        let p = Playlist {
            id: format!("pl-{}", playlists.len() + 1),
            name: name.into(),
            uri: String::new(),
            ..Default::default()
        };
        playlists.push(p.clone());
        Ok(p)
    }
}

pub fn record(artist: &str, title: &str, album: &str) -> FeedRecord {
    FeedRecord {
        artist: artist.into(),
        title: title.into(),
        album: album.into(),
        played_at: Utc::now(),
        raw_text: String::new(),
    }
}

pub fn batch(records: Vec<FeedRecord>) -> FeedBatch {
    let mut b = FeedBatch::new("fake");
    b.records = records;
    b
}

/// Feed that replays scripted responses, then keeps returning the last one.
pub struct FakeFeed {
    script: Mutex<Vec<Result<FeedBatch, u16>>>,
    pub fetches: AtomicUsize,
}

impl FakeFeed {
    pub fn repeating(b: FeedBatch) -> Self {
        Self::scripted(vec![Ok(b)])
    }

    /// `Err(status)` entries fail with that HTTP status.
    pub fn scripted(script: Vec<Result<FeedBatch, u16>>) -> Self {
        Self {
            script: Mutex::new(script),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for FakeFeed {
    async fn fetch_latest(&self) -> Result<FeedBatch, FetchError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap();
        let step = script
            .get(n)
            .or_else(|| script.last())
            .cloned()
            .unwrap_or(Err(500));
        step.map_err(FetchError::Status)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
