// src/ingest/client.rs
//! HTTP client for the now-playing feed endpoint.
//!
//! The feed is queried per day with `?query={"day":"<ISO-8601 with offset>"}`; the day is expressed
//! in the station's own timezone so a container running in UTC does not ask for the wrong date.
//! Network errors and 502/504 are retried with a doubling delay; anything else is final.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use metrics::{counter, histogram};
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use super::parse::parse_entries;
use super::types::{FeedBatch, FeedRecord, FeedSource};

pub const DEFAULT_FEED_ENDPOINT: &str = "https://www.kmhd.org/pf/api/v3/content/fetch/playlist";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36";

const FEED_SOURCE: &str = "feed_api";
const QUERY_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed unavailable after {attempts} attempts: {reason}")]
    Exhausted { attempts: u32, reason: String },
    #[error("feed returned status {0}")]
    Status(u16),
    #[error("feed body could not be decoded: {0}")]
    Decode(String),
    #[error("feed request could not be built: {0}")]
    Request(String),
    #[error("feed returned no records")]
    Empty,
}

impl FetchError {
    /// True for failures that were retried (network, 502, 504) before giving up.
    /// `Status` and `Decode` are permanent. `Request` and `Empty` are neither: the first is a
    /// local build failure, the second a well-formed answer with nothing in it.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Exhausted { .. })
    }
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub endpoint: Url,
    pub timeout: Duration,
    pub timezone: Tz,
    pub user_agent: String,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl FeedConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            timeout: Duration::from_secs(30),
            timezone: chrono_tz::America::Los_Angeles,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }

    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Delay before the retry that follows `attempt` (1-based): base, 2*base, 4*base, ...
fn backoff_for(base: Duration, attempt: u32) -> Duration {
    base * (1u32 << (attempt.saturating_sub(1)).min(6))
}

#[derive(Clone, Debug)]
pub struct FeedClient {
    http: Client,
    cfg: FeedConfig,
}

impl FeedClient {
    pub fn new(cfg: FeedConfig) -> Result<Self, FetchError> {
        let mut h = header::HeaderMap::new();
        h.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json, text/plain, */*"),
        );
        h.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static("en-US,en;q=0.5"),
        );
        h.insert(
            header::REFERER,
            header::HeaderValue::from_str(cfg.endpoint.as_str())
                .map_err(|e| FetchError::Request(format!("invalid referer: {e}")))?,
        );
        let http = Client::builder()
            .timeout(cfg.timeout)
            .default_headers(h)
            .user_agent(cfg.user_agent.as_str())
            .build()
            .map_err(|e| FetchError::Request(format!("build client: {e}")))?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.cfg
    }

    /// Feed URL for `date`, expressed in the feed's timezone.
    pub fn query_url(&self, date: DateTime<Utc>) -> Url {
        let local = date.with_timezone(&self.cfg.timezone);
        let query = serde_json::json!({ "day": local.format(QUERY_DATE_FORMAT).to_string() });
        let mut url = self.cfg.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("query", &query.to_string());
        url
    }

    /// Fetch and parse the plays for the day containing `date`.
    pub async fn fetch(&self, date: DateTime<Utc>) -> Result<FeedBatch, FetchError> {
        let url = self.query_url(date);
        tracing::debug!(target: "ingest", url = %url, "fetching feed");
        let t0 = Instant::now();

        let mut attempt: u32 = 0;
        let resp = loop {
            attempt += 1;
            let reason = match self.http.get(url.clone()).send().await {
                Ok(resp) if !is_transient_status(resp.status()) => break resp,
                Ok(resp) => format!("status {}", resp.status().as_u16()),
                Err(e) => e.to_string(),
            };
            if attempt >= self.cfg.max_attempts {
                tracing::error!(
                    target: "ingest",
                    attempts = attempt,
                    reason = %reason,
                    "feed request failed after all retries"
                );
                return Err(FetchError::Exhausted {
                    attempts: attempt,
                    reason,
                });
            }
            let wait = backoff_for(self.cfg.backoff_base, attempt);
            tracing::warn!(
                target: "ingest",
                attempt,
                max_attempts = self.cfg.max_attempts,
                wait_ms = wait.as_millis() as u64,
                reason = %reason,
                "feed request failed, retrying"
            );
            counter!("ingest_fetch_retries_total").increment(1);
            tokio::time::sleep(wait).await;
        };

        let status = resp.status();
        if !status.is_success() {
            tracing::error!(target: "ingest", status = status.as_u16(), "feed returned non-success status");
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::Decode(format!("read body: {e}")))?;
        let entries: Vec<Value> =
            serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))?;

        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        tracing::info!(target: "ingest", entries = entries.len(), attempts = attempt, "feed response received");

        Ok(parse_entries(&entries, self.cfg.timezone, FEED_SOURCE))
    }

    /// The play closest to (and not after) `now` within the last 24h; the first record otherwise.
    pub async fn currently_playing(&self, now: DateTime<Utc>) -> Result<FeedRecord, FetchError> {
        let batch = self.fetch(now).await?;
        pick_current(&batch, now).cloned().ok_or(FetchError::Empty)
    }
}

pub(crate) fn pick_current(batch: &FeedBatch, now: DateTime<Utc>) -> Option<&FeedRecord> {
    let window = chrono::Duration::hours(24);
    batch
        .records
        .iter()
        .filter(|r| {
            let age = now - r.played_at;
            age >= chrono::Duration::zero() && age < window
        })
        .min_by_key(|r| now - r.played_at)
        .or_else(|| batch.records.first())
}

#[async_trait]
impl FeedSource for FeedClient {
    async fn fetch_latest(&self) -> Result<FeedBatch, FetchError> {
        self.fetch(Utc::now()).await
    }

    fn name(&self) -> &'static str {
        "feed"
    }
}
