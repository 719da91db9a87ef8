//! HTTP fetch, retry policy, raw response archive, and opportunity persistence for AFOIS.

pub mod store;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub use store::{
    AnalysisStore, MemoryStore, OpportunityStore, PgStore, StoreError, UpsertOutcome,
};


#[derive(Debug, Clone)]
pub struct ArchivedResponse {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Hash-addressed archive of raw response bodies, kept for audit.
#[derive(Debug, Clone)]
pub struct ResponseArchive {
    root: PathBuf,
}

impl ResponseArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn relative_path(
        &self,
        fetched_at: DateTime<Utc>,
        source_id: &str,
        category: &str,
        content_hash: &str,
        extension: &str,
    ) -> PathBuf {
        let day = fetched_at.format("%Y%m%d").to_string();
        let ext = extension.trim_start_matches('.').trim();
        let ext = if ext.is_empty() { "bin" } else { ext };
        let category = sanitize_segment(category);
        PathBuf::from(day)
            .join(source_id.to_ascii_lowercase())
            .join(category)
            .join(format!("{content_hash}.{ext}"))
    }

    /// Writes `bytes` once per content hash, via a temp file renamed into place.
    pub async fn store_bytes(
        &self,
        fetched_at: DateTime<Utc>,
        source_id: &str,
        category: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<ArchivedResponse> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path =
            self.relative_path(fetched_at, source_id, category, &content_hash, extension);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating archive directory {}", parent.display()))?;

        let archived = |deduplicated| ArchivedResponse {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking archive path {}", absolute_path.display()))?
        {
            return Ok(archived(true));
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp archive file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp archive file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp archive file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(archived(false)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(archived(true))
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "renaming temp archive {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}

fn sanitize_segment(input: &str) -> String {
    let cleaned = input
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect::<String>();
    if cleaned.is_empty() {
        "feed".to_string()
    } else {
        cleaned
    }
}

/// How a response status is treated by callers. Only rate limiting is ever retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    RateLimited,
    Failed,
}

pub fn classify_status(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        StatusClass::RateLimited
    } else {
        StatusClass::Failed
    }
}

/// Linear backoff: a fixed delay before every attempt plus `increment` per prior attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub increment: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(3_000),
            increment: Duration::from_millis(5_000),
        }
    }
}

impl BackoffPolicy {
    pub fn without_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            increment: Duration::ZERO,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_add(self.increment.saturating_mul(attempt))
    }

    pub fn start(&self) -> RetryState {
        RetryState::Attempting { attempt: 0 }
    }

    /// Applies the outcome of the attempt that `state` was waiting on.
    pub fn on_outcome(&self, state: RetryState, outcome: AttemptOutcome) -> RetryState {
        let RetryState::Attempting { attempt } = state else {
            return state;
        };
        match outcome {
            AttemptOutcome::Success => RetryState::Success { attempts: attempt + 1 },
            AttemptOutcome::Failed => RetryState::Failed { attempts: attempt + 1 },
            AttemptOutcome::RateLimited if attempt + 1 >= self.max_attempts.max(1) => {
                RetryState::Exhausted { attempts: attempt + 1 }
            }
            AttemptOutcome::RateLimited => RetryState::RateLimited { attempt },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RateLimited,
    Failed,
}

/// Per-category retry state. `attempt` is zero-based; `attempts` counts requests issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    RateLimited { attempt: u32 },
    Success { attempts: u32 },
    Failed { attempts: u32 },
    Exhausted { attempts: u32 },
}

impl RetryState {
    /// Leaves the rate-limited state for the next attempt.
    pub fn resume(self) -> RetryState {
        match self {
            RetryState::RateLimited { attempt } => RetryState::Attempting { attempt: attempt + 1 },
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetryState::Success { .. } | RetryState::Failed { .. } | RetryState::Exhausted { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|e| FetchError::Decode {
            url: self.final_url.clone(),
            message: e.to_string(),
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited (HTTP 429) by {url}")]
    RateLimited { url: String },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl FetchError {
    /// Wraps a transport error with its URL stripped; query strings may carry credentials.
    fn request(error: reqwest::Error) -> Self {
        FetchError::Request(error.without_url())
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }
}

/// URL with the query string dropped, so credentials passed as parameters never reach logs.
pub fn redact_url(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.to_string()
}

/// Thin reqwest wrapper that reports 429 separately from other failures and never retries.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn get(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, source_id, method = "GET");
        async {
            let resp = self
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(FetchError::request)?;
            Self::finish(resp).await
        }
        .instrument(span)
        .await
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
        body: &B,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, source_id, method = "POST");
        async {
            let resp = self
                .client
                .post(url)
                .json(body)
                .send()
                .await
                .map_err(FetchError::request)?;
            Self::finish(resp).await
        }
        .instrument(span)
        .await
    }

    async fn finish(resp: reqwest::Response) -> Result<FetchedResponse, FetchError> {
        let status = resp.status();
        let final_url = redact_url(resp.url());
        debug!(status = status.as_u16(), url = %final_url, "response received");

        match classify_status(status) {
            StatusClass::Success => {
                let body = resp.bytes().await.map_err(FetchError::request)?.to_vec();
                Ok(FetchedResponse {
                    status,
                    final_url,
                    body,
                })
            }
            StatusClass::RateLimited => Err(FetchError::RateLimited { url: final_url }),
            StatusClass::Failed => Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig::default()).expect("fetcher")
    }

    #[test]
    fn archive_hashing_is_stable() {
        let hash = ResponseArchive::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn archive_deduplicates_identical_bodies() {
        let dir = tempdir().expect("tempdir");
        let archive = ResponseArchive::new(dir.path());
        let fetched_at = DateTime::parse_from_rfc3339("2026-02-24T12:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);

        let first = archive
            .store_bytes(fetched_at, "SAM", "236220", "json", b"{\"opportunities\":[]}")
            .await
            .expect("first store");
        let second = archive
            .store_bytes(fetched_at, "SAM", "236220", "json", b"{\"opportunities\":[]}")
            .await
            .expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.relative_path.starts_with("20260224/sam/236220"));
        assert!(first.absolute_path.exists());
    }

    #[test]
    fn backoff_is_linear() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(3_000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(8_000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(13_000));
    }

    #[test]
    fn retry_state_exhausts_after_budget() {
        let policy = BackoffPolicy::without_delay(3);
        let mut state = policy.start();
        let mut requests = 0;
        while !state.is_terminal() {
            if let RetryState::Attempting { .. } = state {
                requests += 1;
                state = policy.on_outcome(state, AttemptOutcome::RateLimited);
            } else {
                state = state.resume();
            }
        }
        assert_eq!(requests, 3);
        assert_eq!(state, RetryState::Exhausted { attempts: 3 });
    }

    #[test]
    fn retry_state_terminal_outcomes() {
        let policy = BackoffPolicy::without_delay(3);
        let limited = policy.on_outcome(policy.start(), AttemptOutcome::RateLimited);
        assert_eq!(limited, RetryState::RateLimited { attempt: 0 });
        let resumed = limited.resume();
        assert_eq!(resumed, RetryState::Attempting { attempt: 1 });
        assert_eq!(
            policy.on_outcome(resumed, AttemptOutcome::Success),
            RetryState::Success { attempts: 2 }
        );
        assert_eq!(
            policy.on_outcome(policy.start(), AttemptOutcome::Failed),
            RetryState::Failed { attempts: 1 }
        );
        let done = RetryState::Failed { attempts: 1 };
        assert_eq!(policy.on_outcome(done, AttemptOutcome::Success), done);
    }

    #[test]
    fn status_classes() {
        assert_eq!(classify_status(StatusCode::OK), StatusClass::Success);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), StatusClass::RateLimited);
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE), StatusClass::Failed);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), StatusClass::Failed);
    }

    #[tokio::test]
    async fn fetcher_separates_rate_limit_from_hard_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let http = fetcher();
        let run_id = Uuid::new_v4();
        let limited = http
            .get(run_id, "SAM", &format!("{}/limited", server.uri()), &[])
            .await
            .unwrap_err();
        assert!(limited.is_rate_limited());

        let broken = http
            .get(run_id, "SAM", &format!("{}/broken", server.uri()), &[])
            .await
            .unwrap_err();
        assert!(matches!(broken, FetchError::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn fetcher_redacts_query_from_reported_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("api_key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let resp = fetcher()
            .get(
                Uuid::new_v4(),
                "SAM",
                &format!("{}/search", server.uri()),
                &[("api_key", "secret".to_string())],
            )
            .await
            .expect("ok");
        assert!(!resp.final_url.contains("secret"));
        assert_eq!(resp.text(), "{}");
    }

    #[tokio::test]
    async fn transport_error_omits_query_credentials() {
        let err = fetcher()
            .get(
                Uuid::new_v4(),
                "SAM",
                "http://127.0.0.1:9/opportunities/v2/search",
                &[("api_key", "supersecret".to_string())],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Request(_)));
        assert!(!err.to_string().contains("supersecret"));
    }

    #[tokio::test]
    async fn post_json_sends_body() {
        let server = MockServer::start().await;
        let payload = serde_json::json!({ "filters": { "naics_codes": ["236220"] } });
        Mock::given(method("POST"))
            .and(path("/search/spending_by_award/"))
            .and(body_json(&payload))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "results": [] })),
            )
            .mount(&server)
            .await;

        let resp = fetcher()
            .post_json(
                Uuid::new_v4(),
                "USA",
                &format!("{}/search/spending_by_award/", server.uri()),
                &payload,
            )
            .await
            .expect("ok");
        let value: serde_json::Value = resp.json().expect("json");
        assert!(value["results"].as_array().unwrap().is_empty());
    }
}
