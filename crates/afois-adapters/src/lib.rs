//! Source adapter contracts and the SAM.gov, SBA SubNet and USASpending implementations.

use std::fmt;

use afois_core::{Source, TargetingConfig};
use afois_storage::{FetchError, HttpFetcher, ResponseArchive};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod fields;
pub mod normalize;
pub mod sam;
pub mod subnet;
pub mod usaspending;

pub use normalize::{normalize, NormalizeError, NormalizedRecord, PlaceOfPerformance};
pub use sam::SamAdapter;
pub use subnet::{RssGuid, RssItem, SubnetAdapter};
pub use usaspending::{AwardSearch, RecipientTotal, SpendingWindow, UsaSpendingClient};

/// Posted-date window sent to sources that filter by date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub posted_from: NaiveDate,
    pub posted_to: NaiveDate,
}

impl DateWindow {
    pub fn trailing_days(today: NaiveDate, days: u32) -> Self {
        let posted_from = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self {
            posted_from,
            posted_to: today,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
    pub window: DateWindow,
    pub archive: Option<ResponseArchive>,
}

impl AdapterContext {
    pub fn new(run_id: Uuid, fetched_at: DateTime<Utc>, window: DateWindow) -> Self {
        Self {
            run_id,
            fetched_at,
            window,
            archive: None,
        }
    }

    pub fn with_archive(mut self, archive: Option<ResponseArchive>) -> Self {
        self.archive = archive;
        self
    }

    /// Archives a raw body when an archive is configured. Failures are logged, never raised.
    pub async fn archive_body(
        &self,
        source: Source,
        category: &Category,
        extension: &str,
        body: &[u8],
    ) {
        let Some(archive) = &self.archive else {
            return;
        };
        match archive
            .store_bytes(
                self.fetched_at,
                source.as_str(),
                &category.to_string(),
                extension,
                body,
            )
            .await
        {
            Ok(stored) => debug!(
                source = %source,
                %category,
                path = %stored.relative_path.display(),
                deduplicated = stored.deduplicated,
                "archived response body"
            ),
            Err(err) => warn!(source = %source, %category, error = %err, "archiving response body failed"),
        }
    }
}

/// One unit of work in an ingestion run: a NAICS code, or a whole feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    Naics(String),
    Feed,
}

impl Category {
    pub fn naics(&self) -> Option<&str> {
        match self {
            Category::Naics(code) => Some(code),
            Category::Feed => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Naics(code) => f.write_str(code),
            Category::Feed => f.write_str("feed"),
        }
    }
}

/// Source-specific record as fetched, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Sam(JsonValue),
    Subnet(RssItem),
}

impl RawRecord {
    pub fn source(&self) -> Source {
        match self {
            RawRecord::Sam(_) => Source::Sam,
            RawRecord::Subnet(_) => Source::Subnet,
        }
    }
}

/// A page of raw records. `next_offset == None` is the explicit "no more data" signal.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourcePage {
    pub records: Vec<RawRecord>,
    pub next_offset: Option<usize>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("could not decode {adapter} response: {message}")]
    Decode { adapter: Source, message: String },
    #[error("{0}")]
    Message(String),
}

impl AdapterError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AdapterError::Fetch(err) if err.is_rate_limited())
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    /// Categories one run walks through, in order.
    fn categories(&self, targeting: &TargetingConfig) -> Vec<Category>;

    /// Fetches one page. Exactly one HTTP request per call; retrying is the caller's job.
    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        category: &Category,
        offset: usize,
    ) -> Result<SourcePage, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn trailing_window_spans_requested_days() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let window = DateWindow::trailing_days(today, 365);
        assert_eq!(window.posted_to, today);
        assert_eq!(window.posted_from, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
    }

    #[test]
    fn category_display_and_naics() {
        let naics = Category::Naics("236220".into());
        assert_eq!(naics.to_string(), "236220");
        assert_eq!(naics.naics(), Some("236220"));
        assert_eq!(Category::Feed.to_string(), "feed");
        assert_eq!(Category::Feed.naics(), None);
    }

    #[tokio::test]
    async fn archive_body_writes_under_source_and_category() {
        let dir = tempdir().unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let ctx = AdapterContext::new(Uuid::new_v4(), Utc::now(), DateWindow::trailing_days(today, 7))
            .with_archive(Some(ResponseArchive::new(dir.path())));

        ctx.archive_body(Source::Sam, &Category::Naics("236220".into()), "json", b"{}")
            .await;

        let day = ctx.fetched_at.format("%Y%m%d").to_string();
        let category_dir = dir.path().join(day).join("sam").join("236220");
        let entries = std::fs::read_dir(category_dir).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn rate_limit_detection_sees_through_fetch_errors() {
        let err = AdapterError::from(FetchError::RateLimited {
            url: "https://api.sam.gov/prod/opportunities/v2/search".into(),
        });
        assert!(err.is_rate_limited());
        assert!(!AdapterError::Message("boom".into()).is_rate_limited());
    }
}
