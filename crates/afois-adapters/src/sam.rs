//! SAM.gov Get Opportunities API v2: paginated search by NAICS code and posted-date window.

use std::fmt;

use afois_core::{Source, TargetingConfig};
use afois_storage::HttpFetcher;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{AdapterContext, AdapterError, Category, RawRecord, SourceAdapter, SourcePage};

pub const DEFAULT_SAM_BASE_URL: &str = "https://api.sam.gov/prod";
pub const DEFAULT_SAM_PAGE_SIZE: usize = 1000;
const SEARCH_PATH: &str = "/opportunities/v2/search";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "totalRecords", default)]
    total_records: Option<u64>,
    #[serde(default, alias = "opportunitiesData")]
    opportunities: Vec<JsonValue>,
}

#[derive(Clone)]
pub struct SamAdapter {
    base_url: String,
    api_key: String,
    page_size: usize,
}

impl fmt::Debug for SamAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamAdapter")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// SAM expects `MM/dd/yyyy`.
pub fn sam_date(date: NaiveDate) -> String {
    date.format("%m/%d/%Y").to_string()
}

impl SamAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            page_size: DEFAULT_SAM_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn search_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), SEARCH_PATH)
    }

    fn next_offset(&self, offset: usize, returned: usize, total: Option<u64>) -> Option<usize> {
        if returned == 0 {
            return None;
        }
        let next = offset + returned;
        match total {
            Some(total) if next as u64 >= total => None,
            None if returned < self.page_size => None,
            _ => Some(next),
        }
    }
}

#[async_trait]
impl SourceAdapter for SamAdapter {
    fn source(&self) -> Source {
        Source::Sam
    }

    fn categories(&self, targeting: &TargetingConfig) -> Vec<Category> {
        targeting
            .target_categories
            .iter()
            .map(|code| Category::Naics(code.clone()))
            .collect()
    }

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        category: &Category,
        offset: usize,
    ) -> Result<SourcePage, AdapterError> {
        let Some(naics) = category.naics() else {
            return Err(AdapterError::Message(
                "SAM search needs a NAICS category".to_string(),
            ));
        };
        let query = [
            ("api_key", self.api_key.clone()),
            ("postedFrom", sam_date(ctx.window.posted_from)),
            ("postedTo", sam_date(ctx.window.posted_to)),
            ("limit", self.page_size.to_string()),
            ("offset", offset.to_string()),
            ("ncode", naics.to_string()),
        ];
        let response = http
            .get(ctx.run_id, Source::Sam.as_str(), &self.search_url(), &query)
            .await?;
        ctx.archive_body(Source::Sam, category, "json", &response.body)
            .await;

        let parsed: SearchResponse = response.json()?;
        let returned = parsed.opportunities.len();
        let next_offset = self.next_offset(offset, returned, parsed.total_records);
        debug!(
            naics,
            offset,
            returned,
            total = parsed.total_records,
            "SAM page fetched"
        );

        Ok(SourcePage {
            records: parsed.opportunities.into_iter().map(RawRecord::Sam).collect(),
            next_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DateWindow;
    use afois_storage::HttpClientConfig;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> AdapterContext {
        let today = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        AdapterContext::new(Uuid::new_v4(), Utc::now(), DateWindow::trailing_days(today, 365))
    }

    fn http() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig::default()).unwrap()
    }

    #[test]
    fn dates_use_month_first_format() {
        assert_eq!(sam_date(NaiveDate::from_ymd_opt(2026, 3, 5).unwrap()), "03/05/2026");
    }

    #[test]
    fn debug_output_hides_api_key() {
        let adapter = SamAdapter::new(DEFAULT_SAM_BASE_URL, "secret-key");
        assert!(!format!("{adapter:?}").contains("secret-key"));
    }

    #[test]
    fn pagination_stops_at_total_or_short_page() {
        let adapter = SamAdapter::new(DEFAULT_SAM_BASE_URL, "k").with_page_size(2);
        assert_eq!(adapter.next_offset(0, 2, Some(5)), Some(2));
        assert_eq!(adapter.next_offset(4, 1, Some(5)), None);
        assert_eq!(adapter.next_offset(0, 0, Some(5)), None);
        assert_eq!(adapter.next_offset(0, 2, None), Some(2));
        assert_eq!(adapter.next_offset(2, 1, None), None);
    }

    #[tokio::test]
    async fn fetch_page_sends_search_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/opportunities/v2/search"))
            .and(query_param("api_key", "test-key"))
            .and(query_param("postedFrom", "03/15/2025"))
            .and(query_param("postedTo", "03/15/2026"))
            .and(query_param("limit", "2"))
            .and(query_param("offset", "0"))
            .and(query_param("ncode", "236220"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalRecords": 3,
                "opportunitiesData": [
                    { "noticeId": "a", "title": "Hangar" },
                    { "noticeId": "b", "title": "Runway" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = SamAdapter::new(server.uri(), "test-key").with_page_size(2);
        let page = adapter
            .fetch_page(&http(), &ctx(), &Category::Naics("236220".into()), 0)
            .await
            .unwrap();

        assert_eq!(page.records.len(), 2);
        assert_eq!(page.next_offset, Some(2));
        assert_eq!(page.records[0].source(), Source::Sam);
    }

    #[tokio::test]
    async fn rate_limit_surfaces_distinctly_from_hard_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("ncode", "541511"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("ncode", "236220"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let adapter = SamAdapter::new(server.uri(), "k");
        let limited = adapter
            .fetch_page(&http(), &ctx(), &Category::Naics("541511".into()), 0)
            .await
            .unwrap_err();
        assert!(limited.is_rate_limited());

        let failed = adapter
            .fetch_page(&http(), &ctx(), &Category::Naics("236220".into()), 0)
            .await
            .unwrap_err();
        assert!(!failed.is_rate_limited());
        assert!(matches!(failed, AdapterError::Fetch(_)));
    }

    #[tokio::test]
    async fn feed_category_is_rejected_without_a_request() {
        let adapter = SamAdapter::new("http://127.0.0.1:9", "k");
        let err = adapter
            .fetch_page(&http(), &ctx(), &Category::Feed, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Message(_)));
    }
}
