//! USASpending.gov search API: historical contract awards and top recipients by NAICS.

use afois_core::Source;
use afois_storage::HttpFetcher;
use chrono::{Months, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::debug;
use uuid::Uuid;

use crate::fields::{lookup_f64, lookup_str};
use crate::AdapterError;

pub const DEFAULT_USASPENDING_BASE_URL: &str = "https://api.usaspending.gov/api/v2";
/// Definitive contracts, purchase orders, delivery orders and BPA calls.
pub const CONTRACT_AWARD_TYPES: [&str; 4] = ["A", "B", "C", "D"];

const RECIPIENT_NAME: &[&str] = &["Recipient Name", "recipient_name", "recipientName"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpendingWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SpendingWindow {
    pub fn trailing_months(today: NaiveDate, months: u32) -> Self {
        Self {
            start: today
                .checked_sub_months(Months::new(months))
                .unwrap_or(NaiveDate::MIN),
            end: today,
        }
    }

    fn to_filter(self) -> JsonValue {
        json!([{
            "start_date": self.start.format("%Y-%m-%d").to_string(),
            "end_date": self.end.format("%Y-%m-%d").to_string(),
        }])
    }
}

/// A `spending_by_award` query.
#[derive(Debug, Clone, PartialEq)]
pub struct AwardSearch {
    pub window: SpendingWindow,
    pub naics: Option<String>,
    pub keywords: Vec<String>,
    pub recipient_search_text: Vec<String>,
    pub fields: Vec<&'static str>,
    pub limit: u32,
    pub sort: &'static str,
}

impl AwardSearch {
    /// Largest awards for a NAICS code at an agency; the top recipient is the likely incumbent.
    pub fn incumbents(naics: Option<&str>, agency: &str, window: SpendingWindow) -> Self {
        Self {
            window,
            naics: naics.map(ToString::to_string),
            keywords: vec![agency.to_string()],
            recipient_search_text: Vec::new(),
            fields: vec![
                "Award ID",
                "Recipient Name",
                "Start Date",
                "End Date",
                "Award Amount",
                "Description",
                "Awarding Agency",
            ],
            limit: 10,
            sort: "Award Amount",
        }
    }

    /// Most recent awards won by one recipient within a NAICS code.
    pub fn recent_for_recipient(recipient: &str, naics: &str, window: SpendingWindow) -> Self {
        Self {
            window,
            naics: Some(naics.to_string()),
            keywords: Vec::new(),
            recipient_search_text: vec![recipient.to_string()],
            fields: vec![
                "Award ID",
                "Description",
                "Award Amount",
                "Action Date",
                "Awarding Agency",
            ],
            limit: 3,
            sort: "Action Date",
        }
    }

    pub fn to_body(&self) -> JsonValue {
        let mut filters = json!({
            "time_period": self.window.to_filter(),
            "award_type_codes": CONTRACT_AWARD_TYPES,
        });
        if let Some(naics) = &self.naics {
            filters["naics_codes"] = json!([naics]);
        }
        if !self.keywords.is_empty() {
            filters["keywords"] = json!(self.keywords);
        }
        if !self.recipient_search_text.is_empty() {
            filters["recipient_search_text"] = json!(self.recipient_search_text);
        }
        json!({
            "filters": filters,
            "fields": self.fields,
            "limit": self.limit,
            "page": 1,
            "sort": self.sort,
            "order": "desc",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecipientTotal {
    pub name: String,
    pub amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ResultsEnvelope {
    #[serde(default)]
    results: Vec<JsonValue>,
}

/// Recipient names in award order, blanks dropped.
pub fn recipient_names(awards: &[JsonValue]) -> Vec<String> {
    awards
        .iter()
        .filter_map(|award| lookup_str(award, RECIPIENT_NAME))
        .collect()
}

#[derive(Debug, Clone)]
pub struct UsaSpendingClient {
    base_url: String,
}

impl Default for UsaSpendingClient {
    fn default() -> Self {
        Self::new(DEFAULT_USASPENDING_BASE_URL)
    }
}

impl UsaSpendingClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/search/{path}/", self.base_url.trim_end_matches('/'))
    }

    async fn post_results(
        &self,
        http: &HttpFetcher,
        run_id: Uuid,
        path: &str,
        body: &JsonValue,
    ) -> Result<Vec<JsonValue>, AdapterError> {
        let response = http
            .post_json(run_id, Source::UsaSpending.as_str(), &self.endpoint(path), body)
            .await?;
        let envelope: ResultsEnvelope = response.json()?;
        debug!(path, results = envelope.results.len(), "USASpending search returned");
        Ok(envelope.results)
    }

    pub async fn awards(
        &self,
        http: &HttpFetcher,
        run_id: Uuid,
        search: &AwardSearch,
    ) -> Result<Vec<JsonValue>, AdapterError> {
        self.post_results(http, run_id, "spending_by_award", &search.to_body())
            .await
    }

    /// Recipients with the most obligated dollars for `naics` in `window`, largest first.
    pub async fn top_recipients(
        &self,
        http: &HttpFetcher,
        run_id: Uuid,
        naics: &str,
        window: SpendingWindow,
        limit: u32,
    ) -> Result<Vec<RecipientTotal>, AdapterError> {
        let body = json!({
            "category": "recipient_duns",
            "filters": {
                "time_period": window.to_filter(),
                "naics_codes": [naics],
                "award_type_codes": CONTRACT_AWARD_TYPES,
            },
            "limit": limit,
            "page": 1,
        });
        let results = self
            .post_results(http, run_id, "spending_by_category", &body)
            .await?;
        Ok(results
            .iter()
            .filter_map(|row| {
                Some(RecipientTotal {
                    name: lookup_str(row, &["name", "recipient_name"])?,
                    amount: lookup_f64(row, &["amount", "aggregated_amount"]),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afois_storage::HttpClientConfig;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn window() -> SpendingWindow {
        SpendingWindow::trailing_months(NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(), 24)
    }

    #[test]
    fn trailing_months_clamps_to_month_end() {
        let w = SpendingWindow::trailing_months(NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(), 1);
        assert_eq!(w.start, NaiveDate::from_ymd_opt(2026, 2, 28).unwrap());
    }

    #[test]
    fn incumbent_search_body_filters_contracts_by_naics_and_agency() {
        let body = AwardSearch::incumbents(Some("236220"), "Department of the Army", window()).to_body();
        assert_eq!(body["filters"]["award_type_codes"], json!(["A", "B", "C", "D"]));
        assert_eq!(body["filters"]["naics_codes"], json!(["236220"]));
        assert_eq!(body["filters"]["keywords"], json!(["Department of the Army"]));
        assert_eq!(body["filters"]["time_period"][0]["start_date"], "2024-03-31");
        assert_eq!(body["limit"], 10);
        assert_eq!(body["sort"], "Award Amount");
        assert!(body["filters"].get("recipient_search_text").is_none());
    }

    #[test]
    fn incumbent_search_without_naics_omits_the_filter() {
        let body = AwardSearch::incumbents(None, "GSA", window()).to_body();
        assert!(body["filters"].get("naics_codes").is_none());
    }

    #[test]
    fn recipient_names_skip_blank_rows() {
        let awards = vec![
            json!({ "Recipient Name": "Borealis LLC" }),
            json!({ "Recipient Name": "" }),
            json!({ "recipient_name": "Tundra Inc" }),
        ];
        assert_eq!(recipient_names(&awards), vec!["Borealis LLC", "Tundra Inc"]);
    }

    #[tokio::test]
    async fn top_recipients_posts_category_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search/spending_by_category/"))
            .and(body_partial_json(json!({
                "category": "recipient_duns",
                "limit": 5,
                "filters": { "naics_codes": ["236220"] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "name": "Borealis LLC", "amount": 1200000.5 },
                    { "name": "Tundra Inc", "amount": "800000" },
                    { "amount": 5 }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = UsaSpendingClient::new(server.uri());
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let top = client
            .top_recipients(&http, Uuid::new_v4(), "236220", window(), 5)
            .await
            .unwrap();

        assert_eq!(top.len(), 2);
        assert_eq!(top[0].name, "Borealis LLC");
        assert_eq!(top[1].amount, Some(800000.0));
    }

    #[tokio::test]
    async fn award_search_failure_is_a_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search/spending_by_award/"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;

        let client = UsaSpendingClient::new(server.uri());
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let err = client
            .awards(&http, Uuid::new_v4(), &AwardSearch::incumbents(None, "GSA", window()))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Fetch(_)));
    }
}
