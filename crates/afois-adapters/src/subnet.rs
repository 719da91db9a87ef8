//! SBA SubNet subcontracting feed (RSS 2.0). The whole feed is one category and one page.

use afois_core::{Source, TargetingConfig};
use afois_storage::HttpFetcher;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::info;

use crate::fields::text_or_none;
use crate::{AdapterContext, AdapterError, Category, RawRecord, SourceAdapter, SourcePage};

pub const DEFAULT_SUBNET_FEED_URL: &str = "https://subnet.sba.gov/rss/opportunities.xml";

#[derive(Debug, Deserialize)]
struct RssDocument {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RssGuid {
    #[serde(rename = "$text", default)]
    pub value: Option<String>,
    #[serde(rename = "@isPermaLink", default)]
    pub is_perma_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RssItem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub guid: Option<RssGuid>,
    #[serde(rename = "pubDate", default)]
    pub pub_date: Option<String>,
}

impl RssItem {
    pub fn guid_text(&self) -> Option<String> {
        self.guid
            .as_ref()
            .and_then(|g| g.value.as_deref())
            .and_then(text_or_none)
    }

    /// The item as it appeared in the feed, kept as the stored raw payload.
    pub fn to_payload(&self) -> JsonValue {
        json!({
            "title": self.title,
            "description": self.description,
            "link": self.link,
            "guid": self.guid.as_ref().and_then(|g| g.value.clone()),
            "pubDate": self.pub_date,
        })
    }
}

pub fn parse_feed(xml: &str) -> Result<Vec<RssItem>, AdapterError> {
    let document: RssDocument =
        quick_xml::de::from_str(xml).map_err(|e| AdapterError::Decode {
            adapter: Source::Subnet,
            message: e.to_string(),
        })?;
    Ok(document.channel.items)
}

#[derive(Debug, Clone)]
pub struct SubnetAdapter {
    feed_url: String,
}

impl SubnetAdapter {
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
        }
    }
}

impl Default for SubnetAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_SUBNET_FEED_URL)
    }
}

#[async_trait]
impl SourceAdapter for SubnetAdapter {
    fn source(&self) -> Source {
        Source::Subnet
    }

    fn categories(&self, _targeting: &TargetingConfig) -> Vec<Category> {
        vec![Category::Feed]
    }

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        category: &Category,
        offset: usize,
    ) -> Result<SourcePage, AdapterError> {
        if offset > 0 {
            return Ok(SourcePage::default());
        }
        let response = http
            .get(ctx.run_id, Source::Subnet.as_str(), &self.feed_url, &[])
            .await?;
        ctx.archive_body(Source::Subnet, category, "xml", &response.body)
            .await;

        let items = parse_feed(&response.text())?;
        info!(items = items.len(), bytes = response.body.len(), "parsed SubNet feed");
        Ok(SourcePage {
            records: items.into_iter().map(RawRecord::Subnet).collect(),
            next_offset: None,
        })
    }
}
