pub mod error;
pub mod retry;
pub mod types;

pub use error::{GraphError, Result};
pub use retry::{RetryPolicy, RetryState};
pub use types::{Page, TokenInfo};

use std::time::Duration;

use serde::de::DeserializeOwned;
use types::{DebugTokenResponse, NAVIGATION_BREAKDOWN, NAVIGATION_METRIC, STORY_FIELDS, STORY_METRICS};

const BASE_URL: &str = "https://graph.facebook.com";

/// Facebook's documented maximum page size for edge listings.
const PAGE_LIMIT: &str = "100";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Thin client over the Graph API endpoints used for story insights.
/// One request per call; retries are the caller's concern (see [`RetryPolicy`]).
pub struct GraphClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GraphClient {
    pub fn new(access_token: &str, api_version: &str) -> Result<Self> {
        Self::with_base_url(&format!("{BASE_URL}/{api_version}"), access_token)
    }

    /// Point the client at a different host (proxies, local fakes).
    pub fn with_base_url(base_url: &str, access_token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    /// One page of the business account's currently active stories, newest first.
    pub async fn stories_page(&self, business_id: &str, after: Option<&str>) -> Result<Page> {
        let url = format!("{}/{}/stories", self.base_url, business_id);
        let mut query = vec![("fields", STORY_FIELDS), ("limit", PAGE_LIMIT)];
        if let Some(cursor) = after {
            query.push(("after", cursor));
        }
        self.get(&url, &query).await
    }

    /// Navigation insight broken down by action type (tap forward/back/exit, swipe).
    pub async fn navigation_insights(&self, story_id: &str) -> Result<Page> {
        let url = format!("{}/{}/insights", self.base_url, story_id);
        self.get(
            &url,
            &[("metric", NAVIGATION_METRIC), ("breakdown", NAVIGATION_BREAKDOWN)],
        )
        .await
    }

    /// Reach, views and interaction insights for one story.
    pub async fn story_insights(&self, story_id: &str) -> Result<Page> {
        let url = format!("{}/{}/insights", self.base_url, story_id);
        let metrics = STORY_METRICS.join(",");
        self.get(&url, &[("metric", metrics.as_str())]).await
    }

    /// Introspect the access token (validity and granted scopes).
    pub async fn debug_token(&self) -> Result<TokenInfo> {
        let url = format!("{}/debug_token", self.base_url);
        let resp: DebugTokenResponse = self
            .get(&url, &[("input_token", self.access_token.as_str())])
            .await?;
        Ok(resp.data)
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .query(&[("access_token", self.access_token.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = GraphError::from_response(status.as_u16(), &body);
            tracing::debug!(url, status = status.as_u16(), error = %err, "Graph API request failed");
            return Err(err);
        }

        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}
