//! Story listing and insights retrieval for one account.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use graph_insights_client::{GraphClient, GraphError, Page, RetryPolicy, RetryState, TokenInfo};
use serde_json::Value;
use tracing::{debug, info, warn};

use storywatch_common::{Account, StorywatchError};

/// The Graph API surface the pipeline depends on.
///
/// Implemented by [`GraphClient`]; tests substitute scripted fakes.
#[async_trait]
pub trait StoryApi: Send + Sync {
    async fn stories_page(
        &self,
        business_id: &str,
        after: Option<&str>,
    ) -> graph_insights_client::Result<Page>;

    async fn navigation_insights(&self, story_id: &str) -> graph_insights_client::Result<Page>;

    async fn story_insights(&self, story_id: &str) -> graph_insights_client::Result<Page>;

    async fn token_info(&self) -> graph_insights_client::Result<TokenInfo>;
}

#[async_trait]
impl StoryApi for GraphClient {
    async fn stories_page(
        &self,
        business_id: &str,
        after: Option<&str>,
    ) -> graph_insights_client::Result<Page> {
        GraphClient::stories_page(self, business_id, after).await
    }

    async fn navigation_insights(&self, story_id: &str) -> graph_insights_client::Result<Page> {
        GraphClient::navigation_insights(self, story_id).await
    }

    async fn story_insights(&self, story_id: &str) -> graph_insights_client::Result<Page> {
        GraphClient::story_insights(self, story_id).await
    }

    async fn token_info(&self) -> graph_insights_client::Result<TokenInfo> {
        self.debug_token().await
    }
}

/// A story node plus the raw insights returned for it. Nothing here has been
/// validated yet; normalization decides whether the payload is usable.
#[derive(Debug, Clone)]
pub struct RawStoryPayload {
    pub story: Value,
    /// `None` when the navigation call was not made or was rejected.
    pub navigation: Option<Vec<Value>>,
    pub metrics: Vec<Value>,
}

impl RawStoryPayload {
    pub fn story_id(&self) -> Option<&str> {
        self.story.get("id").and_then(Value::as_str)
    }
}

/// Parse the timestamp format Graph uses (`2024-03-01T18:22:10+0000`),
/// accepting RFC 3339 as well.
pub fn parse_graph_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Paginated, retrying fetch of an account's active stories and their insights.
pub struct MetricsClient {
    api: Arc<dyn StoryApi>,
    policy: RetryPolicy,
    business_ids: HashMap<Account, String>,
    max_pages: u32,
    window: Duration,
}

impl MetricsClient {
    pub fn new(
        api: Arc<dyn StoryApi>,
        policy: RetryPolicy,
        business_ids: HashMap<Account, String>,
        max_pages: u32,
        window_days: u32,
    ) -> Self {
        Self {
            api,
            policy,
            business_ids,
            max_pages: max_pages.max(1),
            window: Duration::days(i64::from(window_days.max(1))),
        }
    }

    /// Fetch raw payloads for every story inside the visibility window.
    ///
    /// Stories the API reports as having too few viewers for insights are
    /// omitted. Malformed story nodes are passed through for the aggregator
    /// to reject and count.
    pub async fn fetch(
        &self,
        account: Account,
        state: &mut RetryState,
    ) -> Result<Vec<RawStoryPayload>, StorywatchError> {
        let business_id = self.business_ids.get(&account).ok_or_else(|| {
            StorywatchError::PermanentApi(format!("no business id configured for account {account}"))
        })?;
        let cutoff = Utc::now() - self.window;

        let mut payloads = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;

        loop {
            let page = self
                .policy
                .run(state, "stories_page", || {
                    self.api.stories_page(business_id, cursor.as_deref())
                })
                .await
                .map_err(|e| api_error(e, state))?;
            pages += 1;

            let next = page.next_cursor().map(str::to_string);
            let mut past_window = false;

            for node in page.data {
                let posted_at = node
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .and_then(parse_graph_timestamp);
                if posted_at.is_some_and(|t| t < cutoff) {
                    // Listing is newest first; everything after this is older.
                    past_window = true;
                    break;
                }
                if let Some(payload) = self.fetch_insights(node, state).await? {
                    payloads.push(payload);
                }
            }

            if past_window {
                debug!(%account, pages, "Reached stories older than the window, stopping pagination");
                break;
            }
            match next {
                Some(c) if pages < self.max_pages => cursor = Some(c),
                Some(_) => {
                    warn!(%account, max_pages = self.max_pages, "Stopped at page limit with more pages available");
                    break;
                }
                None => break,
            }
        }

        info!(%account, stories = payloads.len(), pages, "Fetched story payloads");
        Ok(payloads)
    }

    async fn fetch_insights(
        &self,
        story: Value,
        state: &mut RetryState,
    ) -> Result<Option<RawStoryPayload>, StorywatchError> {
        let Some(story_id) = story.get("id").and_then(Value::as_str).map(str::to_string) else {
            return Ok(Some(RawStoryPayload {
                story,
                navigation: None,
                metrics: Vec::new(),
            }));
        };

        let navigation = match self
            .policy
            .run(state, "navigation_insights", || {
                self.api.navigation_insights(&story_id)
            })
            .await
        {
            Ok(page) => Some(page.data),
            Err(GraphError::NoInsights(reason)) => {
                debug!(story_id = %story_id, reason = %reason, "Story below insights threshold, omitting");
                return Ok(None);
            }
            Err(e @ (GraphError::BadRequest { .. } | GraphError::Parse(_))) => {
                warn!(story_id = %story_id, error = %e, "Navigation breakdown unavailable");
                None
            }
            Err(e) => return Err(api_error(e, state)),
        };

        let metrics = match self
            .policy
            .run(state, "story_insights", || self.api.story_insights(&story_id))
            .await
        {
            Ok(page) => page.data,
            Err(GraphError::NoInsights(reason)) => {
                debug!(story_id = %story_id, reason = %reason, "Story below insights threshold, omitting");
                return Ok(None);
            }
            Err(e) => return Err(api_error(e, state)),
        };

        if metrics.is_empty() {
            debug!(story_id = %story_id, "No metrics returned for story, omitting");
            return Ok(None);
        }

        Ok(Some(RawStoryPayload {
            story,
            navigation,
            metrics,
        }))
    }

    /// Check that the access token is valid and carries the insights scopes.
    ///
    /// Only a definite answer from the API fails the check; if the
    /// introspection call itself cannot be completed the run proceeds and
    /// per-account calls surface any real authorization problem.
    pub async fn verify_token(&self, state: &mut RetryState) -> Result<(), StorywatchError> {
        let info = match self
            .policy
            .run(state, "debug_token", || self.api.token_info())
            .await
        {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "Token scope verification could not complete, continuing");
                return Ok(());
            }
        };

        if !info.is_valid {
            return Err(StorywatchError::PermanentApi(
                "access token is invalid or expired".into(),
            ));
        }
        let missing = info.missing_scopes();
        if !missing.is_empty() {
            return Err(StorywatchError::PermanentApi(format!(
                "access token is missing required scopes: {}",
                missing.join(", ")
            )));
        }
        info!("Token scopes verified");
        Ok(())
    }
}

fn api_error(err: GraphError, state: &RetryState) -> StorywatchError {
    if err.is_transient() {
        StorywatchError::TransientApi {
            message: err.to_string(),
            retries: state.retries(),
        }
    } else {
        StorywatchError::PermanentApi(err.to_string())
    }
}
