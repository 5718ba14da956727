//! Story listing served from a JSON export instead of the live stories edge.
//!
//! Accepts either a bare list of story nodes or a saved Graph page
//! (`{"data": [...]}`). Insights and token checks still go to the wrapped
//! API, so a replayed listing is normalized and stored exactly like a live one.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use graph_insights_client::{Page, TokenInfo};
use serde_json::Value;
use tracing::info;

use storywatch_common::StorywatchError;

use crate::metrics::StoryApi;

pub struct FileStoryApi {
    stories: Vec<Value>,
    inner: Arc<dyn StoryApi>,
}

impl FileStoryApi {
    pub fn load(path: &Path, inner: Arc<dyn StoryApi>) -> Result<Self, StorywatchError> {
        let raw = std::fs::read(path).map_err(|e| {
            StorywatchError::Config(format!("cannot read stories file {}: {e}", path.display()))
        })?;
        let api = Self::from_json(&raw, inner)?;
        info!(path = %path.display(), stories = api.stories.len(), "Loaded stories from local file");
        Ok(api)
    }

    pub fn from_json(raw: &[u8], inner: Arc<dyn StoryApi>) -> Result<Self, StorywatchError> {
        let parsed: Value = serde_json::from_slice(raw)
            .map_err(|e| StorywatchError::Config(format!("stories file is not valid JSON: {e}")))?;

        let stories = match parsed {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove("data") {
                Some(Value::Array(items)) => items,
                _ => return Err(invalid_format()),
            },
            _ => return Err(invalid_format()),
        };
        Ok(Self { stories, inner })
    }
}

fn invalid_format() -> StorywatchError {
    StorywatchError::Config(
        "stories file must hold a list or an object with a 'data' list".into(),
    )
}

#[async_trait]
impl StoryApi for FileStoryApi {
    /// The whole file as one page, for whichever account asks.
    async fn stories_page(
        &self,
        _business_id: &str,
        _after: Option<&str>,
    ) -> graph_insights_client::Result<Page> {
        Ok(Page {
            data: self.stories.clone(),
            paging: None,
        })
    }

    async fn navigation_insights(&self, story_id: &str) -> graph_insights_client::Result<Page> {
        self.inner.navigation_insights(story_id).await
    }

    async fn story_insights(&self, story_id: &str) -> graph_insights_client::Result<Page> {
        self.inner.story_insights(story_id).await
    }

    async fn token_info(&self) -> graph_insights_client::Result<TokenInfo> {
        self.inner.token_info().await
    }
}
