use serde::Deserialize;

/// Metric requested with the navigation breakdown.
pub const NAVIGATION_METRIC: &str = "navigation";

/// Breakdown dimension that splits navigation into tap/swipe actions.
pub const NAVIGATION_BREAKDOWN: &str = "story_navigation_action_type";

/// Story metrics requested in the second insights call.
pub const STORY_METRICS: &[&str] = &[
    "reach",
    "replies",
    "shares",
    "total_interactions",
    "views",
    "profile_visits",
    "follows",
];

/// Fields requested for each story in the listing call.
pub const STORY_FIELDS: &str = "id,timestamp,media_type,media_product_type,permalink";

/// Scopes the access token must carry to read story insights.
pub const REQUIRED_SCOPES: &[&str] = &[
    "instagram_basic",
    "instagram_manage_insights",
    "pages_read_engagement",
];

/// One page of a Graph API edge. Items are kept as raw JSON so a single
/// malformed node does not fail the whole page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Page<T = serde_json::Value> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

impl<T> Page<T> {
    /// Cursor for the following page, if the API reported one.
    ///
    /// Graph returns `cursors.after` even on the last page; only a `next`
    /// link means there is more to read.
    pub fn next_cursor(&self) -> Option<&str> {
        let paging = self.paging.as_ref()?;
        paging.next.as_ref()?;
        paging.cursors.as_ref()?.after.as_deref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub cursors: Option<Cursors>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Cursors {
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
}

/// Response of `GET /debug_token`.
#[derive(Debug, Clone, Deserialize)]
pub struct DebugTokenResponse {
    pub data: TokenInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenInfo {
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl TokenInfo {
    /// Required scopes the token does not carry.
    pub fn missing_scopes(&self) -> Vec<&'static str> {
        REQUIRED_SCOPES
            .iter()
            .copied()
            .filter(|s| !self.scopes.iter().any(|have| have == s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_cursor_requires_next_link() {
        let last: Page = serde_json::from_str(
            r#"{"data": [], "paging": {"cursors": {"before": "a", "after": "b"}}}"#,
        )
        .unwrap();
        assert_eq!(last.next_cursor(), None);

        let more: Page = serde_json::from_str(
            r#"{"data": [], "paging": {"cursors": {"after": "b"}, "next": "https://graph/next"}}"#,
        )
        .unwrap();
        assert_eq!(more.next_cursor(), Some("b"));
    }

    #[test]
    fn page_without_data_is_empty() {
        let page: Page = serde_json::from_str("{}").unwrap();
        assert!(page.data.is_empty());
        assert!(page.next_cursor().is_none());
    }

    #[test]
    fn missing_scopes_lists_only_absent_ones() {
        let info = TokenInfo {
            is_valid: true,
            scopes: vec!["instagram_basic".into(), "pages_read_engagement".into()],
        };
        assert_eq!(info.missing_scopes(), vec!["instagram_manage_insights"]);
    }
}
