use std::time::Instant;

use chrono::Utc;
use graph_insights_client::RetryState;
use tracing::{info, warn, Instrument};

use storywatch_common::{
    Account, AccountFetchResult, AccountOutcome, ErrorDetail, StorywatchError,
};

use crate::metrics::MetricsClient;
use crate::navigation;

/// Runs fetch + normalization for a single account and classifies the outcome.
///
/// Never returns an error: every failure becomes an [`AccountOutcome::Failed`]
/// or [`AccountOutcome::Partial`] inside the result.
pub struct AccountProcessor {
    metrics: MetricsClient,
}

impl AccountProcessor {
    pub fn new(metrics: MetricsClient) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &MetricsClient {
        &self.metrics
    }

    pub async fn process(
        &self,
        account: Account,
        deadline: Option<tokio::time::Instant>,
    ) -> AccountFetchResult {
        let span = tracing::info_span!("account", %account);
        self.process_inner(account, deadline).instrument(span).await
    }

    async fn process_inner(
        &self,
        account: Account,
        deadline: Option<tokio::time::Instant>,
    ) -> AccountFetchResult {
        let started = Instant::now();
        let mut state = RetryState::new(deadline);

        let payloads = match self.metrics.fetch(account, &mut state).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, kind = e.kind(), retries = state.retries(), "Account fetch failed");
                let mut result = AccountFetchResult::failed(account, &e, state.retries());
                result.duration_ms = started.elapsed().as_millis() as u64;
                return result;
            }
        };

        let fetched_at = Utc::now();
        let mut records = Vec::with_capacity(payloads.len());
        let mut parse_errors: Vec<StorywatchError> = Vec::new();

        for payload in &payloads {
            match navigation::normalize(account, payload, fetched_at) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(story_id = payload.story_id().unwrap_or("unknown"), error = %e, "Dropping malformed story payload");
                    parse_errors.push(e);
                }
            }
        }

        let outcome = classify(payloads.len(), records.len(), &parse_errors);
        info!(
            records = records.len(),
            dropped = parse_errors.len(),
            retries = state.retries(),
            "Account processed"
        );

        AccountFetchResult {
            account,
            outcome,
            records,
            retry_count: state.retries(),
            data_path: None,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// success: nothing dropped (including "no stories at all");
/// partial: some parsed, some dropped;
/// failed: stories existed but none could be parsed.
fn classify(fetched: usize, parsed: usize, errors: &[StorywatchError]) -> AccountOutcome {
    let Some(first) = errors.first() else {
        return AccountOutcome::Success;
    };
    let dropped = errors.len();

    if parsed == 0 && fetched > 0 {
        return AccountOutcome::Failed(ErrorDetail {
            kind: first.kind().to_string(),
            message: format!("all {fetched} story payloads were malformed; first: {first}"),
        });
    }

    AccountOutcome::Partial {
        dropped,
        error: ErrorDetail {
            kind: first.kind().to_string(),
            message: format!("dropped {dropped} of {fetched} story payloads; first: {first}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_error() -> StorywatchError {
        StorywatchError::parse(Some("1"), "bad")
    }

    #[test]
    fn no_stories_is_success() {
        assert_eq!(classify(0, 0, &[]), AccountOutcome::Success);
    }

    #[test]
    fn some_dropped_is_partial() {
        match classify(5, 4, &[parse_error()]) {
            AccountOutcome::Partial { dropped, error } => {
                assert_eq!(dropped, 1);
                assert_eq!(error.kind, "record_parse_error");
            }
            other => panic!("expected partial, got {other:?}"),
        }
    }

    #[test]
    fn all_dropped_is_failed() {
        let outcome = classify(2, 0, &[parse_error(), parse_error()]);
        assert!(matches!(outcome, AccountOutcome::Failed(_)));
    }
}
