use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use graph_insights_client::{GraphClient, RetryPolicy, RetryState};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use storywatch_common::{
    Account, AccountFetchResult, AccountOutcome, AccountStatus, BatchRunResult, Config,
    StorageBackend, StorywatchError,
};

use crate::local_file::FileStoryApi;
use crate::metrics::{MetricsClient, StoryApi};
use crate::processor::AccountProcessor;
use crate::storage::{GcsObjectStore, LocalObjectStore, ObjectStore, StorageWriter};

const RETRY_JITTER: Duration = Duration::from_millis(250);

/// Drives one invocation: accounts in request order, each fetched, aggregated
/// and written before the next starts.
pub struct BatchCoordinator {
    processor: AccountProcessor,
    writer: StorageWriter,
    run_deadline: Option<Duration>,
    verify_token: bool,
}

impl BatchCoordinator {
    pub fn new(processor: AccountProcessor, writer: StorageWriter) -> Self {
        Self {
            processor,
            writer,
            run_deadline: None,
            verify_token: false,
        }
    }

    pub fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = Some(deadline);
        self
    }

    pub fn with_token_verification(mut self, enabled: bool) -> Self {
        self.verify_token = enabled;
        self
    }

    /// Process `accounts` for `run_date`. Always returns one result per
    /// requested account, in order; a failing account never stops the rest.
    pub async fn run(&self, accounts: &[Account], run_date: NaiveDate) -> BatchRunResult {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("batch", %run_id, %run_date);
        self.run_inner(run_id, accounts, run_date)
            .instrument(span)
            .await
    }

    async fn run_inner(&self, run_id: Uuid, accounts: &[Account], run_date: NaiveDate) -> BatchRunResult {
        let deadline = self
            .run_deadline
            .map(|d| tokio::time::Instant::now() + d);
        info!(accounts = accounts.len(), "Starting story metrics batch");

        if self.verify_token {
            let mut state = RetryState::new(deadline);
            if let Err(e) = self.processor.metrics().verify_token(&mut state).await {
                error!(error = %e, "Token verification failed, failing every account");
                let results = accounts
                    .iter()
                    .map(|&a| AccountFetchResult::failed(a, &e, state.retries()))
                    .collect();
                return BatchRunResult {
                    run_id,
                    run_date,
                    results,
                };
            }
        }

        let mut results = Vec::with_capacity(accounts.len());
        for &account in accounts {
            let mut result = self.processor.process(account, deadline).await;
            if result.status() != AccountStatus::Failed {
                self.persist(&mut result, run_date).await;
            }
            results.push(result);
        }

        let failed = results
            .iter()
            .filter(|r| r.status() == AccountStatus::Failed)
            .count();
        let records: usize = results.iter().map(|r| r.records.len()).sum();
        info!(records, failed, "Batch complete");

        BatchRunResult {
            run_id,
            run_date,
            results,
        }
    }

    async fn persist(&self, result: &mut AccountFetchResult, run_date: NaiveDate) {
        match self
            .writer
            .write(result.account, run_date, &result.records)
            .await
        {
            Ok(written) => result.data_path = Some(written.data_uri),
            Err(e) => {
                warn!(account = %result.account, error = %e, "Partition write failed");
                result.outcome = AccountOutcome::Failed((&e).into());
            }
        }
    }
}

/// Wire the production coordinator from configuration.
pub fn build_coordinator(config: &Config) -> Result<BatchCoordinator, StorywatchError> {
    let graph = GraphClient::new(&config.fb_access_token, &config.graph_api_version)
        .map_err(|e| StorywatchError::Config(format!("failed to build Graph API client: {e}")))?;
    let mut api: Arc<dyn StoryApi> = Arc::new(graph);
    if let Some(path) = &config.stories_file {
        api = Arc::new(FileStoryApi::load(path, api)?);
    }

    let policy = RetryPolicy {
        max_retries: config.max_retries,
        base_delay: config.retry_base,
        max_delay: config.retry_max,
        max_jitter: RETRY_JITTER,
    };
    let metrics = MetricsClient::new(
        api,
        policy,
        config.business_ids.clone(),
        config.max_pages,
        config.data_window_days,
    );

    let store: Arc<dyn ObjectStore> = match config.storage_backend {
        StorageBackend::Gcs => {
            let token = config.gcs_access_token.as_deref().ok_or_else(|| {
                StorywatchError::Config("GCS_ACCESS_TOKEN is required for the gcs storage backend".into())
            })?;
            let gcs = GcsObjectStore::new(&config.bucket, token)
                .map_err(|e| StorywatchError::Config(format!("failed to build GCS client: {e}")))?;
            Arc::new(gcs)
        }
        StorageBackend::Local => Arc::new(LocalObjectStore::new(&config.bucket)),
    };

    Ok(
        BatchCoordinator::new(AccountProcessor::new(metrics), StorageWriter::new(store))
            .with_run_deadline(config.run_deadline)
            .with_token_verification(config.verify_token_scopes),
    )
}
