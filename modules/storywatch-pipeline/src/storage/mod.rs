//! Partitioned Parquet output plus schema sidecars.
//!
//! Layout (relative to the bucket / storage root):
//!
//! ```text
//! Instagram/<ACCOUNT>/insights/stories/<run_date>/instagram_story_metrics_<run_date>.parquet
//! Instagram/<ACCOUNT>/schemas/stories/<run_date>/instagram_story_metrics_<run_date>_schema.json
//! ```
//!
//! Keys depend only on `(account, run_date)`, and every backend replaces an
//! existing object wholesale, so re-running a date overwrites instead of
//! appending.

pub mod gcs;
pub mod local;
pub mod memory;
mod columnar;

pub use gcs::GcsObjectStore;
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use columnar::{encode_records, schema_document, SCHEMA_VERSION};

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use tracing::info;

use storywatch_common::{Account, StoryMetricRecord, StorywatchError};

pub const PLATFORM: &str = "Instagram";
pub const DATASET: &str = "instagram_story_metrics";

const PARQUET_CONTENT_TYPE: &str = "application/octet-stream";
const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Encoding error: {0}")]
    Encode(String),
}

/// Minimal blob store: whole-object put (replace semantics) and get.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Human-readable location of `key`, used in logs and responses.
    fn uri(&self, key: &str) -> String;
}

pub fn data_key(account: Account, run_date: NaiveDate) -> String {
    format!("{PLATFORM}/{account}/insights/stories/{run_date}/{DATASET}_{run_date}.parquet")
}

pub fn schema_key(account: Account, run_date: NaiveDate) -> String {
    format!("{PLATFORM}/{account}/schemas/stories/{run_date}/{DATASET}_{run_date}_schema.json")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    pub data_uri: String,
    pub schema_uri: String,
    pub rows: usize,
    pub bytes: usize,
}

pub struct StorageWriter {
    store: Arc<dyn ObjectStore>,
}

impl StorageWriter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Write one partition. An empty `records` slice still produces a data
    /// object (zero rows, full schema).
    pub async fn write(
        &self,
        account: Account,
        run_date: NaiveDate,
        records: &[StoryMetricRecord],
    ) -> Result<WriteResult, StorywatchError> {
        let data_key = data_key(account, run_date);
        let schema_key = schema_key(account, run_date);

        let data = encode_records(records, run_date).map_err(|e| write_error(&data_key, e))?;
        let bytes = data.len();
        let schema = serde_json::to_vec_pretty(&schema_document())
            .map_err(|e| write_error(&schema_key, StoreError::Encode(e.to_string())))?;

        self.store
            .put(&data_key, data, PARQUET_CONTENT_TYPE)
            .await
            .map_err(|e| write_error(&data_key, e))?;
        self.store
            .put(&schema_key, Bytes::from(schema), JSON_CONTENT_TYPE)
            .await
            .map_err(|e| write_error(&schema_key, e))?;

        let result = WriteResult {
            data_uri: self.store.uri(&data_key),
            schema_uri: self.store.uri(&schema_key),
            rows: records.len(),
            bytes,
        };
        info!(%account, %run_date, rows = result.rows, bytes, uri = %result.data_uri, "Wrote partition");
        Ok(result)
    }
}

fn write_error(key: &str, err: StoreError) -> StorywatchError {
    StorywatchError::StorageWrite {
        key: key.to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_partition_layout() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            data_key(Account::Npi, date),
            "Instagram/NPI/insights/stories/2024-03-01/instagram_story_metrics_2024-03-01.parquet"
        );
        assert_eq!(
            schema_key(Account::Sml, date),
            "Instagram/SML/schemas/stories/2024-03-01/instagram_story_metrics_2024-03-01_schema.json"
        );
    }
}
