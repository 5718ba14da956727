//! Google Cloud Storage backend over the JSON API.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, Url};
use tracing::debug;

use super::{ObjectStore, StoreError};

const API_BASE: &str = "https://storage.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct GcsObjectStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    token: String,
}

impl GcsObjectStore {
    pub fn new(bucket: &str, token: &str) -> Result<Self, StoreError> {
        Self::with_base_url(API_BASE, bucket, token)
    }

    /// Point the store at an emulator or proxy.
    pub fn with_base_url(base_url: &str, bucket: &str, token: &str) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            token: token.to_string(),
        })
    }

    fn object_url(&self, key: &str) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| StoreError::Api {
            status: 0,
            message: format!("invalid storage base url: {e}"),
        })?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Api {
                status: 0,
                message: "storage base url cannot carry a path".into(),
            })?
            .pop_if_empty()
            .extend(["storage", "v1", "b", self.bucket.as_str(), "o"])
            .push(key);
        Ok(url)
    }

    async fn api_error(resp: reqwest::Response) -> StoreError {
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        StoreError::Api { status, message }
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    /// Simple media upload; GCS replaces an existing object atomically.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StoreError> {
        let url = format!("{}/upload/storage/v1/b/{}/o", self.base_url, self.bucket);
        let resp = self
            .client
            .post(&url)
            .query(&[("uploadType", "media"), ("name", key)])
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = Self::api_error(resp).await;
            debug!(key, error = %err, "GCS upload failed");
            return Err(err);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let url = self.object_url(key)?;
        let resp = self
            .client
            .get(url)
            .query(&[("alt", "media")])
            .bearer_auth(&self.token)
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(resp.bytes().await?)),
            _ => Err(Self::api_error(resp).await),
        }
    }

    fn uri(&self, key: &str) -> String {
        format!("gs://{}/{}", self.bucket, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_url_encodes_key_as_one_segment() {
        let store = GcsObjectStore::new("bronze", "t").unwrap();
        let url = store.object_url("Instagram/NPI/x.parquet").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/bronze/o/Instagram%2FNPI%2Fx.parquet"
        );
    }

    #[test]
    fn uri_uses_gs_scheme() {
        let store = GcsObjectStore::new("bronze", "t").unwrap();
        assert_eq!(store.uri("a/b"), "gs://bronze/a/b");
    }
}
