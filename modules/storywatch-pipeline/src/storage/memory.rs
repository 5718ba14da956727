use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use super::{ObjectStore, StoreError};

/// In-process store for tests and dry runs.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, (Bytes, String)>>,
    fail_prefix: Option<String>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects every put whose key starts with `prefix`.
    pub fn failing_on(prefix: impl Into<String>) -> Self {
        Self {
            objects: Mutex::default(),
            fail_prefix: Some(prefix.into()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.lock().get(key).map(|(body, _)| body.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.lock().get(key).map(|(_, ct)| ct.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Bytes, String)>> {
        // A poisoned map is still a valid map.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StoreError> {
        if let Some(prefix) = &self.fail_prefix {
            if key.starts_with(prefix.as_str()) {
                return Err(StoreError::Api {
                    status: 503,
                    message: format!("simulated outage for {key}"),
                });
            }
        }
        self.lock()
            .insert(key.to_string(), (body, content_type.to_string()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.object(key))
    }

    fn uri(&self, key: &str) -> String {
        format!("mem://{key}")
    }
}
