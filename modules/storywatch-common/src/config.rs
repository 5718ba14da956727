use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::info;

use crate::error::StorywatchError;
use crate::types::Account;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Gcs,
    Local,
}

/// Application configuration loaded from environment variables.
/// Read once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub bucket: String,
    pub storage_backend: StorageBackend,
    pub gcs_access_token: Option<String>,

    // Graph API
    pub fb_access_token: String,
    pub graph_api_version: String,
    pub business_ids: HashMap<Account, String>,
    pub verify_token_scopes: bool,
    /// JSON export to list stories from instead of the live stories edge.
    pub stories_file: Option<PathBuf>,

    // Fetch window and limits
    pub data_window_days: u32,
    pub timezone: Tz,
    pub max_pages: u32,

    // Retry
    pub max_retries: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub run_deadline: Duration,

    // Web server
    pub web_host: String,
    pub web_port: u16,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, StorywatchError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StorywatchError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            var(key).ok_or_else(|| {
                StorywatchError::Config(format!("{key} environment variable is required"))
            })
        };

        let storage_backend = match var("STORAGE_BACKEND").as_deref() {
            None | Some("gcs") => StorageBackend::Gcs,
            Some("local") => StorageBackend::Local,
            Some(other) => {
                return Err(StorywatchError::Config(format!(
                    "STORAGE_BACKEND must be 'gcs' or 'local', got '{other}'"
                )))
            }
        };
        let gcs_access_token = var("GCS_ACCESS_TOKEN");
        if storage_backend == StorageBackend::Gcs && gcs_access_token.is_none() {
            return Err(StorywatchError::Config(
                "GCS_ACCESS_TOKEN is required for the gcs storage backend".into(),
            ));
        }

        let business_ids = Account::ALL
            .into_iter()
            .filter_map(|a| var(&format!("IG_BUSINESS_ID_{a}")).map(|id| (a, id)))
            .collect();

        let timezone_name = var("PIPELINE_TIMEZONE").unwrap_or_else(|| "US/Pacific".to_string());
        let timezone: Tz = timezone_name.parse().map_err(|e| {
            StorywatchError::Config(format!("PIPELINE_TIMEZONE '{timezone_name}' is invalid: {e}"))
        })?;

        Ok(Self {
            bucket: required("GCS_BUCKET")?,
            storage_backend,
            gcs_access_token,
            fb_access_token: required("FB_ACCESS_TOKEN")?,
            graph_api_version: var("GRAPH_API_VERSION").unwrap_or_else(|| "v21.0".to_string()),
            business_ids,
            verify_token_scopes: parse_or(&var, "VERIFY_TOKEN_SCOPES", true)?,
            stories_file: var("STORIES_FILE").map(PathBuf::from),
            data_window_days: parse_or(&var, "DATA_WINDOW_DAYS", 1)?,
            timezone,
            max_pages: parse_or(&var, "MAX_PAGES", 10)?,
            max_retries: parse_or(&var, "MAX_RETRIES", 3)?,
            retry_base: Duration::from_millis(parse_or(&var, "RETRY_BASE_MS", 1_000)?),
            retry_max: Duration::from_millis(parse_or(&var, "RETRY_MAX_MS", 30_000)?),
            run_deadline: Duration::from_secs(parse_or(&var, "RUN_DEADLINE_SECS", 540)?),
            web_host: var("WEB_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            web_port: parse_or(&var, "WEB_PORT", 8080)?,
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// The logical partition date for a run executing at `now`.
    pub fn run_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    pub fn business_id(&self, account: Account) -> Option<&str> {
        self.business_ids.get(&account).map(String::as_str)
    }

    /// Log the effective configuration with secrets left out.
    pub fn log_redacted(&self) {
        let accounts: Vec<&str> = Account::ALL
            .iter()
            .filter(|a| self.business_ids.contains_key(*a))
            .map(|a| a.as_str())
            .collect();
        info!(
            bucket = self.bucket.as_str(),
            backend = ?self.storage_backend,
            graph_api_version = self.graph_api_version.as_str(),
            accounts_with_credentials = ?accounts,
            stories_file = ?self.stories_file,
            data_window_days = self.data_window_days,
            timezone = %self.timezone,
            max_pages = self.max_pages,
            max_retries = self.max_retries,
            run_deadline_secs = self.run_deadline.as_secs(),
            "Loaded configuration"
        );
    }
}

fn parse_or<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, StorywatchError>
where
    T: std::str::FromStr,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            StorywatchError::Config(format!("{key} has an invalid value: '{raw}'"))
        }),
    }
}
