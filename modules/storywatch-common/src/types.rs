use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorywatchError;

// --- Accounts ---

/// The fixed set of business accounts the fetcher collects stories for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Account {
    Npi,
    Lt,
    Md,
    Re,
    Sml,
}

impl Account {
    pub const ALL: [Account; 5] = [
        Account::Npi,
        Account::Lt,
        Account::Md,
        Account::Re,
        Account::Sml,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Account::Npi => "NPI",
            Account::Lt => "LT",
            Account::Md => "MD",
            Account::Re => "RE",
            Account::Sml => "SML",
        }
    }

    /// Case-insensitive lookup; `None` for names outside the configured set.
    pub fn parse(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        Account::ALL.into_iter().find(|a| a.as_str() == upper)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Story metrics ---

/// Where a record's navigation numbers came from.
///
/// `TotalOnly` means the breakdown columns are unknown (null), not zero.
/// `NotReported` means the API gave no navigation figure at all; the record
/// carries zero activity so it still sums, but consumers can tell it apart
/// from a measured zero (`Breakdown` with all counts at 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationProvenance {
    Breakdown,
    TotalOnly,
    NotReported,
}

impl NavigationProvenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            NavigationProvenance::Breakdown => "breakdown",
            NavigationProvenance::TotalOnly => "total_only",
            NavigationProvenance::NotReported => "not_reported",
        }
    }
}

/// One row per story per account per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryMetricRecord {
    pub account_id: Account,
    pub story_id: String,
    pub fetched_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub media_type: Option<String>,
    pub permalink: Option<String>,

    pub views: u64,
    pub reach: u64,

    pub navigation_total: u64,
    pub navigation_taps_forward: Option<u64>,
    pub navigation_taps_back: Option<u64>,
    pub navigation_taps_exit: Option<u64>,
    pub navigation_swipe_forward: Option<u64>,
    pub navigation_provenance: NavigationProvenance,
    /// Breakdown present but its sum differs from the reported total.
    pub navigation_mismatch: bool,

    pub replies: u64,
    pub shares: u64,
    pub total_interactions: u64,
    pub profile_visits: u64,
    pub follows: u64,

    pub exit_rate: Option<f64>,
    pub reply_rate: Option<f64>,
    pub forward_rate: Option<f64>,
    pub back_rate: Option<f64>,
}

impl StoryMetricRecord {
    /// Sum of the four breakdown counts, or `None` when the breakdown is unknown.
    pub fn breakdown_sum(&self) -> Option<u64> {
        Some(
            self.navigation_taps_forward?
                + self.navigation_taps_back?
                + self.navigation_taps_exit?
                + self.navigation_swipe_forward?,
        )
    }
}

// --- Per-account and batch results ---

/// Serializable error descriptor carried in results and responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}

impl From<&StorywatchError> for ErrorDetail {
    fn from(err: &StorywatchError) -> Self {
        ErrorDetail {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Success,
    Partial,
    Failed,
}

/// How an account's run ended. Failures are values, never panics or errors
/// that unwind past the account loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountOutcome {
    Success,
    /// Some story payloads could not be normalized and were dropped.
    Partial { dropped: usize, error: ErrorDetail },
    Failed(ErrorDetail),
}

#[derive(Debug, Clone)]
pub struct AccountFetchResult {
    pub account: Account,
    pub outcome: AccountOutcome,
    pub records: Vec<StoryMetricRecord>,
    pub retry_count: u32,
    /// Object key of the data file, once written.
    pub data_path: Option<String>,
    pub duration_ms: u64,
}

impl AccountFetchResult {
    pub fn failed(account: Account, err: &StorywatchError, retry_count: u32) -> Self {
        Self {
            account,
            outcome: AccountOutcome::Failed(err.into()),
            records: Vec::new(),
            retry_count,
            data_path: None,
            duration_ms: 0,
        }
    }

    pub fn status(&self) -> AccountStatus {
        match self.outcome {
            AccountOutcome::Success => AccountStatus::Success,
            AccountOutcome::Partial { .. } => AccountStatus::Partial,
            AccountOutcome::Failed(_) => AccountStatus::Failed,
        }
    }

    pub fn error(&self) -> Option<&ErrorDetail> {
        match &self.outcome {
            AccountOutcome::Success => None,
            AccountOutcome::Partial { error, .. } => Some(error),
            AccountOutcome::Failed(error) => Some(error),
        }
    }

    pub fn dropped_records(&self) -> usize {
        match self.outcome {
            AccountOutcome::Partial { dropped, .. } => dropped,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchRunResult {
    pub run_id: Uuid,
    /// Logical partition date in the pipeline's time zone.
    pub run_date: NaiveDate,
    /// One entry per requested account, in request order.
    pub results: Vec<AccountFetchResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_parse_is_case_insensitive() {
        assert_eq!(Account::parse("npi"), Some(Account::Npi));
        assert_eq!(Account::parse(" Sml "), Some(Account::Sml));
        assert_eq!(Account::parse("XYZ"), None);
    }

    #[test]
    fn account_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Account::Lt).unwrap(), "\"LT\"");
    }

    #[test]
    fn failed_result_exposes_error() {
        let err = StorywatchError::PermanentApi("token expired".into());
        let result = AccountFetchResult::failed(Account::Md, &err, 0);

        assert_eq!(result.status(), AccountStatus::Failed);
        assert_eq!(result.error().unwrap().kind, "permanent_api_error");
        assert!(result.records.is_empty());
    }
}
