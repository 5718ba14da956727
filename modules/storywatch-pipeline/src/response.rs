use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use storywatch_common::{Account, AccountStatus, BatchRunResult, ErrorDetail};

/// Per-account entry in the invocation response.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub account: Account,
    pub status: AccountStatus,
    pub record_count: usize,
    /// Always serialized; `null` on success.
    pub error: Option<ErrorDetail>,
    pub retry_count: u32,
    pub dropped_records: usize,
    pub data_path: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    /// `success` when every account succeeded, otherwise `partial`.
    pub status: &'static str,
    pub run_id: Uuid,
    pub run_date: NaiveDate,
    pub accounts_processed: usize,
    pub total_records: usize,
    pub results: Vec<AccountSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_accounts: Vec<Account>,
}

impl BatchResponse {
    pub fn build(run: &BatchRunResult) -> Self {
        let results: Vec<AccountSummary> = run
            .results
            .iter()
            .map(|r| AccountSummary {
                account: r.account,
                status: r.status(),
                record_count: r.records.len(),
                error: r.error().cloned(),
                retry_count: r.retry_count,
                dropped_records: r.dropped_records(),
                data_path: r.data_path.clone(),
                duration_ms: r.duration_ms,
            })
            .collect();

        let failed_accounts: Vec<Account> = results
            .iter()
            .filter(|s| s.status == AccountStatus::Failed)
            .map(|s| s.account)
            .collect();
        let all_succeeded = results.iter().all(|s| s.status == AccountStatus::Success);

        BatchResponse {
            status: if all_succeeded { "success" } else { "partial" },
            run_id: run.run_id,
            run_date: run.run_date,
            accounts_processed: results.len(),
            total_records: results.iter().map(|s| s.record_count).sum(),
            results,
            failed_accounts,
        }
    }
}

#[cfg(test)]
mod tests {
    use storywatch_common::{AccountFetchResult, AccountOutcome, StorywatchError};

    use super::*;

    fn success(account: Account) -> AccountFetchResult {
        AccountFetchResult {
            account,
            outcome: AccountOutcome::Success,
            records: Vec::new(),
            retry_count: 0,
            data_path: Some(format!("mem://{account}")),
            duration_ms: 5,
        }
    }

    fn run(results: Vec<AccountFetchResult>) -> BatchRunResult {
        BatchRunResult {
            run_id: Uuid::new_v4(),
            run_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            results,
        }
    }

    #[test]
    fn all_success_reports_success_with_null_errors() {
        let resp = BatchResponse::build(&run(vec![success(Account::Npi), success(Account::Lt)]));
        assert_eq!(resp.status, "success");
        assert_eq!(resp.accounts_processed, 2);

        let json = serde_json::to_value(&resp).unwrap();
        assert!(json["results"][0]["error"].is_null());
        assert_eq!(json["results"][1]["account"], "LT");
        assert!(json.get("failed_accounts").is_none());
    }

    #[test]
    fn any_failure_is_partial_and_listed() {
        let err = StorywatchError::PermanentApi("token expired".into());
        let resp = BatchResponse::build(&run(vec![
            success(Account::Npi),
            AccountFetchResult::failed(Account::Md, &err, 0),
        ]));

        assert_eq!(resp.status, "partial");
        assert_eq!(resp.failed_accounts, vec![Account::Md]);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["results"][1]["status"], "failed");
        assert_eq!(json["results"][1]["error"]["kind"], "permanent_api_error");
    }

    #[test]
    fn partial_account_makes_batch_partial_without_failing_it() {
        let mut partial = success(Account::Re);
        partial.outcome = AccountOutcome::Partial {
            dropped: 1,
            error: (&StorywatchError::parse(Some("9"), "missing views")).into(),
        };
        let resp = BatchResponse::build(&run(vec![partial]));

        assert_eq!(resp.status, "partial");
        assert!(resp.failed_accounts.is_empty());
        assert_eq!(resp.results[0].dropped_records, 1);
    }
}
