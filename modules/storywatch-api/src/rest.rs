use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use storywatch_common::Account;
use storywatch_pipeline::{build_coordinator, BatchResponse};

use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct FetchRequest {
    #[serde(default)]
    accounts: Option<Vec<String>>,
}

impl FetchRequest {
    /// A missing, empty or unparseable body is treated as `{}`.
    fn from_body(body: &[u8]) -> Self {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Self::default();
        }
        serde_json::from_slice(body).unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring unparseable request body");
            Self::default()
        })
    }
}

/// Requested names mapped onto the supported set. Order and repeats are kept
/// so the response has one entry per requested name; unsupported names are
/// dropped. `None` or an empty list selects every account.
pub fn resolve_accounts(requested: Option<&[String]>) -> Vec<Account> {
    let Some(names) = requested.filter(|n| !n.is_empty()) else {
        return Account::ALL.to_vec();
    };

    let mut accounts = Vec::with_capacity(names.len());
    for name in names {
        match Account::parse(name) {
            Some(a) => accounts.push(a),
            None => warn!(account = name.as_str(), "Skipping unsupported account"),
        }
    }
    accounts
}

fn supported_accounts() -> Vec<&'static str> {
    Account::ALL.iter().map(|a| a.as_str()).collect()
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let config = &state.config;
    let configured: Vec<&str> = Account::ALL
        .iter()
        .filter(|a| config.business_id(**a).is_some())
        .map(|a| a.as_str())
        .collect();

    Json(json!({
        "status": "healthy",
        "service": "instagram-story-metrics",
        "timestamp": Utc::now().to_rfc3339(),
        "supported_accounts": supported_accounts(),
        "environment": {
            "bucket": config.bucket,
            "storage_backend": format!("{:?}", config.storage_backend).to_lowercase(),
            "graph_api_version": config.graph_api_version,
            "timezone": config.timezone.to_string(),
            "accounts_configured": configured,
            "fb_access_token": "configured",
        },
    }))
}

pub async fn fetch(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = FetchRequest::from_body(&body);
    let accounts = resolve_accounts(request.accounts.as_deref());
    if accounts.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "error",
                "error": "No valid accounts specified",
                "supported_accounts": supported_accounts(),
            })),
        )
            .into_response();
    }
    run_batch(&state, &accounts).await
}

pub async fn fetch_all(State(state): State<Arc<AppState>>) -> Response {
    run_batch(&state, &Account::ALL).await
}

async fn run_batch(state: &AppState, accounts: &[Account]) -> Response {
    let coordinator = match build_coordinator(&state.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Pipeline could not be initialised");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "error": e.to_string()})),
            )
                .into_response();
        }
    };

    let run_date = state.config.run_date(Utc::now());
    let run = coordinator.run(accounts, run_date).await;
    (StatusCode::OK, Json(BatchResponse::build(&run))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn absent_or_empty_selects_all() {
        assert_eq!(resolve_accounts(None), Account::ALL.to_vec());
        assert_eq!(resolve_accounts(Some(&[])), Account::ALL.to_vec());
    }

    #[test]
    fn keeps_order_and_repeats_but_drops_unknown() {
        let requested = names(&["md", "XYZ", "NPI", "Md"]);
        assert_eq!(
            resolve_accounts(Some(requested.as_slice())),
            vec![Account::Md, Account::Npi, Account::Md]
        );
    }

    #[test]
    fn one_entry_per_valid_requested_name() {
        let requested = names(&["LT", "LT", "NPI"]);
        let resolved = resolve_accounts(Some(requested.as_slice()));
        assert_eq!(resolved.len(), requested.len());
        assert_eq!(resolved, vec![Account::Lt, Account::Lt, Account::Npi]);
    }

    #[test]
    fn only_unknown_names_resolve_to_nothing() {
        let requested = names(&["FOO", "BAR"]);
        assert!(resolve_accounts(Some(requested.as_slice())).is_empty());
    }

    #[test]
    fn body_parsing_is_lenient() {
        assert!(FetchRequest::from_body(b"").accounts.is_none());
        assert!(FetchRequest::from_body(b"not json").accounts.is_none());
        assert_eq!(
            FetchRequest::from_body(br#"{"accounts": ["LT"]}"#).accounts,
            Some(vec!["LT".to_string()])
        );
    }
}
