use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

/// Graph API error codes that signal throttling (application, user, page and
/// custom-rate-limit buckets).
const RATE_LIMIT_CODES: &[i64] = &[4, 17, 32, 613];

/// Business use case rate limits are reported in this range.
const BUC_RATE_LIMIT_CODES: std::ops::RangeInclusive<i64> = 80000..=80014;

/// Expired, revoked or otherwise invalid access token.
const OAUTH_CODE: i64 = 190;

/// Generic permission error; also used for "Not enough viewers" on story insights.
const PERMISSION_CODE: i64 = 10;

/// Invalid parameter; with subcode 33 the object does not exist.
const INVALID_PARAMETER_CODE: i64 = 100;
const OBJECT_MISSING_SUBCODE: i64 = 33;

/// Media posted before the account became a business account has no insights.
const PRE_CONVERSION_SUBCODE: i64 = 2108006;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Rate limited (status {status}): {message}")]
    RateLimited { status: u16, message: String },

    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Unauthorized (status {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Invalid account or object (status {status}): {message}")]
    InvalidAccount { status: u16, message: String },

    #[error("Bad request (status {status}): {message}")]
    BadRequest { status: u16, message: String },

    #[error("No insights available: {0}")]
    NoInsights(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl GraphError {
    /// Whether retrying the same request later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GraphError::RateLimited { .. } | GraphError::Server { .. } | GraphError::Network(_)
        )
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GraphError::RateLimited { .. })
    }

    /// Classify a non-success response from its HTTP status and the Graph
    /// `error` envelope (if the body carried one).
    pub fn from_response(status: u16, body: &str) -> Self {
        let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);
        let code = envelope.as_ref().and_then(|e| e.code);
        let subcode = envelope.as_ref().and_then(|e| e.error_subcode);
        let message = envelope
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| body.to_string());

        if status == 429
            || code.is_some_and(|c| RATE_LIMIT_CODES.contains(&c) || BUC_RATE_LIMIT_CODES.contains(&c))
        {
            return GraphError::RateLimited { status, message };
        }
        if status >= 500 {
            return GraphError::Server { status, message };
        }
        if subcode == Some(PRE_CONVERSION_SUBCODE)
            || (code == Some(PERMISSION_CODE) && message.contains("Not enough viewers"))
        {
            return GraphError::NoInsights(message);
        }
        if status == 401 || code == Some(OAUTH_CODE) || code == Some(PERMISSION_CODE) {
            return GraphError::Unauthorized { status, message };
        }
        if status == 404
            || (code == Some(INVALID_PARAMETER_CODE) && subcode == Some(OBJECT_MISSING_SUBCODE))
        {
            return GraphError::InvalidAccount { status, message };
        }
        GraphError::BadRequest { status, message }
    }
}

impl From<reqwest::Error> for GraphError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GraphError::Parse(err.to_string())
        } else {
            GraphError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::Parse(err.to_string())
    }
}

#[derive(Debug, serde::Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<i64>,
    error_subcode: Option<i64>,
}
