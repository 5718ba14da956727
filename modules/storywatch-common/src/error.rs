use thiserror::Error;

/// Failure taxonomy of the fetch-aggregate-store pipeline.
///
/// Every variant except `Config` is caught at the account boundary and
/// turned into an account result; `Config` aborts the whole invocation.
#[derive(Error, Debug)]
pub enum StorywatchError {
    #[error("Transient API error after {retries} retries: {message}")]
    TransientApi { message: String, retries: u32 },

    #[error("Permanent API error: {0}")]
    PermanentApi(String),

    #[error("Record parse error (story {story_id}): {message}")]
    RecordParse { story_id: String, message: String },

    #[error("Storage write error ({key}): {message}")]
    StorageWrite { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorywatchError {
    /// Stable identifier used in responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StorywatchError::TransientApi { .. } => "transient_api_error",
            StorywatchError::PermanentApi(_) => "permanent_api_error",
            StorywatchError::RecordParse { .. } => "record_parse_error",
            StorywatchError::StorageWrite { .. } => "storage_write_error",
            StorywatchError::Config(_) => "config_error",
        }
    }

    pub fn parse(story_id: Option<&str>, message: impl Into<String>) -> Self {
        StorywatchError::RecordParse {
            story_id: story_id.unwrap_or("unknown").to_string(),
            message: message.into(),
        }
    }
}
