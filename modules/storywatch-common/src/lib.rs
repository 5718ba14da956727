pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, StorageBackend};
pub use error::StorywatchError;
pub use types::*;
