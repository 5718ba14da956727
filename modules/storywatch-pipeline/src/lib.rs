//! Fetch, aggregate and store pipeline for Instagram story insights.
//!
//! Data flows trigger → [`BatchCoordinator`] → [`AccountProcessor`] per account
//! → [`MetricsClient`] → [`navigation::normalize`] → [`StorageWriter`], and the
//! finished batch is rendered by [`BatchResponse::build`].

pub mod coordinator;
pub mod local_file;
pub mod metrics;
pub mod navigation;
pub mod processor;
pub mod response;
pub mod storage;

pub use coordinator::{build_coordinator, BatchCoordinator};
pub use local_file::FileStoryApi;
pub use metrics::{MetricsClient, RawStoryPayload, StoryApi};
pub use processor::AccountProcessor;
pub use response::{AccountSummary, BatchResponse};
pub use storage::{ObjectStore, StorageWriter, WriteResult};
