//! threadstore - multi-tenant chat history
//!
//! Conversations and messages persisted in a partitioned document store,
//! with sequencing, denormalized metrics and filtered, cached search.

pub mod config;
pub mod error;
pub mod history;
pub mod model;
pub mod search;
pub mod storage;
pub mod types;

pub use config::HistoryConfig;
pub use error::{HistoryError, Result};
pub use history::HistoryManager;
pub use search::{SearchEngine, SearchQuery};
pub use storage::StoreClient;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
