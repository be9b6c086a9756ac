//! Partitioned document store on SQLite
//!
//! Handles provisioning, JSON document CRUD, parameterized queries and
//! document expiry.

mod backend;
mod client;
mod connection;
mod indexing;
mod migrations;
pub mod query;
mod sqlite_container;

pub use backend::{ContainerStats, DocumentContainer, FeedOptions, FeedPage, HealthStatus};
pub use client::StoreClient;
pub use connection::{Storage, IN_MEMORY};
pub use indexing::{validate_identifier, CompositeIndex, IndexField, IndexingMode, IndexingPolicy};
pub use query::{Comparison, Projection, QueryBuilder, QuerySpec, QueryValue};
pub use sqlite_container::{
    create_database, read_database, ContainerProperties, SqliteContainer, ThroughputMode,
};

use crate::error::{HistoryError, Result};

/// Run blocking store work off the async executor
pub async fn run_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HistoryError::Internal(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_blocking_returns_value() {
        let value = tokio_test::block_on(run_blocking(|| Ok(41 + 1))).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_run_blocking_propagates_error() {
        let result: Result<()> = tokio_test::block_on(run_blocking(|| {
            Err(HistoryError::Storage("offline".to_string()))
        }));
        assert!(matches!(result, Err(HistoryError::Storage(_))));
    }

    #[test]
    fn test_run_blocking_maps_panic_to_internal() {
        let result: Result<()> = tokio_test::block_on(run_blocking(|| panic!("boom")));
        assert!(matches!(result, Err(HistoryError::Internal(_))));
    }
}
