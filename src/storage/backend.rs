//! Document container trait
//!
//! A container holds JSON documents grouped by partition key. Every document
//! is addressed by `(partition key, id)`; the partition key value is read from
//! the document at the container's partition key path.
//!
//! # Design Principles
//!
//! 1. **Sync Interface**: All methods are synchronous. Async callers go
//!    through `tokio::task::spawn_blocking` (see [`super::run_blocking`]).
//!
//! 2. **Error Handling**: All methods return `Result<T>` using the crate's
//!    error type. Absence on read and delete is a value, not an error.
//!
//! 3. **Immutable Self**: Methods take `&self` so handles can be shared
//!    behind `Arc` across tasks.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use super::query::QuerySpec;
use crate::error::Result;

/// Health status of a container or the client
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Whether the probe succeeded
    pub healthy: bool,
    /// Latency of the probe in milliseconds
    pub latency_ms: f64,
    /// Error message if unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Additional health details
    pub details: HashMap<String, String>,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            latency_ms: 0.0,
            error: None,
            details: HashMap::new(),
        }
    }
}

impl HealthStatus {
    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Per-query options: partition scope, page size and resume point
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedOptions {
    /// Restrict the scan to one partition; `None` means cross-partition
    pub partition_key: Option<String>,
    /// Page size; `None` returns every match in one page
    pub max_item_count: Option<usize>,
    /// Continuation token from a previous page
    pub continuation: Option<String>,
}

impl FeedOptions {
    pub fn single_partition(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: Some(partition_key.into()),
            ..Default::default()
        }
    }

    pub fn cross_partition() -> Self {
        Self::default()
    }

    pub fn with_max_item_count(mut self, max_item_count: usize) -> Self {
        self.max_item_count = Some(max_item_count);
        self
    }

    pub fn with_continuation(mut self, continuation: Option<String>) -> Self {
        self.continuation = continuation;
        self
    }
}

/// One page of query results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    pub items: Vec<Value>,
    /// Token for the next page; absent on the last page
    pub continuation: Option<String>,
}

/// Coarse size information for one container
#[derive(Debug, Clone, Serialize)]
pub struct ContainerStats {
    pub name: String,
    pub partition_key_path: String,
    pub document_count: u64,
}

/// A partitioned collection of JSON documents
pub trait DocumentContainer: Send + Sync {
    /// Container name
    fn name(&self) -> &str;

    /// Document path holding the partition key, e.g. `tenantId`
    fn partition_key_path(&self) -> &str;

    /// Insert a new document.
    ///
    /// Fails with `Conflict` if a live document with the same partition key
    /// and id exists. Returns the stored document.
    fn create_item(&self, document: &Value) -> Result<Value>;

    /// Read a document; `None` if absent or expired
    fn read_item(&self, id: &str, partition_key: &str) -> Result<Option<Value>>;

    /// Replace an existing document as a whole.
    ///
    /// The partition key comes from the document. Fails with `NotFound` if
    /// there is nothing to replace.
    fn replace_item(&self, id: &str, document: &Value) -> Result<Value>;

    /// Insert or replace a document
    fn upsert_item(&self, document: &Value) -> Result<Value>;

    /// Physically delete a document; false if there was nothing to delete
    fn delete_item(&self, id: &str, partition_key: &str) -> Result<bool>;

    /// Run a row-producing query, one page at a time
    fn query_items(&self, query: &QuerySpec, options: &FeedOptions) -> Result<FeedPage>;

    /// Run an aggregate query (`COUNT`, `MAX`); `None` when there is no value
    fn query_scalar(&self, query: &QuerySpec, partition_key: Option<&str>) -> Result<Option<Value>>;

    /// Liveness probe; reports failures in the status rather than raising
    fn probe(&self) -> HealthStatus;

    /// Number of live documents
    fn count_documents(&self) -> Result<u64>;

    /// Physically remove expired documents, returning how many were removed
    fn purge_expired(&self) -> Result<usize>;
}
