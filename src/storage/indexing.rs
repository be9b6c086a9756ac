//! Container indexing policies
//!
//! Composite indexes are realised as partial expression indexes on the shared
//! `documents` table, restricted to the owning container's rows. A composite
//! field equal to the partition key path maps onto the `partition_key` column.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::query::{json_path_expr, validate_path};
use crate::error::{HistoryError, Result};
use crate::types::SortOrder;

static IDENTIFIER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,62}$").unwrap());

/// Validate a container, database or index name
pub fn validate_identifier(name: &str) -> Result<()> {
    if IDENTIFIER_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(HistoryError::InvalidInput(format!(
            "Invalid name '{}'. Use letters, digits and underscore, starting with a letter.",
            name
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexingMode {
    #[default]
    Consistent,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexField {
    pub path: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeIndex {
    pub name: String,
    pub fields: Vec<IndexField>,
}

impl CompositeIndex {
    pub fn new(name: &str, fields: &[(&str, SortOrder)]) -> Self {
        Self {
            name: name.to_string(),
            fields: fields
                .iter()
                .map(|(path, order)| IndexField {
                    path: path.to_string(),
                    order: *order,
                })
                .collect(),
        }
    }
}

/// Indexing configuration recorded with a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingPolicy {
    pub indexing_mode: IndexingMode,
    pub automatic: bool,
    pub included_paths: Vec<String>,
    pub excluded_paths: Vec<String>,
    pub composite_indexes: Vec<CompositeIndex>,
}

impl Default for IndexingPolicy {
    fn default() -> Self {
        Self {
            indexing_mode: IndexingMode::Consistent,
            automatic: true,
            included_paths: vec!["/*".to_string()],
            excluded_paths: vec!["/\"_etag\"/?".to_string()],
            composite_indexes: Vec::new(),
        }
    }
}

impl IndexingPolicy {
    /// Policy for the conversations container (partitioned by tenant)
    pub fn conversations() -> Self {
        use SortOrder::{Asc, Desc};
        Self {
            composite_indexes: vec![
                CompositeIndex::new(
                    "tenant_last_message",
                    &[("tenantId", Asc), ("timeline.lastMessageAt", Desc)],
                ),
                CompositeIndex::new(
                    "tenant_participant_last_message",
                    &[
                        ("tenantId", Asc),
                        ("participants[0].userId", Asc),
                        ("timeline.lastMessageAt", Desc),
                    ],
                ),
                CompositeIndex::new(
                    "tenant_category_last_message",
                    &[
                        ("tenantId", Asc),
                        ("categories[0].categoryId", Asc),
                        ("timeline.lastMessageAt", Desc),
                    ],
                ),
            ],
            ..Default::default()
        }
    }

    /// Policy for the messages container (partitioned by conversation)
    pub fn messages() -> Self {
        use SortOrder::{Asc, Desc};
        Self {
            composite_indexes: vec![
                CompositeIndex::new(
                    "conversation_sequence",
                    &[("conversationId", Asc), ("sequenceNumber", Asc)],
                ),
                CompositeIndex::new(
                    "conversation_timestamp",
                    &[("conversationId", Asc), ("timestamp", Asc)],
                ),
                CompositeIndex::new("tenant_timestamp", &[("tenantId", Asc), ("timestamp", Desc)]),
            ],
            ..Default::default()
        }
    }

    /// DDL creating this policy's indexes for one container
    pub fn create_statements(
        &self,
        container_id: i64,
        container_name: &str,
        partition_key_path: &str,
    ) -> Result<Vec<String>> {
        validate_identifier(container_name)?;
        if self.indexing_mode == IndexingMode::None {
            return Ok(Vec::new());
        }

        self.composite_indexes
            .iter()
            .map(|index| {
                validate_identifier(&index.name)?;
                if index.fields.is_empty() {
                    return Err(HistoryError::InvalidInput(format!(
                        "Composite index '{}' has no fields",
                        index.name
                    )));
                }

                let columns = index
                    .fields
                    .iter()
                    .map(|field| {
                        validate_path(&field.path)?;
                        let column = if field.path == partition_key_path {
                            "partition_key".to_string()
                        } else {
                            json_path_expr("body", &field.path)?
                        };
                        Ok(format!("{} {}", column, field.order.as_sql()))
                    })
                    .collect::<Result<Vec<_>>>()?;

                Ok(format!(
                    "CREATE INDEX IF NOT EXISTS idx_{}_{} ON documents({}) WHERE container_id = {}",
                    container_name,
                    index.name,
                    columns.join(", "),
                    container_id
                ))
            })
            .collect()
    }
}
