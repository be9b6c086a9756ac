//! SQLite implementation of [`DocumentContainer`]
//!
//! All containers of a database share the `documents` table and are told
//! apart by `container_id`. Documents carry a server timestamp `_ts` (unix
//! seconds) and, when `ttl > 0`, an absolute expiry.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use rusqlite::types::ToSql;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

use super::backend::{DocumentContainer, FeedOptions, FeedPage, HealthStatus};
use super::connection::Storage;
use super::indexing::{validate_identifier, IndexingPolicy};
use super::query::{json_each_expr, json_path_expr, Projection, QuerySpec, BODY};
use crate::error::{HistoryError, Result};

/// Provisioned throughput of a database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThroughputMode {
    #[default]
    Serverless,
    Provisioned,
}

impl ThroughputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThroughputMode::Serverless => "serverless",
            ThroughputMode::Provisioned => "provisioned",
        }
    }
}

impl std::str::FromStr for ThroughputMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "serverless" => Ok(ThroughputMode::Serverless),
            "provisioned" => Ok(ThroughputMode::Provisioned),
            _ => Err(format!("Unknown throughput mode: {}", s)),
        }
    }
}

/// Settings used when a container has to be created
#[derive(Debug, Clone)]
pub struct ContainerProperties {
    pub name: String,
    pub partition_key_path: String,
    pub indexing_policy: IndexingPolicy,
}

/// Check that a database exists
pub fn read_database(storage: &Storage, name: &str) -> Result<()> {
    let found = storage.with_connection(|conn| {
        Ok(conn
            .query_row("SELECT 1 FROM databases WHERE name = ?1", [name], |_| Ok(()))
            .optional()?)
    })?;
    found.ok_or_else(|| HistoryError::NotFound(format!("database '{}'", name)))
}

/// Create a database; `Conflict` if it already exists
pub fn create_database(
    storage: &Storage,
    name: &str,
    throughput_mode: ThroughputMode,
    max_throughput: Option<u32>,
) -> Result<()> {
    validate_identifier(name)?;
    let inserted = storage.with_connection(|conn| {
        Ok(conn.execute(
            "INSERT OR IGNORE INTO databases (name, throughput_mode, max_throughput) VALUES (?1, ?2, ?3)",
            params![name, throughput_mode.as_str(), max_throughput],
        )?)
    })?;

    if inserted == 0 {
        return Err(HistoryError::Conflict(format!("database '{}' already exists", name)));
    }
    info!(database = %name, throughput = throughput_mode.as_str(), "Created database");
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct Cursor {
    offset: usize,
}

fn encode_continuation(offset: usize) -> Result<String> {
    let raw = serde_json::to_vec(&Cursor { offset })?;
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

fn decode_continuation(token: &str) -> Result<usize> {
    let invalid = || HistoryError::InvalidInput("Malformed continuation token".to_string());
    let raw = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
    let cursor: Cursor = serde_json::from_slice(&raw).map_err(|_| invalid())?;
    Ok(cursor.offset)
}

fn sql_value_to_json(value: rusqlite::types::Value) -> Value {
    use rusqlite::types::Value as Sql;
    match value {
        Sql::Null => Value::Null,
        Sql::Integer(i) => Value::from(i),
        Sql::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Sql::Text(s) => Value::String(s),
        Sql::Blob(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
    }
}

/// A container stored in SQLite
#[derive(Debug)]
pub struct SqliteContainer {
    storage: Storage,
    container_id: i64,
    database: String,
    name: String,
    partition_key_path: String,
}

impl SqliteContainer {
    /// Open an existing container; `NotFound` if it was never created
    pub fn open(storage: &Storage, database: &str, name: &str) -> Result<Self> {
        let row = storage.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, partition_key_path FROM containers WHERE database_name = ?1 AND name = ?2",
                    params![database, name],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?)
        })?;

        let (container_id, partition_key_path) = row.ok_or_else(|| {
            HistoryError::NotFound(format!("container '{}' in database '{}'", name, database))
        })?;

        Ok(Self {
            storage: storage.clone(),
            container_id,
            database: database.to_string(),
            name: name.to_string(),
            partition_key_path,
        })
    }

    /// Create a container and its indexes; `Conflict` if it already exists
    pub fn create(storage: &Storage, database: &str, properties: &ContainerProperties) -> Result<Self> {
        validate_identifier(&properties.name)?;
        super::query::validate_path(&properties.partition_key_path)?;
        read_database(storage, database)?;

        let policy_json = serde_json::to_string(&properties.indexing_policy)?;
        let container_id = storage.with_transaction(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO containers (database_name, name, partition_key_path, indexing_policy)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    database,
                    properties.name,
                    properties.partition_key_path,
                    policy_json
                ],
            )?;
            if inserted == 0 {
                return Err(HistoryError::Conflict(format!(
                    "container '{}' already exists",
                    properties.name
                )));
            }

            let container_id = conn.last_insert_rowid();
            for ddl in properties.indexing_policy.create_statements(
                container_id,
                &properties.name,
                &properties.partition_key_path,
            )? {
                conn.execute(&ddl, [])?;
            }
            Ok(container_id)
        })?;

        info!(
            database = %database,
            container = %properties.name,
            partition_key = %properties.partition_key_path,
            "Created container"
        );

        Ok(Self {
            storage: storage.clone(),
            container_id,
            database: database.to_string(),
            name: properties.name.clone(),
            partition_key_path: properties.partition_key_path.clone(),
        })
    }

    fn document_id(document: &Value) -> Result<&str> {
        document
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| HistoryError::InvalidInput("Document requires a non-empty 'id'".to_string()))
    }

    fn partition_key_of(&self, document: &Value) -> Result<String> {
        let pointer = format!("/{}", self.partition_key_path.replace('.', "/"));
        document
            .pointer(&pointer)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                HistoryError::InvalidInput(format!(
                    "Document is missing partition key '{}'",
                    self.partition_key_path
                ))
            })
    }

    /// Stored body, server timestamp and absolute expiry for a document
    fn prepare(document: &Value, now: i64) -> Result<(Value, String, Option<i64>)> {
        let mut stored = document.clone();
        match stored.as_object_mut() {
            Some(map) => {
                map.insert("_ts".to_string(), Value::from(now));
            }
            None => {
                return Err(HistoryError::InvalidInput(
                    "Document must be a JSON object".to_string(),
                ))
            }
        }

        let expires_at = document
            .get("ttl")
            .and_then(Value::as_i64)
            .filter(|ttl| *ttl > 0)
            .map(|ttl| now + ttl);

        let body = serde_json::to_string(&stored)?;
        Ok((stored, body, expires_at))
    }

    fn select_sql(&self, query: &QuerySpec, single_partition: bool, paged: bool) -> Result<String> {
        let (select, from) = match &query.projection {
            Projection::Documents => ("d.body".to_string(), "documents d".to_string()),
            Projection::Count => ("COUNT(*)".to_string(), "documents d".to_string()),
            Projection::Max(path) => (
                format!("MAX({})", json_path_expr(BODY, path)?),
                "documents d".to_string(),
            ),
            Projection::DistinctElements { array, fields } => {
                let columns = if fields.is_empty() {
                    "e.value".to_string()
                } else {
                    fields
                        .iter()
                        .map(|f| json_path_expr("e.value", f))
                        .collect::<Result<Vec<_>>>()?
                        .join(", ")
                };
                (
                    format!("DISTINCT {}", columns),
                    format!("documents d, {} e", json_each_expr(BODY, array)?),
                )
            }
        };

        let mut sql = format!(
            "SELECT {} FROM {} WHERE d.container_id = {} AND (d.expires_at IS NULL OR d.expires_at > :__now)",
            select, from, self.container_id
        );
        if single_partition {
            sql.push_str(" AND d.partition_key = :__pk");
        }
        if !query.filter.is_empty() {
            sql.push_str(" AND (");
            sql.push_str(&query.filter);
            sql.push(')');
        }

        match &query.projection {
            Projection::Documents => {
                let order = query.order_clause()?;
                if !order.is_empty() {
                    sql.push_str(" ORDER BY ");
                    sql.push_str(&order);
                }
            }
            Projection::DistinctElements { .. } => sql.push_str(" ORDER BY 1"),
            Projection::Count | Projection::Max(_) => return Ok(sql),
        }

        if paged {
            sql.push_str(" LIMIT :__limit OFFSET :__offset");
        }
        Ok(sql)
    }

    fn column_count(projection: &Projection) -> usize {
        match projection {
            Projection::DistinctElements { fields, .. } if !fields.is_empty() => fields.len(),
            _ => 1,
        }
    }
}

impl DocumentContainer for SqliteContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn partition_key_path(&self) -> &str {
        &self.partition_key_path
    }

    fn create_item(&self, document: &Value) -> Result<Value> {
        let id = Self::document_id(document)?;
        let partition_key = self.partition_key_of(document)?;
        let now = Utc::now().timestamp();
        let (stored, body, expires_at) = Self::prepare(document, now)?;

        self.storage.with_transaction(|conn| {
            // An expired document no longer occupies its id
            conn.execute(
                "DELETE FROM documents WHERE container_id = ?1 AND partition_key = ?2 AND id = ?3
                 AND expires_at IS NOT NULL AND expires_at <= ?4",
                params![self.container_id, partition_key, id, now],
            )?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO documents (container_id, partition_key, id, body, _ts, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![self.container_id, partition_key, id, body, now, expires_at],
            )?;
            if inserted == 0 {
                return Err(HistoryError::Conflict(format!(
                    "document '{}' already exists in partition '{}'",
                    id, partition_key
                )));
            }
            Ok(())
        })?;

        debug!(container = %self.name, id = %id, "Created document");
        Ok(stored)
    }

    fn read_item(&self, id: &str, partition_key: &str) -> Result<Option<Value>> {
        let now = Utc::now().timestamp();
        let body: Option<String> = self.storage.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT body FROM documents WHERE container_id = ?1 AND partition_key = ?2 AND id = ?3
                     AND (expires_at IS NULL OR expires_at > ?4)",
                    params![self.container_id, partition_key, id, now],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        body.map(|b| serde_json::from_str(&b).map_err(HistoryError::from))
            .transpose()
    }

    fn replace_item(&self, id: &str, document: &Value) -> Result<Value> {
        if Self::document_id(document)? != id {
            return Err(HistoryError::InvalidInput(format!(
                "Document id does not match '{}'",
                id
            )));
        }
        let partition_key = self.partition_key_of(document)?;
        let now = Utc::now().timestamp();
        let (stored, body, expires_at) = Self::prepare(document, now)?;

        let updated = self.storage.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE documents SET body = ?1, _ts = ?2, expires_at = ?3
                 WHERE container_id = ?4 AND partition_key = ?5 AND id = ?6
                 AND (expires_at IS NULL OR expires_at > ?2)",
                params![body, now, expires_at, self.container_id, partition_key, id],
            )?)
        })?;

        if updated == 0 {
            return Err(HistoryError::NotFound(format!(
                "document '{}' in partition '{}'",
                id, partition_key
            )));
        }
        Ok(stored)
    }

    fn upsert_item(&self, document: &Value) -> Result<Value> {
        let id = Self::document_id(document)?;
        let partition_key = self.partition_key_of(document)?;
        let now = Utc::now().timestamp();
        let (stored, body, expires_at) = Self::prepare(document, now)?;

        self.storage.with_connection(|conn| {
            conn.execute(
                "INSERT INTO documents (container_id, partition_key, id, body, _ts, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(container_id, partition_key, id)
                 DO UPDATE SET body = excluded.body, _ts = excluded._ts, expires_at = excluded.expires_at",
                params![self.container_id, partition_key, id, body, now, expires_at],
            )?;
            Ok(())
        })?;
        Ok(stored)
    }

    fn delete_item(&self, id: &str, partition_key: &str) -> Result<bool> {
        let now = Utc::now().timestamp();
        let deleted = self.storage.with_connection(|conn| {
            Ok(conn.execute(
                "DELETE FROM documents WHERE container_id = ?1 AND partition_key = ?2 AND id = ?3
                 AND (expires_at IS NULL OR expires_at > ?4)",
                params![self.container_id, partition_key, id, now],
            )?)
        })?;
        Ok(deleted > 0)
    }

    fn query_items(&self, query: &QuerySpec, options: &FeedOptions) -> Result<FeedPage> {
        if query.projection.is_aggregate() {
            return Err(HistoryError::InvalidInput(
                "Aggregate projections go through query_scalar".to_string(),
            ));
        }

        let offset = match &options.continuation {
            Some(token) => decode_continuation(token)?,
            None => 0,
        };
        let page_size = options.max_item_count;
        let sql = self.select_sql(query, options.partition_key.is_some(), page_size.is_some())?;
        debug!(container = %self.name, sql = %sql, params = ?query.param_names(), "Executing query");

        let now = Utc::now().timestamp();
        // One extra row tells whether another page exists
        let fetch_limit = page_size.map(|n| n.saturating_add(1) as i64);
        let offset_param = offset as i64;

        let mut bound: Vec<(&str, &dyn ToSql)> = query
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();
        bound.push((":__now", &now as &dyn ToSql));
        if let Some(pk) = &options.partition_key {
            bound.push((":__pk", pk as &dyn ToSql));
        }
        if let Some(limit) = &fetch_limit {
            bound.push((":__limit", limit as &dyn ToSql));
            bound.push((":__offset", &offset_param as &dyn ToSql));
        }

        let columns = Self::column_count(&query.projection);
        let rows: Vec<Vec<rusqlite::types::Value>> = self.storage.with_connection(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(bound.as_slice(), |row| {
                    (0..columns).map(|i| row.get(i)).collect::<rusqlite::Result<Vec<_>>>()
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let item = match &query.projection {
                Projection::Documents => match row.into_iter().next() {
                    Some(rusqlite::types::Value::Text(body)) => serde_json::from_str(&body)?,
                    _ => {
                        return Err(HistoryError::Storage(format!(
                            "Unexpected document row in container '{}'",
                            self.name
                        )))
                    }
                },
                Projection::DistinctElements { fields, .. } if !fields.is_empty() => {
                    let object: serde_json::Map<String, Value> = fields
                        .iter()
                        .cloned()
                        .zip(row.into_iter().map(sql_value_to_json))
                        .collect();
                    Value::Object(object)
                }
                _ => row
                    .into_iter()
                    .next()
                    .map(sql_value_to_json)
                    .unwrap_or(Value::Null),
            };
            items.push(item);
        }

        let continuation = match page_size {
            Some(n) if items.len() > n => {
                items.truncate(n);
                Some(encode_continuation(offset + n)?)
            }
            _ => None,
        };

        Ok(FeedPage {
            items,
            continuation,
        })
    }

    fn query_scalar(&self, query: &QuerySpec, partition_key: Option<&str>) -> Result<Option<Value>> {
        if !query.projection.is_aggregate() {
            return Err(HistoryError::InvalidInput(
                "query_scalar requires an aggregate projection".to_string(),
            ));
        }

        let sql = self.select_sql(query, partition_key.is_some(), false)?;
        debug!(container = %self.name, sql = %sql, "Executing scalar query");

        let now = Utc::now().timestamp();
        let mut bound: Vec<(&str, &dyn ToSql)> = query
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();
        bound.push((":__now", &now as &dyn ToSql));
        if let Some(pk) = &partition_key {
            bound.push((":__pk", pk as &dyn ToSql));
        }

        let value: rusqlite::types::Value = self.storage.with_connection(|conn| {
            Ok(conn.query_row(&sql, bound.as_slice(), |row| row.get(0))?)
        })?;

        Ok(match sql_value_to_json(value) {
            Value::Null => None,
            v => Some(v),
        })
    }

    fn probe(&self) -> HealthStatus {
        let start = Instant::now();
        let result = self.storage.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM containers WHERE id = ?1",
                [self.container_id],
                |row| row.get::<_, i64>(0),
            )?)
        });
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let details = HashMap::from([
            ("database".to_string(), self.database.clone()),
            ("container".to_string(), self.name.clone()),
            ("db_path".to_string(), self.storage.db_path().to_string()),
        ]);

        match result {
            Ok(1) => HealthStatus {
                healthy: true,
                latency_ms,
                error: None,
                details,
            },
            Ok(_) => HealthStatus {
                healthy: false,
                latency_ms,
                error: Some(format!("container '{}' no longer exists", self.name)),
                details,
            },
            Err(e) => HealthStatus {
                healthy: false,
                latency_ms,
                error: Some(e.to_string()),
                details,
            },
        }
    }

    fn count_documents(&self) -> Result<u64> {
        let count = self.query_scalar(&QuerySpec::all().with_projection(Projection::Count), None)?;
        Ok(count.and_then(|v| v.as_u64()).unwrap_or(0))
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        let purged = self.storage.with_connection(|conn| {
            Ok(conn.execute(
                "DELETE FROM documents WHERE container_id = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
                params![self.container_id, now],
            )?)
        })?;
        if purged > 0 {
            info!(container = %self.name, purged, "Purged expired documents");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::query::QueryBuilder;
    use crate::types::SortOrder;
    use serde_json::json;

    fn setup() -> (Storage, SqliteContainer) {
        let storage = Storage::open_in_memory().unwrap();
        create_database(&storage, "testdb", ThroughputMode::Serverless, None).unwrap();
        let container = SqliteContainer::create(
            &storage,
            "testdb",
            &ContainerProperties {
                name: "items".to_string(),
                partition_key_path: "tenantId".to_string(),
                indexing_policy: IndexingPolicy::conversations(),
            },
        )
        .unwrap();
        (storage, container)
    }

    fn doc(id: &str, tenant: &str, n: i64) -> Value {
        json!({"id": id, "tenantId": tenant, "n": n, "tags": ["a", format!("t{}", n)]})
    }

    #[test]
    fn test_create_read_conflict() {
        let (_storage, c) = setup();
        let stored = c.create_item(&doc("1", "acme", 1)).unwrap();
        assert!(stored.get("_ts").is_some());

        let read = c.read_item("1", "acme").unwrap().unwrap();
        assert_eq!(read["n"], 1);
        assert!(c.read_item("1", "other").unwrap().is_none());

        let err = c.create_item(&doc("1", "acme", 2)).unwrap_err();
        assert!(matches!(err, HistoryError::Conflict(_)));
        // Same id in another partition is a different document
        c.create_item(&doc("1", "globex", 2)).unwrap();
    }

    #[test]
    fn test_replace_and_upsert() {
        let (_storage, c) = setup();
        let err = c.replace_item("1", &doc("1", "acme", 1)).unwrap_err();
        assert!(err.is_not_found());

        c.upsert_item(&doc("1", "acme", 1)).unwrap();
        c.upsert_item(&doc("1", "acme", 5)).unwrap();
        assert_eq!(c.read_item("1", "acme").unwrap().unwrap()["n"], 5);

        c.replace_item("1", &doc("1", "acme", 9)).unwrap();
        assert_eq!(c.read_item("1", "acme").unwrap().unwrap()["n"], 9);

        assert!(c.replace_item("2", &doc("1", "acme", 9)).is_err());
    }

    #[test]
    fn test_delete() {
        let (_storage, c) = setup();
        c.create_item(&doc("1", "acme", 1)).unwrap();
        assert!(c.delete_item("1", "acme").unwrap());
        assert!(!c.delete_item("1", "acme").unwrap());
        assert!(c.read_item("1", "acme").unwrap().is_none());
    }

    #[test]
    fn test_rejects_bad_documents() {
        let (_storage, c) = setup();
        assert!(c.create_item(&json!({"tenantId": "acme"})).is_err());
        assert!(c.create_item(&json!({"id": "1"})).is_err());
        assert!(c.create_item(&json!(["id"])).is_err());
    }

    #[test]
    fn test_ttl_expiry_hides_and_purges() {
        let (storage, c) = setup();
        let mut expiring = doc("1", "acme", 1);
        expiring["ttl"] = json!(3600);
        c.create_item(&expiring).unwrap();
        let mut forever = doc("2", "acme", 2);
        forever["ttl"] = json!(-1);
        c.create_item(&forever).unwrap();
        assert_eq!(c.count_documents().unwrap(), 2);

        storage
            .with_connection(|conn| {
                conn.execute("UPDATE documents SET expires_at = 1 WHERE id = '1'", [])?;
                Ok(())
            })
            .unwrap();

        assert!(c.read_item("1", "acme").unwrap().is_none());
        assert_eq!(c.count_documents().unwrap(), 1);
        assert_eq!(c.purge_expired().unwrap(), 1);
        assert_eq!(c.purge_expired().unwrap(), 0);

        // The id is free again once expired
        c.create_item(&doc("1", "acme", 3)).unwrap();
    }

    #[test]
    fn test_query_pages_with_continuation() {
        let (_storage, c) = setup();
        for n in 0..5 {
            c.create_item(&doc(&format!("d{}", n), "acme", n)).unwrap();
        }
        c.create_item(&doc("x", "globex", 100)).unwrap();

        let mut q = QueryBuilder::new();
        q.order_by("n", SortOrder::Asc).unwrap();
        let spec = q.build();

        let options = FeedOptions::single_partition("acme").with_max_item_count(2);
        let first = c.query_items(&spec, &options).unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0]["n"], 0);
        let token = first.continuation.clone().unwrap();

        let second = c
            .query_items(&spec, &options.clone().with_continuation(Some(token)))
            .unwrap();
        assert_eq!(second.items[0]["n"], 2);

        let third = c
            .query_items(&spec, &options.clone().with_continuation(second.continuation))
            .unwrap();
        assert_eq!(third.items.len(), 1);
        assert!(third.continuation.is_none());

        let everything = c.query_items(&spec, &FeedOptions::cross_partition()).unwrap();
        assert_eq!(everything.items.len(), 6);
        assert!(everything.continuation.is_none());
    }

    #[test]
    fn test_malformed_continuation_rejected() {
        let (_storage, c) = setup();
        let options = FeedOptions::cross_partition()
            .with_max_item_count(1)
            .with_continuation(Some("not a token!".to_string()));
        let err = c.query_items(&QuerySpec::all(), &options).unwrap_err();
        assert!(matches!(err, HistoryError::InvalidInput(_)));
    }

    #[test]
    fn test_filtered_query_binds_values() {
        let (_storage, c) = setup();
        c.create_item(&doc("1", "acme", 1)).unwrap();
        c.create_item(&doc("2", "acme", 2)).unwrap();

        let mut q = QueryBuilder::new();
        q.array_contains("tags", "tag", "t2").unwrap();
        let page = c
            .query_items(&q.build(), &FeedOptions::single_partition("acme"))
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0]["id"], "2");

        let mut q = QueryBuilder::new();
        q.eq("tenantId", "tenant_id", "acme' OR '1'='1").unwrap();
        let page = c.query_items(&q.build(), &FeedOptions::cross_partition()).unwrap();
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_scalar_and_distinct() {
        let (_storage, c) = setup();
        for n in 1..=3 {
            c.create_item(&doc(&n.to_string(), "acme", n)).unwrap();
        }

        let max = c
            .query_scalar(
                &QuerySpec::all().with_projection(Projection::Max("n".to_string())),
                Some("acme"),
            )
            .unwrap();
        assert_eq!(max, Some(json!(3)));

        let none = c
            .query_scalar(
                &QuerySpec::all().with_projection(Projection::Max("n".to_string())),
                Some("nobody"),
            )
            .unwrap();
        assert_eq!(none, None);

        let tags = c
            .query_items(
                &QuerySpec::all().with_projection(Projection::DistinctElements {
                    array: "tags".to_string(),
                    fields: Vec::new(),
                }),
                &FeedOptions::single_partition("acme"),
            )
            .unwrap();
        assert_eq!(tags.items, vec![json!("a"), json!("t1"), json!("t2"), json!("t3")]);

        assert!(c
            .query_items(&QuerySpec::all().with_projection(Projection::Count), &FeedOptions::default())
            .is_err());
    }

    #[test]
    fn test_open_existing_and_missing() {
        let (storage, c) = setup();
        let reopened = SqliteContainer::open(&storage, "testdb", "items").unwrap();
        assert_eq!(reopened.partition_key_path(), "tenantId");
        assert_eq!(reopened.container_id, c.container_id);

        let err = SqliteContainer::open(&storage, "testdb", "missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_create_twice_conflicts() {
        let (storage, _c) = setup();
        let err = SqliteContainer::create(
            &storage,
            "testdb",
            &ContainerProperties {
                name: "items".to_string(),
                partition_key_path: "tenantId".to_string(),
                indexing_policy: IndexingPolicy::default(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, HistoryError::Conflict(_)));

        let err = create_database(&storage, "testdb", ThroughputMode::Serverless, None).unwrap_err();
        assert!(matches!(err, HistoryError::Conflict(_)));
    }

    #[test]
    fn test_probe_reports_health() {
        let (_storage, c) = setup();
        let status = c.probe();
        assert!(status.healthy);
        assert_eq!(status.details.get("container").unwrap(), "items");
    }
}
