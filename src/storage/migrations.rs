//! Database migrations for the document store

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < SCHEMA_VERSION {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Initial schema (v1): databases, containers and JSON documents
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS databases (
            name TEXT PRIMARY KEY,
            throughput_mode TEXT NOT NULL DEFAULT 'serverless',
            max_throughput INTEGER,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS containers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            database_name TEXT NOT NULL REFERENCES databases(name),
            name TEXT NOT NULL,
            partition_key_path TEXT NOT NULL,
            indexing_policy TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(database_name, name)
        );

        -- One row per document; the body is the full JSON document
        CREATE TABLE IF NOT EXISTS documents (
            container_id INTEGER NOT NULL REFERENCES containers(id),
            partition_key TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT NOT NULL,
            _ts INTEGER NOT NULL,
            expires_at INTEGER,
            PRIMARY KEY (container_id, partition_key, id)
        );

        CREATE INDEX IF NOT EXISTS idx_documents_id ON documents(container_id, id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;

    Ok(())
}

/// TTL support (v2): expiry lookups for purge and read filtering
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_documents_expiry
            ON documents(container_id, expires_at) WHERE expires_at IS NOT NULL;

        -- Record migration
        INSERT INTO schema_version (version) VALUES (2);
        "#,
    )?;

    tracing::info!("Migration v2: document expiry index created");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('databases', 'containers', 'documents')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}
