use crate::app_error::{AppError, AppResult};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::fs;
use std::path::Path;
use std::time::Duration;

const LATEST_SCHEMA_VERSION: i64 = 2;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const MIGRATIONS: [(i64, &str, &str); 2] = [
    (1, "0001", include_str!("../migrations/0001_init.sql")),
    (2, "0002", include_str!("../migrations/0002_audit.sql")),
];

pub fn open_db(db_path: &Path) -> AppResult<Connection> {
    open_db_with_timeout(db_path, DEFAULT_BUSY_TIMEOUT_MS)
}

pub fn open_db_with_timeout(db_path: &Path, busy_timeout_ms: u64) -> AppResult<Connection> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::new(
                "ES_DB_OPEN_FAILED",
                "db",
                "failed to create database parent directory",
                false,
                serde_json::json!({ "error": e.to_string() }),
            )
        })?;
    }

    let conn = Connection::open(db_path).map_err(|e| {
        AppError::new(
            "ES_DB_OPEN_FAILED",
            "db",
            "failed to open sqlite database",
            false,
            serde_json::json!({ "error": e.to_string(), "path": db_path }),
        )
    })?;

    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| AppError::db("ES_DB_OPEN_FAILED", "failed to enable foreign_keys pragma", &e))?;

    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
        .map_err(|e| AppError::db("ES_DB_OPEN_FAILED", "failed to set busy timeout", &e))?;

    apply_migrations(&conn)?;
    Ok(conn)
}

pub fn apply_migrations(conn: &Connection) -> AppResult<()> {
    let current = schema_version(conn)?;
    if current > LATEST_SCHEMA_VERSION {
        return Err(AppError::new(
            "ES_DB_SCHEMA_INCOMPATIBLE",
            "db",
            "database schema version is newer than supported",
            false,
            serde_json::json!({ "current": current, "latest": LATEST_SCHEMA_VERSION }),
        ));
    }

    for (version, label, sql) in MIGRATIONS {
        if schema_version(conn)? >= version {
            continue;
        }
        apply_migration(conn, version, label, sql)?;
        tracing::debug!(version, label, "applied schema migration");
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i64, label: &str, sql: &str) -> AppResult<()> {
    let migration_error = |message: &str, e: rusqlite::Error| {
        AppError::new(
            "ES_DB_MIGRATION_FAILED",
            "db",
            message,
            false,
            serde_json::json!({ "error": e.to_string(), "migration": label }),
        )
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| migration_error("failed to begin migration transaction", e))?;

    tx.execute_batch(sql)
        .map_err(|e| migration_error("failed to apply migration", e))?;

    tx.pragma_update(None, "user_version", version)
        .map_err(|e| migration_error("failed to set schema user_version", e))?;

    tx.commit()
        .map_err(|e| migration_error("failed to commit migration transaction", e))
}

pub fn schema_version(conn: &Connection) -> AppResult<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| {
            AppError::new(
                "ES_DB_SCHEMA_INCOMPATIBLE",
                "db",
                "failed to read schema version",
                false,
                serde_json::json!({ "error": e.to_string() }),
            )
        })
}

/// Write transaction holding the database write lock from `BEGIN`.
///
/// A second writer blocks for up to the busy timeout and then reads the
/// first writer's committed version.
pub fn begin_immediate(conn: &Connection) -> AppResult<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(|e| AppError::db("ES_DB_TX_FAILED", "failed to begin write transaction", &e))
}

pub fn commit(tx: Transaction<'_>) -> AppResult<()> {
    tx.commit()
        .map_err(|e| AppError::db("ES_DB_TX_FAILED", "failed to commit transaction", &e))
}
