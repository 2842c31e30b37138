//! Optimistic concurrency check.
//!
//! The guard only reads; callers must invoke it on the transaction that will
//! perform the write so the compared version is the one the write replaces.
//! Conflicts are never retried here: the caller re-fetches and resubmits.

use crate::app_error::{AppError, AppResult, VersionConflict};
use crate::types::EntityType;
use rusqlite::{params, Connection, OptionalExtension};

/// Stored columns the mutator needs after a successful check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedRow {
    pub row_id: i64,
    pub version: i64,
    pub workspace_id: String,
}

fn read_guarded_row(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
) -> AppResult<Option<GuardedRow>> {
    let sql = format!(
        "SELECT id, version, workspace_id FROM {} WHERE {}=?1 AND is_active=1",
        entity_type.table(),
        entity_type.business_id_column()
    );
    conn.query_row(&sql, params![entity_id], |row| {
        Ok(GuardedRow {
            row_id: row.get(0)?,
            version: row.get(1)?,
            workspace_id: row.get(2)?,
        })
    })
    .optional()
    .map_err(|e| AppError::db("ES_DB_QUERY_FAILED", "failed reading entity version", &e))
}

/// Current version of an active entity, if any.
pub fn current_version(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
) -> AppResult<Option<i64>> {
    Ok(read_guarded_row(conn, entity_type, entity_id)?.map(|row| row.version))
}

/// Stored version matched by business id, active or not.
pub fn stored_version(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
) -> AppResult<Option<i64>> {
    let sql = format!(
        "SELECT version FROM {} WHERE {}=?1",
        entity_type.table(),
        entity_type.business_id_column()
    );
    conn.query_row(&sql, params![entity_id], |row| row.get(0))
        .optional()
        .map_err(|e| AppError::db("ES_DB_QUERY_FAILED", "failed reading entity version", &e))
}

pub fn check_version(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
    expected_version: i64,
) -> AppResult<GuardedRow> {
    let row = read_guarded_row(conn, entity_type, entity_id)?
        .ok_or_else(|| AppError::not_found(entity_type, entity_id))?;

    if row.version != expected_version {
        tracing::warn!(
            %entity_type,
            entity_id,
            expected_version,
            actual_version = row.version,
            "version conflict"
        );
        return Err(VersionConflict {
            entity_type,
            entity_id: entity_id.to_string(),
            expected_version,
            actual_version: row.version,
        }
        .into());
    }

    Ok(row)
}
