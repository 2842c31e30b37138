use crate::app_error::{AppError, AppResult};
use crate::canon_json::to_canonical_string;
use crate::hashing::{blake3_hex_prefixed, validate_blake3_prefixed};
use crate::store::DEFAULT_HISTORY_LIMIT;
use crate::types::EntityType;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};

/// One append-only audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStateChange {
    pub change_id: i64,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub field_changed: String,
    pub old_value: String,
    pub new_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
    pub changed_at_ms: i64,
    pub workspace_id: String,
    pub prev_change_hash: Option<String>,
    pub change_hash: String,
}

#[derive(Debug, Clone, Copy)]
pub struct AuditEntry<'a> {
    pub entity_type: EntityType,
    pub entity_id: &'a str,
    pub field_changed: &'a str,
    pub old_value: &'a str,
    pub new_value: &'a str,
    pub change_reason: Option<&'a str>,
    pub changed_by: Option<&'a str>,
    pub workspace_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditChainReport {
    pub checked: i64,
    pub head_hash: Option<String>,
}

fn audit_error(code: &str, message: &str, details: serde_json::Value) -> AppError {
    AppError::new(code, "audit", message, false, details)
}

fn query_failed(message: &str, e: rusqlite::Error) -> AppError {
    audit_error(
        "ES_AUDIT_QUERY_FAILED",
        message,
        serde_json::json!({ "error": e.to_string() }),
    )
}

#[allow(clippy::too_many_arguments)]
fn change_hash(
    changed_at_ms: i64,
    entity_type: EntityType,
    entity_id: &str,
    field_changed: &str,
    old_value: &str,
    new_value: &str,
    change_reason: Option<&str>,
    changed_by: Option<&str>,
    workspace_id: &str,
    prev_change_hash: Option<&str>,
) -> AppResult<String> {
    let payload = to_canonical_string(&serde_json::json!({
        "old_value": old_value,
        "new_value": new_value,
        "change_reason": change_reason,
        "changed_by": changed_by,
        "workspace_id": workspace_id,
    }))?;
    let input = format!(
        "es.audit.v1\n{}\n{}\n{}\n{}\n{}\n{}",
        changed_at_ms,
        entity_type,
        entity_id,
        field_changed,
        payload,
        prev_change_hash.unwrap_or_default()
    );
    Ok(blake3_hex_prefixed(input.as_bytes()))
}

fn change_from_row(row: &Row<'_>) -> rusqlite::Result<EntityStateChange> {
    Ok(EntityStateChange {
        change_id: row.get(0)?,
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        field_changed: row.get(3)?,
        old_value: row.get(4)?,
        new_value: row.get(5)?,
        change_reason: row.get(6)?,
        changed_by: row.get(7)?,
        changed_at_ms: row.get(8)?,
        workspace_id: row.get(9)?,
        prev_change_hash: row.get(10)?,
        change_hash: row.get(11)?,
    })
}

const CHANGE_COLUMNS: &str = "change_id, entity_type, entity_id, field_changed, old_value, new_value,
     change_reason, changed_by, changed_at_ms, workspace_id, prev_change_hash, change_hash";

/// Appends one audit row, chained to the previous row's hash.
///
/// The chain head is read on `tx`, which must hold the write lock
/// (`db::begin_immediate`) so no other writer can append in between.
pub fn record(
    tx: &Transaction<'_>,
    entry: &AuditEntry<'_>,
    now_ms: i64,
) -> AppResult<EntityStateChange> {
    if entry.entity_id.is_empty() || entry.field_changed.is_empty() {
        return Err(AppError::validation(
            "audit entry requires entity_id and field_changed",
            serde_json::json!({
                "entity_type": entry.entity_type,
                "entity_id": entry.entity_id,
                "field_changed": entry.field_changed
            }),
        ));
    }

    let prev_change_hash: Option<String> = tx
        .query_row(
            "SELECT change_hash FROM entity_state_changes ORDER BY change_id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| query_failed("failed reading audit chain head", e))?;

    let hash = change_hash(
        now_ms,
        entry.entity_type,
        entry.entity_id,
        entry.field_changed,
        entry.old_value,
        entry.new_value,
        entry.change_reason,
        entry.changed_by,
        entry.workspace_id,
        prev_change_hash.as_deref(),
    )?;

    tx.execute(
        "INSERT INTO entity_state_changes(
            entity_type, entity_id, field_changed, old_value, new_value,
            change_reason, changed_by, changed_at_ms, workspace_id, prev_change_hash, change_hash
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            entry.entity_type,
            entry.entity_id,
            entry.field_changed,
            entry.old_value,
            entry.new_value,
            entry.change_reason,
            entry.changed_by,
            now_ms,
            entry.workspace_id,
            prev_change_hash,
            hash
        ],
    )
    .map_err(|e| {
        audit_error(
            "ES_AUDIT_WRITE_FAILED",
            "failed to insert audit row",
            serde_json::json!({ "error": e.to_string(), "entity_id": entry.entity_id }),
        )
    })?;

    Ok(EntityStateChange {
        change_id: tx.last_insert_rowid(),
        entity_type: entry.entity_type,
        entity_id: entry.entity_id.to_string(),
        field_changed: entry.field_changed.to_string(),
        old_value: entry.old_value.to_string(),
        new_value: entry.new_value.to_string(),
        change_reason: entry.change_reason.map(str::to_string),
        changed_by: entry.changed_by.map(str::to_string),
        changed_at_ms: now_ms,
        workspace_id: entry.workspace_id.to_string(),
        prev_change_hash,
        change_hash: hash,
    })
}

fn resolve_limit(limit: Option<i64>) -> AppResult<i64> {
    match limit {
        None => Ok(DEFAULT_HISTORY_LIMIT),
        Some(n) if n >= 1 => Ok(n),
        Some(n) => Err(AppError::validation(
            "history limit must be >= 1",
            serde_json::json!({ "limit": n, "min": 1 }),
        )),
    }
}

fn collect_changes(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> AppResult<Vec<EntityStateChange>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| query_failed("failed preparing audit query", e))?;
    let rows = stmt
        .query_map(params, change_from_row)
        .map_err(|e| query_failed("failed querying audit rows", e))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| query_failed("failed decoding audit row", e))?);
    }
    Ok(out)
}

/// Newest-first history of one entity, capped at `limit` (default 50).
pub fn history(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
    limit: Option<i64>,
) -> AppResult<Vec<EntityStateChange>> {
    let limit = resolve_limit(limit)?;
    collect_changes(
        conn,
        &format!(
            "SELECT {CHANGE_COLUMNS} FROM entity_state_changes
             WHERE entity_type=?1 AND entity_id=?2
             ORDER BY changed_at_ms DESC, change_id DESC
             LIMIT ?3"
        ),
        params![entity_type, entity_id, limit],
    )
}

pub fn workspace_history(
    conn: &Connection,
    workspace_id: &str,
    limit: Option<i64>,
) -> AppResult<Vec<EntityStateChange>> {
    let limit = resolve_limit(limit)?;
    collect_changes(
        conn,
        &format!(
            "SELECT {CHANGE_COLUMNS} FROM entity_state_changes
             WHERE workspace_id=?1
             ORDER BY changed_at_ms DESC, change_id DESC
             LIMIT ?2"
        ),
        params![workspace_id, limit],
    )
}

/// Recomputes every link of the audit hash chain in insertion order.
pub fn verify_audit_chain(conn: &Connection) -> AppResult<AuditChainReport> {
    let changes = collect_changes(
        conn,
        &format!("SELECT {CHANGE_COLUMNS} FROM entity_state_changes ORDER BY change_id ASC"),
        [],
    )?;

    let mut prev: Option<String> = None;
    for change in &changes {
        validate_blake3_prefixed(&change.change_hash)?;
        if change.prev_change_hash != prev {
            return Err(audit_error(
                "ES_AUDIT_CHAIN_BROKEN",
                "audit row does not link to its predecessor",
                serde_json::json!({
                    "change_id": change.change_id,
                    "expected_prev": prev,
                    "actual_prev": change.prev_change_hash
                }),
            ));
        }
        let expected = change_hash(
            change.changed_at_ms,
            change.entity_type,
            &change.entity_id,
            &change.field_changed,
            &change.old_value,
            &change.new_value,
            change.change_reason.as_deref(),
            change.changed_by.as_deref(),
            &change.workspace_id,
            change.prev_change_hash.as_deref(),
        )?;
        if expected != change.change_hash {
            return Err(audit_error(
                "ES_AUDIT_CHAIN_BROKEN",
                "audit row hash does not match its content",
                serde_json::json!({ "change_id": change.change_id }),
            ));
        }
        prev = Some(change.change_hash.clone());
    }

    Ok(AuditChainReport {
        checked: changes.len() as i64,
        head_hash: prev,
    })
}
