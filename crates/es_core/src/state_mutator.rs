use crate::app_error::{AppError, AppResult, VersionConflict};
use crate::audit::{record, AuditEntry};
use crate::canon_json::to_canonical_string;
use crate::db::{begin_immediate, commit};
use crate::entity::{get_capability, get_enabler, get_story_card, Capability, Enabler, StoryCard};
use crate::store::AuditPolicy;
use crate::types::{EntityType, StateDimensions};
use crate::version_guard::{check_version, current_version};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};

pub const STATE_UPDATE_FIELD: &str = "state_update";

/// Partial update of the four state dimensions.
///
/// A dimension left as `None` is not touched; `Some("")` is an explicit
/// empty value and is written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdateRequest {
    #[serde(default)]
    pub lifecycle_state: Option<String>,
    #[serde(default)]
    pub workflow_stage: Option<String>,
    #[serde(default)]
    pub stage_status: Option<String>,
    #[serde(default)]
    pub approval_status: Option<String>,
    /// Version the caller last read.
    pub version: i64,
    #[serde(default)]
    pub change_reason: Option<String>,
}

impl StateUpdateRequest {
    pub fn new(version: i64) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn lifecycle_state(mut self, value: &str) -> Self {
        self.lifecycle_state = Some(value.to_string());
        self
    }

    pub fn workflow_stage(mut self, value: &str) -> Self {
        self.workflow_stage = Some(value.to_string());
        self
    }

    pub fn stage_status(mut self, value: &str) -> Self {
        self.stage_status = Some(value.to_string());
        self
    }

    pub fn approval_status(mut self, value: &str) -> Self {
        self.approval_status = Some(value.to_string());
        self
    }

    pub fn reason(mut self, value: &str) -> Self {
        self.change_reason = Some(value.to_string());
        self
    }

    /// `(column, value)` for every dimension present in the request.
    pub fn present_dimensions(&self) -> Vec<(&'static str, &str)> {
        [
            ("lifecycle_state", &self.lifecycle_state),
            ("workflow_stage", &self.workflow_stage),
            ("stage_status", &self.stage_status),
            ("approval_status", &self.approval_status),
        ]
        .into_iter()
        .filter_map(|(column, value)| value.as_deref().map(|v| (column, v)))
        .collect()
    }
}

fn dimension_value<'a>(state: &'a StateDimensions, column: &str) -> &'a str {
    match column {
        "lifecycle_state" => &state.lifecycle_state,
        "workflow_stage" => &state.workflow_stage,
        "stage_status" => &state.stage_status,
        _ => &state.approval_status,
    }
}

fn read_dimensions(conn: &Connection, entity_type: EntityType, row_id: i64) -> AppResult<StateDimensions> {
    conn.query_row(
        &format!(
            "SELECT lifecycle_state, workflow_stage, stage_status, approval_status FROM {} WHERE id=?1",
            entity_type.table()
        ),
        params![row_id],
        |row| {
            Ok(StateDimensions {
                lifecycle_state: row.get(0)?,
                workflow_stage: row.get(1)?,
                stage_status: row.get(2)?,
                approval_status: row.get(3)?,
            })
        },
    )
    .map_err(|e| AppError::db("ES_DB_QUERY_FAILED", "failed reading state dimensions", &e))
}

fn summarize<'a>(pairs: impl Iterator<Item = (&'static str, &'a str)>) -> AppResult<String> {
    let map: serde_json::Map<String, serde_json::Value> = pairs
        .map(|(column, value)| (column.to_string(), serde_json::Value::from(value)))
        .collect();
    to_canonical_string(&serde_json::Value::Object(map))
}

/// Applies a guarded partial state update and returns the new version.
///
/// The version check, the row update and the optional audit row share one
/// transaction; any error drops the transaction uncommitted.
pub fn apply_state_update(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
    req: &StateUpdateRequest,
    actor: Option<&str>,
    audit_policy: AuditPolicy,
    now_ms: i64,
) -> AppResult<i64> {
    let tx = begin_immediate(conn)?;
    let guarded = check_version(&tx, entity_type, entity_id, req.version)?;

    let present = req.present_dimensions();
    let audit = audit_policy.should_record(req.change_reason.as_deref());
    let before = if audit {
        Some(read_dimensions(&tx, entity_type, guarded.row_id)?)
    } else {
        None
    };

    let mut sql = format!(
        "UPDATE {} SET updated_at_ms=?, updated_by=COALESCE(?, updated_by), version=version+1",
        entity_type.table()
    );
    let mut values: Vec<Value> = vec![
        Value::Integer(now_ms),
        actor.map_or(Value::Null, |a| Value::Text(a.to_string())),
    ];
    for (column, value) in &present {
        sql.push_str(&format!(", {column}=?"));
        values.push(Value::Text(value.to_string()));
    }
    sql.push_str(" WHERE id=? AND version=?");
    values.push(Value::Integer(guarded.row_id));
    values.push(Value::Integer(req.version));

    let updated = tx
        .execute(&sql, params_from_iter(values.iter()))
        .map_err(|e| AppError::db("ES_DB_WRITE_FAILED", "failed to update entity state", &e))?;

    if updated != 1 {
        let actual = current_version(&tx, entity_type, entity_id)?
            .ok_or_else(|| AppError::not_found(entity_type, entity_id))?;
        return Err(VersionConflict {
            entity_type,
            entity_id: entity_id.to_string(),
            expected_version: req.version,
            actual_version: actual,
        }
        .into());
    }

    if let Some(before) = before {
        let old_value = summarize(
            present
                .iter()
                .map(|(column, _)| (*column, dimension_value(&before, column))),
        )?;
        let new_value = summarize(present.iter().copied())?;
        record(
            &tx,
            &AuditEntry {
                entity_type,
                entity_id,
                field_changed: STATE_UPDATE_FIELD,
                old_value: &old_value,
                new_value: &new_value,
                change_reason: req.change_reason.as_deref(),
                changed_by: actor,
                workspace_id: &guarded.workspace_id,
            },
            now_ms,
        )?;
    }

    commit(tx)?;

    let new_version = req.version + 1;
    tracing::debug!(
        %entity_type,
        entity_id,
        new_version,
        dimensions = present.len(),
        audited = audit,
        "applied state update"
    );
    Ok(new_version)
}

pub fn update_capability_state(
    conn: &Connection,
    capability_id: &str,
    req: &StateUpdateRequest,
    actor: Option<&str>,
    audit_policy: AuditPolicy,
    now_ms: i64,
) -> AppResult<Capability> {
    apply_state_update(
        conn,
        EntityType::Capability,
        capability_id,
        req,
        actor,
        audit_policy,
        now_ms,
    )?;
    get_capability(conn, capability_id)
}

pub fn update_enabler_state(
    conn: &Connection,
    enabler_id: &str,
    req: &StateUpdateRequest,
    actor: Option<&str>,
    audit_policy: AuditPolicy,
    now_ms: i64,
) -> AppResult<Enabler> {
    apply_state_update(
        conn,
        EntityType::Enabler,
        enabler_id,
        req,
        actor,
        audit_policy,
        now_ms,
    )?;
    get_enabler(conn, enabler_id)
}

pub fn update_story_card_state(
    conn: &Connection,
    card_id: &str,
    req: &StateUpdateRequest,
    actor: Option<&str>,
    audit_policy: AuditPolicy,
    now_ms: i64,
) -> AppResult<StoryCard> {
    apply_state_update(
        conn,
        EntityType::StoryCard,
        card_id,
        req,
        actor,
        audit_policy,
        now_ms,
    )?;
    get_story_card(conn, card_id)
}
