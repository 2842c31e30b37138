//! Upsert of file-derived entity representations.
//!
//! First sync inserts at version 1. Later syncs merge by presence: descriptive
//! and structural fields change only when the incoming value is non-empty
//! (non-zero for ids), the four state dimensions are always replaced, and the
//! version is bumped on every write.

use crate::app_error::{AppError, AppResult, VersionConflict};
use crate::audit::{record, AuditEntry};
use crate::canon_json::to_canonical_string;
use crate::db::{begin_immediate, commit};
use crate::entity::{
    capability_row_exists, capability_row_id, find_capability, find_enabler, find_story_card,
    insert_capability, insert_enabler, insert_story_card, require_non_empty, Capability, Enabler,
    NewCapability, NewEnabler, NewStoryCard, StoryCard,
};
use crate::store::AuditConfig;
use crate::types::{EntityType, StateDimensions};
use crate::version_guard::stored_version;
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};

pub const FILE_SYNC_FIELD: &str = "file_sync";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDoc {
    pub capability_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub storyboard_reference: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(flatten)]
    pub state: StateDimensions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnablerDoc {
    pub enabler_id: String,
    /// Store-local row id of the parent; `None` or `0` means "not provided".
    #[serde(default)]
    pub capability_id: Option<i64>,
    /// Parent business id; takes precedence over `capability_id` when set.
    #[serde(default)]
    pub capability_ref: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(flatten)]
    pub state: StateDimensions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryCardDoc {
    pub card_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub card_type: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub position_x: Option<f64>,
    #[serde(default)]
    pub position_y: Option<f64>,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(flatten)]
    pub state: StateDimensions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    pub record_audit: bool,
}

impl From<&AuditConfig> for SyncOptions {
    fn from(config: &AuditConfig) -> Self {
        Self {
            record_audit: config.record_file_sync,
        }
    }
}

impl From<&Capability> for CapabilityDoc {
    fn from(c: &Capability) -> Self {
        Self {
            capability_id: c.capability_id.clone(),
            name: Some(c.name.clone()),
            status: Some(c.status.clone()),
            description: Some(c.description.clone()),
            purpose: Some(c.purpose.clone()),
            storyboard_reference: Some(c.storyboard_reference.clone()),
            workspace_id: Some(c.meta.workspace_id.clone()),
            file_path: c.meta.file_path.clone(),
            state: c.state.clone(),
        }
    }
}

impl From<&Enabler> for EnablerDoc {
    fn from(e: &Enabler) -> Self {
        Self {
            enabler_id: e.enabler_id.clone(),
            capability_id: Some(e.capability_id),
            capability_ref: e.capability_ref.clone(),
            name: Some(e.name.clone()),
            description: Some(e.description.clone()),
            purpose: Some(e.purpose.clone()),
            owner: Some(e.owner.clone()),
            priority: Some(e.priority.clone()),
            workspace_id: Some(e.meta.workspace_id.clone()),
            file_path: e.meta.file_path.clone(),
            state: e.state.clone(),
        }
    }
}

impl From<&StoryCard> for StoryCardDoc {
    fn from(c: &StoryCard) -> Self {
        Self {
            card_id: c.card_id.clone(),
            title: Some(c.title.clone()),
            description: Some(c.description.clone()),
            card_type: Some(c.card_type.clone()),
            image_url: Some(c.image_url.clone()),
            position_x: Some(c.position_x),
            position_y: Some(c.position_y),
            workspace_id: Some(c.meta.workspace_id.clone()),
            file_path: c.meta.file_path.clone(),
            state: c.state.clone(),
        }
    }
}

/// Non-empty incoming value wins, otherwise the stored value is kept.
pub fn merge_text(incoming: Option<&str>, existing: &str) -> String {
    match incoming {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => existing.to_string(),
    }
}

fn merge_optional_text(incoming: Option<&str>, existing: Option<&str>) -> Option<String> {
    match incoming {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => existing.map(str::to_string),
    }
}

fn text_or_default(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.is_empty()).map(str::to_string)
}

fn sync_write_error(entity_type: EntityType, entity_id: &str, e: rusqlite::Error) -> AppError {
    AppError::new(
        "ES_DB_WRITE_FAILED",
        "db",
        "failed to apply file sync update",
        false,
        serde_json::json!({
            "error": e.to_string(),
            "entity_type": entity_type,
            "entity_id": entity_id
        }),
    )
}

/// A compare-and-set that touched no row reports the version now stored.
fn ensure_single_row(
    conn: &Connection,
    updated: usize,
    entity_type: EntityType,
    entity_id: &str,
    expected_version: i64,
) -> AppResult<()> {
    if updated == 1 {
        return Ok(());
    }
    let actual_version = stored_version(conn, entity_type, entity_id)?
        .ok_or_else(|| AppError::not_found(entity_type, entity_id))?;
    Err(VersionConflict {
        entity_type,
        entity_id: entity_id.to_string(),
        expected_version,
        actual_version,
    }
    .into())
}

fn state_summary(state: Option<&StateDimensions>) -> AppResult<String> {
    match state {
        None => Ok(String::new()),
        Some(state) => {
            let value = serde_json::to_value(state).map_err(|e| {
                AppError::new(
                    "ES_AUDIT_WRITE_FAILED",
                    "audit",
                    "failed to serialize state dimensions",
                    false,
                    serde_json::json!({ "error": e.to_string() }),
                )
            })?;
            to_canonical_string(&value)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn record_sync(
    tx: &Transaction<'_>,
    opts: SyncOptions,
    entity_type: EntityType,
    entity_id: &str,
    before: Option<&StateDimensions>,
    after: &StateDimensions,
    workspace_id: &str,
    actor: Option<&str>,
    now_ms: i64,
) -> AppResult<()> {
    if !opts.record_audit {
        return Ok(());
    }
    let old_value = state_summary(before)?;
    let new_value = state_summary(Some(after))?;
    record(
        tx,
        &AuditEntry {
            entity_type,
            entity_id,
            field_changed: FILE_SYNC_FIELD,
            old_value: &old_value,
            new_value: &new_value,
            change_reason: None,
            changed_by: actor,
            workspace_id,
        },
        now_ms,
    )?;
    Ok(())
}

fn reread<T>(found: AppResult<Option<T>>, entity_type: EntityType, entity_id: &str) -> AppResult<T> {
    found?.ok_or_else(|| {
        AppError::internal(&format!(
            "{entity_type} {entity_id} missing immediately after file sync"
        ))
    })
}

pub fn upsert_capability(
    conn: &Connection,
    doc: &CapabilityDoc,
    actor: Option<&str>,
    opts: SyncOptions,
    now_ms: i64,
) -> AppResult<Capability> {
    let entity_type = EntityType::Capability;
    require_non_empty(entity_type, "capability_id", &doc.capability_id)?;

    let tx = begin_immediate(conn)?;
    match find_capability(&tx, &doc.capability_id)? {
        None => {
            let new = NewCapability {
                capability_id: doc.capability_id.clone(),
                workspace_id: text_or_default(&doc.workspace_id),
                name: text_or_default(&doc.name),
                status: text_or_default(&doc.status),
                description: text_or_default(&doc.description),
                purpose: text_or_default(&doc.purpose),
                storyboard_reference: text_or_default(&doc.storyboard_reference),
                file_path: non_empty(&doc.file_path),
                state: doc.state.clone(),
            };
            require_non_empty(entity_type, "workspace_id", &new.workspace_id)?;
            insert_capability(&tx, &new, actor, now_ms)?;
            record_sync(
                &tx,
                opts,
                entity_type,
                &new.capability_id,
                None,
                &new.state,
                &new.workspace_id,
                actor,
                now_ms,
            )?;
            tracing::debug!(capability_id = %new.capability_id, "file sync inserted capability");
        }
        Some(existing) => {
            let workspace_id =
                merge_text(doc.workspace_id.as_deref(), &existing.meta.workspace_id);
            let updated = tx
                .execute(
                    "UPDATE capabilities SET
                        name=?1, status=?2, description=?3, purpose=?4, storyboard_reference=?5,
                        lifecycle_state=?6, workflow_stage=?7, stage_status=?8, approval_status=?9,
                        workspace_id=?10, file_path=?11,
                        version=version+1, updated_at_ms=?12, updated_by=COALESCE(?13, updated_by)
                     WHERE id=?14 AND version=?15",
                    params![
                        merge_text(doc.name.as_deref(), &existing.name),
                        merge_text(doc.status.as_deref(), &existing.status),
                        merge_text(doc.description.as_deref(), &existing.description),
                        merge_text(doc.purpose.as_deref(), &existing.purpose),
                        merge_text(
                            doc.storyboard_reference.as_deref(),
                            &existing.storyboard_reference
                        ),
                        doc.state.lifecycle_state,
                        doc.state.workflow_stage,
                        doc.state.stage_status,
                        doc.state.approval_status,
                        workspace_id,
                        merge_optional_text(
                            doc.file_path.as_deref(),
                            existing.meta.file_path.as_deref()
                        ),
                        now_ms,
                        actor,
                        existing.meta.id,
                        existing.meta.version,
                    ],
                )
                .map_err(|e| sync_write_error(entity_type, &doc.capability_id, e))?;
            ensure_single_row(
                &tx,
                updated,
                entity_type,
                &doc.capability_id,
                existing.meta.version,
            )?;
            record_sync(
                &tx,
                opts,
                entity_type,
                &doc.capability_id,
                Some(&existing.state),
                &doc.state,
                &workspace_id,
                actor,
                now_ms,
            )?;
            tracing::debug!(
                capability_id = %doc.capability_id,
                version = existing.meta.version + 1,
                "file sync updated capability"
            );
        }
    }
    commit(tx)?;

    reread(find_capability(conn, &doc.capability_id), entity_type, &doc.capability_id)
}

/// Parent row id for an enabler doc. A non-empty `capability_ref` must
/// resolve in this store; otherwise a non-zero `capability_id` is used and
/// must name an existing capability row.
fn resolve_parent(conn: &Connection, doc: &EnablerDoc) -> AppResult<Option<i64>> {
    if let Some(reference) = non_empty(&doc.capability_ref) {
        return match capability_row_id(conn, &reference)? {
            Some(row_id) => Ok(Some(row_id)),
            None => Err(AppError::validation(
                "parent capability reference does not resolve",
                serde_json::json!({
                    "entity_type": EntityType::Enabler,
                    "entity_id": doc.enabler_id,
                    "capability_ref": reference
                }),
            )),
        };
    }
    match doc.capability_id.filter(|id| *id != 0) {
        Some(row_id) if !capability_row_exists(conn, row_id)? => Err(AppError::validation(
            "parent capability does not exist",
            serde_json::json!({
                "entity_type": EntityType::Enabler,
                "entity_id": doc.enabler_id,
                "capability_id": row_id
            }),
        )),
        parent => Ok(parent),
    }
}

pub fn upsert_enabler(
    conn: &Connection,
    doc: &EnablerDoc,
    actor: Option<&str>,
    opts: SyncOptions,
    now_ms: i64,
) -> AppResult<Enabler> {
    let entity_type = EntityType::Enabler;
    require_non_empty(entity_type, "enabler_id", &doc.enabler_id)?;

    let tx = begin_immediate(conn)?;
    let parent = resolve_parent(&tx, doc)?;
    match find_enabler(&tx, &doc.enabler_id)? {
        None => {
            let capability_id = parent.ok_or_else(|| {
                AppError::validation(
                    "capability_id is required for new enablers",
                    serde_json::json!({ "entity_type": entity_type, "entity_id": doc.enabler_id }),
                )
            })?;
            let new = NewEnabler {
                enabler_id: doc.enabler_id.clone(),
                capability_id,
                workspace_id: text_or_default(&doc.workspace_id),
                name: text_or_default(&doc.name),
                description: text_or_default(&doc.description),
                purpose: text_or_default(&doc.purpose),
                owner: text_or_default(&doc.owner),
                priority: text_or_default(&doc.priority),
                file_path: non_empty(&doc.file_path),
                state: doc.state.clone(),
            };
            require_non_empty(entity_type, "workspace_id", &new.workspace_id)?;
            insert_enabler(&tx, &new, actor, now_ms)?;
            record_sync(
                &tx,
                opts,
                entity_type,
                &new.enabler_id,
                None,
                &new.state,
                &new.workspace_id,
                actor,
                now_ms,
            )?;
            tracing::debug!(enabler_id = %new.enabler_id, capability_id, "file sync inserted enabler");
        }
        Some(existing) => {
            let capability_id = parent.unwrap_or(existing.capability_id);
            let workspace_id =
                merge_text(doc.workspace_id.as_deref(), &existing.meta.workspace_id);
            let updated = tx
                .execute(
                    "UPDATE enablers SET
                        capability_id=?1, name=?2, description=?3, purpose=?4, owner=?5, priority=?6,
                        lifecycle_state=?7, workflow_stage=?8, stage_status=?9, approval_status=?10,
                        workspace_id=?11, file_path=?12,
                        version=version+1, updated_at_ms=?13, updated_by=COALESCE(?14, updated_by)
                     WHERE id=?15 AND version=?16",
                    params![
                        capability_id,
                        merge_text(doc.name.as_deref(), &existing.name),
                        merge_text(doc.description.as_deref(), &existing.description),
                        merge_text(doc.purpose.as_deref(), &existing.purpose),
                        merge_text(doc.owner.as_deref(), &existing.owner),
                        merge_text(doc.priority.as_deref(), &existing.priority),
                        doc.state.lifecycle_state,
                        doc.state.workflow_stage,
                        doc.state.stage_status,
                        doc.state.approval_status,
                        workspace_id,
                        merge_optional_text(
                            doc.file_path.as_deref(),
                            existing.meta.file_path.as_deref()
                        ),
                        now_ms,
                        actor,
                        existing.meta.id,
                        existing.meta.version,
                    ],
                )
                .map_err(|e| sync_write_error(entity_type, &doc.enabler_id, e))?;
            ensure_single_row(&tx, updated, entity_type, &doc.enabler_id, existing.meta.version)?;
            record_sync(
                &tx,
                opts,
                entity_type,
                &doc.enabler_id,
                Some(&existing.state),
                &doc.state,
                &workspace_id,
                actor,
                now_ms,
            )?;
            tracing::debug!(
                enabler_id = %doc.enabler_id,
                capability_id,
                version = existing.meta.version + 1,
                "file sync updated enabler"
            );
        }
    }
    commit(tx)?;

    reread(find_enabler(conn, &doc.enabler_id), entity_type, &doc.enabler_id)
}

pub fn upsert_story_card(
    conn: &Connection,
    doc: &StoryCardDoc,
    actor: Option<&str>,
    opts: SyncOptions,
    now_ms: i64,
) -> AppResult<StoryCard> {
    let entity_type = EntityType::StoryCard;
    require_non_empty(entity_type, "card_id", &doc.card_id)?;

    let tx = begin_immediate(conn)?;
    match find_story_card(&tx, &doc.card_id)? {
        None => {
            let new = NewStoryCard {
                card_id: doc.card_id.clone(),
                workspace_id: text_or_default(&doc.workspace_id),
                title: text_or_default(&doc.title),
                description: text_or_default(&doc.description),
                card_type: text_or_default(&doc.card_type),
                image_url: text_or_default(&doc.image_url),
                position_x: doc.position_x.unwrap_or_default(),
                position_y: doc.position_y.unwrap_or_default(),
                file_path: non_empty(&doc.file_path),
                state: doc.state.clone(),
            };
            require_non_empty(entity_type, "workspace_id", &new.workspace_id)?;
            insert_story_card(&tx, &new, actor, now_ms)?;
            record_sync(
                &tx,
                opts,
                entity_type,
                &new.card_id,
                None,
                &new.state,
                &new.workspace_id,
                actor,
                now_ms,
            )?;
            tracing::debug!(card_id = %new.card_id, "file sync inserted story card");
        }
        Some(existing) => {
            let workspace_id =
                merge_text(doc.workspace_id.as_deref(), &existing.meta.workspace_id);
            let updated = tx
                .execute(
                    "UPDATE story_cards SET
                        title=?1, description=?2, card_type=?3, image_url=?4,
                        position_x=?5, position_y=?6,
                        lifecycle_state=?7, workflow_stage=?8, stage_status=?9, approval_status=?10,
                        workspace_id=?11, file_path=?12,
                        version=version+1, updated_at_ms=?13, updated_by=COALESCE(?14, updated_by)
                     WHERE id=?15 AND version=?16",
                    params![
                        merge_text(doc.title.as_deref(), &existing.title),
                        merge_text(doc.description.as_deref(), &existing.description),
                        merge_text(doc.card_type.as_deref(), &existing.card_type),
                        merge_text(doc.image_url.as_deref(), &existing.image_url),
                        doc.position_x.unwrap_or(existing.position_x),
                        doc.position_y.unwrap_or(existing.position_y),
                        doc.state.lifecycle_state,
                        doc.state.workflow_stage,
                        doc.state.stage_status,
                        doc.state.approval_status,
                        workspace_id,
                        merge_optional_text(
                            doc.file_path.as_deref(),
                            existing.meta.file_path.as_deref()
                        ),
                        now_ms,
                        actor,
                        existing.meta.id,
                        existing.meta.version,
                    ],
                )
                .map_err(|e| sync_write_error(entity_type, &doc.card_id, e))?;
            ensure_single_row(&tx, updated, entity_type, &doc.card_id, existing.meta.version)?;
            record_sync(
                &tx,
                opts,
                entity_type,
                &doc.card_id,
                Some(&existing.state),
                &doc.state,
                &workspace_id,
                actor,
                now_ms,
            )?;
            tracing::debug!(
                card_id = %doc.card_id,
                version = existing.meta.version + 1,
                "file sync updated story card"
            );
        }
    }
    commit(tx)?;

    reread(find_story_card(conn, &doc.card_id), entity_type, &doc.card_id)
}
