use crate::app_error::{AppError, AppResult};
use crate::audit::{workspace_history, EntityStateChange};
use crate::entity::{workspace_state, Capability, Enabler, StoryCard};
use crate::file_sync::{
    upsert_capability, upsert_enabler, upsert_story_card, CapabilityDoc, EnablerDoc,
    StoryCardDoc, SyncOptions,
};
use crate::types::EntityType;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_VERSION: &str = "1.0";

/// Portable dump of one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub version: String,
    pub exported_at_ms: i64,
    pub workspace_id: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub enablers: Vec<Enabler>,
    #[serde(default)]
    pub story_cards: Vec<StoryCard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_changes: Option<Vec<EntityStateChange>>,
}

/// Snapshot as read from disk. Entities stay raw JSON so one malformed
/// record fails on its own during import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub version: String,
    pub exported_at_ms: i64,
    pub workspace_id: String,
    #[serde(default)]
    pub capabilities: Vec<Value>,
    #[serde(default)]
    pub enablers: Vec<Value>,
    #[serde(default)]
    pub story_cards: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_changes: Option<Vec<Value>>,
}

impl SnapshotDocument {
    pub fn from_snapshot(snapshot: &WorkspaceSnapshot) -> AppResult<Self> {
        serde_json::to_value(snapshot)
            .and_then(serde_json::from_value)
            .map_err(|e| {
                snapshot_error(
                    "ES_SNAPSHOT_INVALID",
                    "failed to convert snapshot",
                    serde_json::json!({ "error": e.to_string() }),
                )
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounts {
    pub capabilities: usize,
    pub enablers: usize,
    pub story_cards: usize,
}

impl ImportCounts {
    pub fn total(&self) -> usize {
        self.capabilities + self.enablers + self.story_cards
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFailure {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub workspace_id: String,
    pub imported: ImportCounts,
    pub failures: Vec<ImportFailure>,
}

fn snapshot_error(code: &str, message: &str, details: serde_json::Value) -> AppError {
    AppError::new(code, "export", message, false, details)
}

pub fn export_workspace(
    conn: &Connection,
    workspace_id: &str,
    include_history: bool,
    now_ms: i64,
) -> AppResult<WorkspaceSnapshot> {
    let state = workspace_state(conn, workspace_id)?;
    let state_changes = if include_history {
        Some(workspace_history(conn, workspace_id, Some(i64::MAX))?)
    } else {
        None
    };

    tracing::info!(
        workspace_id,
        capabilities = state.capabilities.len(),
        enablers = state.enablers.len(),
        story_cards = state.story_cards.len(),
        include_history,
        "exported workspace state"
    );

    Ok(WorkspaceSnapshot {
        version: SNAPSHOT_VERSION.to_string(),
        exported_at_ms: now_ms,
        workspace_id: workspace_id.to_string(),
        capabilities: state.capabilities,
        enablers: state.enablers,
        story_cards: state.story_cards,
        state_changes,
    })
}

pub fn snapshot_file_name(snapshot: &WorkspaceSnapshot) -> String {
    let workspace: String = snapshot
        .workspace_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("workspace_{}_state_{}.json", workspace, snapshot.exported_at_ms)
}

/// Writes the snapshot as pretty JSON into `dir` and returns the file path.
pub fn write_snapshot(dir: &Path, snapshot: &WorkspaceSnapshot) -> AppResult<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| {
        snapshot_error(
            "ES_SNAPSHOT_WRITE_FAILED",
            "failed to create snapshot directory",
            serde_json::json!({ "error": e.to_string(), "path": dir }),
        )
    })?;

    let bytes = serde_json::to_vec_pretty(snapshot).map_err(|e| {
        snapshot_error(
            "ES_SNAPSHOT_WRITE_FAILED",
            "failed to serialize snapshot",
            serde_json::json!({ "error": e.to_string() }),
        )
    })?;

    let path = dir.join(snapshot_file_name(snapshot));
    fs::write(&path, bytes).map_err(|e| {
        snapshot_error(
            "ES_SNAPSHOT_WRITE_FAILED",
            "failed to write snapshot file",
            serde_json::json!({ "error": e.to_string(), "path": path }),
        )
    })?;
    Ok(path)
}

pub fn read_snapshot(path: &Path) -> AppResult<SnapshotDocument> {
    let bytes = fs::read(path).map_err(|e| {
        snapshot_error(
            "ES_SNAPSHOT_READ_FAILED",
            "failed to read snapshot file",
            serde_json::json!({ "error": e.to_string(), "path": path }),
        )
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        snapshot_error(
            "ES_SNAPSHOT_INVALID",
            "failed to parse snapshot file",
            serde_json::json!({ "error": e.to_string(), "path": path }),
        )
    })
}

fn note_failure(
    failures: &mut Vec<ImportFailure>,
    entity_type: EntityType,
    entity_id: &str,
    err: AppError,
) {
    tracing::warn!(
        %entity_type,
        entity_id,
        code = %err.code,
        error = %err.message,
        "skipping entity during workspace import"
    );
    failures.push(ImportFailure {
        entity_type,
        entity_id: entity_id.to_string(),
        code: err.code,
        message: err.message,
    });
}

/// Decodes one raw snapshot entry. Failures are named by the entry's
/// business id, or by its position when that is unreadable.
fn decode_entry<T: DeserializeOwned>(
    entity_type: EntityType,
    index: usize,
    value: &Value,
) -> Result<T, (String, AppError)> {
    serde_json::from_value(value.clone()).map_err(|e| {
        let entity_id = value
            .get(entity_type.business_id_column())
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{index}"));
        let err = AppError::validation(
            "malformed snapshot entity",
            serde_json::json!({
                "entity_type": entity_type,
                "index": index,
                "error": e.to_string()
            }),
        );
        (entity_id, err)
    })
}

fn import_entries<T, F>(
    entity_type: EntityType,
    entries: &[Value],
    failures: &mut Vec<ImportFailure>,
    mut upsert: F,
) -> usize
where
    T: DeserializeOwned,
    F: FnMut(&T) -> (String, AppResult<()>),
{
    let mut imported = 0;
    for (index, value) in entries.iter().enumerate() {
        match decode_entry::<T>(entity_type, index, value) {
            Ok(record) => match upsert(&record) {
                (_, Ok(())) => imported += 1,
                (entity_id, Err(err)) => note_failure(failures, entity_type, &entity_id, err),
            },
            Err((entity_id, err)) => note_failure(failures, entity_type, &entity_id, err),
        }
    }
    imported
}

/// Upserts every entity of `snapshot` into `target_workspace_id`.
///
/// Each entity is its own transaction. A failing or malformed entity is
/// reported and skipped; earlier successes stay committed.
pub fn import_snapshot(
    conn: &Connection,
    target_workspace_id: &str,
    snapshot: &SnapshotDocument,
    actor: Option<&str>,
    opts: SyncOptions,
    now_ms: i64,
) -> AppResult<ImportReport> {
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(AppError::validation(
            "unsupported snapshot version",
            serde_json::json!({ "expected": SNAPSHOT_VERSION, "actual": snapshot.version }),
        ));
    }
    if target_workspace_id.trim().is_empty() {
        return Err(AppError::validation(
            "target workspace_id must not be empty",
            serde_json::json!({ "field": "workspace_id" }),
        ));
    }

    let target = Some(target_workspace_id.to_string());
    let mut report = ImportReport {
        workspace_id: target_workspace_id.to_string(),
        ..ImportReport::default()
    };

    report.imported.capabilities = import_entries(
        EntityType::Capability,
        &snapshot.capabilities,
        &mut report.failures,
        |capability: &Capability| {
            let doc = CapabilityDoc {
                workspace_id: target.clone(),
                ..CapabilityDoc::from(capability)
            };
            let result = upsert_capability(conn, &doc, actor, opts, now_ms).map(|_| ());
            (capability.capability_id.clone(), result)
        },
    );

    report.imported.enablers = import_entries(
        EntityType::Enabler,
        &snapshot.enablers,
        &mut report.failures,
        |enabler: &Enabler| {
            let doc = EnablerDoc {
                workspace_id: target.clone(),
                ..EnablerDoc::from(enabler)
            };
            let result = upsert_enabler(conn, &doc, actor, opts, now_ms).map(|_| ());
            (enabler.enabler_id.clone(), result)
        },
    );

    report.imported.story_cards = import_entries(
        EntityType::StoryCard,
        &snapshot.story_cards,
        &mut report.failures,
        |card: &StoryCard| {
            let doc = StoryCardDoc {
                workspace_id: target.clone(),
                ..StoryCardDoc::from(card)
            };
            let result = upsert_story_card(conn, &doc, actor, opts, now_ms).map(|_| ());
            (card.card_id.clone(), result)
        },
    );

    tracing::info!(
        workspace_id = target_workspace_id,
        imported = report.imported.total(),
        failed = report.failures.len(),
        "imported workspace snapshot"
    );
    Ok(report)
}

/// Typed entry point for snapshots produced in-process by `export_workspace`.
pub fn import_workspace(
    conn: &Connection,
    target_workspace_id: &str,
    snapshot: &WorkspaceSnapshot,
    actor: Option<&str>,
    opts: SyncOptions,
    now_ms: i64,
) -> AppResult<ImportReport> {
    let document = SnapshotDocument::from_snapshot(snapshot)?;
    import_snapshot(conn, target_workspace_id, &document, actor, opts, now_ms)
}
