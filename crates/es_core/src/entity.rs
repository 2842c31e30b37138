use crate::app_error::{AppError, AppResult, CODE_ENTITY_ALREADY_EXISTS};
use crate::db::{begin_immediate, commit};
use crate::types::{EntityMeta, EntityType, StateDimensions};
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub capability_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub storyboard_reference: String,
    #[serde(flatten)]
    pub state: StateDimensions,
    #[serde(flatten)]
    pub meta: EntityMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enabler {
    pub enabler_id: String,
    /// Internal row id of the parent capability.
    pub capability_id: i64,
    /// Business id of the parent capability, joined at read time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_ref: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub priority: String,
    #[serde(flatten)]
    pub state: StateDimensions,
    #[serde(flatten)]
    pub meta: EntityMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryCard {
    pub card_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub card_type: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub position_x: f64,
    #[serde(default)]
    pub position_y: f64,
    #[serde(flatten)]
    pub state: StateDimensions,
    #[serde(flatten)]
    pub meta: EntityMeta,
}

/// Every active entity of one workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkState {
    pub capabilities: Vec<Capability>,
    pub enablers: Vec<Enabler>,
    pub story_cards: Vec<StoryCard>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCapability {
    pub capability_id: String,
    pub workspace_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub storyboard_reference: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(flatten)]
    pub state: StateDimensions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEnabler {
    pub enabler_id: String,
    pub capability_id: i64,
    pub workspace_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(flatten)]
    pub state: StateDimensions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewStoryCard {
    pub card_id: String,
    pub workspace_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub card_type: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub position_x: f64,
    #[serde(default)]
    pub position_y: f64,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(flatten)]
    pub state: StateDimensions,
}

const CAPABILITY_SELECT: &str = "SELECT * FROM capabilities";
const ENABLER_SELECT: &str = "SELECT e.*, c.capability_id AS capability_ref
     FROM enablers e LEFT JOIN capabilities c ON c.id = e.capability_id";
const STORY_CARD_SELECT: &str = "SELECT * FROM story_cards";

fn query_error(e: rusqlite::Error) -> AppError {
    AppError::db("ES_DB_QUERY_FAILED", "failed querying entity state", &e)
}

fn write_error(entity_type: EntityType, entity_id: &str, e: rusqlite::Error) -> AppError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        {
            return already_exists(entity_type, entity_id);
        }
        if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY {
            return AppError::validation(
                "parent capability does not exist",
                serde_json::json!({ "entity_type": entity_type, "entity_id": entity_id }),
            );
        }
    }
    AppError::new(
        "ES_DB_WRITE_FAILED",
        "db",
        "failed writing entity row",
        false,
        serde_json::json!({
            "error": e.to_string(),
            "entity_type": entity_type,
            "entity_id": entity_id
        }),
    )
}

fn already_exists(entity_type: EntityType, entity_id: &str) -> AppError {
    AppError::new(
        CODE_ENTITY_ALREADY_EXISTS,
        "conflict",
        "entity with this business id already exists",
        false,
        serde_json::json!({ "entity_type": entity_type, "entity_id": entity_id }),
    )
}

pub(crate) fn require_non_empty(
    entity_type: EntityType,
    field: &str,
    value: &str,
) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::validation(
            "required field must not be empty",
            serde_json::json!({ "entity_type": entity_type, "field": field }),
        ));
    }
    Ok(())
}

fn state_from_row(row: &Row<'_>) -> rusqlite::Result<StateDimensions> {
    Ok(StateDimensions {
        lifecycle_state: row.get("lifecycle_state")?,
        workflow_stage: row.get("workflow_stage")?,
        stage_status: row.get("stage_status")?,
        approval_status: row.get("approval_status")?,
    })
}

fn meta_from_row(row: &Row<'_>) -> rusqlite::Result<EntityMeta> {
    Ok(EntityMeta {
        id: row.get("id")?,
        workspace_id: row.get("workspace_id")?,
        version: row.get("version")?,
        file_path: row.get("file_path")?,
        is_active: row.get("is_active")?,
        created_at_ms: row.get("created_at_ms")?,
        updated_at_ms: row.get("updated_at_ms")?,
        created_by: row.get("created_by")?,
        updated_by: row.get("updated_by")?,
    })
}

fn capability_from_row(row: &Row<'_>) -> rusqlite::Result<Capability> {
    Ok(Capability {
        capability_id: row.get("capability_id")?,
        name: row.get("name")?,
        status: row.get("status")?,
        description: row.get("description")?,
        purpose: row.get("purpose")?,
        storyboard_reference: row.get("storyboard_reference")?,
        state: state_from_row(row)?,
        meta: meta_from_row(row)?,
    })
}

fn enabler_from_row(row: &Row<'_>) -> rusqlite::Result<Enabler> {
    Ok(Enabler {
        enabler_id: row.get("enabler_id")?,
        capability_id: row.get("capability_id")?,
        capability_ref: row.get("capability_ref")?,
        name: row.get("name")?,
        description: row.get("description")?,
        purpose: row.get("purpose")?,
        owner: row.get("owner")?,
        priority: row.get("priority")?,
        state: state_from_row(row)?,
        meta: meta_from_row(row)?,
    })
}

fn story_card_from_row(row: &Row<'_>) -> rusqlite::Result<StoryCard> {
    Ok(StoryCard {
        card_id: row.get("card_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        card_type: row.get("card_type")?,
        image_url: row.get("image_url")?,
        position_x: row.get("position_x")?,
        position_y: row.get("position_y")?,
        state: state_from_row(row)?,
        meta: meta_from_row(row)?,
    })
}

fn query_one<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> AppResult<Option<T>> {
    conn.query_row(sql, params, map)
        .optional()
        .map_err(query_error)
}

fn query_all<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> AppResult<Vec<T>> {
    let mut stmt = conn.prepare(sql).map_err(query_error)?;
    let rows = stmt.query_map(params, map).map_err(query_error)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(query_error)?);
    }
    Ok(out)
}

pub(crate) fn find_capability(conn: &Connection, capability_id: &str) -> AppResult<Option<Capability>> {
    query_one(
        conn,
        &format!("{CAPABILITY_SELECT} WHERE capability_id=?1"),
        params![capability_id],
        capability_from_row,
    )
}

pub(crate) fn find_enabler(conn: &Connection, enabler_id: &str) -> AppResult<Option<Enabler>> {
    query_one(
        conn,
        &format!("{ENABLER_SELECT} WHERE e.enabler_id=?1"),
        params![enabler_id],
        enabler_from_row,
    )
}

pub(crate) fn find_story_card(conn: &Connection, card_id: &str) -> AppResult<Option<StoryCard>> {
    query_one(
        conn,
        &format!("{STORY_CARD_SELECT} WHERE card_id=?1"),
        params![card_id],
        story_card_from_row,
    )
}

pub fn get_capability(conn: &Connection, capability_id: &str) -> AppResult<Capability> {
    find_capability(conn, capability_id)?
        .filter(|c| c.meta.is_active)
        .ok_or_else(|| AppError::not_found(EntityType::Capability, capability_id))
}

pub fn get_enabler(conn: &Connection, enabler_id: &str) -> AppResult<Enabler> {
    find_enabler(conn, enabler_id)?
        .filter(|e| e.meta.is_active)
        .ok_or_else(|| AppError::not_found(EntityType::Enabler, enabler_id))
}

pub fn get_story_card(conn: &Connection, card_id: &str) -> AppResult<StoryCard> {
    find_story_card(conn, card_id)?
        .filter(|c| c.meta.is_active)
        .ok_or_else(|| AppError::not_found(EntityType::StoryCard, card_id))
}

pub fn list_capabilities_by_workspace(
    conn: &Connection,
    workspace_id: &str,
) -> AppResult<Vec<Capability>> {
    query_all(
        conn,
        &format!(
            "{CAPABILITY_SELECT} WHERE workspace_id=?1 AND is_active=1
             ORDER BY created_at_ms DESC, id DESC"
        ),
        params![workspace_id],
        capability_from_row,
    )
}

pub fn list_enablers_by_workspace(conn: &Connection, workspace_id: &str) -> AppResult<Vec<Enabler>> {
    query_all(
        conn,
        &format!(
            "{ENABLER_SELECT} WHERE e.workspace_id=?1 AND e.is_active=1
             ORDER BY e.created_at_ms DESC, e.id DESC"
        ),
        params![workspace_id],
        enabler_from_row,
    )
}

pub fn list_story_cards_by_workspace(
    conn: &Connection,
    workspace_id: &str,
) -> AppResult<Vec<StoryCard>> {
    query_all(
        conn,
        &format!(
            "{STORY_CARD_SELECT} WHERE workspace_id=?1 AND is_active=1
             ORDER BY created_at_ms DESC, id DESC"
        ),
        params![workspace_id],
        story_card_from_row,
    )
}

pub fn workspace_state(conn: &Connection, workspace_id: &str) -> AppResult<BulkState> {
    Ok(BulkState {
        capabilities: list_capabilities_by_workspace(conn, workspace_id)?,
        enablers: list_enablers_by_workspace(conn, workspace_id)?,
        story_cards: list_story_cards_by_workspace(conn, workspace_id)?,
    })
}

/// Internal row id of a capability, active or not.
pub fn capability_row_id(conn: &Connection, capability_id: &str) -> AppResult<Option<i64>> {
    conn.query_row(
        "SELECT id FROM capabilities WHERE capability_id=?1",
        params![capability_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(query_error)
}

pub(crate) fn capability_row_exists(conn: &Connection, row_id: i64) -> AppResult<bool> {
    conn.query_row(
        "SELECT 1 FROM capabilities WHERE id=?1",
        params![row_id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(query_error)
}

pub(crate) fn insert_capability(
    conn: &Connection,
    new: &NewCapability,
    actor: Option<&str>,
    now_ms: i64,
) -> AppResult<i64> {
    conn.execute(
        "INSERT INTO capabilities(
            capability_id, name, status, description, purpose, storyboard_reference,
            lifecycle_state, workflow_stage, stage_status, approval_status,
            workspace_id, file_path, version, is_active,
            created_at_ms, updated_at_ms, created_by, updated_by
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, 1, ?13, ?13, ?14, ?14)",
        params![
            new.capability_id,
            new.name,
            new.status,
            new.description,
            new.purpose,
            new.storyboard_reference,
            new.state.lifecycle_state,
            new.state.workflow_stage,
            new.state.stage_status,
            new.state.approval_status,
            new.workspace_id,
            new.file_path,
            now_ms,
            actor,
        ],
    )
    .map_err(|e| write_error(EntityType::Capability, &new.capability_id, e))?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn insert_enabler(
    conn: &Connection,
    new: &NewEnabler,
    actor: Option<&str>,
    now_ms: i64,
) -> AppResult<i64> {
    if new.capability_id <= 0 {
        return Err(AppError::validation(
            "capability_id is required for new enablers",
            serde_json::json!({ "entity_type": EntityType::Enabler, "entity_id": new.enabler_id }),
        ));
    }
    conn.execute(
        "INSERT INTO enablers(
            enabler_id, capability_id, name, description, purpose, owner, priority,
            lifecycle_state, workflow_stage, stage_status, approval_status,
            workspace_id, file_path, version, is_active,
            created_at_ms, updated_at_ms, created_by, updated_by
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 1, 1, ?14, ?14, ?15, ?15)",
        params![
            new.enabler_id,
            new.capability_id,
            new.name,
            new.description,
            new.purpose,
            new.owner,
            new.priority,
            new.state.lifecycle_state,
            new.state.workflow_stage,
            new.state.stage_status,
            new.state.approval_status,
            new.workspace_id,
            new.file_path,
            now_ms,
            actor,
        ],
    )
    .map_err(|e| write_error(EntityType::Enabler, &new.enabler_id, e))?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn insert_story_card(
    conn: &Connection,
    new: &NewStoryCard,
    actor: Option<&str>,
    now_ms: i64,
) -> AppResult<i64> {
    conn.execute(
        "INSERT INTO story_cards(
            card_id, title, description, card_type, image_url, position_x, position_y,
            lifecycle_state, workflow_stage, stage_status, approval_status,
            workspace_id, file_path, version, is_active,
            created_at_ms, updated_at_ms, created_by, updated_by
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 1, 1, ?14, ?14, ?15, ?15)",
        params![
            new.card_id,
            new.title,
            new.description,
            new.card_type,
            new.image_url,
            new.position_x,
            new.position_y,
            new.state.lifecycle_state,
            new.state.workflow_stage,
            new.state.stage_status,
            new.state.approval_status,
            new.workspace_id,
            new.file_path,
            now_ms,
            actor,
        ],
    )
    .map_err(|e| write_error(EntityType::StoryCard, &new.card_id, e))?;
    Ok(conn.last_insert_rowid())
}

fn ensure_absent(conn: &Connection, entity_type: EntityType, entity_id: &str) -> AppResult<()> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE {}=?1",
        entity_type.table(),
        entity_type.business_id_column()
    );
    let exists = conn
        .query_row(&sql, params![entity_id], |_| Ok(()))
        .optional()
        .map_err(query_error)?
        .is_some();
    if exists {
        return Err(already_exists(entity_type, entity_id));
    }
    Ok(())
}

pub fn create_capability(
    conn: &Connection,
    new: &NewCapability,
    actor: Option<&str>,
    now_ms: i64,
) -> AppResult<Capability> {
    require_non_empty(EntityType::Capability, "capability_id", &new.capability_id)?;
    require_non_empty(EntityType::Capability, "workspace_id", &new.workspace_id)?;

    let mut new = new.clone();
    new.state = new.state.with_creation_defaults(EntityType::Capability);

    let tx = begin_immediate(conn)?;
    ensure_absent(&tx, EntityType::Capability, &new.capability_id)?;
    insert_capability(&tx, &new, actor, now_ms)?;
    commit(tx)?;

    tracing::debug!(capability_id = %new.capability_id, "created capability");
    get_capability(conn, &new.capability_id)
}

pub fn create_enabler(
    conn: &Connection,
    new: &NewEnabler,
    actor: Option<&str>,
    now_ms: i64,
) -> AppResult<Enabler> {
    require_non_empty(EntityType::Enabler, "enabler_id", &new.enabler_id)?;
    require_non_empty(EntityType::Enabler, "workspace_id", &new.workspace_id)?;

    let mut new = new.clone();
    new.state = new.state.with_creation_defaults(EntityType::Enabler);

    let tx = begin_immediate(conn)?;
    ensure_absent(&tx, EntityType::Enabler, &new.enabler_id)?;
    insert_enabler(&tx, &new, actor, now_ms)?;
    commit(tx)?;

    tracing::debug!(enabler_id = %new.enabler_id, "created enabler");
    get_enabler(conn, &new.enabler_id)
}

pub fn create_story_card(
    conn: &Connection,
    new: &NewStoryCard,
    actor: Option<&str>,
    now_ms: i64,
) -> AppResult<StoryCard> {
    require_non_empty(EntityType::StoryCard, "card_id", &new.card_id)?;
    require_non_empty(EntityType::StoryCard, "workspace_id", &new.workspace_id)?;

    let mut new = new.clone();
    new.state = new.state.with_creation_defaults(EntityType::StoryCard);

    let tx = begin_immediate(conn)?;
    ensure_absent(&tx, EntityType::StoryCard, &new.card_id)?;
    insert_story_card(&tx, &new, actor, now_ms)?;
    commit(tx)?;

    tracing::debug!(card_id = %new.card_id, "created story card");
    get_story_card(conn, &new.card_id)
}
