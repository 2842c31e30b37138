use crate::app_error::{AppError, AppResult};
use crate::db::{open_db_with_timeout, DEFAULT_BUSY_TIMEOUT_MS};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const STORE_JSON: &str = "store.json";
pub const DEFAULT_DB_RELATIVE_PATH: &str = "db/entity_state.sqlite";
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreJsonV1 {
    pub schema_version: u32,
    pub store_id: String,
    pub store_slug: String,
    pub created_at_ms: i64,
    pub db: StoreDbConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDbConfig {
    pub relative_path: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// When the state mutator writes its single audit row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPolicy {
    /// Only when the caller supplies a change reason.
    #[default]
    ReasonOnly,
    Always,
    Never,
}

impl AuditPolicy {
    pub fn should_record(self, change_reason: Option<&str>) -> bool {
        match self {
            AuditPolicy::ReasonOnly => change_reason.is_some_and(|r| !r.is_empty()),
            AuditPolicy::Always => true,
            AuditPolicy::Never => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub policy: AuditPolicy,
    #[serde(default)]
    pub record_file_sync: bool,
    #[serde(default = "default_history_limit")]
    pub history_limit: i64,
}

fn default_history_limit() -> i64 {
    DEFAULT_HISTORY_LIMIT
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            policy: AuditPolicy::ReasonOnly,
            record_file_sync: false,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorePaths {
    pub root: PathBuf,
    pub store_json: PathBuf,
    pub db: PathBuf,
    pub snapshots_dir: PathBuf,
}

pub fn store_paths(store_root: &Path) -> StorePaths {
    StorePaths {
        root: store_root.to_path_buf(),
        store_json: store_root.join(STORE_JSON),
        db: store_root.join(DEFAULT_DB_RELATIVE_PATH),
        snapshots_dir: store_root.join("snapshots"),
    }
}

fn init_error(message: &str, details: serde_json::Value) -> AppError {
    AppError::new("ES_STORE_INIT_FAILED", "store", message, false, details)
}

pub fn store_init(store_root: &Path, store_slug: &str, now_ms: i64) -> AppResult<StoreJsonV1> {
    if store_slug.trim().is_empty() {
        return Err(AppError::validation(
            "store slug must not be empty",
            serde_json::json!({ "store_root": store_root }),
        ));
    }

    let paths = store_paths(store_root);
    if paths.store_json.exists() {
        return Err(init_error(
            "store.json already exists",
            serde_json::json!({ "path": paths.store_json }),
        ));
    }

    fs::create_dir_all(&paths.snapshots_dir).map_err(|e| {
        init_error(
            "failed to create snapshots directory",
            serde_json::json!({ "error": e.to_string(), "path": paths.snapshots_dir }),
        )
    })?;

    let store = StoreJsonV1 {
        schema_version: 1,
        store_id: Uuid::new_v4().to_string(),
        store_slug: store_slug.to_string(),
        created_at_ms: now_ms,
        db: StoreDbConfig {
            relative_path: DEFAULT_DB_RELATIVE_PATH.to_string(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        },
        audit: AuditConfig::default(),
    };

    store_save(store_root, &store)?;
    open_db_with_timeout(&store_root.join(&store.db.relative_path), store.db.busy_timeout_ms)?;
    tracing::info!(store_id = %store.store_id, slug = store_slug, "initialized entity state store");

    Ok(store)
}

pub fn store_save(store_root: &Path, store: &StoreJsonV1) -> AppResult<()> {
    let bytes = serde_json::to_vec_pretty(store).map_err(|e| {
        init_error(
            "failed to serialize store.json",
            serde_json::json!({ "error": e.to_string() }),
        )
    })?;

    fs::create_dir_all(store_root).map_err(|e| {
        init_error(
            "failed to create store root",
            serde_json::json!({ "error": e.to_string(), "path": store_root }),
        )
    })?;

    fs::write(store_root.join(STORE_JSON), bytes).map_err(|e| {
        init_error(
            "failed to write store.json",
            serde_json::json!({ "error": e.to_string() }),
        )
    })
}

pub fn store_open(store_root: &Path) -> AppResult<StoreJsonV1> {
    let path = store_root.join(STORE_JSON);
    let bytes = fs::read(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::new(
                "ES_STORE_JSON_MISSING",
                "store",
                "store.json is missing",
                false,
                serde_json::json!({ "path": path }),
            )
        } else {
            AppError::new(
                "ES_STORE_JSON_INVALID",
                "store",
                "failed to read store.json",
                false,
                serde_json::json!({ "error": e.to_string(), "path": path }),
            )
        }
    })?;

    let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
        AppError::new(
            "ES_STORE_JSON_INVALID",
            "store",
            "failed to parse store.json",
            false,
            serde_json::json!({ "error": e.to_string(), "path": path }),
        )
    })?;

    let schema_version = value
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| {
            AppError::new(
                "ES_STORE_JSON_INVALID",
                "store",
                "store schema_version missing or invalid",
                false,
                serde_json::json!({ "path": path }),
            )
        })?;

    if schema_version != 1 {
        return Err(AppError::new(
            "ES_STORE_JSON_UNSUPPORTED_VERSION",
            "store",
            "unsupported store schema_version",
            false,
            serde_json::json!({ "expected": [1], "actual": schema_version }),
        ));
    }

    let store: StoreJsonV1 = serde_json::from_value(value).map_err(|e| {
        AppError::new(
            "ES_STORE_JSON_INVALID",
            "store",
            "failed to parse store schema v1",
            false,
            serde_json::json!({ "error": e.to_string(), "path": path }),
        )
    })?;

    if store.audit.history_limit <= 0 {
        return Err(AppError::new(
            "ES_STORE_JSON_INVALID",
            "store",
            "audit.history_limit must be >= 1",
            false,
            serde_json::json!({ "history_limit": store.audit.history_limit }),
        ));
    }

    Ok(store)
}

/// Opens `store.json` and the database it points at.
pub fn open_store_db(store_root: &Path) -> AppResult<(StoreJsonV1, Connection)> {
    let store = store_open(store_root)?;
    let conn = open_db_with_timeout(
        &store_root.join(&store.db.relative_path),
        store.db.busy_timeout_ms,
    )?;
    Ok((store, conn))
}
