use crate::types::EntityType;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

pub const CODE_VERSION_CONFLICT: &str = "ES_VERSION_CONFLICT";
pub const CODE_ENTITY_NOT_FOUND: &str = "ES_ENTITY_NOT_FOUND";
pub const CODE_VALIDATION_FAILED: &str = "ES_VALIDATION_FAILED";
pub const CODE_ENTITY_ALREADY_EXISTS: &str = "ES_ENTITY_ALREADY_EXISTS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub schema_version: u32,
    pub code: String,
    pub category: String,
    pub message: String,
    pub retryable: bool,
    pub details: Value,
}

pub type AppResult<T> = Result<T, AppError>;

/// Payload of an optimistic-concurrency rejection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionConflict {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub expected_version: i64,
    pub actual_version: i64,
}

impl AppError {
    pub fn new(code: &str, category: &str, message: &str, retryable: bool, details: Value) -> Self {
        Self {
            schema_version: 1,
            code: code.to_string(),
            category: category.to_string(),
            message: message.to_string(),
            retryable,
            details,
        }
    }

    pub fn internal(message: &str) -> Self {
        Self::new("ES_INTERNAL_ERROR", "internal", message, false, json!({}))
    }

    pub fn not_found(entity_type: EntityType, entity_id: &str) -> Self {
        Self::new(
            CODE_ENTITY_NOT_FOUND,
            "not_found",
            "entity does not exist or is inactive",
            false,
            json!({ "entity_type": entity_type, "entity_id": entity_id }),
        )
    }

    pub fn validation(message: &str, details: Value) -> Self {
        Self::new(CODE_VALIDATION_FAILED, "validation", message, false, details)
    }

    pub fn db(code: &str, message: &str, err: &rusqlite::Error) -> Self {
        let busy = matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
        );
        Self::new(
            code,
            "db",
            message,
            busy,
            json!({ "error": err.to_string() }),
        )
    }

    pub fn is_conflict(&self) -> bool {
        self.code == CODE_VERSION_CONFLICT
    }

    pub fn is_not_found(&self) -> bool {
        self.code == CODE_ENTITY_NOT_FOUND
    }

    pub fn is_validation(&self) -> bool {
        self.code == CODE_VALIDATION_FAILED
    }

    /// Typed view of a `ES_VERSION_CONFLICT` error.
    pub fn version_conflict(&self) -> Option<VersionConflict> {
        if !self.is_conflict() {
            return None;
        }
        serde_json::from_value(self.details.clone()).ok()
    }
}

impl From<VersionConflict> for AppError {
    fn from(conflict: VersionConflict) -> Self {
        let details = json!({
            "entity_type": conflict.entity_type,
            "entity_id": conflict.entity_id,
            "expected_version": conflict.expected_version,
            "actual_version": conflict.actual_version,
        });
        AppError::new(
            CODE_VERSION_CONFLICT,
            "conflict",
            "concurrent update detected: entity was modified by another writer",
            true,
            details,
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}
