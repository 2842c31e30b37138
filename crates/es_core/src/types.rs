use crate::app_error::{AppError, AppResult};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Capability,
    Enabler,
    StoryCard,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [
        EntityType::Capability,
        EntityType::Enabler,
        EntityType::StoryCard,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Capability => "capability",
            EntityType::Enabler => "enabler",
            EntityType::StoryCard => "story_card",
        }
    }

    pub(crate) fn table(self) -> &'static str {
        match self {
            EntityType::Capability => "capabilities",
            EntityType::Enabler => "enablers",
            EntityType::StoryCard => "story_cards",
        }
    }

    pub(crate) fn business_id_column(self) -> &'static str {
        match self {
            EntityType::Capability => "capability_id",
            EntityType::Enabler => "enabler_id",
            EntityType::StoryCard => "card_id",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "capability" => Ok(EntityType::Capability),
            "enabler" => Ok(EntityType::Enabler),
            "story_card" => Ok(EntityType::StoryCard),
            other => Err(AppError::validation(
                "unknown entity type",
                serde_json::json!({
                    "entity_type": other,
                    "supported": ["capability", "enabler", "story_card"]
                }),
            )),
        }
    }
}

impl ToSql for EntityType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EntityType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

/// The four independent state attributes tracked per entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDimensions {
    #[serde(default)]
    pub lifecycle_state: String,
    #[serde(default)]
    pub workflow_stage: String,
    #[serde(default)]
    pub stage_status: String,
    #[serde(default)]
    pub approval_status: String,
}

impl StateDimensions {
    pub fn new(
        lifecycle_state: &str,
        workflow_stage: &str,
        stage_status: &str,
        approval_status: &str,
    ) -> Self {
        Self {
            lifecycle_state: lifecycle_state.to_string(),
            workflow_stage: workflow_stage.to_string(),
            stage_status: stage_status.to_string(),
            approval_status: approval_status.to_string(),
        }
    }

    /// Blank dimensions take the creation defaults for the given entity type.
    pub fn with_creation_defaults(mut self, entity_type: EntityType) -> Self {
        if self.lifecycle_state.is_empty() {
            self.lifecycle_state = "active".to_string();
        }
        if self.workflow_stage.is_empty() {
            self.workflow_stage = match entity_type {
                EntityType::Enabler => "specification".to_string(),
                EntityType::Capability | EntityType::StoryCard => "intent".to_string(),
            };
        }
        if self.stage_status.is_empty() {
            self.stage_status = "in_progress".to_string();
        }
        if self.approval_status.is_empty() {
            self.approval_status = "pending".to_string();
        }
        self
    }
}

/// Columns shared by every versioned entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub id: i64,
    pub workspace_id: String,
    pub version: i64,
    pub file_path: Option<String>,
    pub is_active: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}
