use es_core::app_error::{AppError, VersionConflict};
use es_core::types::EntityType;
use jsonschema::validator_for;
use serde_json::json;

fn app_error_schema() -> serde_json::Value {
    json!({
      "$schema": "https://json-schema.org/draft/2020-12/schema",
      "$id": "es://schemas/app-error/v1",
      "type": "object",
      "required": [
        "schema_version",
        "code",
        "category",
        "message",
        "retryable",
        "details"
      ],
      "properties": {
        "schema_version": { "const": 1 },
        "code": { "type": "string", "pattern": "^ES_[A-Z0-9_]+$" },
        "category": { "type": "string" },
        "message": { "type": "string" },
        "retryable": { "type": "boolean" },
        "details": {}
      },
      "additionalProperties": false
    })
}

fn version_conflict_details_schema() -> serde_json::Value {
    json!({
      "$schema": "https://json-schema.org/draft/2020-12/schema",
      "$id": "es://schemas/version-conflict/v1",
      "type": "object",
      "required": ["entity_type", "entity_id", "expected_version", "actual_version"],
      "properties": {
        "entity_type": { "enum": ["capability", "enabler", "story_card"] },
        "entity_id": { "type": "string", "minLength": 1 },
        "expected_version": { "type": "integer" },
        "actual_version": { "type": "integer", "minimum": 1 }
      },
      "additionalProperties": false
    })
}

#[test]
fn schema_app_error_accepts_valid_payload() {
    let schema = validator_for(&app_error_schema()).expect("compile app_error schema");
    let value = serde_json::to_value(AppError::not_found(EntityType::StoryCard, "CARD-1"))
        .expect("serialize app_error");

    assert!(schema.is_valid(&value));
}

#[test]
fn schema_app_error_rejects_missing_code() {
    let schema = validator_for(&app_error_schema()).expect("compile app_error schema");
    let invalid = json!({
      "schema_version": 1,
      "category": "validation",
      "message": "missing code",
      "retryable": false,
      "details": {}
    });

    assert!(!schema.is_valid(&invalid));
}

#[test]
fn schema_version_conflict_payload_is_stable() {
    let error_schema = validator_for(&app_error_schema()).expect("compile app_error schema");
    let details_schema =
        validator_for(&version_conflict_details_schema()).expect("compile conflict schema");

    let err = AppError::from(VersionConflict {
        entity_type: EntityType::Capability,
        entity_id: "CAP-000123".to_string(),
        expected_version: 3,
        actual_version: 4,
    });
    let value = serde_json::to_value(&err).expect("serialize conflict");

    assert!(error_schema.is_valid(&value));
    assert!(details_schema.is_valid(&value["details"]));
    assert_eq!(value["code"], "ES_VERSION_CONFLICT");
    assert_eq!(value["category"], "conflict");
    assert_eq!(value["retryable"], true);
    assert_eq!(err.to_string(), format!("ES_VERSION_CONFLICT: {}", err.message));
}
