use es_core::audit::history;
use es_core::db::open_db;
use es_core::entity::get_enabler;
use es_core::file_sync::{
    merge_text, upsert_capability, upsert_enabler, upsert_story_card, CapabilityDoc, EnablerDoc,
    StoryCardDoc, SyncOptions,
};
use es_core::store::AuditConfig;
use es_core::types::{EntityType, StateDimensions};

fn capability_doc(id: &str) -> CapabilityDoc {
    CapabilityDoc {
        capability_id: id.to_string(),
        name: Some("Payments".to_string()),
        description: Some("Accept card payments".to_string()),
        workspace_id: Some("ws".to_string()),
        file_path: Some("specs/CAP-1.md".to_string()),
        state: StateDimensions::new("active", "specification", "in_progress", "pending"),
        ..CapabilityDoc::default()
    }
}

#[test]
fn first_sync_inserts_at_version_one_with_state_as_given() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = open_db(&temp.path().join("db.sqlite")).expect("open db");

    let cap = upsert_capability(&conn, &capability_doc("CAP-1"), Some("sync"), SyncOptions::default(), 10)
        .expect("insert");
    assert_eq!(cap.meta.version, 1);
    assert_eq!(cap.name, "Payments");
    assert_eq!(cap.state.workflow_stage, "specification");
    assert_eq!(cap.meta.file_path.as_deref(), Some("specs/CAP-1.md"));
    assert_eq!(cap.meta.created_by.as_deref(), Some("sync"));
}

#[test]
fn resync_keeps_stored_fields_for_empty_input_and_replaces_state() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = open_db(&temp.path().join("db.sqlite")).expect("open db");
    upsert_capability(&conn, &capability_doc("CAP-1"), None, SyncOptions::default(), 10)
        .expect("insert");

    let sparse = CapabilityDoc {
        capability_id: "CAP-1".to_string(),
        name: Some(String::new()),
        purpose: Some("Reduce checkout friction".to_string()),
        state: StateDimensions::new("implemented", "implementation", "approved", "approved"),
        ..CapabilityDoc::default()
    };
    let cap = upsert_capability(&conn, &sparse, Some("sync"), SyncOptions::default(), 20)
        .expect("update");

    assert_eq!(cap.meta.version, 2);
    assert_eq!(cap.name, "Payments");
    assert_eq!(cap.description, "Accept card payments");
    assert_eq!(cap.purpose, "Reduce checkout friction");
    assert_eq!(cap.meta.workspace_id, "ws");
    assert_eq!(cap.meta.file_path.as_deref(), Some("specs/CAP-1.md"));
    assert_eq!(
        cap.state,
        StateDimensions::new("implemented", "implementation", "approved", "approved")
    );
    assert_eq!(cap.meta.updated_at_ms, 20);
    assert_eq!(cap.meta.created_at_ms, 10);
}

#[test]
fn resyncing_identical_doc_is_idempotent_except_for_version() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = open_db(&temp.path().join("db.sqlite")).expect("open db");
    let doc = capability_doc("CAP-1");

    let first = upsert_capability(&conn, &doc, None, SyncOptions::default(), 10).expect("first");
    let second = upsert_capability(&conn, &doc, None, SyncOptions::default(), 10).expect("second");

    assert_eq!(second.meta.version, first.meta.version + 1);
    assert_eq!(second.name, first.name);
    assert_eq!(second.description, first.description);
    assert_eq!(second.state, first.state);
    assert_eq!(second.meta.id, first.meta.id);
}

#[test]
fn blank_state_in_doc_clears_stored_state() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = open_db(&temp.path().join("db.sqlite")).expect("open db");
    upsert_capability(&conn, &capability_doc("CAP-1"), None, SyncOptions::default(), 1)
        .expect("insert");

    let cap = upsert_capability(
        &conn,
        &CapabilityDoc {
            capability_id: "CAP-1".to_string(),
            ..CapabilityDoc::default()
        },
        None,
        SyncOptions::default(),
        2,
    )
    .expect("update");
    assert_eq!(cap.state, StateDimensions::default());
    assert_eq!(cap.name, "Payments");
}

#[test]
fn new_enabler_requires_parent_and_update_preserves_it() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = open_db(&temp.path().join("db.sqlite")).expect("open db");
    let cap = upsert_capability(&conn, &capability_doc("CAP-1"), None, SyncOptions::default(), 1)
        .expect("capability");

    let orphan = EnablerDoc {
        enabler_id: "ENB-1".to_string(),
        workspace_id: Some("ws".to_string()),
        ..EnablerDoc::default()
    };
    let err = upsert_enabler(&conn, &orphan, None, SyncOptions::default(), 2)
        .expect_err("parent required on insert");
    assert!(err.is_validation());

    let linked = upsert_enabler(
        &conn,
        &EnablerDoc {
            capability_id: Some(cap.meta.id),
            name: Some("Tokenizer".to_string()),
            ..orphan.clone()
        },
        None,
        SyncOptions::default(),
        3,
    )
    .expect("insert enabler");
    assert_eq!(linked.capability_id, cap.meta.id);
    assert_eq!(linked.capability_ref.as_deref(), Some("CAP-1"));

    let resynced = upsert_enabler(
        &conn,
        &EnablerDoc {
            capability_id: Some(0),
            owner: Some("platform".to_string()),
            ..orphan
        },
        None,
        SyncOptions::default(),
        4,
    )
    .expect("update enabler");
    assert_eq!(resynced.capability_id, cap.meta.id);
    assert_eq!(resynced.name, "Tokenizer");
    assert_eq!(resynced.owner, "platform");
    assert_eq!(resynced.meta.version, 2);
}

#[test]
fn enabler_parent_reference_resolves_by_business_id() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = open_db(&temp.path().join("db.sqlite")).expect("open db");
    upsert_capability(&conn, &capability_doc("CAP-A"), None, SyncOptions::default(), 1)
        .expect("capability A");
    let cap_b = upsert_capability(&conn, &capability_doc("CAP-B"), None, SyncOptions::default(), 1)
        .expect("capability B");

    let enabler = upsert_enabler(
        &conn,
        &EnablerDoc {
            enabler_id: "ENB-1".to_string(),
            capability_ref: Some("CAP-B".to_string()),
            workspace_id: Some("ws".to_string()),
            ..EnablerDoc::default()
        },
        None,
        SyncOptions::default(),
        2,
    )
    .expect("insert by reference");
    assert_eq!(enabler.capability_id, cap_b.meta.id);

    let err = upsert_enabler(
        &conn,
        &EnablerDoc {
            enabler_id: "ENB-2".to_string(),
            capability_ref: Some("CAP-MISSING".to_string()),
            workspace_id: Some("ws".to_string()),
            ..EnablerDoc::default()
        },
        None,
        SyncOptions::default(),
        3,
    )
    .expect_err("unresolvable reference");
    assert!(err.is_validation());
}

#[test]
fn resync_with_unknown_parent_row_id_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = open_db(&temp.path().join("db.sqlite")).expect("open db");
    let cap = upsert_capability(&conn, &capability_doc("CAP-1"), None, SyncOptions::default(), 1)
        .expect("capability");
    let doc = EnablerDoc {
        enabler_id: "ENB-1".to_string(),
        capability_id: Some(cap.meta.id),
        workspace_id: Some("ws".to_string()),
        ..EnablerDoc::default()
    };
    upsert_enabler(&conn, &doc, None, SyncOptions::default(), 2).expect("insert enabler");

    let err = upsert_enabler(
        &conn,
        &EnablerDoc {
            capability_id: Some(9_999),
            ..doc
        },
        None,
        SyncOptions::default(),
        3,
    )
    .expect_err("unknown parent row");
    assert!(err.is_validation());
    assert_eq!(err.details["capability_id"], serde_json::json!(9_999));

    let stored = get_enabler(&conn, "ENB-1").expect("get");
    assert_eq!(stored.capability_id, cap.meta.id);
    assert_eq!(stored.meta.version, 1);
}

#[test]
fn story_card_positions_merge_by_presence() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = open_db(&temp.path().join("db.sqlite")).expect("open db");

    let doc = StoryCardDoc {
        card_id: "CARD-1".to_string(),
        title: Some("Login".to_string()),
        position_x: Some(10.0),
        position_y: Some(20.0),
        workspace_id: Some("ws".to_string()),
        ..StoryCardDoc::default()
    };
    upsert_story_card(&conn, &doc, None, SyncOptions::default(), 1).expect("insert");

    let moved = upsert_story_card(
        &conn,
        &StoryCardDoc {
            card_id: "CARD-1".to_string(),
            position_x: Some(42.0),
            ..StoryCardDoc::default()
        },
        None,
        SyncOptions::default(),
        2,
    )
    .expect("update");
    assert_eq!(moved.position_x, 42.0);
    assert_eq!(moved.position_y, 20.0);
    assert_eq!(moved.title, "Login");
}

#[test]
fn new_entity_requires_workspace_and_business_id() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = open_db(&temp.path().join("db.sqlite")).expect("open db");

    let err = upsert_capability(
        &conn,
        &CapabilityDoc {
            capability_id: "CAP-1".to_string(),
            ..CapabilityDoc::default()
        },
        None,
        SyncOptions::default(),
        1,
    )
    .expect_err("workspace required");
    assert!(err.is_validation());

    let err = upsert_story_card(&conn, &StoryCardDoc::default(), None, SyncOptions::default(), 1)
        .expect_err("card id required");
    assert!(err.is_validation());
}

#[test]
fn file_sync_audit_is_opt_in() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = open_db(&temp.path().join("db.sqlite")).expect("open db");

    upsert_capability(&conn, &capability_doc("CAP-1"), None, SyncOptions::default(), 1)
        .expect("unaudited");
    assert!(history(&conn, EntityType::Capability, "CAP-1", None)
        .expect("history")
        .is_empty());

    let opts = SyncOptions::from(&AuditConfig {
        record_file_sync: true,
        ..AuditConfig::default()
    });
    upsert_capability(&conn, &capability_doc("CAP-1"), Some("watcher"), opts, 2)
        .expect("audited");

    let rows = history(&conn, EntityType::Capability, "CAP-1", None).expect("history");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].field_changed, "file_sync");
    assert_eq!(rows[0].changed_by.as_deref(), Some("watcher"));
}

#[test]
fn merge_text_prefers_non_empty_incoming() {
    assert_eq!(merge_text(Some("new"), "old"), "new");
    assert_eq!(merge_text(Some(""), "old"), "old");
    assert_eq!(merge_text(None, "old"), "old");
}

#[test]
fn sync_docs_deserialize_with_missing_fields() {
    let doc: EnablerDoc = serde_json::from_value(serde_json::json!({
        "enabler_id": "ENB-9",
        "capability_ref": "CAP-1",
        "lifecycle_state": "draft"
    }))
    .expect("parse enabler doc");
    assert_eq!(doc.capability_id, None);
    assert_eq!(doc.state.lifecycle_state, "draft");
    assert_eq!(doc.state.approval_status, "");
}
