use es_core::db::open_db;
use es_core::entity::{
    create_capability, create_enabler, create_story_card, get_capability, get_enabler,
    get_story_card, NewCapability, NewEnabler, NewStoryCard,
};
use es_core::file_sync::SyncOptions;
use es_core::state_mutator::{apply_state_update, StateUpdateRequest};
use es_core::store::AuditPolicy;
use es_core::types::{EntityType, StateDimensions};
use es_core::workspace_export::{
    export_workspace, import_snapshot, import_workspace, read_snapshot, snapshot_file_name,
    write_snapshot, SnapshotDocument,
};

fn seed_workspace(conn: &rusqlite::Connection, workspace: &str) {
    let cap = create_capability(
        conn,
        &NewCapability {
            capability_id: "CAP-1".to_string(),
            workspace_id: workspace.to_string(),
            name: "Payments".to_string(),
            purpose: "Take money".to_string(),
            file_path: Some("caps/CAP-1.md".to_string()),
            ..NewCapability::default()
        },
        Some("alice"),
        10,
    )
    .expect("capability");

    for (idx, id) in ["ENB-1", "ENB-2", "ENB-3"].iter().enumerate() {
        create_enabler(
            conn,
            &NewEnabler {
                enabler_id: id.to_string(),
                capability_id: cap.meta.id,
                workspace_id: workspace.to_string(),
                name: format!("Enabler {idx}"),
                owner: "platform".to_string(),
                ..NewEnabler::default()
            },
            Some("alice"),
            11 + idx as i64,
        )
        .expect("enabler");
    }

    create_story_card(
        conn,
        &NewStoryCard {
            card_id: "CARD-1".to_string(),
            workspace_id: workspace.to_string(),
            title: "Checkout".to_string(),
            position_x: 3.5,
            position_y: -1.0,
            state: StateDimensions::new("draft", "ui_design", "blocked", "rejected"),
            ..NewStoryCard::default()
        },
        None,
        20,
    )
    .expect("story card");
}

#[test]
fn export_then_import_into_fresh_store_preserves_fields() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn_a = open_db(&temp.path().join("a.sqlite")).expect("open a");
    seed_workspace(&conn_a, "ws-a");

    let snapshot = export_workspace(&conn_a, "ws-a", false, 100).expect("export");
    assert_eq!(snapshot.version, "1.0");
    assert_eq!(snapshot.workspace_id, "ws-a");
    assert_eq!(snapshot.capabilities.len(), 1);
    assert_eq!(snapshot.enablers.len(), 3);
    assert_eq!(snapshot.story_cards.len(), 1);
    assert!(snapshot.state_changes.is_none());

    let conn_b = open_db(&temp.path().join("b.sqlite")).expect("open b");
    create_capability(
        &conn_b,
        &NewCapability {
            capability_id: "CAP-LOCAL".to_string(),
            workspace_id: "ws-local".to_string(),
            ..NewCapability::default()
        },
        None,
        1,
    )
    .expect("shift row ids in b");

    let report = import_workspace(&conn_b, "ws-b", &snapshot, Some("importer"), SyncOptions::default(), 200)
        .expect("import");
    assert_eq!(report.workspace_id, "ws-b");
    assert_eq!(report.imported.capabilities, 1);
    assert_eq!(report.imported.enablers, 3);
    assert_eq!(report.imported.story_cards, 1);
    assert!(report.failures.is_empty());

    let src_cap = &snapshot.capabilities[0];
    let cap = get_capability(&conn_b, "CAP-1").expect("imported capability");
    assert_eq!(cap.meta.workspace_id, "ws-b");
    assert_eq!(cap.name, src_cap.name);
    assert_eq!(cap.purpose, src_cap.purpose);
    assert_eq!(cap.state, src_cap.state);
    assert_eq!(cap.meta.file_path, src_cap.meta.file_path);
    assert_ne!(cap.meta.id, src_cap.meta.id);

    for src in &snapshot.enablers {
        let enabler = get_enabler(&conn_b, &src.enabler_id).expect("imported enabler");
        assert_eq!(enabler.meta.workspace_id, "ws-b");
        assert_eq!(enabler.name, src.name);
        assert_eq!(enabler.owner, src.owner);
        assert_eq!(enabler.state, src.state);
        assert_eq!(enabler.capability_id, cap.meta.id);
        assert_eq!(enabler.capability_ref.as_deref(), Some("CAP-1"));
    }

    let card = get_story_card(&conn_b, "CARD-1").expect("imported card");
    assert_eq!(card.meta.workspace_id, "ws-b");
    assert_eq!(card.title, "Checkout");
    assert_eq!(card.position_x, 3.5);
    assert_eq!(card.position_y, -1.0);
    assert_eq!(card.state, snapshot.story_cards[0].state);
}

#[test]
fn import_skips_failing_entity_and_reports_it() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn_a = open_db(&temp.path().join("a.sqlite")).expect("open a");
    seed_workspace(&conn_a, "ws-a");

    let mut snapshot = export_workspace(&conn_a, "ws-a", false, 100).expect("export");
    let broken_id = snapshot.enablers[1].enabler_id.clone();
    snapshot.enablers[1].capability_ref = Some("CAP-MISSING".to_string());

    let conn_b = open_db(&temp.path().join("b.sqlite")).expect("open b");
    let report = import_workspace(&conn_b, "ws-b", &snapshot, None, SyncOptions::default(), 200)
        .expect("import");

    assert_eq!(report.imported.capabilities, 1);
    assert_eq!(report.imported.enablers, 2);
    assert_eq!(report.imported.story_cards, 1);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.entity_type, EntityType::Enabler);
    assert_eq!(failure.entity_id, broken_id);
    assert_eq!(failure.code, "ES_VALIDATION_FAILED");

    assert!(get_enabler(&conn_b, &broken_id).expect_err("skipped").is_not_found());
}

#[test]
fn import_into_existing_entities_updates_them() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = open_db(&temp.path().join("a.sqlite")).expect("open");
    seed_workspace(&conn, "ws-a");

    let snapshot = export_workspace(&conn, "ws-a", false, 100).expect("export");
    let report = import_workspace(&conn, "ws-a", &snapshot, None, SyncOptions::default(), 200)
        .expect("reimport");
    assert_eq!(report.imported.total(), 5);

    let cap = get_capability(&conn, "CAP-1").expect("capability");
    assert_eq!(cap.meta.version, 2);
    assert_eq!(cap.name, "Payments");
}

#[test]
fn unsupported_snapshot_version_is_rejected_before_any_write() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn_a = open_db(&temp.path().join("a.sqlite")).expect("open a");
    seed_workspace(&conn_a, "ws-a");

    let mut snapshot = export_workspace(&conn_a, "ws-a", false, 100).expect("export");
    snapshot.version = "2.0".to_string();

    let conn_b = open_db(&temp.path().join("b.sqlite")).expect("open b");
    let err = import_workspace(&conn_b, "ws-b", &snapshot, None, SyncOptions::default(), 200)
        .expect_err("unsupported version");
    assert!(err.is_validation());
    assert!(get_capability(&conn_b, "CAP-1").expect_err("nothing imported").is_not_found());
}

#[test]
fn export_of_unknown_workspace_is_empty() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = open_db(&temp.path().join("a.sqlite")).expect("open");

    let snapshot = export_workspace(&conn, "nobody", true, 1).expect("export");
    assert!(snapshot.capabilities.is_empty());
    assert!(snapshot.enablers.is_empty());
    assert!(snapshot.story_cards.is_empty());
    assert_eq!(snapshot.state_changes, Some(Vec::new()));
}

#[test]
fn export_can_include_workspace_history() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = open_db(&temp.path().join("a.sqlite")).expect("open");
    seed_workspace(&conn, "ws-a");

    apply_state_update(
        &conn,
        EntityType::Capability,
        "CAP-1",
        &StateUpdateRequest::new(1)
            .lifecycle_state("implemented")
            .reason("shipped"),
        Some("alice"),
        AuditPolicy::ReasonOnly,
        30,
    )
    .expect("update");

    let snapshot = export_workspace(&conn, "ws-a", true, 100).expect("export");
    let changes = snapshot.state_changes.expect("history included");
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].entity_id, "CAP-1");
    assert_eq!(changes[0].change_reason.as_deref(), Some("shipped"));
}

#[test]
fn snapshot_file_round_trips_through_disk() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = open_db(&temp.path().join("a.sqlite")).expect("open");
    seed_workspace(&conn, "ws/a");

    let snapshot = export_workspace(&conn, "ws/a", false, 1234).expect("export");
    assert_eq!(snapshot_file_name(&snapshot), "workspace_ws_a_state_1234.json");

    let path = write_snapshot(&temp.path().join("snapshots"), &snapshot).expect("write");
    assert!(path.ends_with("workspace_ws_a_state_1234.json"));

    let loaded = read_snapshot(&path).expect("read");
    assert_eq!(
        loaded,
        SnapshotDocument::from_snapshot(&snapshot).expect("document")
    );

    std::fs::write(&path, b"{ not json").expect("corrupt");
    let err = read_snapshot(&path).expect_err("corrupt snapshot");
    assert_eq!(err.code, "ES_SNAPSHOT_INVALID");

    let err = read_snapshot(&temp.path().join("missing.json")).expect_err("missing");
    assert_eq!(err.code, "ES_SNAPSHOT_READ_FAILED");
}

#[test]
fn structurally_malformed_entity_in_snapshot_file_fails_alone() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn_a = open_db(&temp.path().join("a.sqlite")).expect("open a");
    seed_workspace(&conn_a, "ws-a");

    let snapshot = export_workspace(&conn_a, "ws-a", false, 100).expect("export");
    let path = write_snapshot(&temp.path().join("snapshots"), &snapshot).expect("write");

    let mut raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).expect("read file")).expect("parse");
    let broken_id = raw["enablers"][1]["enabler_id"]
        .as_str()
        .expect("enabler id")
        .to_string();
    raw["enablers"][1]
        .as_object_mut()
        .expect("enabler object")
        .remove("created_at_ms");
    raw["story_cards"][0]
        .as_object_mut()
        .expect("card object")
        .remove("card_id");
    std::fs::write(&path, serde_json::to_vec_pretty(&raw).expect("serialize")).expect("rewrite");

    let document = read_snapshot(&path).expect("file still parses");
    let conn_b = open_db(&temp.path().join("b.sqlite")).expect("open b");
    let report = import_snapshot(&conn_b, "ws-b", &document, None, SyncOptions::default(), 200)
        .expect("import");

    assert_eq!(report.imported.capabilities, 1);
    assert_eq!(report.imported.enablers, 2);
    assert_eq!(report.imported.story_cards, 0);
    assert_eq!(report.failures.len(), 2);

    let enabler_failure = &report.failures[0];
    assert_eq!(enabler_failure.entity_type, EntityType::Enabler);
    assert_eq!(enabler_failure.entity_id, broken_id);
    assert_eq!(enabler_failure.code, "ES_VALIDATION_FAILED");

    let card_failure = &report.failures[1];
    assert_eq!(card_failure.entity_type, EntityType::StoryCard);
    assert_eq!(card_failure.entity_id, "#0");

    assert!(get_enabler(&conn_b, &broken_id).expect_err("skipped").is_not_found());
}
