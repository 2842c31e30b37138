use es_core::app_error::AppResult;
use es_core::file_sync::SyncOptions;
use es_core::store::{open_store_db, store_paths};
use es_core::workspace_export::{export_workspace, import_snapshot, read_snapshot, write_snapshot};
use std::path::{Path, PathBuf};

pub fn run_export(
    store_path: &str,
    workspace_id: &str,
    include_history: bool,
    out_dir: Option<&str>,
    now_ms: i64,
) -> AppResult<PathBuf> {
    let root = Path::new(store_path);
    let (_, conn) = open_store_db(root)?;
    let snapshot = export_workspace(&conn, workspace_id, include_history, now_ms)?;
    let dir = out_dir
        .map(PathBuf::from)
        .unwrap_or_else(|| store_paths(root).snapshots_dir);
    write_snapshot(&dir, &snapshot)
}

pub fn run_import(
    store_path: &str,
    workspace_id: &str,
    snapshot_path: &str,
    actor: Option<&str>,
    now_ms: i64,
) -> AppResult<()> {
    let (store, conn) = open_store_db(Path::new(store_path))?;
    let snapshot = read_snapshot(Path::new(snapshot_path))?;
    let report = import_snapshot(
        &conn,
        workspace_id,
        &snapshot,
        actor,
        SyncOptions::from(&store.audit),
        now_ms,
    )?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
    );
    Ok(())
}
