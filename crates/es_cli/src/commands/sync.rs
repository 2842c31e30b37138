use es_core::app_error::{AppError, AppResult};
use es_core::file_sync::{
    upsert_capability, upsert_enabler, upsert_story_card, CapabilityDoc, EnablerDoc,
    StoryCardDoc, SyncOptions,
};
use es_core::store::open_store_db;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

fn read_doc<T: DeserializeOwned>(doc_path: &str) -> AppResult<T> {
    let bytes = fs::read(doc_path).map_err(|e| {
        AppError::new(
            "ES_SYNC_DOC_READ_FAILED",
            "sync",
            "failed to read sync document",
            false,
            serde_json::json!({ "error": e.to_string(), "path": doc_path }),
        )
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        AppError::validation(
            "failed to parse sync document",
            serde_json::json!({ "error": e.to_string(), "path": doc_path }),
        )
    })
}

fn print_pretty<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn run_capability(
    store_path: &str,
    doc_path: &str,
    actor: Option<&str>,
    now_ms: i64,
) -> AppResult<()> {
    let (store, conn) = open_store_db(Path::new(store_path))?;
    let doc: CapabilityDoc = read_doc(doc_path)?;
    let synced = upsert_capability(&conn, &doc, actor, SyncOptions::from(&store.audit), now_ms)?;
    print_pretty(&synced);
    Ok(())
}

pub fn run_enabler(
    store_path: &str,
    doc_path: &str,
    actor: Option<&str>,
    now_ms: i64,
) -> AppResult<()> {
    let (store, conn) = open_store_db(Path::new(store_path))?;
    let doc: EnablerDoc = read_doc(doc_path)?;
    let synced = upsert_enabler(&conn, &doc, actor, SyncOptions::from(&store.audit), now_ms)?;
    print_pretty(&synced);
    Ok(())
}

pub fn run_story_card(
    store_path: &str,
    doc_path: &str,
    actor: Option<&str>,
    now_ms: i64,
) -> AppResult<()> {
    let (store, conn) = open_store_db(Path::new(store_path))?;
    let doc: StoryCardDoc = read_doc(doc_path)?;
    let synced = upsert_story_card(&conn, &doc, actor, SyncOptions::from(&store.audit), now_ms)?;
    print_pretty(&synced);
    Ok(())
}
