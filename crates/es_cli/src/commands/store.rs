use es_core::app_error::AppResult;
use es_core::store::{store_init, store_open};
use std::path::Path;

pub fn run_init(store_path: &str, store_slug: &str, now_ms: i64) -> AppResult<()> {
    let store = store_init(Path::new(store_path), store_slug, now_ms)?;
    println!("store initialized: {} ({})", store.store_slug, store.store_id);
    Ok(())
}

pub fn run_open(store_path: &str) -> AppResult<()> {
    let store = store_open(Path::new(store_path))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&store).unwrap_or_else(|_| "{}".to_string())
    );
    Ok(())
}
