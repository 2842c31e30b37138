use es_core::app_error::AppResult;
use es_core::audit::verify_audit_chain;
use es_core::store::open_store_db;
use std::path::Path;

pub fn run_verify(store_path: &str) -> AppResult<()> {
    let (_, conn) = open_store_db(Path::new(store_path))?;
    let report = verify_audit_chain(&conn)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
    );
    Ok(())
}
