use es_core::app_error::AppResult;
use es_core::audit::history;
use es_core::entity::{get_capability, get_enabler, get_story_card, workspace_state};
use es_core::state_mutator::{
    update_capability_state, update_enabler_state, update_story_card_state, StateUpdateRequest,
};
use es_core::store::open_store_db;
use es_core::types::EntityType;
use serde::Serialize;
use std::path::Path;

fn print_pretty<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn run_show(store_path: &str, entity_type: &str, entity_id: &str) -> AppResult<()> {
    let (_, conn) = open_store_db(Path::new(store_path))?;
    match entity_type.parse::<EntityType>()? {
        EntityType::Capability => print_pretty(&get_capability(&conn, entity_id)?),
        EntityType::Enabler => print_pretty(&get_enabler(&conn, entity_id)?),
        EntityType::StoryCard => print_pretty(&get_story_card(&conn, entity_id)?),
    }
    Ok(())
}

pub fn run_update(
    store_path: &str,
    entity_type: &str,
    entity_id: &str,
    req: &StateUpdateRequest,
    actor: Option<&str>,
    now_ms: i64,
) -> AppResult<()> {
    let (store, conn) = open_store_db(Path::new(store_path))?;
    let policy = store.audit.policy;
    match entity_type.parse::<EntityType>()? {
        EntityType::Capability => print_pretty(&update_capability_state(
            &conn, entity_id, req, actor, policy, now_ms,
        )?),
        EntityType::Enabler => print_pretty(&update_enabler_state(
            &conn, entity_id, req, actor, policy, now_ms,
        )?),
        EntityType::StoryCard => print_pretty(&update_story_card_state(
            &conn, entity_id, req, actor, policy, now_ms,
        )?),
    }
    Ok(())
}

pub fn run_history(
    store_path: &str,
    entity_type: &str,
    entity_id: &str,
    limit: Option<i64>,
) -> AppResult<()> {
    let (store, conn) = open_store_db(Path::new(store_path))?;
    let entity_type = entity_type.parse::<EntityType>()?;
    let limit = limit.unwrap_or(store.audit.history_limit);
    print_pretty(&history(&conn, entity_type, entity_id, Some(limit))?);
    Ok(())
}

pub fn run_workspace(store_path: &str, workspace_id: &str) -> AppResult<()> {
    let (_, conn) = open_store_db(Path::new(store_path))?;
    print_pretty(&workspace_state(&conn, workspace_id)?);
    Ok(())
}
