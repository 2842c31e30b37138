mod cli;
mod commands {
    pub mod audit;
    pub mod state;
    pub mod store;
    pub mod sync;
    pub mod workspace;
}

use clap::Parser;
use cli::{AuditCmd, Cli, Command, StateCmd, StoreCmd, SyncCmd, WorkspaceCmd};
use es_core::state_mutator::StateUpdateRequest;
use tracing_subscriber::EnvFilter;

const EXIT_FAILURE: i32 = 1;
const EXIT_VERSION_CONFLICT: i32 = 2;

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.cmd {
        Command::Store { cmd } => match cmd {
            StoreCmd::Init {
                store_path,
                store_slug,
            } => commands::store::run_init(&store_path, &store_slug, now_ms()),
            StoreCmd::Open { store_path } => commands::store::run_open(&store_path),
        },
        Command::State { cmd } => match cmd {
            StateCmd::Show {
                store_path,
                entity_type,
                entity_id,
            } => commands::state::run_show(&store_path, &entity_type, &entity_id),
            StateCmd::Update {
                store_path,
                entity_type,
                entity_id,
                version,
                lifecycle_state,
                workflow_stage,
                stage_status,
                approval_status,
                reason,
                actor,
                now_ms: at,
            } => {
                let req = StateUpdateRequest {
                    lifecycle_state,
                    workflow_stage,
                    stage_status,
                    approval_status,
                    version,
                    change_reason: reason,
                };
                commands::state::run_update(
                    &store_path,
                    &entity_type,
                    &entity_id,
                    &req,
                    actor.as_deref(),
                    at.unwrap_or_else(now_ms),
                )
            }
            StateCmd::History {
                store_path,
                entity_type,
                entity_id,
                limit,
            } => commands::state::run_history(&store_path, &entity_type, &entity_id, limit),
            StateCmd::Workspace {
                store_path,
                workspace_id,
            } => commands::state::run_workspace(&store_path, &workspace_id),
        },
        Command::Sync { cmd } => match cmd {
            SyncCmd::Capability {
                store_path,
                doc_path,
                actor,
                now_ms: at,
            } => commands::sync::run_capability(
                &store_path,
                &doc_path,
                actor.as_deref(),
                at.unwrap_or_else(now_ms),
            ),
            SyncCmd::Enabler {
                store_path,
                doc_path,
                actor,
                now_ms: at,
            } => commands::sync::run_enabler(
                &store_path,
                &doc_path,
                actor.as_deref(),
                at.unwrap_or_else(now_ms),
            ),
            SyncCmd::StoryCard {
                store_path,
                doc_path,
                actor,
                now_ms: at,
            } => commands::sync::run_story_card(
                &store_path,
                &doc_path,
                actor.as_deref(),
                at.unwrap_or_else(now_ms),
            ),
        },
        Command::Workspace { cmd } => match cmd {
            WorkspaceCmd::Export {
                store_path,
                workspace_id,
                include_history,
                out_dir,
                now_ms: at,
            } => commands::workspace::run_export(
                &store_path,
                &workspace_id,
                include_history,
                out_dir.as_deref(),
                at.unwrap_or_else(now_ms),
            )
            .map(|path| {
                println!("exported snapshot: {}", path.display());
            }),
            WorkspaceCmd::Import {
                store_path,
                workspace_id,
                snapshot_path,
                actor,
                now_ms: at,
            } => commands::workspace::run_import(
                &store_path,
                &workspace_id,
                &snapshot_path,
                actor.as_deref(),
                at.unwrap_or_else(now_ms),
            ),
        },
        Command::Audit { cmd } => match cmd {
            AuditCmd::Verify { store_path } => commands::audit::run_verify(&store_path),
        },
    };

    if let Err(err) = result {
        tracing::debug!(details = %err.details, "command failed");
        eprintln!("{}: {}", err.code, err.message);
        let code = if err.is_conflict() {
            EXIT_VERSION_CONFLICT
        } else {
            EXIT_FAILURE
        };
        std::process::exit(code);
    }
}
