use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "es_cli")]
#[command(about = "Entity state store CLI")]
pub struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    Store {
        #[command(subcommand)]
        cmd: StoreCmd,
    },
    State {
        #[command(subcommand)]
        cmd: StateCmd,
    },
    Sync {
        #[command(subcommand)]
        cmd: SyncCmd,
    },
    Workspace {
        #[command(subcommand)]
        cmd: WorkspaceCmd,
    },
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
pub enum StoreCmd {
    Init { store_path: String, store_slug: String },
    Open { store_path: String },
}

#[derive(Subcommand)]
pub enum StateCmd {
    Show {
        store_path: String,
        entity_type: String,
        entity_id: String,
    },
    Update {
        store_path: String,
        entity_type: String,
        entity_id: String,
        #[arg(long)]
        version: i64,
        #[arg(long = "lifecycle-state")]
        lifecycle_state: Option<String>,
        #[arg(long = "workflow-stage")]
        workflow_stage: Option<String>,
        #[arg(long = "stage-status")]
        stage_status: Option<String>,
        #[arg(long = "approval-status")]
        approval_status: Option<String>,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long = "now-ms")]
        now_ms: Option<i64>,
    },
    History {
        store_path: String,
        entity_type: String,
        entity_id: String,
        #[arg(long)]
        limit: Option<i64>,
    },
    Workspace {
        store_path: String,
        workspace_id: String,
    },
}

#[derive(Subcommand)]
pub enum SyncCmd {
    Capability {
        store_path: String,
        doc_path: String,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long = "now-ms")]
        now_ms: Option<i64>,
    },
    Enabler {
        store_path: String,
        doc_path: String,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long = "now-ms")]
        now_ms: Option<i64>,
    },
    StoryCard {
        store_path: String,
        doc_path: String,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long = "now-ms")]
        now_ms: Option<i64>,
    },
}

#[derive(Subcommand)]
pub enum WorkspaceCmd {
    Export {
        store_path: String,
        workspace_id: String,
        #[arg(long = "include-history")]
        include_history: bool,
        /// Defaults to the store's snapshots directory.
        #[arg(long = "out-dir")]
        out_dir: Option<String>,
        #[arg(long = "now-ms")]
        now_ms: Option<i64>,
    },
    Import {
        store_path: String,
        workspace_id: String,
        snapshot_path: String,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long = "now-ms")]
        now_ms: Option<i64>,
    },
}

#[derive(Subcommand)]
pub enum AuditCmd {
    Verify { store_path: String },
}
