pub mod app_error;
pub mod canon_json;
pub mod hashing;
pub mod types;
pub mod store;
pub mod db;
pub mod entity;
pub mod version_guard;
pub mod audit;
pub mod state_mutator;
pub mod file_sync;
pub mod workspace_export;

pub use app_error::AppError;
