//! Sync domain models and services.

mod config;
mod engine;
mod queue_model;
mod retry_policy;
mod sync_traits;

pub use config::*;
pub use engine::*;
pub use queue_model::*;
pub use retry_policy::*;
pub use sync_traits::*;

/// `app_metadata` keys written by the store and the engine.
pub mod metadata_keys {
    pub const SCHEMA_VERSION: &str = "schema_version";
    pub const STORE_INITIALIZED_AT: &str = "store_initialized_at";
    pub const LAST_PUSH_AT: &str = "sync.last_push_at";
    pub const LAST_PULL_AT: &str = "sync.last_pull_at";
    pub const LAST_CYCLE_STATUS: &str = "sync.last_cycle_status";
    pub const LAST_CYCLE_AT: &str = "sync.last_cycle_at";
    pub const LAST_ERROR: &str = "sync.last_error";
}
