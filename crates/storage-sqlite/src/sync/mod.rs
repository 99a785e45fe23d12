//! SQLite storage for sync state: the outbox and the key-value metadata table.

pub mod metadata;
pub mod queue;

pub use metadata::{write_metadata, AppMetadataDB, MetadataRepository};
pub use queue::{write_queue_operation, NewQueueOperationDB, QueueOperationDB, SyncQueueRepository};
