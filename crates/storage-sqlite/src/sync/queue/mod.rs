mod model;
mod repository;

pub use model::{NewQueueOperationDB, QueueOperationDB};
pub use repository::{write_queue_operation, SyncQueueRepository};
