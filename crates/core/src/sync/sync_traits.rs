use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::queue_model::{NewQueueOperation, QueueOperation, QueueStats, QueueStatus};
use crate::addresses::Address;
use crate::errors::Result;

/// Persistence contract for the outbox.
#[async_trait]
pub trait SyncQueueRepositoryTrait: Send + Sync {
    async fn enqueue(&self, request: NewQueueOperation) -> Result<QueueOperation>;

    fn get(&self, operation_id: i64) -> Result<Option<QueueOperation>>;
    /// Pending operations, oldest first; ties keep append order.
    fn list_pending(&self) -> Result<Vec<QueueOperation>>;
    fn list_failed(&self) -> Result<Vec<QueueOperation>>;
    fn list_by_status(&self, status: QueueStatus) -> Result<Vec<QueueOperation>>;
    fn by_entity(&self, entity_id: &str) -> Result<Vec<QueueOperation>>;
    fn stats(&self) -> Result<QueueStats>;

    /// Claims a pending operation. Returns `false` when it was not pending.
    async fn mark_in_progress(&self, operation_id: i64) -> Result<bool>;
    /// Deletes the operation. Returns `false` when no such operation exists.
    async fn mark_completed(&self, operation_id: i64) -> Result<bool>;
    async fn mark_failed(&self, operation_id: i64, message: &str) -> Result<QueueOperation>;
    /// Skips the remaining budget for errors the remote will never accept.
    async fn mark_failed_permanently(
        &self,
        operation_id: i64,
        message: &str,
    ) -> Result<QueueOperation>;
    async fn retry(&self, operation_id: i64) -> Result<bool>;
    async fn retry_all(&self) -> Result<usize>;
    /// Returns `in_progress` operations older than `lease` to `pending`.
    async fn reclaim_stale_in_progress(&self, lease: Duration) -> Result<usize>;
}

/// Key-value table for initialization flags and engine status.
#[async_trait]
pub trait MetadataRepositoryTrait: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<bool>;
}

/// Acknowledgement returned by the remote for a delivered operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReceipt {
    pub remote_id: Option<String>,
}

/// Remote authoritative backend.
///
/// Implementations report delivery failures as
/// [`SyncError`](crate::errors::SyncError) so the engine can tell transient
/// failures from permanent rejections.
#[async_trait]
pub trait RemoteSyncBackend: Send + Sync {
    async fn push(&self, operation: &QueueOperation) -> Result<PushReceipt>;
    /// Records changed remotely since `since` (everything when `None`).
    async fn pull(&self, since: Option<NaiveDateTime>) -> Result<Vec<Address>>;
}
