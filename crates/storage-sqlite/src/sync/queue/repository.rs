//! SQLite outbox. Completed operations are deleted; everything else is kept
//! until it is delivered or explicitly retried.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::{debug, info, warn};

use waypost_core::errors::{Error, Result};
use waypost_core::sync::{
    failure_transition, NewQueueOperation, QueueOperation, QueueOperationType, QueueStats,
    QueueStatus, SyncQueueRepositoryTrait,
};

use super::model::{NewQueueOperationDB, QueueOperationDB};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::sync_queue;
use crate::utils::{enum_from_db, enum_to_db};

fn status_values(statuses: &[QueueStatus]) -> Result<Vec<String>> {
    statuses.iter().map(enum_to_db).collect()
}

fn to_queue_operation(row: QueueOperationDB) -> Result<QueueOperation> {
    Ok(QueueOperation {
        id: row.id,
        operation_type: enum_from_db(&row.operation_type)?,
        entity_type: enum_from_db(&row.entity_type)?,
        entity_id: row.entity_id,
        payload: serde_json::from_str(&row.payload)?,
        status: enum_from_db(&row.status)?,
        timestamp: row.timestamp,
        retry_count: row.retry_count,
        max_retries: row.max_retries,
        started_at: row.started_at,
        last_error: row.last_error,
        last_error_at: row.last_error_at,
    })
}

/// Appends an operation using the caller's connection, so a repository can
/// stage it in the same transaction as the record write it describes.
pub fn write_queue_operation(
    conn: &mut SqliteConnection,
    request: NewQueueOperation,
) -> Result<QueueOperation> {
    let row = NewQueueOperationDB {
        operation_type: enum_to_db(&request.operation_type)?,
        entity_type: enum_to_db(&request.entity_type)?,
        entity_id: request.entity_id,
        payload: serde_json::to_string(&request.payload)?,
        status: enum_to_db(&QueueStatus::Pending)?,
        timestamp: Utc::now().naive_utc(),
        retry_count: 0,
        max_retries: request.max_retries.max(1),
    };

    let inserted = diesel::insert_into(sync_queue::table)
        .values(&row)
        .returning(QueueOperationDB::as_returning())
        .get_result(conn)
        .map_err(StorageError::from)?;

    debug!(
        "[Outbox] Staged operation {} ({}) for {} {}",
        inserted.id, inserted.operation_type, inserted.entity_type, inserted.entity_id
    );
    to_queue_operation(inserted)
}

fn load_operation(conn: &mut SqliteConnection, operation_id: i64) -> Result<Option<QueueOperationDB>> {
    Ok(sync_queue::table
        .find(operation_id)
        .first::<QueueOperationDB>(conn)
        .optional()
        .map_err(StorageError::from)?)
}

fn record_failure(
    conn: &mut SqliteConnection,
    operation_id: i64,
    message: &str,
    exhaust_budget: bool,
) -> Result<QueueOperation> {
    let row = load_operation(conn, operation_id)?
        .ok_or_else(|| Error::not_found("queue operation", operation_id))?;
    let current = to_queue_operation(row)?;
    if current.status == QueueStatus::Failed {
        return Ok(current);
    }

    let (retry_count, status) = if exhaust_budget {
        (current.max_retries, QueueStatus::Failed)
    } else {
        let transition = failure_transition(current.retry_count, current.max_retries);
        (transition.retry_count, transition.status)
    };

    let updated = diesel::update(sync_queue::table.find(operation_id))
        .set((
            sync_queue::status.eq(enum_to_db(&status)?),
            sync_queue::retry_count.eq(retry_count),
            sync_queue::started_at.eq::<Option<chrono::NaiveDateTime>>(None),
            sync_queue::last_error.eq(Some(message.to_string())),
            sync_queue::last_error_at.eq(Some(Utc::now().naive_utc())),
        ))
        .returning(QueueOperationDB::as_returning())
        .get_result(conn)
        .map_err(StorageError::from)?;
    to_queue_operation(updated)
}

pub struct SyncQueueRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SyncQueueRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    fn load_with_statuses(&self, statuses: &[QueueStatus]) -> Result<Vec<QueueOperation>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = sync_queue::table
            .filter(sync_queue::status.eq_any(status_values(statuses)?))
            .order((sync_queue::timestamp.asc(), sync_queue::id.asc()))
            .load::<QueueOperationDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(to_queue_operation).collect()
    }
}

#[async_trait]
impl SyncQueueRepositoryTrait for SyncQueueRepository {
    async fn enqueue(&self, request: NewQueueOperation) -> Result<QueueOperation> {
        self.writer
            .exec(move |conn| write_queue_operation(conn, request))
            .await
    }

    fn get(&self, operation_id: i64) -> Result<Option<QueueOperation>> {
        let mut conn = get_connection(&self.pool)?;
        load_operation(&mut conn, operation_id)?
            .map(to_queue_operation)
            .transpose()
    }

    fn list_pending(&self) -> Result<Vec<QueueOperation>> {
        self.load_with_statuses(&[QueueStatus::Pending])
    }

    fn list_failed(&self) -> Result<Vec<QueueOperation>> {
        self.load_with_statuses(&[QueueStatus::Failed])
    }

    fn list_by_status(&self, status: QueueStatus) -> Result<Vec<QueueOperation>> {
        if status == QueueStatus::Completed {
            return Ok(Vec::new());
        }
        self.load_with_statuses(&[status])
    }

    fn by_entity(&self, entity_id: &str) -> Result<Vec<QueueOperation>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = sync_queue::table
            .filter(sync_queue::entity_id.eq(entity_id))
            .order((sync_queue::timestamp.asc(), sync_queue::id.asc()))
            .load::<QueueOperationDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(to_queue_operation).collect()
    }

    fn stats(&self) -> Result<QueueStats> {
        let mut conn = get_connection(&self.pool)?;
        let by_status = sync_queue::table
            .group_by(sync_queue::status)
            .select((sync_queue::status, count_star()))
            .load::<(String, i64)>(&mut conn)
            .map_err(StorageError::from)?;
        let by_type = sync_queue::table
            .group_by(sync_queue::operation_type)
            .select((sync_queue::operation_type, count_star()))
            .load::<(String, i64)>(&mut conn)
            .map_err(StorageError::from)?;

        let mut stats = QueueStats::default();
        for (status, count) in by_status {
            stats.add_status(enum_from_db(&status)?, count);
        }
        for (operation_type, count) in by_type {
            let operation_type: QueueOperationType = enum_from_db(&operation_type)?;
            stats.by_operation_type.insert(operation_type, count);
        }
        Ok(stats)
    }

    async fn mark_in_progress(&self, operation_id: i64) -> Result<bool> {
        self.writer
            .exec(move |conn| {
                let affected = diesel::update(
                    sync_queue::table
                        .find(operation_id)
                        .filter(sync_queue::status.eq(enum_to_db(&QueueStatus::Pending)?)),
                )
                .set((
                    sync_queue::status.eq(enum_to_db(&QueueStatus::InProgress)?),
                    sync_queue::started_at.eq(Some(Utc::now().naive_utc())),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(affected > 0)
            })
            .await
    }

    async fn mark_completed(&self, operation_id: i64) -> Result<bool> {
        self.writer
            .exec(move |conn| {
                let affected = diesel::delete(sync_queue::table.find(operation_id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if affected == 0 {
                    debug!("[Outbox] Operation {} already settled", operation_id);
                }
                Ok(affected > 0)
            })
            .await
    }

    async fn mark_failed(&self, operation_id: i64, message: &str) -> Result<QueueOperation> {
        let message = message.to_string();
        self.writer
            .exec(move |conn| record_failure(conn, operation_id, &message, false))
            .await
    }

    async fn mark_failed_permanently(
        &self,
        operation_id: i64,
        message: &str,
    ) -> Result<QueueOperation> {
        let message = message.to_string();
        self.writer
            .exec(move |conn| record_failure(conn, operation_id, &message, true))
            .await
    }

    async fn retry(&self, operation_id: i64) -> Result<bool> {
        self.writer
            .exec(move |conn| {
                let row = load_operation(conn, operation_id)?
                    .ok_or_else(|| Error::not_found("queue operation", operation_id))?;
                if row.status != enum_to_db(&QueueStatus::Failed)? {
                    return Ok(false);
                }
                diesel::update(sync_queue::table.find(operation_id))
                    .set((
                        sync_queue::status.eq(enum_to_db(&QueueStatus::Pending)?),
                        sync_queue::retry_count.eq(0),
                        sync_queue::started_at.eq::<Option<chrono::NaiveDateTime>>(None),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                info!("[Outbox] Operation {} re-queued by request", operation_id);
                Ok(true)
            })
            .await
    }

    async fn retry_all(&self) -> Result<usize> {
        self.writer
            .exec(move |conn| {
                let affected = diesel::update(
                    sync_queue::table
                        .filter(sync_queue::status.eq(enum_to_db(&QueueStatus::Failed)?)),
                )
                .set((
                    sync_queue::status.eq(enum_to_db(&QueueStatus::Pending)?),
                    sync_queue::retry_count.eq(0),
                    sync_queue::started_at.eq::<Option<chrono::NaiveDateTime>>(None),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
                if affected > 0 {
                    info!("[Outbox] Re-queued {} failed operations", affected);
                }
                Ok(affected)
            })
            .await
    }

    async fn reclaim_stale_in_progress(&self, lease: Duration) -> Result<usize> {
        self.writer
            .exec(move |conn| {
                let cutoff = Utc::now().naive_utc() - lease;
                let affected = diesel::update(
                    sync_queue::table
                        .filter(sync_queue::status.eq(enum_to_db(&QueueStatus::InProgress)?))
                        .filter(
                            sync_queue::started_at
                                .is_null()
                                .or(sync_queue::started_at.lt(cutoff)),
                        ),
                )
                .set((
                    sync_queue::status.eq(enum_to_db(&QueueStatus::Pending)?),
                    sync_queue::started_at.eq::<Option<chrono::NaiveDateTime>>(None),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
                if affected > 0 {
                    warn!(
                        "[Outbox] Lease expired for {} in-progress operations",
                        affected
                    );
                }
                Ok(affected)
            })
            .await
    }
}
