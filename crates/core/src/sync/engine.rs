//! Sync cycle engine: lease sweep, ordered push, guarded pull, background loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use super::config::{SyncEngineConfig, SYNC_FAST_FOLLOW_MILLIS};
use super::metadata_keys;
use super::queue_model::{QueueOperation, QueueStats};
use super::sync_traits::{MetadataRepositoryTrait, RemoteSyncBackend, SyncQueueRepositoryTrait};
use crate::addresses::AddressRepositoryTrait;
use crate::errors::Result;

/// Counters and status of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCycleResult {
    pub status: String,
    pub reclaimed_count: usize,
    pub pushed_count: usize,
    pub failed_count: usize,
    pub deferred_count: usize,
    pub pulled_count: usize,
    pub skipped_count: usize,
    pub duration_ms: i64,
}

/// Snapshot for diagnostics views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEngineStatus {
    pub last_push_at: Option<String>,
    pub last_pull_at: Option<String>,
    pub last_cycle_at: Option<String>,
    pub last_cycle_status: Option<String>,
    pub last_error: Option<String>,
    pub queue: QueueStats,
}

pub struct SyncEngine {
    addresses: Arc<dyn AddressRepositoryTrait>,
    queue: Arc<dyn SyncQueueRepositoryTrait>,
    metadata: Arc<dyn MetadataRepositoryTrait>,
    remote: Arc<dyn RemoteSyncBackend>,
    config: SyncEngineConfig,
    cycle_mutex: Mutex<()>,
    wake: Notify,
    background_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        addresses: Arc<dyn AddressRepositoryTrait>,
        queue: Arc<dyn SyncQueueRepositoryTrait>,
        metadata: Arc<dyn MetadataRepositoryTrait>,
        remote: Arc<dyn RemoteSyncBackend>,
        config: SyncEngineConfig,
    ) -> Self {
        Self {
            addresses,
            queue,
            metadata,
            remote,
            config,
            cycle_mutex: Mutex::new(()),
            wake: Notify::new(),
            background_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyncEngineConfig {
        &self.config
    }

    /// Runs one cycle. Remote failures end up in the result status and in the
    /// outbox; only local store failures are returned as errors.
    pub async fn run_cycle(&self) -> Result<SyncCycleResult> {
        let _cycle_guard = self.cycle_mutex.lock().await;
        let started_at = Instant::now();
        let mut result = SyncCycleResult::default();

        let outcome = self.run_cycle_steps(&mut result).await;
        result.duration_ms = started_at.elapsed().as_millis() as i64;

        match outcome {
            Ok(status) => {
                result.status = status.to_string();
                self.record_cycle_outcome(status).await;
                debug!(
                    "[Sync] Cycle complete status={} reclaimed={} pushed={} failed={} deferred={} pulled={} skipped={} duration_ms={}",
                    result.status,
                    result.reclaimed_count,
                    result.pushed_count,
                    result.failed_count,
                    result.deferred_count,
                    result.pulled_count,
                    result.skipped_count,
                    result.duration_ms
                );
                Ok(result)
            }
            Err(err) => {
                self.record_engine_error(&err.to_string()).await;
                self.record_cycle_outcome("store_error").await;
                Err(err)
            }
        }
    }

    async fn run_cycle_steps(&self, result: &mut SyncCycleResult) -> Result<&'static str> {
        result.reclaimed_count = self
            .queue
            .reclaim_stale_in_progress(self.config.lease())
            .await?;
        if result.reclaimed_count > 0 {
            warn!(
                "[Sync] Reclaimed {} abandoned in-progress operations",
                result.reclaimed_count
            );
        }

        self.push_pending(result).await?;
        let pull_succeeded = self.pull_remote(result).await?;

        Ok(if !pull_succeeded {
            "pull_error"
        } else if result.failed_count > 0 {
            "push_error"
        } else {
            "ok"
        })
    }

    /// Delivers pending operations in enqueue order. Once an operation for an
    /// entity fails, later operations for that entity wait for the next cycle.
    async fn push_pending(&self, result: &mut SyncCycleResult) -> Result<()> {
        let pending = self.queue.list_pending()?;
        if pending.is_empty() {
            return Ok(());
        }

        let mut blocked: HashSet<String> = self
            .queue
            .list_failed()?
            .into_iter()
            .map(|op| op.entity_id)
            .collect();

        for operation in pending {
            if blocked.contains(&operation.entity_id) {
                debug!(
                    "[Sync] Deferring operation {} ({:?}) for entity {}: earlier operation unsettled",
                    operation.id, operation.operation_type, operation.entity_id
                );
                result.deferred_count += 1;
                continue;
            }

            if !self.queue.mark_in_progress(operation.id).await? {
                debug!(
                    "[Sync] Operation {} was claimed elsewhere; skipping",
                    operation.id
                );
                blocked.insert(operation.entity_id.clone());
                result.deferred_count += 1;
                continue;
            }

            match self.remote.push(&operation).await {
                Ok(receipt) => {
                    self.queue.mark_completed(operation.id).await?;
                    result.pushed_count += 1;
                    debug!(
                        "[Sync] Delivered operation {} ({:?}) for entity {} remote_id={:?}",
                        operation.id, operation.operation_type, operation.entity_id, receipt.remote_id
                    );
                    self.settle_entity(&operation).await?;
                }
                Err(err) => {
                    blocked.insert(operation.entity_id.clone());
                    result.failed_count += 1;
                    let message = err.to_string();
                    let fast_fail = self.config.fast_fail_permanent_errors
                        && err.is_permanent_sync_failure() == Some(true);
                    let updated = if fast_fail {
                        self.queue
                            .mark_failed_permanently(operation.id, &message)
                            .await?
                    } else {
                        self.queue.mark_failed(operation.id, &message).await?
                    };
                    warn!(
                        "[Sync] Operation {} ({:?}) for entity {} failed (attempt {}/{}, status {:?}): {}",
                        operation.id,
                        operation.operation_type,
                        operation.entity_id,
                        updated.retry_count,
                        updated.max_retries,
                        updated.status,
                        message
                    );
                    self.flag_entity_error(&operation, &message).await?;
                }
            }
        }

        if result.pushed_count > 0 {
            self.metadata
                .set(metadata_keys::LAST_PUSH_AT, &Utc::now().to_rfc3339())
                .await?;
        }
        Ok(())
    }

    /// Marks the record synced once no other operation for it is left. The
    /// repository makes that check inside the stamping transaction.
    async fn settle_entity(&self, operation: &QueueOperation) -> Result<()> {
        match self.addresses.mark_synced(&operation.entity_id).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!(
                    "[Sync] Entity {} still has queued work; left unsynced",
                    operation.entity_id
                );
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn flag_entity_error(&self, operation: &QueueOperation, message: &str) -> Result<()> {
        match self
            .addresses
            .mark_sync_error(&operation.entity_id, message)
            .await
        {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Applies remote changes. Returns `false` when the remote call failed.
    async fn pull_remote(&self, result: &mut SyncCycleResult) -> Result<bool> {
        let since = self
            .metadata
            .get(metadata_keys::LAST_PULL_AT)?
            .as_deref()
            .and_then(parse_rfc3339_utc);
        let pull_started_at = Utc::now();

        let remote_addresses = match self.remote.pull(since).await {
            Ok(addresses) => addresses,
            Err(err) => {
                warn!("[Sync] Pull failed: {}", err);
                self.record_engine_error(&format!("Pull failed: {}", err))
                    .await;
                return Ok(false);
            }
        };

        for address in remote_addresses {
            let address_id = address.id.clone();
            if self.addresses.apply_remote_snapshot(address).await? {
                result.pulled_count += 1;
            } else {
                debug!(
                    "[Sync] Skipping remote snapshot for {}: local changes not yet delivered",
                    address_id
                );
                result.skipped_count += 1;
            }
        }

        self.metadata
            .set(metadata_keys::LAST_PULL_AT, &pull_started_at.to_rfc3339())
            .await?;
        Ok(true)
    }

    async fn record_cycle_outcome(&self, status: &str) {
        let now = Utc::now().to_rfc3339();
        if let Err(err) = self
            .metadata
            .set(metadata_keys::LAST_CYCLE_STATUS, status)
            .await
        {
            warn!("[Sync] Failed to record cycle status: {}", err);
        }
        if let Err(err) = self.metadata.set(metadata_keys::LAST_CYCLE_AT, &now).await {
            warn!("[Sync] Failed to record cycle time: {}", err);
        }
        if status == "ok" {
            if let Err(err) = self.metadata.remove(metadata_keys::LAST_ERROR).await {
                warn!("[Sync] Failed to clear last engine error: {}", err);
            }
        }
    }

    async fn record_engine_error(&self, message: &str) {
        if let Err(err) = self.metadata.set(metadata_keys::LAST_ERROR, message).await {
            warn!("[Sync] Failed to record engine error: {}", err);
        }
    }

    pub fn status(&self) -> Result<SyncEngineStatus> {
        Ok(SyncEngineStatus {
            last_push_at: self.metadata.get(metadata_keys::LAST_PUSH_AT)?,
            last_pull_at: self.metadata.get(metadata_keys::LAST_PULL_AT)?,
            last_cycle_at: self.metadata.get(metadata_keys::LAST_CYCLE_AT)?,
            last_cycle_status: self.metadata.get(metadata_keys::LAST_CYCLE_STATUS)?,
            last_error: self.metadata.get(metadata_keys::LAST_ERROR)?,
            queue: self.queue.stats()?,
        })
    }

    /// Wakes the background loop immediately, e.g. when connectivity returns.
    pub fn notify_reconnect(&self) {
        self.wake.notify_one();
    }

    /// Spawns the background loop. Returns `false` if it is already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut guard = self.background_task.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return false;
            }
            guard.take();
        }

        let engine = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            engine.run_background_loop().await;
        }));
        info!("[Sync] Background engine started");
        true
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.background_task.lock().await.take() {
            handle.abort();
            info!("[Sync] Background engine stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.background_task
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    async fn run_background_loop(self: Arc<Self>) {
        loop {
            if let Err(err) = self.run_cycle().await {
                warn!("[Sync] Background cycle failed: {}", err);
            }

            let delay = self.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {
                    debug!("[Sync] Woken early for reconnect");
                }
            }
        }
    }

    fn next_delay(&self) -> StdDuration {
        let jitter_bound = self.config.jitter_secs.saturating_mul(1000);
        let jitter_ms = if jitter_bound > 0 {
            rand::thread_rng().gen_range(0..=jitter_bound)
        } else {
            0
        };
        let mut delay_ms = self
            .config
            .interval_secs
            .saturating_mul(1000)
            .saturating_add(jitter_ms);

        if self.has_fresh_local_work() {
            delay_ms = delay_ms.min(SYNC_FAST_FOLLOW_MILLIS + jitter_ms % 500);
        }
        StdDuration::from_millis(delay_ms)
    }

    // Untried operations for entities that are not blocked by a failure.
    fn has_fresh_local_work(&self) -> bool {
        let (Ok(pending), Ok(failed)) = (self.queue.list_pending(), self.queue.list_failed()) else {
            return false;
        };
        let blocked: HashSet<&str> = failed.iter().map(|op| op.entity_id.as_str()).collect();
        pending
            .iter()
            .any(|op| op.retry_count == 0 && !blocked.contains(op.entity_id.as_str()))
    }
}

fn parse_rfc3339_utc(value: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).naive_utc())
}

#[cfg(test)]
mod tests {
    use super::parse_rfc3339_utc;

    #[test]
    fn pull_cursor_is_normalized_to_utc() {
        let parsed = parse_rfc3339_utc("2026-03-02T10:00:00+01:00").expect("parse");
        assert_eq!(parsed.to_string(), "2026-03-02 09:00:00");
        assert!(parse_rfc3339_utc("yesterday").is_none());
    }
}
