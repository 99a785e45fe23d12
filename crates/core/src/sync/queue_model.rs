//! Outbox (sync queue) domain models and the retry state machine.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Attempts granted to an operation before it becomes terminally failed.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Entity names carried by outbox operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntity {
    Address,
}

/// Mutation kinds delivered to the remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueOperationType {
    Create,
    Update,
    Delete,
    Activate,
    Deactivate,
}

/// Outbox lifecycle status.
///
/// `Completed` is never persisted: completed rows are deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One intended remote mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueOperation {
    pub id: i64,
    pub operation_type: QueueOperationType,
    pub entity_type: SyncEntity,
    pub entity_id: String,
    pub payload: serde_json::Value,
    pub status: QueueStatus,
    pub timestamp: NaiveDateTime,
    pub retry_count: i32,
    pub max_retries: i32,
    pub started_at: Option<NaiveDateTime>,
    pub last_error: Option<String>,
    pub last_error_at: Option<NaiveDateTime>,
}

impl QueueOperation {
    pub fn is_outstanding(&self) -> bool {
        matches!(self.status, QueueStatus::Pending | QueueStatus::InProgress)
    }

    pub fn retries_left(&self) -> i32 {
        (self.max_retries - self.retry_count).max(0)
    }
}

/// Request to append an operation to the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueOperation {
    pub operation_type: QueueOperationType,
    pub entity_type: SyncEntity,
    pub entity_id: String,
    pub payload: serde_json::Value,
    pub max_retries: i32,
}

impl NewQueueOperation {
    pub fn new(
        operation_type: QueueOperationType,
        entity_type: SyncEntity,
        entity_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            operation_type,
            entity_type,
            entity_id: entity_id.into(),
            payload,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }
}

/// Result of recording one failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureTransition {
    pub retry_count: i32,
    pub status: QueueStatus,
}

/// Decides retry-vs-terminal for a failed attempt.
///
/// The count is incremented and capped at `max_retries`; the operation goes
/// back to `Pending` while budget remains, otherwise it is `Failed`.
pub fn failure_transition(retry_count: i32, max_retries: i32) -> FailureTransition {
    let next = (retry_count + 1).min(max_retries);
    let status = if next < max_retries {
        QueueStatus::Pending
    } else {
        QueueStatus::Failed
    };
    FailureTransition {
        retry_count: next,
        status,
    }
}

/// Queue counters grouped by status and by operation type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub by_operation_type: BTreeMap<QueueOperationType, i64>,
}

impl QueueStats {
    pub fn add_status(&mut self, status: QueueStatus, count: i64) {
        self.total += count;
        match status {
            QueueStatus::Pending => self.pending += count,
            QueueStatus::InProgress => self.in_progress += count,
            QueueStatus::Completed => self.completed += count,
            QueueStatus::Failed => self.failed += count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_stay_pending_until_budget_is_spent() {
        let first = failure_transition(0, DEFAULT_MAX_RETRIES);
        assert_eq!(first.retry_count, 1);
        assert_eq!(first.status, QueueStatus::Pending);

        let second = failure_transition(first.retry_count, DEFAULT_MAX_RETRIES);
        assert_eq!(second.retry_count, 2);
        assert_eq!(second.status, QueueStatus::Pending);

        let third = failure_transition(second.retry_count, DEFAULT_MAX_RETRIES);
        assert_eq!(third.retry_count, 3);
        assert_eq!(third.status, QueueStatus::Failed);
    }

    #[test]
    fn retry_count_never_exceeds_budget() {
        let capped = failure_transition(3, 3);
        assert_eq!(capped.retry_count, 3);
        assert_eq!(capped.status, QueueStatus::Failed);
    }

    #[test]
    fn wire_names_match_outbox_contract() {
        let ops = [
            QueueOperationType::Create,
            QueueOperationType::Update,
            QueueOperationType::Delete,
            QueueOperationType::Activate,
            QueueOperationType::Deactivate,
        ]
        .iter()
        .map(|op| serde_json::to_string(op).expect("serialize op"))
        .collect::<Vec<_>>();
        assert_eq!(
            ops,
            vec![
                "\"CREATE\"",
                "\"UPDATE\"",
                "\"DELETE\"",
                "\"ACTIVATE\"",
                "\"DEACTIVATE\""
            ]
        );
        assert_eq!(
            serde_json::to_string(&QueueStatus::InProgress).expect("serialize status"),
            "\"in_progress\""
        );
    }

    #[test]
    fn with_max_retries_keeps_at_least_one_attempt() {
        let request = NewQueueOperation::new(
            QueueOperationType::Create,
            SyncEntity::Address,
            "a-1",
            serde_json::json!({}),
        )
        .with_max_retries(0);
        assert_eq!(request.max_retries, 1);
    }
}
