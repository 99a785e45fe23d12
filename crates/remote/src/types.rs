//! Wire types of the remote sync API.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use waypost_core::addresses::Address;
use waypost_core::sync::{QueueOperation, QueueOperationType, SyncEntity};

/// Body of `POST /sync/operations`. `operationId` lets the backend
/// de-duplicate redeliveries of the same outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOperationRequest {
    pub operation_id: i64,
    pub operation_type: QueueOperationType,
    pub entity_type: SyncEntity,
    pub entity_id: String,
    pub payload: serde_json::Value,
    pub timestamp: NaiveDateTime,
}

impl From<&QueueOperation> for PushOperationRequest {
    fn from(operation: &QueueOperation) -> Self {
        Self {
            operation_id: operation.id,
            operation_type: operation.operation_type,
            entity_type: operation.entity_type,
            entity_id: operation.entity_id.clone(),
            payload: operation.payload.clone(),
            timestamp: operation.timestamp,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOperationResponse {
    #[serde(default)]
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullAddressesResponse {
    #[serde(default)]
    pub addresses: Vec<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub code: String,
    pub message: String,
}
