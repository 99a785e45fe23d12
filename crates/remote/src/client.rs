//! HTTP client for the remote address backend.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use waypost_core::addresses::Address;
use waypost_core::sync::{PushReceipt, QueueOperation, RemoteSyncBackend};

use crate::error::{RemoteError, Result};
use crate::types::{
    ApiErrorResponse, PullAddressesResponse, PushOperationRequest, PushOperationResponse,
};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

pub const ENV_REMOTE_URL: &str = "WAYPOST_REMOTE_URL";
pub const ENV_REMOTE_TOKEN: &str = "WAYPOST_REMOTE_TOKEN";

/// Client for the remote sync API.
#[derive(Debug, Clone)]
pub struct RemoteSyncClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl RemoteSyncClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(RemoteError::invalid_request("Remote base URL is empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            token: token.into(),
        })
    }

    /// Builds a client from `WAYPOST_REMOTE_URL` and `WAYPOST_REMOTE_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var(ENV_REMOTE_URL)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| RemoteError::invalid_request(format!("{} is not set", ENV_REMOTE_URL)))?;
        let token = std::env::var(ENV_REMOTE_TOKEN)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| RemoteError::auth(format!("{} is not set", ENV_REMOTE_TOKEN)))?;
        Self::new(&base_url, token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|_| RemoteError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);
        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[Remote] Response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[Remote] Response error ({}): {}", status, preview);
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(serde_json::from_str("{}")?);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// POST {base}/sync/operations
    pub async fn push_operation(
        &self,
        request: &PushOperationRequest,
    ) -> Result<PushOperationResponse> {
        let url = format!("{}/sync/operations", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// GET {base}/sync/addresses?since={rfc3339}
    pub async fn pull_addresses(
        &self,
        since: Option<NaiveDateTime>,
    ) -> Result<PullAddressesResponse> {
        let url = format!("{}/sync/addresses", self.base_url);
        let mut request = self.client.get(&url).headers(self.headers()?);
        if let Some(since) = since {
            request = request.query(&[("since", Utc.from_utc_datetime(&since).to_rfc3339())]);
        }
        let response = request.send().await?;
        Self::parse_response(response).await
    }
}

fn error_from_body(status: u16, body: &str) -> RemoteError {
    if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(body) {
        return RemoteError::api(status, format!("{}: {}", error.code, error.message));
    }
    RemoteError::api(status, format!("Request failed: {}", body))
}

#[async_trait]
impl RemoteSyncBackend for RemoteSyncClient {
    async fn push(&self, operation: &QueueOperation) -> waypost_core::Result<PushReceipt> {
        let response = self
            .push_operation(&PushOperationRequest::from(operation))
            .await?;
        Ok(PushReceipt {
            remote_id: response.remote_id,
        })
    }

    async fn pull(&self, since: Option<NaiveDateTime>) -> waypost_core::Result<Vec<Address>> {
        Ok(self.pull_addresses(since).await?.addresses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waypost_core::sync::{QueueOperationType, SyncEntity};

    #[test]
    fn base_url_is_normalized_and_required() {
        let client = RemoteSyncClient::new("https://sync.example.test/api/", "t").expect("client");
        assert_eq!(client.base_url(), "https://sync.example.test/api");
        assert!(RemoteSyncClient::new("  ", "t").is_err());
    }

    #[test]
    fn structured_error_bodies_keep_code_and_message() {
        let err = error_from_body(422, r#"{"code":"invalid_payload","message":"city missing"}"#);
        assert_eq!(err.status_code(), Some(422));
        assert_eq!(
            err.to_string(),
            "API error (422): invalid_payload: city missing"
        );

        let plain = error_from_body(502, "bad gateway");
        assert_eq!(plain.to_string(), "API error (502): Request failed: bad gateway");
    }

    #[test]
    fn push_request_uses_camel_case_wire_names() {
        let request = PushOperationRequest {
            operation_id: 7,
            operation_type: QueueOperationType::Deactivate,
            entity_type: SyncEntity::Address,
            entity_id: "a-1".to_string(),
            payload: json!({ "id": "a-1" }),
            timestamp: chrono::NaiveDate::from_ymd_opt(2026, 3, 2)
                .and_then(|d| d.and_hms_opt(9, 0, 0))
                .expect("timestamp"),
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["operationId"], json!(7));
        assert_eq!(value["operationType"], json!("DEACTIVATE"));
        assert_eq!(value["entityType"], json!("address"));
        assert_eq!(value["entityId"], json!("a-1"));
    }

    #[test]
    fn empty_pull_body_means_no_changes() {
        let parsed: PullAddressesResponse = serde_json::from_str("{}").expect("parse");
        assert!(parsed.addresses.is_empty());
    }
}
