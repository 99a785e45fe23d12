//! Classification of remote failures for the outbox retry policy.

use serde::{Deserialize, Serialize};

use crate::errors::SyncError;

/// Retry policy classification for remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

impl SyncRetryClass {
    /// Maps the class onto the error the outbox understands. Re-auth failures
    /// are retried: the operation itself is fine, the credentials are not.
    pub fn into_sync_error(self, message: impl Into<String>) -> SyncError {
        match self {
            SyncRetryClass::Permanent => SyncError::Permanent(message.into()),
            SyncRetryClass::Retryable | SyncRetryClass::ReauthRequired => {
                SyncError::Transient(message.into())
            }
        }
    }
}

/// Classify HTTP status into retry behavior.
pub fn classify_http_status(status: u16) -> SyncRetryClass {
    match status {
        401 | 403 => SyncRetryClass::ReauthRequired,
        408 | 409 | 423 | 425 | 429 => SyncRetryClass::Retryable,
        500..=599 => SyncRetryClass::Retryable,
        _ => SyncRetryClass::Permanent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_http_status_for_retry_policy() {
        assert_eq!(classify_http_status(500), SyncRetryClass::Retryable);
        assert_eq!(classify_http_status(429), SyncRetryClass::Retryable);
        assert_eq!(classify_http_status(401), SyncRetryClass::ReauthRequired);
        assert_eq!(classify_http_status(400), SyncRetryClass::Permanent);
        assert_eq!(classify_http_status(422), SyncRetryClass::Permanent);
    }

    #[test]
    fn reauth_consumes_a_retry_instead_of_failing_fast() {
        assert_eq!(
            SyncRetryClass::ReauthRequired.into_sync_error("expired"),
            SyncError::Transient("expired".to_string())
        );
        assert_eq!(
            SyncRetryClass::Permanent.into_sync_error("bad zip"),
            SyncError::Permanent("bad zip".to_string())
        );
    }
}
