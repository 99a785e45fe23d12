//! HTTP/JSON implementation of the remote sync backend.

mod client;
mod error;
mod types;

pub use client::{RemoteSyncClient, ENV_REMOTE_TOKEN, ENV_REMOTE_URL};
pub use error::{RemoteError, Result};
pub use types::{ApiErrorResponse, PullAddressesResponse, PushOperationRequest, PushOperationResponse};
