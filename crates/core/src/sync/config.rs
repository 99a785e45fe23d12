//! Scheduler constants and engine configuration.

use log::warn;
use serde::{Deserialize, Serialize};

/// Background cycle cadence in seconds.
pub const SYNC_INTERVAL_SECS: u64 = 45;

/// Maximum jitter (seconds) added to periodic cycle intervals.
pub const SYNC_INTERVAL_JITTER_SECS: u64 = 5;

/// Age after which an `in_progress` operation is treated as abandoned.
pub const SYNC_IN_PROGRESS_LEASE_SECS: i64 = 300;

/// Delay used while freshly queued local work is waiting.
pub const SYNC_FAST_FOLLOW_MILLIS: u64 = 2_000;

const ENV_INTERVAL_SECS: &str = "WAYPOST_SYNC_INTERVAL_SECS";
const ENV_JITTER_SECS: &str = "WAYPOST_SYNC_JITTER_SECS";
const ENV_LEASE_SECS: &str = "WAYPOST_SYNC_LEASE_SECS";
const ENV_FAST_FAIL: &str = "WAYPOST_SYNC_FAST_FAIL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEngineConfig {
    pub interval_secs: u64,
    pub jitter_secs: u64,
    pub in_progress_lease_secs: i64,
    /// Permanent remote rejections skip the remaining retry budget.
    pub fast_fail_permanent_errors: bool,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            interval_secs: SYNC_INTERVAL_SECS,
            jitter_secs: SYNC_INTERVAL_JITTER_SECS,
            in_progress_lease_secs: SYNC_IN_PROGRESS_LEASE_SECS,
            fast_fail_permanent_errors: true,
        }
    }
}

impl SyncEngineConfig {
    /// Defaults overridden by `WAYPOST_SYNC_*` environment variables.
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(value) = parse_var(&lookup, ENV_INTERVAL_SECS) {
            config.interval_secs = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_JITTER_SECS) {
            config.jitter_secs = value;
        }
        if let Some(value) = parse_var::<i64>(&lookup, ENV_LEASE_SECS) {
            config.in_progress_lease_secs = value.max(1);
        }
        if let Some(value) = parse_var(&lookup, ENV_FAST_FAIL) {
            config.fast_fail_permanent_errors = value;
        }
        config
    }

    pub fn lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.in_progress_lease_secs)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("[Sync] Ignoring invalid value '{}' for {}", trimmed, key);
            None
        }
    }
}
