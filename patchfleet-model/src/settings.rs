use chrono::{DateTime, Utc};

/// Runtime-tunable keys read by the orchestrator on every reboot-verify run.
pub mod keys {
    /// Seconds to wait after the reboot playbook before the first poll.
    pub const REBOOT_GRACE_PERIOD_SECS: &str = "reboot.grace_period_secs";
    /// Number of reachability/build polls before giving up.
    pub const REBOOT_MAX_ATTEMPTS: &str = "reboot.max_attempts";
    /// Seconds between two polls.
    pub const REBOOT_POLL_INTERVAL_SECS: &str = "reboot.poll_interval_secs";
}

/// One stored key/value pair.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

impl Setting {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            updated_at: Utc::now(),
        }
    }
}
