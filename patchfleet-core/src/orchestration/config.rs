use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global knobs that tune orchestrator behaviour.
///
/// All fields carry defaults; the config crate maps file and environment
/// values onto this structure and runtime settings may override the reboot
/// policy per run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Post-reboot grace period and polling budget.
    pub reboot: RebootPolicy,
    /// Capacity threshold applied during prechecks.
    pub precheck: PrecheckPolicy,
    /// Parameters forwarded to the staging playbook.
    pub stage: StagePolicy,
    /// Cadence of the stale phase-1 sweep.
    pub sweep: SweepConfig,
    /// Capacity of the in-process job event channel.
    pub event_channel_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            reboot: RebootPolicy::default(),
            precheck: PrecheckPolicy::default(),
            stage: StagePolicy::default(),
            sweep: SweepConfig::default(),
            event_channel_capacity: 256,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RebootPolicy {
    /// Wait after the reboot playbook before the first poll (seconds)
    pub grace_period_secs: u64,
    /// Number of poll rounds before giving up
    pub max_attempts: u32,
    /// Fixed delay between two poll rounds (seconds)
    pub poll_interval_secs: u64,
}

impl RebootPolicy {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for RebootPolicy {
    fn default() -> Self {
        Self {
            grace_period_secs: 120,
            max_attempts: 20,
            poll_interval_secs: 30,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PrecheckPolicy {
    /// A volume qualifies when its free space is strictly above this value.
    pub min_free_gb: f64,
}

impl Default for PrecheckPolicy {
    fn default() -> Self {
        Self { min_free_gb: 2.0 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StagePolicy {
    /// Datastore used when a host has none recorded.
    pub default_datastore: String,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            default_datastore: "datastore1".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepConfig {
    pub enabled: bool,
    /// Delay between two sweeps (seconds)
    pub interval_secs: u64,
    /// Hosts untouched in `phase1_completed` for longer than this are re-driven
    pub stale_after_secs: u64,
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 12 * 60 * 60,
            stale_after_secs: 10 * 60,
        }
    }
}
