use std::fmt;

use chrono::{DateTime, Utc};

use crate::{address::HostAddress, error::ModelError, job::JobKind};

/// Lifecycle of a host through one rollout attempt.
///
/// ```text
/// pending -> pre_check_passed | pre_check_failed
/// pre_check_passed -> phase1_completed | phase1_failed
/// phase1_completed -> patching_completed | phase2_failed
/// ```
///
/// A precheck may be re-run from any state, which restarts the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum HostStatus {
    #[default]
    Pending,
    PreCheckPassed,
    PreCheckFailed,
    Phase1Completed,
    Phase1Failed,
    PatchingCompleted,
    Phase2Failed,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Pending => "pending",
            HostStatus::PreCheckPassed => "pre_check_passed",
            HostStatus::PreCheckFailed => "pre_check_failed",
            HostStatus::Phase1Completed => "phase1_completed",
            HostStatus::Phase1Failed => "phase1_failed",
            HostStatus::PatchingCompleted => "patching_completed",
            HostStatus::Phase2Failed => "phase2_failed",
        }
    }

    /// Whether a job of `kind` may be admitted while the host is in this state.
    pub fn admits(&self, kind: JobKind) -> bool {
        match kind {
            JobKind::Precheck => true,
            JobKind::Stage => *self == HostStatus::PreCheckPassed,
            JobKind::RebootVerify => *self == HostStatus::Phase1Completed,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            HostStatus::PreCheckFailed
                | HostStatus::Phase1Failed
                | HostStatus::Phase2Failed
        )
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecheckOutcome {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootOutcome {
    Completed,
    Failed,
}

/// The only way a host status changes. Each phase owns its own outcome type
/// so a stage can never write a phase-2 state and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Precheck(PrecheckOutcome),
    Stage(StageOutcome),
    Reboot(RebootOutcome),
}

impl PhaseOutcome {
    pub fn kind(&self) -> JobKind {
        match self {
            PhaseOutcome::Precheck(_) => JobKind::Precheck,
            PhaseOutcome::Stage(_) => JobKind::Stage,
            PhaseOutcome::Reboot(_) => JobKind::RebootVerify,
        }
    }

    pub fn status(&self) -> HostStatus {
        match self {
            PhaseOutcome::Precheck(PrecheckOutcome::Passed) => {
                HostStatus::PreCheckPassed
            }
            PhaseOutcome::Precheck(PrecheckOutcome::Failed) => {
                HostStatus::PreCheckFailed
            }
            PhaseOutcome::Stage(StageOutcome::Completed) => {
                HostStatus::Phase1Completed
            }
            PhaseOutcome::Stage(StageOutcome::Failed) => {
                HostStatus::Phase1Failed
            }
            PhaseOutcome::Reboot(RebootOutcome::Completed) => {
                HostStatus::PatchingCompleted
            }
            PhaseOutcome::Reboot(RebootOutcome::Failed) => {
                HostStatus::Phase2Failed
            }
        }
    }

    pub fn succeeded(kind: JobKind) -> Self {
        match kind {
            JobKind::Precheck => PhaseOutcome::Precheck(PrecheckOutcome::Passed),
            JobKind::Stage => PhaseOutcome::Stage(StageOutcome::Completed),
            JobKind::RebootVerify => {
                PhaseOutcome::Reboot(RebootOutcome::Completed)
            }
        }
    }

    /// The failing outcome for a phase, used when a unit of work aborts.
    pub fn failed(kind: JobKind) -> Self {
        match kind {
            JobKind::Precheck => PhaseOutcome::Precheck(PrecheckOutcome::Failed),
            JobKind::Stage => PhaseOutcome::Stage(StageOutcome::Failed),
            JobKind::RebootVerify => {
                PhaseOutcome::Reboot(RebootOutcome::Failed)
            }
        }
    }
}

impl From<PrecheckOutcome> for PhaseOutcome {
    fn from(value: PrecheckOutcome) -> Self {
        PhaseOutcome::Precheck(value)
    }
}

impl From<StageOutcome> for PhaseOutcome {
    fn from(value: StageOutcome) -> Self {
        PhaseOutcome::Stage(value)
    }
}

impl From<RebootOutcome> for PhaseOutcome {
    fn from(value: RebootOutcome) -> Self {
        PhaseOutcome::Reboot(value)
    }
}

/// Free capacity observed on one named storage volume.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DatastoreCapacity {
    pub name: String,
    pub free_gb: f64,
}

/// One managed hypervisor node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Host {
    pub address: HostAddress,
    pub hostname: Option<String>,
    pub current_build: Option<String>,
    pub target_build: Option<String>,
    status: HostStatus,
    pub datastore_name: Option<String>,
    pub datastore_free_gb: Option<f64>,
    pub ssh_reachable: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Host {
    pub fn new(address: HostAddress) -> Self {
        let now = Utc::now();
        Self {
            address,
            hostname: None,
            current_build: None,
            target_build: None,
            status: HostStatus::Pending,
            datastore_name: None,
            datastore_free_gb: None,
            ssh_reachable: false,
            last_checked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> HostStatus {
        self.status
    }

    /// Moves the host to the state named by `outcome`.
    ///
    /// Prechecks apply from any state. Stage outcomes require
    /// `pre_check_passed` and reboot outcomes require `phase1_completed`.
    pub fn apply(
        &mut self,
        outcome: impl Into<PhaseOutcome>,
    ) -> Result<(), ModelError> {
        let outcome = outcome.into();
        let next = outcome.status();
        if !self.status.admits(outcome.kind()) {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn record_datastore(&mut self, capacity: &DatastoreCapacity) {
        self.datastore_name = Some(capacity.name.clone());
        self.datastore_free_gb = Some(capacity.free_gb);
    }

    pub fn mark_checked(&mut self, at: DateTime<Utc>) {
        self.last_checked_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Host {
        Host::new(HostAddress::parse("192.168.10.5").unwrap())
    }

    #[test]
    fn new_host_is_pending() {
        assert_eq!(host().status(), HostStatus::Pending);
    }

    #[test]
    fn full_happy_path_walks_every_phase() {
        let mut host = host();
        host.apply(PrecheckOutcome::Passed).unwrap();
        host.apply(StageOutcome::Completed).unwrap();
        host.apply(RebootOutcome::Completed).unwrap();
        assert_eq!(host.status(), HostStatus::PatchingCompleted);
    }

    #[test]
    fn stage_outcome_requires_passed_precheck() {
        let mut host = host();
        let err = host.apply(StageOutcome::Completed).unwrap_err();
        assert_eq!(
            err,
            ModelError::InvalidTransition {
                from: HostStatus::Pending,
                to: HostStatus::Phase1Completed,
            }
        );
        assert_eq!(host.status(), HostStatus::Pending);
    }

    #[test]
    fn reboot_outcome_cannot_skip_staging() {
        let mut host = host();
        host.apply(PrecheckOutcome::Passed).unwrap();
        assert!(host.apply(RebootOutcome::Failed).is_err());
        assert_eq!(host.status(), HostStatus::PreCheckPassed);
    }

    #[test]
    fn precheck_restarts_from_a_failed_phase() {
        let mut host = host();
        host.apply(PrecheckOutcome::Passed).unwrap();
        host.apply(StageOutcome::Failed).unwrap();
        assert!(host.status().is_failed());
        host.apply(PrecheckOutcome::Passed).unwrap();
        assert_eq!(host.status(), HostStatus::PreCheckPassed);
    }
}
