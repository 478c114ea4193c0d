use std::fmt;

use patchfleet_model::{HostAddress, HostStatus, JobId};
use serde::Serialize;

use super::dispatcher::WorkKind;

/// Why an input produced no job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    InvalidAddress,
    DuplicateInput,
    AlreadyRegistered,
    UnknownHost,
    AlreadyRunning { work: WorkKind },
    PreconditionNotMet { status: HostStatus },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InvalidAddress => f.write_str("not an IPv4 address"),
            SkipReason::DuplicateInput => f.write_str("listed more than once"),
            SkipReason::AlreadyRegistered => f.write_str("already registered"),
            SkipReason::UnknownHost => f.write_str("not registered"),
            SkipReason::AlreadyRunning { work } => {
                write!(f, "{work} already in progress")
            }
            SkipReason::PreconditionNotMet { status } => {
                write!(f, "host is {status}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StartedJob {
    pub job_id: JobId,
    pub host: HostAddress,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedHost {
    pub input: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Result of one admission call. Only `started` carries work; skips are
/// informational and never an error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionReport {
    pub started: Vec<StartedJob>,
    pub skipped: Vec<SkippedHost>,
}

impl AdmissionReport {
    pub fn jobs_started(&self) -> usize {
        self.started.len()
    }

    pub(crate) fn skip(&mut self, input: impl Into<String>, reason: SkipReason) {
        self.skipped.push(SkippedHost {
            input: input.into(),
            reason,
        });
    }
}

/// Result of adding hosts to the inventory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationReport {
    pub added: Vec<HostAddress>,
    pub skipped: Vec<SkippedHost>,
}

impl RegistrationReport {
    pub(crate) fn skip(&mut self, input: impl Into<String>, reason: SkipReason) {
        self.skipped.push(SkippedHost {
            input: input.into(),
            reason,
        });
    }
}
