use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{address::HostAddress, error::ModelError};

/// Unique identifier for orchestration jobs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three rollout phases a job can represent.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum JobKind {
    Precheck,
    Stage,
    RebootVerify,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Precheck => "precheck",
            JobKind::Stage => "stage",
            JobKind::RebootVerify => "reboot_verify",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum JobStatus {
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One orchestration attempt: one phase, one host, one invocation.
///
/// A job starts `running` and receives exactly one terminal write; after
/// `completed_at` is set every further transition is refused.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Job {
    pub id: JobId,
    pub host: HostAddress,
    pub kind: JobKind,
    status: JobStatus,
    pub patch_file: Option<String>,
    error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn start(
        host: HostAddress,
        kind: JobKind,
        patch_file: Option<String>,
    ) -> Self {
        Self {
            id: JobId::new(),
            host,
            kind,
            status: JobStatus::Running,
            patch_file,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_terminal(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn succeed(&mut self) -> Result<(), ModelError> {
        self.finish(JobStatus::Success, None)
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), ModelError> {
        self.finish(JobStatus::Failed, Some(message.into()))
    }

    fn finish(
        &mut self,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<(), ModelError> {
        if self.is_terminal() {
            return Err(ModelError::JobAlreadyCompleted(self.id));
        }
        self.status = status;
        self.error_message = error_message;
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// Query over the job history. Empty filter matches everything.
#[derive(Clone, Debug, Default)]
pub struct JobFilter {
    pub host: Option<HostAddress>,
    pub kind: Option<JobKind>,
    pub status: Option<JobStatus>,
    pub started_since: Option<DateTime<Utc>>,
}

impl JobFilter {
    pub fn for_host(host: HostAddress) -> Self {
        Self {
            host: Some(host),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Keeps jobs started within the last `days` days of `now`. A window
    /// reaching past the earliest representable instant applies no cutoff.
    pub fn within_days(mut self, days: u32, now: DateTime<Utc>) -> Self {
        self.started_since = chrono::Duration::try_days(i64::from(days))
            .and_then(|window| now.checked_sub_signed(window));
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.host.is_none_or(|host| job.host == host)
            && self.kind.is_none_or(|kind| job.kind == kind)
            && self.status.is_none_or(|status| job.status == status)
            && self.started_since.is_none_or(|since| job.started_at >= since)
    }
}
