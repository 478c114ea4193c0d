//! Narrow contracts for the two remote collaborators and their
//! process-backed implementations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use patchfleet_model::HostAddress;
use serde::{Deserialize, Serialize};

use crate::error::Result;

mod ansible;
mod ssh;

pub use ansible::{AnsibleConfig, AnsiblePlaybookExecutor};
pub use ssh::{SshConfig, SshConnectivityProbe, parse_info_output};

/// Remote procedure names understood by the playbook executor.
pub mod playbooks {
    pub const PRE_CHECKS: &str = "pre_checks";
    pub const PHASE1_STAGE: &str = "phase1_stage";
    pub const PHASE2_REBOOT: &str = "phase2_reboot";
}

/// Facts fetched from a reachable host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub build: String,
    pub hostname: String,
    /// Raw storage listing, one volume per line.
    pub datastore_lines: Vec<String>,
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Whether the host accepts a remote session right now.
    async fn reachable(&self, address: HostAddress) -> bool;

    /// Fetches build, hostname and storage listing.
    async fn info(&self, address: HostAddress) -> Result<HostInfo>;
}

/// Captured result of one playbook run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl PlaybookOutcome {
    pub fn succeeded(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Text recorded on a failed job: stderr, falling back to stdout.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        "playbook failed without output".to_string()
    }
}

pub type PlaybookParams = BTreeMap<String, String>;

#[async_trait]
pub trait PlaybookExecutor: Send + Sync {
    /// Runs the named procedure against `hosts`.
    ///
    /// `Err` is reserved for failures to launch the procedure at all; a
    /// procedure that ran and failed returns `Ok` with `success == false`.
    async fn run(
        &self,
        name: &str,
        hosts: &[HostAddress],
        params: &PlaybookParams,
    ) -> Result<PlaybookOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_detail_prefers_stderr() {
        let outcome = PlaybookOutcome {
            success: false,
            stdout: "PLAY RECAP".into(),
            stderr: "  fatal: unreachable \n".into(),
        };
        assert_eq!(outcome.failure_detail(), "fatal: unreachable");
    }

    #[test]
    fn failure_detail_falls_back_to_stdout() {
        let outcome = PlaybookOutcome {
            success: false,
            stdout: "task failed".into(),
            stderr: " ".into(),
        };
        assert_eq!(outcome.failure_detail(), "task failed");
        assert_eq!(
            PlaybookOutcome::default().failure_detail(),
            "playbook failed without output"
        );
    }
}
