use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use patchfleet_model::HostAddress;
use serde::{Deserialize, Serialize};
use tokio::{process::Command, time::timeout};
use tracing::{info, instrument, warn};

use super::{PlaybookExecutor, PlaybookOutcome, PlaybookParams};
use crate::error::{FleetError, Result};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnsibleConfig {
    /// Path or name of the `ansible-playbook` binary.
    pub binary: String,
    /// Directory holding `<name>.yml` playbooks.
    pub playbook_dir: PathBuf,
    /// Optional vars file passed as `--extra-vars @<file>` ahead of the
    /// per-run parameters.
    pub extra_vars_file: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for AnsibleConfig {
    fn default() -> Self {
        Self {
            binary: "ansible-playbook".to_string(),
            playbook_dir: PathBuf::from("playbooks"),
            extra_vars_file: None,
            timeout_secs: 60 * 60,
        }
    }
}

/// Executor that runs `ansible-playbook` with an inline inventory.
#[derive(Clone, Debug, Default)]
pub struct AnsiblePlaybookExecutor {
    config: AnsibleConfig,
}

impl AnsiblePlaybookExecutor {
    pub fn new(config: AnsibleConfig) -> Self {
        Self { config }
    }

    pub fn playbook_path(&self, name: &str) -> PathBuf {
        self.config.playbook_dir.join(format!("{name}.yml"))
    }

    fn arguments(
        &self,
        playbook: &Path,
        hosts: &[HostAddress],
        params: &PlaybookParams,
    ) -> Result<Vec<OsString>> {
        // A trailing comma makes ansible read the list as hosts, not a file.
        let inventory: String =
            hosts.iter().map(|host| format!("{host},")).collect();

        let mut args: Vec<OsString> =
            vec![playbook.into(), "-i".into(), inventory.into()];
        if let Some(file) = &self.config.extra_vars_file {
            let mut value = OsString::from("@");
            value.push(file);
            args.push("--extra-vars".into());
            args.push(value);
        }
        if !params.is_empty() {
            args.push("--extra-vars".into());
            args.push(serde_json::to_string(params)?.into());
        }
        Ok(args)
    }
}

#[async_trait]
impl PlaybookExecutor for AnsiblePlaybookExecutor {
    #[instrument(skip(self, params), fields(hosts = hosts.len()))]
    async fn run(
        &self,
        name: &str,
        hosts: &[HostAddress],
        params: &PlaybookParams,
    ) -> Result<PlaybookOutcome> {
        let playbook = self.playbook_path(name);
        if !tokio::fs::try_exists(&playbook).await? {
            return Err(FleetError::NotFound(format!(
                "playbook {}",
                playbook.display()
            )));
        }

        let args = self.arguments(&playbook, hosts, params)?;
        let mut command = Command::new(&self.config.binary);
        command
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .args(&args);

        let limit = Duration::from_secs(self.config.timeout_secs);
        let output = timeout(limit, command.output())
            .await
            .map_err(|_| {
                FleetError::Playbook(format!(
                    "{name} timed out after {}s",
                    limit.as_secs()
                ))
            })?
            .map_err(|err| {
                FleetError::Playbook(format!(
                    "failed to launch {}: {err}",
                    self.config.binary
                ))
            })?;

        let outcome = PlaybookOutcome {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if outcome.success {
            info!(playbook = name, "playbook succeeded");
        } else {
            warn!(playbook = name, status = %output.status, "playbook failed");
        }
        Ok(outcome)
    }
}
