use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use patchfleet_model::HostAddress;
use serde::{Deserialize, Serialize};
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

use super::{ConnectivityProbe, HostInfo};
use crate::error::{FleetError, Result};

const BUILD_MARKER: &str = "__PATCHFLEET_BUILD__";
const HOSTNAME_MARKER: &str = "__PATCHFLEET_HOSTNAME__";
const DATASTORE_MARKER: &str = "__PATCHFLEET_DATASTORES__";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshConfig {
    /// Path or name of the `ssh` binary.
    pub binary: String,
    pub user: String,
    pub connect_timeout_secs: u64,
    /// Upper bound for one remote command, connection included.
    pub command_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            binary: "ssh".to_string(),
            user: "root".to_string(),
            connect_timeout_secs: 10,
            command_timeout_secs: 60,
        }
    }
}

/// Probe that shells out to the OpenSSH client in batch mode. Key-based
/// authentication is expected to be configured outside this process.
#[derive(Clone, Debug, Default)]
pub struct SshConnectivityProbe {
    config: SshConfig,
}

impl SshConnectivityProbe {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    fn command(&self, address: HostAddress, remote: &str) -> Command {
        let mut command = Command::new(&self.config.binary);
        command
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .args(["-o", "BatchMode=yes"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.config.connect_timeout_secs))
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .arg(format!("{}@{}", self.config.user, address))
            .arg(remote);
        command
    }

    async fn exec(
        &self,
        address: HostAddress,
        remote: &str,
    ) -> Result<std::process::Output> {
        let limit = Duration::from_secs(self.config.command_timeout_secs);
        timeout(limit, self.command(address, remote).output())
            .await
            .map_err(|_| {
                FleetError::Probe(format!(
                    "ssh to {address} timed out after {}s",
                    limit.as_secs()
                ))
            })?
            .map_err(|err| {
                FleetError::Probe(format!(
                    "failed to launch {}: {err}",
                    self.config.binary
                ))
            })
    }
}

#[async_trait]
impl ConnectivityProbe for SshConnectivityProbe {
    async fn reachable(&self, address: HostAddress) -> bool {
        match self.exec(address, "true").await {
            Ok(output) => output.status.success(),
            Err(err) => {
                debug!(host = %address, error = %err, "reachability probe failed");
                false
            }
        }
    }

    async fn info(&self, address: HostAddress) -> Result<HostInfo> {
        let script = format!(
            "echo {BUILD_MARKER}; vmware -v; \
             echo {HOSTNAME_MARKER}; hostname; \
             echo {DATASTORE_MARKER}; df -h | grep vmfs; true"
        );
        let output = self.exec(address, &script).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(host = %address, status = %output.status, "info probe failed");
            return Err(FleetError::Probe(format!(
                "info probe exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        parse_info_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Splits the marker-delimited info script output into its sections.
pub fn parse_info_output(stdout: &str) -> Result<HostInfo> {
    #[derive(Clone, Copy)]
    enum Section {
        Preamble,
        Build,
        Hostname,
        Datastores,
    }

    let mut section = Section::Preamble;
    let mut build = Vec::new();
    let mut hostname = Vec::new();
    let mut datastore_lines = Vec::new();

    for line in stdout.lines() {
        match line.trim() {
            BUILD_MARKER => section = Section::Build,
            HOSTNAME_MARKER => section = Section::Hostname,
            DATASTORE_MARKER => section = Section::Datastores,
            "" => {}
            text => match section {
                Section::Preamble => {}
                Section::Build => build.push(text),
                Section::Hostname => hostname.push(text),
                Section::Datastores => datastore_lines.push(text.to_string()),
            },
        }
    }

    let build = build.join(" ");
    if build.is_empty() {
        return Err(FleetError::Probe(
            "host did not report a build version".to_string(),
        ));
    }

    Ok(HostInfo {
        build,
        hostname: hostname.join(" "),
        datastore_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_sections() {
        let stdout = format!(
            "{BUILD_MARKER}\nVMware ESXi 7.0.3 build-21930508\n\
             {HOSTNAME_MARKER}\nesx-01.lab\n\
             {DATASTORE_MARKER}\n\
             VMFS-6 100G 40G 60G 40% /vmfs/volumes/datastore1\n\
             VMFS-6 20G 19G 1G 95% /vmfs/volumes/scratch\n"
        );
        let info = parse_info_output(&stdout).unwrap();
        assert_eq!(info.build, "VMware ESXi 7.0.3 build-21930508");
        assert_eq!(info.hostname, "esx-01.lab");
        assert_eq!(info.datastore_lines.len(), 2);
    }

    #[test]
    fn missing_build_is_an_error() {
        let stdout = format!(
            "{BUILD_MARKER}\n{HOSTNAME_MARKER}\nesx-01\n{DATASTORE_MARKER}\n"
        );
        let err = parse_info_output(&stdout).unwrap_err();
        assert!(matches!(err, FleetError::Probe(_)));
    }

    #[test]
    fn empty_storage_listing_is_allowed() {
        let stdout =
            format!("{BUILD_MARKER}\n8.0U2\n{HOSTNAME_MARKER}\nesx\n{DATASTORE_MARKER}\n");
        let info = parse_info_output(&stdout).unwrap();
        assert!(info.datastore_lines.is_empty());
    }

    #[test]
    fn command_carries_batch_options_and_target() {
        let probe = SshConnectivityProbe::new(SshConfig {
            user: "admin".into(),
            ..SshConfig::default()
        });
        let address = HostAddress::parse("10.20.0.7").unwrap();
        let command = probe.command(address, "true");
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert_eq!(args[args.len() - 2], "admin@10.20.0.7");
        assert_eq!(args[args.len() - 1], "true");
    }
}
