use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigGuardRailError {
    #[error("{field} must not be empty")]
    EmptyValue { field: &'static str },
    #[error("reboot max_attempts must be at least 1")]
    ZeroRebootAttempts,
    #[error("sweeper interval must be non-zero while the sweeper is enabled")]
    ZeroSweepInterval,
    #[error("min_free_gb must be a non-negative number, got {value}")]
    InvalidFreeSpaceThreshold { value: f64 },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let orchestrator = &config.orchestrator;

    if config.remote.ssh.user.trim().is_empty() {
        return Err(ConfigGuardRailError::EmptyValue { field: "ssh_user" });
    }
    if orchestrator.stage.default_datastore.trim().is_empty() {
        return Err(ConfigGuardRailError::EmptyValue {
            field: "default_datastore",
        });
    }
    if orchestrator.reboot.max_attempts == 0 {
        return Err(ConfigGuardRailError::ZeroRebootAttempts);
    }
    let threshold = orchestrator.precheck.min_free_gb;
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(ConfigGuardRailError::InvalidFreeSpaceThreshold {
            value: threshold,
        });
    }
    if orchestrator.sweep.enabled && orchestrator.sweep.interval_secs == 0 {
        return Err(ConfigGuardRailError::ZeroSweepInterval);
    }

    if orchestrator.reboot.poll_interval_secs == 0 {
        warnings.push_with_hint(
            "Reboot poll interval is zero; every attempt runs back to back",
            "Set orchestrator.poll_interval to a few seconds or more",
        );
    }

    let ssh = &config.remote.ssh;
    if ssh.connect_timeout_secs >= ssh.command_timeout_secs {
        warnings.push(format!(
            "SSH connect timeout ({}s) is not shorter than the command timeout ({}s)",
            ssh.connect_timeout_secs, ssh.command_timeout_secs
        ));
    }

    let playbook_dir = &config.remote.ansible.playbook_dir;
    if !playbook_dir.is_dir() {
        warnings.push_with_hint(
            format!(
                "Playbook directory {} does not exist",
                playbook_dir.display()
            ),
            "Set remote.playbook_dir or PATCHFLEET_PLAYBOOK_DIR to the directory holding pre_checks.yml",
        );
    }

    if orchestrator.event_channel_capacity == 0 {
        warnings.push("Event channel capacity of zero is raised to one");
    }

    Ok(warnings)
}
