use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::{parse_bool_var, parse_var};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub store: FileStoreConfig,
    #[serde(default)]
    pub remote: FileRemoteConfig,
    #[serde(default)]
    pub orchestrator: FileOrchestratorConfig,
    #[serde(default)]
    pub sweeper: FileSweeperConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileStoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRemoteConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_binary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansible_binary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playbook_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_vars_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playbook_timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileOrchestratorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_free_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_datastore: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_channel_capacity: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSweeperConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_after: Option<String>,
}

/// Environment-derived configuration values. Durations stay raw so the
/// loader can name the offending variable when one fails to parse.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub store_path: Option<PathBuf>,
    pub ssh_binary: Option<String>,
    pub ssh_user: Option<String>,
    pub ssh_connect_timeout: Option<String>,
    pub ssh_command_timeout: Option<String>,
    pub ansible_binary: Option<String>,
    pub playbook_dir: Option<PathBuf>,
    pub extra_vars_file: Option<PathBuf>,
    pub playbook_timeout: Option<String>,
    pub reboot_grace_period: Option<String>,
    pub reboot_max_attempts: Option<u32>,
    pub reboot_poll_interval: Option<String>,
    pub min_free_gb: Option<f64>,
    pub default_datastore: Option<String>,
    pub sweep_enabled: Option<bool>,
    pub sweep_interval: Option<String>,
    pub sweep_stale_after: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: std::env::var("PATCHFLEET_CONFIG")
                .ok()
                .map(PathBuf::from),
            store_path: std::env::var("PATCHFLEET_STATE_FILE")
                .ok()
                .map(PathBuf::from),
            ssh_binary: std::env::var("PATCHFLEET_SSH_BINARY").ok(),
            ssh_user: std::env::var("PATCHFLEET_SSH_USER").ok(),
            ssh_connect_timeout: std::env::var("PATCHFLEET_SSH_CONNECT_TIMEOUT")
                .ok(),
            ssh_command_timeout: std::env::var("PATCHFLEET_SSH_COMMAND_TIMEOUT")
                .ok(),
            ansible_binary: std::env::var("PATCHFLEET_ANSIBLE_BINARY").ok(),
            playbook_dir: std::env::var("PATCHFLEET_PLAYBOOK_DIR")
                .ok()
                .map(PathBuf::from),
            extra_vars_file: std::env::var("PATCHFLEET_EXTRA_VARS_FILE")
                .ok()
                .map(PathBuf::from),
            playbook_timeout: std::env::var("PATCHFLEET_PLAYBOOK_TIMEOUT").ok(),

            reboot_grace_period: std::env::var("PATCHFLEET_REBOOT_GRACE_PERIOD")
                .ok(),
            reboot_max_attempts: parse_var("PATCHFLEET_REBOOT_MAX_ATTEMPTS"),
            reboot_poll_interval: std::env::var(
                "PATCHFLEET_REBOOT_POLL_INTERVAL",
            )
            .ok(),
            min_free_gb: parse_var("PATCHFLEET_MIN_FREE_GB"),
            default_datastore: std::env::var("PATCHFLEET_DEFAULT_DATASTORE")
                .ok(),

            sweep_enabled: parse_bool_var("PATCHFLEET_SWEEP_ENABLED"),
            sweep_interval: std::env::var("PATCHFLEET_SWEEP_INTERVAL").ok(),
            sweep_stale_after: std::env::var("PATCHFLEET_SWEEP_STALE_AFTER")
                .ok(),
        }
    }
}
