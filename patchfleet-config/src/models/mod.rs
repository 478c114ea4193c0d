use std::path::PathBuf;

use patchfleet_core::{
    OrchestratorConfig,
    remote::{AnsibleConfig, SshConfig},
};

pub mod sources;

/// Fully resolved runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub store: StoreConfig,
    pub remote: RemoteConfig,
    pub orchestrator: OrchestratorConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// JSON snapshot shared by every CLI invocation.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("patchfleet-state.json"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteConfig {
    pub ssh: SshConfig,
    pub ansible: AnsibleConfig,
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
