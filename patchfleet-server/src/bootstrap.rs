use std::sync::Arc;

use anyhow::Context;
use patchfleet_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use patchfleet_core::{
    EngineDeps, OrchestrationEngine,
    remote::{AnsiblePlaybookExecutor, SshConnectivityProbe},
    store::FileFleetStore,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::GlobalArgs;

/// Everything a command needs once configuration is resolved.
#[derive(Debug)]
pub struct Runtime {
    pub config: Config,
    pub engine: OrchestrationEngine,
    pub shutdown: CancellationToken,
}

pub fn load_config(args: &GlobalArgs) -> anyhow::Result<Config> {
    let ConfigLoad {
        mut config,
        warnings,
    } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: args.config.clone(),
        env_file: args.env_file.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    if let Some(path) = args.state_file.clone() {
        config.store.path = path;
    }

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = config.metadata.config_path.as_ref() {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in &warnings.items {
        match warning.hint.as_deref() {
            Some(hint) => warn!(hint, "{}", warning.message),
            None => warn!("{}", warning.message),
        }
    }

    Ok(config)
}

/// Opens the state file and wires the process-backed collaborators.
pub async fn build_runtime(config: Config) -> anyhow::Result<Runtime> {
    let store = FileFleetStore::open(config.store.path.clone())
        .await
        .with_context(|| {
            format!("failed to open state file {}", config.store.path.display())
        })?;

    let probe = Arc::new(SshConnectivityProbe::new(config.remote.ssh.clone()));
    let executor =
        Arc::new(AnsiblePlaybookExecutor::new(config.remote.ansible.clone()));
    let deps = EngineDeps::from_store(Arc::new(store), probe, executor);

    let shutdown = CancellationToken::new();
    let engine = OrchestrationEngine::new(
        deps,
        config.orchestrator.clone(),
        shutdown.clone(),
    );

    Ok(Runtime {
        config,
        engine,
        shutdown,
    })
}
