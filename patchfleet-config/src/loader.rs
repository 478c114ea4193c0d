use once_cell::sync::Lazy;
use std::{fs, path::PathBuf};
use thiserror::Error;
use tracing::debug;

use patchfleet_core::{
    OrchestratorConfig,
    orchestration::{PrecheckPolicy, RebootPolicy, StagePolicy, SweepConfig},
    remote::{AnsibleConfig, SshConfig},
};

use super::{
    models::{
        Config, ConfigMetadata, RemoteConfig, StoreConfig,
        sources::{EnvConfig, FileConfig},
    },
    util::parse_duration,
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("patchfleet.toml"),
        PathBuf::from("config/patchfleet.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        let env_config = EnvConfig::gather();

        let (file_config, config_path) =
            self.load_file_config(&env_config)?;

        let (config, warnings) = compose_config(
            file_config,
            env_config,
            config_path,
            env_file_loaded,
        )?;

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let mut source = ConfigPathSource::default();

        if let Some(explicit) = &self.options.config_path {
            source.explicit = Some(explicit.clone());
        } else if let Some(from_env) = &env_config.config_path {
            source.env = Some(from_env.clone());
        }

        if source.is_empty() {
            source.default = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
                .cloned();
        }

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents =
            fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
                path: path.clone(),
                source: err,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;
        debug!(path = %path.display(), ?provenance, "configuration file parsed");

        Ok((Some(file_config), Some(path)))
    }
}

/// Merges file and environment values over the built-in defaults, then runs
/// the guard rails. Environment values win over file values.
pub(crate) fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
    env_file_loaded: bool,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if config_path.is_none() {
        warnings.push_with_hint(
            "No patchfleet.toml detected; falling back to environment variables and defaults",
            "Pass --config or set PATCHFLEET_CONFIG to point at a configuration file",
        );
    }

    let FileConfig {
        store: file_store,
        remote: file_remote,
        orchestrator: file_orchestrator,
        sweeper: file_sweeper,
    } = file_config.unwrap_or_default();

    let store_defaults = StoreConfig::default();
    let store = StoreConfig {
        path: env
            .store_path
            .or(file_store.path)
            .unwrap_or(store_defaults.path),
    };

    let ssh_defaults = SshConfig::default();
    let ssh = SshConfig {
        binary: env
            .ssh_binary
            .or(file_remote.ssh_binary)
            .unwrap_or(ssh_defaults.binary),
        user: env
            .ssh_user
            .or(file_remote.ssh_user)
            .unwrap_or(ssh_defaults.user),
        connect_timeout_secs: resolve_secs(
            ("PATCHFLEET_SSH_CONNECT_TIMEOUT", env.ssh_connect_timeout),
            ("remote.connect_timeout", file_remote.connect_timeout),
            ssh_defaults.connect_timeout_secs,
        )?,
        command_timeout_secs: resolve_secs(
            ("PATCHFLEET_SSH_COMMAND_TIMEOUT", env.ssh_command_timeout),
            ("remote.command_timeout", file_remote.command_timeout),
            ssh_defaults.command_timeout_secs,
        )?,
    };

    let ansible_defaults = AnsibleConfig::default();
    let ansible = AnsibleConfig {
        binary: env
            .ansible_binary
            .or(file_remote.ansible_binary)
            .unwrap_or(ansible_defaults.binary),
        playbook_dir: env
            .playbook_dir
            .or(file_remote.playbook_dir)
            .unwrap_or(ansible_defaults.playbook_dir),
        extra_vars_file: env
            .extra_vars_file
            .or(file_remote.extra_vars_file)
            .or(ansible_defaults.extra_vars_file),
        timeout_secs: resolve_secs(
            ("PATCHFLEET_PLAYBOOK_TIMEOUT", env.playbook_timeout),
            ("remote.playbook_timeout", file_remote.playbook_timeout),
            ansible_defaults.timeout_secs,
        )?,
    };

    let orchestrator_defaults = OrchestratorConfig::default();
    let reboot_defaults = orchestrator_defaults.reboot;
    let reboot = RebootPolicy {
        grace_period_secs: resolve_secs(
            ("PATCHFLEET_REBOOT_GRACE_PERIOD", env.reboot_grace_period),
            ("orchestrator.grace_period", file_orchestrator.grace_period),
            reboot_defaults.grace_period_secs,
        )?,
        max_attempts: env
            .reboot_max_attempts
            .or(file_orchestrator.max_attempts)
            .unwrap_or(reboot_defaults.max_attempts),
        poll_interval_secs: resolve_secs(
            ("PATCHFLEET_REBOOT_POLL_INTERVAL", env.reboot_poll_interval),
            ("orchestrator.poll_interval", file_orchestrator.poll_interval),
            reboot_defaults.poll_interval_secs,
        )?,
    };

    let precheck = PrecheckPolicy {
        min_free_gb: env
            .min_free_gb
            .or(file_orchestrator.min_free_gb)
            .unwrap_or(orchestrator_defaults.precheck.min_free_gb),
    };

    let stage = StagePolicy {
        default_datastore: env
            .default_datastore
            .or(file_orchestrator.default_datastore)
            .unwrap_or(orchestrator_defaults.stage.default_datastore),
    };

    let sweep_defaults = orchestrator_defaults.sweep;
    let sweep = SweepConfig {
        enabled: env
            .sweep_enabled
            .or(file_sweeper.enabled)
            .unwrap_or(sweep_defaults.enabled),
        interval_secs: resolve_secs(
            ("PATCHFLEET_SWEEP_INTERVAL", env.sweep_interval),
            ("sweeper.interval", file_sweeper.interval),
            sweep_defaults.interval_secs,
        )?,
        stale_after_secs: resolve_secs(
            ("PATCHFLEET_SWEEP_STALE_AFTER", env.sweep_stale_after),
            ("sweeper.stale_after", file_sweeper.stale_after),
            sweep_defaults.stale_after_secs,
        )?,
    };

    let config = Config {
        store,
        remote: RemoteConfig { ssh, ansible },
        orchestrator: OrchestratorConfig {
            reboot,
            precheck,
            stage,
            sweep,
            event_channel_capacity: file_orchestrator
                .event_channel_capacity
                .unwrap_or(orchestrator_defaults.event_channel_capacity),
        },
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded,
        },
    };

    warnings.extend(validation::apply_guard_rails(&config)?);

    Ok((config, warnings))
}

/// First present value of (env, file) as whole seconds, else `default`.
fn resolve_secs(
    env: (&'static str, Option<String>),
    file: (&'static str, Option<String>),
    default: u64,
) -> Result<u64, ConfigLoadError> {
    let (field, raw) = match (env, file) {
        ((name, Some(raw)), _) => (name, raw),
        (_, (key, Some(raw))) => (key, raw),
        _ => return Ok(default),
    };
    parse_duration(&raw)
        .map(|duration| duration.as_secs())
        .map_err(|source| ConfigLoadError::InvalidDuration {
            field,
            value: raw,
            source,
        })
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid duration '{value}' for {field}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn is_empty(&self) -> bool {
        self.explicit.is_none() && self.env.is_none() && self.default.is_none()
    }

    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        if let Some(path) = &self.default {
            return Some((path.clone(), ConfigPathProvenance::Default));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(
            self,
            ConfigPathProvenance::Explicit | ConfigPathProvenance::Env
        )
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
