use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use patchfleet_model::{HostStatus, JobKind, JobStatus};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "patchfleet", version)]
#[command(
    about = "Staged ESXi patch rollouts: precheck, stage, then reboot and verify"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to a patchfleet.toml configuration file
    #[arg(long, global = true, env = "PATCHFLEET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env when present)
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// State file holding hosts, jobs and settings (overrides config)
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the host inventory
    #[command(subcommand)]
    Hosts(HostsCommand),
    /// Check reachability, build and datastore capacity
    Precheck(TargetArgs),
    /// Stage a patch bundle on hosts that passed their precheck
    Stage(PatchArgs),
    /// Reboot staged hosts and wait for them to return on the target build
    RebootVerify(TargetArgs),
    /// Re-read reachability and build facts without changing status
    Refresh {
        /// Host to refresh
        host: String,
    },
    /// Run precheck, stage and reboot-verify back to back
    Rollout(PatchArgs),
    /// Show job history, newest first
    Jobs(JobsArgs),
    /// Read or change runtime settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Run the periodic sweeper until SIGINT or SIGTERM
    Serve,
}

#[derive(Debug, Subcommand)]
pub enum HostsCommand {
    /// Register hosts in `pending`
    Add {
        #[arg(required = true)]
        hosts: Vec<String>,
    },
    /// List registered hosts
    List {
        /// Only hosts in this status
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TargetArgs {
    /// Host addresses (IPv4)
    #[arg(required = true)]
    pub hosts: Vec<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PatchArgs {
    /// Patch bundle file name, e.g. VMware-ESXi-7.0U3-depot.zip
    #[arg(long, short)]
    pub patch: String,

    #[command(flatten)]
    pub targets: TargetArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct JobsArgs {
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,

    #[arg(long, value_enum)]
    pub status: Option<JobStatusArg>,

    /// Only jobs started within the last N days
    #[arg(long)]
    pub days: Option<u32>,
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Print every stored setting
    Get,
    /// Store one or more KEY=VALUE pairs
    Set {
        #[arg(required = true, value_parser = parse_key_value)]
        values: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Precheck,
    Stage,
    RebootVerify,
}

impl From<KindArg> for JobKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Precheck => JobKind::Precheck,
            KindArg::Stage => JobKind::Stage,
            KindArg::RebootVerify => JobKind::RebootVerify,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JobStatusArg {
    Running,
    Success,
    Failed,
}

impl From<JobStatusArg> for JobStatus {
    fn from(value: JobStatusArg) -> Self {
        match value {
            JobStatusArg::Running => JobStatus::Running,
            JobStatusArg::Success => JobStatus::Success,
            JobStatusArg::Failed => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Pending,
    PreCheckPassed,
    PreCheckFailed,
    Phase1Completed,
    Phase1Failed,
    PatchingCompleted,
    Phase2Failed,
}

impl From<StatusArg> for HostStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => HostStatus::Pending,
            StatusArg::PreCheckPassed => HostStatus::PreCheckPassed,
            StatusArg::PreCheckFailed => HostStatus::PreCheckFailed,
            StatusArg::Phase1Completed => HostStatus::Phase1Completed,
            StatusArg::Phase1Failed => HostStatus::Phase1Failed,
            StatusArg::PatchingCompleted => HostStatus::PatchingCompleted,
            StatusArg::Phase2Failed => HostStatus::Phase2Failed,
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn stage_takes_a_patch_and_hosts() {
        let cli = Cli::try_parse_from([
            "patchfleet",
            "stage",
            "--patch",
            "VMware-ESXi-7.0U3-depot.zip",
            "10.0.0.1",
            "10.0.0.2",
            "--json",
        ])
        .unwrap();

        assert!(cli.global.json);
        let Command::Stage(args) = cli.command else {
            panic!("expected stage");
        };
        assert_eq!(args.patch, "VMware-ESXi-7.0U3-depot.zip");
        assert_eq!(args.targets.hosts, ["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn phase_commands_require_hosts() {
        assert!(Cli::try_parse_from(["patchfleet", "precheck"]).is_err());
        assert!(
            Cli::try_parse_from(["patchfleet", "rollout", "--patch", "p.zip"])
                .is_err()
        );
    }

    #[test]
    fn settings_set_splits_pairs() {
        let cli = Cli::try_parse_from([
            "patchfleet",
            "settings",
            "set",
            "reboot.max_attempts=5",
            "reboot.poll_interval_secs = 10",
        ])
        .unwrap();

        let Command::Settings(SettingsCommand::Set { values }) = cli.command
        else {
            panic!("expected settings set");
        };
        assert_eq!(
            values,
            [
                ("reboot.max_attempts".to_string(), "5".to_string()),
                ("reboot.poll_interval_secs".to_string(), "10".to_string()),
            ]
        );
        assert!(parse_key_value("no-equals").is_err());
        assert!(parse_key_value("=1").is_err());
    }

    #[test]
    fn jobs_filters_map_onto_the_model() {
        let cli = Cli::try_parse_from([
            "patchfleet",
            "jobs",
            "--kind",
            "reboot-verify",
            "--status",
            "failed",
            "--days",
            "7",
        ])
        .unwrap();

        let Command::Jobs(args) = cli.command else {
            panic!("expected jobs");
        };
        assert_eq!(args.kind.map(JobKind::from), Some(JobKind::RebootVerify));
        assert_eq!(args.status.map(JobStatus::from), Some(JobStatus::Failed));
        assert_eq!(args.days, Some(7));
    }
}
