use std::{collections::BTreeMap, process::ExitCode};

use anyhow::Context;
use chrono::Utc;
use patchfleet_core::{
    OrchestrationEngine, PeriodicSweeper,
    orchestration::{AdmissionReport, JobEvent},
};
use patchfleet_model::{
    Host, HostAddress, HostStatus, Job, JobFilter, JobKind, JobStatus,
    setting_keys,
};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::{
    bootstrap::{Runtime, build_runtime, load_config},
    cli::{Cli, Command, HostsCommand, JobsArgs, SettingsCommand},
    render::{self, Renderer},
    signal,
};

const KNOWN_SETTINGS: [&str; 3] = [
    setting_keys::REBOOT_GRACE_PERIOD_SECS,
    setting_keys::REBOOT_MAX_ATTEMPTS,
    setting_keys::REBOOT_POLL_INTERVAL_SECS,
];

pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let renderer = Renderer::new(cli.global.json);
    let config = load_config(&cli.global)?;
    let runtime = build_runtime(config).await?;
    signal::cancel_on_signal(runtime.shutdown.clone());

    let result = dispatch(&runtime, renderer, cli.command).await;
    runtime.engine.shutdown().await;
    result
}

async fn dispatch(
    runtime: &Runtime,
    renderer: Renderer,
    command: Command,
) -> anyhow::Result<ExitCode> {
    let engine = &runtime.engine;
    match command {
        Command::Hosts(HostsCommand::Add { hosts }) => {
            let report = engine.register_hosts(&hosts).await?;
            renderer.emit(&report, || render::registration_text(&report))?;
        }
        Command::Hosts(HostsCommand::List { status }) => {
            let hosts = match status.map(HostStatus::from) {
                Some(wanted) => {
                    engine
                        .hosts_by(&|host: &Host| host.status() == wanted)
                        .await?
                }
                None => engine.hosts().await?,
            };
            renderer.emit(&hosts, || render::hosts_text(&hosts))?;
        }
        Command::Precheck(args) => {
            let run = run_phase(engine, renderer, Phase::Precheck, &args.hosts)
                .await?;
            renderer.emit(&run, String::new)?;
            return Ok(run.exit_code());
        }
        Command::Stage(args) => {
            let phase = Phase::Stage {
                patch_file: &args.patch,
            };
            let run =
                run_phase(engine, renderer, phase, &args.targets.hosts).await?;
            renderer.emit(&run, String::new)?;
            return Ok(run.exit_code());
        }
        Command::RebootVerify(args) => {
            let run =
                run_phase(engine, renderer, Phase::RebootVerify, &args.hosts)
                    .await?;
            renderer.emit(&run, String::new)?;
            return Ok(run.exit_code());
        }
        Command::Rollout(args) => {
            return rollout(runtime, renderer, &args.patch, &args.targets.hosts)
                .await;
        }
        Command::Refresh { host } => {
            let address = engine.refresh_host(&host).await?;
            engine.wait_idle().await;
            let host = engine.host(address).await?;
            renderer.emit(&host, || render::host_text(&host))?;
        }
        Command::Jobs(args) => {
            let filter = job_filter(&args)?;
            let jobs = engine.list_jobs(&filter).await?;
            renderer.emit(&jobs, || render::jobs_text(&jobs))?;
        }
        Command::Settings(SettingsCommand::Get) => {
            let settings = engine.settings().await?;
            renderer.emit(&settings, || render::settings_text(&settings))?;
        }
        Command::Settings(SettingsCommand::Set { values }) => {
            for (key, _) in &values {
                if !KNOWN_SETTINGS.contains(&key.as_str()) {
                    warn!(key = %key, "setting is not read by the orchestrator");
                }
            }
            let values: BTreeMap<String, String> = values.into_iter().collect();
            engine.update_settings(values).await?;
            let policy = engine.reboot_policy().await?;
            renderer.emit(&policy, || {
                format!(
                    "reboot policy: {}s grace, {} attempt(s) every {}s\n",
                    policy.grace_period_secs,
                    policy.max_attempts,
                    policy.poll_interval_secs
                )
            })?;
        }
        Command::Serve => serve(runtime).await?,
    }
    Ok(ExitCode::SUCCESS)
}

fn job_filter(args: &JobsArgs) -> anyhow::Result<JobFilter> {
    let mut filter = JobFilter::default();
    if let Some(raw) = args.host.as_deref() {
        filter.host = Some(
            HostAddress::parse(raw)
                .with_context(|| format!("invalid --host '{raw}'"))?,
        );
    }
    filter.kind = args.kind.map(JobKind::from);
    filter.status = args.status.map(JobStatus::from);
    if let Some(days) = args.days {
        filter = filter.within_days(days, Utc::now());
    }
    Ok(filter)
}

#[derive(Debug, Clone, Copy)]
enum Phase<'a> {
    Precheck,
    Stage { patch_file: &'a str },
    RebootVerify,
}

impl Phase<'_> {
    fn kind(&self) -> JobKind {
        match self {
            Phase::Precheck => JobKind::Precheck,
            Phase::Stage { .. } => JobKind::Stage,
            Phase::RebootVerify => JobKind::RebootVerify,
        }
    }
}

/// Admission result and terminal jobs of one phase command.
#[derive(Debug, Serialize)]
struct PhaseRun {
    phase: JobKind,
    admission: AdmissionReport,
    jobs: Vec<Job>,
}

impl PhaseRun {
    fn succeeded_hosts(&self) -> Vec<String> {
        self.jobs
            .iter()
            .filter(|job| job.status() == JobStatus::Success)
            .map(|job| job.host.to_string())
            .collect()
    }

    fn all_succeeded(&self) -> bool {
        self.jobs
            .iter()
            .all(|job| job.status() == JobStatus::Success)
    }

    fn exit_code(&self) -> ExitCode {
        if self.all_succeeded() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

async fn run_phase(
    engine: &OrchestrationEngine,
    renderer: Renderer,
    phase: Phase<'_>,
    hosts: &[String],
) -> anyhow::Result<PhaseRun> {
    let kind = phase.kind();
    let mut events = engine.subscribe();
    let admission = match phase {
        Phase::Precheck => engine.precheck(hosts).await?,
        Phase::Stage { patch_file } => engine.stage(hosts, patch_file).await?,
        Phase::RebootVerify => engine.reboot_verify(hosts).await?,
    };
    if !renderer.is_json() {
        print!("{}", render::admission_text(kind, &admission));
    }

    await_completion(engine, &mut events, renderer).await;

    let mut jobs = Vec::with_capacity(admission.started.len());
    for started in &admission.started {
        let filter = JobFilter::for_host(started.host).with_kind(kind);
        let job = engine
            .list_jobs(&filter)
            .await?
            .into_iter()
            .find(|job| job.id == started.job_id)
            .with_context(|| {
                format!("job {} for {} vanished", started.job_id, started.host)
            })?;
        jobs.push(job);
    }
    if !renderer.is_json() {
        print!("{}", render::summary_text(kind, &jobs));
    }

    Ok(PhaseRun {
        phase: kind,
        admission,
        jobs,
    })
}

/// Streams progress until every dispatched job has finished.
async fn await_completion(
    engine: &OrchestrationEngine,
    events: &mut broadcast::Receiver<JobEvent>,
    renderer: Renderer,
) {
    let idle = engine.wait_idle();
    tokio::pin!(idle);
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(event) => renderer.progress(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "progress stream lagged");
                }
                Err(RecvError::Closed) => {
                    (&mut idle).await;
                    break;
                }
            },
            _ = &mut idle => break,
        }
    }
    while let Ok(event) = events.try_recv() {
        renderer.progress(&event);
    }
}

/// Precheck, stage and reboot-verify in sequence. Each phase only receives
/// the hosts that succeeded in the previous one.
async fn rollout(
    runtime: &Runtime,
    renderer: Renderer,
    patch_file: &str,
    hosts: &[String],
) -> anyhow::Result<ExitCode> {
    let phases = [
        Phase::Precheck,
        Phase::Stage { patch_file },
        Phase::RebootVerify,
    ];
    let mut targets = hosts.to_vec();
    let mut runs = Vec::with_capacity(phases.len());
    let mut exit = ExitCode::SUCCESS;

    for phase in phases {
        if runtime.shutdown.is_cancelled() {
            warn!(phase = %phase.kind(), "rollout interrupted");
            exit = ExitCode::FAILURE;
            break;
        }
        if targets.is_empty() {
            if !renderer.is_json() {
                println!("{}: no hosts left, rollout stopped", phase.kind());
            }
            exit = ExitCode::FAILURE;
            break;
        }
        let run =
            run_phase(&runtime.engine, renderer, phase, &targets).await?;
        if !run.all_succeeded() {
            exit = ExitCode::FAILURE;
        }
        targets = run.succeeded_hosts();
        runs.push(run);
    }

    info!(phases = runs.len(), "rollout finished");
    renderer.emit(&runs, String::new)?;
    Ok(exit)
}

/// Runs the sweeper until a shutdown signal arrives.
async fn serve(runtime: &Runtime) -> anyhow::Result<()> {
    let sweep = runtime.config.orchestrator.sweep;
    let handle = PeriodicSweeper::new(runtime.engine.clone(), sweep)
        .spawn(runtime.shutdown.clone());
    info!(
        state_file = %runtime.config.store.path.display(),
        "patchfleet serving; waiting for SIGINT or SIGTERM"
    );

    runtime.shutdown.cancelled().await;
    handle.await.context("sweeper task panicked")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{JobStatusArg, KindArg};

    #[test]
    fn job_filter_combines_flags() {
        let args = JobsArgs {
            host: Some("10.2.0.1".into()),
            kind: Some(KindArg::Stage),
            status: Some(JobStatusArg::Success),
            days: Some(3),
        };

        let filter = job_filter(&args).unwrap();
        assert_eq!(filter.host, Some(HostAddress::parse("10.2.0.1").unwrap()));
        assert_eq!(filter.kind, Some(JobKind::Stage));
        assert_eq!(filter.status, Some(JobStatus::Success));
        let since = filter.started_since.unwrap();
        let age = Utc::now() - since;
        assert!(age >= chrono::Duration::days(3));
        assert!(age < chrono::Duration::days(3) + chrono::Duration::minutes(1));
    }

    #[test]
    fn job_filter_rejects_bad_hosts() {
        let args = JobsArgs {
            host: Some("esx-01.lab".into()),
            kind: None,
            status: None,
            days: None,
        };
        assert!(job_filter(&args).is_err());
    }

    #[test]
    fn phase_run_reports_survivors() {
        let host = HostAddress::parse("10.2.0.2").unwrap();
        let mut ok = Job::start(host, JobKind::Precheck, None);
        ok.succeed().unwrap();
        let mut bad =
            Job::start(HostAddress::parse("10.2.0.3").unwrap(), JobKind::Precheck, None);
        bad.fail("Insufficient datastore space").unwrap();

        let run = PhaseRun {
            phase: JobKind::Precheck,
            admission: AdmissionReport::default(),
            jobs: vec![ok, bad],
        };
        assert!(!run.all_succeeded());
        assert_eq!(run.succeeded_hosts(), ["10.2.0.2"]);
    }
}
