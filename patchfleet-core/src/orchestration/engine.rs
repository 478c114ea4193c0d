//! Phase entry points and the background work they dispatch.
//!
//! Admission validates inputs and preconditions, opens a job and hands the
//! host to the [`TaskDispatcher`]; it never waits for remote work. Each unit
//! of work writes exactly one host outcome and one terminal job status.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    future::Future,
    sync::Arc,
};

use chrono::Utc;
use patchfleet_model::{
    Host, HostAddress, Job, JobFilter, JobKind, JobStatus, PhaseOutcome,
    Setting, setting_keys,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::{
    admission::{AdmissionReport, RegistrationReport, SkipReason, StartedJob},
    build::target_build_from_patch,
    config::{OrchestratorConfig, RebootPolicy},
    datastore::select_datastore,
    dispatcher::{HostClaim, TaskDispatcher, WorkKind},
    events::{InProcJobEventBus, JobEvent, JobEventPayload, JobEventPublisher},
    retry::{
        Exhaustion, PollVerdict, RebootPoll, sleep_or_cancel, wait_for_build,
    },
};
use crate::{
    error::{FleetError, Result},
    remote::{
        ConnectivityProbe, PlaybookExecutor, PlaybookParams, playbooks,
    },
    store::{HostPredicate, HostRegistry, JobTracker, SettingsStore},
};

pub const SSH_DISABLED: &str = "SSH is not enabled on host";
pub const INSUFFICIENT_SPACE: &str =
    "Insufficient datastore space (need >2GB free)";
/// Precheck failure for a fleet whose volumes are all at or below the
/// configured free-space threshold.
pub fn insufficient_space(min_free_gb: f64) -> String {
    format!("Insufficient datastore space (need >{min_free_gb}GB free)")
}

pub const MISSING_TARGET_BUILD: &str =
    "No target build recorded for host; stage a patch first";
pub const INTERRUPTED: &str = "Interrupted by shutdown before completion";

/// Repositories and remote collaborators the engine drives.
#[derive(Clone)]
pub struct EngineDeps {
    pub hosts: Arc<dyn HostRegistry>,
    pub jobs: Arc<dyn JobTracker>,
    pub settings: Arc<dyn SettingsStore>,
    pub probe: Arc<dyn ConnectivityProbe>,
    pub executor: Arc<dyn PlaybookExecutor>,
}

impl fmt::Debug for EngineDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineDeps").finish_non_exhaustive()
    }
}

impl EngineDeps {
    /// Uses one store for hosts, jobs and settings.
    pub fn from_store<S>(
        store: Arc<S>,
        probe: Arc<dyn ConnectivityProbe>,
        executor: Arc<dyn PlaybookExecutor>,
    ) -> Self
    where
        S: HostRegistry + JobTracker + SettingsStore + 'static,
    {
        Self {
            hosts: store.clone(),
            jobs: store.clone(),
            settings: store,
            probe,
            executor,
        }
    }
}

/// How a unit of work ended short of success.
enum WorkError {
    Failed(String),
    Cancelled,
}

type WorkResult = std::result::Result<(), WorkError>;

struct EngineInner {
    deps: EngineDeps,
    config: OrchestratorConfig,
    events: InProcJobEventBus,
    dispatcher: TaskDispatcher,
}

/// Stateless coordinator over the repositories. Cloning shares the
/// dispatcher, so in-flight exclusivity holds across clones.
#[derive(Clone)]
pub struct OrchestrationEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for OrchestrationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestrationEngine")
            .field("config", &self.inner.config)
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}

impl OrchestrationEngine {
    pub fn new(
        deps: EngineDeps,
        config: OrchestratorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let events = InProcJobEventBus::new(config.event_channel_capacity);
        Self {
            inner: Arc::new(EngineInner {
                deps,
                config,
                events,
                dispatcher: TaskDispatcher::new(shutdown),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.dispatcher.shutdown_token().clone()
    }

    /// Adds hosts in `pending`. Existing hosts are left untouched.
    pub async fn register_hosts<S: AsRef<str>>(
        &self,
        inputs: &[S],
    ) -> Result<RegistrationReport> {
        let mut report = RegistrationReport::default();
        let mut seen = HashSet::new();
        for raw in inputs {
            let raw = raw.as_ref();
            let Ok(address) = HostAddress::parse(raw) else {
                report.skip(raw, SkipReason::InvalidAddress);
                continue;
            };
            if !seen.insert(address) {
                report.skip(raw, SkipReason::DuplicateInput);
                continue;
            }
            match self.inner.deps.hosts.get(address).await {
                Ok(_) => {
                    report.skip(raw, SkipReason::AlreadyRegistered);
                }
                Err(err) if err.is_not_found() => {
                    self.inner.deps.hosts.upsert(Host::new(address)).await?;
                    info!(host = %address, "host registered");
                    report.added.push(address);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    /// Runs prechecks. Re-runnable from any status.
    pub async fn precheck<S: AsRef<str>>(
        &self,
        inputs: &[S],
    ) -> Result<AdmissionReport> {
        self.admit(JobKind::Precheck, inputs, None).await
    }

    /// Stages `patch_file` on hosts that passed their precheck.
    pub async fn stage<S: AsRef<str>>(
        &self,
        inputs: &[S],
        patch_file: &str,
    ) -> Result<AdmissionReport> {
        let patch_file = patch_file.trim();
        if patch_file.is_empty() {
            return Err(FleetError::InvalidInput(
                "patch file name is empty".to_string(),
            ));
        }
        self.admit(JobKind::Stage, inputs, Some(patch_file.to_string()))
            .await
    }

    /// Reboots staged hosts and verifies they return on the target build.
    pub async fn reboot_verify<S: AsRef<str>>(
        &self,
        inputs: &[S],
    ) -> Result<AdmissionReport> {
        self.admit(JobKind::RebootVerify, inputs, None).await
    }

    /// Re-probes a registered host in the background without touching its
    /// status.
    pub async fn refresh_host(&self, raw: &str) -> Result<HostAddress> {
        let address = HostAddress::parse(raw)?;
        let claim = self
            .inner
            .dispatcher
            .try_claim(address, WorkKind::Refresh)
            .map_err(|running| {
                FleetError::HostBusy(format!("{address} is running {running}"))
            })?;
        let host = self.inner.deps.hosts.get(address).await?;

        let inner = Arc::clone(&self.inner);
        let span = info_span!("refresh", host = %address);
        self.inner
            .dispatcher
            .spawn(claim, inner.refresh(host).instrument(span));
        Ok(address)
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.inner.deps.jobs.list(filter).await
    }

    pub async fn hosts(&self) -> Result<Vec<Host>> {
        self.inner.deps.hosts.list_all().await
    }

    pub async fn hosts_by(
        &self,
        predicate: HostPredicate<'_>,
    ) -> Result<Vec<Host>> {
        self.inner.deps.hosts.list_by(predicate).await
    }

    pub async fn host(&self, address: HostAddress) -> Result<Host> {
        self.inner.deps.hosts.get(address).await
    }

    pub async fn settings(&self) -> Result<Vec<Setting>> {
        self.inner.deps.settings.all().await
    }

    pub async fn update_settings(
        &self,
        values: BTreeMap<String, String>,
    ) -> Result<()> {
        self.inner.deps.settings.update(values).await
    }

    /// Reboot policy for the next run: static config overridden by settings.
    pub async fn reboot_policy(&self) -> Result<RebootPolicy> {
        self.inner.reboot_policy().await
    }

    pub fn in_flight(&self, address: HostAddress) -> Option<WorkKind> {
        self.inner.dispatcher.in_flight(address)
    }

    /// Waits until every dispatched unit of work has finished.
    pub async fn wait_idle(&self) {
        self.inner.dispatcher.wait_idle().await;
    }

    /// Cancels running work and waits for it to record its outcome.
    pub async fn shutdown(&self) {
        info!("orchestration engine shutting down");
        self.inner.dispatcher.shutdown().await;
    }

    async fn admit<S: AsRef<str>>(
        &self,
        kind: JobKind,
        inputs: &[S],
        patch_file: Option<String>,
    ) -> Result<AdmissionReport> {
        let mut report = AdmissionReport::default();
        let mut seen = HashSet::new();

        for raw in inputs {
            let raw = raw.as_ref();
            let Ok(address) = HostAddress::parse(raw) else {
                debug!(input = raw, phase = %kind, "skipping malformed address");
                report.skip(raw, SkipReason::InvalidAddress);
                continue;
            };
            if !seen.insert(address) {
                report.skip(raw, SkipReason::DuplicateInput);
                continue;
            }

            let claim = match self.inner.dispatcher.try_claim(address, kind.into())
            {
                Ok(claim) => claim,
                Err(work) => {
                    debug!(host = %address, phase = %kind, running = %work, "host busy");
                    report.skip(raw, SkipReason::AlreadyRunning { work });
                    continue;
                }
            };

            let host = match self.inner.deps.hosts.get(address).await {
                Ok(host) => host,
                Err(err) if err.is_not_found() => {
                    report.skip(raw, SkipReason::UnknownHost);
                    continue;
                }
                Err(err) => return Err(err),
            };
            let status = host.status();
            if !status.admits(kind) {
                debug!(host = %address, phase = %kind, %status, "precondition not met");
                report.skip(raw, SkipReason::PreconditionNotMet { status });
                continue;
            }

            let patch_file = match kind {
                JobKind::RebootVerify => self.inner.staged_patch(address).await?,
                _ => patch_file.clone(),
            };
            let job = self
                .inner
                .deps
                .jobs
                .create(Job::start(address, kind, patch_file))
                .await?;
            report.started.push(StartedJob {
                job_id: job.id,
                host: address,
            });
            self.inner.dispatch(claim, job, host).await;
        }

        info!(
            phase = %kind,
            started = report.jobs_started(),
            skipped = report.skipped.len(),
            "admission complete"
        );
        Ok(report)
    }
}

impl EngineInner {
    fn shutdown(&self) -> &CancellationToken {
        self.dispatcher.shutdown_token()
    }

    async fn publish(&self, job: &Job, payload: JobEventPayload) {
        let event = JobEvent::new(job.id, job.host, job.kind, payload);
        if let Err(err) = self.events.publish(event).await {
            warn!(job_id = %job.id, error = %err, "failed to publish job event");
        }
    }

    async fn dispatch(self: &Arc<Self>, claim: HostClaim, job: Job, host: Host) {
        self.publish(&job, JobEventPayload::Started).await;
        let span = info_span!(
            "job",
            job_id = %job.id,
            host = %job.host,
            phase = %job.kind
        );
        let inner = Arc::clone(self);
        self.dispatcher
            .spawn(claim, inner.run(job, host).instrument(span));
    }

    /// Patch file of the host's most recent successful stage.
    async fn staged_patch(&self, address: HostAddress) -> Result<Option<String>> {
        let filter = JobFilter::for_host(address)
            .with_kind(JobKind::Stage)
            .with_status(JobStatus::Success);
        let jobs = self.deps.jobs.list(&filter).await?;
        Ok(jobs.into_iter().next().and_then(|job| job.patch_file))
    }

    async fn run(self: Arc<Self>, mut job: Job, mut host: Host) {
        info!("job started");
        let result = match job.kind {
            JobKind::Precheck => self.execute_precheck(&mut host).await,
            JobKind::Stage => {
                let patch_file = job.patch_file.clone().unwrap_or_default();
                self.execute_stage(&mut host, &patch_file).await
            }
            JobKind::RebootVerify => self.execute_reboot(&mut host).await,
        };
        self.finish(&mut job, &mut host, result).await;
    }

    async fn finish(&self, job: &mut Job, host: &mut Host, result: WorkResult) {
        let (outcome, written, payload) = match result {
            Ok(()) => (
                PhaseOutcome::succeeded(job.kind),
                job.succeed(),
                JobEventPayload::Succeeded,
            ),
            Err(WorkError::Failed(message)) => {
                warn!(error = %message, "job failed");
                (
                    PhaseOutcome::failed(job.kind),
                    job.fail(message.clone()),
                    JobEventPayload::Failed { error: message },
                )
            }
            Err(WorkError::Cancelled) => {
                warn!("job interrupted by shutdown");
                (
                    PhaseOutcome::failed(job.kind),
                    job.fail(INTERRUPTED),
                    JobEventPayload::Failed {
                        error: INTERRUPTED.to_string(),
                    },
                )
            }
        };
        if let Err(err) = written {
            error!(error = %err, "job already completed");
            return;
        }

        if let Err(err) = host.apply(outcome) {
            error!(error = %err, "host outcome rejected");
        }
        if matches!(job.kind, JobKind::Precheck | JobKind::RebootVerify) {
            host.mark_checked(Utc::now());
        }

        if let Err(err) = self.deps.hosts.upsert(host.clone()).await {
            error!(error = %err, "failed to persist host");
        }
        if let Err(err) = self.deps.jobs.update(job.clone()).await {
            error!(error = %err, "failed to persist job");
        }
        info!(status = %job.status(), host_status = %host.status(), "job finished");
        self.publish(job, payload).await;
    }

    /// Awaits `work` unless shutdown fires first; dropping the future kills
    /// any child process it owns.
    async fn guard<T>(
        &self,
        work: impl Future<Output = T>,
    ) -> std::result::Result<T, WorkError> {
        tokio::select! {
            _ = self.shutdown().cancelled() => Err(WorkError::Cancelled),
            value = work => Ok(value),
        }
    }

    async fn run_playbook(
        &self,
        name: &str,
        address: HostAddress,
        params: &PlaybookParams,
    ) -> WorkResult {
        let outcome = self
            .guard(self.deps.executor.run(name, &[address], params))
            .await?
            .map_err(|err| WorkError::Failed(err.to_string()))?;
        if outcome.success {
            Ok(())
        } else {
            Err(WorkError::Failed(outcome.failure_detail()))
        }
    }

    async fn execute_precheck(&self, host: &mut Host) -> WorkResult {
        let address = host.address;
        let reachable = self.guard(self.deps.probe.reachable(address)).await?;
        host.ssh_reachable = reachable;
        if !reachable {
            return Err(WorkError::Failed(SSH_DISABLED.to_string()));
        }

        let info = self
            .guard(self.deps.probe.info(address))
            .await?
            .map_err(|err| WorkError::Failed(err.to_string()))?;
        host.current_build = Some(info.build);
        if !info.hostname.is_empty() {
            host.hostname = Some(info.hostname);
        }

        let capacity = select_datastore(
            &info.datastore_lines,
            self.config.precheck.min_free_gb,
        )
        .ok_or_else(|| {
            WorkError::Failed(insufficient_space(self.config.precheck.min_free_gb))
        })?;
        debug!(datastore = %capacity.name, free_gb = capacity.free_gb, "datastore selected");
        host.record_datastore(&capacity);

        self.run_playbook(playbooks::PRE_CHECKS, address, &PlaybookParams::new())
            .await
    }

    async fn execute_stage(&self, host: &mut Host, patch_file: &str) -> WorkResult {
        let address = host.address;
        let datastore = host
            .datastore_name
            .clone()
            .unwrap_or_else(|| self.config.stage.default_datastore.clone());
        let mut params = PlaybookParams::new();
        params.insert("patch_file".to_string(), patch_file.to_string());
        params.insert("target_host".to_string(), address.to_string());
        params.insert("datastore".to_string(), datastore);

        self.run_playbook(playbooks::PHASE1_STAGE, address, &params)
            .await?;
        host.target_build = target_build_from_patch(patch_file);
        if host.target_build.is_none() {
            warn!(patch_file, "patch file name carries no build");
        }
        Ok(())
    }

    async fn execute_reboot(&self, host: &mut Host) -> WorkResult {
        let address = host.address;
        let Some(target) =
            host.target_build.clone().filter(|target| !target.is_empty())
        else {
            return Err(WorkError::Failed(MISSING_TARGET_BUILD.to_string()));
        };
        let policy = match self.reboot_policy().await {
            Ok(policy) => policy,
            Err(err) => {
                warn!(error = %err, "settings unavailable, using configured reboot policy");
                self.config.reboot
            }
        };

        self.run_playbook(playbooks::PHASE2_REBOOT, address, &PlaybookParams::new())
            .await?;
        host.ssh_reachable = false;

        debug!(grace_secs = policy.grace_period_secs, "waiting for reboot");
        if !sleep_or_cancel(policy.grace_period(), self.shutdown()).await {
            return Err(WorkError::Cancelled);
        }

        let poll = RebootPoll::new(target, &policy);
        match wait_for_build(
            self.deps.probe.as_ref(),
            address,
            poll,
            self.shutdown(),
        )
        .await
        {
            PollVerdict::Matched { build, .. } => {
                host.ssh_reachable = true;
                host.current_build = Some(build);
                Ok(())
            }
            PollVerdict::Exhausted(reason) => {
                host.ssh_reachable = !matches!(reason, Exhaustion::NeverReachable);
                Err(WorkError::Failed(reason.to_string()))
            }
            PollVerdict::Cancelled => Err(WorkError::Cancelled),
        }
    }

    async fn refresh(self: Arc<Self>, mut host: Host) {
        let address = host.address;
        let reachable = match self.guard(self.deps.probe.reachable(address)).await {
            Ok(reachable) => reachable,
            Err(_) => return,
        };
        host.ssh_reachable = reachable;
        if reachable {
            match self.guard(self.deps.probe.info(address)).await {
                Ok(Ok(info)) => {
                    host.current_build = Some(info.build);
                    if !info.hostname.is_empty() {
                        host.hostname = Some(info.hostname);
                    }
                }
                Ok(Err(err)) => warn!(error = %err, "info probe failed"),
                Err(_) => return,
            }
        }
        host.mark_checked(Utc::now());

        // Facts only; the stored status is never rewritten by a refresh.
        let mut stored = match self.deps.hosts.get(address).await {
            Ok(stored) => stored,
            Err(err) => {
                error!(error = %err, "host vanished during refresh");
                return;
            }
        };
        stored.ssh_reachable = host.ssh_reachable;
        stored.current_build = host.current_build;
        stored.hostname = host.hostname;
        stored.last_checked_at = host.last_checked_at;
        if let Err(err) = self.deps.hosts.upsert(stored).await {
            error!(error = %err, "failed to persist refreshed host");
        }
        info!(reachable, "host refreshed");
    }

    async fn reboot_policy(&self) -> Result<RebootPolicy> {
        let mut policy = self.config.reboot;
        let settings = &self.deps.settings;

        if let Some(raw) = settings.get(setting_keys::REBOOT_GRACE_PERIOD_SECS).await?
        {
            match raw.trim().parse::<u64>() {
                Ok(value) => policy.grace_period_secs = value,
                Err(_) => warn!(
                    key = setting_keys::REBOOT_GRACE_PERIOD_SECS,
                    value = %raw,
                    "ignoring unparsable setting"
                ),
            }
        }
        if let Some(raw) = settings.get(setting_keys::REBOOT_MAX_ATTEMPTS).await? {
            match raw.trim().parse::<u32>() {
                Ok(value) if value > 0 => policy.max_attempts = value,
                _ => warn!(
                    key = setting_keys::REBOOT_MAX_ATTEMPTS,
                    value = %raw,
                    "ignoring unparsable setting"
                ),
            }
        }
        if let Some(raw) = settings.get(setting_keys::REBOOT_POLL_INTERVAL_SECS).await?
        {
            match raw.trim().parse::<u64>() {
                Ok(value) => policy.poll_interval_secs = value,
                Err(_) => warn!(
                    key = setting_keys::REBOOT_POLL_INTERVAL_SECS,
                    value = %raw,
                    "ignoring unparsable setting"
                ),
            }
        }
        Ok(policy)
    }
}
