//! Stub collaborators and fixtures shared by the orchestration tests.
#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use patchfleet_core::{
    EngineDeps, FleetError, OrchestrationEngine, OrchestratorConfig, Result,
    remote::{
        ConnectivityProbe, HostInfo, PlaybookExecutor, PlaybookOutcome,
        PlaybookParams,
    },
    store::{HostRegistry, InMemoryFleetStore, JobTracker},
};
use patchfleet_model::{
    Host, HostAddress, Job, JobFilter, PrecheckOutcome, StageOutcome,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const ROOMY_DATASTORE: &str = "vmfs 10G 5G 5G 50% /vmfs/volumes/datastore1";
pub const CRAMPED_DATASTORE: &str =
    "vmfs 10G 9G 1G 90% /vmfs/volumes/datastore1";

pub fn addr(raw: &str) -> HostAddress {
    HostAddress::parse(raw).unwrap()
}

/// Reachability as seen by one probe call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Down,
    Up(&'static str),
    /// Reachable, but the info fetch errors.
    Garbled,
}

#[derive(Debug)]
struct ProbeHost {
    fallback: Step,
    script: VecDeque<Step>,
    current: Step,
    hostname: String,
    datastore_lines: Vec<String>,
}

/// Probe whose answers are scripted per host. Each `reachable` call consumes
/// the next scripted step, falling back to a fixed answer once the script
/// runs dry; `info` reports on the step last consumed.
#[derive(Debug, Default)]
pub struct StubProbe {
    hosts: Mutex<HashMap<HostAddress, ProbeHost>>,
    polls: Mutex<Vec<(HostAddress, Instant)>>,
}

impl StubProbe {
    pub fn host(
        &self,
        address: HostAddress,
        fallback: Step,
        datastore_lines: &[&str],
    ) -> &Self {
        self.hosts.lock().unwrap().insert(
            address,
            ProbeHost {
                current: fallback.clone(),
                fallback,
                script: VecDeque::new(),
                hostname: format!("esx-{}", address.ip().octets()[3]),
                datastore_lines: datastore_lines
                    .iter()
                    .map(|line| line.to_string())
                    .collect(),
            },
        );
        self
    }

    pub fn script(&self, address: HostAddress, steps: &[Step]) -> &Self {
        let mut hosts = self.hosts.lock().unwrap();
        let host = hosts.get_mut(&address).expect("host configured");
        host.script = steps.iter().cloned().collect();
        self
    }

    /// Instants of every reachability call made for `address`.
    pub fn polls(&self, address: HostAddress) -> Vec<Instant> {
        self.polls
            .lock()
            .unwrap()
            .iter()
            .filter(|(host, _)| *host == address)
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait]
impl ConnectivityProbe for StubProbe {
    async fn reachable(&self, address: HostAddress) -> bool {
        self.polls.lock().unwrap().push((address, Instant::now()));
        let mut hosts = self.hosts.lock().unwrap();
        let Some(host) = hosts.get_mut(&address) else {
            return false;
        };
        let step = host.script.pop_front().unwrap_or(host.fallback.clone());
        host.current = step;
        host.current != Step::Down
    }

    async fn info(&self, address: HostAddress) -> Result<HostInfo> {
        let hosts = self.hosts.lock().unwrap();
        let host = hosts
            .get(&address)
            .ok_or_else(|| FleetError::Probe(format!("{address} unknown")))?;
        match &host.current {
            Step::Up(build) => Ok(HostInfo {
                build: build.to_string(),
                hostname: host.hostname.clone(),
                datastore_lines: host.datastore_lines.clone(),
            }),
            Step::Down => Err(FleetError::Probe("connection refused".into())),
            Step::Garbled => {
                Err(FleetError::Probe("host did not report a build version".into()))
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlaybookCall {
    pub name: String,
    pub hosts: Vec<HostAddress>,
    pub params: PlaybookParams,
}

/// Executor that records calls and succeeds unless told otherwise.
#[derive(Debug, Default)]
pub struct StubExecutor {
    failures: Mutex<HashMap<String, PlaybookOutcome>>,
    calls: Mutex<Vec<PlaybookCall>>,
}

impl StubExecutor {
    pub fn fail(&self, playbook: &str, stderr: &str) -> &Self {
        self.failures
            .lock()
            .unwrap()
            .insert(playbook.to_string(), PlaybookOutcome::failed(stderr));
        self
    }

    pub fn calls(&self) -> Vec<PlaybookCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_named(&self, name: &str) -> Vec<PlaybookCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.name == name)
            .collect()
    }
}

#[async_trait]
impl PlaybookExecutor for StubExecutor {
    async fn run(
        &self,
        name: &str,
        hosts: &[HostAddress],
        params: &PlaybookParams,
    ) -> Result<PlaybookOutcome> {
        self.calls.lock().unwrap().push(PlaybookCall {
            name: name.to_string(),
            hosts: hosts.to_vec(),
            params: params.clone(),
        });
        Ok(self
            .failures
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| PlaybookOutcome::succeeded("ok=1 changed=1")))
    }
}

pub struct Harness {
    pub store: Arc<InMemoryFleetStore>,
    pub probe: Arc<StubProbe>,
    pub executor: Arc<StubExecutor>,
    pub engine: OrchestrationEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let store = Arc::new(InMemoryFleetStore::new());
        let probe = Arc::new(StubProbe::default());
        let executor = Arc::new(StubExecutor::default());
        let deps = EngineDeps::from_store(
            store.clone(),
            probe.clone(),
            executor.clone(),
        );
        let engine =
            OrchestrationEngine::new(deps, config, CancellationToken::new());
        Self {
            store,
            probe,
            executor,
            engine,
        }
    }

    pub async fn register(&self, raw: &[&str]) {
        self.engine.register_hosts(raw).await.unwrap();
    }

    /// Seeds a host directly in `phase1_completed` with `target_build`.
    pub async fn seed_staged(&self, raw: &str, target_build: &str) -> HostAddress {
        let address = addr(raw);
        let mut host = Host::new(address);
        host.apply(PrecheckOutcome::Passed).unwrap();
        host.apply(StageOutcome::Completed).unwrap();
        host.target_build = Some(target_build.to_string());
        self.store.upsert(host).await.unwrap();
        address
    }

    pub async fn host(&self, address: HostAddress) -> Host {
        HostRegistry::get(self.store.as_ref(), address).await.unwrap()
    }

    pub async fn jobs_for(&self, address: HostAddress) -> Vec<Job> {
        JobTracker::list(self.store.as_ref(), &JobFilter::for_host(address))
            .await
            .unwrap()
    }

    /// The single job recorded for `address`.
    pub async fn only_job(&self, address: HostAddress) -> Job {
        let mut jobs = self.jobs_for(address).await;
        assert_eq!(jobs.len(), 1, "expected exactly one job for {address}");
        jobs.remove(0)
    }
}
