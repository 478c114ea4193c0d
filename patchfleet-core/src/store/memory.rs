use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use patchfleet_model::{
    Host, HostAddress, Job, JobFilter, JobId, ModelError, Setting,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{HostPredicate, HostRegistry, JobTracker, SettingsStore};
use crate::error::{FleetError, Result};

/// Serializable image of every record held by a store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FleetSnapshot {
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub settings: Vec<Setting>,
}

#[derive(Default)]
struct StoreState {
    hosts: BTreeMap<HostAddress, Host>,
    jobs: HashMap<JobId, Job>,
    settings: BTreeMap<String, Setting>,
}

impl StoreState {
    fn from_snapshot(snapshot: FleetSnapshot) -> Self {
        Self {
            hosts: snapshot
                .hosts
                .into_iter()
                .map(|host| (host.address, host))
                .collect(),
            jobs: snapshot.jobs.into_iter().map(|job| (job.id, job)).collect(),
            settings: snapshot
                .settings
                .into_iter()
                .map(|setting| (setting.key.clone(), setting))
                .collect(),
        }
    }

    fn snapshot(&self) -> FleetSnapshot {
        let mut jobs: Vec<Job> = self.jobs.values().cloned().collect();
        jobs.sort_by_key(|job| (job.started_at, job.id));
        FleetSnapshot {
            hosts: self.hosts.values().cloned().collect(),
            jobs,
            settings: self.settings.values().cloned().collect(),
        }
    }
}

/// Process-local store backing all three repositories. Cloning shares the
/// underlying state.
#[derive(Clone, Default)]
pub struct InMemoryFleetStore {
    state: Arc<RwLock<StoreState>>,
}

impl fmt::Debug for InMemoryFleetStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryFleetStore");
        match self.state.try_read() {
            Ok(state) => {
                debug
                    .field("hosts", &state.hosts.len())
                    .field("jobs", &state.jobs.len())
                    .field("settings", &state.settings.len());
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryFleetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: FleetSnapshot) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::from_snapshot(snapshot))),
        }
    }

    pub async fn snapshot(&self) -> FleetSnapshot {
        self.state.read().await.snapshot()
    }
}

#[async_trait]
impl HostRegistry for InMemoryFleetStore {
    async fn get(&self, address: HostAddress) -> Result<Host> {
        self.state
            .read()
            .await
            .hosts
            .get(&address)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("host {address}")))
    }

    async fn upsert(&self, mut host: Host) -> Result<Host> {
        host.updated_at = Utc::now();
        let mut state = self.state.write().await;
        state.hosts.insert(host.address, host.clone());
        Ok(host)
    }

    async fn list_by(&self, predicate: HostPredicate<'_>) -> Result<Vec<Host>> {
        let state = self.state.read().await;
        Ok(state
            .hosts
            .values()
            .filter(|host| predicate(*host))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl JobTracker for InMemoryFleetStore {
    async fn create(&self, job: Job) -> Result<Job> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.id) {
            return Err(FleetError::Internal(format!(
                "job {} already exists",
                job.id
            )));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn update(&self, job: Job) -> Result<Job> {
        let mut state = self.state.write().await;
        let stored = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| FleetError::NotFound(format!("job {}", job.id)))?;
        if stored.is_terminal() {
            return Err(ModelError::JobAlreadyCompleted(job.id).into());
        }
        *stored = job.clone();
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job> {
        self.state
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("job {id}")))
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| filter.matches(*job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            b.started_at.cmp(&a.started_at).then_with(|| b.id.cmp(&a.id))
        });
        Ok(jobs)
    }
}

#[async_trait]
impl SettingsStore for InMemoryFleetStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let state = self.state.read().await;
        Ok(state.settings.get(key).map(|setting| setting.value.clone()))
    }

    async fn update(&self, values: BTreeMap<String, String>) -> Result<()> {
        let mut state = self.state.write().await;
        for (key, value) in values {
            state
                .settings
                .insert(key.clone(), Setting::new(key, value));
        }
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Setting>> {
        let state = self.state.read().await;
        Ok(state.settings.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchfleet_model::{HostStatus, JobKind, JobStatus, PrecheckOutcome};

    fn addr(raw: &str) -> HostAddress {
        HostAddress::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn get_unknown_host_is_not_found() {
        let store = InMemoryFleetStore::new();
        let err = HostRegistry::get(&store, addr("10.0.0.9"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_by_filters_on_status() {
        let store = InMemoryFleetStore::new();
        let mut passed = Host::new(addr("10.0.0.1"));
        passed.apply(PrecheckOutcome::Passed).unwrap();
        store.upsert(passed).await.unwrap();
        store.upsert(Host::new(addr("10.0.0.2"))).await.unwrap();

        let pending = store
            .list_by(&|host: &Host| host.status() == HostStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].address, addr("10.0.0.2"));
    }

    #[tokio::test]
    async fn completed_job_cannot_be_rewritten() {
        let store = InMemoryFleetStore::new();
        let job = store
            .create(Job::start(addr("10.0.0.1"), JobKind::Precheck, None))
            .await
            .unwrap();

        let mut done = job.clone();
        done.succeed().unwrap();
        JobTracker::update(&store, done).await.unwrap();

        let mut late = job;
        late.fail("late writer").unwrap();
        let err = JobTracker::update(&store, late).await.unwrap_err();
        assert!(matches!(
            err,
            FleetError::Model(ModelError::JobAlreadyCompleted(_))
        ));

        let stored = JobTracker::list(&store, &JobFilter::default())
            .await
            .unwrap();
        assert_eq!(stored[0].status(), JobStatus::Success);
    }

    #[tokio::test]
    async fn settings_update_overwrites_and_leaves_others_unset() {
        let store = InMemoryFleetStore::new();
        let mut values = BTreeMap::new();
        values.insert("reboot.max_attempts".to_string(), "5".to_string());
        SettingsStore::update(&store, values).await.unwrap();

        assert_eq!(
            SettingsStore::get(&store, "reboot.max_attempts")
                .await
                .unwrap()
                .as_deref(),
            Some("5")
        );
        assert!(
            SettingsStore::get(&store, "reboot.poll_interval_secs")
                .await
                .unwrap()
                .is_none()
        );
    }
}
