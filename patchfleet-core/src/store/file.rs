use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use patchfleet_model::{Host, HostAddress, Job, JobFilter, JobId, Setting};
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    FleetSnapshot, HostPredicate, HostRegistry, InMemoryFleetStore,
    JobTracker, SettingsStore,
};
use crate::error::Result;

/// JSON snapshot store. Reads go to the in-memory copy; every mutation
/// rewrites the snapshot file through a temp file and rename.
pub struct FileFleetStore {
    path: PathBuf,
    inner: InMemoryFleetStore,
    flush_lock: Mutex<()>,
}

impl fmt::Debug for FileFleetStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileFleetStore")
            .field("path", &self.path)
            .field("inner", &self.inner)
            .finish()
    }
}

impl FileFleetStore {
    /// Opens the snapshot at `path`, starting empty when the file is absent.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => FleetSnapshot::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                FleetSnapshot::default()
            }
            Err(err) => return Err(err.into()),
        };
        debug!(
            path = %path.display(),
            hosts = snapshot.hosts.len(),
            jobs = snapshot.jobs.len(),
            "loaded fleet snapshot"
        );
        Ok(Self {
            path,
            inner: InMemoryFleetStore::from_snapshot(snapshot),
            flush_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock().await;
        let snapshot = self.inner.snapshot().await;
        let encoded = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, encoded).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl HostRegistry for FileFleetStore {
    async fn get(&self, address: HostAddress) -> Result<Host> {
        HostRegistry::get(&self.inner, address).await
    }

    async fn upsert(&self, host: Host) -> Result<Host> {
        let stored = self.inner.upsert(host).await?;
        self.flush().await?;
        Ok(stored)
    }

    async fn list_by(&self, predicate: HostPredicate<'_>) -> Result<Vec<Host>> {
        self.inner.list_by(predicate).await
    }
}

#[async_trait]
impl JobTracker for FileFleetStore {
    async fn create(&self, job: Job) -> Result<Job> {
        let stored = self.inner.create(job).await?;
        self.flush().await?;
        Ok(stored)
    }

    async fn update(&self, job: Job) -> Result<Job> {
        let stored = JobTracker::update(&self.inner, job).await?;
        self.flush().await?;
        Ok(stored)
    }

    async fn get(&self, id: JobId) -> Result<Job> {
        JobTracker::get(&self.inner, id).await
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.inner.list(filter).await
    }
}

#[async_trait]
impl SettingsStore for FileFleetStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        SettingsStore::get(&self.inner, key).await
    }

    async fn update(&self, values: BTreeMap<String, String>) -> Result<()> {
        SettingsStore::update(&self.inner, values).await?;
        self.flush().await
    }

    async fn all(&self) -> Result<Vec<Setting>> {
        self.inner.all().await
    }
}
