//! Repository contracts for hosts, jobs and settings.
//!
//! The stores carry no business logic. The orchestration engine is the only
//! writer of host status and job outcome semantics; the stores only enforce
//! the invariants the model already declares (one terminal job write).

use std::collections::BTreeMap;

use async_trait::async_trait;
use patchfleet_model::{Host, HostAddress, Job, JobFilter, JobId, Setting};

use crate::error::Result;

mod file;
mod memory;

pub use file::FileFleetStore;
pub use memory::{FleetSnapshot, InMemoryFleetStore};

/// Predicate accepted by [`HostRegistry::list_by`].
pub type HostPredicate<'a> = &'a (dyn Fn(&Host) -> bool + Send + Sync);

/// Key-indexed repository of managed hosts.
#[async_trait]
pub trait HostRegistry: Send + Sync {
    /// Returns the host or [`FleetError::NotFound`](crate::FleetError).
    async fn get(&self, address: HostAddress) -> Result<Host>;

    /// Inserts or replaces the host, stamping `updated_at`.
    async fn upsert(&self, host: Host) -> Result<Host>;

    async fn list_by(&self, predicate: HostPredicate<'_>) -> Result<Vec<Host>>;

    async fn list_all(&self) -> Result<Vec<Host>> {
        self.list_by(&|_: &Host| true).await
    }
}

/// Repository of orchestration attempts.
#[async_trait]
pub trait JobTracker: Send + Sync {
    async fn create(&self, job: Job) -> Result<Job>;

    /// Replaces a stored job. Refused once the stored copy is terminal.
    async fn update(&self, job: Job) -> Result<Job>;

    async fn get(&self, id: JobId) -> Result<Job>;

    /// Matching jobs, newest first.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>>;
}

/// Flat key/value settings, mutated only by explicit updates.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn update(&self, values: BTreeMap<String, String>) -> Result<()>;

    /// All settings ordered by key.
    async fn all(&self) -> Result<Vec<Setting>>;
}
