use std::{fmt, future::Future, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};
use patchfleet_model::{HostAddress, JobKind};
use serde::Serialize;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::trace;

/// Unit of work a host can be busy with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    Precheck,
    Stage,
    RebootVerify,
    Refresh,
}

impl WorkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkKind::Precheck => "precheck",
            WorkKind::Stage => "stage",
            WorkKind::RebootVerify => "reboot_verify",
            WorkKind::Refresh => "refresh",
        }
    }
}

impl From<JobKind> for WorkKind {
    fn from(kind: JobKind) -> Self {
        match kind {
            JobKind::Precheck => WorkKind::Precheck,
            JobKind::Stage => WorkKind::Stage,
            JobKind::RebootVerify => WorkKind::RebootVerify,
        }
    }
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type InFlight = Arc<DashMap<HostAddress, WorkKind>>;

/// Exclusive right to run work against one host. Released on drop.
pub struct HostClaim {
    address: HostAddress,
    kind: WorkKind,
    in_flight: InFlight,
}

impl HostClaim {
    pub fn address(&self) -> HostAddress {
        self.address
    }

    pub fn kind(&self) -> WorkKind {
        self.kind
    }
}

impl fmt::Debug for HostClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostClaim")
            .field("address", &self.address)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for HostClaim {
    fn drop(&mut self) {
        self.in_flight.remove(&self.address);
        trace!(host = %self.address, kind = %self.kind, "host claim released");
    }
}

/// Single coordination point for per-host background work.
///
/// A host carries at most one in-flight unit of work regardless of phase;
/// the claim is taken before the spawned task exists and travels with it.
#[derive(Clone)]
pub struct TaskDispatcher {
    in_flight: InFlight,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("in_flight", &self.in_flight.len())
            .field("tasks", &self.tracker.len())
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl TaskDispatcher {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    /// Claims `address` for `kind`, or returns the work already running.
    pub fn try_claim(
        &self,
        address: HostAddress,
        kind: WorkKind,
    ) -> Result<HostClaim, WorkKind> {
        match self.in_flight.entry(address) {
            Entry::Occupied(existing) => Err(*existing.get()),
            Entry::Vacant(slot) => {
                slot.insert(kind);
                Ok(HostClaim {
                    address,
                    kind,
                    in_flight: Arc::clone(&self.in_flight),
                })
            }
        }
    }

    pub fn in_flight(&self, address: HostAddress) -> Option<WorkKind> {
        self.in_flight.get(&address).map(|entry| *entry.value())
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Runs `work` in the background while holding `claim`.
    pub fn spawn<F>(&self, claim: HostClaim, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(async move {
            let _claim = claim;
            work.await;
        });
    }

    /// Waits until every spawned unit of work has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Signals cancellation and waits for the running work to wind down.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
