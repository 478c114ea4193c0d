use chrono::{DateTime, Utc};
use patchfleet_model::{Host, HostStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    admission::AdmissionReport, config::SweepConfig,
    engine::OrchestrationEngine,
};
use crate::error::Result;

/// Re-drives reboot verification for hosts parked in `phase1_completed`.
#[derive(Clone, Debug)]
pub struct PeriodicSweeper {
    engine: OrchestrationEngine,
    config: SweepConfig,
}

impl PeriodicSweeper {
    pub fn new(engine: OrchestrationEngine, config: SweepConfig) -> Self {
        Self { engine, config }
    }

    /// Whether `host` has sat staged for longer than the threshold at `now`.
    pub fn is_stale(&self, host: &Host, now: DateTime<Utc>) -> bool {
        if host.status() != HostStatus::Phase1Completed {
            return false;
        }
        let stale_after =
            chrono::Duration::from_std(self.config.stale_after())
                .unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(host.updated_at) > stale_after
    }

    /// One pass: reboot-verify every stale host. Hosts already busy are
    /// skipped by admission.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<AdmissionReport> {
        let stale = self
            .engine
            .hosts_by(&|host: &Host| self.is_stale(host, now))
            .await?;
        if stale.is_empty() {
            debug!("no stale staged hosts");
            return Ok(AdmissionReport::default());
        }

        let addresses: Vec<String> =
            stale.iter().map(|host| host.address.to_string()).collect();
        let report = self.engine.reboot_verify(&addresses).await?;
        info!(
            stale = addresses.len(),
            started = report.jobs_started(),
            "sweep dispatched reboot verification"
        );
        Ok(report)
    }

    /// Sweeps every interval until `shutdown` fires. The first sweep runs
    /// one interval after start.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.config.enabled {
                info!("periodic sweep disabled");
                return;
            }
            info!(
                interval_secs = self.config.interval_secs,
                stale_after_secs = self.config.stale_after_secs,
                "periodic sweep started"
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("periodic sweep shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(self.config.interval()) => {
                        if let Err(err) = self.sweep_once(Utc::now()).await {
                            warn!(error = %err, "periodic sweep failed");
                        }
                    }
                }
            }
        })
    }
}
