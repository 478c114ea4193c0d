use async_trait::async_trait;
use chrono::{DateTime, Utc};
use patchfleet_model::{HostAddress, JobId, JobKind};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

/// Lifecycle transition of one job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobEventPayload {
    Started,
    Succeeded,
    Failed { error: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub host: HostAddress,
    pub kind: JobKind,
    pub at: DateTime<Utc>,
    pub payload: JobEventPayload,
}

impl JobEvent {
    pub fn new(
        job_id: JobId,
        host: HostAddress,
        kind: JobKind,
        payload: JobEventPayload,
    ) -> Self {
        Self {
            job_id,
            host,
            kind,
            at: Utc::now(),
            payload,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.payload, JobEventPayload::Started)
    }
}

#[async_trait]
pub trait JobEventPublisher: Send + Sync {
    async fn publish(&self, event: JobEvent) -> Result<()>;
}

/// Fans job notifications out to in-process observers. Publishing never
/// fails; events sent while nobody listens are dropped.
#[derive(Debug)]
pub struct InProcJobEventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl InProcJobEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl JobEventPublisher for InProcJobEventBus {
    async fn publish(&self, event: JobEvent) -> Result<()> {
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = InProcJobEventBus::new(8);
        let mut rx = bus.subscribe();
        let host = HostAddress::parse("10.0.0.1").unwrap();
        let job_id = JobId::new();

        bus.publish(JobEvent::new(
            job_id,
            host,
            JobKind::Precheck,
            JobEventPayload::Started,
        ))
        .await
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, job_id);
        assert!(!event.is_terminal());
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_ok() {
        let bus = InProcJobEventBus::new(1);
        let event = JobEvent::new(
            JobId::new(),
            HostAddress::parse("10.0.0.2").unwrap(),
            JobKind::Stage,
            JobEventPayload::Failed {
                error: "boom".into(),
            },
        );
        assert!(bus.publish(event).await.is_ok());
    }
}
