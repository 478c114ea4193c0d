//! Bounded fixed-interval polling used after a reboot.
//!
//! [`RebootPoll`] is a pure state machine over the attempt counter and the
//! last observation; [`wait_for_build`] drives it with the tokio timer so the
//! whole loop is deterministic under paused time.

use std::{fmt, time::Duration};

use patchfleet_model::HostAddress;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{build::build_matches, config::RebootPolicy};
use crate::remote::ConnectivityProbe;

/// What one poll round saw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observation {
    Unreachable,
    /// Reachable, but the info fetch failed.
    ProbeFailed(String),
    Build(String),
}

/// Why polling stopped without a match. Derived from the final round only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Exhaustion {
    NeverReachable,
    BuildMismatch { expected: String, observed: String },
    BuildUnreadable { error: String },
}

impl fmt::Display for Exhaustion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exhaustion::NeverReachable => {
                f.write_str("Host did not come back online within timeout")
            }
            Exhaustion::BuildMismatch { expected, observed } => write!(
                f,
                "Host came back online but build mismatch: expected {expected}, observed {observed}"
            ),
            Exhaustion::BuildUnreadable { error } => write!(
                f,
                "Host came back online but build could not be read: {error}"
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollDecision {
    Matched { build: String, attempt: u32 },
    /// Sleep `after`, then observe again.
    Retry { after: Duration },
    /// Sleep `after`, then report `reason`.
    GiveUp { after: Duration, reason: Exhaustion },
}

#[derive(Clone, Debug)]
pub struct RebootPoll {
    target: String,
    max_attempts: u32,
    interval: Duration,
    attempt: u32,
}

impl RebootPoll {
    pub fn new(target: impl Into<String>, policy: &RebootPolicy) -> Self {
        Self {
            target: target.into(),
            max_attempts: policy.max_attempts.max(1),
            interval: policy.poll_interval(),
            attempt: 0,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Attempts consumed so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Feeds the next round's observation. A match ends polling at once;
    /// otherwise every round, the last included, is followed by one interval.
    pub fn observe(&mut self, observation: Observation) -> PollDecision {
        self.attempt += 1;

        if let Observation::Build(build) = &observation
            && build_matches(build, &self.target)
        {
            return PollDecision::Matched {
                build: build.clone(),
                attempt: self.attempt,
            };
        }

        if self.attempt < self.max_attempts {
            return PollDecision::Retry {
                after: self.interval,
            };
        }

        let reason = match observation {
            Observation::Unreachable => Exhaustion::NeverReachable,
            Observation::ProbeFailed(error) => {
                Exhaustion::BuildUnreadable { error }
            }
            Observation::Build(observed) => Exhaustion::BuildMismatch {
                expected: self.target.clone(),
                observed,
            },
        };
        PollDecision::GiveUp {
            after: self.interval,
            reason,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollVerdict {
    Matched { build: String, attempt: u32 },
    Exhausted(Exhaustion),
    Cancelled,
}

/// Sleeps for `duration` unless `shutdown` fires first. Returns `false` when
/// cancelled.
pub async fn sleep_or_cancel(
    duration: Duration,
    shutdown: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

pub async fn observe_once(
    probe: &dyn ConnectivityProbe,
    address: HostAddress,
) -> Observation {
    if !probe.reachable(address).await {
        return Observation::Unreachable;
    }
    match probe.info(address).await {
        Ok(info) => Observation::Build(info.build),
        Err(err) => Observation::ProbeFailed(err.to_string()),
    }
}

/// Polls `address` until its build contains the poll target, the attempt
/// budget runs out, or `shutdown` fires.
pub async fn wait_for_build(
    probe: &dyn ConnectivityProbe,
    address: HostAddress,
    mut poll: RebootPoll,
    shutdown: &CancellationToken,
) -> PollVerdict {
    loop {
        if shutdown.is_cancelled() {
            return PollVerdict::Cancelled;
        }
        let observation = observe_once(probe, address).await;
        debug!(
            host = %address,
            attempt = poll.attempt() + 1,
            ?observation,
            "reboot poll round"
        );

        match poll.observe(observation) {
            PollDecision::Matched { build, attempt } => {
                info!(host = %address, attempt, %build, "host back on target build");
                return PollVerdict::Matched { build, attempt };
            }
            PollDecision::Retry { after } => {
                if !sleep_or_cancel(after, shutdown).await {
                    return PollVerdict::Cancelled;
                }
            }
            PollDecision::GiveUp { after, reason } => {
                if !sleep_or_cancel(after, shutdown).await {
                    return PollVerdict::Cancelled;
                }
                return PollVerdict::Exhausted(reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RebootPolicy {
        RebootPolicy {
            grace_period_secs: 120,
            max_attempts,
            poll_interval_secs: 30,
        }
    }

    #[test]
    fn match_stops_immediately() {
        let mut poll = RebootPoll::new("7.0U3", &policy(20));
        assert_eq!(
            poll.observe(Observation::Unreachable),
            PollDecision::Retry {
                after: Duration::from_secs(30)
            }
        );
        assert_eq!(
            poll.observe(Observation::Build("VMware ESXi 7.0U3".into())),
            PollDecision::Matched {
                build: "VMware ESXi 7.0U3".into(),
                attempt: 2
            }
        );
    }

    #[test]
    fn last_round_decides_the_reason() {
        let mut poll = RebootPoll::new("7.0U3", &policy(2));
        poll.observe(Observation::Build("7.0U2".into()));
        assert_eq!(
            poll.observe(Observation::Unreachable),
            PollDecision::GiveUp {
                after: Duration::from_secs(30),
                reason: Exhaustion::NeverReachable
            }
        );

        let mut poll = RebootPoll::new("7.0U3", &policy(2));
        poll.observe(Observation::Unreachable);
        let decision = poll.observe(Observation::Build("7.0U2".into()));
        assert_eq!(
            decision,
            PollDecision::GiveUp {
                after: Duration::from_secs(30),
                reason: Exhaustion::BuildMismatch {
                    expected: "7.0U3".into(),
                    observed: "7.0U2".into()
                }
            }
        );
    }

    #[test]
    fn unreadable_build_is_reported_distinctly() {
        let mut poll = RebootPoll::new("7.0U3", &policy(1));
        let PollDecision::GiveUp { reason, .. } =
            poll.observe(Observation::ProbeFailed("no banner".into()))
        else {
            panic!("single attempt must give up");
        };
        assert_eq!(
            reason.to_string(),
            "Host came back online but build could not be read: no banner"
        );
    }

    #[test]
    fn exhaustion_messages_differ() {
        let timeout = Exhaustion::NeverReachable.to_string();
        let mismatch = Exhaustion::BuildMismatch {
            expected: "7.0U3".into(),
            observed: "7.0U2".into(),
        }
        .to_string();
        assert_eq!(timeout, "Host did not come back online within timeout");
        assert!(mismatch.contains("expected 7.0U3"));
        assert!(mismatch.contains("observed 7.0U2"));
        assert_ne!(timeout, mismatch);
    }

    #[test]
    fn zero_attempts_still_polls_once() {
        let mut poll = RebootPoll::new("7.0U3", &policy(0));
        assert!(matches!(
            poll.observe(Observation::Unreachable),
            PollDecision::GiveUp { .. }
        ));
    }
}
