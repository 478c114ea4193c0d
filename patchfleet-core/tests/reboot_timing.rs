mod support;

use std::{collections::BTreeMap, time::Duration};

use patchfleet_core::{orchestration::JobEventPayload, remote::playbooks};
use patchfleet_model::{HostStatus, JobStatus};
use support::{Harness, Step};
use tokio::time::Instant;

const TIMEOUT_MESSAGE: &str = "Host did not come back online within timeout";

fn assert_elapsed(elapsed: Duration, expected_secs: u64) {
    let expected = Duration::from_secs(expected_secs);
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_secs(1),
        "expected ~{expected:?}, took {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn exhaustion_takes_grace_plus_every_interval() {
    let h = Harness::new();
    let a = h.seed_staged("10.20.0.1", "7.0U3").await;
    h.probe.host(a, Step::Down, &[]);

    let started = Instant::now();
    h.engine.reboot_verify(&["10.20.0.1"]).await.unwrap();
    h.engine.wait_idle().await;

    assert_elapsed(started.elapsed(), 120 + 20 * 30);
    assert_eq!(h.probe.polls(a).len(), 20);
    assert_eq!(h.executor.calls_named(playbooks::PHASE2_REBOOT).len(), 1);

    let host = h.host(a).await;
    assert_eq!(host.status(), HostStatus::Phase2Failed);
    assert!(!host.ssh_reachable);
    assert!(host.last_checked_at.is_some());
    let job = h.only_job(a).await;
    assert_eq!(job.status(), JobStatus::Failed);
    assert_eq!(job.error_message(), Some(TIMEOUT_MESSAGE));
}

#[tokio::test(start_paused = true)]
async fn early_match_on_third_attempt_stops_polling() {
    let h = Harness::new();
    let a = h.seed_staged("10.20.0.2", "7.0U3").await;
    h.probe.host(a, Step::Up("VMware ESXi 7.0U3"), &[]);
    h.probe.script(a, &[Step::Down, Step::Down]);

    let started = Instant::now();
    h.engine.reboot_verify(&["10.20.0.2"]).await.unwrap();
    h.engine.wait_idle().await;

    assert_elapsed(started.elapsed(), 120 + 2 * 30);
    let polls = h.probe.polls(a);
    assert_eq!(polls.len(), 3);
    assert_elapsed(polls[1] - polls[0], 30);
    assert_elapsed(polls[2] - polls[1], 30);

    let host = h.host(a).await;
    assert_eq!(host.status(), HostStatus::PatchingCompleted);
    assert_eq!(host.current_build.as_deref(), Some("VMware ESXi 7.0U3"));
    assert_eq!(h.only_job(a).await.status(), JobStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn mismatch_on_final_attempt_names_both_builds() {
    let h = Harness::new();
    let a = h.seed_staged("10.20.0.3", "7.0U3").await;
    h.probe.host(a, Step::Up("VMware ESXi 7.0U2"), &[]);

    h.engine.reboot_verify(&["10.20.0.3"]).await.unwrap();
    h.engine.wait_idle().await;

    let host = h.host(a).await;
    assert_eq!(host.status(), HostStatus::Phase2Failed);
    assert!(host.ssh_reachable);
    let job = h.only_job(a).await;
    let message = job.error_message().unwrap();
    assert_ne!(message, TIMEOUT_MESSAGE);
    assert!(message.contains("expected 7.0U3"), "{message}");
    assert!(message.contains("observed VMware ESXi 7.0U2"), "{message}");
}

#[tokio::test(start_paused = true)]
async fn unreadable_build_on_final_attempt_is_not_a_timeout() {
    let h = Harness::new();
    let a = h.seed_staged("10.20.0.4", "7.0U3").await;
    h.probe.host(a, Step::Garbled, &[]);

    h.engine.reboot_verify(&["10.20.0.4"]).await.unwrap();
    h.engine.wait_idle().await;

    let job = h.only_job(a).await;
    let message = job.error_message().unwrap();
    assert_ne!(message, TIMEOUT_MESSAGE);
    assert!(message.contains("could not be read"), "{message}");
}

#[tokio::test(start_paused = true)]
async fn reboot_playbook_failure_aborts_before_polling() {
    let h = Harness::new();
    let a = h.seed_staged("10.20.0.5", "7.0U3").await;
    h.probe.host(a, Step::Up("VMware ESXi 7.0U3"), &[]);
    h.executor.fail(playbooks::PHASE2_REBOOT, "reboot refused");

    let started = Instant::now();
    h.engine.reboot_verify(&["10.20.0.5"]).await.unwrap();
    h.engine.wait_idle().await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(h.probe.polls(a).is_empty());
    assert_eq!(h.host(a).await.status(), HostStatus::Phase2Failed);
    assert_eq!(h.only_job(a).await.error_message(), Some("reboot refused"));
}

#[tokio::test(start_paused = true)]
async fn hosts_poll_independently() {
    let h = Harness::new();
    let slow = h.seed_staged("10.20.1.1", "7.0U3").await;
    let fast = h.seed_staged("10.20.1.2", "7.0U3").await;
    h.probe.host(slow, Step::Down, &[]);
    h.probe.host(fast, Step::Up("VMware ESXi 7.0U3"), &[]);
    let mut events = h.engine.subscribe();

    let started = Instant::now();
    let report = h
        .engine
        .reboot_verify(&["10.20.1.1", "10.20.1.2"])
        .await
        .unwrap();
    assert_eq!(report.jobs_started(), 2);
    h.engine.wait_idle().await;
    assert_elapsed(started.elapsed(), 120 + 20 * 30);

    let mut finished = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.is_terminal() {
            finished.push((event.host, event.payload));
        }
    }
    assert_eq!(finished.len(), 2);
    assert_eq!(finished[0], (fast, JobEventPayload::Succeeded));
    assert_eq!(finished[1].0, slow);

    assert_eq!(h.host(fast).await.status(), HostStatus::PatchingCompleted);
    assert_eq!(h.host(slow).await.status(), HostStatus::Phase2Failed);
    assert_eq!(h.probe.polls(fast).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn settings_override_the_polling_budget() {
    let h = Harness::new();
    let a = h.seed_staged("10.20.2.1", "7.0U3").await;
    h.probe.host(a, Step::Down, &[]);
    let mut values = BTreeMap::new();
    values.insert("reboot.grace_period_secs".to_string(), "10".to_string());
    values.insert("reboot.max_attempts".to_string(), "2".to_string());
    values.insert("reboot.poll_interval_secs".to_string(), "5".to_string());
    h.engine.update_settings(values).await.unwrap();

    let started = Instant::now();
    h.engine.reboot_verify(&["10.20.2.1"]).await.unwrap();
    h.engine.wait_idle().await;

    assert_elapsed(started.elapsed(), 10 + 2 * 5);
    assert_eq!(h.probe.polls(a).len(), 2);
    assert_eq!(h.only_job(a).await.error_message(), Some(TIMEOUT_MESSAGE));
}
