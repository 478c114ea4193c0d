//! Text and JSON rendering for command results. Text goes to stdout; logs
//! go to stderr so the two never interleave in pipes.

use std::fmt::Write as _;

use patchfleet_core::orchestration::{
    AdmissionReport, JobEvent, JobEventPayload, RegistrationReport,
    SkipReason, SkippedHost,
};
use patchfleet_model::{Host, Job, JobKind, JobStatus, Setting};
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    json: bool,
}

impl Renderer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    /// Prints `value` as JSON, or `text` otherwise.
    pub fn emit<T: Serialize + ?Sized>(
        &self,
        value: &T,
        text: impl FnOnce() -> String,
    ) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            print!("{}", text());
        }
        Ok(())
    }

    /// Live progress line; suppressed in JSON mode.
    pub fn progress(&self, event: &JobEvent) {
        if !self.json {
            println!("{}", event_line(event));
        }
    }
}

pub fn event_line(event: &JobEvent) -> String {
    match &event.payload {
        JobEventPayload::Started => {
            format!("[{}] {} started", event.host, event.kind)
        }
        JobEventPayload::Succeeded => {
            format!("[{}] {} succeeded", event.host, event.kind)
        }
        JobEventPayload::Failed { error } => {
            format!("[{}] {} failed: {error}", event.host, event.kind)
        }
    }
}

fn skipped_lines(out: &mut String, skipped: &[SkippedHost]) {
    for skip in skipped {
        let _ = writeln!(out, "  skipped {}: {}", skip.input, skip.reason);
    }
}

pub fn registration_text(report: &RegistrationReport) -> String {
    let mut out = format!("registered {} host(s)\n", report.added.len());
    for address in &report.added {
        let _ = writeln!(out, "  added {address}");
    }
    skipped_lines(&mut out, &report.skipped);
    out
}

pub fn admission_text(kind: JobKind, report: &AdmissionReport) -> String {
    let mut out = format!("{kind}: {} job(s) started\n", report.jobs_started());
    skipped_lines(&mut out, &report.skipped);
    if report
        .skipped
        .iter()
        .any(|skip| skip.reason == SkipReason::UnknownHost)
    {
        out.push_str("  hint: add hosts with `patchfleet hosts add` first\n");
    }
    out
}

/// Per-host outcome lines for the jobs a phase command started.
pub fn summary_text(kind: JobKind, jobs: &[Job]) -> String {
    let succeeded = jobs
        .iter()
        .filter(|job| job.status() == JobStatus::Success)
        .count();
    let mut out = format!(
        "{kind} finished: {succeeded} succeeded, {} failed\n",
        jobs.len() - succeeded
    );
    for job in jobs {
        match job.error_message() {
            Some(error) => {
                let _ = writeln!(out, "  {} {}: {error}", job.host, job.status());
            }
            None => {
                let _ = writeln!(out, "  {} {}", job.host, job.status());
            }
        }
    }
    out
}

fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

pub fn hosts_text(hosts: &[Host]) -> String {
    if hosts.is_empty() {
        return "no hosts\n".to_string();
    }
    let mut out = format!(
        "{:<16} {:<20} {:<18} {:<24} {:<24} {}\n",
        "ADDRESS", "STATUS", "HOSTNAME", "CURRENT BUILD", "TARGET BUILD", "SSH"
    );
    for host in hosts {
        let _ = writeln!(
            out,
            "{:<16} {:<20} {:<18} {:<24} {:<24} {}",
            host.address.to_string(),
            host.status().as_str(),
            or_dash(host.hostname.as_deref()),
            or_dash(host.current_build.as_deref()),
            or_dash(host.target_build.as_deref()),
            if host.ssh_reachable { "up" } else { "down" },
        );
    }
    out
}

pub fn host_text(host: &Host) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "address:        {}", host.address);
    let _ = writeln!(out, "status:         {}", host.status());
    let _ = writeln!(out, "hostname:       {}", or_dash(host.hostname.as_deref()));
    let _ = writeln!(
        out,
        "current build:  {}",
        or_dash(host.current_build.as_deref())
    );
    let _ = writeln!(
        out,
        "target build:   {}",
        or_dash(host.target_build.as_deref())
    );
    let _ = writeln!(out, "ssh reachable:  {}", host.ssh_reachable);
    if let Some(at) = host.last_checked_at {
        let _ = writeln!(out, "last checked:   {}", at.to_rfc3339());
    }
    out
}

pub fn jobs_text(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "no jobs\n".to_string();
    }
    let mut out = format!(
        "{:<25} {:<16} {:<14} {:<8} {}\n",
        "STARTED", "HOST", "KIND", "STATUS", "DETAIL"
    );
    for job in jobs {
        let detail = job
            .error_message()
            .or(job.patch_file.as_deref())
            .unwrap_or("");
        let _ = writeln!(
            out,
            "{:<25} {:<16} {:<14} {:<8} {}",
            job.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            job.host.to_string(),
            job.kind.as_str(),
            job.status().as_str(),
            detail,
        );
    }
    out
}

pub fn settings_text(settings: &[Setting]) -> String {
    if settings.is_empty() {
        return "no settings stored\n".to_string();
    }
    let mut out = String::new();
    for setting in settings {
        let _ = writeln!(out, "{} = {}", setting.key, setting.value);
    }
    out
}

#[cfg(test)]
mod tests {
    use patchfleet_model::{HostAddress, JobId};

    use super::*;

    fn addr(raw: &str) -> HostAddress {
        HostAddress::parse(raw).unwrap()
    }

    #[test]
    fn admission_lists_skips_with_reasons() {
        let report = AdmissionReport {
            started: Vec::new(),
            skipped: vec![SkippedHost {
                input: "esx-01".into(),
                reason: SkipReason::InvalidAddress,
            }],
        };

        let text = admission_text(JobKind::Stage, &report);
        assert_eq!(
            text,
            "stage: 0 job(s) started\n  skipped esx-01: not an IPv4 address\n"
        );
    }

    #[test]
    fn unregistered_hosts_get_a_registration_hint() {
        let report = AdmissionReport {
            started: Vec::new(),
            skipped: vec![SkippedHost {
                input: "10.0.0.9".into(),
                reason: SkipReason::UnknownHost,
            }],
        };

        let text = admission_text(JobKind::Precheck, &report);
        assert_eq!(
            text,
            "precheck: 0 job(s) started\n  skipped 10.0.0.9: not registered\n  \
             hint: add hosts with `patchfleet hosts add` first\n"
        );
    }

    #[test]
    fn summary_counts_outcomes() {
        let mut ok = Job::start(addr("10.0.0.1"), JobKind::Precheck, None);
        ok.succeed().unwrap();
        let mut bad = Job::start(addr("10.0.0.2"), JobKind::Precheck, None);
        bad.fail("SSH port not accessible").unwrap();

        let text = summary_text(JobKind::Precheck, &[ok, bad]);
        assert!(text.starts_with("precheck finished: 1 succeeded, 1 failed\n"));
        assert!(text.contains("10.0.0.2 failed: SSH port not accessible"));
    }

    #[test]
    fn failed_event_carries_the_error() {
        let event = JobEvent::new(
            JobId::new(),
            addr("10.0.0.3"),
            JobKind::RebootVerify,
            JobEventPayload::Failed {
                error: "Host did not come back online within timeout".into(),
            },
        );
        assert_eq!(
            event_line(&event),
            "[10.0.0.3] reboot_verify failed: Host did not come back online within timeout"
        );
    }

    #[test]
    fn empty_listings_say_so() {
        assert_eq!(hosts_text(&[]), "no hosts\n");
        assert_eq!(jobs_text(&[]), "no jobs\n");
        assert_eq!(settings_text(&[]), "no settings stored\n");
    }

    #[test]
    fn host_rows_use_dashes_for_unknown_facts() {
        let text = hosts_text(&[Host::new(addr("10.0.0.4"))]);
        let row = text.lines().nth(1).unwrap();
        assert!(row.starts_with("10.0.0.4"));
        assert!(row.contains("pending"));
        assert!(row.ends_with("down"));
        assert!(row.contains(" - "));
    }
}
