//! # patchfleet core
//!
//! Orchestrates a three-phase firmware rollout across hypervisor hosts:
//! precheck, stage and reboot-with-verification.
//!
//! - [`store`]: host, job and settings repositories (in-memory and JSON file)
//! - [`remote`]: connectivity probe and playbook executor contracts, with
//!   `ssh` and `ansible-playbook` backed implementations
//! - [`orchestration`]: the engine, its per-host dispatcher, the reboot
//!   poller and the periodic sweeper
//!
//! Entry points return as soon as work is admitted; outcomes land on the
//! job records and on the job event stream.

#![allow(missing_docs)]

pub mod error;
pub mod orchestration;
pub mod remote;
pub mod store;

pub use error::{FleetError, Result};
pub use orchestration::{
    AdmissionReport, EngineDeps, OrchestrationEngine, OrchestratorConfig,
    PeriodicSweeper,
};
