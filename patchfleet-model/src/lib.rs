//! Core data model definitions shared across patchfleet crates.
//!
//! Hosts carry a closed [`HostStatus`] that can only move forward through
//! [`Host::apply`]; jobs record one orchestration attempt and refuse a second
//! terminal write.
#![allow(missing_docs)]

pub mod address;
pub mod error;
pub mod host;
pub mod job;
pub mod settings;

pub use address::HostAddress;
pub use error::{ModelError, Result as ModelResult};
pub use host::{
    DatastoreCapacity, Host, HostStatus, PhaseOutcome, PrecheckOutcome,
    RebootOutcome, StageOutcome,
};
pub use job::{Job, JobFilter, JobId, JobKind, JobStatus};
pub use settings::{Setting, keys as setting_keys};
