use std::fmt::{self, Display};

use crate::{host::HostStatus, job::JobId};

/// Errors produced by model constructors and transition guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidAddress(String),
    InvalidTransition {
        from: HostStatus,
        to: HostStatus,
    },
    JobAlreadyCompleted(JobId),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidAddress(raw) => {
                write!(f, "invalid host address '{raw}'")
            }
            ModelError::InvalidTransition { from, to } => {
                write!(f, "illegal host transition {from} -> {to}")
            }
            ModelError::JobAlreadyCompleted(id) => {
                write!(f, "job {id} already completed")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
