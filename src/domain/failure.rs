//! Terminal job failure types.
//!
//! A failure is attached to the job record and delivered to the submitting
//! caller. Clients tell the cases apart through [`JobFailure::kind`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse classification of a terminal failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The provider kept failing transiently until retries ran out
    Transient,
    /// The input can never be rendered
    Permanent,
    /// The scheduler shut down before the job ran
    Stopped,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Why a job ended in `failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum JobFailure {
    #[error("Provider unavailable after {attempts} attempts: {last_error}")]
    ProviderUnavailable { attempts: u32, last_error: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Scheduler stopped before the job could run")]
    SchedulerStopped,
}

impl JobFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            JobFailure::ProviderUnavailable { .. } => FailureKind::Transient,
            JobFailure::InvalidInput { .. } => FailureKind::Permanent,
            JobFailure::SchedulerStopped => FailureKind::Stopped,
        }
    }
}
