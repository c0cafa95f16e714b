//! Error types for labelq
//!
//! Centralized error handling using thiserror. Terminal job failures live in
//! [`crate::domain::JobFailure`] and renderer failures in
//! [`crate::renderer::RenderError`]; this enum covers everything returned
//! directly from scheduler, storage and configuration calls.

use thiserror::Error;

use crate::domain::Priority;

/// All error types that can occur in labelq
#[derive(Debug, Error)]
pub enum LabelqError {
    /// Configuration rejected at startup
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// A live job with the same id already exists
    #[error("Duplicate job: {0}")]
    DuplicateJob(String),

    /// Admission control rejected a submission
    #[error("Queue full: {priority} tier already holds {depth} queued jobs")]
    QueueFull { priority: Priority, depth: usize },

    /// Invalid state transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The scheduler has been shut down
    #[error("Scheduler stopped")]
    Stopped,

    /// Job store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Renderer construction error
    #[error("Renderer error: {0}")]
    Renderer(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for labelq operations
pub type Result<T> = std::result::Result<T, LabelqError>;
