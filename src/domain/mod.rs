//! Domain types for labelq
//!
//! This module contains the core domain types:
//! - Job: the rendering job record with its status lifecycle
//! - JobFailure: why a job ended in `failed`
//! - JobEvent: lifecycle events for downstream consumers

pub mod event;
pub mod failure;
pub mod job;

pub use event::{JobEvent, event_types};
pub use failure::{FailureKind, JobFailure};
pub use job::{Job, JobStatus, LabelPayload, PerTier, Priority, parse_label_size};
