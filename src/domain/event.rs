//! Job lifecycle events for notification, billing and reporting consumers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{JobFailure, Priority};

/// Event type constants
pub mod event_types {
    pub const JOB_QUEUED: &str = "job.queued";
    pub const JOB_STARTED: &str = "job.started";
    pub const JOB_RETRY_SCHEDULED: &str = "job.retry_scheduled";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_FAILED: &str = "job.failed";
}

/// Event published by the scheduler on every job state change
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Queued {
        job_id: String,
        user_id: String,
        priority: Priority,
        at: DateTime<Utc>,
    },
    Started {
        job_id: String,
        attempt: u32,
        at: DateTime<Utc>,
    },
    RetryScheduled {
        job_id: String,
        attempt: u32,
        #[serde(with = "duration_ms")]
        delay: Duration,
        error: String,
    },
    Completed {
        job_id: String,
        user_id: String,
        label_count: u32,
        output_bytes: usize,
        at: DateTime<Utc>,
    },
    Failed {
        job_id: String,
        user_id: String,
        failure: JobFailure,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Queued { job_id, .. }
            | JobEvent::Started { job_id, .. }
            | JobEvent::RetryScheduled { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. } => job_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::Queued { .. } => event_types::JOB_QUEUED,
            JobEvent::Started { .. } => event_types::JOB_STARTED,
            JobEvent::RetryScheduled { .. } => event_types::JOB_RETRY_SCHEDULED,
            JobEvent::Completed { .. } => event_types::JOB_COMPLETED,
            JobEvent::Failed { .. } => event_types::JOB_FAILED,
        }
    }

    /// True for events after which the job never changes again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. })
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_and_job_id() {
        let event = JobEvent::Started {
            job_id: "job-7".into(),
            attempt: 2,
            at: Utc::now(),
        };
        assert_eq!(event.event_type(), "job.started");
        assert_eq!(event.job_id(), "job-7");
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_terminal_events() {
        let failed = JobEvent::Failed {
            job_id: "j".into(),
            user_id: "u".into(),
            failure: JobFailure::SchedulerStopped,
            at: Utc::now(),
        };
        assert!(failed.is_terminal());
    }

    #[test]
    fn test_retry_event_serializes_delay_in_ms() {
        let event = JobEvent::RetryScheduled {
            job_id: "j".into(),
            attempt: 1,
            delay: Duration::from_secs(2),
            error: "HTTP 503".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "retry_scheduled");
        assert_eq!(json["delay"], 2000);
    }
}
