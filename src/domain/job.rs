//! Job record and related types
//!
//! A Job is one rendering request travelling through the scheduler. The record
//! is plain data so it can be written to a [`crate::storage::JobStore`]; the
//! pending result channel for the submitting caller is held separately by the
//! scheduler.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::JobFailure;
use crate::error::{LabelqError, Result};

/// Priority class a job is scheduled under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Paid tiers
    High,
    /// Free tier
    Normal,
}

impl Priority {
    /// Tiers in the order the dispatcher considers them
    pub const ALL: [Priority; 2] = [Priority::High, Priority::Normal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value kept once per priority tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerTier<T> {
    pub high: T,
    pub normal: T,
}

impl<T> PerTier<T> {
    pub fn new(high: T, normal: T) -> Self {
        Self { high, normal }
    }

    pub fn get(&self, priority: Priority) -> &T {
        match priority {
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
        }
    }

    pub fn get_mut(&mut self, priority: Priority) -> &mut T {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
        }
    }
}

/// Status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in a tier queue or for a retry backoff to elapse
    Queued,
    /// An attempt is in flight
    Processing,
    /// Rendered successfully
    Completed,
    /// Retries exhausted or permanent failure
    Failed,
}

impl JobStatus {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The document to render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPayload {
    /// Label description document (ZPL)
    pub document: String,
    /// Label size in inches, `WxH` (e.g. "4x6")
    pub label_size: String,
    /// Number of labels in the document, used for ETA estimation
    pub label_count: u32,
}

impl LabelPayload {
    pub fn new(document: impl Into<String>, label_size: impl Into<String>, label_count: u32) -> Self {
        Self {
            document: document.into(),
            label_size: label_size.into(),
            label_count,
        }
    }

    /// Check the payload before it is sent anywhere.
    ///
    /// Returns a message describing the first problem found.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.document.trim().is_empty() {
            return Err("document is empty".to_string());
        }
        if self.label_count == 0 {
            return Err("label count must be at least 1".to_string());
        }
        parse_label_size(&self.label_size).map(|_| ())
    }
}

/// Parse a `WxH` label size into inches.
pub fn parse_label_size(size: &str) -> std::result::Result<(f64, f64), String> {
    let (w, h) = size
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("label size '{}' is not in WxH form", size))?;
    let parse = |s: &str| -> std::result::Result<f64, String> {
        let v: f64 = s
            .trim()
            .parse()
            .map_err(|_| format!("label size '{}' has a non-numeric dimension", size))?;
        if v <= 0.0 || !v.is_finite() {
            return Err(format!("label size '{}' has a non-positive dimension", size));
        }
        Ok(v)
    };
    Ok((parse(w)?, parse(h)?))
}

/// The core job record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    //=== Identity ===
    /// Caller-supplied identifier, stable for status lookups
    pub id: String,

    /// Submitting user
    pub user_id: String,

    /// Subscription plan the priority was derived from
    pub plan: String,

    /// Fixed at submission
    pub priority: Priority,

    //=== Work ===
    pub payload: LabelPayload,

    //=== Runtime State ===
    pub status: JobStatus,

    /// Number of attempts started so far
    pub attempts: u32,

    /// Size of the rendered output once completed
    pub output_bytes: Option<usize>,

    /// Why the job failed, once failed
    pub failure: Option<JobFailure>,

    //=== Timestamps ===
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new queued job
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        plan: impl Into<String>,
        priority: Priority,
        payload: LabelPayload,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            plan: plan.into(),
            priority,
            payload,
            status: JobStatus::Queued,
            attempts: 0,
            output_bytes: None,
            failure: None,
            created_at: Utc::now(),
            last_attempt_at: None,
            finished_at: None,
        }
    }

    fn ensure_live(&self, to: JobStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(LabelqError::InvalidState(format!(
                "job {} is {} and cannot become {}",
                self.id, self.status, to
            )));
        }
        Ok(())
    }

    /// Start a new attempt
    pub fn mark_processing(&mut self) -> Result<()> {
        self.ensure_live(JobStatus::Processing)?;
        if self.status != JobStatus::Queued {
            return Err(LabelqError::InvalidState(format!(
                "job {} is already processing",
                self.id
            )));
        }
        self.status = JobStatus::Processing;
        self.attempts += 1;
        self.last_attempt_at = Some(Utc::now());
        Ok(())
    }

    /// Return to the queue between attempts
    pub fn mark_queued(&mut self) -> Result<()> {
        self.ensure_live(JobStatus::Queued)?;
        self.status = JobStatus::Queued;
        Ok(())
    }

    pub fn mark_completed(&mut self, output_bytes: usize) -> Result<()> {
        self.ensure_live(JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.output_bytes = Some(output_bytes);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, failure: JobFailure) -> Result<()> {
        self.ensure_live(JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.failure = Some(failure);
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::new(
            "job-1",
            "user-1",
            "free",
            Priority::Normal,
            LabelPayload::new("^XA^FO50,50^FDHello^FS^XZ", "4x6", 1),
        )
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert!(job.last_attempt_at.is_none());
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_full_success_lifecycle() {
        let mut job = sample_job();
        job.mark_processing().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);
        assert!(job.last_attempt_at.is_some());

        job.mark_completed(1024).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.output_bytes, Some(1024));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_retry_cycle_increments_attempts() {
        let mut job = sample_job();
        job.mark_processing().unwrap();
        job.mark_queued().unwrap();
        job.mark_processing().unwrap();
        assert_eq!(job.attempts, 2);
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut job = sample_job();
        job.mark_processing().unwrap();
        job.mark_failed(JobFailure::InvalidInput {
            message: "bad".into(),
        })
        .unwrap();

        assert!(job.mark_queued().is_err());
        assert!(job.mark_processing().is_err());
        assert!(job.mark_completed(1).is_err());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn test_processing_twice_rejected() {
        let mut job = sample_job();
        job.mark_processing().unwrap();
        assert!(job.mark_processing().is_err());
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn test_status_is_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_payload_validate() {
        assert!(LabelPayload::new("^XA^XZ", "4x6", 1).validate().is_ok());
        assert!(LabelPayload::new("^XA^XZ", "2.25X1.25", 3).validate().is_ok());
        assert!(LabelPayload::new("   ", "4x6", 1).validate().is_err());
        assert!(LabelPayload::new("^XA^XZ", "4x6", 0).validate().is_err());
        assert!(LabelPayload::new("^XA^XZ", "large", 1).validate().is_err());
        assert!(LabelPayload::new("^XA^XZ", "4x-6", 1).validate().is_err());
    }

    #[test]
    fn test_parse_label_size() {
        assert_eq!(parse_label_size("4x6").unwrap(), (4.0, 6.0));
        assert_eq!(parse_label_size("2.5 x 1").unwrap(), (2.5, 1.0));
        assert!(parse_label_size("4by6").is_err());
    }

    #[test]
    fn test_per_tier_access() {
        let mut counts = PerTier::new(2usize, 1usize);
        assert_eq!(*counts.get(Priority::High), 2);
        *counts.get_mut(Priority::Normal) += 4;
        assert_eq!(counts.normal, 5);
    }

    #[test]
    fn test_priority_serialization() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
        assert_eq!(serde_json::to_string(&JobStatus::Processing).unwrap(), "\"processing\"");
    }
}
