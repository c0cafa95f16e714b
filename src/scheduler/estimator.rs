//! Queue position, ETA and aggregate statistics.
//!
//! Everything here reads a locked [`SchedulerState`] and never mutates it, so
//! a report is a consistent snapshot.

use serde::Serialize;
use tokio::time::Instant;

use crate::domain::{JobFailure, JobStatus, PerTier, Priority};
use crate::scheduler::slots::SlotPool;
use crate::scheduler::state::SchedulerState;

/// Status as seen by a status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    NotFound,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl From<JobStatus> for LookupStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => LookupStatus::Queued,
            JobStatus::Processing => LookupStatus::Processing,
            JobStatus::Completed => LookupStatus::Completed,
            JobStatus::Failed => LookupStatus::Failed,
        }
    }
}

/// Answer to a status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub job_id: String,
    pub status: LookupStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// 0-based position within the tier queue, while queued
    pub position: Option<usize>,
    pub estimated_wait_secs: Option<u64>,
    pub attempts: u32,
    pub queue_length: PerTier<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
}

impl StatusReport {
    pub fn is_found(&self) -> bool {
        self.status != LookupStatus::NotFound
    }
}

/// Aggregate queue statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total_queued: usize,
    pub total_processing: usize,
    pub pro_queued: usize,
    pub free_queued: usize,
    pub pro_processing: usize,
    pub free_processing: usize,
    pub slots_active: PerTier<usize>,
    pub slots_total: PerTier<usize>,
}

/// ETA for a job at `position` in a tier with the given slot usage.
///
/// `ceil((position + active) * seconds_per_job / total)`
pub fn estimate_wait_secs(position: usize, active: usize, total: usize, seconds_per_job: u64) -> u64 {
    let ahead = (position + active) as u64;
    (ahead * seconds_per_job).div_ceil(total.max(1) as u64)
}

fn queue_length(state: &SchedulerState) -> PerTier<usize> {
    PerTier::new(
        state.queued_count(Priority::High),
        state.queued_count(Priority::Normal),
    )
}

pub(crate) fn status_report(
    state: &SchedulerState,
    slots: &SlotPool,
    seconds_per_job: u64,
    job_id: &str,
    now: Instant,
) -> StatusReport {
    let queue_length = queue_length(state);

    let Some(entry) = state.jobs.get(job_id) else {
        return StatusReport {
            job_id: job_id.to_string(),
            status: LookupStatus::NotFound,
            priority: None,
            position: None,
            estimated_wait_secs: None,
            attempts: 0,
            queue_length,
            failure: None,
        };
    };

    let job = &entry.job;
    let (position, estimated_wait_secs) = match (job.status, entry.retry_at) {
        (JobStatus::Queued, Some(ready_at)) => {
            let remaining = ready_at.saturating_duration_since(now);
            (Some(0), Some(remaining.as_secs_f64().ceil() as u64))
        }
        (JobStatus::Queued, None) => {
            let position = state
                .queues
                .get(job.priority)
                .iter()
                .position(|id| id == job_id);
            let eta = position.map(|p| {
                estimate_wait_secs(p, slots.active(job.priority), slots.total(job.priority), seconds_per_job)
            });
            (position, eta)
        }
        _ => (None, None),
    };

    StatusReport {
        job_id: job_id.to_string(),
        status: job.status.into(),
        priority: Some(job.priority),
        position,
        estimated_wait_secs,
        attempts: job.attempts,
        queue_length,
        failure: job.failure.clone(),
    }
}

pub(crate) fn queue_stats(state: &SchedulerState, slots: &SlotPool) -> QueueStats {
    let queued = queue_length(state);
    let processing = PerTier::new(
        state.processing_count(Priority::High),
        state.processing_count(Priority::Normal),
    );

    QueueStats {
        total_queued: queued.high + queued.normal,
        total_processing: processing.high + processing.normal,
        pro_queued: queued.high,
        free_queued: queued.normal,
        pro_processing: processing.high,
        free_processing: processing.normal,
        slots_active: slots.active_counts(),
        slots_total: slots.totals(),
    }
}
