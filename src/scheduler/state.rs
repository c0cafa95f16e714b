//! Mutable scheduler state guarded by a single mutex.
//!
//! Holds the job table, the per-tier FIFO queues, the retry delay queue and the
//! global throttle. Slot acquisition, throttle claim and dequeue all happen in
//! [`SchedulerState::next_cycle`] while the caller holds the lock.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::domain::{Job, JobFailure, JobStatus, LabelPayload, PerTier, Priority};
use crate::renderer::RenderOutput;
use crate::scheduler::slots::{SlotPermit, SlotPool};
use crate::scheduler::throttle::Throttle;

/// What a waiting caller eventually receives
pub type JobResult = std::result::Result<RenderOutput, JobFailure>;

/// A job plus its pending result channel.
#[derive(Debug)]
pub(crate) struct JobEntry {
    pub job: Job,
    pub waiter: Option<oneshot::Sender<JobResult>>,
    /// Set while the job waits out a retry backoff
    pub retry_at: Option<Instant>,
}

impl JobEntry {
    pub fn new(job: Job, waiter: Option<oneshot::Sender<JobResult>>) -> Self {
        Self {
            job,
            waiter,
            retry_at: None,
        }
    }

    /// Deliver the result; a caller that went away is not an error.
    pub fn resolve(&mut self, result: JobResult) {
        if let Some(tx) = self.waiter.take()
            && tx.send(result).is_err()
        {
            tracing::debug!(job_id = %self.job.id, "Caller no longer waiting for result");
        }
    }
}

/// A job waiting for its backoff to elapse before rejoining its queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RetryScheduled {
    pub job_id: String,
    pub priority: Priority,
    pub ready_at: Instant,
}

/// A job selected for an attempt, holding its slot.
#[derive(Debug)]
pub(crate) struct Dispatch {
    pub job_id: String,
    pub priority: Priority,
    pub payload: LabelPayload,
    pub attempt: u32,
    pub permit: SlotPermit,
}

/// Result of one dispatcher cycle.
#[derive(Debug)]
pub(crate) enum Cycle {
    Dispatch(Dispatch),
    /// Nothing can start now; sleep until the instant (or until woken).
    Wait(Option<Instant>),
}

#[derive(Debug)]
pub(crate) struct SchedulerState {
    pub jobs: HashMap<String, JobEntry>,
    pub queues: PerTier<VecDeque<String>>,
    pub retries: Vec<RetryScheduled>,
    pub throttle: Throttle,
    pub stopped: bool,
}

impl SchedulerState {
    pub fn new(throttle: Throttle) -> Self {
        Self {
            jobs: HashMap::new(),
            queues: PerTier::default(),
            retries: Vec::new(),
            throttle,
            stopped: false,
        }
    }

    pub fn enqueue_back(&mut self, entry: JobEntry) {
        let priority = entry.job.priority;
        let id = entry.job.id.clone();
        self.jobs.insert(id.clone(), entry);
        self.queues.get_mut(priority).push_back(id);
    }

    pub fn schedule_retry(&mut self, retry: RetryScheduled) {
        if let Some(entry) = self.jobs.get_mut(&retry.job_id) {
            entry.retry_at = Some(retry.ready_at);
        }
        self.retries.push(retry);
    }

    pub fn next_retry_at(&self) -> Option<Instant> {
        self.retries.iter().map(|r| r.ready_at).min()
    }

    /// Number of jobs of a tier waiting for dispatch, including backoffs.
    pub fn queued_count(&self, priority: Priority) -> usize {
        self.queues.get(priority).len() + self.retries.iter().filter(|r| r.priority == priority).count()
    }

    pub fn processing_count(&self, priority: Priority) -> usize {
        self.jobs
            .values()
            .filter(|e| e.job.priority == priority && e.job.status == JobStatus::Processing)
            .count()
    }

    /// Move retries whose backoff elapsed to the head of their tier queue.
    ///
    /// The earliest-ready job ends up at the very front.
    pub fn promote_due_retries(&mut self, now: Instant) {
        if self.retries.is_empty() {
            return;
        }
        let (mut due, pending): (Vec<_>, Vec<_>) = self.retries.drain(..).partition(|r| r.ready_at <= now);
        self.retries = pending;

        due.sort_by(|a, b| b.ready_at.cmp(&a.ready_at));
        for retry in due {
            if let Some(entry) = self.jobs.get_mut(&retry.job_id) {
                entry.retry_at = None;
                self.queues.get_mut(retry.priority).push_front(retry.job_id);
            }
        }
    }

    /// Drop queue heads that no longer refer to a queued job.
    fn settle_head(&mut self, priority: Priority) -> Option<&String> {
        while let Some(id) = self.queues.get(priority).front() {
            let live = self
                .jobs
                .get(id)
                .is_some_and(|e| e.job.status == JobStatus::Queued && e.retry_at.is_none());
            if live {
                break;
            }
            tracing::warn!(job_id = %id, "Dropping stale queue entry");
            self.queues.get_mut(priority).pop_front();
        }
        self.queues.get(priority).front()
    }

    /// Pick the next job to start, if any.
    ///
    /// High is always considered first; normal is considered only when high
    /// is empty or has no free slot. A slot is never held while waiting on
    /// the throttle. Nothing is dispatched while the previous dispatch has not
    /// confirmed its start; the attempt task wakes the dispatcher once it has.
    pub fn next_cycle(&mut self, slots: &SlotPool, now: Instant) -> Cycle {
        if self.stopped {
            return Cycle::Wait(None);
        }
        self.promote_due_retries(now);
        if self.throttle.start_pending() {
            return Cycle::Wait(self.next_retry_at());
        }

        for priority in Priority::ALL {
            if self.settle_head(priority).is_none() {
                continue;
            }
            let Some(permit) = slots.try_acquire(priority) else {
                continue;
            };

            if let Err(ready_at) = self.throttle.try_claim(now) {
                permit.release();
                let wake = self.next_retry_at().map_or(ready_at, |r| r.min(ready_at));
                return Cycle::Wait(Some(wake));
            }

            let Some(job_id) = self.queues.get_mut(priority).pop_front() else {
                continue;
            };
            let Some(entry) = self.jobs.get_mut(&job_id) else {
                continue;
            };
            if let Err(e) = entry.job.mark_processing() {
                tracing::error!(job_id = %job_id, error = %e, "Cannot start job");
                continue;
            }

            return Cycle::Dispatch(Dispatch {
                job_id,
                priority,
                payload: entry.job.payload.clone(),
                attempt: entry.job.attempts,
                permit,
            });
        }

        Cycle::Wait(self.next_retry_at())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(id: &str, priority: Priority) -> JobEntry {
        let plan = if priority == Priority::High { "pro" } else { "free" };
        JobEntry::new(
            Job::new(id, "user", plan, priority, LabelPayload::new("^XA^XZ", "4x6", 1)),
            None,
        )
    }

    fn state(gap_ms: u64) -> SchedulerState {
        SchedulerState::new(Throttle::new(Duration::from_millis(gap_ms)))
    }

    fn dispatched(cycle: Cycle) -> Dispatch {
        match cycle {
            Cycle::Dispatch(d) => d,
            Cycle::Wait(w) => panic!("expected dispatch, got wait {:?}", w),
        }
    }

    /// Dispatch and confirm the call started at `now`, as the attempt task does.
    fn dispatch_next(s: &mut SchedulerState, slots: &SlotPool, now: Instant) -> Dispatch {
        let d = dispatched(s.next_cycle(slots, now));
        s.throttle.confirm_start(now);
        d
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_before_normal() {
        let slots = SlotPool::new(PerTier::new(2, 1));
        let mut s = state(0);
        s.enqueue_back(entry("free-1", Priority::Normal));
        s.enqueue_back(entry("pro-1", Priority::High));

        let first = dispatch_next(&mut s, &slots, Instant::now());
        assert_eq!(first.job_id, "pro-1");
        assert_eq!(first.attempt, 1);
        let second = dispatch_next(&mut s, &slots, Instant::now());
        assert_eq!(second.job_id, "free-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_served_when_high_slots_full() {
        let slots = SlotPool::new(PerTier::new(1, 1));
        let mut s = state(0);
        s.enqueue_back(entry("pro-1", Priority::High));
        s.enqueue_back(entry("pro-2", Priority::High));
        s.enqueue_back(entry("free-1", Priority::Normal));

        let a = dispatch_next(&mut s, &slots, Instant::now());
        let b = dispatch_next(&mut s, &slots, Instant::now());
        assert_eq!(a.job_id, "pro-1");
        assert_eq!(b.job_id, "free-1");
        assert!(matches!(s.next_cycle(&slots, Instant::now()), Cycle::Wait(None)));

        drop(a);
        let c = dispatch_next(&mut s, &slots, Instant::now());
        assert_eq!(c.job_id, "pro-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_wait_releases_slot() {
        let slots = SlotPool::new(PerTier::new(2, 1));
        let mut s = state(1000);
        s.enqueue_back(entry("pro-1", Priority::High));
        s.enqueue_back(entry("pro-2", Priority::High));

        let now = Instant::now();
        let _a = dispatch_next(&mut s, &slots, now);
        match s.next_cycle(&slots, now) {
            Cycle::Wait(Some(at)) => assert_eq!(at, now + Duration::from_millis(1000)),
            other => panic!("expected throttle wait, got {:?}", other),
        }
        assert_eq!(slots.active(Priority::High), 1);
        assert_eq!(s.queues.high.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_within_tier() {
        let slots = SlotPool::new(PerTier::new(2, 5));
        let mut s = state(0);
        for i in 0..4 {
            s.enqueue_back(entry(&format!("free-{}", i), Priority::Normal));
        }
        let order: Vec<String> = (0..4)
            .map(|_| dispatch_next(&mut s, &slots, Instant::now()).job_id)
            .collect();
        assert_eq!(order, vec!["free-0", "free-1", "free-2", "free-3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_rejoins_at_head_when_due() {
        let slots = SlotPool::new(PerTier::new(2, 1));
        let mut s = state(0);
        s.enqueue_back(entry("free-1", Priority::Normal));
        s.enqueue_back(entry("free-2", Priority::Normal));

        let now = Instant::now();
        let d = dispatch_next(&mut s, &slots, now);
        assert_eq!(d.job_id, "free-1");
        s.jobs.get_mut("free-1").unwrap().job.mark_queued().unwrap();
        s.schedule_retry(RetryScheduled {
            job_id: "free-1".into(),
            priority: Priority::Normal,
            ready_at: now + Duration::from_secs(2),
        });
        drop(d);
        assert_eq!(s.queued_count(Priority::Normal), 2);

        // free-2 runs while free-1 is backing off
        let d2 = dispatch_next(&mut s, &slots, now);
        assert_eq!(d2.job_id, "free-2");
        drop(d2);

        match s.next_cycle(&slots, now) {
            Cycle::Wait(Some(at)) => assert_eq!(at, now + Duration::from_secs(2)),
            other => panic!("expected retry wait, got {:?}", other),
        }

        s.enqueue_back(entry("free-3", Priority::Normal));
        let later = now + Duration::from_secs(2);
        let d3 = dispatch_next(&mut s, &slots, later);
        assert_eq!(d3.job_id, "free-1");
        assert_eq!(d3.attempt, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earliest_retry_ends_up_first() {
        let mut s = state(0);
        s.enqueue_back(entry("a", Priority::High));
        s.enqueue_back(entry("b", Priority::High));
        s.queues.high.clear();
        let now = Instant::now();
        s.schedule_retry(RetryScheduled {
            job_id: "b".into(),
            priority: Priority::High,
            ready_at: now + Duration::from_secs(4),
        });
        s.schedule_retry(RetryScheduled {
            job_id: "a".into(),
            priority: Priority::High,
            ready_at: now + Duration::from_secs(2),
        });

        s.promote_due_retries(now + Duration::from_secs(5));
        assert_eq!(s.queues.high, VecDeque::from(vec!["a".to_string(), "b".to_string()]));
        assert!(s.retries.is_empty());
        assert!(s.jobs["a"].retry_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_never_dispatches() {
        let slots = SlotPool::new(PerTier::new(2, 1));
        let mut s = state(0);
        s.enqueue_back(entry("pro-1", Priority::High));
        s.stopped = true;
        assert!(matches!(s.next_cycle(&slots, Instant::now()), Cycle::Wait(None)));
        assert_eq!(slots.acquired_total(), 0);
    }

    #[test]
    fn test_resolve_without_receiver_is_noop() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        let mut e = entry("x", Priority::Normal);
        e.waiter = Some(tx);
        e.resolve(Err(JobFailure::SchedulerStopped));
        assert!(e.waiter.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_start_confirmation() {
        let slots = SlotPool::new(PerTier::new(2, 1));
        let mut s = state(1000);
        s.enqueue_back(entry("pro-1", Priority::High));
        s.enqueue_back(entry("pro-2", Priority::High));

        let claimed = Instant::now();
        let _a = dispatched(s.next_cycle(&slots, claimed));
        let late = claimed + Duration::from_millis(2000);
        assert!(matches!(s.next_cycle(&slots, late), Cycle::Wait(None)));
        assert_eq!(slots.active(Priority::High), 1);

        // The first call only started after the dispatcher moved on
        let started = claimed + Duration::from_millis(1500);
        s.throttle.confirm_start(started);
        match s.next_cycle(&slots, late) {
            Cycle::Wait(Some(at)) => assert_eq!(at, started + Duration::from_millis(1000)),
            other => panic!("expected throttle wait, got {:?}", other),
        }
        let b = dispatched(s.next_cycle(&slots, started + Duration::from_millis(1000)));
        assert_eq!(b.job_id, "pro-2");
    }
}
