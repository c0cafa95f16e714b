//! Scheduler handle and the dispatcher loop.
//!
//! One coordinating task per scheduler picks the next job under the state
//! lock and spawns an attempt task that holds only the job's slot permit.
//! The loop sleeps until a submission or slot release wakes it, the earliest
//! throttle/retry/prune deadline passes, or shutdown is signalled.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Notify, broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::SchedulerConfig;
use crate::domain::{Job, JobEvent, JobFailure, JobStatus, LabelPayload, Priority};
use crate::error::{LabelqError, Result};
use crate::renderer::Renderer;
use crate::scheduler::estimator::{self, QueueStats, StatusReport, estimate_wait_secs};
use crate::scheduler::retry::{AttemptOutcome, RetryController};
use crate::scheduler::slots::{SlotPermit, SlotPool};
use crate::scheduler::state::{Cycle, Dispatch, JobEntry, JobResult, RetryScheduled, SchedulerState};
use crate::scheduler::throttle::Throttle;
use crate::scheduler::tier::classify_plan;
use crate::storage::JobStore;

/// Capacity of the job event channel; slower subscribers lag.
const EVENT_CAPACITY: usize = 256;

/// A conversion request as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub job_id: String,
    pub user_id: String,
    /// Subscription plan, classified into a priority at submission
    pub plan: String,
    /// ZPL document
    pub document: String,
    /// e.g. `4x6` (inches)
    pub label_size: String,
    pub label_count: u32,
}

impl JobRequest {
    pub fn new(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        plan: impl Into<String>,
        document: impl Into<String>,
        label_size: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            user_id: user_id.into(),
            plan: plan.into(),
            document: document.into(),
            label_size: label_size.into(),
            label_count: 1,
        }
    }

    pub fn with_label_count(mut self, label_count: u32) -> Self {
        self.label_count = label_count;
        self
    }
}

/// Returned to the caller as soon as a job is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitAck {
    pub job_id: String,
    pub priority: Priority,
    pub position: usize,
    pub estimated_wait_secs: u64,
}

/// Pairs a submission with its eventual result.
///
/// Dropping the handle does not cancel the job.
#[derive(Debug)]
pub struct JobHandle {
    ack: SubmitAck,
    rx: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.ack.job_id
    }

    pub fn ack(&self) -> &SubmitAck {
        &self.ack
    }

    /// Wait for the job to complete or fail terminally.
    pub async fn wait(self) -> JobResult {
        self.rx.await.unwrap_or(Err(JobFailure::SchedulerStopped))
    }
}

/// A store write, applied in the order the state changed.
#[derive(Debug)]
enum StoreWrite {
    Put(Job),
    Remove(String),
}

struct Shared {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    /// Serializes store writes without holding the state lock.
    writes: Mutex<()>,
    slots: SlotPool,
    retry: RetryController,
    renderer: Arc<dyn Renderer>,
    store: Arc<dyn JobStore>,
    events: broadcast::Sender<JobEvent>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the state lock, then apply `writes` to the store.
    ///
    /// The write lock is taken before the state lock is released, so records
    /// reach the store in the order their state changed. A failing store never
    /// fails a job.
    fn commit(&self, state: MutexGuard<'_, SchedulerState>, writes: Vec<StoreWrite>) {
        if writes.is_empty() {
            return;
        }
        let _order = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        drop(state);

        for write in writes {
            match write {
                StoreWrite::Put(job) => {
                    if let Err(e) = self.store.put(&job) {
                        tracing::warn!(job_id = %job.id, error = %e, "Failed to persist job");
                    }
                }
                StoreWrite::Remove(id) => {
                    if let Err(e) = self.store.remove(&id) {
                        tracing::warn!(job_id = %id, error = %e, "Failed to remove pruned job");
                    }
                }
            }
        }
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Apply the outcome of one attempt and give back its slot.
    fn finish_attempt(&self, job_id: &str, attempt: u32, outcome: AttemptOutcome, permit: SlotPermit) {
        let mut state = self.lock();
        let record = self.apply_outcome(&mut state, job_id, attempt, outcome, permit);
        self.commit(state, record.map(StoreWrite::Put).into_iter().collect());
    }

    /// Returns the job record to persist, if the job changed.
    fn apply_outcome(
        &self,
        state: &mut SchedulerState,
        job_id: &str,
        attempt: u32,
        outcome: AttemptOutcome,
        permit: SlotPermit,
    ) -> Option<Job> {
        let stopped = state.stopped;
        let Some(entry) = state.jobs.get_mut(job_id) else {
            tracing::warn!(job_id = %job_id, "Attempt finished for unknown job");
            return None;
        };

        match outcome {
            AttemptOutcome::Rendered(output) => {
                let output_bytes = output.len();
                if let Err(e) = entry.job.mark_completed(output_bytes) {
                    tracing::error!(job_id = %job_id, error = %e, "Cannot complete job");
                    return None;
                }
                drop(permit);
                tracing::info!(job_id = %job_id, attempts = attempt, output_bytes, "Job completed");
                self.emit(JobEvent::Completed {
                    job_id: job_id.to_string(),
                    user_id: entry.job.user_id.clone(),
                    label_count: entry.job.payload.label_count,
                    output_bytes,
                    at: Utc::now(),
                });
                entry.resolve(Ok(output));
                Some(entry.job.clone())
            }
            AttemptOutcome::Failed(failure) => self.fail(entry, failure, permit),
            AttemptOutcome::Retry { .. } if stopped => {
                // Stays queued in the store for the next recover()
                if let Err(e) = entry.job.mark_queued() {
                    tracing::error!(job_id = %job_id, error = %e, "Cannot requeue job");
                }
                drop(permit);
                entry.resolve(Err(JobFailure::SchedulerStopped));
                Some(entry.job.clone())
            }
            AttemptOutcome::Retry { delay, error } => {
                if let Err(e) = entry.job.mark_queued() {
                    tracing::error!(job_id = %job_id, error = %e, "Cannot requeue job");
                    return None;
                }
                drop(permit);
                tracing::warn!(
                    job_id = %job_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Attempt failed, retry scheduled"
                );
                self.emit(JobEvent::RetryScheduled {
                    job_id: job_id.to_string(),
                    attempt,
                    delay,
                    error: error.to_string(),
                });

                let record = entry.job.clone();
                let now = Instant::now();
                if let Some(hint) = error.retry_after() {
                    state.throttle.defer_until(now + hint);
                }
                state.schedule_retry(RetryScheduled {
                    job_id: job_id.to_string(),
                    priority: record.priority,
                    ready_at: now + delay,
                });
                Some(record)
            }
        }
    }

    fn fail(&self, entry: &mut JobEntry, failure: JobFailure, permit: SlotPermit) -> Option<Job> {
        if let Err(e) = entry.job.mark_failed(failure.clone()) {
            tracing::error!(job_id = %entry.job.id, error = %e, "Cannot fail job");
            return None;
        }
        drop(permit);
        tracing::warn!(
            job_id = %entry.job.id,
            attempts = entry.job.attempts,
            kind = ?failure.kind(),
            error = %failure,
            "Job failed"
        );
        self.emit(JobEvent::Failed {
            job_id: entry.job.id.clone(),
            user_id: entry.job.user_id.clone(),
            failure: failure.clone(),
            at: Utc::now(),
        });
        entry.resolve(Err(failure));
        Some(entry.job.clone())
    }

    /// Forget terminal jobs older than the retention window.
    fn prune_finished(&self) -> usize {
        let retention = self.config.retention();
        let now = Utc::now();
        let mut state = self.lock();
        let expired: Vec<String> = state
            .jobs
            .values()
            .filter(|e| e.job.status.is_terminal())
            .filter(|e| {
                e.job
                    .finished_at
                    .is_some_and(|at| (now - at).to_std().is_ok_and(|age| age >= retention))
            })
            .map(|e| e.job.id.clone())
            .collect();
        for id in &expired {
            state.jobs.remove(id);
        }

        let count = expired.len();
        self.commit(state, expired.into_iter().map(StoreWrite::Remove).collect());
        if count > 0 {
            tracing::debug!(count, "Pruned finished jobs");
        }
        count
    }
}

/// Tier-aware job scheduler in front of a rate-limited renderer.
pub struct Scheduler {
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Validate the configuration and spawn the dispatcher task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: SchedulerConfig, renderer: Arc<dyn Renderer>, store: Arc<dyn JobStore>) -> Result<Self> {
        config.validate()?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);

        tracing::info!(
            renderer = renderer.name(),
            high_slots = config.slots.high,
            normal_slots = config.slots.normal,
            min_gap_ms = config.min_time_between_calls_ms,
            max_retries = config.max_retries,
            "Starting scheduler"
        );

        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState::new(Throttle::new(config.min_time_between_calls()))),
            writes: Mutex::new(()),
            slots: SlotPool::new(config.slots),
            retry: RetryController::from_config(&config),
            config,
            renderer,
            store,
            events,
            wake: Notify::new(),
            shutdown,
        });

        let handle = tokio::spawn(run_dispatcher(shared.clone(), shutdown_rx));

        Ok(Self {
            shared,
            dispatcher: Mutex::new(Some(handle)),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn slot_pool(&self) -> &SlotPool {
        &self.shared.slots
    }

    /// Accept a job into its tier queue.
    pub fn submit(&self, request: JobRequest) -> Result<JobHandle> {
        let priority = classify_plan(&request.plan);
        let payload = LabelPayload::new(request.document, request.label_size, request.label_count);
        let job = Job::new(request.job_id, request.user_id, request.plan, priority, payload);
        let (tx, rx) = oneshot::channel();

        let mut state = self.shared.lock();
        if state.stopped {
            return Err(LabelqError::Stopped);
        }
        if let Some(existing) = state.jobs.get(&job.id)
            && !existing.job.status.is_terminal()
        {
            return Err(LabelqError::DuplicateJob(job.id));
        }
        let depth = state.queued_count(priority);
        if depth >= *self.shared.config.max_queued.get(priority) {
            tracing::warn!(job_id = %job.id, priority = %priority, depth, "Queue full, rejecting job");
            return Err(LabelqError::QueueFull { priority, depth });
        }

        let position = state.queues.get(priority).len();
        let ack = SubmitAck {
            job_id: job.id.clone(),
            priority,
            position,
            estimated_wait_secs: estimate_wait_secs(
                position,
                self.shared.slots.active(priority),
                self.shared.slots.total(priority),
                self.shared.config.estimated_seconds_per_job,
            ),
        };

        tracing::info!(
            job_id = %job.id,
            user_id = %job.user_id,
            plan = %job.plan,
            priority = %priority,
            position,
            "Job queued"
        );
        self.shared.emit(JobEvent::Queued {
            job_id: job.id.clone(),
            user_id: job.user_id.clone(),
            priority,
            at: job.created_at,
        });
        let record = job.clone();
        state.enqueue_back(JobEntry::new(job, Some(tx)));
        self.shared.commit(state, vec![StoreWrite::Put(record)]);

        self.shared.wake.notify_one();
        Ok(JobHandle { ack, rx })
    }

    /// Wait on a live job that nobody is waiting on yet, such as one restored
    /// by [`Scheduler::recover`].
    ///
    /// Returns `None` when the job is unknown, finished or already has a
    /// waiter, or when the scheduler has stopped.
    pub fn attach(&self, job_id: &str) -> Option<JobHandle> {
        let mut state = self.shared.lock();
        if state.stopped {
            return None;
        }
        let report = estimator::status_report(
            &state,
            &self.shared.slots,
            self.shared.config.estimated_seconds_per_job,
            job_id,
            Instant::now(),
        );
        let entry = state.jobs.get_mut(job_id)?;
        if entry.job.status.is_terminal() || entry.waiter.is_some() {
            return None;
        }

        let (tx, rx) = oneshot::channel();
        entry.waiter = Some(tx);
        tracing::debug!(job_id = %job_id, status = %entry.job.status, "Caller attached to job");
        Some(JobHandle {
            ack: SubmitAck {
                job_id: job_id.to_string(),
                priority: entry.job.priority,
                position: report.position.unwrap_or(0),
                estimated_wait_secs: report.estimated_wait_secs.unwrap_or(0),
            },
            rx,
        })
    }

    /// Status, position and ETA of a job.
    pub fn status(&self, job_id: &str) -> StatusReport {
        let state = self.shared.lock();
        estimator::status_report(
            &state,
            &self.shared.slots,
            self.shared.config.estimated_seconds_per_job,
            job_id,
            Instant::now(),
        )
    }

    /// Aggregate queue statistics.
    pub fn stats(&self) -> QueueStats {
        let state = self.shared.lock();
        estimator::queue_stats(&state, &self.shared.slots)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    /// Re-queue every unfinished job found in the store.
    ///
    /// Jobs that were processing when the previous process died go back to
    /// `queued` keeping their attempt count, unless that attempt was their
    /// last one; those fail as `ProviderUnavailable`. Recovered jobs have no
    /// waiter (see [`Scheduler::attach`]) and bypass admission limits.
    pub fn recover(&self) -> Result<usize> {
        let jobs = self.shared.store.list_unfinished()?;
        let max_attempts = self.shared.config.max_retries;

        let mut recovered = 0;
        let mut writes = Vec::new();
        let mut state = self.shared.lock();
        if state.stopped {
            return Err(LabelqError::Stopped);
        }
        for mut job in jobs {
            if state.jobs.contains_key(&job.id) {
                continue;
            }
            if job.status == JobStatus::Processing {
                if job.attempts >= max_attempts {
                    let failure = JobFailure::ProviderUnavailable {
                        attempts: job.attempts,
                        last_error: "interrupted during the final attempt".to_string(),
                    };
                    job.mark_failed(failure.clone())?;
                    tracing::warn!(
                        job_id = %job.id,
                        attempts = job.attempts,
                        "Recovered job has no attempts left"
                    );
                    self.shared.emit(JobEvent::Failed {
                        job_id: job.id.clone(),
                        user_id: job.user_id.clone(),
                        failure,
                        at: Utc::now(),
                    });
                    writes.push(StoreWrite::Put(job.clone()));
                    state.jobs.insert(job.id.clone(), JobEntry::new(job, None));
                    continue;
                }
                job.mark_queued()?;
                writes.push(StoreWrite::Put(job.clone()));
            }
            tracing::info!(
                job_id = %job.id,
                priority = %job.priority,
                attempts = job.attempts,
                "Recovered job"
            );
            state.enqueue_back(JobEntry::new(job, None));
            recovered += 1;
        }
        self.shared.commit(state, writes);

        if recovered > 0 {
            self.shared.wake.notify_one();
        }
        Ok(recovered)
    }

    /// Drop terminal jobs older than `retention_secs`. Also runs periodically.
    pub fn prune_finished(&self) -> usize {
        self.shared.prune_finished()
    }

    /// Stop dispatching and wait for the dispatcher task to exit.
    ///
    /// Callers waiting on still-queued jobs get `SchedulerStopped`; their
    /// records stay `queued` in the store. Attempts already in flight finish
    /// normally.
    pub async fn shutdown(&self) {
        let rejected = {
            let mut state = self.shared.lock();
            state.stopped = true;
            let mut rejected = 0;
            for entry in state.jobs.values_mut() {
                if entry.job.status == JobStatus::Queued && entry.waiter.is_some() {
                    entry.resolve(Err(JobFailure::SchedulerStopped));
                    rejected += 1;
                }
            }
            rejected
        };
        tracing::info!(rejected, "Scheduler shutting down");

        let _ = self.shared.shutdown.send(true);
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Dispatcher task failed");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.shared.shutdown.send(true);
    }
}

async fn run_dispatcher(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let prune_interval = shared.config.prune_interval();
    let mut next_prune = Instant::now() + prune_interval;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let now = Instant::now();
        if now >= next_prune {
            shared.prune_finished();
            next_prune = now + prune_interval;
        }

        let cycle = {
            let mut state = shared.lock();
            let cycle = state.next_cycle(&shared.slots, now);
            let writes = match &cycle {
                Cycle::Dispatch(dispatch) => state
                    .jobs
                    .get(&dispatch.job_id)
                    .map(|entry| StoreWrite::Put(entry.job.clone()))
                    .into_iter()
                    .collect(),
                Cycle::Wait(_) => Vec::new(),
            };
            shared.commit(state, writes);
            cycle
        };

        match cycle {
            Cycle::Dispatch(dispatch) => {
                tracing::debug!(
                    job_id = %dispatch.job_id,
                    priority = %dispatch.priority,
                    attempt = dispatch.attempt,
                    "Dispatching job"
                );
                shared.emit(JobEvent::Started {
                    job_id: dispatch.job_id.clone(),
                    attempt: dispatch.attempt,
                    at: Utc::now(),
                });
                tokio::spawn(run_attempt(shared.clone(), dispatch));
            }
            Cycle::Wait(deadline) => {
                let deadline = deadline.map_or(next_prune, |d| d.min(next_prune));
                tokio::select! {
                    _ = shared.wake.notified() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    tracing::debug!("Dispatcher stopped");
}

async fn run_attempt(shared: Arc<Shared>, dispatch: Dispatch) {
    let Dispatch {
        job_id,
        payload,
        attempt,
        permit,
        ..
    } = dispatch;

    // The call starts in this poll, so this is when the gap is measured from
    shared.lock().throttle.confirm_start(Instant::now());
    shared.wake.notify_one();

    let outcome = shared.retry.attempt(shared.renderer.as_ref(), &payload, attempt).await;
    shared.finish_attempt(&job_id, attempt, outcome, permit);
    shared.wake.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{MockRenderer, MockResponse, RenderError};
    use crate::scheduler::estimator::LookupStatus;
    use crate::storage::MemoryJobStore;
    use std::sync::{OnceLock, Weak};
    use std::time::Duration;

    /// Records, for every write, whether the scheduler state lock was free.
    #[derive(Default)]
    struct LockCheckingStore {
        inner: MemoryJobStore,
        shared: OnceLock<Weak<Shared>>,
        state_free: Mutex<Vec<bool>>,
    }

    impl LockCheckingStore {
        fn record(&self) {
            let free = self
                .shared
                .get()
                .and_then(Weak::upgrade)
                .is_some_and(|shared| shared.state.try_lock().is_ok());
            self.state_free.lock().unwrap().push(free);
        }
    }

    impl JobStore for LockCheckingStore {
        fn put(&self, job: &Job) -> Result<()> {
            self.record();
            self.inner.put(job)
        }

        fn get(&self, id: &str) -> Result<Option<Job>> {
            self.inner.get(id)
        }

        fn remove(&self, id: &str) -> Result<()> {
            self.record();
            self.inner.remove(id)
        }

        fn list(&self) -> Result<Vec<Job>> {
            self.inner.list()
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            min_time_between_calls_ms: 0,
            ..SchedulerConfig::default()
        }
    }

    fn request(id: &str, plan: &str) -> JobRequest {
        JobRequest::new(id, "user-1", plan, "^XA^FDhello^FS^XZ", "4x6")
    }

    fn start(config: SchedulerConfig, renderer: MockRenderer) -> (Scheduler, Arc<MockRenderer>, Arc<MemoryJobStore>) {
        let renderer = Arc::new(renderer);
        let store = Arc::new(MemoryJobStore::new());
        let scheduler = Scheduler::start(config, renderer.clone(), store.clone()).unwrap();
        (scheduler, renderer, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_invalid_config() {
        let bad = SchedulerConfig {
            max_retries: 0,
            ..config()
        };
        let result = Scheduler::start(bad, Arc::new(MockRenderer::new()), Arc::new(MemoryJobStore::new()));
        assert!(matches!(result, Err(LabelqError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_and_wait() {
        let (scheduler, renderer, store) = start(config(), MockRenderer::new());

        let handle = scheduler.submit(request("job-1", "pro")).unwrap();
        assert_eq!(handle.job_id(), "job-1");
        assert_eq!(handle.ack().priority, Priority::High);
        assert_eq!(handle.ack().position, 0);

        let output = handle.wait().await.unwrap();
        assert!(!output.is_empty());
        assert_eq!(renderer.call_count(), 1);

        let report = scheduler.status("job-1");
        assert_eq!(report.status, LookupStatus::Completed);
        assert_eq!(report.attempts, 1);
        assert_eq!(store.get("job-1").unwrap().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_after_shutdown_rejected() {
        let (scheduler, _renderer, _store) = start(config(), MockRenderer::new());
        scheduler.shutdown().await;
        assert!(matches!(
            scheduler.submit(request("late", "free")),
            Err(LabelqError::Stopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_live_job_rejected() {
        let renderer = MockRenderer::new().with_latency(Duration::from_secs(5));
        let (scheduler, _renderer, _store) = start(config(), renderer);

        let first = scheduler.submit(request("dup", "free")).unwrap();
        assert!(matches!(
            scheduler.submit(request("dup", "free")),
            Err(LabelqError::DuplicateJob(id)) if id == "dup"
        ));

        first.wait().await.unwrap();
        // Terminal ids may be reused
        assert!(scheduler.submit(request("dup", "free")).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_follow_lifecycle() {
        let renderer = MockRenderer::new().with_script([MockResponse::Err(RenderError::Network("reset".into()))]);
        let (scheduler, _renderer, _store) = start(config(), renderer);
        let mut events = scheduler.subscribe();

        scheduler.submit(request("job-1", "free")).unwrap().wait().await.unwrap();

        let mut types = Vec::new();
        while let Ok(event) = events.try_recv() {
            types.push(event.event_type());
        }
        assert_eq!(
            types,
            vec!["job.queued", "job.started", "job.retry_scheduled", "job.started", "job.completed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_hint_pauses_other_tiers() {
        let renderer = MockRenderer::new().with_script([MockResponse::Err(RenderError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        })]);
        let (scheduler, renderer, _store) = start(config(), renderer);

        let start = Instant::now();
        let limited = scheduler.submit(request("job-1", "pro")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(renderer.call_count(), 1);

        let other = JobRequest::new("job-2", "user-2", "free", "^XA^FDother^FS^XZ", "4x6");
        let other = scheduler.submit(other).unwrap();
        other.wait().await.unwrap();
        limited.wait().await.unwrap();

        let calls = renderer.calls();
        let other_call = calls.iter().find(|c| c.document.contains("other")).unwrap();
        assert!(other_call.started_at - start >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_written_outside_state_lock() {
        let renderer = MockRenderer::new().with_script([MockResponse::Err(RenderError::Network("reset".into()))]);
        let store = Arc::new(LockCheckingStore::default());
        let no_retention = SchedulerConfig {
            retention_secs: 0,
            ..config()
        };
        let scheduler = Scheduler::start(no_retention, Arc::new(renderer), store.clone()).unwrap();
        store.shared.set(Arc::downgrade(&scheduler.shared)).unwrap();

        scheduler.submit(request("job-1", "free")).unwrap().wait().await.unwrap();
        assert_eq!(scheduler.prune_finished(), 1);

        let writes = store.state_free.lock().unwrap().clone();
        // queued, processing, retry queued, processing, completed, removed
        assert_eq!(writes.len(), 6);
        assert!(writes.iter().all(|free| *free));
        assert!(store.inner.get("job-1").unwrap().is_none());
    }
}
