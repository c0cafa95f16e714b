//! Conversion job scheduler.
//!
//! This module provides:
//! - **Tier classification**: maps a subscription plan to a priority class.
//! - **Slot pool**: per-tier budget of concurrent renderer calls.
//! - **Throttle**: global minimum spacing between renderer call starts.
//! - **Retry controller**: one attempt with timeout, classification and
//!   capped exponential backoff.
//! - **Scheduler**: the dispatcher loop plus the submit/status/stats surface.
//!
//! # Architecture
//!
//! 1. `submit` classifies the job and appends it to its tier queue
//! 2. The dispatcher prefers `high`, takes a slot, claims the throttle and
//!    spawns an attempt task holding only that slot
//! 3. A retryable failure parks the job in a delay queue; when the backoff
//!    elapses it rejoins the head of its tier queue
//! 4. Terminal outcomes resolve the caller's [`JobHandle`]
//!
//! # Example
//!
//! ```ignore
//! use labelq::scheduler::{JobRequest, Scheduler};
//!
//! let scheduler = Scheduler::start(config, renderer, store)?;
//! let handle = scheduler.submit(JobRequest::new("job-1", "user-1", "pro", zpl, "4x6"))?;
//! let output = handle.wait().await?;
//! ```

mod dispatcher;
mod estimator;
mod retry;
mod slots;
mod state;
mod throttle;
mod tier;

pub use dispatcher::{JobHandle, JobRequest, Scheduler, SubmitAck};
pub use estimator::{LookupStatus, QueueStats, StatusReport, estimate_wait_secs};
pub use retry::{AttemptOutcome, RetryController, RetryDecision, RetryPolicy};
pub use slots::{SlotPermit, SlotPool};
pub use state::JobResult;
pub use throttle::Throttle;
pub use tier::{Plan, classify_plan};
