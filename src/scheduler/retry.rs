//! Retry/backoff controller wrapping a single renderer attempt.
//!
//! Delays follow capped exponential backoff:
//! `min(base * 2^(attempts - 1), max)`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;

use crate::config::SchedulerConfig;
use crate::domain::{JobFailure, LabelPayload};
use crate::renderer::{RenderError, RenderOutput, Renderer};

/// Retry limits and delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp(JobFailure),
}

impl RetryPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }

    /// Delay before the attempt following attempt number `attempts` (1-based).
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay)
    }

    /// Classify a failure of attempt number `attempts`.
    pub fn decide(&self, attempts: u32, error: &RenderError) -> RetryDecision {
        if !error.is_transient() {
            return RetryDecision::GiveUp(JobFailure::InvalidInput {
                message: error.to_string(),
            });
        }
        if attempts >= self.max_retries {
            return RetryDecision::GiveUp(JobFailure::ProviderUnavailable {
                attempts,
                last_error: error.to_string(),
            });
        }

        let mut delay = self.backoff_for(attempts);
        if let Some(hint) = error.retry_after() {
            delay = delay.max(hint).min(self.max_delay);
        }
        RetryDecision::Retry(delay)
    }
}

/// Result of one attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Rendered(RenderOutput),
    Retry { delay: Duration, error: RenderError },
    Failed(JobFailure),
}

/// Runs one renderer call and classifies its result.
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self { policy, call_timeout }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(RetryPolicy::from_config(config), config.call_timeout())
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute attempt number `attempts` (1-based) of a job.
    pub async fn attempt(&self, renderer: &dyn Renderer, payload: &LabelPayload, attempts: u32) -> AttemptOutcome {
        if let Err(message) = payload.validate() {
            return AttemptOutcome::Failed(JobFailure::InvalidInput { message });
        }

        let call = AssertUnwindSafe(renderer.render(payload)).catch_unwind();
        let result = match tokio::time::timeout(self.call_timeout, call).await {
            Err(_) => Err(RenderError::Timeout(self.call_timeout)),
            Ok(Err(panic)) => Err(RenderError::Aborted(panic_message(panic.as_ref()))),
            Ok(Ok(result)) => result,
        };

        let error = match result {
            Ok(output) => return AttemptOutcome::Rendered(output),
            Err(e) => e,
        };

        match self.policy.decide(attempts, &error) {
            RetryDecision::Retry(delay) => AttemptOutcome::Retry { delay, error },
            RetryDecision::GiveUp(failure) => AttemptOutcome::Failed(failure),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "renderer panicked".to_string()
    }
}
