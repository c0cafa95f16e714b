//! Global throttle for outbound renderer calls.
//!
//! The provider applies its own rate limit regardless of how many calls we
//! allow in flight, so every call across all tiers must start at least
//! `min_gap` after the previous one. The throttle lives inside the scheduler
//! state mutex, which makes check-and-claim a single step.
//!
//! A claim is made when the dispatcher selects a job, but the call itself
//! starts a moment later in the attempt task. Until that task confirms its
//! start no further claim succeeds, and the gap is measured from whichever of
//! the two instants is later.
//!
//! When the provider answers 429 with a `Retry-After`, the throttle is pushed
//! forward so that no tier calls it again before then.

use std::time::Duration;

use tokio::time::Instant;

/// Global call-spacing state shared across all tiers.
#[derive(Debug)]
pub struct Throttle {
    min_gap: Duration,
    /// Start of the last claimed call.
    last_call: Option<Instant>,
    /// Provider-imposed pause (None = no active limit).
    deferred_until: Option<Instant>,
    /// A claimed call has not reported its actual start yet.
    start_pending: bool,
    claims: u64,
}

impl Throttle {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_call: None,
            deferred_until: None,
            start_pending: false,
            claims: 0,
        }
    }

    pub fn min_gap(&self) -> Duration {
        self.min_gap
    }

    /// Earliest instant at which a claim can succeed (None = immediately).
    pub fn next_allowed(&self) -> Option<Instant> {
        let gap_ready = self.last_call.map(|t| t + self.min_gap);
        match (gap_ready, self.deferred_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Claim the right to start a call at `now`.
    ///
    /// On success `now` becomes the last call start until the caller reports
    /// the real start with [`Throttle::confirm_start`]. Otherwise returns the
    /// instant at which a claim can succeed.
    pub fn try_claim(&mut self, now: Instant) -> Result<(), Instant> {
        if let Some(ready) = self.next_allowed()
            && now < ready
        {
            return Err(ready);
        }
        self.last_call = Some(now);
        self.deferred_until = None;
        self.start_pending = true;
        self.claims += 1;
        Ok(())
    }

    /// Record the instant a claimed call actually started.
    pub fn confirm_start(&mut self, at: Instant) {
        self.start_pending = false;
        self.last_call = Some(self.last_call.map_or(at, |t| t.max(at)));
    }

    /// True between a successful claim and its [`Throttle::confirm_start`].
    pub fn start_pending(&self) -> bool {
        self.start_pending
    }

    /// Hold off every call until `until` (provider rate limit).
    pub fn defer_until(&mut self, until: Instant) {
        let until = self.deferred_until.map_or(until, |d| d.max(until));
        self.deferred_until = Some(until);

        tracing::warn!(
            pause_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
            "Provider rate limited, pausing all renderer calls"
        );
    }

    pub fn last_call(&self) -> Option<Instant> {
        self.last_call
    }

    /// Number of successful claims.
    pub fn claims(&self) -> u64 {
        self.claims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_claim_succeeds() {
        let mut t = Throttle::new(Duration::from_millis(1000));
        assert!(t.next_allowed().is_none());
        assert!(t.try_claim(Instant::now()).is_ok());
        assert_eq!(t.claims(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_claim_waits_for_gap() {
        let mut t = Throttle::new(Duration::from_millis(1000));
        let start = Instant::now();
        t.try_claim(start).unwrap();
        t.confirm_start(start);

        let err = t.try_claim(start + Duration::from_millis(400)).unwrap_err();
        assert_eq!(err, start + Duration::from_millis(1000));
        assert_eq!(t.last_call(), Some(start));

        assert!(t.try_claim(start + Duration::from_millis(1000)).is_ok());
        assert_eq!(t.claims(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_gap_never_blocks() {
        let mut t = Throttle::new(Duration::ZERO);
        let now = Instant::now();
        assert!(t.try_claim(now).is_ok());
        t.confirm_start(now);
        assert!(t.try_claim(now).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_defer_extends_past_gap() {
        let mut t = Throttle::new(Duration::from_millis(1000));
        let start = Instant::now();
        t.try_claim(start).unwrap();
        t.confirm_start(start);
        t.defer_until(start + Duration::from_secs(5));

        let err = t.try_claim(start + Duration::from_secs(2)).unwrap_err();
        assert_eq!(err, start + Duration::from_secs(5));
        assert!(t.try_claim(start + Duration::from_secs(5)).is_ok());
        assert_eq!(t.next_allowed(), Some(start + Duration::from_secs(6)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_defer_keeps_later_deadline() {
        let mut t = Throttle::new(Duration::ZERO);
        let start = Instant::now();
        t.defer_until(start + Duration::from_secs(10));
        t.defer_until(start + Duration::from_secs(3));
        assert_eq!(t.next_allowed(), Some(start + Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_start_pushes_next_claim() {
        let mut t = Throttle::new(Duration::from_millis(1000));
        let claimed = Instant::now();
        t.try_claim(claimed).unwrap();
        assert!(t.start_pending());

        let started = claimed + Duration::from_millis(30);
        t.confirm_start(started);
        assert!(!t.start_pending());
        assert_eq!(t.last_call(), Some(started));

        let err = t.try_claim(claimed + Duration::from_millis(1000)).unwrap_err();
        assert_eq!(err, started + Duration::from_millis(1000));
        assert!(t.try_claim(started + Duration::from_millis(1000)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_never_moves_last_call_back() {
        let mut t = Throttle::new(Duration::from_millis(500));
        let claimed = Instant::now() + Duration::from_millis(10);
        t.try_claim(claimed).unwrap();
        t.confirm_start(claimed - Duration::from_millis(10));
        assert_eq!(t.last_call(), Some(claimed));
    }
}
