//! Slot pool: per-tier concurrency permits for in-flight renderer calls.
//!
//! A slot is held as a [`SlotPermit`]; dropping the permit releases the slot,
//! so every exit path of an attempt (success, failure, retry, unwinding)
//! releases exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::domain::{PerTier, Priority};

#[derive(Debug)]
struct SlotCounters {
    total: PerTier<usize>,
    active: PerTier<AtomicUsize>,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Fixed concurrency budget partitioned across priority tiers.
#[derive(Debug, Clone)]
pub struct SlotPool {
    inner: Arc<SlotCounters>,
}

impl SlotPool {
    pub fn new(total: PerTier<usize>) -> Self {
        Self {
            inner: Arc::new(SlotCounters {
                total,
                active: PerTier::new(AtomicUsize::new(0), AtomicUsize::new(0)),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Take a slot for `priority` if one is free. Never blocks.
    pub fn try_acquire(&self, priority: Priority) -> Option<SlotPermit> {
        let total = *self.inner.total.get(priority);
        self.inner
            .active
            .get(priority)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < total).then_some(n + 1))
            .ok()?;
        self.inner.acquired.fetch_add(1, Ordering::Relaxed);

        Some(SlotPermit {
            pool: self.inner.clone(),
            priority,
        })
    }

    pub fn active(&self, priority: Priority) -> usize {
        self.inner.active.get(priority).load(Ordering::Acquire)
    }

    pub fn total(&self, priority: Priority) -> usize {
        *self.inner.total.get(priority)
    }

    pub fn available(&self, priority: Priority) -> usize {
        self.total(priority).saturating_sub(self.active(priority))
    }

    pub fn active_counts(&self) -> PerTier<usize> {
        PerTier::new(self.active(Priority::High), self.active(Priority::Normal))
    }

    pub fn totals(&self) -> PerTier<usize> {
        self.inner.total
    }

    /// Number of successful acquisitions since creation
    pub fn acquired_total(&self) -> u64 {
        self.inner.acquired.load(Ordering::Relaxed)
    }

    /// Number of releases since creation
    pub fn released_total(&self) -> u64 {
        self.inner.released.load(Ordering::Relaxed)
    }
}

impl SlotCounters {
    fn release(&self, priority: Priority) {
        let released = self
            .active
            .get(priority)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if released.is_err() {
            tracing::error!(priority = %priority, "Slot released with no active slots");
            return;
        }
        self.released.fetch_add(1, Ordering::Relaxed);
    }
}

/// An acquired slot; released on drop.
#[derive(Debug)]
pub struct SlotPermit {
    pool: Arc<SlotCounters>,
    priority: Priority,
}

impl SlotPermit {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Release the slot now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.pool.release(self.priority);
    }
}
