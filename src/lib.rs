//! labelq - a tier-aware conversion job scheduler
//!
//! labelq accepts ZPL label rendering jobs, classifies them by subscriber
//! plan, bounds concurrent calls per tier, spaces calls to the external
//! renderer, and retries transient failures with backoff.

pub mod config;
pub mod domain;
pub mod error;
pub mod id;
pub mod renderer;
pub mod scheduler;
pub mod storage;

pub use error::{LabelqError, Result};
