//! Job store trait definition.

use crate::domain::Job;
use crate::error::Result;

/// Key-value store for job records, keyed by job id.
///
/// The scheduler writes every state transition through this trait. Replication,
/// indexing and backup are the implementation's concern.
pub trait JobStore: Send + Sync {
    /// Insert or replace a job record.
    fn put(&self, job: &Job) -> Result<()>;

    /// Get a job record by ID.
    fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Remove a job record. Removing an unknown id is not an error.
    fn remove(&self, id: &str) -> Result<()>;

    /// List all job records.
    fn list(&self) -> Result<Vec<Job>>;

    /// List records that have not reached a terminal state, oldest first.
    fn list_unfinished(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .list()?
            .into_iter()
            .filter(|j| !j.status.is_terminal())
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }
}
