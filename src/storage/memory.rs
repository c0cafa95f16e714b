//! In-memory job store.

use std::collections::HashMap;
use std::sync::RwLock;

use super::traits::JobStore;
use crate::domain::Job;
use crate::error::{LabelqError, Result};

/// Job store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn put(&self, job: &Job) -> Result<()> {
        self.jobs
            .write()
            .map_err(|e| LabelqError::Storage(e.to_string()))?
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .read()
            .map_err(|e| LabelqError::Storage(e.to_string()))?
            .get(id)
            .cloned())
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.jobs
            .write()
            .map_err(|e| LabelqError::Storage(e.to_string()))?
            .remove(id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .read()
            .map_err(|e| LabelqError::Storage(e.to_string()))?
            .values()
            .cloned()
            .collect())
    }
}
