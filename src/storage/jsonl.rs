//! JSONL-based job store with in-memory caching.
//!
//! Every `put` appends the full record as one line; on load the last line for
//! an id wins. `remove` rewrites the file from the cache, which also compacts
//! superseded lines.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::JobStore;
use crate::domain::Job;
use crate::error::{LabelqError, Result};

const JOBS_FILE: &str = "jobs.jsonl";

/// JSONL-backed job store.
pub struct JsonlJobStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, Job>>,
}

impl JsonlJobStore {
    /// Open or create a store in the given directory.
    pub fn open(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref();
        fs::create_dir_all(base_path)?;
        let path = base_path.join(JOBS_FILE);
        let cache = Self::load(&path)?;
        tracing::debug!(path = %path.display(), records = cache.len(), "Opened JSONL job store");
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<HashMap<String, Job>> {
        let mut records = HashMap::new();
        if !path.exists() {
            return Ok(records);
        }

        let reader = BufReader::new(File::open(path)?);
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Job>(&line) {
                Ok(job) => {
                    records.insert(job.id.clone(), job);
                }
                Err(e) => {
                    // A torn final line after a crash is expected; skip it.
                    tracing::warn!(line = lineno + 1, error = %e, "Skipping unreadable job record");
                }
            }
        }
        Ok(records)
    }

    /// Append a record to the JSONL file.
    fn append_to_file(&self, job: &Job) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(job)?)?;
        Ok(())
    }

    /// Rewrite the entire file from cache.
    fn rewrite_file(&self, records: &HashMap<String, Job>) -> Result<()> {
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&tmp)?;
            let mut jobs: Vec<&Job> = records.values().collect();
            jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            for job in jobs {
                writeln!(file, "{}", serde_json::to_string(job)?)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl JobStore for JsonlJobStore {
    fn put(&self, job: &Job) -> Result<()> {
        let mut cache = self.cache.lock().map_err(|e| LabelqError::Storage(e.to_string()))?;

        // Append to file first (source of truth)
        self.append_to_file(job)?;

        cache.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Job>> {
        let cache = self.cache.lock().map_err(|e| LabelqError::Storage(e.to_string()))?;
        Ok(cache.get(id).cloned())
    }

    fn remove(&self, id: &str) -> Result<()> {
        let mut cache = self.cache.lock().map_err(|e| LabelqError::Storage(e.to_string()))?;
        if cache.remove(id).is_some() {
            self.rewrite_file(&cache)?;
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<Job>> {
        let cache = self.cache.lock().map_err(|e| LabelqError::Storage(e.to_string()))?;
        Ok(cache.values().cloned().collect())
    }
}
