//! Storage layer for labelq - the persistent job store collaborator.
//!
//! The scheduler only depends on the [`JobStore`] trait. Two implementations
//! ship with the crate: an in-memory map and an append-only JSONL file.

mod jsonl;
mod memory;
mod traits;

use std::sync::Arc;

use crate::config::StorageConfig;
use crate::error::Result;

pub use jsonl::JsonlJobStore;
pub use memory::MemoryJobStore;
pub use traits::JobStore;

/// Build the job store selected by configuration.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn JobStore>> {
    match &config.jsonl_dir {
        Some(dir) => Ok(Arc::new(JsonlJobStore::open(dir)?)),
        None => Ok(Arc::new(MemoryJobStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_store_memory_by_default() {
        let store = open_store(&StorageConfig::default()).unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_open_store_jsonl() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig {
            jsonl_dir: Some(temp.path().join("store")),
            recover_on_start: false,
        };
        let store = open_store(&config).unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(temp.path().join("store").exists());
    }
}
