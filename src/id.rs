//! ID generation utilities for labelq
//!
//! Job ids are supplied by callers. The CLI derives them from the document so
//! that resubmitting the same file maps onto the same job.

use sha2::{Digest, Sha256};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Derive a stable job ID from a user and document
///
/// Format: `job-{first 16 hex chars of sha256(user_id, label_size, document)}`
/// Example: `job-9f86d081884c7d65`
pub fn derive_job_id(user_id: &str, label_size: &str, document: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(label_size.as_bytes());
    hasher.update([0u8]);
    hasher.update(document.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("job-{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        assert!(ts > 1577836800000); // 2020-01-01
        assert!(ts < 4102444800000); // 2100-01-01
    }

    #[test]
    fn test_derive_job_id_format() {
        let id = derive_job_id("user-1", "4x6", "^XA^XZ");
        assert!(id.starts_with("job-"));
        let suffix = &id["job-".len()..];
        assert_eq!(suffix.len(), 16);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_derive_job_id_is_stable() {
        assert_eq!(
            derive_job_id("user-1", "4x6", "^XA^XZ"),
            derive_job_id("user-1", "4x6", "^XA^XZ")
        );
    }

    #[test]
    fn test_derive_job_id_depends_on_all_inputs() {
        let base = derive_job_id("user-1", "4x6", "^XA^XZ");
        assert_ne!(base, derive_job_id("user-2", "4x6", "^XA^XZ"));
        assert_ne!(base, derive_job_id("user-1", "4x4", "^XA^XZ"));
        assert_ne!(base, derive_job_id("user-1", "4x6", "^XA^FDx^XZ"));
    }
}
