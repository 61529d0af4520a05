//! Object storage for page artifacts.
//!
//! The pipeline only ever writes: each base image and each variant is `put`
//! under a deterministic key from [`crate::naming::DocumentName`], and the
//! returned URL is stored on the media record. Putting the same key twice
//! overwrites, which keeps re-runs idempotent.

pub mod local;
pub mod memory;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

use crate::error::StorageError;
use async_trait::async_trait;

pub type StorageResult<T> = Result<T, StorageError>;

/// Write-only blob store returning stable public URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key` and return its public URL.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<String>;

    /// URL an object stored under `key` is (or would be) served from.
    fn url_for(&self, key: &str) -> String;
}

/// Reject keys that could escape a storage root.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg == ".." || seg == "." || seg.is_empty())
    {
        return Err(StorageError::InvalidKey(format!(
            "'{key}' is empty, absolute, or contains a relative segment"
        )));
    }
    Ok(())
}

pub(crate) fn join_url(base_url: &str, key: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_with_traversal_are_rejected() {
        assert!(validate_key("deck/deck_page_1.jpg").is_ok());
        assert!(validate_key("Week 3/Week 3_page_1 (1)-card.jpg").is_ok());
        for bad in ["", "/etc/passwd", "../x.jpg", "a/../../b", "a//b", "a\\b", "./a"] {
            assert!(validate_key(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn url_join_drops_duplicate_slash() {
        assert_eq!(join_url("https://cdn.example/", "a/b.jpg"), "https://cdn.example/a/b.jpg");
        assert_eq!(join_url("https://cdn.example", "a/b.jpg"), "https://cdn.example/a/b.jpg");
    }
}
