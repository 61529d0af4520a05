use super::{join_url, validate_key, ObjectStore, StorageResult};
use crate::error::StorageError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    objects: HashMap<String, (Vec<u8>, String)>,
    puts: usize,
    failing_keys: HashSet<String>,
}

/// In-memory [`ObjectStore`] for tests and dry runs.
///
/// Keys registered with [`fail_key`](Self::fail_key) reject every `put`.
pub struct MemoryObjectStore {
    base_url: String,
    state: Mutex<State>,
}

impl MemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make every future `put` to `key` fail.
    pub fn fail_key(&self, key: impl Into<String>) {
        self.state().failing_keys.insert(key.into());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.state().objects.get(key).map(|(b, _)| b.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.state().objects.get(key).map(|(_, ct)| ct.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state().objects.contains_key(key)
    }

    /// Distinct keys currently stored.
    pub fn len(&self) -> usize {
        self.state().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total successful `put` calls, overwrites included.
    pub fn put_count(&self) -> usize {
        self.state().puts
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.state().objects.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new("https://objects.test")
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<String> {
        validate_key(key)?;
        let mut state = self.state();
        if state.failing_keys.contains(key) {
            return Err(StorageError::UploadFailed(format!("injected failure for '{key}'")));
        }
        state
            .objects
            .insert(key.to_string(), (data, content_type.to_string()));
        state.puts += 1;
        drop(state);
        Ok(self.url_for(key))
    }

    fn url_for(&self, key: &str) -> String {
        join_url(&self.base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_counts_puts() {
        let store = MemoryObjectStore::default();
        let url = store.put("d/d_page_1.jpg", vec![1, 2], "image/jpeg").await.unwrap();
        store.put("d/d_page_1.jpg", vec![3], "image/jpeg").await.unwrap();

        assert_eq!(url, "https://objects.test/d/d_page_1.jpg");
        assert_eq!(store.len(), 1);
        assert_eq!(store.put_count(), 2);
        assert_eq!(store.get("d/d_page_1.jpg"), Some(vec![3]));
        assert_eq!(store.content_type("d/d_page_1.jpg").as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn injected_failure_rejects_put() {
        let store = MemoryObjectStore::default();
        store.fail_key("d/d_page_2.jpg");
        assert!(store.put("d/d_page_2.jpg", vec![1], "image/jpeg").await.is_err());
        assert!(store.is_empty());
    }
}
