//! In-memory storage backend.
//!
//! Keeps every record in a `BTreeMap` behind a `RwLock`. Nothing survives a
//! restart, which makes it the backend of choice for tests and for a
//! disposable development panel.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{StorageBackend, StorageError};

/// An in-memory storage backend.
///
/// Clones share the same map, so a test can hand one clone to the directory
/// and inspect raw keys through another.
///
/// # Examples
///
/// ```
/// # use atrium_storage::{MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend.put("directory/groups/3", b"{}").await.unwrap();
/// assert!(backend.exists("directory/groups/3").await.unwrap());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the backend holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.data
            .write()
            .await
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().await;
        Ok(data
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.read().await.contains_key(key))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("directory/experimenters/9").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_overwrites_previous_value() {
        let backend = MemoryBackend::new();
        backend.put("sessions/abc", b"v1").await.unwrap();
        backend.put("sessions/abc", b"v2").await.unwrap();
        assert_eq!(
            backend.get("sessions/abc").await.unwrap(),
            Some(b"v2".to_vec())
        );
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.put("photos/3", b"jpeg").await.unwrap();
        backend.delete("photos/3").await.unwrap();
        backend.delete("photos/3").await.unwrap();
        assert!(!backend.exists("photos/3").await.unwrap());
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn list_stops_at_prefix_boundary() {
        let backend = MemoryBackend::new();
        backend.put("directory/groups/00000000000000000003", b"g").await.unwrap();
        backend.put("directory/groups/00000000000000000010", b"g").await.unwrap();
        backend.put("directory/experimenters/00000000000000000002", b"e").await.unwrap();
        backend.put("sessions/x", b"s").await.unwrap();

        let keys = backend.list("directory/groups/").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "directory/groups/00000000000000000003",
                "directory/groups/00000000000000000010",
            ]
        );
        assert!(backend.list("photos/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        backend.put("k", b"v").await.unwrap();
        assert_eq!(clone.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
