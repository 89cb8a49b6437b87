//! Record store for the Atrium admin panel.
//!
//! Everything the panel persists lives behind [`StorageBackend`]: directory
//! records under `directory/`, login sessions under `sessions/` and avatar
//! JPEGs under `photos/`. The store sees bytes only; `atrium-core` owns the
//! JSON encoding and the key layout.
//!
//! [`MemoryBackend`] serves tests and throwaway panels. [`RedbBackend`]
//! (feature `redb-backend`) keeps records in one redb file.

mod error;
mod memory;
#[cfg(feature = "redb-backend")]
mod redb_backend;

pub use error::{RecordOp, StorageError};
pub use memory::MemoryBackend;
#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;

/// Byte-valued records addressed by `/`-separated keys.
///
/// The directory, session and photo stores share one backend through
/// `Arc<dyn StorageBackend>`, each under its own key prefix.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// The record under `key`, or `None`.
    ///
    /// # Errors
    ///
    /// [`StorageError::Record`] with [`RecordOp::Read`] when the backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the record under `key`.
    ///
    /// # Errors
    ///
    /// [`StorageError::Record`] with [`RecordOp::Write`] when the backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Drop the record under `key`; a missing record is fine.
    ///
    /// # Errors
    ///
    /// [`StorageError::Record`] with [`RecordOp::Delete`] when the backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Keys under `prefix`, sorted. Directory keys zero-pad ids so this is id order.
    ///
    /// # Errors
    ///
    /// [`StorageError::Record`] with [`RecordOp::List`] when the backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Whether a record is stored under `key`. Bootstrap uses this to seed
    /// the built-in accounts and groups only once.
    ///
    /// # Errors
    ///
    /// Same as [`get`](StorageBackend::get).
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
