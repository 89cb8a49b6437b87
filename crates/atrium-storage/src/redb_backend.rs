//! Persistent redb storage backend.
//!
//! redb is a pure-Rust embedded B-tree database, so the panel builds without
//! any C/C++ toolchain. Every operation runs in its own transaction on the
//! Tokio blocking pool.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, TableDefinition};
use tracing::debug;

use crate::{RecordOp, StorageBackend, StorageError};

/// Single table holding every record. Namespacing lives in the key.
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// A storage backend backed by a redb database file.
///
/// # Examples
///
/// ```no_run
/// # use atrium_storage::RedbBackend;
/// let backend = RedbBackend::open("/var/lib/atrium/atrium.redb").unwrap();
/// ```
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn txn_error(e: impl Display) -> StorageError {
    StorageError::Transaction {
        reason: e.to_string(),
    }
}

impl RedbBackend {
    /// Open or create a redb database at `path`, creating parent directories
    /// as needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the file cannot be created or opened,
    /// or [`StorageError::Transaction`] if the records table cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let open_error = |reason: String| StorageError::Open {
            path: path.display().to_string(),
            reason,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| open_error(e.to_string()))?;
        }

        let db = Database::create(path).map_err(|e| open_error(e.to_string()))?;

        let txn = db.begin_write().map_err(txn_error)?;
        txn.open_table(RECORDS).map_err(txn_error)?;
        txn.commit().map_err(txn_error)?;

        debug!(path = %path.display(), "redb storage opened");

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Filesystem path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` against the database on the blocking pool.
    async fn blocking<T, F>(&self, key: &str, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StorageError::Task {
                key,
                reason: e.to_string(),
            })?
    }
}

#[async_trait::async_trait]
impl StorageBackend for RedbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let owned = key.to_owned();
        self.blocking(key, move |db| {
            let txn = db.begin_read().map_err(txn_error)?;
            let table = txn.open_table(RECORDS).map_err(txn_error)?;
            let value = table
                .get(owned.as_str())
                .map_err(|e| StorageError::record(RecordOp::Read, &owned, e))?;
            Ok(value.map(|v| v.value().to_vec()))
        })
        .await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let owned = key.to_owned();
        let value = value.to_vec();
        self.blocking(key, move |db| {
            let txn = db.begin_write().map_err(txn_error)?;
            {
                let mut table = txn.open_table(RECORDS).map_err(txn_error)?;
                table
                    .insert(owned.as_str(), value.as_slice())
                    .map_err(|e| StorageError::record(RecordOp::Write, &owned, e))?;
            }
            txn.commit().map_err(txn_error)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let owned = key.to_owned();
        self.blocking(key, move |db| {
            let txn = db.begin_write().map_err(txn_error)?;
            {
                let mut table = txn.open_table(RECORDS).map_err(txn_error)?;
                table
                    .remove(owned.as_str())
                    .map_err(|e| StorageError::record(RecordOp::Delete, &owned, e))?;
            }
            txn.commit().map_err(txn_error)
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let owned = prefix.to_owned();
        self.blocking(prefix, move |db| {
            let list_error = |e: &dyn Display| StorageError::record(RecordOp::List, &owned, e);
            let txn = db.begin_read().map_err(txn_error)?;
            let table = txn.open_table(RECORDS).map_err(txn_error)?;
            let range = table
                .range(owned.as_str()..)
                .map_err(|e| list_error(&e))?;

            let mut keys = Vec::new();
            for entry in range {
                let (k, _) = entry.map_err(|e| list_error(&e))?;
                let k = k.value();
                if !k.starts_with(owned.as_str()) {
                    break;
                }
                keys.push(k.to_owned());
            }
            Ok(keys)
        })
        .await
    }
}
