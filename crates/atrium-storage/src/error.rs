//! Errors raised by the record store.

use std::fmt;

/// What the record store was doing when a backend call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOp {
    Read,
    Write,
    Delete,
    List,
}

impl fmt::Display for RecordOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::List => "list",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The database file under the data directory could not be opened.
    #[error("cannot open record store at '{path}': {reason}")]
    Open { path: String, reason: String },

    /// A single record operation failed. For [`RecordOp::List`], `key` is the prefix.
    #[error("{op} of '{key}' failed: {reason}")]
    Record {
        op: RecordOp,
        key: String,
        reason: String,
    },

    #[error("record store transaction failed: {reason}")]
    Transaction { reason: String },

    /// The blocking worker serving the call panicked or was cancelled.
    #[error("record store task for '{key}' did not complete: {reason}")]
    Task { key: String, reason: String },
}

impl StorageError {
    pub(crate) fn record(op: RecordOp, key: &str, reason: impl fmt::Display) -> Self {
        Self::Record {
            op,
            key: key.to_owned(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_errors_name_the_operation() {
        let err = StorageError::record(RecordOp::List, "directory/groups/", "disk gone");
        assert_eq!(err.to_string(), "list of 'directory/groups/' failed: disk gone");
    }
}
