//! Error types for `atrium-core`.
//!
//! Each subsystem has its own enum. Variants carry the ids or names needed to
//! diagnose a failure from the log line alone; none of them ever carries a
//! password or a password hash.

use atrium_storage::StorageError;

/// Errors from password hashing.
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    /// Argon2 could not hash the password.
    #[error("password hashing failed: {reason}")]
    Hash { reason: String },

    /// The blocking hashing task panicked or was cancelled.
    #[error("password task did not complete: {reason}")]
    Task { reason: String },
}

/// Errors from the experimenter and group directory.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("experimenter {id} not found")]
    ExperimenterNotFound { id: u64 },

    #[error("group {id} not found")]
    GroupNotFound { id: u64 },

    /// The login name is already used by another experimenter.
    #[error("username '{name}' already exists")]
    NameTaken { name: String },

    /// The email is already used by another experimenter.
    #[error("email '{email}' already exists")]
    EmailTaken { email: String },

    /// The group name is already used by another group.
    #[error("group name '{name}' already exists")]
    GroupNameTaken { name: String },

    /// The request violates a directory invariant.
    #[error("invalid directory request: {reason}")]
    Invalid { reason: String },

    /// Built-in accounts and groups cannot be removed or renamed.
    #[error("'{name}' is a built-in record and cannot be changed this way")]
    Protected { name: String },

    /// Unknown user, wrong password, or an account that may not log in.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// A stored record could not be encoded or decoded.
    #[error("directory record '{key}' is corrupt: {reason}")]
    Serialization { key: String, reason: String },

    #[error("directory password error: {0}")]
    Password(#[from] PasswordError),

    #[error("directory storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from the session store.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("session expired at {expired_at}")]
    Expired { expired_at: String },

    #[error("session record is corrupt: {reason}")]
    Serialization { reason: String },

    #[error("session storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from avatar handling.
#[derive(Debug, thiserror::Error)]
pub enum PhotoError {
    /// The experimenter has no uploaded photo.
    #[error("experimenter {id} has no photo")]
    NoPhoto { id: u64 },

    /// The upload is not an image the decoder understands.
    #[error("not a supported image: {reason}")]
    InvalidImage { reason: String },

    /// The crop box is empty or outside the image.
    #[error("invalid crop box: {reason}")]
    InvalidCrop { reason: String },

    /// Re-encoding the image as JPEG failed.
    #[error("photo encoding failed: {reason}")]
    Encoding { reason: String },

    /// The blocking image task panicked or was cancelled.
    #[error("photo task did not complete: {reason}")]
    Task { reason: String },

    #[error("photo storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from repository disk-usage measurement.
#[derive(Debug, thiserror::Error)]
pub enum DriveSpaceError {
    #[error("cannot measure '{path}': {reason}")]
    Io { path: String, reason: String },

    #[error("drive space task did not complete: {reason}")]
    Task { reason: String },

    #[error("drive space directory error: {0}")]
    Directory(#[from] DirectoryError),
}

/// Errors from the forgotten-password flow.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// No mail delivery is configured on this server.
    #[error("password recovery is not enabled on this server")]
    Disabled,

    /// The username and email do not identify an account.
    #[error("no account matches the given username and email")]
    NoMatch,

    /// The account authenticates against LDAP; its password is not ours to reset.
    #[error("account '{name}' is managed by LDAP")]
    LdapManaged { name: String },

    /// The notifier failed to deliver the new password.
    #[error("failed to deliver new password: {reason}")]
    Delivery { reason: String },

    #[error("recovery directory error: {0}")]
    Directory(#[from] DirectoryError),
}

/// Errors surfaced through a session-bound [`Connection`](crate::gateway::Connection).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The connected experimenter may not perform this operation.
    #[error("permission denied: {reason}")]
    Forbidden { reason: String },

    /// The supplied current password does not match.
    #[error("current password is not valid")]
    IncorrectPassword,

    /// Password changes are refused for LDAP-managed accounts.
    #[error("password of '{name}' is managed by LDAP")]
    LdapManaged { name: String },

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Photo(#[from] PhotoError),

    #[error(transparent)]
    DriveSpace(#[from] DriveSpaceError),
}
