//! Shared application state for the Atrium server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`.

use std::sync::Arc;

use atrium_core::gateway::DataServer;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Directory, sessions, photos, repository usage and recovery.
    pub server: Arc<DataServer>,
    /// Mark the session cookie `Secure`.
    pub secure_cookies: bool,
    /// Largest accepted avatar upload, in bytes.
    pub max_photo_bytes: usize,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("secure_cookies", &self.secure_cookies)
            .field("max_photo_bytes", &self.max_photo_bytes)
            .finish_non_exhaustive()
    }
}
