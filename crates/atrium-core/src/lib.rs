//! Core library for Atrium.
//!
//! Contains the experimenter and group directory, login sessions, avatars,
//! repository usage, password recovery, the session-bound gateway
//! connection, and the controllers the admin pages are built from. This
//! crate depends on `atrium-storage` for the storage backend trait and
//! knows nothing about HTTP.

pub mod controller;
pub mod directory;
pub mod drivespace;
pub mod error;
pub mod gateway;
pub mod model;
pub mod password;
pub mod permissions;
pub mod photo;
pub mod recovery;
pub mod session;
