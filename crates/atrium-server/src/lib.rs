//! Atrium HTTP server.
//!
//! Wires the directory, session store, photo store and repository usage
//! from `atrium-core` into an Axum server that renders the admin panel:
//! experimenters, groups, my account, avatars and drive space.

pub mod config;
pub mod error;
pub mod forms;
pub mod mailer;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod ui;
