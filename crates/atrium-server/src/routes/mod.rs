//! HTTP route handlers for Atrium.
//!
//! Routes are organized by page family:
//! - `auth`: login, logout, forgotten password, and the `/` dispatcher
//! - `experimenters`: experimenter list and form, passwords, LDAP links
//! - `groups`: group list and form, membership, owner permissions
//! - `account`: my account, my photo, avatar upload and crop
//! - `drivespace`: repository usage page and its JSON feed
//! - `sys`: health check

pub mod account;
pub mod auth;
pub mod drivespace;
pub mod experimenters;
pub mod groups;
pub mod sys;

use std::sync::Arc;

use axum::extract::{FromRequest, Request};
use axum::http::HeaderValue;
use axum::middleware as axum_mw;
use axum::Router;
use axum_extra::extract::Form;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use atrium_core::error::{DirectoryError, GatewayError, PhotoError};

use crate::error::AppError;
use crate::middleware::session_middleware;
use crate::state::AppState;

/// Build the Axum router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    // Admin pages go through the session middleware layer.
    let authenticated_routes = Router::new()
        .merge(auth::session_router())
        .merge(experimenters::router())
        .merge(groups::router())
        .merge(account::router(state.max_photo_bytes))
        .merge(drivespace::router())
        .route_layer(axum_mw::from_fn_with_state(
            Arc::clone(&state),
            session_middleware,
        ));

    Router::new()
        .merge(auth::router())
        .merge(sys::router())
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}

/// `/{action}` and `/{action}/{id}` path segments.
#[derive(Debug, Deserialize)]
pub struct ActionPath {
    pub action: String,
    #[serde(default)]
    pub id: Option<u64>,
}

impl ActionPath {
    /// The id segment, required by every action that edits a record.
    ///
    /// # Errors
    ///
    /// [`AppError::NotFound`] when the path has no id.
    pub fn require_id(&self) -> Result<u64, AppError> {
        self.id
            .ok_or_else(|| AppError::NotFound(format!("'{}' needs a record id", self.action)))
    }
}

/// Read an urlencoded body into `T`. Repeated keys collect into `Vec`s.
///
/// # Errors
///
/// [`AppError::BadRequest`] for a missing or malformed body.
pub async fn parse_form<T: DeserializeOwned>(req: Request) -> Result<T, AppError> {
    let Form(value) = Form::<T>::from_request(req, &())
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    Ok(value)
}

/// Errors a form page shows next to the form instead of failing the
/// request. Anything else is returned as an [`AppError`].
///
/// # Errors
///
/// The converted error when it is not a user-correctable one.
pub fn inline_error(err: GatewayError) -> Result<String, AppError> {
    match err {
        GatewayError::Forbidden { .. }
        | GatewayError::IncorrectPassword
        | GatewayError::LdapManaged { .. }
        | GatewayError::Directory(
            DirectoryError::Invalid { .. }
            | DirectoryError::Protected { .. }
            | DirectoryError::NameTaken { .. }
            | DirectoryError::EmailTaken { .. }
            | DirectoryError::GroupNameTaken { .. },
        )
        | GatewayError::Photo(PhotoError::InvalidImage { .. } | PhotoError::InvalidCrop { .. }) => {
            Ok(err.to_string())
        }
        other => Err(other.into()),
    }
}

/// Parse submitted id strings, dropping anything that is not an id.
pub fn parse_ids(raw: &[String]) -> Vec<u64> {
    raw.iter().filter_map(|s| s.trim().parse().ok()).collect()
}
