//! HTTP error types for the Atrium server.
//!
//! Maps domain errors from `atrium-core` into responses. A missing or
//! expired session becomes a redirect to the login page; everything else
//! renders an HTML error page with the matching status code.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use tracing::error;

use atrium_core::error::{
    DirectoryError, DriveSpaceError, GatewayError, PhotoError, RecoveryError, SessionError,
};

use crate::ui;

/// Application-level error returned from HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// No valid session: send the browser to the login page.
    #[error("login required")]
    Unauthorized,
    /// The connected experimenter may not do this.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested record not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Client sent invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// A uniqueness clash.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Internal server error. The message is logged, not shown.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => return Redirect::to("/login").into_response(),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(msg) => {
                error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred.".to_owned(),
                )
            }
        };
        (status, Html(ui::error_page(status, &message))).into_response()
    }
}

impl From<DirectoryError> for AppError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::ExperimenterNotFound { .. } | DirectoryError::GroupNotFound { .. } => {
                Self::NotFound(err.to_string())
            }
            DirectoryError::NameTaken { .. }
            | DirectoryError::EmailTaken { .. }
            | DirectoryError::GroupNameTaken { .. } => Self::Conflict(err.to_string()),
            DirectoryError::Invalid { .. } | DirectoryError::InvalidCredentials => {
                Self::BadRequest(err.to_string())
            }
            DirectoryError::Protected { .. } => Self::Forbidden(err.to_string()),
            DirectoryError::Serialization { .. }
            | DirectoryError::Password(_)
            | DirectoryError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound | SessionError::Expired { .. } => Self::Unauthorized,
            SessionError::Serialization { .. } | SessionError::Storage(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<PhotoError> for AppError {
    fn from(err: PhotoError) -> Self {
        match err {
            PhotoError::NoPhoto { .. } => Self::NotFound(err.to_string()),
            PhotoError::InvalidImage { .. } | PhotoError::InvalidCrop { .. } => {
                Self::BadRequest(err.to_string())
            }
            PhotoError::Encoding { .. } | PhotoError::Task { .. } | PhotoError::Storage(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<DriveSpaceError> for AppError {
    fn from(err: DriveSpaceError) -> Self {
        match err {
            DriveSpaceError::Directory(inner) => inner.into(),
            DriveSpaceError::Io { .. } | DriveSpaceError::Task { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<RecoveryError> for AppError {
    fn from(err: RecoveryError) -> Self {
        match err {
            RecoveryError::Disabled => Self::Forbidden(err.to_string()),
            RecoveryError::NoMatch | RecoveryError::LdapManaged { .. } => {
                Self::BadRequest(err.to_string())
            }
            RecoveryError::Directory(inner) => inner.into(),
            RecoveryError::Delivery { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Forbidden { .. } => Self::Forbidden(err.to_string()),
            GatewayError::IncorrectPassword | GatewayError::LdapManaged { .. } => {
                Self::BadRequest(err.to_string())
            }
            GatewayError::Directory(inner) => inner.into(),
            GatewayError::Session(inner) => inner.into(),
            GatewayError::Photo(inner) => inner.into(),
            GatewayError::DriveSpace(inner) => inner.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let cases: Vec<(AppError, StatusCode)> = vec![
            (
                DirectoryError::ExperimenterNotFound { id: 9 }.into(),
                StatusCode::NOT_FOUND,
            ),
            (
                DirectoryError::NameTaken { name: "x".to_owned() }.into(),
                StatusCode::CONFLICT,
            ),
            (
                GatewayError::Forbidden { reason: "no".to_owned() }.into(),
                StatusCode::FORBIDDEN,
            ),
            (
                PhotoError::InvalidCrop { reason: "empty".to_owned() }.into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::Internal("boom".to_owned()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn display_names_the_kind() {
        assert_eq!(AppError::NotFound("group 7".to_owned()).to_string(), "not found: group 7");
        assert_eq!(AppError::Unauthorized.to_string(), "login required");
    }

    #[test]
    fn missing_session_redirects_to_login() {
        let response = AppError::from(SessionError::NotFound).into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], "/login");
    }
}
