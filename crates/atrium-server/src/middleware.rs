//! Session middleware for Atrium.
//!
//! Reads the session cookie, opens a [`Connection`] for it, and injects the
//! connection into the request extensions. Requests without a valid session
//! are redirected to `/login?url=<original path>`.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::debug;

use atrium_core::error::{GatewayError, SessionError};
use atrium_core::gateway::Connection;

use crate::error::AppError;
use crate::state::AppState;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "atrium_session";

/// Build the session cookie for a fresh login. The cookie lives for the
/// browser session; expiry is enforced server side.
pub fn session_cookie(token: String, state: &AppState) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.secure_cookies)
        .build()
}

/// The login redirect for a guarded request.
pub fn login_redirect(req: &Request) -> Response {
    let target = req
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    Redirect::to(&format!("/login?url={}", urlencoding::encode(target))).into_response()
}

/// Middleware that resolves the session cookie into a [`Connection`].
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(token) = jar.get(SESSION_COOKIE).map(|c| c.value().to_owned()) else {
        return login_redirect(&req);
    };

    match Connection::open(Arc::clone(&state.server), &token).await {
        Ok(conn) => {
            req.extensions_mut().insert(conn);
            next.run(req).await
        }
        Err(GatewayError::Session(
            e @ (SessionError::NotFound | SessionError::Expired { .. }),
        )) => {
            debug!(reason = %e, "session rejected");
            let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
            (jar, login_redirect(&req)).into_response()
        }
        Err(e) => AppError::from(e).into_response(),
    }
}
