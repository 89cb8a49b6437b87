//! Login, logout and forgotten-password pages.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Extension, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use axum_extra::extract::Form;
use serde::Deserialize;
use tracing::{error, info};

use atrium_core::error::{DirectoryError, GatewayError, RecoveryError};
use atrium_core::gateway::Connection;

use crate::error::AppError;
use crate::forms::{safe_redirect, ForgottenPasswordForm, FormErrors, LoginForm};
use crate::middleware::{session_cookie, SESSION_COOKIE};
use crate::state::AppState;
use crate::ui;

/// Pages reachable without a session.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", get(login_page).post(login))
        .route(
            "/forgotten_password",
            get(forgotten_password_page).post(forgotten_password),
        )
}

/// Pages behind the session middleware.
pub fn session_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index))
        .route("/logout", get(logout))
}

#[derive(Debug, Deserialize)]
struct LoginQuery {
    url: Option<String>,
}

/// Administrators land on the experimenter list, everyone else on their
/// account.
async fn index(Extension(conn): Extension<Connection>) -> Redirect {
    if conn.is_admin() {
        Redirect::to("/experimenters")
    } else {
        Redirect::to("/myaccount")
    }
}

async fn login_page(Query(query): Query<LoginQuery>) -> Html<String> {
    let form = LoginForm {
        url: query.url,
        ..LoginForm::default()
    };
    Html(render_login(&form, &FormErrors::default(), None))
}

async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let (username, password) = match form.validate() {
        Ok(credentials) => credentials,
        Err(errors) => return Ok(Html(render_login(&form, &errors, None)).into_response()),
    };

    match state.server.login(&username, &password).await {
        Ok(token) => {
            let jar = jar.add(session_cookie(token, &state));
            Ok((jar, Redirect::to(form.redirect_target())).into_response())
        }
        Err(GatewayError::Directory(DirectoryError::InvalidCredentials)) => Ok(Html(render_login(
            &form,
            &FormErrors::default(),
            Some("Connection not available, please check your user name and password."),
        ))
        .into_response()),
        Err(e) => Err(e.into()),
    }
}

async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Result<Response, AppError> {
    if let Some(token) = jar.get(SESSION_COOKIE).map(|c| c.value().to_owned()) {
        state.server.logout(&token).await?;
        info!("logged out");
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((jar, Redirect::to("/")).into_response())
}

fn render_login(form: &LoginForm, errors: &FormErrors, failure: Option<&str>) -> String {
    let mut content = String::with_capacity(2048);
    content.push_str("<h1>Atrium</h1>\n<p>Sign in to the admin panel.</p>\n");
    if let Some(message) = failure {
        content.push_str(&ui::notice(message, false));
    }
    content.push_str(&ui::form_open("/login"));
    content.push_str(&ui::input("text", "username", "Username", &form.username, errors));
    content.push_str(&ui::password("password", "Password", errors));
    content.push_str(&ui::hidden("url", safe_redirect(form.url.as_deref())));
    content.push_str(&ui::submit("Login"));
    content.push_str("<p><a href=\"/forgotten_password\">Forgot your password?</a></p>");
    ui::login_shell("Login", &content)
}

// ── Forgotten password ───────────────────────────────────────────────

async fn forgotten_password_page() -> Html<String> {
    Html(render_forgotten_password(
        &ForgottenPasswordForm::default(),
        &FormErrors::default(),
        None,
    ))
}

async fn forgotten_password(
    State(state): State<Arc<AppState>>,
    Form(form): Form<ForgottenPasswordForm>,
) -> Html<String> {
    let (username, email) = match form.validate() {
        Ok(values) => values,
        Err(errors) => return Html(render_forgotten_password(&form, &errors, None)),
    };

    let outcome = match state
        .server
        .recovery()
        .report_forgotten_password(&username, &email)
        .await
    {
        Ok(()) => (true, "Password was reset. Check your mailbox."),
        Err(RecoveryError::Disabled) => (
            false,
            "Cannot reset password. Password recovery is not configured on this server, please contact your administrator.",
        ),
        Err(RecoveryError::NoMatch | RecoveryError::LdapManaged { .. }) => (
            false,
            "Cannot reset password. Check the user name and email address, or contact your administrator.",
        ),
        Err(e) => {
            error!(error = %e, "password recovery failed");
            (false, "Internal server error, please contact administrator.")
        }
    };
    Html(render_forgotten_password(
        &ForgottenPasswordForm::default(),
        &FormErrors::default(),
        Some(outcome),
    ))
}

fn render_forgotten_password(
    form: &ForgottenPasswordForm,
    errors: &FormErrors,
    outcome: Option<(bool, &str)>,
) -> String {
    let mut content = String::with_capacity(2048);
    content.push_str("<h1>Forgotten password</h1>\n");
    content.push_str("<p>Enter your user name and the email address on your account. A new password will be sent to you.</p>\n");
    if let Some((ok, message)) = outcome {
        content.push_str(&ui::notice(message, ok));
    }
    content.push_str(&ui::form_open("/forgotten_password"));
    content.push_str(&ui::input("text", "username", "Username", &form.username, errors));
    content.push_str(&ui::input("email", "email", "Email", &form.email, errors));
    content.push_str(&ui::submit("Reset password"));
    content.push_str("<p><a href=\"/login\">Back to login</a></p>");
    ui::login_shell("Forgotten password", &content)
}
