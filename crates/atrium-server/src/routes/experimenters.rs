//! Experimenter pages: list, create/edit form, password change, LDAP
//! links.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::{Path, Request};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Extension, Router};
use axum_extra::extract::Form;
use tracing::info;

use atrium_core::controller::{ExperimenterController, ExperimentersController};
use atrium_core::error::GatewayError;
use atrium_core::gateway::Connection;
use atrium_core::model::{Experimenter, GUEST_EXPERIMENTER_ID, ROOT_EXPERIMENTER_ID};

use super::{inline_error, parse_form, parse_ids, ActionPath};
use crate::error::AppError;
use crate::forms::{
    to_boolean, ChangePasswordForm, ExperimenterData, ExperimenterForm, FormErrors, LdapLinkForm,
    FORM_ERROR,
};
use crate::state::AppState;
use crate::ui::{self, html_escape, AdminContext};

/// Build the experimenter router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/experimenters", get(experimenters))
        .route(
            "/experimenter/{action}",
            get(experimenter_page).post(experimenter_submit),
        )
        .route(
            "/experimenter/{action}/{id}",
            get(experimenter_page).post(experimenter_submit),
        )
        .route("/password/{id}", get(password_page).post(password_submit))
        .route("/ldap", get(ldap_page).post(ldap_submit))
        .route("/imports", get(imports))
}

// ── List ─────────────────────────────────────────────────────────────

async fn experimenters(Extension(conn): Extension<Connection>) -> Result<Html<String>, AppError> {
    let controller = ExperimentersController::load(&conn).await?;
    let ctx = ui::prepare_context(&conn).await?;

    let mut content = String::with_capacity(8192);
    content.push_str("<p><a href=\"/experimenter/new\" class=\"btn btn-primary\">Add new user</a></p>\n");
    content.push_str("<table><thead><tr><th>ID</th><th>Login</th><th>Full name</th><th>Email</th><th>Institution</th><th>Default group</th><th>Status</th><th></th></tr></thead><tbody>\n");
    for row in &controller.experimenters {
        let mut tags = String::new();
        if row.is_admin {
            tags.push_str("<span class=\"tag\">admin</span> ");
        }
        if !row.is_active {
            tags.push_str("<span class=\"tag\">inactive</span> ");
        }
        if row.ldap_auth {
            tags.push_str("<span class=\"tag\">ldap</span>");
        }
        let _ = writeln!(
            content,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td><a href=\"/experimenter/edit/{}\">edit</a></td></tr>",
            row.id,
            html_escape(&row.ome_name),
            html_escape(&row.full_name),
            html_escape(&row.email),
            html_escape(&row.institution),
            html_escape(&row.default_group),
            tags,
            row.id,
        );
    }
    content.push_str("</tbody></table>");
    Ok(Html(ui::app_shell(&ctx, "Users", "experimenters", &content)))
}

// ── Form ─────────────────────────────────────────────────────────────

async fn experimenter_page(
    Extension(conn): Extension<Connection>,
    Path(path): Path<ActionPath>,
) -> Result<Response, AppError> {
    match path.action.as_str() {
        "new" => {
            let controller = ExperimenterController::load(&conn, None).await?;
            let form = ExperimenterForm {
                active: Some("on".to_owned()),
                ..ExperimenterForm::default()
            };
            render_form(&conn, &controller, &form, &FormErrors::default()).await
        }
        "edit" => {
            let controller = ExperimenterController::load(&conn, Some(path.require_id()?)).await?;
            let form = controller
                .experimenter
                .as_ref()
                .map(form_from_experimenter)
                .unwrap_or_default();
            render_form(&conn, &controller, &form, &FormErrors::default()).await
        }
        "create" => Ok(Redirect::to("/experimenter/new").into_response()),
        "save" => Ok(Redirect::to(&format!("/experimenter/edit/{}", path.require_id()?)).into_response()),
        _ => Ok(Redirect::to("/experimenters").into_response()),
    }
}

async fn experimenter_submit(
    Extension(conn): Extension<Connection>,
    Path(path): Path<ActionPath>,
    req: Request,
) -> Result<Response, AppError> {
    match path.action.as_str() {
        "create" => {
            let controller = ExperimenterController::load(&conn, None).await?;
            let form: ExperimenterForm = parse_form(req).await?;
            let data = match form.validate(true, None) {
                Ok(data) => data,
                Err(errors) => return render_form(&conn, &controller, &form, &errors).await,
            };
            let errors = check_available(&conn, &data, None).await?;
            if !errors.is_empty() {
                return render_form(&conn, &controller, &form, &errors).await;
            }
            match controller.create_experimenter(data.into()).await {
                Ok(id) => {
                    info!(experimenter_id = id, "experimenter created from admin panel");
                    Ok(Redirect::to("/experimenters").into_response())
                }
                Err(e) => form_failure(&conn, &controller, &form, e).await,
            }
        }
        "save" => {
            let controller = ExperimenterController::load(&conn, Some(path.require_id()?)).await?;
            let form: ExperimenterForm = parse_form(req).await?;
            let builtin_default = controller.builtin_default.as_ref().map(|g| g.id);
            let data = match form.validate(false, builtin_default) {
                Ok(data) => data,
                Err(errors) => return render_form(&conn, &controller, &form, &errors).await,
            };
            let errors = check_available(&conn, &data, controller.experimenter.as_ref()).await?;
            if !errors.is_empty() {
                return render_form(&conn, &controller, &form, &errors).await;
            }
            match controller.update_experimenter(data.into()).await {
                Ok(()) => Ok(Redirect::to("/experimenters").into_response()),
                Err(e) => form_failure(&conn, &controller, &form, e).await,
            }
        }
        "delete" => {
            let controller = ExperimenterController::load(&conn, Some(path.require_id()?)).await?;
            match controller.delete_experimenter().await {
                Ok(()) => Ok(Redirect::to("/experimenters").into_response()),
                Err(e) => {
                    let form = controller
                        .experimenter
                        .as_ref()
                        .map(form_from_experimenter)
                        .unwrap_or_default();
                    form_failure(&conn, &controller, &form, e).await
                }
            }
        }
        "new" | "edit" => experimenter_page(Extension(conn), Path(path)).await,
        _ => Ok(Redirect::to("/experimenters").into_response()),
    }
}

/// Login name and email must be unused by anyone but `current`.
async fn check_available(
    conn: &Connection,
    data: &ExperimenterData,
    current: Option<&Experimenter>,
) -> Result<FormErrors, AppError> {
    let directory = conn.directory();
    let mut errors = FormErrors::default();
    if !directory
        .ome_name_available(&data.ome_name, current.map(|e| e.ome_name.as_str()))
        .await?
    {
        errors.add("ome_name", "This username already exists.");
    }
    if !directory
        .email_available(&data.email, current.map(|e| e.email.as_str()))
        .await?
    {
        errors.add("email", "This email already exists.");
    }
    Ok(errors)
}

async fn form_failure(
    conn: &Connection,
    controller: &ExperimenterController,
    form: &ExperimenterForm,
    err: GatewayError,
) -> Result<Response, AppError> {
    let mut errors = FormErrors::default();
    errors.add(FORM_ERROR, inline_error(err)?);
    render_form(conn, controller, form, &errors).await
}

fn form_from_experimenter(e: &Experimenter) -> ExperimenterForm {
    ExperimenterForm {
        ome_name: e.ome_name.clone(),
        first_name: e.first_name.clone(),
        middle_name: e.middle_name.clone(),
        last_name: e.last_name.clone(),
        email: e.email.clone(),
        institution: e.institution.clone(),
        administrator: e.is_admin().then(|| "on".to_owned()),
        active: e.is_active().then(|| "on".to_owned()),
        default_group: Some(e.default_group.to_string()),
        other_groups: e.other_group_ids().map(|g| g.to_string()).collect(),
        password: String::new(),
        confirmation: String::new(),
    }
}

async fn render_form(
    conn: &Connection,
    controller: &ExperimenterController,
    form: &ExperimenterForm,
    errors: &FormErrors,
) -> Result<Response, AppError> {
    let ctx = ui::prepare_context(conn).await?;
    Ok(Html(experimenter_form_html(&ctx, controller, form, errors)).into_response())
}

fn experimenter_form_html(
    ctx: &AdminContext,
    controller: &ExperimenterController,
    form: &ExperimenterForm,
    errors: &FormErrors,
) -> String {
    let editing = controller.experimenter.as_ref();
    let selected = parse_ids(&form.other_groups);
    // Chosen groups first, then the rest.
    let options: Vec<(u64, String)> = controller
        .selected_groups(&selected)
        .into_iter()
        .chain(controller.other_groups_initial_list(&selected))
        .map(|g| (g.id, g.name))
        .collect();
    // An account on a built-in default group may keep it.
    let default_options: Vec<(u64, String)> = controller
        .builtin_default
        .iter()
        .map(|g| (g.id, g.name.clone()))
        .chain(options.iter().cloned())
        .collect();
    let default_group = form
        .default_group
        .as_deref()
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| controller.default_group());

    let mut content = String::with_capacity(8192);
    content.push_str(&ui::form_error(errors));
    if controller.ldap_auth() {
        content.push_str(&ui::notice(
            "This account is managed by LDAP. Its password cannot be changed here.",
            true,
        ));
    }
    let action = match editing {
        Some(e) => format!("/experimenter/save/{}", e.id),
        None => "/experimenter/create".to_owned(),
    };
    content.push_str(&ui::form_open(&action));
    content.push_str(&ui::input("text", "ome_name", "Username *", &form.ome_name, errors));
    content.push_str(&ui::input("text", "first_name", "First name *", &form.first_name, errors));
    content.push_str(&ui::input("text", "middle_name", "Middle name", &form.middle_name, errors));
    content.push_str(&ui::input("text", "last_name", "Last name *", &form.last_name, errors));
    content.push_str(&ui::input("email", "email", "Email", &form.email, errors));
    content.push_str(&ui::input("text", "institution", "Institution", &form.institution, errors));
    content.push_str(&ui::checkbox(
        "administrator",
        "Administrator",
        to_boolean(form.administrator.as_deref()),
    ));
    content.push_str(&ui::checkbox(
        "active",
        "Active",
        to_boolean(form.active.as_deref()),
    ));
    content.push_str(&ui::multi_select("other_groups", "Groups *", &options, &selected, errors));
    content.push_str(&ui::select("default_group", "Default group *", &default_options, default_group, errors));
    if editing.is_none() {
        content.push_str(&ui::password("password", "Password *", errors));
        content.push_str(&ui::password("confirmation", "Confirm password *", errors));
    }
    content.push_str(&ui::submit("Save"));

    if let Some(e) = editing {
        if !e.ldap_auth() {
            let _ = writeln!(
                content,
                "<p><a href=\"/password/{}\">Change password</a></p>",
                e.id
            );
        }
        if e.id != ROOT_EXPERIMENTER_ID && e.id != GUEST_EXPERIMENTER_ID {
            content.push_str(&ui::form_open(&format!("/experimenter/delete/{}", e.id)));
            content.push_str(
                "<button type=\"submit\" class=\"btn btn-danger\">Delete user</button>\n</form>\n",
            );
        }
    }

    let title = editing.map_or_else(
        || "Add new user".to_owned(),
        |e| format!("Edit user {}", e.ome_name),
    );
    ui::app_shell(ctx, &title, "experimenters", &content)
}

// ── Password ─────────────────────────────────────────────────────────

/// Whose password the page changes, and whether the caller may.
async fn password_target(conn: &Connection, id: u64) -> Result<Experimenter, AppError> {
    if id != conn.user_id() && !conn.is_admin() {
        return Err(AppError::Forbidden(
            "only administrators can change other users' passwords".to_owned(),
        ));
    }
    Ok(conn.directory().get_experimenter(id).await?)
}

async fn password_page(
    Extension(conn): Extension<Connection>,
    Path(id): Path<u64>,
) -> Result<Html<String>, AppError> {
    let target = password_target(&conn, id).await?;
    let ctx = ui::prepare_context(&conn).await?;
    Ok(Html(password_html(&ctx, &conn, &target, &FormErrors::default())))
}

async fn password_submit(
    Extension(conn): Extension<Connection>,
    Path(id): Path<u64>,
    req: Request,
) -> Result<Response, AppError> {
    let target = password_target(&conn, id).await?;
    let form: ChangePasswordForm = parse_form(req).await?;
    let change = match form.validate() {
        Ok(change) => change,
        Err(errors) => {
            let ctx = ui::prepare_context(&conn).await?;
            return Ok(Html(password_html(&ctx, &conn, &target, &errors)).into_response());
        }
    };

    let own = target.id == conn.user_id();
    let result = if own {
        conn.change_my_password(&change.new_password, &change.old_password)
            .await
    } else {
        conn.change_user_password(&target.ome_name, &change.new_password, &change.old_password)
            .await
    };
    match result {
        Ok(()) if own => Ok(Redirect::to("/myaccount").into_response()),
        Ok(()) => Ok(Redirect::to(&format!("/experimenter/edit/{}", target.id)).into_response()),
        Err(GatewayError::IncorrectPassword) => {
            let mut errors = FormErrors::default();
            errors.add("old_password", "Password is not correct.");
            let ctx = ui::prepare_context(&conn).await?;
            Ok(Html(password_html(&ctx, &conn, &target, &errors)).into_response())
        }
        Err(e) => {
            let mut errors = FormErrors::default();
            errors.add(FORM_ERROR, inline_error(e)?);
            let ctx = ui::prepare_context(&conn).await?;
            Ok(Html(password_html(&ctx, &conn, &target, &errors)).into_response())
        }
    }
}

fn password_html(
    ctx: &AdminContext,
    conn: &Connection,
    target: &Experimenter,
    errors: &FormErrors,
) -> String {
    let own = target.id == conn.user_id();
    let mut content = String::with_capacity(2048);
    content.push_str(&ui::form_error(errors));
    if target.ldap_auth() {
        content.push_str(&ui::notice(
            "This account is managed by LDAP. Its password cannot be changed here.",
            false,
        ));
    } else {
        let old_label = if own { "Old password *" } else { "Your password *" };
        content.push_str(&ui::form_open(&format!("/password/{}", target.id)));
        content.push_str(&ui::password("old_password", old_label, errors));
        content.push_str(&ui::password("password", "New password *", errors));
        content.push_str(&ui::password("confirmation", "Confirm password *", errors));
        content.push_str(&ui::submit("Change password"));
    }
    let active = if own { "myaccount" } else { "experimenters" };
    ui::app_shell(
        ctx,
        &format!("Change password for {}", target.ome_name),
        active,
        &content,
    )
}

// ── LDAP ─────────────────────────────────────────────────────────────

async fn ldap_page(Extension(conn): Extension<Connection>) -> Result<Html<String>, AppError> {
    conn.require_admin()?;
    let ctx = ui::prepare_context(&conn).await?;
    Ok(Html(ldap_html(&ctx, &conn, &LdapLinkForm::default(), &FormErrors::default()).await?))
}

async fn ldap_submit(
    Extension(conn): Extension<Connection>,
    Form(form): Form<LdapLinkForm>,
) -> Result<Response, AppError> {
    conn.require_admin()?;
    let errors = match form.validate() {
        Ok((id, dn)) => match conn.link_ldap(id, &dn).await {
            Ok(()) => return Ok(Redirect::to("/ldap").into_response()),
            Err(e) => {
                let mut errors = FormErrors::default();
                errors.add(FORM_ERROR, inline_error(e)?);
                errors
            }
        },
        Err(errors) => errors,
    };
    let ctx = ui::prepare_context(&conn).await?;
    Ok(Html(ldap_html(&ctx, &conn, &form, &errors).await?).into_response())
}

async fn ldap_html(
    ctx: &AdminContext,
    conn: &Connection,
    form: &LdapLinkForm,
    errors: &FormErrors,
) -> Result<String, AppError> {
    let experimenters = conn.directory().list_experimenters().await?;

    let mut content = String::with_capacity(4096);
    content.push_str("<h2>LDAP accounts</h2>\n");
    content.push_str("<table><thead><tr><th>Login</th><th>Full name</th><th>Distinguished name</th></tr></thead><tbody>\n");
    for e in experimenters.iter().filter(|e| e.ldap_auth()) {
        let _ = writeln!(
            content,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            html_escape(&e.ome_name),
            html_escape(&e.full_name()),
            html_escape(e.ldap_dn.as_deref().unwrap_or_default()),
        );
    }
    content.push_str("</tbody></table>\n<h2>Link an account</h2>\n");
    content.push_str(&ui::form_error(errors));

    let candidates: Vec<(u64, String)> = experimenters
        .iter()
        .filter(|e| !e.ldap_auth() && e.id != ROOT_EXPERIMENTER_ID && e.id != GUEST_EXPERIMENTER_ID)
        .map(|e| (e.id, e.ome_name.clone()))
        .collect();
    let selected = form.experimenter.as_deref().and_then(|v| v.parse().ok());
    content.push_str(&ui::form_open("/ldap"));
    content.push_str(&ui::select("experimenter", "User *", &candidates, selected, errors));
    content.push_str(&ui::input("text", "dn", "Distinguished name *", &form.dn, errors));
    content.push_str(&ui::submit("Link"));
    Ok(ui::app_shell(ctx, "LDAP", "ldap", &content))
}

// ── Imports ──────────────────────────────────────────────────────────

/// Imports are managed elsewhere.
async fn imports(Extension(conn): Extension<Connection>) -> Result<Redirect, AppError> {
    conn.require_admin()?;
    Ok(Redirect::to("/"))
}
