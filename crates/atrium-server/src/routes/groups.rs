//! Group pages: list, create/edit form, membership, owner permissions.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::{Path, Request};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Extension, Router};

use atrium_core::controller::{GroupController, GroupsController};
use atrium_core::error::GatewayError;
use atrium_core::gateway::Connection;
use atrium_core::model::Group;
use atrium_core::permissions::PermissionLevel;

use super::{inline_error, parse_form, parse_ids, ActionPath};
use crate::error::AppError;
use crate::forms::{
    to_boolean, ContainedExperimentersForm, FormErrors, GroupForm, GroupOwnerForm, FORM_ERROR,
};
use crate::state::AppState;
use crate::ui::{self, html_escape, AdminContext};

const LEVELS: [(u8, &str); 3] = [
    (0, "Private"),
    (1, "Collaborative"),
    (2, "Public"),
];

/// Build the group router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/groups", get(groups))
        .route("/group/{action}", get(group_page).post(group_submit))
        .route("/group/{action}/{id}", get(group_page).post(group_submit))
        .route(
            "/group_owner/{action}/{id}",
            get(owner_page).post(owner_submit),
        )
}

// ── List ─────────────────────────────────────────────────────────────

async fn groups(Extension(conn): Extension<Connection>) -> Result<Html<String>, AppError> {
    let controller = GroupsController::load(&conn).await?;
    let ctx = ui::prepare_context(&conn).await?;

    let mut content = String::with_capacity(8192);
    content.push_str("<p><a href=\"/group/new\" class=\"btn btn-primary\">Add new group</a></p>\n");
    content.push_str("<table><thead><tr><th>ID</th><th>Name</th><th>Description</th><th>Permissions</th><th>Owners</th><th>Members</th><th></th></tr></thead><tbody>\n");
    for row in &controller.groups {
        let mut permissions = row.level.label().to_owned();
        if row.read_only {
            permissions.push_str(" (read-only)");
        }
        let actions = if row.is_system {
            "<span class=\"tag\">system</span>".to_owned()
        } else {
            format!(
                "<a href=\"/group/edit/{0}\">edit</a> <a href=\"/group/members/{0}\">members</a>",
                row.id
            )
        };
        let _ = writeln!(
            content,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            row.id,
            html_escape(&row.name),
            html_escape(&row.description),
            permissions,
            html_escape(&row.owner_names.join(", ")),
            row.member_count,
            actions,
        );
    }
    content.push_str("</tbody></table>");
    Ok(Html(ui::app_shell(&ctx, "Groups", "groups", &content)))
}

// ── Form and membership ──────────────────────────────────────────────

async fn group_page(
    Extension(conn): Extension<Connection>,
    Path(path): Path<ActionPath>,
) -> Result<Response, AppError> {
    match path.action.as_str() {
        "new" => {
            let controller = GroupController::load(&conn, None).await?;
            let form = GroupForm {
                permissions: Some(PermissionLevel::Private.code().to_string()),
                ..GroupForm::default()
            };
            render_form(&conn, &controller, &form, &FormErrors::default()).await
        }
        "edit" => {
            let controller = GroupController::load(&conn, Some(path.require_id()?)).await?;
            let form = form_from_group(&controller);
            render_form(&conn, &controller, &form, &FormErrors::default()).await
        }
        "members" => {
            let controller = GroupController::load(&conn, Some(path.require_id()?)).await?;
            render_members(&conn, &controller, &FormErrors::default()).await
        }
        "create" => Ok(Redirect::to("/group/new").into_response()),
        "save" => Ok(Redirect::to(&format!("/group/edit/{}", path.require_id()?)).into_response()),
        "update" => Ok(Redirect::to(&format!("/group/members/{}", path.require_id()?)).into_response()),
        _ => Ok(Redirect::to("/groups").into_response()),
    }
}

async fn group_submit(
    Extension(conn): Extension<Connection>,
    Path(path): Path<ActionPath>,
    req: Request,
) -> Result<Response, AppError> {
    match path.action.as_str() {
        "create" => {
            let controller = GroupController::load(&conn, None).await?;
            let form: GroupForm = parse_form(req).await?;
            let spec = match form.validate() {
                Ok(spec) => spec,
                Err(errors) => return render_form(&conn, &controller, &form, &errors).await,
            };
            if !conn.directory().group_name_available(&spec.name, None).await? {
                return render_form(&conn, &controller, &form, &name_taken()).await;
            }
            match controller.create_group(spec).await {
                Ok(_) => Ok(Redirect::to("/groups").into_response()),
                Err(e) => form_failure(&conn, &controller, &form, e).await,
            }
        }
        "save" => {
            let controller = GroupController::load(&conn, Some(path.require_id()?)).await?;
            let form: GroupForm = parse_form(req).await?;
            let spec = match form.validate() {
                Ok(spec) => spec,
                Err(errors) => return render_form(&conn, &controller, &form, &errors).await,
            };
            let current = controller.group.as_ref().map(|g| g.name.as_str());
            if !conn.directory().group_name_available(&spec.name, current).await? {
                return render_form(&conn, &controller, &form, &name_taken()).await;
            }
            match controller.update_group(spec).await {
                Ok(()) => Ok(Redirect::to("/groups").into_response()),
                Err(e) => form_failure(&conn, &controller, &form, e).await,
            }
        }
        "update" => {
            let controller = GroupController::load(&conn, Some(path.require_id()?)).await?;
            let form: ContainedExperimentersForm = parse_form(req).await?;
            let (available, members) = match form.validate() {
                Ok(lists) => lists,
                Err(errors) => return render_members(&conn, &controller, &errors).await,
            };
            match controller.set_members_of_group(&available, &members).await {
                Ok(()) => Ok(Redirect::to("/groups").into_response()),
                Err(e) => {
                    let mut errors = FormErrors::default();
                    errors.add(FORM_ERROR, inline_error(e)?);
                    render_members(&conn, &controller, &errors).await
                }
            }
        }
        "new" | "edit" | "members" => group_page(Extension(conn), Path(path)).await,
        _ => Ok(Redirect::to("/groups").into_response()),
    }
}

fn name_taken() -> FormErrors {
    let mut errors = FormErrors::default();
    errors.add("name", "This name already exists.");
    errors
}

async fn form_failure(
    conn: &Connection,
    controller: &GroupController,
    form: &GroupForm,
    err: GatewayError,
) -> Result<Response, AppError> {
    let mut errors = FormErrors::default();
    errors.add(FORM_ERROR, inline_error(err)?);
    render_form(conn, controller, form, &errors).await
}

fn form_from_group(controller: &GroupController) -> GroupForm {
    let (name, description) = controller
        .group
        .as_ref()
        .map(|g: &Group| (g.name.clone(), g.description.clone()))
        .unwrap_or_default();
    GroupForm {
        name,
        description,
        owners: controller.owners().iter().map(u64::to_string).collect(),
        permissions: Some(controller.actual_permissions().code().to_string()),
        readonly: controller.is_read_only().then(|| "on".to_owned()),
    }
}

async fn render_form(
    conn: &Connection,
    controller: &GroupController,
    form: &GroupForm,
    errors: &FormErrors,
) -> Result<Response, AppError> {
    let ctx = ui::prepare_context(conn).await?;
    Ok(Html(group_form_html(&ctx, controller, form, errors)).into_response())
}

fn group_form_html(
    ctx: &AdminContext,
    controller: &GroupController,
    form: &GroupForm,
    errors: &FormErrors,
) -> String {
    let editing = controller.group.as_ref();
    let candidates: Vec<(u64, String)> = controller
        .experimenters
        .iter()
        .map(|e| (e.id, format!("{} ({})", e.full_name(), e.ome_name)))
        .collect();
    let owners = parse_ids(&form.owners);
    let level = form
        .permissions
        .as_deref()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_else(|| controller.actual_permissions().code());

    let mut content = String::with_capacity(8192);
    content.push_str(&ui::form_error(errors));
    let action = match editing {
        Some(g) => format!("/group/save/{}", g.id),
        None => "/group/create".to_owned(),
    };
    content.push_str(&ui::form_open(&action));
    content.push_str(&ui::input("text", "name", "Name *", &form.name, errors));
    content.push_str(&ui::input("text", "description", "Description", &form.description, errors));
    content.push_str(&ui::multi_select("owners", "Owners", &candidates, &owners, errors));
    content.push_str(&ui::radios("permissions", "Permissions *", &LEVELS, level));
    content.push_str(&ui::checkbox(
        "readonly",
        "Read-only",
        to_boolean(form.readonly.as_deref()),
    ));
    content.push_str(&ui::submit("Save"));

    if let Some(g) = editing {
        let _ = writeln!(
            content,
            "<p>Owners: {}</p>\n<p><a href=\"/group/members/{}\">Edit members</a></p>",
            html_escape(&controller.owner_names().join(", ")),
            g.id
        );
    }

    let title = editing.map_or_else(
        || "Add new group".to_owned(),
        |g| format!("Edit group {}", g.name),
    );
    ui::app_shell(ctx, &title, "groups", &content)
}

async fn render_members(
    conn: &Connection,
    controller: &GroupController,
    errors: &FormErrors,
) -> Result<Response, AppError> {
    let Some(group) = controller.group.as_ref() else {
        return Ok(Redirect::to("/groups").into_response());
    };
    let ctx = ui::prepare_context(conn).await?;

    let mut content = String::with_capacity(4096);
    content.push_str(&ui::form_error(errors));
    content.push_str(&ui::form_open(&format!("/group/update/{}", group.id)));
    content.push_str("<h2>Members</h2>\n<p>Tick to remove from the group.</p>\n");
    for e in controller.contained_experimenters() {
        content.push_str(&ui::id_checkbox(
            "available",
            e.id,
            &format!("{} ({})", e.full_name(), e.ome_name),
        ));
    }
    content.push_str("<h2>Available</h2>\n<p>Tick to add to the group.</p>\n");
    for e in controller.available_experimenters() {
        content.push_str(&ui::id_checkbox(
            "members",
            e.id,
            &format!("{} ({})", e.full_name(), e.ome_name),
        ));
    }
    content.push_str(&ui::submit("Update members"));

    Ok(Html(ui::app_shell(
        &ctx,
        &format!("Members of {}", group.name),
        "groups",
        &content,
    ))
    .into_response())
}

// ── Owner page ───────────────────────────────────────────────────────

async fn owner_page(
    Extension(conn): Extension<Connection>,
    Path(path): Path<ActionPath>,
) -> Result<Response, AppError> {
    if path.action != "edit" {
        return Ok(Redirect::to("/myaccount").into_response());
    }
    let controller = GroupController::load_owned(&conn, path.require_id()?).await?;
    let form = GroupOwnerForm {
        permissions: Some(controller.actual_permissions().code().to_string()),
        readonly: controller.is_read_only().then(|| "on".to_owned()),
    };
    render_owner(&conn, &controller, &form, &FormErrors::default()).await
}

async fn owner_submit(
    Extension(conn): Extension<Connection>,
    Path(path): Path<ActionPath>,
    req: Request,
) -> Result<Response, AppError> {
    if path.action != "save" {
        return Ok(Redirect::to("/myaccount").into_response());
    }
    let controller = GroupController::load_owned(&conn, path.require_id()?).await?;
    let form: GroupOwnerForm = parse_form(req).await?;
    let permissions = match form.validate() {
        Ok(permissions) => permissions,
        Err(errors) => return render_owner(&conn, &controller, &form, &errors).await,
    };
    match controller.update_permissions(permissions).await {
        Ok(()) => Ok(Redirect::to("/myaccount").into_response()),
        Err(e) => {
            let mut errors = FormErrors::default();
            errors.add(FORM_ERROR, inline_error(e)?);
            render_owner(&conn, &controller, &form, &errors).await
        }
    }
}

async fn render_owner(
    conn: &Connection,
    controller: &GroupController,
    form: &GroupOwnerForm,
    errors: &FormErrors,
) -> Result<Response, AppError> {
    let Some(group) = controller.group.as_ref() else {
        return Ok(Redirect::to("/myaccount").into_response());
    };
    let ctx = ui::prepare_context(conn).await?;
    let level = form
        .permissions
        .as_deref()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_else(|| controller.actual_permissions().code());

    let mut content = String::with_capacity(4096);
    content.push_str(&ui::form_error(errors));
    let _ = writeln!(
        content,
        "<p>{}</p>\n<p>Owners: {}</p>",
        html_escape(&group.description),
        html_escape(&controller.owner_names().join(", "))
    );
    content.push_str(&ui::form_open(&format!("/group_owner/save/{}", group.id)));
    content.push_str(&ui::radios("permissions", "Permissions *", &LEVELS, level));
    content.push_str(&ui::checkbox(
        "readonly",
        "Read-only",
        to_boolean(form.readonly.as_deref()),
    ));
    content.push_str(&ui::submit("Save"));

    Ok(Html(ui::app_shell(
        &ctx,
        &format!("Group {}", group.name),
        "myaccount",
        &content,
    ))
    .into_response())
}
