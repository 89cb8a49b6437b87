//! "My account" pages: details, photo, avatar upload and crop.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Extension, Router};
use tracing::debug;

use atrium_core::controller::{MyAccount, UploadController};
use atrium_core::gateway::Connection;

use super::{inline_error, parse_form};
use crate::error::AppError;
use crate::forms::{CropForm, FormErrors, MyAccountForm, UploadPhotoForm, FORM_ERROR};
use crate::state::AppState;
use crate::ui::{self, html_escape, AdminContext};

/// Room for the multipart framing around the photo itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the account router. Avatar uploads are capped at
/// `max_photo_bytes`.
pub fn router(max_photo_bytes: usize) -> Router<Arc<AppState>> {
    let avatar = Router::new()
        .route("/avatar", get(avatar_page))
        .route("/avatar/{action}", get(avatar_action_page).post(avatar_submit))
        .layer(DefaultBodyLimit::max(
            max_photo_bytes.saturating_add(MULTIPART_OVERHEAD),
        ));

    Router::new()
        .route("/myaccount", get(my_account))
        .route("/myaccount/save", post(my_account_save))
        .route("/myphoto", get(my_photo))
        .merge(avatar)
}

// ── Details ──────────────────────────────────────────────────────────

async fn my_account(Extension(conn): Extension<Connection>) -> Result<Html<String>, AppError> {
    let account = MyAccount::load(&conn).await?;
    let e = &account.experimenter;
    let form = MyAccountForm {
        first_name: e.first_name.clone(),
        middle_name: e.middle_name.clone(),
        last_name: e.last_name.clone(),
        email: e.email.clone(),
        institution: e.institution.clone(),
        default_group: Some(e.default_group.to_string()),
    };
    let ctx = ui::prepare_context(&conn).await?;
    Ok(Html(my_account_html(&ctx, &account, &form, &FormErrors::default())))
}

async fn my_account_save(
    Extension(conn): Extension<Connection>,
    req: Request,
) -> Result<Response, AppError> {
    let account = MyAccount::load(&conn).await?;
    let form: MyAccountForm = parse_form(req).await?;
    let errors = match form.validate() {
        Err(errors) => errors,
        Ok(update) => {
            let mut errors = FormErrors::default();
            if !conn
                .directory()
                .email_available(&update.email, Some(&account.experimenter.email))
                .await?
            {
                errors.add("email", "This email already exists.");
            } else if let Err(e) = account.update_my_account(update).await {
                errors.add(FORM_ERROR, inline_error(e)?);
            } else {
                return Ok(Redirect::to("/myaccount").into_response());
            }
            errors
        }
    };
    let ctx = ui::prepare_context(&conn).await?;
    Ok(Html(my_account_html(&ctx, &account, &form, &errors)).into_response())
}

fn my_account_html(
    ctx: &AdminContext,
    account: &MyAccount,
    form: &MyAccountForm,
    errors: &FormErrors,
) -> String {
    let e = &account.experimenter;
    let groups: Vec<(u64, String)> = account
        .groups
        .iter()
        .map(|g| (g.id, g.name.clone()))
        .collect();
    let default_group = form
        .default_group
        .as_deref()
        .and_then(|v| v.trim().parse().ok());

    let mut content = String::with_capacity(8192);
    content.push_str("<img src=\"/myphoto\" alt=\"photo\" class=\"avatar\"/>\n");
    let _ = writeln!(
        content,
        "<p><a href=\"/avatar\">Change photo</a></p>\n<p>Username: <strong>{}</strong></p>",
        html_escape(&e.ome_name)
    );
    if account.ldap_auth() {
        content.push_str(&ui::notice(
            "Your account is managed by LDAP. Your password cannot be changed here.",
            true,
        ));
    }
    content.push_str(&ui::form_error(errors));
    content.push_str(&ui::form_open("/myaccount/save"));
    content.push_str(&ui::input("text", "first_name", "First name *", &form.first_name, errors));
    content.push_str(&ui::input("text", "middle_name", "Middle name", &form.middle_name, errors));
    content.push_str(&ui::input("text", "last_name", "Last name *", &form.last_name, errors));
    content.push_str(&ui::input("email", "email", "Email", &form.email, errors));
    content.push_str(&ui::input("text", "institution", "Institution", &form.institution, errors));
    content.push_str(&ui::select("default_group", "Default group *", &groups, default_group, errors));
    content.push_str(&ui::submit("Save"));

    if !account.ldap_auth() {
        let _ = writeln!(
            content,
            "<p><a href=\"/password/{}\">Change password</a></p>",
            e.id
        );
    }

    if !account.owned_groups.is_empty() {
        content.push_str("<h2>Groups you own</h2>\n<ul>\n");
        for g in &account.owned_groups {
            let _ = writeln!(
                content,
                "<li><a href=\"/group_owner/edit/{}\">{}</a> <span class=\"tag\">{}</span></li>",
                g.id,
                html_escape(&g.name),
                g.permissions.actual_level().label()
            );
        }
        content.push_str("</ul>\n");
    }
    ui::app_shell(ctx, "My Account", "myaccount", &content)
}

// ── Photo ────────────────────────────────────────────────────────────

async fn my_photo(Extension(conn): Extension<Connection>) -> Result<Response, AppError> {
    let bytes = UploadController::new(&conn).photo_or_placeholder().await?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response())
}

async fn avatar_page(
    State(state): State<Arc<AppState>>,
    Extension(conn): Extension<Connection>,
) -> Result<Response, AppError> {
    render_avatar(&conn, state.max_photo_bytes, &FormErrors::default()).await
}

async fn avatar_action_page(
    State(state): State<Arc<AppState>>,
    Extension(conn): Extension<Connection>,
    Path(action): Path<String>,
) -> Result<Response, AppError> {
    if action == "editphoto" {
        render_crop(&conn, &CropForm::default(), &FormErrors::default()).await
    } else {
        render_avatar(&conn, state.max_photo_bytes, &FormErrors::default()).await
    }
}

async fn avatar_submit(
    State(state): State<Arc<AppState>>,
    Extension(conn): Extension<Connection>,
    Path(action): Path<String>,
    req: Request,
) -> Result<Response, AppError> {
    let upload = UploadController::new(&conn);
    match action.as_str() {
        "upload" => {
            let form = match read_upload(req).await {
                Ok(form) => form,
                Err(errors) => return render_avatar(&conn, state.max_photo_bytes, &errors).await,
            };
            let bytes = match form.validate(state.max_photo_bytes) {
                Ok(bytes) => bytes,
                Err(errors) => return render_avatar(&conn, state.max_photo_bytes, &errors).await,
            };
            match upload.attach_photo(bytes).await {
                Ok((width, height)) => {
                    debug!(width, height, "photo uploaded");
                    Ok(Redirect::to("/avatar/editphoto").into_response())
                }
                Err(e) => {
                    let mut errors = FormErrors::default();
                    errors.add("photo", inline_error(e)?);
                    render_avatar(&conn, state.max_photo_bytes, &errors).await
                }
            }
        }
        "crop" => {
            let form: CropForm = parse_form(req).await?;
            let crop = match form.validate() {
                Ok(crop) => crop,
                Err(errors) => return render_crop(&conn, &form, &errors).await,
            };
            match upload.crop(crop).await {
                Ok(_) => Ok(Redirect::to("/myaccount").into_response()),
                Err(e) => {
                    let mut errors = FormErrors::default();
                    errors.add(FORM_ERROR, inline_error(e)?);
                    render_crop(&conn, &form, &errors).await
                }
            }
        }
        "deletephoto" => {
            upload.delete_photo().await?;
            Ok(Redirect::to("/myaccount").into_response())
        }
        _ => Ok(Redirect::to("/avatar").into_response()),
    }
}

/// Pull the `photo` field out of a multipart body.
async fn read_upload(req: Request) -> Result<UploadPhotoForm, FormErrors> {
    let upload_error = |reason: String| {
        let mut errors = FormErrors::default();
        errors.add("photo", reason);
        errors
    };
    let mut multipart = Multipart::from_request(req, &())
        .await
        .map_err(|e| upload_error(e.body_text()))?;

    let mut form = UploadPhotoForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| upload_error(e.body_text()))?
    {
        if field.name() != Some("photo") {
            continue;
        }
        form.filename = field.file_name().map(ToOwned::to_owned);
        form.content_type = field.content_type().map(ToOwned::to_owned);
        form.bytes = field
            .bytes()
            .await
            .map_err(|e| upload_error(e.body_text()))?
            .to_vec();
    }
    Ok(form)
}

async fn render_avatar(
    conn: &Connection,
    max_photo_bytes: usize,
    errors: &FormErrors,
) -> Result<Response, AppError> {
    let upload = UploadController::new(conn);
    let size = upload.photo_size().await?;
    let ctx = ui::prepare_context(conn).await?;

    let mut content = String::with_capacity(4096);
    content.push_str("<img src=\"/myphoto\" alt=\"photo\" class=\"avatar\"/>\n");
    if let Some((width, height)) = size {
        let _ = writeln!(
            content,
            "<p>Current photo: {width} x {height} pixels. <a href=\"/avatar/editphoto\">Crop</a></p>"
        );
        content.push_str(&ui::form_open("/avatar/deletephoto"));
        content.push_str("<button type=\"submit\" class=\"btn btn-danger btn-sm\">Delete photo</button>\n</form>\n");
    } else {
        content.push_str("<p>You have not uploaded a photo yet.</p>\n");
    }

    content.push_str("<h2>Upload a photo</h2>\n");
    let _ = writeln!(
        content,
        "<p>JPEG, PNG, GIF, BMP or WebP, up to {}.</p>",
        ui::format_bytes(u64::try_from(max_photo_bytes).unwrap_or(u64::MAX))
    );
    content.push_str("<form method=\"post\" action=\"/avatar/upload\" enctype=\"multipart/form-data\">\n");
    content.push_str("<label class=\"field\"><span>Photo</span><input type=\"file\" name=\"photo\" accept=\"image/*\"/>");
    if let Some(message) = errors.get("photo") {
        let _ = write!(content, "<span class=\"field-error\">{}</span>", html_escape(message));
    }
    content.push_str("</label>\n");
    content.push_str(&ui::submit("Upload"));

    Ok(Html(ui::app_shell(&ctx, "Photo", "myaccount", &content)).into_response())
}

async fn render_crop(
    conn: &Connection,
    form: &CropForm,
    errors: &FormErrors,
) -> Result<Response, AppError> {
    let upload = UploadController::new(conn);
    let Some((width, height)) = upload.photo_size().await? else {
        return Ok(Redirect::to("/avatar").into_response());
    };
    let ctx = ui::prepare_context(conn).await?;

    // Start from the largest centred square.
    let side = width.min(height);
    let x1 = (width - side) / 2;
    let y1 = (height - side) / 2;
    let value = |submitted: &str, default: u32| {
        if submitted.is_empty() {
            default.to_string()
        } else {
            submitted.to_owned()
        }
    };

    let mut content = String::with_capacity(4096);
    let _ = writeln!(
        content,
        "<img src=\"/myphoto\" alt=\"photo\"/>\n<p>Image size: {width} x {height} pixels.</p>"
    );
    content.push_str(&ui::form_error(errors));
    content.push_str(&ui::form_open("/avatar/crop"));
    content.push_str(&ui::input("number", "x1", "Left (x1)", &value(&form.x1, x1), errors));
    content.push_str(&ui::input("number", "y1", "Top (y1)", &value(&form.y1, y1), errors));
    content.push_str(&ui::input("number", "x2", "Right (x2)", &value(&form.x2, x1 + side), errors));
    content.push_str(&ui::input("number", "y2", "Bottom (y2)", &value(&form.y2, y1 + side), errors));
    content.push_str(&ui::submit("Crop"));

    Ok(Html(ui::app_shell(&ctx, "Crop photo", "myaccount", &content)).into_response())
}
