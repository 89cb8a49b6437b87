//! Repository usage: the drive space page and its JSON feed.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::Query;
use axum::response::Html;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Deserialize;

use atrium_core::controller::DriveSpaceController;
use atrium_core::drivespace::{UsageRecord, USERS_PAGE_SIZE};
use atrium_core::gateway::Connection;

use crate::error::AppError;
use crate::state::AppState;
use crate::ui::{self, html_escape};

/// Build the drive space router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivespace", get(drivespace))
        .route("/load_drivespace", get(load_drivespace))
}

#[derive(Debug, Default, Deserialize)]
struct OffsetQuery {
    #[serde(default)]
    offset: usize,
}

async fn drivespace(
    Extension(conn): Extension<Connection>,
    Query(query): Query<OffsetQuery>,
) -> Result<Html<String>, AppError> {
    let usage = DriveSpaceController::load(&conn).await?;
    let users = DriveSpaceController::users_data(&conn, query.offset).await?;
    let ctx = ui::prepare_context(&conn).await?;

    let mut content = String::with_capacity(4096);
    match usage.free_space {
        Some(free) => {
            let percent = usage.used_percent().unwrap_or(0);
            let _ = writeln!(
                content,
                "<p>Used {} of {} ({percent}%), {} free.</p>\n<div class=\"bar\"><div style=\"width:{percent}%\"></div></div>",
                ui::format_bytes(usage.used_space),
                ui::format_bytes(usage.used_space.saturating_add(free)),
                ui::format_bytes(free),
            );
        }
        None => {
            let _ = writeln!(
                content,
                "<p>Used {}. Free space is not reported on this platform.</p>",
                ui::format_bytes(usage.used_space)
            );
        }
    }

    content.push_str("<h2>Usage by user</h2>\n<table><thead><tr><th>User</th><th>Data</th></tr></thead><tbody>\n");
    for record in &users {
        let _ = writeln!(
            content,
            "<tr><td>{}</td><td>{}</td></tr>",
            html_escape(&record.label),
            ui::format_bytes(record.data)
        );
    }
    content.push_str("</tbody></table>\n<p>");
    if query.offset > 0 {
        let _ = write!(
            content,
            "<a href=\"/drivespace?offset={}\">Previous</a> ",
            query.offset.saturating_sub(USERS_PAGE_SIZE)
        );
    }
    if users.len() == USERS_PAGE_SIZE {
        let _ = write!(
            content,
            "<a href=\"/drivespace?offset={}\">Next</a>",
            query.offset + USERS_PAGE_SIZE
        );
    }
    content.push_str("</p>");
    Ok(Html(ui::app_shell(&ctx, "Drive Space", "drivespace", &content)))
}

/// Per-user usage, one page of records per call.
async fn load_drivespace(
    Extension(conn): Extension<Connection>,
    Query(query): Query<OffsetQuery>,
) -> Result<Json<Vec<UsageRecord>>, AppError> {
    Ok(Json(DriveSpaceController::users_data(&conn, query.offset).await?))
}
