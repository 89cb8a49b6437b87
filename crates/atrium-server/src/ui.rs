//! Server-rendered HTML for the admin panel.
//!
//! Pages are plain strings assembled from the shells and widgets below,
//! with inline CSS and no JS framework. Every value that came from a user
//! or the directory goes through [`html_escape`].

use std::fmt::Write as _;

use axum::http::StatusCode;

use atrium_core::gateway::Connection;

use crate::error::AppError;
use crate::forms::{FormErrors, FORM_ERROR};

/// Server version shown in the footer and by `/health`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Escape text for use in element content and quoted attributes.
#[must_use]
pub fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

// ── Page context ─────────────────────────────────────────────────────

/// Values every admin page shows around its content.
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub today: String,
    pub version: &'static str,
    /// Set when no group has been created yet.
    pub message: Option<String>,
    pub user_name: String,
    pub is_admin: bool,
}

/// Gather the per-page context for the connected experimenter.
///
/// # Errors
///
/// [`AppError::Internal`] if the directory cannot be read.
pub async fn prepare_context(conn: &Connection) -> Result<AdminContext, AppError> {
    let message = conn
        .directory()
        .no_groups_created()
        .await?
        .then(|| {
            "User must be in a group - You have not created any groups yet. \
             Click <a href=\"/group/new\">here</a> to create a group"
                .to_owned()
        });
    Ok(AdminContext {
        today: format!("Today is {}", chrono::Local::now().format("%A, %d %B %Y")),
        version: VERSION,
        message,
        user_name: conn.context().user_name.clone(),
        is_admin: conn.is_admin(),
    })
}

// ── Shells ───────────────────────────────────────────────────────────

/// Standalone page without navigation (login, recovery, errors).
#[must_use]
pub fn login_shell(title: &str, content: &str) -> String {
    let mut html = String::with_capacity(4096);
    html.push_str(&head(title));
    html.push_str("<body class=\"standalone\">\n<main class=\"card narrow\">\n");
    html.push_str(content);
    html.push_str("\n</main>\n</body>\n</html>");
    html
}

/// Page with the admin navigation, context banner and footer.
#[must_use]
pub fn app_shell(ctx: &AdminContext, title: &str, active: &str, content: &str) -> String {
    let nav_item = |href: &str, id: &str, label: &str| -> String {
        let class = if active == id { "nav-link active" } else { "nav-link" };
        format!("<a href=\"{href}\" class=\"{class}\">{label}</a>")
    };

    let mut html = String::with_capacity(16384);
    html.push_str(&head(title));
    html.push_str("<body>\n<header class=\"topbar\"><div class=\"brand\">Atrium</div><nav>");
    if ctx.is_admin {
        html.push_str(&nav_item("/experimenters", "experimenters", "Users"));
        html.push_str(&nav_item("/groups", "groups", "Groups"));
        html.push_str(&nav_item("/ldap", "ldap", "LDAP"));
    }
    html.push_str(&nav_item("/myaccount", "myaccount", "My Account"));
    html.push_str(&nav_item("/drivespace", "drivespace", "Drive Space"));
    html.push_str("</nav><div class=\"who\">");
    html.push_str(&html_escape(&ctx.user_name));
    html.push_str(" <a href=\"/logout\" class=\"btn btn-sm\">Logout</a></div></header>\n");

    html.push_str("<div class=\"today\">");
    html.push_str(&html_escape(&ctx.today));
    html.push_str("</div>\n");
    // The message is fixed markup, not user input.
    if let Some(message) = &ctx.message {
        html.push_str("<div class=\"notice warn\">");
        html.push_str(message);
        html.push_str("</div>\n");
    }

    html.push_str("<main class=\"content\"><h1>");
    html.push_str(&html_escape(title));
    html.push_str("</h1>\n");
    html.push_str(content);
    html.push_str("\n</main>\n<footer>Atrium v");
    html.push_str(ctx.version);
    html.push_str("</footer>\n</body>\n</html>");
    html
}

/// Error page for [`AppError`] responses.
#[must_use]
pub fn error_page(status: StatusCode, message: &str) -> String {
    let reason = status.canonical_reason().unwrap_or("Error");
    let content = format!(
        "<h1>{} {}</h1>\n<p>{}</p>\n<p><a href=\"/\">Back to the admin panel</a></p>",
        status.as_u16(),
        reason,
        html_escape(message)
    );
    login_shell(reason, &content)
}

fn head(title: &str) -> String {
    let mut html = String::with_capacity(4096);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\"/>");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width,initial-scale=1\"/><title>");
    html.push_str(&html_escape(title));
    html.push_str(" - Atrium</title>\n");
    html.push_str(CSS);
    html.push_str("</head>\n");
    html
}

// ── Widgets ──────────────────────────────────────────────────────────

/// A green or red banner.
#[must_use]
pub fn notice(message: &str, ok: bool) -> String {
    let class = if ok { "notice ok" } else { "notice error" };
    format!("<div class=\"{class}\">{}</div>\n", html_escape(message))
}

/// Banner for an error that belongs to the whole form.
#[must_use]
pub fn form_error(errors: &FormErrors) -> String {
    errors
        .get(FORM_ERROR)
        .map(|msg| notice(msg, false))
        .unwrap_or_default()
}

fn field_error(errors: &FormErrors, name: &str) -> String {
    errors
        .get(name)
        .map(|msg| format!("<span class=\"field-error\">{}</span>", html_escape(msg)))
        .unwrap_or_default()
}

/// A labelled `<input>`; `kind` is the input type.
#[must_use]
pub fn input(kind: &str, name: &str, label: &str, value: &str, errors: &FormErrors) -> String {
    format!(
        "<label class=\"field\"><span>{label}</span><input type=\"{kind}\" name=\"{name}\" value=\"{}\"/>{}</label>\n",
        html_escape(value),
        field_error(errors, name)
    )
}

/// A labelled password input, never pre-filled.
#[must_use]
pub fn password(name: &str, label: &str, errors: &FormErrors) -> String {
    input("password", name, label, "", errors)
}

#[must_use]
pub fn hidden(name: &str, value: &str) -> String {
    format!(
        "<input type=\"hidden\" name=\"{name}\" value=\"{}\"/>\n",
        html_escape(value)
    )
}

#[must_use]
pub fn checkbox(name: &str, label: &str, checked: bool) -> String {
    let checked = if checked { " checked" } else { "" };
    format!(
        "<label class=\"check\"><input type=\"checkbox\" name=\"{name}\" value=\"on\"{checked}/> {label}</label>\n"
    )
}

/// A checkbox submitting `id` under `name`, for lists of records.
#[must_use]
pub fn id_checkbox(name: &str, id: u64, label: &str) -> String {
    format!(
        "<label class=\"check\"><input type=\"checkbox\" name=\"{name}\" value=\"{id}\"/> {}</label>\n",
        html_escape(label)
    )
}

/// A single-choice `<select>` over `(id, label)` options.
#[must_use]
pub fn select(
    name: &str,
    label: &str,
    options: &[(u64, String)],
    selected: Option<u64>,
    errors: &FormErrors,
) -> String {
    let mut html = format!("<label class=\"field\"><span>{label}</span><select name=\"{name}\">");
    html.push_str("<option value=\"\">---------</option>");
    for (id, text) in options {
        let sel = if selected == Some(*id) { " selected" } else { "" };
        let _ = write!(html, "<option value=\"{id}\"{sel}>{}</option>", html_escape(text));
    }
    html.push_str("</select>");
    html.push_str(&field_error(errors, name));
    html.push_str("</label>\n");
    html
}

/// A multiple-choice `<select>`.
#[must_use]
pub fn multi_select(
    name: &str,
    label: &str,
    options: &[(u64, String)],
    selected: &[u64],
    errors: &FormErrors,
) -> String {
    let mut html = format!(
        "<label class=\"field\"><span>{label}</span><select name=\"{name}\" multiple size=\"8\">"
    );
    for (id, text) in options {
        let sel = if selected.contains(id) { " selected" } else { "" };
        let _ = write!(html, "<option value=\"{id}\"{sel}>{}</option>", html_escape(text));
    }
    html.push_str("</select>");
    html.push_str(&field_error(errors, name));
    html.push_str("</label>\n");
    html
}

/// Radio buttons for the group permission level.
#[must_use]
pub fn radios(name: &str, label: &str, options: &[(u8, &str)], selected: u8) -> String {
    let mut html = format!("<fieldset class=\"field\"><legend>{label}</legend>");
    for (value, text) in options {
        let checked = if *value == selected { " checked" } else { "" };
        let _ = write!(
            html,
            "<label class=\"check\"><input type=\"radio\" name=\"{name}\" value=\"{value}\"{checked}/> {text}</label>"
        );
    }
    html.push_str("</fieldset>\n");
    html
}

/// Open a POST form.
#[must_use]
pub fn form_open(action: &str) -> String {
    format!("<form method=\"post\" action=\"{}\">\n", html_escape(action))
}

#[must_use]
pub fn submit(label: &str) -> String {
    format!("<button type=\"submit\" class=\"btn btn-primary\">{label}</button>\n</form>\n")
}

/// Human-readable byte count.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

const CSS: &str = r"<style>
*,*::before,*::after{box-sizing:border-box;margin:0;padding:0}
:root{--bg:#F4F6F8;--surface:#FFFFFF;--border:#D9DEE4;--text:#1F2A36;--muted:#66758A;
--primary:#2F6FB3;--primary-hover:#245A93;--danger:#C0392B;--ok:#2E8B57;--warn:#B7791F}
body{font-family:system-ui,-apple-system,Segoe UI,sans-serif;background:var(--bg);color:var(--text);font-size:14px}
a{color:var(--primary);text-decoration:none}a:hover{text-decoration:underline}
.topbar{display:flex;align-items:center;gap:24px;padding:10px 24px;background:var(--surface);border-bottom:1px solid var(--border)}
.brand{font-weight:700;font-size:18px}.topbar nav{display:flex;gap:4px;flex:1}
.nav-link{padding:6px 12px;border-radius:6px;color:var(--muted)}.nav-link.active{background:var(--bg);color:var(--text);font-weight:600}
.who{color:var(--muted)}.today{padding:8px 24px;color:var(--muted);font-size:12px}
.content{padding:16px 24px;max-width:1100px}h1{font-size:22px;margin-bottom:16px}h2{font-size:16px;margin:20px 0 8px}
footer{padding:16px 24px;color:var(--muted);font-size:12px}
.standalone{display:flex;align-items:center;justify-content:center;min-height:100vh}
.card{background:var(--surface);border:1px solid var(--border);border-radius:10px;padding:24px}.narrow{width:380px}
table{width:100%;border-collapse:collapse;background:var(--surface)}th,td{text-align:left;padding:8px;border-bottom:1px solid var(--border)}
th{color:var(--muted);font-weight:600;font-size:12px;text-transform:uppercase}
.field{display:flex;flex-direction:column;gap:4px;margin-bottom:12px}.field span,.field legend{color:var(--muted);font-size:12px}
input[type=text],input[type=email],input[type=password],input[type=number],select{padding:7px 9px;border:1px solid var(--border);border-radius:6px;font:inherit}
fieldset{border:none}.check{display:inline-flex;gap:6px;align-items:center;margin:0 12px 8px 0}
.field-error{color:var(--danger);font-size:12px}
.notice{padding:10px 14px;border-radius:6px;margin:8px 24px 8px 0}.notice.ok{background:#E6F4EC;color:var(--ok)}
.notice.error{background:#FBEAEA;color:var(--danger)}.notice.warn{background:#FFF5E1;color:var(--warn);margin-left:24px}
.btn{display:inline-block;padding:7px 14px;border-radius:6px;border:1px solid var(--border);background:var(--surface);cursor:pointer;font:inherit}
.btn-primary{background:var(--primary);border-color:var(--primary);color:#fff}.btn-primary:hover{background:var(--primary-hover)}
.btn-danger{background:var(--danger);border-color:var(--danger);color:#fff}.btn-sm{padding:3px 8px;font-size:12px}
.tag{display:inline-block;padding:1px 6px;border-radius:4px;background:var(--bg);font-size:11px;color:var(--muted)}
.bar{height:14px;background:var(--bg);border-radius:7px;overflow:hidden}.bar>div{height:100%;background:var(--primary)}
.avatar{width:150px;height:150px;object-fit:cover;border-radius:8px;border:1px solid var(--border)}
</style>
";

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(is_admin: bool, message: Option<&str>) -> AdminContext {
        AdminContext {
            today: "Today is Monday, 01 June 2026".to_owned(),
            version: VERSION,
            message: message.map(str::to_owned),
            user_name: "<root>".to_owned(),
            is_admin,
        }
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            html_escape(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#x27;Jerry&#x27;&lt;/a&gt;"
        );
    }

    #[test]
    fn app_shell_shows_admin_navigation_only_to_admins() {
        let html = app_shell(&ctx(true, None), "Users", "experimenters", "<p>x</p>");
        assert!(html.contains("href=\"/groups\""));
        assert!(html.contains("nav-link active\">Users"));
        assert!(html.contains("&lt;root&gt;"));
        assert!(html.contains("Today is Monday"));

        let html = app_shell(&ctx(false, None), "My Account", "myaccount", "");
        assert!(!html.contains("href=\"/groups\""));
        assert!(html.contains("href=\"/myaccount\""));
    }

    #[test]
    fn app_shell_renders_context_message() {
        let html = app_shell(&ctx(true, Some("create a <a href=\"/group/new\">group</a>")), "t", "", "");
        assert!(html.contains("<a href=\"/group/new\">group</a>"));
    }

    #[test]
    fn widgets_render_errors_and_selection() {
        let mut errors = FormErrors::default();
        errors.add("name", "This field is required.");
        let html = input("text", "name", "Name", "a\"b", &errors);
        assert!(html.contains("value=\"a&quot;b\""));
        assert!(html.contains("This field is required."));

        let options = vec![(3, "lab".to_owned()), (4, "team".to_owned())];
        let html = multi_select("other_groups", "Groups", &options, &[4], &FormErrors::default());
        assert!(html.contains("<option value=\"4\" selected>team</option>"));
        assert!(html.contains("<option value=\"3\">lab</option>"));
    }

    #[test]
    fn error_page_names_status() {
        let html = error_page(StatusCode::FORBIDDEN, "admins only");
        assert!(html.contains("403 Forbidden"));
        assert!(html.contains("admins only"));
    }

    #[test]
    fn bytes_are_humanised() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GB");
    }
}
