//! Form input and validation.
//!
//! Each `*Form` is deserialized straight from a query string or an
//! urlencoded body, with every field optional so a half-filled form still
//! deserializes. `validate` turns it into cleaned values or a
//! [`FormErrors`] map keyed by field name, which the page renders next to
//! the offending inputs. Checks that need the directory, such as name
//! availability, are added by the handlers.

use std::collections::BTreeMap;

use serde::Deserialize;

use atrium_core::model::{AccountUpdate, ExperimenterUpdate, GroupSpec, NewExperimenter};
use atrium_core::permissions::{PermissionLevel, Permissions};
use atrium_core::photo::CropBox;

/// Key for errors that belong to no single field.
pub const FORM_ERROR: &str = "__all__";

/// Per-field validation messages.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormErrors(BTreeMap<&'static str, String>);

impl FormErrors {
    /// Record a message for `field`. The first message per field wins.
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Ok(value)` when no errors were recorded.
    ///
    /// # Errors
    ///
    /// Returns `self` when any field failed validation.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

/// Checkbox semantics: `on`, `true`, `1` and `yes` are true.
#[must_use]
pub fn to_boolean(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "on" | "true" | "1" | "yes"
        )
    })
}

fn required(errors: &mut FormErrors, field: &'static str, value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        errors.add(field, "This field is required.");
    }
    value.to_owned()
}

fn email(errors: &mut FormErrors, field: &'static str, value: &str) -> String {
    let value = value.trim();
    if !value.is_empty() {
        let valid = value
            .split_once('@')
            .is_some_and(|(local, domain)| {
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            });
        if !valid || value.contains(char::is_whitespace) {
            errors.add(field, "Enter a valid email address.");
        }
    }
    value.to_owned()
}

fn id(errors: &mut FormErrors, field: &'static str, value: Option<&str>) -> Option<u64> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => {
            errors.add(field, "This field is required.");
            None
        }
        Some(raw) => raw.parse().ok().or_else(|| {
            errors.add(field, "Select a valid choice.");
            None
        }),
    }
}

fn ids(errors: &mut FormErrors, field: &'static str, values: &[String]) -> Vec<u64> {
    let mut out = Vec::with_capacity(values.len());
    for raw in values {
        match raw.trim().parse() {
            Ok(id) => out.push(id),
            Err(_) => errors.add(field, "Select a valid choice."),
        }
    }
    out
}

fn permissions(errors: &mut FormErrors, level: Option<&str>, readonly: Option<&str>) -> Permissions {
    let level = level
        .map(str::trim)
        .and_then(|v| v.parse::<u8>().ok())
        .and_then(PermissionLevel::from_code);
    match level {
        Some(level) => Permissions::from_level(level, to_boolean(readonly)),
        None => {
            errors.add("permissions", "Select a valid choice.");
            Permissions::private()
        }
    }
}

fn confirmed_password(errors: &mut FormErrors, password: &str, confirmation: &str) -> String {
    if password.is_empty() {
        errors.add("password", "This field is required.");
    }
    if confirmation.is_empty() {
        errors.add("confirmation", "This field is required.");
    } else if password != confirmation {
        errors.add("confirmation", "Passwords do not match.");
    }
    password.to_owned()
}

// ── Login and recovery ───────────────────────────────────────────────

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    /// Where to go after logging in.
    pub url: Option<String>,
}

impl LoginForm {
    /// # Errors
    ///
    /// Field errors for missing credentials.
    pub fn validate(&self) -> Result<(String, String), FormErrors> {
        let mut errors = FormErrors::default();
        let username = required(&mut errors, "username", &self.username);
        if self.password.is_empty() {
            errors.add("password", "This field is required.");
        }
        errors.into_result((username, self.password.clone()))
    }

    /// The post-login target: a local path, or `/`.
    #[must_use]
    pub fn redirect_target(&self) -> &str {
        safe_redirect(self.url.as_deref())
    }
}

/// Accept only same-site absolute paths as redirect targets.
#[must_use]
pub fn safe_redirect(url: Option<&str>) -> &str {
    match url {
        Some(u) if u.starts_with('/') && !u.starts_with("//") && !u.contains('\\') => u,
        _ => "/",
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ForgottenPasswordForm {
    pub username: String,
    pub email: String,
}

impl ForgottenPasswordForm {
    /// # Errors
    ///
    /// Field errors for a missing username or a malformed email.
    pub fn validate(&self) -> Result<(String, String), FormErrors> {
        let mut errors = FormErrors::default();
        let username = required(&mut errors, "username", &self.username);
        let address = required(&mut errors, "email", &self.email);
        email(&mut errors, "email", &address);
        errors.into_result((username, address))
    }
}

// ── Experimenters ────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ExperimenterForm {
    pub ome_name: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub email: String,
    pub institution: String,
    pub administrator: Option<String>,
    pub active: Option<String>,
    pub default_group: Option<String>,
    pub other_groups: Vec<String>,
    pub password: String,
    pub confirmation: String,
}

/// Cleaned experimenter form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimenterData {
    pub ome_name: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub email: String,
    pub institution: String,
    pub admin: bool,
    pub active: bool,
    pub default_group: u64,
    pub other_groups: Vec<u64>,
    pub password: Option<String>,
}

impl ExperimenterForm {
    /// # Errors
    ///
    /// Field errors for missing names, a malformed email, a default group
    /// outside the selected groups, or (with `with_password`) a missing or
    /// unconfirmed password.
    ///
    /// `builtin_default` is the built-in default group the edited account
    /// already has. An account keeping it needs no other group selected.
    pub fn validate(&self, with_password: bool, builtin_default: Option<u64>) -> Result<ExperimenterData, FormErrors> {
        let mut errors = FormErrors::default();
        let ome_name = required(&mut errors, "ome_name", &self.ome_name);
        let first_name = required(&mut errors, "first_name", &self.first_name);
        let last_name = required(&mut errors, "last_name", &self.last_name);
        let address = email(&mut errors, "email", &self.email);
        let other_groups = ids(&mut errors, "other_groups", &self.other_groups);
        let default_group = id(&mut errors, "default_group", self.default_group.as_deref());
        let keeps_builtin = builtin_default.is_some() && default_group == builtin_default;
        if self.other_groups.is_empty() && !keeps_builtin {
            errors.add("other_groups", "Select at least one group.");
        }
        if let Some(default) = default_group {
            if !keeps_builtin && !other_groups.is_empty() && !other_groups.contains(&default) {
                errors.add("default_group", "Default group must be one of the selected groups.");
            }
        }
        let password = with_password
            .then(|| confirmed_password(&mut errors, &self.password, &self.confirmation));

        errors.into_result(ExperimenterData {
            ome_name,
            first_name,
            middle_name: self.middle_name.trim().to_owned(),
            last_name,
            email: address,
            institution: self.institution.trim().to_owned(),
            admin: to_boolean(self.administrator.as_deref()),
            active: to_boolean(self.active.as_deref()),
            default_group: default_group.unwrap_or_default(),
            other_groups,
            password,
        })
    }
}

impl From<ExperimenterData> for NewExperimenter {
    fn from(d: ExperimenterData) -> Self {
        Self {
            ome_name: d.ome_name,
            first_name: d.first_name,
            middle_name: d.middle_name,
            last_name: d.last_name,
            email: d.email,
            institution: d.institution,
            admin: d.admin,
            active: d.active,
            default_group: d.default_group,
            other_groups: d.other_groups,
            password: d.password,
        }
    }
}

impl From<ExperimenterData> for ExperimenterUpdate {
    fn from(d: ExperimenterData) -> Self {
        Self {
            ome_name: d.ome_name,
            first_name: d.first_name,
            middle_name: d.middle_name,
            last_name: d.last_name,
            email: d.email,
            institution: d.institution,
            admin: d.admin,
            active: d.active,
            default_group: d.default_group,
            other_groups: d.other_groups,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct MyAccountForm {
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub email: String,
    pub institution: String,
    pub default_group: Option<String>,
}

impl MyAccountForm {
    /// # Errors
    ///
    /// Field errors for missing names, a malformed email or no default group.
    pub fn validate(&self) -> Result<AccountUpdate, FormErrors> {
        let mut errors = FormErrors::default();
        let first_name = required(&mut errors, "first_name", &self.first_name);
        let last_name = required(&mut errors, "last_name", &self.last_name);
        let address = email(&mut errors, "email", &self.email);
        let default_group = id(&mut errors, "default_group", self.default_group.as_deref());
        errors.into_result(AccountUpdate {
            first_name,
            middle_name: self.middle_name.trim().to_owned(),
            last_name,
            email: address,
            institution: self.institution.trim().to_owned(),
            default_group: default_group.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ChangePasswordForm {
    /// The caller's current password: their own old password, or the
    /// administrator's password when setting someone else's.
    pub old_password: String,
    pub password: String,
    pub confirmation: String,
}

/// Cleaned password change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordChange {
    pub old_password: String,
    pub new_password: String,
}

impl ChangePasswordForm {
    /// # Errors
    ///
    /// Field errors for missing or unconfirmed passwords.
    pub fn validate(&self) -> Result<PasswordChange, FormErrors> {
        let mut errors = FormErrors::default();
        if self.old_password.is_empty() {
            errors.add("old_password", "This field is required.");
        }
        let new_password = confirmed_password(&mut errors, &self.password, &self.confirmation);
        errors.into_result(PasswordChange {
            old_password: self.old_password.clone(),
            new_password,
        })
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct LdapLinkForm {
    pub experimenter: Option<String>,
    pub dn: String,
}

impl LdapLinkForm {
    /// # Errors
    ///
    /// Field errors for a missing experimenter or DN.
    pub fn validate(&self) -> Result<(u64, String), FormErrors> {
        let mut errors = FormErrors::default();
        let experimenter = id(&mut errors, "experimenter", self.experimenter.as_deref());
        let dn = required(&mut errors, "dn", &self.dn);
        if !dn.is_empty() && !dn.contains('=') {
            errors.add("dn", "Enter a distinguished name such as uid=jdoe,ou=people,dc=example,dc=org.");
        }
        errors.into_result((experimenter.unwrap_or_default(), dn))
    }
}

// ── Groups ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct GroupForm {
    pub name: String,
    pub description: String,
    pub owners: Vec<String>,
    pub permissions: Option<String>,
    pub readonly: Option<String>,
}

impl GroupForm {
    /// # Errors
    ///
    /// Field errors for a missing name, unknown owners or permissions.
    pub fn validate(&self) -> Result<GroupSpec, FormErrors> {
        let mut errors = FormErrors::default();
        let name = required(&mut errors, "name", &self.name);
        let owners = ids(&mut errors, "owners", &self.owners);
        let permissions = permissions(&mut errors, self.permissions.as_deref(), self.readonly.as_deref());
        errors.into_result(GroupSpec {
            name,
            description: self.description.trim().to_owned(),
            owners,
            permissions,
        })
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct GroupOwnerForm {
    pub permissions: Option<String>,
    pub readonly: Option<String>,
}

impl GroupOwnerForm {
    /// # Errors
    ///
    /// A field error for an unknown permission level.
    pub fn validate(&self) -> Result<Permissions, FormErrors> {
        let mut errors = FormErrors::default();
        let permissions = permissions(&mut errors, self.permissions.as_deref(), self.readonly.as_deref());
        errors.into_result(permissions)
    }
}

/// The membership page: experimenters to leave (`available`) and to join
/// (`members`).
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ContainedExperimentersForm {
    pub available: Vec<String>,
    pub members: Vec<String>,
}

impl ContainedExperimentersForm {
    /// # Errors
    ///
    /// Field errors for non-numeric ids.
    pub fn validate(&self) -> Result<(Vec<u64>, Vec<u64>), FormErrors> {
        let mut errors = FormErrors::default();
        let available = ids(&mut errors, "available", &self.available);
        let members = ids(&mut errors, "members", &self.members);
        errors.into_result((available, members))
    }
}

// ── Photo ────────────────────────────────────────────────────────────

/// An avatar upload read from the multipart `photo` field.
#[derive(Debug, Default, Clone)]
pub struct UploadPhotoForm {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadPhotoForm {
    /// # Errors
    ///
    /// A field error for an empty, oversized or non-image upload.
    pub fn validate(&self, max_bytes: usize) -> Result<&[u8], FormErrors> {
        let mut errors = FormErrors::default();
        if self.bytes.is_empty() {
            errors.add("photo", "Choose a file to upload.");
        } else if self.bytes.len() > max_bytes {
            errors.add("photo", format!("The file is larger than {max_bytes} bytes."));
        }
        if let Some(ct) = self.content_type.as_deref() {
            if !ct.starts_with("image/") && ct != "application/octet-stream" {
                errors.add("photo", "Upload an image file.");
            }
        }
        errors.into_result(self.bytes.as_slice())
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct CropForm {
    pub x1: String,
    pub y1: String,
    pub x2: String,
    pub y2: String,
}

impl CropForm {
    /// # Errors
    ///
    /// Field errors for coordinates that are not non-negative integers, or
    /// an empty box.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn validate(&self) -> Result<CropBox, FormErrors> {
        let mut errors = FormErrors::default();
        let mut coord = |field: &'static str, raw: &str| {
            // Croppers often post fractional pixels.
            let parsed = raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0 && *v <= f64::from(u32::MAX));
            parsed.map_or_else(
                || {
                    errors.add(field, "Enter a whole number of pixels.");
                    0
                },
                |v| v.round() as u32,
            )
        };
        let crop = CropBox {
            x1: coord("x1", &self.x1),
            y1: coord("y1", &self.y1),
            x2: coord("x2", &self.x2),
            y2: coord("y2", &self.y2),
        };
        if errors.is_empty() && (crop.x2 <= crop.x1 || crop.y2 <= crop.y1) {
            errors.add("x2", "Select an area to crop.");
        }
        errors.into_result(crop)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn experimenter_form() -> ExperimenterForm {
        ExperimenterForm {
            ome_name: " jdoe ".to_owned(),
            first_name: "Jane".to_owned(),
            last_name: "Doe".to_owned(),
            email: "jane@example.org".to_owned(),
            active: Some("on".to_owned()),
            default_group: Some("3".to_owned()),
            other_groups: vec!["3".to_owned(), "4".to_owned()],
            password: "pw".to_owned(),
            confirmation: "pw".to_owned(),
            ..ExperimenterForm::default()
        }
    }

    #[test]
    fn to_boolean_accepts_checkbox_values() {
        for v in ["on", "true", "1", "yes", "ON", " True "] {
            assert!(to_boolean(Some(v)), "{v}");
        }
        for v in ["", "off", "false", "0", "no"] {
            assert!(!to_boolean(Some(v)), "{v}");
        }
        assert!(!to_boolean(None));
    }

    #[test]
    fn experimenter_form_cleans_values() {
        let data = experimenter_form().validate(true, None).unwrap();
        assert_eq!(data.ome_name, "jdoe");
        assert!(data.active);
        assert!(!data.admin);
        assert_eq!(data.default_group, 3);
        assert_eq!(data.other_groups, vec![3, 4]);
        assert_eq!(data.password.as_deref(), Some("pw"));

        let data = experimenter_form().validate(false, None).unwrap();
        assert!(data.password.is_none());
    }

    #[test]
    fn experimenter_form_reports_each_field() {
        let mut form = experimenter_form();
        form.ome_name = "  ".to_owned();
        form.email = "nope".to_owned();
        form.default_group = Some("9".to_owned());
        form.confirmation = "other".to_owned();
        let errors = form.validate(true, None).unwrap_err();
        assert!(errors.get("ome_name").is_some());
        assert!(errors.get("email").is_some());
        assert_eq!(
            errors.get("default_group"),
            Some("Default group must be one of the selected groups.")
        );
        assert_eq!(errors.get("confirmation"), Some("Passwords do not match."));
        assert!(errors.get("first_name").is_none());
    }

    #[test]
    fn experimenter_form_keeps_builtin_default_without_other_groups() {
        let mut form = experimenter_form();
        form.default_group = Some("0".to_owned());
        form.other_groups.clear();
        let data = form.validate(false, Some(0)).unwrap();
        assert_eq!(data.default_group, 0);
        assert!(data.other_groups.is_empty());

        let errors = form.validate(false, None).unwrap_err();
        assert_eq!(errors.get("other_groups"), Some("Select at least one group."));
    }

    #[test]
    fn group_form_maps_permissions() {
        let form = GroupForm {
            name: "lab".to_owned(),
            owners: vec!["2".to_owned()],
            permissions: Some("2".to_owned()),
            readonly: Some("on".to_owned()),
            ..GroupForm::default()
        };
        let spec = form.validate().unwrap();
        assert_eq!(spec.permissions.to_string(), "rwrwr-");
        assert_eq!(spec.owners, vec![2]);

        let form = GroupForm {
            name: "lab".to_owned(),
            permissions: Some("7".to_owned()),
            ..GroupForm::default()
        };
        assert!(form.validate().unwrap_err().get("permissions").is_some());
    }

    #[test]
    fn redirect_target_stays_local() {
        assert_eq!(safe_redirect(Some("/groups")), "/groups");
        assert_eq!(safe_redirect(Some("//evil.example")), "/");
        assert_eq!(safe_redirect(Some("https://evil.example")), "/");
        assert_eq!(safe_redirect(None), "/");
    }

    #[test]
    fn crop_form_rounds_and_rejects_empty_boxes() {
        let form = CropForm {
            x1: "0".to_owned(),
            y1: "1.6".to_owned(),
            x2: "10".to_owned(),
            y2: "12".to_owned(),
        };
        assert_eq!(form.validate().unwrap(), CropBox { x1: 0, y1: 2, x2: 10, y2: 12 });

        let form = CropForm {
            x1: "5".to_owned(),
            y1: "5".to_owned(),
            x2: "5".to_owned(),
            y2: "9".to_owned(),
        };
        assert!(form.validate().is_err());

        let form = CropForm {
            x1: "-1".to_owned(),
            ..CropForm::default()
        };
        assert!(form.validate().unwrap_err().get("x1").is_some());
    }

    #[test]
    fn upload_form_checks_size_and_type() {
        let form = UploadPhotoForm {
            filename: Some("a.png".to_owned()),
            content_type: Some("image/png".to_owned()),
            bytes: vec![1; 10],
        };
        assert!(form.validate(10).is_ok());
        assert!(form.validate(9).is_err());

        let form = UploadPhotoForm {
            content_type: Some("text/plain".to_owned()),
            bytes: vec![1],
            ..UploadPhotoForm::default()
        };
        assert!(form.validate(10).is_err());
        assert!(UploadPhotoForm::default().validate(10).is_err());
    }

    #[test]
    fn password_form_requires_confirmation() {
        let form = ChangePasswordForm {
            old_password: "old".to_owned(),
            password: "new".to_owned(),
            confirmation: "new".to_owned(),
        };
        assert_eq!(
            form.validate().unwrap(),
            PasswordChange { old_password: "old".to_owned(), new_password: "new".to_owned() }
        );
        let form = ChangePasswordForm::default();
        let errors = form.validate().unwrap_err();
        assert!(errors.get("old_password").is_some());
        assert!(errors.get("password").is_some());
    }
}
