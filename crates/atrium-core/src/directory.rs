//! Experimenter and group directory.
//!
//! This is the data-management server the admin panel talks to. It owns the
//! account and group records and enforces the directory invariants, but it
//! performs no authorization of its own: every caller in the panel goes
//! through a session-bound [`Connection`](crate::gateway::Connection) that
//! decides who may do what.
//!
//! # Storage layout
//!
//! - `directory/experimenters/<id>`: JSON [`Experimenter`]
//! - `directory/groups/<id>`: JSON [`Group`]
//! - `directory/next-id/<kind>`: next free id, decimal
//!
//! Ids are zero-padded to 20 digits in keys so prefix listing returns records
//! in id order.
//!
//! # Invariants
//!
//! - Login names and group names are unique, compared with Unicode case folding.
//!   Non-empty emails are unique too.
//! - An experimenter's default group is one of their groups.
//! - Group owners are members of the group.
//! - `root` stays an active administrator; `root` and `guest` cannot be
//!   deleted or renamed.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use atrium_storage::StorageBackend;

use crate::error::DirectoryError;
use crate::model::{
    is_system_group, same_name, AccountUpdate, Experimenter, ExperimenterUpdate, Group, GroupSpec,
    NewExperimenter, GUEST_EXPERIMENTER_ID, GUEST_GROUP_ID, ROOT_EXPERIMENTER_ID,
    SYSTEM_GROUP_ID, USER_GROUP_ID,
};
use crate::password;
use crate::permissions::Permissions;

const EXPERIMENTER_PREFIX: &str = "directory/experimenters/";
const GROUP_PREFIX: &str = "directory/groups/";
const NEXT_ID_PREFIX: &str = "directory/next-id/";

fn experimenter_key(id: u64) -> String {
    format!("{EXPERIMENTER_PREFIX}{id:020}")
}

fn group_key(id: u64) -> String {
    format!("{GROUP_PREFIX}{id:020}")
}

/// The experimenter and group store.
pub struct Directory {
    storage: Arc<dyn StorageBackend>,
    /// Serializes every mutation so uniqueness checks and id allocation
    /// cannot interleave.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory").finish_non_exhaustive()
    }
}

impl Directory {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    // ── Record plumbing ──────────────────────────────────────────────

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DirectoryError> {
        let Some(bytes) = self.storage.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| DirectoryError::Serialization {
                key: key.to_owned(),
                reason: e.to_string(),
            })
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T) -> Result<(), DirectoryError> {
        let bytes = serde_json::to_vec(value).map_err(|e| DirectoryError::Serialization {
            key: key.to_owned(),
            reason: e.to_string(),
        })?;
        self.storage.put(key, &bytes).await?;
        Ok(())
    }

    async fn load_all<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, DirectoryError> {
        let keys = self.storage.list(prefix).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.load(&key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn next_id(&self, kind: &str, floor: u64) -> Result<u64, DirectoryError> {
        let key = format!("{NEXT_ID_PREFIX}{kind}");
        let current = match self.storage.get(&key).await? {
            Some(bytes) => String::from_utf8_lossy(&bytes)
                .trim()
                .parse::<u64>()
                .map_err(|e| DirectoryError::Serialization {
                    key: key.clone(),
                    reason: e.to_string(),
                })?,
            None => floor,
        };
        let id = current.max(floor);
        self.storage
            .put(&key, id.saturating_add(1).to_string().as_bytes())
            .await?;
        Ok(id)
    }

    // ── Bootstrap ────────────────────────────────────────────────────

    /// Create the built-in groups and the `root` and `guest` accounts when
    /// they are missing. Returns `true` if `root` was created.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if storage or hashing fails.
    pub async fn bootstrap(&self, root_password: &str) -> Result<bool, DirectoryError> {
        let _guard = self.write_lock.lock().await;

        for (id, name, description) in [
            (SYSTEM_GROUP_ID, "system", "Administrators"),
            (USER_GROUP_ID, "user", "Active experimenters"),
            (GUEST_GROUP_ID, "guest", "Guest access"),
        ] {
            if !self.storage.exists(&group_key(id)).await? {
                let group = Group {
                    id,
                    name: name.to_owned(),
                    description: description.to_owned(),
                    permissions: Permissions::private(),
                    owners: Vec::new(),
                };
                self.store(&group_key(id), &group).await?;
                info!(group_id = id, name, "built-in group created");
            }
        }

        if !self.storage.exists(&experimenter_key(GUEST_EXPERIMENTER_ID)).await? {
            let guest = Experimenter {
                id: GUEST_EXPERIMENTER_ID,
                ome_name: "guest".to_owned(),
                first_name: "Guest".to_owned(),
                middle_name: String::new(),
                last_name: "Account".to_owned(),
                email: String::new(),
                institution: String::new(),
                ldap_dn: None,
                password_hash: None,
                default_group: GUEST_GROUP_ID,
                groups: vec![GUEST_GROUP_ID],
                created_at: Utc::now(),
            };
            self.store(&experimenter_key(GUEST_EXPERIMENTER_ID), &guest)
                .await?;
        }

        let created_root = if !self.storage.exists(&experimenter_key(ROOT_EXPERIMENTER_ID)).await? {
            let root = Experimenter {
                id: ROOT_EXPERIMENTER_ID,
                ome_name: "root".to_owned(),
                first_name: "root".to_owned(),
                middle_name: String::new(),
                last_name: "root".to_owned(),
                email: String::new(),
                institution: String::new(),
                ldap_dn: None,
                password_hash: Some(password::hash_password(root_password).await?),
                default_group: SYSTEM_GROUP_ID,
                groups: vec![SYSTEM_GROUP_ID, USER_GROUP_ID],
                created_at: Utc::now(),
            };
            self.store(&experimenter_key(ROOT_EXPERIMENTER_ID), &root)
                .await?;
            info!("root account created");
            true
        } else {
            false
        };

        Ok(created_root)
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// All experimenters in id order, built-in accounts included.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if storage fails or a record is corrupt.
    pub async fn list_experimenters(&self) -> Result<Vec<Experimenter>, DirectoryError> {
        self.load_all(EXPERIMENTER_PREFIX).await
    }

    /// # Errors
    ///
    /// Returns [`DirectoryError::ExperimenterNotFound`] for an unknown id.
    pub async fn get_experimenter(&self, id: u64) -> Result<Experimenter, DirectoryError> {
        self.load(&experimenter_key(id))
            .await?
            .ok_or(DirectoryError::ExperimenterNotFound { id })
    }

    /// Look up an experimenter by login name (exact match).
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if storage fails.
    pub async fn find_experimenter(&self, ome_name: &str) -> Result<Option<Experimenter>, DirectoryError> {
        Ok(self
            .list_experimenters()
            .await?
            .into_iter()
            .find(|e| e.ome_name == ome_name))
    }

    /// All groups in id order, built-in groups included.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if storage fails or a record is corrupt.
    pub async fn list_groups(&self) -> Result<Vec<Group>, DirectoryError> {
        self.load_all(GROUP_PREFIX).await
    }

    /// # Errors
    ///
    /// Returns [`DirectoryError::GroupNotFound`] for an unknown id.
    pub async fn get_group(&self, id: u64) -> Result<Group, DirectoryError> {
        self.load(&group_key(id))
            .await?
            .ok_or(DirectoryError::GroupNotFound { id })
    }

    /// Members of a group in id order.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if storage fails.
    pub async fn group_members(&self, group_id: u64) -> Result<Vec<Experimenter>, DirectoryError> {
        Ok(self
            .list_experimenters()
            .await?
            .into_iter()
            .filter(|e| e.is_member_of(group_id))
            .collect())
    }

    /// Groups the experimenter leads.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if storage fails.
    pub async fn owned_groups(&self, experimenter_id: u64) -> Result<Vec<Group>, DirectoryError> {
        Ok(self
            .list_groups()
            .await?
            .into_iter()
            .filter(|g| g.is_owned_by(experimenter_id))
            .collect())
    }

    /// True while only the built-in groups exist.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if storage fails.
    pub async fn no_groups_created(&self) -> Result<bool, DirectoryError> {
        Ok(self.list_groups().await?.iter().all(Group::is_system))
    }

    /// Whether `name` is free for an experimenter. `current` is the login
    /// name of the record being edited, which may keep its own name.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if storage fails.
    pub async fn ome_name_available(&self, name: &str, current: Option<&str>) -> Result<bool, DirectoryError> {
        let name = name.trim();
        if current.is_some_and(|c| same_name(c, name)) {
            return Ok(true);
        }
        Ok(!self
            .list_experimenters()
            .await?
            .iter()
            .any(|e| same_name(&e.ome_name, name)))
    }

    /// Whether `email` is free. An empty email is always available.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if storage fails.
    pub async fn email_available(&self, email: &str, current: Option<&str>) -> Result<bool, DirectoryError> {
        let email = email.trim();
        if email.is_empty() || current.is_some_and(|c| same_name(c, email)) {
            return Ok(true);
        }
        Ok(!self
            .list_experimenters()
            .await?
            .iter()
            .any(|e| same_name(&e.email, email)))
    }

    /// Whether `name` is free for a group.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if storage fails.
    pub async fn group_name_available(&self, name: &str, current: Option<&str>) -> Result<bool, DirectoryError> {
        let name = name.trim();
        if current.is_some_and(|c| same_name(c, name)) {
            return Ok(true);
        }
        Ok(!self
            .list_groups()
            .await?
            .iter()
            .any(|g| same_name(&g.name, name)))
    }

    // ── Experimenter mutations ───────────────────────────────────────

    /// Build the full group list: default first, then the other chosen
    /// groups, then `system`/`user` for the admin/active flags.
    ///
    /// `builtin_default` is the built-in default group an existing account
    /// already has (only `root` has one). Keeping it is allowed without
    /// choosing it among the other groups.
    async fn membership(
        &self,
        default_group: u64,
        other_groups: &[u64],
        admin: bool,
        active: bool,
        builtin_default: Option<u64>,
    ) -> Result<Vec<u64>, DirectoryError> {
        let keeps_builtin = builtin_default == Some(default_group);
        if !keeps_builtin && !other_groups.contains(&default_group) {
            return Err(DirectoryError::Invalid {
                reason: "default group must be one of the selected groups".to_owned(),
            });
        }

        let mut groups = vec![default_group];
        for &gid in other_groups {
            if keeps_builtin && gid == default_group {
                continue;
            }
            if is_system_group(gid) {
                return Err(DirectoryError::Invalid {
                    reason: format!("group {gid} is a built-in group and cannot be chosen"),
                });
            }
            self.get_group(gid).await?;
            if !groups.contains(&gid) {
                groups.push(gid);
            }
        }
        if admin && !groups.contains(&SYSTEM_GROUP_ID) {
            groups.push(SYSTEM_GROUP_ID);
        }
        if active && !groups.contains(&USER_GROUP_ID) {
            groups.push(USER_GROUP_ID);
        }
        Ok(groups)
    }

    async fn ensure_unique(
        &self,
        ome_name: &str,
        email: &str,
        current: Option<&Experimenter>,
    ) -> Result<(), DirectoryError> {
        if ome_name.trim().is_empty() {
            return Err(DirectoryError::Invalid {
                reason: "username is required".to_owned(),
            });
        }
        if !self
            .ome_name_available(ome_name, current.map(|e| e.ome_name.as_str()))
            .await?
        {
            return Err(DirectoryError::NameTaken {
                name: ome_name.to_owned(),
            });
        }
        if !self
            .email_available(email, current.map(|e| e.email.as_str()))
            .await?
        {
            return Err(DirectoryError::EmailTaken {
                email: email.to_owned(),
            });
        }
        Ok(())
    }

    /// Create an experimenter and return its id.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::NameTaken`] / [`DirectoryError::EmailTaken`] on a clash.
    /// - [`DirectoryError::Invalid`] if the default group is not selected or a
    ///   built-in group is chosen.
    /// - [`DirectoryError::GroupNotFound`] for an unknown group.
    pub async fn create_experimenter(&self, new: NewExperimenter) -> Result<u64, DirectoryError> {
        let _guard = self.write_lock.lock().await;

        self.ensure_unique(&new.ome_name, &new.email, None).await?;
        let groups = self
            .membership(new.default_group, &new.other_groups, new.admin, new.active, None)
            .await?;
        let password_hash = match new.password.as_deref() {
            Some(plain) => Some(password::hash_password(plain).await?),
            None => None,
        };

        let id = self.next_id("experimenter", GUEST_EXPERIMENTER_ID + 1).await?;
        let experimenter = Experimenter {
            id,
            ome_name: new.ome_name.trim().to_owned(),
            first_name: new.first_name,
            middle_name: new.middle_name,
            last_name: new.last_name,
            email: new.email.trim().to_owned(),
            institution: new.institution,
            ldap_dn: None,
            password_hash,
            default_group: new.default_group,
            groups,
            created_at: Utc::now(),
        };
        self.store(&experimenter_key(id), &experimenter).await?;

        info!(
            experimenter_id = id,
            ome_name = %experimenter.ome_name,
            admin = new.admin,
            active = new.active,
            "experimenter created"
        );
        Ok(id)
    }

    /// Replace an experimenter's details and group membership.
    ///
    /// Ownership of any group the experimenter leaves is dropped.
    ///
    /// # Errors
    ///
    /// As for [`create_experimenter`](Self::create_experimenter), plus
    /// [`DirectoryError::Protected`] when demoting or renaming `root`, or
    /// editing `guest`.
    pub async fn update_experimenter(&self, id: u64, update: ExperimenterUpdate) -> Result<(), DirectoryError> {
        let _guard = self.write_lock.lock().await;

        let mut experimenter = self.get_experimenter(id).await?;
        if id == GUEST_EXPERIMENTER_ID
            || (id == ROOT_EXPERIMENTER_ID
                && (!update.admin || !update.active || update.ome_name.trim() != experimenter.ome_name))
        {
            return Err(DirectoryError::Protected {
                name: experimenter.ome_name,
            });
        }

        self.ensure_unique(&update.ome_name, &update.email, Some(&experimenter))
            .await?;
        let builtin_default = Some(experimenter.default_group).filter(|g| is_system_group(*g));
        let groups = self
            .membership(
                update.default_group,
                &update.other_groups,
                update.admin,
                update.active,
                builtin_default,
            )
            .await?;

        let left: Vec<u64> = experimenter
            .groups
            .iter()
            .copied()
            .filter(|g| !groups.contains(g))
            .collect();

        experimenter.ome_name = update.ome_name.trim().to_owned();
        experimenter.first_name = update.first_name;
        experimenter.middle_name = update.middle_name;
        experimenter.last_name = update.last_name;
        experimenter.email = update.email.trim().to_owned();
        experimenter.institution = update.institution;
        experimenter.default_group = update.default_group;
        experimenter.groups = groups;
        self.store(&experimenter_key(id), &experimenter).await?;

        for gid in left {
            self.drop_owner(gid, id).await?;
        }

        info!(experimenter_id = id, ome_name = %experimenter.ome_name, "experimenter updated");
        Ok(())
    }

    /// Update the self-service fields of an account.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::EmailTaken`] on a clash.
    /// - [`DirectoryError::Invalid`] if the default group is not one of the
    ///   experimenter's groups.
    pub async fn update_account(&self, id: u64, update: AccountUpdate) -> Result<(), DirectoryError> {
        let _guard = self.write_lock.lock().await;

        let mut experimenter = self.get_experimenter(id).await?;
        if !self
            .email_available(&update.email, Some(&experimenter.email))
            .await?
        {
            return Err(DirectoryError::EmailTaken {
                email: update.email,
            });
        }
        if !experimenter.is_member_of(update.default_group)
            || matches!(update.default_group, USER_GROUP_ID | GUEST_GROUP_ID)
        {
            return Err(DirectoryError::Invalid {
                reason: "default group must be one of your groups".to_owned(),
            });
        }

        experimenter.first_name = update.first_name;
        experimenter.middle_name = update.middle_name;
        experimenter.last_name = update.last_name;
        experimenter.email = update.email.trim().to_owned();
        experimenter.institution = update.institution;
        experimenter.default_group = update.default_group;
        // Keep the default group at the head of the list.
        experimenter.groups.retain(|g| *g != update.default_group);
        experimenter.groups.insert(0, update.default_group);
        self.store(&experimenter_key(id), &experimenter).await?;

        info!(experimenter_id = id, "account details updated");
        Ok(())
    }

    /// Delete an experimenter and remove them as owner of any group.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::Protected`] for `root` and `guest`.
    pub async fn delete_experimenter(&self, id: u64) -> Result<(), DirectoryError> {
        let _guard = self.write_lock.lock().await;

        let experimenter = self.get_experimenter(id).await?;
        if id == ROOT_EXPERIMENTER_ID || id == GUEST_EXPERIMENTER_ID {
            return Err(DirectoryError::Protected {
                name: experimenter.ome_name,
            });
        }

        for gid in experimenter.groups {
            self.drop_owner(gid, id).await?;
        }
        self.storage.delete(&experimenter_key(id)).await?;

        info!(experimenter_id = id, ome_name = %experimenter.ome_name, "experimenter deleted");
        Ok(())
    }

    async fn drop_owner(&self, group_id: u64, experimenter_id: u64) -> Result<(), DirectoryError> {
        if let Some(mut group) = self.load::<Group>(&group_key(group_id)).await? {
            if group.is_owned_by(experimenter_id) {
                group.owners.retain(|o| *o != experimenter_id);
                self.store(&group_key(group_id), &group).await?;
            }
        }
        Ok(())
    }

    // ── Passwords and login ──────────────────────────────────────────

    /// Replace an experimenter's password.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if the experimenter is unknown or hashing fails.
    pub async fn set_password(&self, id: u64, new_password: &str) -> Result<(), DirectoryError> {
        let _guard = self.write_lock.lock().await;

        let mut experimenter = self.get_experimenter(id).await?;
        experimenter.password_hash = Some(password::hash_password(new_password).await?);
        self.store(&experimenter_key(id), &experimenter).await?;

        info!(experimenter_id = id, "password changed");
        Ok(())
    }

    /// Check a password against the stored hash.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::ExperimenterNotFound`] for an unknown id.
    pub async fn verify_password(&self, id: u64, candidate: &str) -> Result<bool, DirectoryError> {
        let experimenter = self.get_experimenter(id).await?;
        match experimenter.password_hash.as_deref() {
            Some(hash) => Ok(password::verify_password(candidate, hash).await?),
            None => Ok(false),
        }
    }

    /// Verify login credentials.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::InvalidCredentials`] for an unknown name, a wrong
    /// password, an inactive account, or the guest account.
    pub async fn authenticate(&self, ome_name: &str, candidate: &str) -> Result<Experimenter, DirectoryError> {
        let experimenter = self
            .find_experimenter(ome_name.trim())
            .await?
            .ok_or(DirectoryError::InvalidCredentials)?;

        if experimenter.id == GUEST_EXPERIMENTER_ID || !experimenter.is_active() {
            return Err(DirectoryError::InvalidCredentials);
        }

        let ok = match experimenter.password_hash.as_deref() {
            Some(hash) => password::verify_password(candidate, hash).await?,
            None => false,
        };
        if !ok {
            return Err(DirectoryError::InvalidCredentials);
        }
        Ok(experimenter)
    }

    /// Mark an account as authenticating against LDAP under `dn`.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::Invalid`] for an empty DN.
    /// - [`DirectoryError::Protected`] for `root` and `guest`.
    pub async fn link_ldap(&self, id: u64, dn: &str) -> Result<(), DirectoryError> {
        let _guard = self.write_lock.lock().await;

        let dn = dn.trim();
        if dn.is_empty() {
            return Err(DirectoryError::Invalid {
                reason: "distinguished name is required".to_owned(),
            });
        }
        let mut experimenter = self.get_experimenter(id).await?;
        if id == ROOT_EXPERIMENTER_ID || id == GUEST_EXPERIMENTER_ID {
            return Err(DirectoryError::Protected {
                name: experimenter.ome_name,
            });
        }
        experimenter.ldap_dn = Some(dn.to_owned());
        self.store(&experimenter_key(id), &experimenter).await?;

        info!(experimenter_id = id, dn, "experimenter linked to LDAP");
        Ok(())
    }

    // ── Group mutations ──────────────────────────────────────────────

    async fn add_members(&self, group_id: u64, ids: &[u64]) -> Result<(), DirectoryError> {
        for &eid in ids {
            let mut experimenter = self.get_experimenter(eid).await?;
            if !experimenter.is_member_of(group_id) {
                experimenter.groups.push(group_id);
                self.store(&experimenter_key(eid), &experimenter).await?;
            }
        }
        Ok(())
    }

    /// Create a group and return its id. Owners become members.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::Invalid`] for an empty name.
    /// - [`DirectoryError::GroupNameTaken`] on a clash.
    /// - [`DirectoryError::ExperimenterNotFound`] for an unknown owner.
    pub async fn create_group(&self, spec: GroupSpec) -> Result<u64, DirectoryError> {
        let _guard = self.write_lock.lock().await;

        let name = spec.name.trim();
        if name.is_empty() {
            return Err(DirectoryError::Invalid {
                reason: "group name is required".to_owned(),
            });
        }
        if !self.group_name_available(name, None).await? {
            return Err(DirectoryError::GroupNameTaken {
                name: name.to_owned(),
            });
        }
        let owners = dedup(&spec.owners);
        for &owner in &owners {
            self.get_experimenter(owner).await?;
        }

        let id = self.next_id("group", GUEST_GROUP_ID + 1).await?;
        let group = Group {
            id,
            name: name.to_owned(),
            description: spec.description,
            permissions: spec.permissions,
            owners: owners.clone(),
        };
        self.store(&group_key(id), &group).await?;
        self.add_members(id, &owners).await?;

        info!(group_id = id, name = %group.name, permissions = %group.permissions, "group created");
        Ok(id)
    }

    /// Replace a group's name, description, owners and permissions.
    ///
    /// # Errors
    ///
    /// As for [`create_group`](Self::create_group), plus
    /// [`DirectoryError::Protected`] when renaming a built-in group or
    /// changing its owners or permissions.
    pub async fn update_group(&self, id: u64, spec: GroupSpec) -> Result<(), DirectoryError> {
        let _guard = self.write_lock.lock().await;

        let mut group = self.get_group(id).await?;
        let name = spec.name.trim();
        // Built-in groups keep their name, permissions and empty owner list;
        // their membership follows the admin and active flags.
        if group.is_system()
            && (name != group.name || spec.permissions != group.permissions || !spec.owners.is_empty())
        {
            return Err(DirectoryError::Protected { name: group.name });
        }
        if name.is_empty() {
            return Err(DirectoryError::Invalid {
                reason: "group name is required".to_owned(),
            });
        }
        if !self.group_name_available(name, Some(&group.name)).await? {
            return Err(DirectoryError::GroupNameTaken {
                name: name.to_owned(),
            });
        }
        let owners = dedup(&spec.owners);
        for &owner in &owners {
            self.get_experimenter(owner).await?;
        }

        group.name = name.to_owned();
        group.description = spec.description;
        group.permissions = spec.permissions;
        group.owners = owners.clone();
        self.store(&group_key(id), &group).await?;
        self.add_members(id, &owners).await?;

        info!(group_id = id, name = %group.name, permissions = %group.permissions, "group updated");
        Ok(())
    }

    /// Change only a group's permissions.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::GroupNotFound`] for an unknown id.
    /// - [`DirectoryError::Protected`] for built-in groups.
    pub async fn update_group_permissions(&self, id: u64, permissions: Permissions) -> Result<(), DirectoryError> {
        let _guard = self.write_lock.lock().await;

        let mut group = self.get_group(id).await?;
        if group.is_system() {
            return Err(DirectoryError::Protected { name: group.name });
        }
        group.permissions = permissions;
        self.store(&group_key(id), &group).await?;

        info!(group_id = id, permissions = %permissions, "group permissions updated");
        Ok(())
    }

    /// Apply a membership edit: everyone in `members` joins the group and
    /// everyone in `available` leaves it.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::Protected`] for built-in groups, whose membership
    ///   follows the admin and active flags.
    /// - [`DirectoryError::Invalid`] if an experimenter would leave their
    ///   default group, or appears in both lists.
    pub async fn set_group_members(&self, group_id: u64, available: &[u64], members: &[u64]) -> Result<(), DirectoryError> {
        let _guard = self.write_lock.lock().await;

        let mut group = self.get_group(group_id).await?;
        if group.is_system() {
            return Err(DirectoryError::Protected { name: group.name });
        }
        if let Some(both) = members.iter().find(|m| available.contains(m)) {
            return Err(DirectoryError::Invalid {
                reason: format!("experimenter {both} cannot both join and leave the group"),
            });
        }

        // Validate every removal before writing anything.
        let mut leaving = Vec::new();
        for &eid in &dedup(available) {
            let experimenter = self.get_experimenter(eid).await?;
            if !experimenter.is_member_of(group_id) {
                continue;
            }
            if experimenter.default_group == group_id {
                return Err(DirectoryError::Invalid {
                    reason: format!(
                        "'{}' cannot leave their default group '{}'",
                        experimenter.ome_name, group.name
                    ),
                });
            }
            leaving.push(experimenter);
        }

        self.add_members(group_id, &dedup(members)).await?;
        for mut experimenter in leaving {
            experimenter.groups.retain(|g| *g != group_id);
            self.store(&experimenter_key(experimenter.id), &experimenter)
                .await?;
            group.owners.retain(|o| *o != experimenter.id);
        }
        self.store(&group_key(group_id), &group).await?;

        info!(
            group_id,
            joined = members.len(),
            left = available.len(),
            "group membership updated"
        );
        Ok(())
    }
}

fn dedup(ids: &[u64]) -> Vec<u64> {
    let mut seen = BTreeSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::permissions::PermissionLevel;
    use atrium_storage::MemoryBackend;

    pub(crate) async fn bootstrapped() -> Directory {
        let directory = Directory::new(Arc::new(MemoryBackend::new()));
        directory.bootstrap("rootpw").await.unwrap();
        directory
    }

    pub(crate) fn group_spec(name: &str, owners: Vec<u64>) -> GroupSpec {
        GroupSpec {
            name: name.to_owned(),
            description: String::new(),
            owners,
            permissions: Permissions::from_level(PermissionLevel::Collaborative, true),
        }
    }

    pub(crate) fn new_experimenter(name: &str, default_group: u64, others: Vec<u64>) -> NewExperimenter {
        NewExperimenter {
            ome_name: name.to_owned(),
            first_name: "First".to_owned(),
            middle_name: String::new(),
            last_name: "Last".to_owned(),
            email: format!("{name}@example.org"),
            institution: String::new(),
            admin: false,
            active: true,
            default_group,
            other_groups: others,
            password: Some(format!("{name}-pw")),
        }
    }

    fn update_from(e: &Experimenter) -> ExperimenterUpdate {
        ExperimenterUpdate {
            ome_name: e.ome_name.clone(),
            first_name: e.first_name.clone(),
            middle_name: e.middle_name.clone(),
            last_name: e.last_name.clone(),
            email: e.email.clone(),
            institution: e.institution.clone(),
            admin: e.is_admin(),
            active: e.is_active(),
            default_group: e.default_group,
            other_groups: e.other_group_ids().collect(),
        }
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let directory = bootstrapped().await;
        assert!(!directory.bootstrap("other").await.unwrap());

        let root = directory.get_experimenter(ROOT_EXPERIMENTER_ID).await.unwrap();
        assert!(root.is_admin() && root.is_active());
        assert!(directory.verify_password(ROOT_EXPERIMENTER_ID, "rootpw").await.unwrap());
        assert_eq!(directory.list_groups().await.unwrap().len(), 3);
        assert!(directory.no_groups_created().await.unwrap());
    }

    #[tokio::test]
    async fn create_experimenter_orders_groups_and_allocates_ids() {
        let directory = bootstrapped().await;
        let lab = directory.create_group(group_spec("lab", vec![])).await.unwrap();
        let imaging = directory.create_group(group_spec("imaging", vec![])).await.unwrap();
        assert_eq!(lab, 3);
        assert!(!directory.no_groups_created().await.unwrap());

        let id = directory
            .create_experimenter(new_experimenter("jdoe", imaging, vec![lab, imaging]))
            .await
            .unwrap();
        assert_eq!(id, 2);

        let jdoe = directory.get_experimenter(id).await.unwrap();
        assert_eq!(jdoe.groups, vec![imaging, lab, USER_GROUP_ID]);
        assert!(jdoe.is_active());
        assert!(!jdoe.is_admin());
    }

    #[tokio::test]
    async fn create_rejects_duplicates_case_insensitively() {
        let directory = bootstrapped().await;
        let lab = directory.create_group(group_spec("lab", vec![])).await.unwrap();
        directory
            .create_experimenter(new_experimenter("jdoe", lab, vec![lab]))
            .await
            .unwrap();

        let err = directory
            .create_experimenter(new_experimenter("JDoe", lab, vec![lab]))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NameTaken { .. }));

        let mut other = new_experimenter("other", lab, vec![lab]);
        other.email = "JDOE@example.org".to_owned();
        let err = directory.create_experimenter(other).await.unwrap_err();
        assert!(matches!(err, DirectoryError::EmailTaken { .. }));

        let err = directory.create_group(group_spec("LAB", vec![])).await.unwrap_err();
        assert!(matches!(err, DirectoryError::GroupNameTaken { .. }));
    }

    #[tokio::test]
    async fn duplicates_match_non_ascii_case_variants() {
        let directory = bootstrapped().await;
        let labor = directory.create_group(group_spec("Größe", vec![])).await.unwrap();
        directory
            .create_experimenter(new_experimenter("jürgen", labor, vec![labor]))
            .await
            .unwrap();

        let err = directory
            .create_experimenter(new_experimenter("JÜRGEN", labor, vec![labor]))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NameTaken { .. }));
        assert!(!directory.email_available("JÜRGEN@example.org", None).await.unwrap());
        assert!(!directory.group_name_available("GRÖßE", None).await.unwrap());
    }

    #[tokio::test]
    async fn default_group_must_be_selected() {
        let directory = bootstrapped().await;
        let lab = directory.create_group(group_spec("lab", vec![])).await.unwrap();
        let other = directory.create_group(group_spec("other", vec![])).await.unwrap();

        let err = directory
            .create_experimenter(new_experimenter("jdoe", other, vec![lab]))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Invalid { .. }));

        let err = directory
            .create_experimenter(new_experimenter("jdoe", SYSTEM_GROUP_ID, vec![SYSTEM_GROUP_ID]))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Invalid { .. }));
    }

    #[tokio::test]
    async fn availability_checks_allow_current_values() {
        let directory = bootstrapped().await;
        assert!(!directory.ome_name_available("ROOT", None).await.unwrap());
        assert!(directory.ome_name_available("root", Some("root")).await.unwrap());
        assert!(directory.email_available("", None).await.unwrap());
        assert!(!directory.group_name_available("System", None).await.unwrap());
        assert!(directory.group_name_available("system", Some("system")).await.unwrap());
    }

    #[tokio::test]
    async fn root_and_guest_are_protected() {
        let directory = bootstrapped().await;
        let err = directory.delete_experimenter(ROOT_EXPERIMENTER_ID).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Protected { .. }));
        let err = directory.delete_experimenter(GUEST_EXPERIMENTER_ID).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Protected { .. }));

        let lab = directory.create_group(group_spec("lab", vec![])).await.unwrap();
        let root = directory.get_experimenter(ROOT_EXPERIMENTER_ID).await.unwrap();
        let mut update = update_from(&root);
        update.other_groups = vec![lab];
        update.default_group = lab;
        update.admin = false;
        let err = directory
            .update_experimenter(ROOT_EXPERIMENTER_ID, update)
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Protected { .. }));
    }

    #[tokio::test]
    async fn leaving_a_group_drops_ownership() {
        let directory = bootstrapped().await;
        let lab = directory.create_group(group_spec("lab", vec![])).await.unwrap();
        let extra = directory.create_group(group_spec("extra", vec![])).await.unwrap();
        let id = directory
            .create_experimenter(new_experimenter("jdoe", lab, vec![lab, extra]))
            .await
            .unwrap();
        directory.update_group(extra, group_spec("extra", vec![id])).await.unwrap();
        assert_eq!(directory.owned_groups(id).await.unwrap().len(), 1);

        let jdoe = directory.get_experimenter(id).await.unwrap();
        let mut update = update_from(&jdoe);
        update.other_groups = vec![lab];
        directory.update_experimenter(id, update).await.unwrap();

        assert!(directory.owned_groups(id).await.unwrap().is_empty());
        let jdoe = directory.get_experimenter(id).await.unwrap();
        assert!(!jdoe.is_member_of(extra));
    }

    #[tokio::test]
    async fn group_owners_become_members() {
        let directory = bootstrapped().await;
        let lab = directory.create_group(group_spec("lab", vec![])).await.unwrap();
        let id = directory
            .create_experimenter(new_experimenter("jdoe", lab, vec![lab]))
            .await
            .unwrap();

        let team = directory.create_group(group_spec("team", vec![id])).await.unwrap();
        let members = directory.group_members(team).await.unwrap();
        assert_eq!(members.iter().map(|e| e.id).collect::<Vec<_>>(), vec![id]);
        assert!(directory.get_group(team).await.unwrap().is_owned_by(id));
    }

    #[tokio::test]
    async fn set_group_members_moves_people() {
        let directory = bootstrapped().await;
        let lab = directory.create_group(group_spec("lab", vec![])).await.unwrap();
        let team = directory.create_group(group_spec("team", vec![])).await.unwrap();
        let a = directory
            .create_experimenter(new_experimenter("a", lab, vec![lab]))
            .await
            .unwrap();
        let b = directory
            .create_experimenter(new_experimenter("b", lab, vec![lab, team]))
            .await
            .unwrap();

        directory.set_group_members(team, &[b], &[a]).await.unwrap();
        let ids: Vec<u64> = directory
            .group_members(team)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![a]);
    }

    #[tokio::test]
    async fn cannot_remove_member_from_default_group() {
        let directory = bootstrapped().await;
        let lab = directory.create_group(group_spec("lab", vec![])).await.unwrap();
        let a = directory
            .create_experimenter(new_experimenter("a", lab, vec![lab]))
            .await
            .unwrap();

        let err = directory.set_group_members(lab, &[a], &[]).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Invalid { .. }));
        assert!(directory.get_experimenter(a).await.unwrap().is_member_of(lab));

        let err = directory
            .set_group_members(USER_GROUP_ID, &[a], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Protected { .. }));
    }

    #[tokio::test]
    async fn authenticate_checks_password_and_activity() {
        let directory = bootstrapped().await;
        let lab = directory.create_group(group_spec("lab", vec![])).await.unwrap();
        let mut inactive = new_experimenter("sleepy", lab, vec![lab]);
        inactive.active = false;
        directory.create_experimenter(inactive).await.unwrap();
        directory
            .create_experimenter(new_experimenter("jdoe", lab, vec![lab]))
            .await
            .unwrap();

        assert_eq!(directory.authenticate("jdoe", "jdoe-pw").await.unwrap().ome_name, "jdoe");
        for (name, pw) in [("jdoe", "wrong"), ("sleepy", "sleepy-pw"), ("guest", ""), ("nobody", "x")] {
            let err = directory.authenticate(name, pw).await.unwrap_err();
            assert!(matches!(err, DirectoryError::InvalidCredentials), "{name}");
        }
    }

    #[tokio::test]
    async fn update_account_keeps_default_first() {
        let directory = bootstrapped().await;
        let lab = directory.create_group(group_spec("lab", vec![])).await.unwrap();
        let team = directory.create_group(group_spec("team", vec![])).await.unwrap();
        let id = directory
            .create_experimenter(new_experimenter("jdoe", lab, vec![lab, team]))
            .await
            .unwrap();

        directory
            .update_account(
                id,
                AccountUpdate {
                    first_name: "Jane".to_owned(),
                    middle_name: String::new(),
                    last_name: "Doe".to_owned(),
                    email: "jane@example.org".to_owned(),
                    institution: "Lab".to_owned(),
                    default_group: team,
                },
            )
            .await
            .unwrap();

        let jdoe = directory.get_experimenter(id).await.unwrap();
        assert_eq!(jdoe.default_group, team);
        assert_eq!(jdoe.groups[0], team);
        assert_eq!(jdoe.full_name(), "Jane Doe");

        let err = directory
            .update_account(
                id,
                AccountUpdate {
                    first_name: "Jane".to_owned(),
                    middle_name: String::new(),
                    last_name: "Doe".to_owned(),
                    email: String::new(),
                    institution: String::new(),
                    default_group: USER_GROUP_ID,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Invalid { .. }));
    }

    #[tokio::test]
    async fn link_ldap_marks_account() {
        let directory = bootstrapped().await;
        let lab = directory.create_group(group_spec("lab", vec![])).await.unwrap();
        let id = directory
            .create_experimenter(new_experimenter("jdoe", lab, vec![lab]))
            .await
            .unwrap();
        directory.link_ldap(id, "uid=jdoe,ou=people,dc=example,dc=org").await.unwrap();
        assert!(directory.get_experimenter(id).await.unwrap().ldap_auth());

        let err = directory.link_ldap(id, "  ").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Invalid { .. }));
        let err = directory.link_ldap(ROOT_EXPERIMENTER_ID, "uid=root").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Protected { .. }));
    }

    #[tokio::test]
    async fn root_keeps_builtin_default_group_on_update() {
        let directory = bootstrapped().await;
        let root = directory.get_experimenter(ROOT_EXPERIMENTER_ID).await.unwrap();
        let mut update = update_from(&root);
        assert!(update.other_groups.is_empty());
        update.first_name = "Site".to_owned();
        update.email = "admin@example.org".to_owned();
        directory
            .update_experimenter(ROOT_EXPERIMENTER_ID, update.clone())
            .await
            .unwrap();

        let root = directory.get_experimenter(ROOT_EXPERIMENTER_ID).await.unwrap();
        assert_eq!(root.first_name, "Site");
        assert_eq!(root.default_group, SYSTEM_GROUP_ID);
        assert_eq!(root.groups, vec![SYSTEM_GROUP_ID, USER_GROUP_ID]);

        // Resubmitting the built-in default among the chosen groups is fine too.
        let lab = directory.create_group(group_spec("lab", vec![])).await.unwrap();
        update.other_groups = vec![SYSTEM_GROUP_ID, lab];
        directory
            .update_experimenter(ROOT_EXPERIMENTER_ID, update)
            .await
            .unwrap();
        let root = directory.get_experimenter(ROOT_EXPERIMENTER_ID).await.unwrap();
        assert_eq!(root.groups, vec![SYSTEM_GROUP_ID, lab, USER_GROUP_ID]);
    }

    #[tokio::test]
    async fn builtin_default_is_not_offered_to_other_accounts() {
        let directory = bootstrapped().await;
        let lab = directory.create_group(group_spec("lab", vec![])).await.unwrap();
        let id = directory
            .create_experimenter(new_experimenter("jdoe", lab, vec![lab]))
            .await
            .unwrap();
        let jdoe = directory.get_experimenter(id).await.unwrap();
        let mut update = update_from(&jdoe);
        update.default_group = SYSTEM_GROUP_ID;
        update.other_groups = vec![];
        let err = directory.update_experimenter(id, update).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Invalid { .. }));
    }

    #[tokio::test]
    async fn builtin_groups_reject_owner_and_permission_changes() {
        let directory = bootstrapped().await;
        let lab = directory.create_group(group_spec("lab", vec![])).await.unwrap();
        let id = directory
            .create_experimenter(new_experimenter("jdoe", lab, vec![lab]))
            .await
            .unwrap();

        let mut spec = group_spec("system", vec![id]);
        spec.permissions = Permissions::private();
        let err = directory.update_group(SYSTEM_GROUP_ID, spec).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Protected { .. }));

        let err = directory
            .update_group(USER_GROUP_ID, group_spec("user", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Protected { .. }));

        let err = directory
            .update_group_permissions(SYSTEM_GROUP_ID, Permissions::from_level(PermissionLevel::Public, false))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Protected { .. }));
        let err = directory
            .set_group_members(SYSTEM_GROUP_ID, &[], &[id])
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Protected { .. }));

        // The description of a built-in group may still change.
        let mut spec = group_spec("system", vec![]);
        spec.permissions = Permissions::private();
        spec.description = "Site administrators".to_owned();
        directory.update_group(SYSTEM_GROUP_ID, spec).await.unwrap();
        let system = directory.get_group(SYSTEM_GROUP_ID).await.unwrap();
        assert!(system.owners.is_empty());
        assert!(!directory.get_experimenter(id).await.unwrap().is_admin());
    }
}
