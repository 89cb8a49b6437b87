//! Group list, group form, membership and owner pages.

use std::collections::HashMap;

use crate::error::GatewayError;
use crate::gateway::Connection;
use crate::model::{Experimenter, Group, GroupSpec, GUEST_EXPERIMENTER_ID};
use crate::permissions::{PermissionLevel, Permissions};

/// One line of the group table.
#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub level: PermissionLevel,
    pub read_only: bool,
    pub owner_names: Vec<String>,
    pub member_count: usize,
    pub is_system: bool,
}

/// The group table.
#[derive(Debug)]
pub struct GroupsController {
    pub groups: Vec<GroupRow>,
}

impl GroupsController {
    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for non-administrators.
    pub async fn load(conn: &Connection) -> Result<Self, GatewayError> {
        conn.require_admin()?;
        let experimenters = conn.directory().list_experimenters().await?;
        let names: HashMap<u64, &str> = experimenters
            .iter()
            .map(|e| (e.id, e.ome_name.as_str()))
            .collect();

        let groups = conn
            .directory()
            .list_groups()
            .await?
            .into_iter()
            .map(|g| GroupRow {
                id: g.id,
                level: g.permissions.actual_level(),
                read_only: g.permissions.is_read_only(),
                owner_names: g
                    .owners
                    .iter()
                    .filter_map(|o| names.get(o).map(|n| (*n).to_owned()))
                    .collect(),
                member_count: experimenters.iter().filter(|e| e.is_member_of(g.id)).count(),
                is_system: g.is_system(),
                name: g.name,
                description: g.description,
            })
            .collect();
        Ok(Self { groups })
    }
}

/// State behind the group form, the membership page and the owner page.
#[derive(Debug)]
pub struct GroupController {
    conn: Connection,
    /// The group being edited; `None` on the "new" page.
    pub group: Option<Group>,
    /// Every experimenter that may own or join a group.
    pub experimenters: Vec<Experimenter>,
}

impl GroupController {
    /// Load for administrators.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Forbidden`] for non-administrators.
    /// - [`GatewayError::Directory`] for an unknown `group_id`.
    pub async fn load(conn: &Connection, group_id: Option<u64>) -> Result<Self, GatewayError> {
        conn.require_admin()?;
        Self::load_unchecked(conn, group_id).await
    }

    /// Load for a group owner editing their group's permissions.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] unless the caller owns the group or is an
    /// administrator.
    pub async fn load_owned(conn: &Connection, group_id: u64) -> Result<Self, GatewayError> {
        conn.require_group_owner(group_id)?;
        Self::load_unchecked(conn, Some(group_id)).await
    }

    async fn load_unchecked(conn: &Connection, group_id: Option<u64>) -> Result<Self, GatewayError> {
        let group = match group_id {
            Some(id) => Some(conn.directory().get_group(id).await?),
            None => None,
        };
        let experimenters = conn
            .directory()
            .list_experimenters()
            .await?
            .into_iter()
            .filter(|e| e.id != GUEST_EXPERIMENTER_ID)
            .collect();
        Ok(Self {
            conn: conn.clone(),
            group,
            experimenters,
        })
    }

    /// Level of the edited group; `Private` on the "new" page.
    #[must_use]
    pub fn actual_permissions(&self) -> PermissionLevel {
        self.group
            .as_ref()
            .map_or(PermissionLevel::Private, |g| g.permissions.actual_level())
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.group
            .as_ref()
            .is_some_and(|g| g.permissions.is_read_only())
    }

    #[must_use]
    pub fn owners(&self) -> Vec<u64> {
        self.group
            .as_ref()
            .map(|g| g.owners.clone())
            .unwrap_or_default()
    }

    /// Login names of the owners, in owner order.
    #[must_use]
    pub fn owner_names(&self) -> Vec<String> {
        self.owners()
            .iter()
            .filter_map(|id| self.experimenters.iter().find(|e| e.id == *id))
            .map(|e| e.ome_name.clone())
            .collect()
    }

    /// Current members of the edited group.
    #[must_use]
    pub fn contained_experimenters(&self) -> Vec<Experimenter> {
        let Some(group) = &self.group else {
            return Vec::new();
        };
        self.experimenters
            .iter()
            .filter(|e| e.is_member_of(group.id))
            .cloned()
            .collect()
    }

    /// Experimenters that are not members of the edited group.
    #[must_use]
    pub fn available_experimenters(&self) -> Vec<Experimenter> {
        let group_id = self.group.as_ref().map(|g| g.id);
        self.experimenters
            .iter()
            .filter(|e| group_id.is_none_or(|id| !e.is_member_of(id)))
            .cloned()
            .collect()
    }

    /// # Errors
    ///
    /// As [`Connection::create_group`].
    pub async fn create_group(&self, spec: GroupSpec) -> Result<u64, GatewayError> {
        self.conn.create_group(spec).await
    }

    /// # Errors
    ///
    /// As [`Connection::update_group`]; also fails on the "new" page.
    pub async fn update_group(&self, spec: GroupSpec) -> Result<(), GatewayError> {
        let id = self.editing()?;
        self.conn.update_group(id, spec).await
    }

    /// # Errors
    ///
    /// As [`Connection::update_group_permissions`].
    pub async fn update_permissions(&self, permissions: Permissions) -> Result<(), GatewayError> {
        let id = self.editing()?;
        self.conn.update_group_permissions(id, permissions).await
    }

    /// # Errors
    ///
    /// As [`Connection::set_group_members`].
    pub async fn set_members_of_group(&self, available: &[u64], members: &[u64]) -> Result<(), GatewayError> {
        let id = self.editing()?;
        self.conn.set_group_members(id, available, members).await
    }

    fn editing(&self) -> Result<u64, GatewayError> {
        self.group
            .as_ref()
            .map(|g| g.id)
            .ok_or_else(|| GatewayError::Forbidden {
                reason: "no group selected".to_owned(),
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::directory::tests::group_spec;
    use crate::gateway::tests::{lab_with_user, root, server};
    use crate::model::ROOT_EXPERIMENTER_ID;

    #[tokio::test]
    async fn rows_summarise_groups() {
        let server = server().await;
        let admin = root(&server).await;
        let (lab, jdoe) = lab_with_user(&admin).await;
        admin.update_group(lab, group_spec("lab", vec![jdoe])).await.unwrap();

        let list = GroupsController::load(&admin).await.unwrap();
        assert_eq!(list.groups.len(), 4);
        let row = list.groups.iter().find(|g| g.id == lab).unwrap();
        assert_eq!(row.owner_names, vec!["jdoe".to_owned()]);
        assert_eq!(row.member_count, 1);
        assert_eq!(row.level, PermissionLevel::Collaborative);
        assert!(row.read_only);
        assert!(!row.is_system);
    }

    #[tokio::test]
    async fn membership_views_split_experimenters() {
        let server = server().await;
        let admin = root(&server).await;
        let (lab, jdoe) = lab_with_user(&admin).await;

        let controller = GroupController::load(&admin, Some(lab)).await.unwrap();
        let members: Vec<u64> = controller.contained_experimenters().iter().map(|e| e.id).collect();
        let available: Vec<u64> = controller.available_experimenters().iter().map(|e| e.id).collect();
        assert_eq!(members, vec![jdoe]);
        assert_eq!(available, vec![ROOT_EXPERIMENTER_ID]);

        controller
            .set_members_of_group(&[], &[ROOT_EXPERIMENTER_ID])
            .await
            .unwrap();
        let controller = GroupController::load(&admin, Some(lab)).await.unwrap();
        assert_eq!(controller.contained_experimenters().len(), 2);
    }

    #[tokio::test]
    async fn owner_page_requires_ownership() {
        let server = server().await;
        let admin = root(&server).await;
        let (lab, jdoe) = lab_with_user(&admin).await;

        let token = server.login("jdoe", "jdoe-pw").await.unwrap();
        let user = Connection::open(server.clone(), &token).await.unwrap();
        assert!(GroupController::load_owned(&user, lab).await.is_err());
        assert!(GroupController::load(&user, Some(lab)).await.is_err());

        admin.update_group(lab, group_spec("lab", vec![jdoe])).await.unwrap();
        let user = Connection::open(server, &token).await.unwrap();
        let controller = GroupController::load_owned(&user, lab).await.unwrap();
        assert_eq!(controller.owner_names(), vec!["jdoe".to_owned()]);
        controller
            .update_permissions(Permissions::from_level(PermissionLevel::Public, true))
            .await
            .unwrap();
        assert_eq!(
            admin.directory().get_group(lab).await.unwrap().permissions.to_string(),
            "rwrwr-"
        );
    }

    #[tokio::test]
    async fn new_page_defaults() {
        let server = server().await;
        let admin = root(&server).await;
        let controller = GroupController::load(&admin, None).await.unwrap();
        assert_eq!(controller.actual_permissions(), PermissionLevel::Private);
        assert!(!controller.is_read_only());
        assert!(controller.owners().is_empty());
        assert!(controller.update_group(group_spec("x", vec![])).await.is_err());
    }
}
