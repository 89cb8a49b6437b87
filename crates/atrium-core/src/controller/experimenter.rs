//! Experimenter list, experimenter form and "my account" data.

use std::collections::HashMap;

use crate::error::GatewayError;
use crate::gateway::Connection;
use crate::model::{
    is_system_group, AccountUpdate, Experimenter, ExperimenterUpdate, Group, NewExperimenter,
    GUEST_GROUP_ID, USER_GROUP_ID,
};

/// One line of the experimenter table.
#[derive(Debug, Clone)]
pub struct ExperimenterRow {
    pub id: u64,
    pub ome_name: String,
    pub full_name: String,
    pub email: String,
    pub institution: String,
    pub default_group: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub ldap_auth: bool,
}

/// The experimenter table.
#[derive(Debug)]
pub struct ExperimentersController {
    pub experimenters: Vec<ExperimenterRow>,
}

impl ExperimentersController {
    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for non-administrators.
    pub async fn load(conn: &Connection) -> Result<Self, GatewayError> {
        conn.require_admin()?;
        let group_names: HashMap<u64, String> = conn
            .directory()
            .list_groups()
            .await?
            .into_iter()
            .map(|g| (g.id, g.name))
            .collect();

        let experimenters = conn
            .directory()
            .list_experimenters()
            .await?
            .into_iter()
            .map(|e| ExperimenterRow {
                id: e.id,
                full_name: e.full_name(),
                default_group: group_names
                    .get(&e.default_group)
                    .cloned()
                    .unwrap_or_default(),
                is_admin: e.is_admin(),
                is_active: e.is_active(),
                ldap_auth: e.ldap_auth(),
                ome_name: e.ome_name,
                email: e.email,
                institution: e.institution,
            })
            .collect();
        Ok(Self { experimenters })
    }
}

/// State behind the experimenter create/edit form.
#[derive(Debug)]
pub struct ExperimenterController {
    conn: Connection,
    /// The record being edited; `None` on the "new" page.
    pub experimenter: Option<Experimenter>,
    /// Every group an experimenter may choose, built-in groups excluded.
    pub groups: Vec<Group>,
    /// The edited account's default group when it is a built-in one
    /// (`root` defaults to `system`). It stays selectable as the default.
    pub builtin_default: Option<Group>,
}

impl ExperimenterController {
    /// # Errors
    ///
    /// - [`GatewayError::Forbidden`] for non-administrators.
    /// - [`GatewayError::Directory`] for an unknown `experimenter_id`.
    pub async fn load(conn: &Connection, experimenter_id: Option<u64>) -> Result<Self, GatewayError> {
        conn.require_admin()?;
        let experimenter = match experimenter_id {
            Some(id) => Some(conn.directory().get_experimenter(id).await?),
            None => None,
        };
        let groups = conn
            .directory()
            .list_groups()
            .await?
            .into_iter()
            .filter(|g| !g.is_system())
            .collect();
        let builtin_default = match &experimenter {
            Some(e) if is_system_group(e.default_group) => {
                Some(conn.directory().get_group(e.default_group).await?)
            }
            _ => None,
        };
        Ok(Self {
            conn: conn.clone(),
            experimenter,
            groups,
            builtin_default,
        })
    }

    #[must_use]
    pub fn default_group(&self) -> Option<u64> {
        self.experimenter.as_ref().map(|e| e.default_group)
    }

    /// Chosen groups of the edited experimenter, built-in groups excluded.
    #[must_use]
    pub fn other_groups(&self) -> Vec<u64> {
        self.experimenter
            .as_ref()
            .map(|e| e.other_group_ids().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn ldap_auth(&self) -> bool {
        self.experimenter.as_ref().is_some_and(Experimenter::ldap_auth)
    }

    /// Selectable groups not in `exclude`.
    #[must_use]
    pub fn other_groups_initial_list(&self, exclude: &[u64]) -> Vec<Group> {
        self.groups
            .iter()
            .filter(|g| !exclude.contains(&g.id))
            .cloned()
            .collect()
    }

    /// Selectable groups in `ids`, in the order given.
    #[must_use]
    pub fn selected_groups(&self, ids: &[u64]) -> Vec<Group> {
        ids.iter()
            .filter_map(|id| self.groups.iter().find(|g| g.id == *id))
            .cloned()
            .collect()
    }

    /// # Errors
    ///
    /// As [`Connection::create_experimenter`].
    pub async fn create_experimenter(&self, new: NewExperimenter) -> Result<u64, GatewayError> {
        self.conn.create_experimenter(new).await
    }

    /// # Errors
    ///
    /// As [`Connection::update_experimenter`]; also fails on the "new" page.
    pub async fn update_experimenter(&self, update: ExperimenterUpdate) -> Result<(), GatewayError> {
        let id = self.editing()?;
        self.conn.update_experimenter(id, update).await
    }

    /// # Errors
    ///
    /// As [`Connection::delete_experimenter`]; also fails on the "new" page.
    pub async fn delete_experimenter(&self) -> Result<(), GatewayError> {
        let id = self.editing()?;
        self.conn.delete_experimenter(id).await
    }

    fn editing(&self) -> Result<u64, GatewayError> {
        self.experimenter
            .as_ref()
            .map(|e| e.id)
            .ok_or_else(|| GatewayError::Forbidden {
                reason: "no experimenter selected".to_owned(),
            })
    }
}

/// State behind the "my account" page.
#[derive(Debug)]
pub struct MyAccount {
    conn: Connection,
    pub experimenter: Experimenter,
    /// Groups the experimenter may pick as default, in membership order.
    pub groups: Vec<Group>,
    pub owned_groups: Vec<Group>,
    pub photo_size: Option<(u32, u32)>,
}

impl MyAccount {
    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] on the guest connection.
    pub async fn load(conn: &Connection) -> Result<Self, GatewayError> {
        if conn.is_guest() {
            return Err(GatewayError::Forbidden {
                reason: "login required".to_owned(),
            });
        }
        let experimenter = conn.me().await?;
        let all_groups = conn.directory().list_groups().await?;
        let groups = experimenter
            .groups
            .iter()
            .filter_map(|id| all_groups.iter().find(|g| g.id == *id))
            .filter(|g| !matches!(g.id, USER_GROUP_ID | GUEST_GROUP_ID))
            .cloned()
            .collect();
        let owned_groups = conn.directory().owned_groups(experimenter.id).await?;
        let photo_size = conn.my_photo_size().await?;
        Ok(Self {
            conn: conn.clone(),
            experimenter,
            groups,
            owned_groups,
            photo_size,
        })
    }

    #[must_use]
    pub fn ldap_auth(&self) -> bool {
        self.experimenter.ldap_auth()
    }

    /// # Errors
    ///
    /// As [`Connection::update_my_account`].
    pub async fn update_my_account(&self, update: AccountUpdate) -> Result<(), GatewayError> {
        self.conn.update_my_account(update).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::directory::tests::group_spec;
    use crate::gateway::tests::{lab_with_user, root, server};
    use crate::model::{ROOT_EXPERIMENTER_ID, SYSTEM_GROUP_ID};

    #[tokio::test]
    async fn rows_carry_flags_and_default_group_name() {
        let server = server().await;
        let admin = root(&server).await;
        let (_, jdoe) = lab_with_user(&admin).await;

        let list = ExperimentersController::load(&admin).await.unwrap();
        let row = list.experimenters.iter().find(|r| r.id == jdoe).unwrap();
        assert_eq!(row.default_group, "lab");
        assert_eq!(row.full_name, "First Last");
        assert!(row.is_active && !row.is_admin && !row.ldap_auth);

        let root_row = list
            .experimenters
            .iter()
            .find(|r| r.id == ROOT_EXPERIMENTER_ID)
            .unwrap();
        assert!(root_row.is_admin);
    }

    #[tokio::test]
    async fn group_lists_exclude_built_ins_and_exclusions() {
        let server = server().await;
        let admin = root(&server).await;
        let (lab, jdoe) = lab_with_user(&admin).await;
        let team = admin.create_group(group_spec("team", vec![])).await.unwrap();

        let controller = ExperimenterController::load(&admin, Some(jdoe)).await.unwrap();
        assert_eq!(controller.default_group(), Some(lab));
        assert_eq!(controller.other_groups(), vec![lab]);

        let initial: Vec<u64> = controller
            .other_groups_initial_list(&[lab])
            .iter()
            .map(|g| g.id)
            .collect();
        assert_eq!(initial, vec![team]);

        let selected: Vec<u64> = controller
            .selected_groups(&[team, SYSTEM_GROUP_ID, lab])
            .iter()
            .map(|g| g.id)
            .collect();
        assert_eq!(selected, vec![team, lab]);
    }

    #[tokio::test]
    async fn new_page_cannot_update_or_delete() {
        let server = server().await;
        let admin = root(&server).await;
        let controller = ExperimenterController::load(&admin, None).await.unwrap();
        assert!(controller.experimenter.is_none());
        assert!(controller.delete_experimenter().await.is_err());
    }

    #[tokio::test]
    async fn my_account_lists_owned_groups() {
        let server = server().await;
        let admin = root(&server).await;
        let (lab, jdoe) = lab_with_user(&admin).await;
        admin.update_group(lab, group_spec("lab", vec![jdoe])).await.unwrap();

        let token = server.login("jdoe", "jdoe-pw").await.unwrap();
        let conn = Connection::open(server, &token).await.unwrap();
        let account = MyAccount::load(&conn).await.unwrap();
        assert_eq!(account.experimenter.id, jdoe);
        assert_eq!(account.owned_groups.iter().map(|g| g.id).collect::<Vec<_>>(), vec![lab]);
        assert_eq!(account.groups.iter().map(|g| g.id).collect::<Vec<_>>(), vec![lab]);
        assert!(account.photo_size.is_none());
    }
}
