//! Session-bound access to the data-management server.
//!
//! [`DataServer`] bundles the directory, session store, photo store,
//! repository usage and password recovery. Nothing outside this module talks
//! to those directly on behalf of a user: a request first opens a
//! [`Connection`] from its session token, and every mutating call on the
//! connection checks the caller's [`EventContext`] before it reaches the
//! directory.
//!
//! Authorization rules:
//!
//! - administrators (members of `system`) manage experimenters and groups;
//! - group owners, and administrators, change a group's permissions;
//! - everything else acts on the connected experimenter only.

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, warn};

use atrium_storage::StorageBackend;

use crate::directory::Directory;
use crate::drivespace::RepositoryUsage;
use crate::error::{DirectoryError, GatewayError, SessionError};
use crate::model::{
    AccountUpdate, EventContext, Experimenter, ExperimenterUpdate, GroupSpec, NewExperimenter,
    GUEST_EXPERIMENTER_ID,
};
use crate::permissions::Permissions;
use crate::photo::{CropBox, PhotoStore};
use crate::recovery::{PasswordRecovery, ResetNotifier};
use crate::session::SessionStore;

/// Everything behind the admin panel, shared by all connections.
pub struct DataServer {
    directory: Arc<Directory>,
    sessions: SessionStore,
    photos: PhotoStore,
    repository: RepositoryUsage,
    recovery: PasswordRecovery,
    session_ttl: Duration,
}

impl std::fmt::Debug for DataServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataServer")
            .field("repository", &self.repository)
            .field("session_ttl", &self.session_ttl)
            .finish_non_exhaustive()
    }
}

impl DataServer {
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        repository: RepositoryUsage,
        notifier: Option<Arc<dyn ResetNotifier>>,
        session_ttl: Duration,
    ) -> Self {
        let directory = Arc::new(Directory::new(Arc::clone(&storage)));
        Self {
            recovery: PasswordRecovery::new(Arc::clone(&directory), notifier),
            sessions: SessionStore::new(Arc::clone(&storage)),
            photos: PhotoStore::new(storage),
            directory,
            repository,
            session_ttl,
        }
    }

    /// See [`Directory::bootstrap`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Directory`] if bootstrap fails.
    pub async fn bootstrap(&self, root_password: &str) -> Result<bool, GatewayError> {
        Ok(self.directory.bootstrap(root_password).await?)
    }

    /// Check credentials and start a session. Returns the session token.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::InvalidCredentials`] (wrapped) on a failed login.
    pub async fn login(&self, ome_name: &str, password: &str) -> Result<String, GatewayError> {
        let experimenter = match self.directory.authenticate(ome_name, password).await {
            Ok(experimenter) => experimenter,
            Err(e) => {
                warn!(ome_name, "login failed");
                return Err(e.into());
            }
        };
        let token = self
            .sessions
            .create(experimenter.id, self.session_ttl)
            .await?;
        info!(experimenter_id = experimenter.id, ome_name = %experimenter.ome_name, "logged in");
        Ok(token)
    }

    /// End a session.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Session`] if storage fails.
    pub async fn logout(&self, token: &str) -> Result<(), GatewayError> {
        Ok(self.sessions.revoke(token).await?)
    }

    /// Drop expired sessions. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Session`] if storage fails.
    pub async fn sweep_sessions(&self) -> Result<u64, GatewayError> {
        Ok(self.sessions.sweep_expired().await?)
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    #[must_use]
    pub fn recovery(&self) -> &PasswordRecovery {
        &self.recovery
    }
}

/// A session-bound handle: the server plus the identity it acts as.
#[derive(Clone)]
pub struct Connection {
    server: Arc<DataServer>,
    context: EventContext,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Resolve a session token to a connection.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Session`] if the token is unknown or expired,
    /// or if its experimenter was deleted or deactivated since login.
    pub async fn open(server: Arc<DataServer>, token: &str) -> Result<Self, GatewayError> {
        let session = server.sessions.lookup(token).await?;
        let experimenter = match server.directory.get_experimenter(session.experimenter_id).await {
            Ok(e) if e.is_active() => e,
            Ok(_) | Err(DirectoryError::ExperimenterNotFound { .. }) => {
                server.sessions.revoke(token).await?;
                return Err(SessionError::NotFound.into());
            }
            Err(e) => return Err(e.into()),
        };
        Self::for_experimenter(server, &experimenter).await
    }

    /// A connection acting as `experimenter`, without a session.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Directory`] if group ownership cannot be read.
    pub async fn for_experimenter(server: Arc<DataServer>, experimenter: &Experimenter) -> Result<Self, GatewayError> {
        let leader_of_groups = server
            .directory
            .owned_groups(experimenter.id)
            .await?
            .into_iter()
            .map(|g| g.id)
            .collect();
        let context = EventContext {
            user_id: experimenter.id,
            user_name: experimenter.ome_name.clone(),
            is_admin: experimenter.is_admin(),
            member_of_groups: experimenter.groups.clone(),
            leader_of_groups,
        };
        Ok(Self { server, context })
    }

    /// The unauthenticated connection used by the recovery flow.
    #[must_use]
    pub fn guest(server: Arc<DataServer>) -> Self {
        Self {
            server,
            context: EventContext {
                user_id: GUEST_EXPERIMENTER_ID,
                user_name: "guest".to_owned(),
                is_admin: false,
                member_of_groups: Vec::new(),
                leader_of_groups: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn context(&self) -> &EventContext {
        &self.context
    }

    #[must_use]
    pub fn user_id(&self) -> u64 {
        self.context.user_id
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.context.is_admin
    }

    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.context.user_id == GUEST_EXPERIMENTER_ID
    }

    /// Read access to the directory. Mutations go through the connection.
    #[must_use]
    pub fn directory(&self) -> &Directory {
        &self.server.directory
    }

    #[must_use]
    pub fn repository(&self) -> &RepositoryUsage {
        &self.server.repository
    }

    #[must_use]
    pub fn server(&self) -> &Arc<DataServer> {
        &self.server
    }

    // ── Guards ───────────────────────────────────────────────────────

    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] unless the caller is an administrator.
    pub fn require_admin(&self) -> Result<(), GatewayError> {
        if self.context.is_admin {
            Ok(())
        } else {
            Err(GatewayError::Forbidden {
                reason: format!("'{}' is not an administrator", self.context.user_name),
            })
        }
    }

    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] unless the caller owns the group or is
    /// an administrator.
    pub fn require_group_owner(&self, group_id: u64) -> Result<(), GatewayError> {
        if self.context.is_admin || self.context.is_leader_of(group_id) {
            Ok(())
        } else {
            Err(GatewayError::Forbidden {
                reason: format!(
                    "'{}' does not own group {group_id}",
                    self.context.user_name
                ),
            })
        }
    }

    fn require_login(&self) -> Result<(), GatewayError> {
        if self.is_guest() {
            Err(GatewayError::Forbidden {
                reason: "login required".to_owned(),
            })
        } else {
            Ok(())
        }
    }

    // ── Administration ───────────────────────────────────────────────

    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for non-administrators, otherwise as
    /// [`Directory::create_experimenter`].
    pub async fn create_experimenter(&self, new: NewExperimenter) -> Result<u64, GatewayError> {
        self.require_admin()?;
        Ok(self.server.directory.create_experimenter(new).await?)
    }

    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for non-administrators, otherwise as
    /// [`Directory::update_experimenter`].
    pub async fn update_experimenter(&self, id: u64, update: ExperimenterUpdate) -> Result<(), GatewayError> {
        self.require_admin()?;
        if id == self.context.user_id && (!update.admin || !update.active) {
            return Err(GatewayError::Forbidden {
                reason: "you cannot remove your own administrator or active status".to_owned(),
            });
        }
        let deactivated = !update.active;
        self.server.directory.update_experimenter(id, update).await?;
        if deactivated {
            self.server.sessions.revoke_for(id).await?;
        }
        Ok(())
    }

    /// Delete an experimenter together with their sessions and photo.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for non-administrators or when deleting
    /// yourself, otherwise as [`Directory::delete_experimenter`].
    pub async fn delete_experimenter(&self, id: u64) -> Result<(), GatewayError> {
        self.require_admin()?;
        if id == self.context.user_id {
            return Err(GatewayError::Forbidden {
                reason: "you cannot delete your own account".to_owned(),
            });
        }
        self.server.directory.delete_experimenter(id).await?;
        self.server.sessions.revoke_for(id).await?;
        self.server.photos.delete(id).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for non-administrators, otherwise as
    /// [`Directory::create_group`].
    pub async fn create_group(&self, spec: GroupSpec) -> Result<u64, GatewayError> {
        self.require_admin()?;
        Ok(self.server.directory.create_group(spec).await?)
    }

    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for non-administrators, otherwise as
    /// [`Directory::update_group`].
    pub async fn update_group(&self, id: u64, spec: GroupSpec) -> Result<(), GatewayError> {
        self.require_admin()?;
        Ok(self.server.directory.update_group(id, spec).await?)
    }

    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] unless the caller owns the group or is an
    /// administrator.
    pub async fn update_group_permissions(&self, id: u64, permissions: Permissions) -> Result<(), GatewayError> {
        self.require_group_owner(id)?;
        Ok(self
            .server
            .directory
            .update_group_permissions(id, permissions)
            .await?)
    }

    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for non-administrators, otherwise as
    /// [`Directory::set_group_members`].
    pub async fn set_group_members(&self, group_id: u64, available: &[u64], members: &[u64]) -> Result<(), GatewayError> {
        self.require_admin()?;
        Ok(self
            .server
            .directory
            .set_group_members(group_id, available, members)
            .await?)
    }

    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for non-administrators, otherwise as
    /// [`Directory::link_ldap`].
    pub async fn link_ldap(&self, id: u64, dn: &str) -> Result<(), GatewayError> {
        self.require_admin()?;
        self.server.directory.link_ldap(id, dn).await?;
        self.server.sessions.revoke_for(id).await?;
        Ok(())
    }

    // ── Self service ─────────────────────────────────────────────────

    /// The connected experimenter's record.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Directory`] if the record cannot be read.
    pub async fn me(&self) -> Result<Experimenter, GatewayError> {
        Ok(self
            .server
            .directory
            .get_experimenter(self.context.user_id)
            .await?)
    }

    /// # Errors
    ///
    /// As [`Directory::update_account`].
    pub async fn update_my_account(&self, update: AccountUpdate) -> Result<(), GatewayError> {
        self.require_login()?;
        Ok(self
            .server
            .directory
            .update_account(self.context.user_id, update)
            .await?)
    }

    /// Change your own password.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::LdapManaged`] for LDAP accounts.
    /// - [`GatewayError::IncorrectPassword`] if `old_password` is wrong.
    pub async fn change_my_password(&self, new_password: &str, old_password: &str) -> Result<(), GatewayError> {
        self.require_login()?;
        let me = self.me().await?;
        if me.ldap_auth() {
            return Err(GatewayError::LdapManaged { name: me.ome_name });
        }
        if !self
            .server
            .directory
            .verify_password(me.id, old_password)
            .await?
        {
            return Err(GatewayError::IncorrectPassword);
        }
        self.server
            .directory
            .set_password(me.id, new_password)
            .await?;
        Ok(())
    }

    /// Set another experimenter's password, confirmed with the
    /// administrator's own password.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Forbidden`] for non-administrators.
    /// - [`GatewayError::IncorrectPassword`] if `my_password` is wrong.
    /// - [`GatewayError::LdapManaged`] if the target is an LDAP account.
    pub async fn change_user_password(
        &self,
        ome_name: &str,
        new_password: &str,
        my_password: &str,
    ) -> Result<(), GatewayError> {
        self.require_admin()?;
        if !self
            .server
            .directory
            .verify_password(self.context.user_id, my_password)
            .await?
        {
            return Err(GatewayError::IncorrectPassword);
        }
        let target = self
            .server
            .directory
            .find_experimenter(ome_name)
            .await?
            .ok_or_else(|| DirectoryError::Invalid {
                reason: format!("no experimenter named '{ome_name}'"),
            })?;
        if target.ldap_auth() {
            return Err(GatewayError::LdapManaged {
                name: target.ome_name,
            });
        }
        self.server
            .directory
            .set_password(target.id, new_password)
            .await?;
        info!(
            admin_id = self.context.user_id,
            experimenter_id = target.id,
            "password set by administrator"
        );
        Ok(())
    }

    // ── Photo ────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// [`GatewayError::Photo`] if storage fails.
    pub async fn get_my_photo(&self) -> Result<Option<Vec<u8>>, GatewayError> {
        Ok(self.server.photos.get(self.context.user_id).await?)
    }

    /// # Errors
    ///
    /// [`GatewayError::Photo`] if the stored photo cannot be read.
    pub async fn my_photo_size(&self) -> Result<Option<(u32, u32)>, GatewayError> {
        Ok(self.server.photos.size(self.context.user_id).await?)
    }

    /// # Errors
    ///
    /// [`GatewayError::Photo`] for undecodable uploads.
    pub async fn upload_my_photo(&self, bytes: &[u8]) -> Result<(u32, u32), GatewayError> {
        self.require_login()?;
        Ok(self.server.photos.upload(self.context.user_id, bytes).await?)
    }

    /// # Errors
    ///
    /// [`GatewayError::Photo`] if there is no photo or the box is invalid.
    pub async fn crop_my_photo(&self, crop: CropBox) -> Result<(u32, u32), GatewayError> {
        self.require_login()?;
        Ok(self.server.photos.crop(self.context.user_id, crop).await?)
    }

    /// # Errors
    ///
    /// [`GatewayError::Photo`] if storage fails.
    pub async fn delete_my_photo(&self) -> Result<(), GatewayError> {
        self.require_login()?;
        Ok(self.server.photos.delete(self.context.user_id).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::directory::tests::{group_spec, new_experimenter};
    use crate::model::ROOT_EXPERIMENTER_ID;
    use crate::photo::tests::png;
    use crate::permissions::PermissionLevel;
    use atrium_storage::MemoryBackend;

    pub(crate) async fn server() -> Arc<DataServer> {
        let server = DataServer::new(
            Arc::new(MemoryBackend::new()),
            RepositoryUsage::new(std::env::temp_dir().join("atrium-gateway-tests")),
            None,
            Duration::hours(1),
        );
        server.bootstrap("rootpw").await.unwrap();
        Arc::new(server)
    }

    pub(crate) async fn root(server: &Arc<DataServer>) -> Connection {
        let token = server.login("root", "rootpw").await.unwrap();
        Connection::open(Arc::clone(server), &token).await.unwrap()
    }

    /// Creates group `lab` and user `jdoe` in it; returns (lab, jdoe).
    pub(crate) async fn lab_with_user(admin: &Connection) -> (u64, u64) {
        let lab = admin.create_group(group_spec("lab", vec![])).await.unwrap();
        let jdoe = admin
            .create_experimenter(new_experimenter("jdoe", lab, vec![lab]))
            .await
            .unwrap();
        (lab, jdoe)
    }

    async fn login(server: &Arc<DataServer>, name: &str) -> Connection {
        let token = server.login(name, &format!("{name}-pw")).await.unwrap();
        Connection::open(Arc::clone(server), &token).await.unwrap()
    }

    #[tokio::test]
    async fn open_builds_context_from_session() {
        let server = server().await;
        let admin = root(&server).await;
        assert!(admin.is_admin());
        assert_eq!(admin.user_id(), ROOT_EXPERIMENTER_ID);

        let (lab, jdoe) = lab_with_user(&admin).await;
        admin
            .update_group(lab, group_spec("lab", vec![jdoe]))
            .await
            .unwrap();
        let user = login(&server, "jdoe").await;
        assert!(!user.is_admin());
        assert!(user.context().is_leader_of(lab));
    }

    #[tokio::test]
    async fn bad_tokens_do_not_open() {
        let server = server().await;
        let err = Connection::open(Arc::clone(&server), "bogus").await.unwrap_err();
        assert!(matches!(err, GatewayError::Session(SessionError::NotFound)));

        let token = server.login("root", "rootpw").await.unwrap();
        server.logout(&token).await.unwrap();
        assert!(Connection::open(server, &token).await.is_err());
    }

    #[tokio::test]
    async fn non_admins_cannot_administer() {
        let server = server().await;
        let admin = root(&server).await;
        let (lab, _) = lab_with_user(&admin).await;
        let user = login(&server, "jdoe").await;

        let err = user
            .create_group(group_spec("mine", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden { .. }));
        let err = user.delete_experimenter(ROOT_EXPERIMENTER_ID).await.unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden { .. }));
        let err = user
            .update_group_permissions(lab, Permissions::private())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn group_owner_changes_permissions() {
        let server = server().await;
        let admin = root(&server).await;
        let (lab, jdoe) = lab_with_user(&admin).await;
        admin
            .update_group(lab, group_spec("lab", vec![jdoe]))
            .await
            .unwrap();

        let owner = login(&server, "jdoe").await;
        let public = Permissions::from_level(PermissionLevel::Public, false);
        owner.update_group_permissions(lab, public).await.unwrap();
        assert_eq!(
            admin.directory().get_group(lab).await.unwrap().permissions,
            public
        );
    }

    #[tokio::test]
    async fn deleting_an_experimenter_ends_their_sessions() {
        let server = server().await;
        let admin = root(&server).await;
        let (_, jdoe) = lab_with_user(&admin).await;
        let token = server.login("jdoe", "jdoe-pw").await.unwrap();

        admin.delete_experimenter(jdoe).await.unwrap();
        assert!(Connection::open(Arc::clone(&server), &token).await.is_err());

        let err = admin.delete_experimenter(ROOT_EXPERIMENTER_ID).await.unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn change_my_password_checks_old_password() {
        let server = server().await;
        let admin = root(&server).await;
        lab_with_user(&admin).await;
        let user = login(&server, "jdoe").await;

        let err = user.change_my_password("new", "wrong").await.unwrap_err();
        assert!(matches!(err, GatewayError::IncorrectPassword));
        user.change_my_password("new", "jdoe-pw").await.unwrap();
        assert!(server.login("jdoe", "new").await.is_ok());
    }

    #[tokio::test]
    async fn admin_sets_password_with_own_confirmation() {
        let server = server().await;
        let admin = root(&server).await;
        let (_, jdoe) = lab_with_user(&admin).await;

        let err = admin
            .change_user_password("jdoe", "fresh", "not-root")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::IncorrectPassword));
        admin
            .change_user_password("jdoe", "fresh", "rootpw")
            .await
            .unwrap();
        assert!(server.login("jdoe", "fresh").await.is_ok());

        admin.link_ldap(jdoe, "uid=jdoe,dc=example").await.unwrap();
        let err = admin
            .change_user_password("jdoe", "again", "rootpw")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::LdapManaged { .. }));
    }

    #[tokio::test]
    async fn photo_operations_act_on_the_caller() {
        let server = server().await;
        let admin = root(&server).await;
        lab_with_user(&admin).await;
        let user = login(&server, "jdoe").await;

        user.upload_my_photo(&png(20, 20)).await.unwrap();
        assert_eq!(user.my_photo_size().await.unwrap(), Some((20, 20)));
        assert_eq!(admin.my_photo_size().await.unwrap(), None);

        user.crop_my_photo(CropBox { x1: 0, y1: 0, x2: 10, y2: 10 })
            .await
            .unwrap();
        assert_eq!(user.my_photo_size().await.unwrap(), Some((10, 10)));
        user.delete_my_photo().await.unwrap();
        assert!(user.get_my_photo().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn guest_connection_cannot_change_anything() {
        let server = server().await;
        let guest = Connection::guest(server);
        assert!(guest.is_guest());
        let err = guest.upload_my_photo(&png(4, 4)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden { .. }));
        let err = guest.change_my_password("a", "b").await.unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden { .. }));
    }
}
