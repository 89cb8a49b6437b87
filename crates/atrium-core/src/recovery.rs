//! Forgotten-password recovery.
//!
//! Recovery runs on the guest connection, before anyone is logged in. A user
//! names their account and email; when both match, a fresh password is set
//! and handed to a [`ResetNotifier`] for delivery. Accounts bound to LDAP
//! are refused because their credentials live in the directory service.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::directory::Directory;
use crate::error::RecoveryError;
use crate::model::{same_name, Experimenter, GUEST_EXPERIMENTER_ID};
use crate::password;

/// Delivers a newly generated password to its owner.
#[async_trait]
pub trait ResetNotifier: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns [`RecoveryError::Delivery`] if the message could not be sent.
    async fn send_new_password(
        &self,
        experimenter: &Experimenter,
        new_password: &str,
    ) -> Result<(), RecoveryError>;
}

/// The forgotten-password service.
pub struct PasswordRecovery {
    directory: Arc<Directory>,
    notifier: Option<Arc<dyn ResetNotifier>>,
}

impl std::fmt::Debug for PasswordRecovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordRecovery")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl PasswordRecovery {
    #[must_use]
    pub fn new(directory: Arc<Directory>, notifier: Option<Arc<dyn ResetNotifier>>) -> Self {
        Self {
            directory,
            notifier,
        }
    }

    /// Recovery needs somewhere to send the new password.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.notifier.is_some()
    }

    /// Reset the password of the account matching `username` and `email`.
    ///
    /// # Errors
    ///
    /// - [`RecoveryError::Disabled`] when no notifier is configured.
    /// - [`RecoveryError::NoMatch`] when the pair does not identify an account.
    /// - [`RecoveryError::LdapManaged`] for LDAP-bound accounts.
    /// - [`RecoveryError::Delivery`] when the notifier fails.
    pub async fn report_forgotten_password(&self, username: &str, email: &str) -> Result<(), RecoveryError> {
        let notifier = self.notifier.as_ref().ok_or(RecoveryError::Disabled)?;

        let email = email.trim();
        let experimenter = self
            .directory
            .find_experimenter(username.trim())
            .await?
            .filter(|e| e.id != GUEST_EXPERIMENTER_ID)
            .filter(|e| !email.is_empty() && same_name(&e.email, email))
            .ok_or(RecoveryError::NoMatch)?;

        if experimenter.ldap_auth() {
            warn!(experimenter_id = experimenter.id, "password recovery refused for LDAP account");
            return Err(RecoveryError::LdapManaged {
                name: experimenter.ome_name,
            });
        }

        let new_password = password::generate_password();
        self.directory
            .set_password(experimenter.id, &new_password)
            .await?;
        notifier
            .send_new_password(&experimenter, &new_password)
            .await?;

        info!(experimenter_id = experimenter.id, "password reset by recovery");
        Ok(())
    }
}
