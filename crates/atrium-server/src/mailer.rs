//! SMTP delivery of recovered passwords.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use atrium_core::error::RecoveryError;
use atrium_core::model::Experimenter;
use atrium_core::recovery::ResetNotifier;

use crate::config::SmtpConfig;

/// Sends the new password to the experimenter's email address.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl std::fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

impl SmtpNotifier {
    /// # Errors
    ///
    /// Returns [`RecoveryError::Delivery`] if the sender address or relay
    /// settings are invalid.
    pub fn new(config: &SmtpConfig) -> Result<Self, RecoveryError> {
        let from: Mailbox = config.from.parse().map_err(|e| RecoveryError::Delivery {
            reason: format!("invalid sender '{}': {e}", config.from),
        })?;

        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host).map_err(|e| {
                RecoveryError::Delivery {
                    reason: format!("invalid relay '{}': {e}", config.host),
                }
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        builder = builder.port(config.port);
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl ResetNotifier for SmtpNotifier {
    async fn send_new_password(
        &self,
        experimenter: &Experimenter,
        new_password: &str,
    ) -> Result<(), RecoveryError> {
        let to: Mailbox = experimenter
            .email
            .parse()
            .map_err(|e| RecoveryError::Delivery {
                reason: format!("invalid recipient: {e}"),
            })?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject("Your password was reset")
            .header(ContentType::TEXT_PLAIN)
            .body(format!(
                "Dear {},\n\nyour password for user '{}' was reset.\nNew password: {}\n\nPlease change it after logging in.\n",
                experimenter.full_name(),
                experimenter.ome_name,
                new_password
            ))
            .map_err(|e| RecoveryError::Delivery {
                reason: e.to_string(),
            })?;

        self.transport
            .send(message)
            .await
            .map_err(|e| RecoveryError::Delivery {
                reason: e.to_string(),
            })?;

        info!(experimenter_id = experimenter.id, "recovery mail sent");
        Ok(())
    }
}
