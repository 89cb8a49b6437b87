//! Login sessions.
//!
//! A session token is a UUID v4 handed to the browser once as a cookie. Only
//! `SHA-256(token)` is persisted, so a storage dump cannot be replayed as a
//! login. Every session carries an absolute expiry; expired records are
//! rejected on lookup and removed by [`SessionStore::sweep_expired`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use atrium_storage::StorageBackend;

use crate::error::SessionError;

const SESSION_PREFIX: &str = "sessions/";

/// A stored session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Hex SHA-256 of the token. Also the storage key suffix.
    pub token_hash: String,
    pub experimenter_id: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Creates, validates and revokes login sessions.
pub struct SessionStore {
    storage: Arc<dyn StorageBackend>,
}

impl SessionStore {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    async fn write(&self, session: &Session) -> Result<(), SessionError> {
        let bytes = serde_json::to_vec(session).map_err(|e| SessionError::Serialization {
            reason: e.to_string(),
        })?;
        let key = format!("{SESSION_PREFIX}{}", session.token_hash);
        self.storage.put(&key, &bytes).await?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<Session>, SessionError> {
        let Some(bytes) = self.storage.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SessionError::Serialization {
                reason: e.to_string(),
            })
    }

    /// Start a session for `experimenter_id`.
    ///
    /// Returns the plaintext token. It is not stored and cannot be recovered.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the write fails.
    pub async fn create(&self, experimenter_id: u64, ttl: Duration) -> Result<String, SessionError> {
        let token = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let session = Session {
            token_hash: hash_token(&token),
            experimenter_id,
            created_at: now,
            expires_at: now + ttl,
        };
        self.write(&session).await?;

        info!(experimenter_id, expires_at = %session.expires_at, "session created");
        Ok(token)
    }

    /// Resolve a token to its session.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotFound`] for an unknown or revoked token.
    /// - [`SessionError::Expired`] once the session has passed its expiry.
    pub async fn lookup(&self, token: &str) -> Result<Session, SessionError> {
        let key = format!("{SESSION_PREFIX}{}", hash_token(token));
        let session = self.read(&key).await?.ok_or(SessionError::NotFound)?;
        if session.is_expired() {
            return Err(SessionError::Expired {
                expired_at: session.expires_at.to_rfc3339(),
            });
        }
        Ok(session)
    }

    /// End the session behind `token`. Unknown tokens are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the delete fails.
    pub async fn revoke(&self, token: &str) -> Result<(), SessionError> {
        let token_hash = hash_token(token);
        self.storage
            .delete(&format!("{SESSION_PREFIX}{token_hash}"))
            .await?;
        debug!(token_hash_prefix = &token_hash[..8], "session revoked");
        Ok(())
    }

    /// End every session of an experimenter. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if storage fails.
    pub async fn revoke_for(&self, experimenter_id: u64) -> Result<u64, SessionError> {
        self.remove_where(|s| s.experimenter_id == experimenter_id)
            .await
    }

    /// Remove expired sessions. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if storage fails.
    pub async fn sweep_expired(&self) -> Result<u64, SessionError> {
        self.remove_where(Session::is_expired).await
    }

    async fn remove_where<F>(&self, predicate: F) -> Result<u64, SessionError>
    where
        F: Fn(&Session) -> bool,
    {
        let mut removed = 0u64;
        for key in self.storage.list(SESSION_PREFIX).await? {
            // A corrupt record can never be looked up; drop it as well.
            let doomed = match self.read(&key).await {
                Ok(Some(session)) => predicate(&session),
                Ok(None) => false,
                Err(SessionError::Serialization { .. }) => true,
                Err(e) => return Err(e),
            };
            if doomed {
                self.storage.delete(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

/// Hex SHA-256 of a session token.
#[must_use]
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use atrium_storage::MemoryBackend;

    fn store() -> (SessionStore, MemoryBackend) {
        let backend = MemoryBackend::new();
        (SessionStore::new(Arc::new(backend.clone())), backend)
    }

    #[tokio::test]
    async fn token_is_not_stored_in_plaintext() {
        let (sessions, backend) = store();
        let token = sessions.create(7, Duration::hours(1)).await.unwrap();

        let keys = backend.list(SESSION_PREFIX).await.unwrap();
        assert_eq!(keys, vec![format!("{SESSION_PREFIX}{}", hash_token(&token))]);
        let raw = backend.get(&keys[0]).await.unwrap().unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains(&token));

        assert_eq!(sessions.lookup(&token).await.unwrap().experimenter_id, 7);
    }

    #[tokio::test]
    async fn unknown_and_revoked_tokens_are_not_found() {
        let (sessions, _) = store();
        assert!(matches!(sessions.lookup("nope").await, Err(SessionError::NotFound)));

        let token = sessions.create(7, Duration::hours(1)).await.unwrap();
        sessions.revoke(&token).await.unwrap();
        assert!(matches!(sessions.lookup(&token).await, Err(SessionError::NotFound)));
    }

    #[tokio::test]
    async fn expired_sessions_are_rejected_and_swept() {
        let (sessions, backend) = store();
        let stale = sessions.create(7, Duration::seconds(-1)).await.unwrap();
        let live = sessions.create(8, Duration::hours(1)).await.unwrap();

        assert!(matches!(
            sessions.lookup(&stale).await,
            Err(SessionError::Expired { .. })
        ));
        assert_eq!(sessions.sweep_expired().await.unwrap(), 1);
        assert_eq!(backend.list(SESSION_PREFIX).await.unwrap().len(), 1);
        assert!(sessions.lookup(&live).await.is_ok());
    }

    #[tokio::test]
    async fn revoke_for_ends_all_sessions_of_one_experimenter() {
        let (sessions, _) = store();
        let a1 = sessions.create(1, Duration::hours(1)).await.unwrap();
        let a2 = sessions.create(1, Duration::hours(1)).await.unwrap();
        let b = sessions.create(2, Duration::hours(1)).await.unwrap();

        assert_eq!(sessions.revoke_for(1).await.unwrap(), 2);
        assert!(sessions.lookup(&a1).await.is_err());
        assert!(sessions.lookup(&a2).await.is_err());
        assert!(sessions.lookup(&b).await.is_ok());
    }
}
