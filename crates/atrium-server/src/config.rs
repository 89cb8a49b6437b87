//! Server configuration for Atrium.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `ATRIUM_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Longest accepted session lifetime (one year); larger values are clamped.
pub const MAX_SESSION_TTL_SECS: i64 = 31_536_000;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Lifetime of a login session in seconds, at most [`MAX_SESSION_TTL_SECS`].
    pub session_ttl_secs: i64,
    /// Seconds between expired-session sweeps.
    pub session_sweep_interval_secs: u64,
    /// Password for the `root` account created on first start. Generated
    /// and printed once to stderr when unset.
    pub root_password: Option<String>,
    /// Managed data repository measured on the drive space page.
    pub repository_path: PathBuf,
    /// Largest accepted avatar upload, in bytes.
    pub max_photo_bytes: usize,
    /// Mark the session cookie `Secure`.
    pub secure_cookies: bool,
    /// Mail delivery for password recovery. Recovery is disabled when unset.
    pub smtp: Option<SmtpConfig>,
}

/// Outgoing mail settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender mailbox, e.g. `Atrium <atrium@example.org>`.
    pub from: String,
    /// Upgrade the connection with STARTTLS.
    pub starttls: bool,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// Redb persistent storage.
    Redb { path: String },
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT`: port to bind on, binds to `0.0.0.0`
    /// - `ATRIUM_BIND_ADDR`: full bind address (overrides `PORT`, default: `127.0.0.1:4080`)
    /// - `ATRIUM_STORAGE`: `memory` or `redb` (default: `memory`)
    /// - `ATRIUM_STORAGE_PATH`: redb file (default: `./data/atrium.redb`)
    /// - `ATRIUM_LOG_LEVEL`: log filter (default: `info`)
    /// - `ATRIUM_SESSION_TTL`: session lifetime in seconds (default: `28800`)
    /// - `ATRIUM_SESSION_SWEEP_INTERVAL`: seconds between sweeps (default: `300`)
    /// - `ATRIUM_ROOT_PASSWORD`: bootstrap `root` password (default: generated)
    /// - `ATRIUM_REPOSITORY`: data repository path (default: `./data/repository`)
    /// - `ATRIUM_MAX_PHOTO_BYTES`: avatar upload limit (default: `5242880`)
    /// - `ATRIUM_SECURE_COOKIES`: `Secure` session cookie (default: `false`)
    /// - `ATRIUM_SMTP_HOST`, `ATRIUM_SMTP_PORT`, `ATRIUM_SMTP_USER`,
    ///   `ATRIUM_SMTP_PASSWORD`, `ATRIUM_SMTP_FROM`, `ATRIUM_SMTP_STARTTLS`:
    ///   password-recovery mail (disabled unless `ATRIUM_SMTP_HOST` is set)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str, default: bool| {
            var(key).map_or(default, |v| matches!(v.trim(), "true" | "1" | "yes" | "on"))
        };

        // Priority: ATRIUM_BIND_ADDR > PORT > default 127.0.0.1:4080
        let bind_addr = if let Some(addr) = var("ATRIUM_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 4080)))
        } else if let Some(port_str) = var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(4080);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 4080))
        };

        let storage_path =
            var("ATRIUM_STORAGE_PATH").unwrap_or_else(|| "./data/atrium.redb".to_owned());

        let storage_backend = match var("ATRIUM_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "redb" => StorageBackendType::Redb { path: storage_path },
            _ => StorageBackendType::Memory,
        };

        let log_level = var("ATRIUM_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let session_ttl_secs = var("ATRIUM_SESSION_TTL")
            .and_then(|v| v.parse().ok())
            .filter(|secs: &i64| *secs > 0)
            .map_or(28_800, |secs| secs.min(MAX_SESSION_TTL_SECS));

        let session_sweep_interval_secs = var("ATRIUM_SESSION_SWEEP_INTERVAL")
            .and_then(|v| v.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .unwrap_or(300);

        let root_password = var("ATRIUM_ROOT_PASSWORD").filter(|p| !p.is_empty());

        let repository_path = var("ATRIUM_REPOSITORY")
            .map_or_else(|| PathBuf::from("./data/repository"), PathBuf::from);

        let max_photo_bytes = var("ATRIUM_MAX_PHOTO_BYTES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(5 * 1024 * 1024);

        let secure_cookies = flag("ATRIUM_SECURE_COOKIES", false);

        // Recovery mail, enabled when ATRIUM_SMTP_HOST is set.
        let smtp = var("ATRIUM_SMTP_HOST")
            .filter(|h| !h.is_empty())
            .map(|host| SmtpConfig {
                port: var("ATRIUM_SMTP_PORT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(587),
                username: var("ATRIUM_SMTP_USER"),
                password: var("ATRIUM_SMTP_PASSWORD"),
                from: var("ATRIUM_SMTP_FROM").unwrap_or_else(|| format!("Atrium <atrium@{host}>")),
                starttls: flag("ATRIUM_SMTP_STARTTLS", true),
                host,
            });

        Self {
            bind_addr,
            storage_backend,
            log_level,
            session_ttl_secs,
            session_sweep_interval_secs,
            root_password,
            repository_path,
            max_photo_bytes,
            secure_cookies,
            smtp,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.bind_addr, SocketAddr::from(([127, 0, 0, 1], 4080)));
        assert_eq!(c.storage_backend, StorageBackendType::Memory);
        assert_eq!(c.session_ttl_secs, 28_800);
        assert_eq!(c.max_photo_bytes, 5_242_880);
        assert!(c.root_password.is_none());
        assert!(c.smtp.is_none());
        assert!(!c.secure_cookies);
    }

    #[test]
    fn session_ttl_is_clamped() {
        assert_eq!(
            config(&[("ATRIUM_SESSION_TTL", "9223372036854775807")]).session_ttl_secs,
            MAX_SESSION_TTL_SECS
        );
        assert_eq!(config(&[("ATRIUM_SESSION_TTL", "-5")]).session_ttl_secs, 28_800);
        assert_eq!(config(&[("ATRIUM_SESSION_TTL", "600")]).session_ttl_secs, 600);
        assert!(chrono::Duration::try_seconds(MAX_SESSION_TTL_SECS).is_some());
    }

    #[test]
    fn port_binds_all_interfaces_unless_overridden() {
        assert_eq!(
            config(&[("PORT", "9000")]).bind_addr,
            SocketAddr::from(([0, 0, 0, 0], 9000))
        );
        assert_eq!(
            config(&[("PORT", "9000"), ("ATRIUM_BIND_ADDR", "10.0.0.1:81")]).bind_addr,
            SocketAddr::from(([10, 0, 0, 1], 81))
        );
    }

    #[test]
    fn smtp_requires_host() {
        let c = config(&[("ATRIUM_SMTP_HOST", "mail.example.org"), ("ATRIUM_SMTP_STARTTLS", "0")]);
        let smtp = c.smtp.unwrap();
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.from, "Atrium <atrium@mail.example.org>");
        assert!(!smtp.starttls);
    }

    #[test]
    fn redb_uses_storage_path() {
        let c = config(&[("ATRIUM_STORAGE", "REDB"), ("ATRIUM_STORAGE_PATH", "/srv/a.redb")]);
        assert_eq!(
            c.storage_backend,
            StorageBackendType::Redb { path: "/srv/a.redb".to_owned() }
        );
    }
}
