//! Atrium server entry point.
//!
//! Bootstraps the storage backend and the directory, then starts the Axum
//! HTTP server with graceful shutdown. A background session sweeper runs
//! alongside the server and is cancelled on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use atrium_core::drivespace::RepositoryUsage;
use atrium_core::gateway::DataServer;
use atrium_core::password;
use atrium_core::recovery::ResetNotifier;
use atrium_storage::MemoryBackend;

use atrium_server::config::{ServerConfig, StorageBackendType};
use atrium_server::mailer::SmtpNotifier;
use atrium_server::routes;
use atrium_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment.
    let config = ServerConfig::from_env();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, "Atrium starting");

    let state = build_app_state(&config).await?;

    // Shutdown signal channel.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn expired-session sweeper.
    let sweeper_handle = {
        let server = Arc::clone(&state.server);
        let mut rx = shutdown_rx.clone();
        let interval_secs = config.session_sweep_interval_secs;
        tokio::spawn(async move {
            session_sweeper(server, &mut rx, interval_secs).await;
        })
    };

    let app = routes::router(Arc::clone(&state));

    // Bind and serve.
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "Atrium server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    info!("waiting for background workers to stop");
    let _ = tokio::time::timeout(Duration::from_secs(10), sweeper_handle).await;

    info!("Atrium server stopped");
    Ok(())
}

/// Build the shared application state and bootstrap the directory.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let storage: Arc<dyn atrium_storage::StorageBackend> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "redb-backend")]
        StorageBackendType::Redb { path } => {
            info!(path = %path, "using redb storage");
            ensure_parent_dir(std::path::Path::new(path))?;
            Arc::new(
                atrium_storage::RedbBackend::open(path)
                    .context("failed to open redb storage")?,
            )
        }
        #[cfg(not(feature = "redb-backend"))]
        StorageBackendType::Redb { .. } => {
            anyhow::bail!("redb backend requested but feature 'redb-backend' is not enabled");
        }
    };

    tokio::fs::create_dir_all(&config.repository_path)
        .await
        .with_context(|| {
            format!(
                "failed to create repository directory {}",
                config.repository_path.display()
            )
        })?;

    // Password recovery is only offered when mail can be delivered.
    let notifier: Option<Arc<dyn ResetNotifier>> = match &config.smtp {
        Some(smtp) => {
            let notifier = SmtpNotifier::new(smtp).context("invalid SMTP configuration")?;
            info!(host = %smtp.host, port = smtp.port, "password recovery mail enabled");
            Some(Arc::new(notifier))
        }
        None => {
            info!("ATRIUM_SMTP_HOST not set, password recovery disabled");
            None
        }
    };

    let server = DataServer::new(
        storage,
        RepositoryUsage::new(config.repository_path.clone()),
        notifier,
        chrono::Duration::try_seconds(config.session_ttl_secs)
            .context("ATRIUM_SESSION_TTL is out of range")?,
    );

    let (root_password, generated) = match &config.root_password {
        Some(password) => (password.clone(), false),
        None => (password::generate_password(), true),
    };
    let created = server
        .bootstrap(&root_password)
        .await
        .context("failed to bootstrap directory")?;
    if created && generated {
        announce_root_password(&root_password).context("failed to print the root password")?;
        warn!("root account created with a generated password, printed to stderr");
    } else if created {
        info!("root account created");
    }

    Ok(Arc::new(AppState {
        server: Arc::new(server),
        secure_cookies: config.secure_cookies,
        max_photo_bytes: config.max_photo_bytes,
    }))
}

/// Print a generated root password once to stderr, outside the log stream.
fn announce_root_password(password: &str) -> std::io::Result<()> {
    use std::io::Write;

    let mut stderr = std::io::stderr().lock();
    writeln!(stderr, "Atrium root password: {password}")?;
    writeln!(stderr, "Set ATRIUM_ROOT_PASSWORD to choose it instead.")
}

#[cfg(feature = "redb-backend")]
fn ensure_parent_dir(path: &std::path::Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Background worker that periodically drops expired sessions.
async fn session_sweeper(
    server: Arc<DataServer>,
    shutdown: &mut watch::Receiver<bool>,
    interval_secs: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    info!(interval_secs, "session sweeper started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match server.sweep_sessions().await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "expired sessions removed"),
                    Err(e) => warn!(error = %e, "session sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                info!("session sweeper shutting down");
                return;
            }
        }
    }
}

/// Wait for SIGINT or SIGTERM, then broadcast shutdown.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
    let _ = shutdown_tx.send(true);
}
