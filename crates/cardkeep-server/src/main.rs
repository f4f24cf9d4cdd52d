//! cardkeep server entry point.
//!
//! Loads the settings file, opens the entry-history store, then starts the
//! Axum HTTP server with graceful shutdown. Two background workers run
//! alongside it (expired-session purge and the backup scheduler) and stop on
//! the shutdown signal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use cardkeep_core::auth::SessionStore;
use cardkeep_core::backup::{BackupRequest, BackupService, next_local_run};
use cardkeep_core::settings::{EnvOverrides, SettingsStore};
use cardkeep_storage::{MemoryBackend, StorageBackend};

use cardkeep_server::build_router;
use cardkeep_server::config::{HistoryStorage, ServerConfig};
use cardkeep_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(
        config = %config.config_path.display(),
        base_dir = %config.base_dir.display(),
        history = ?config.history_storage,
        "cardkeep starting"
    );

    let state = build_app_state(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let session_worker = {
        let state = Arc::clone(&state);
        let rx = shutdown_rx.clone();
        let interval_secs = config.session_scan_interval_secs;
        tokio::spawn(async move {
            session_purge_worker(&state.sessions, rx, interval_secs).await;
        })
    };
    let backup_worker = {
        let backup = Arc::clone(&state.backup);
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            backup_scheduler(backup, rx).await;
        })
    };

    let app = build_router(Arc::clone(&state));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "cardkeep listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_tx))
    .await
    .context("server error")?;

    info!("waiting for background workers to stop");
    let _ = tokio::time::timeout(Duration::from_secs(10), async {
        let _ = session_worker.await;
        let _ = backup_worker.await;
    })
    .await;

    info!("cardkeep stopped");
    Ok(())
}

/// Load settings and open the history backend.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let settings = SettingsStore::load(
        &config.config_path,
        &config.base_dir,
        EnvOverrides::from_env(),
    )
    .await
    .context("failed to load settings")?;

    let effective = settings.effective().await;
    if effective.auth_enabled() {
        info!(
            trusted_ips = effective.auth.trusted_ips.len(),
            trust_loopback = effective.auth.trust_loopback,
            "login required"
        );
    } else {
        warn!("no credentials configured, login is disabled");
    }

    let history: Arc<dyn StorageBackend> = match &config.history_storage {
        HistoryStorage::Memory => {
            info!("using in-memory entry history (lost on restart)");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "redb-backend")]
        HistoryStorage::Redb { path } => {
            info!(path = %path.display(), "using redb entry history");
            Arc::new(
                cardkeep_storage::RedbBackend::open(path)
                    .context("failed to open entry history database")?,
            )
        }
        #[cfg(not(feature = "redb-backend"))]
        HistoryStorage::Redb { .. } => {
            anyhow::bail!("redb history requested but feature 'redb-backend' is not enabled");
        }
    };

    Ok(Arc::new(AppState::new(Arc::new(settings), history)))
}

/// Periodically drop expired sessions.
async fn session_purge_worker(
    sessions: &SessionStore,
    mut shutdown: watch::Receiver<bool>,
    interval_secs: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    info!(interval_secs, "session purge worker started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let purged = sessions.purge_expired().await;
                if purged > 0 {
                    info!(purged, "expired sessions purged");
                }
            }
            _ = shutdown.changed() => {
                info!("session purge worker shutting down");
                return;
            }
        }
    }
}

/// Run scheduled backups. Sleeps until the next run and re-reads the
/// schedule whenever it changes.
async fn backup_scheduler(backup: Arc<BackupService>, mut shutdown: watch::Receiver<bool>) {
    info!("backup scheduler started");

    loop {
        let schedule = backup.schedule().await;
        let next = next_local_run(&schedule, Local::now());
        let wait = next
            .and_then(|at| (at - Local::now()).to_std().ok())
            .unwrap_or(Duration::ZERO);
        if let Some(at) = next {
            info!(next_run = %at.to_rfc3339(), "next scheduled backup");
        }

        tokio::select! {
            () = tokio::time::sleep(wait), if next.is_some() => {
                match backup.trigger(BackupRequest::default()).await {
                    Ok(meta) => info!(id = %meta.id, files = meta.file_count, "scheduled backup complete"),
                    Err(e) => error!(error = %e, "scheduled backup failed"),
                }
            }
            () = backup.schedule_changed() => {}
            _ = shutdown.changed() => {
                info!("backup scheduler shutting down");
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
