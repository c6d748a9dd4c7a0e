mod config;

use std::backtrace::Backtrace;
use std::sync::Arc;

use tracing::{error, info, warn};

use archive_db::Database;
use archive_sync::{SlackClients, Store, Supervisor};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slack_archive=debug,archive_sync=debug,archive_db=info".into()),
        )
        .init();

    // Team tasks catch their own panics; this gets the stack into the log
    std::panic::set_hook(Box::new(|info| {
        error!("{}\n{}", info, Backtrace::force_capture());
    }));

    let config = Config::from_env()?;
    let init_only = std::env::args().nth(1).as_deref() == Some("init");

    let db = Database::open(&config.db_path)?;
    info!("Archive database at {}", config.db_path.display());
    let store = Store::new(Arc::new(db));

    let clients = Arc::new(SlackClients::new(config.sync.api_url.clone()));
    let mut supervisor = Supervisor::new(store, config.sync.clone(), clients);

    if init_only {
        let synced = supervisor.run_once(config.credentials).await;
        info!("Init finished for {} team(s)", synced);
        return Ok(());
    }

    info!(
        "Sync every {} minutes, re-scanning the last {} days",
        config.sync.interval.as_secs() / 60,
        config.sync.recent_days
    );
    let started = supervisor.start(config.credentials).await;
    if started == 0 {
        warn!("No usable credentials, nothing to archive");
        return Ok(());
    }

    tokio::select! {
        _ = supervisor.run() => warn!("All teams have stopped"),
        _ = shutdown_signal() => {}
    }
    supervisor.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
