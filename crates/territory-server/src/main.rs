//! Territory lifecycle service binary.
//!
//! Wires the lifecycle engine to `PostgreSQL`, the HTTP API, the periodic
//! sweeps, and the notification channel, then serves until `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `territory-config.yaml` (or `TERRITORY_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL` and run migrations
//! 4. Build the lifecycle engine over the `PostgreSQL` repository
//! 5. Set up assignment notifications
//! 6. Start the sweep scheduler
//! 7. Serve the HTTP API until shutdown
//! 8. Stop the scheduler and close the pool

mod error;
mod scheduler;
mod webhook;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use territory_api::{AppState, start_server};
use territory_core::LifecycleEngine;
use territory_core::clock::SystemClock;
use territory_core::config::{LoggingConfig, NotifierConfig, NotifierKind, ServiceConfig};
use territory_core::notify::{LogNotifier, MessageComposer, Notifications, Notifier};
use territory_db::{PgRepository, PostgresPool};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ServiceError;
use crate::webhook::WebhookNotifier;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "territory-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step or the HTTP server fails.
#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        port = config.server.port,
        sweeps_enabled = config.sweeps.enabled,
        notifier = ?config.notifier.kind,
        "territory-server starting"
    );

    // 3. Connect to PostgreSQL and migrate.
    let pool = PostgresPool::open(&config.store).await?;

    // 4. Build the engine.
    let engine = Arc::new(LifecycleEngine::new(
        Arc::new(PgRepository::new(&pool)),
        Arc::new(SystemClock),
        config.lifecycle,
        config.store.operation_timeout(),
    ));
    info!(today = %engine.today(), "Lifecycle engine ready");

    // 5. Notifications.
    let mut state = AppState::new(Arc::clone(&engine)).with_report_config(config.report.clone());
    if let Some(notifications) = build_notifications(&config.notifier)? {
        state = state.with_notifications(notifications);
    }

    // 6. Sweep scheduler. Dropping the sender stops it.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = if config.sweeps.enabled {
        Some(tokio::spawn(scheduler::run(
            Arc::clone(&engine),
            config.sweeps,
            shutdown_rx,
        )))
    } else {
        info!("Sweeps disabled");
        None
    };

    // 7. Serve.
    let served = start_server(&config.server, Arc::new(state), shutdown_signal()).await;

    // 8. Shut down.
    drop(shutdown_tx);
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            warn!(error = %e, "sweep scheduler task failed");
        }
    }
    pool.close().await;
    served?;

    info!("territory-server shutdown complete");
    Ok(())
}

/// Load configuration from `TERRITORY_CONFIG` or `territory-config.yaml`.
///
/// A missing file means defaults plus environment overrides.
fn load_config() -> Result<ServiceConfig, ServiceError> {
    let path = std::env::var_os("TERRITORY_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        Ok(ServiceConfig::from_file(&path)?)
    } else {
        Ok(ServiceConfig::parse("")?)
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_notifications(config: &NotifierConfig) -> Result<Option<Notifications>, ServiceError> {
    let notifier: Arc<dyn Notifier> = match (config.kind, config.webhook_url.as_deref()) {
        (NotifierKind::Disabled, _) => {
            info!("Notifications disabled");
            return Ok(None);
        }
        (NotifierKind::Log, _) => Arc::new(LogNotifier),
        (NotifierKind::Webhook, Some(url)) => Arc::new(WebhookNotifier::new(url)?),
        (NotifierKind::Webhook, None) => {
            // Config validation rejects this combination.
            warn!("Webhook notifier without a URL, logging notifications instead");
            Arc::new(LogNotifier)
        }
    };
    let composer = MessageComposer::load(config.templates_dir.as_deref().map(Path::new))?;
    info!(kind = ?config.kind, "Notifications enabled");
    Ok(Some(Notifications::new(composer, notifier)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
