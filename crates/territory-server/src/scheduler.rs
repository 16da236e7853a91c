//! Periodic expiry and cooldown sweeps.
//!
//! The scheduler runs [`LifecycleEngine::run_sweeps`] on a fixed interval
//! until the shutdown channel fires or its sender is dropped. A failed run
//! is logged and retried at the next tick; sweeps are idempotent, so a run
//! cut short leaves nothing to repair.

use std::sync::Arc;

use territory_core::LifecycleEngine;
use territory_core::config::SweepConfig;
use territory_core::sweep::SweepReport;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Run sweeps every `config.interval()` until shutdown.
pub async fn run(
    engine: Arc<LifecycleEngine>,
    config: SweepConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    if !config.run_on_startup {
        // The first tick completes immediately.
        ticker.tick().await;
    }

    info!(
        interval_secs = config.interval_secs,
        run_on_startup = config.run_on_startup,
        "sweep scheduler started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => run_once(&engine).await,
            // Any change, or a dropped sender, means shut down.
            _ = shutdown.changed() => break,
        }
    }

    info!("sweep scheduler stopped");
}

/// One pass of both sweeps, logging the outcome.
pub async fn run_once(engine: &LifecycleEngine) {
    match engine.run_sweeps().await {
        Ok(reports) => reports.iter().for_each(log_report),
        Err(e) => warn!(error = %e, rule = e.rule(), "sweep run failed"),
    }
}

fn log_report(report: &SweepReport) {
    info!(
        kind = ?report.kind,
        examined = report.examined,
        transitioned = report.transitioned.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "sweep finished"
    );
}
