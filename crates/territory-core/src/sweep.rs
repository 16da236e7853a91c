//! Time-driven transitions: expiry and cooldown release.
//!
//! Both sweeps scan a status bucket in ascending territory number and move
//! each eligible row with an update guarded on the revision scanned. A row
//! that another writer touched since the scan (a Return, or an Extend that
//! pushed the due date out) is counted as skipped, not failed. A failure on one
//! territory is logged and the sweep carries on with the next, so a sweep
//! cut short leaves every territory in a valid state.
//!
//! Neither sweep touches the delivery log.

use serde::Serialize;
use territory_types::{Territory, TerritoryStatus};
use tracing::{debug, info, warn};

use crate::engine::LifecycleEngine;
use crate::error::LifecycleError;
use crate::ports::{TerritoryFilter, TerritoryPatch, TerritoryStore, UpdateOutcome};

/// Which sweep produced a [`SweepReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    /// `assigned` past due becomes `expired`.
    Expire,
    /// `disabled` past `rest_until` becomes `available`.
    CooldownRelease,
}

/// One territory a sweep could not move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    /// Territory number.
    pub number: u32,
    /// Rendered error.
    pub error: String,
}

/// Outcome of one sweep round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Which sweep ran.
    pub kind: SweepKind,
    /// Territories in the scanned status.
    pub examined: usize,
    /// Territories moved, ascending.
    pub transitioned: Vec<u32>,
    /// Territories another writer moved first.
    pub skipped: Vec<u32>,
    /// Territories that failed.
    pub failed: Vec<SweepFailure>,
}

impl SweepReport {
    const fn new(kind: SweepKind, examined: usize) -> Self {
        Self {
            kind,
            examined,
            transitioned: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl LifecycleEngine {
    /// Flag every overdue, non-special `assigned` territory as `expired`.
    ///
    /// The assignment is kept. Idempotent: expired rows are not rescanned.
    ///
    /// # Errors
    ///
    /// Fails only when the initial listing fails; per-territory errors are
    /// collected in the report.
    pub async fn expire_sweep(&self) -> Result<SweepReport, LifecycleError> {
        let today = self.today();
        let rows = self
            .call(
                "territory list",
                self.repo()
                    .list(&TerritoryFilter::status(TerritoryStatus::Assigned)),
            )
            .await?;
        let mut report = SweepReport::new(SweepKind::Expire, rows.len());

        for territory in rows {
            let overdue = territory.due_date.is_some_and(|due| due < today);
            if territory.is_special_campaign || !overdue {
                continue;
            }
            let patch = TerritoryPatch {
                status: Some(TerritoryStatus::Expired),
                ..TerritoryPatch::default()
            };
            self.sweep_one(&territory, patch, &mut report)
                .await;
        }

        info!(
            examined = report.examined,
            expired = report.transitioned.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            %today,
            "expire sweep finished"
        );
        Ok(report)
    }

    /// Make every `disabled` territory whose cooldown has elapsed
    /// `available` again and clear its `rest_until`.
    ///
    /// # Errors
    ///
    /// Fails only when the initial listing fails.
    pub async fn cooldown_release(&self) -> Result<SweepReport, LifecycleError> {
        let today = self.today();
        let rows = self
            .call(
                "territory list",
                self.repo()
                    .list(&TerritoryFilter::status(TerritoryStatus::Disabled)),
            )
            .await?;
        let mut report = SweepReport::new(SweepKind::CooldownRelease, rows.len());

        for territory in rows {
            // A cooling row without a date has nothing to wait for.
            let elapsed = territory.rest_until.is_none_or(|rest| rest <= today);
            if !elapsed {
                continue;
            }
            let patch = TerritoryPatch {
                status: Some(TerritoryStatus::Available),
                rest_until: Some(None),
                ..TerritoryPatch::default()
            };
            self.sweep_one(&territory, patch, &mut report)
                .await;
        }

        info!(
            examined = report.examined,
            released = report.transitioned.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            %today,
            "cooldown release finished"
        );
        Ok(report)
    }

    /// Run both sweeps, expiry first.
    pub async fn run_sweeps(&self) -> Result<[SweepReport; 2], LifecycleError> {
        let expired = self.expire_sweep().await?;
        let released = self.cooldown_release().await?;
        Ok([expired, released])
    }

    async fn sweep_one(
        &self,
        territory: &Territory,
        patch: TerritoryPatch,
        report: &mut SweepReport,
    ) {
        let number = territory.number;
        match self
            .update_guarded("territory sweep", territory, patch)
            .await
        {
            Ok(UpdateOutcome::Applied(_)) => {
                debug!(number, kind = ?report.kind, "territory transitioned");
                report.transitioned.push(number);
            }
            Ok(UpdateOutcome::Stale(found)) => {
                debug!(
                    number,
                    status = %found.status,
                    revision = found.revision,
                    "territory moved by another writer, skipping"
                );
                report.skipped.push(number);
            }
            Err(e) => {
                warn!(number, error = %e, "sweep could not update territory");
                report.failed.push(SweepFailure {
                    number,
                    error: e.to_string(),
                });
            }
        }
    }
}
