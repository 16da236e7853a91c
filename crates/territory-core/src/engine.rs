//! The territory lifecycle engine.
//!
//! [`LifecycleEngine`] validates and executes Assign, Extend, and Return as
//! single logical operations over the store ports. Each operation reads the
//! territory, checks it against the lifecycle rules and the injected
//! [`Clock`], then writes the territory with a conditional update before it
//! touches the delivery log.
//!
//! Territory writes are guarded on the revision the operation read, so a
//! write that lands in between (a sweep, a second Extend) makes the later
//! writer fail with [`LifecycleError::ConcurrentUpdate`] instead of
//! overwriting it.
//!
//! Writes fail closed: when the delivery write fails after the territory
//! write succeeded, the engine puts the previous territory row back (guarded
//! on the revision it just wrote) and reports [`LifecycleError::PartialWrite`].
//! A territory write that times out may still land, so the engine settles
//! it before answering: it fences the row at the revision it read, or, when
//! the write did land, restores the previous row.
//!
//! Every store call is bounded by the configured operation timeout. The
//! engine does not retry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use territory_types::{
    CycleStatus, DeliveryId, DeliveryRecord, Territory, TerritoryState, TerritoryStatus, User,
    UserId,
};
use tracing::{error, info, warn};

use crate::calendar::{add_months, format_dmy};
use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::error::LifecycleError;
use crate::ports::{
    DeliveryLog, DeliveryPatch, Repository, StoreError, TerritoryPatch, TerritoryStore,
    TerritoryUpdate, UpdateOutcome, UserDirectory,
};

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// Input to [`LifecycleEngine::assign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignRequest {
    /// Territory to loan.
    pub number: u32,
    /// User receiving it.
    pub user: UserId,
    /// Due date; defaults to today plus the configured assignment window.
    pub due_date: Option<NaiveDate>,
    /// Exempt the loan from expiry sweeps.
    pub special: bool,
    /// Note stored on the territory and the new delivery record.
    pub comment: Option<String>,
}

/// Input to [`LifecycleEngine::return_territory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnRequest {
    /// Territory being handed back.
    pub number: u32,
    /// Day it came back; not after today.
    pub returned_on: NaiveDate,
    /// Note stored on the closed delivery record.
    pub comment: Option<String>,
}

/// Result of a successful Assign, enough to compose the notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    /// Territory after the write.
    pub territory: Territory,
    /// The newly opened delivery record.
    pub record: DeliveryRecord,
    /// The receiving user.
    pub user: User,
}

/// Result of a successful Extend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extension {
    /// Territory after the write.
    pub territory: Territory,
    /// The open record, now `extendido`.
    pub record: DeliveryRecord,
    /// Due date before the extension.
    pub previous_due_date: NaiveDate,
}

/// Result of a successful Return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Returned {
    /// Territory after the write, now cooling down.
    pub territory: Territory,
    /// The closed delivery record.
    pub record: DeliveryRecord,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Executes lifecycle operations against a [`Repository`].
pub struct LifecycleEngine {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    lifecycle: LifecycleConfig,
    store_timeout: Duration,
}

impl core::fmt::Debug for LifecycleEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LifecycleEngine")
            .field("lifecycle", &self.lifecycle)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl LifecycleEngine {
    /// Create an engine over `repo`, reading dates from `clock`.
    pub fn new(
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        lifecycle: LifecycleConfig,
        store_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            clock,
            lifecycle,
            store_timeout,
        }
    }

    /// The current date according to the injected clock.
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Lifecycle windows in effect.
    pub const fn lifecycle(&self) -> &LifecycleConfig {
        &self.lifecycle
    }

    /// The underlying repository, for read-only consumers such as reports.
    pub fn repository(&self) -> Arc<dyn Repository> {
        Arc::clone(&self.repo)
    }

    pub(crate) fn repo(&self) -> &dyn Repository {
        self.repo.as_ref()
    }

    /// Run one store call under the operation timeout.
    pub(crate) async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, LifecycleError> {
        self.call_raw(operation, fut)
            .await?
            .map_err(|source| LifecycleError::Store { operation, source })
    }

    /// Like [`Self::call`], but hands the store error back untouched so the
    /// caller can map specific causes.
    pub(crate) async fn call_raw<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<Result<T, StoreError>, LifecycleError> {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => Ok(result),
            Err(_elapsed) => {
                warn!(operation, timeout_ms = self.store_timeout.as_millis(), "store call timed out");
                Err(LifecycleError::StoreTimeout {
                    operation,
                    after: self.store_timeout,
                })
            }
        }
    }

    /// Load a territory or fail with [`LifecycleError::TerritoryNotFound`].
    pub(crate) async fn load(&self, number: u32) -> Result<Territory, LifecycleError> {
        self.call("territory get", self.repo.get(number))
            .await?
            .ok_or(LifecycleError::TerritoryNotFound { number })
    }

    /// Write `patch` over `previous`, guarded on the revision read.
    ///
    /// A timeout is settled before it is reported; see [`Self::settle_timeout`].
    pub(crate) async fn update_guarded(
        &self,
        operation: &'static str,
        previous: &Territory,
        patch: TerritoryPatch,
    ) -> Result<UpdateOutcome, LifecycleError> {
        let update = TerritoryUpdate::guarded(previous, patch.clone());
        match self
            .call_raw(operation, self.repo.update(previous.id, update))
            .await
        {
            Ok(result) => result.map_err(|source| LifecycleError::Store { operation, source }),
            Err(timeout) => Err(self.settle_timeout(operation, previous, &patch, timeout).await),
        }
    }

    /// Decide what a timed-out territory write left behind.
    ///
    /// An empty write at the revision read fences the row: if it applies,
    /// the late write can no longer match its guard and nothing changed. If
    /// the row already holds exactly the late write, it is restored.
    async fn settle_timeout(
        &self,
        operation: &'static str,
        previous: &Territory,
        patch: &TerritoryPatch,
        cause: LifecycleError,
    ) -> LifecycleError {
        let number = previous.number;
        let fence = TerritoryUpdate::guarded(previous, TerritoryPatch::default());
        match self
            .call("territory fence", self.repo.update(previous.id, fence))
            .await
        {
            Ok(UpdateOutcome::Applied(_)) => {
                warn!(number, operation, "territory write timed out and was fenced off");
                cause
            }
            Ok(UpdateOutcome::Stale(found)) if *found == landed(previous, patch) => {
                self.roll_back(operation, previous, &found, cause).await
            }
            Ok(UpdateOutcome::Stale(found)) => {
                error!(
                    number,
                    operation,
                    revision = found.revision,
                    "territory write timed out and the row moved on; state needs review"
                );
                LifecycleError::PartialWrite {
                    number,
                    operation,
                    rolled_back: false,
                    source: Box::new(cause),
                }
            }
            Err(fence_error) => {
                error!(
                    number,
                    operation,
                    error = %fence_error,
                    "territory write timed out and could not be fenced"
                );
                LifecycleError::PartialWrite {
                    number,
                    operation,
                    rolled_back: false,
                    source: Box::new(cause),
                }
            }
        }
    }

    async fn require_open_record(&self, number: u32) -> Result<DeliveryRecord, LifecycleError> {
        match self
            .call("delivery open record", self.repo.open_record(number))
            .await?
        {
            Some(record) => Ok(record),
            None => {
                error!(number, "territory on loan has no open delivery record");
                Err(LifecycleError::NoOpenDeliveryRecord { number })
            }
        }
    }

    /// Put `previous` back over the row this operation `written`.
    async fn roll_back(
        &self,
        operation: &'static str,
        previous: &Territory,
        written: &Territory,
        cause: LifecycleError,
    ) -> LifecycleError {
        let number = previous.number;
        let restore = TerritoryUpdate::guarded(written, TerritoryPatch::restore(previous));
        let restored = self
            .call("territory rollback", self.repo.update(previous.id, restore))
            .await;
        let rolled_back = matches!(restored, Ok(UpdateOutcome::Applied(_)));
        if rolled_back {
            warn!(number, operation, error = %cause, "write failed, territory restored");
        } else {
            error!(
                number,
                operation,
                error = %cause,
                "write failed and territory could not be restored"
            );
        }
        LifecycleError::PartialWrite {
            number,
            operation,
            rolled_back,
            source: Box::new(cause),
        }
    }

    // -----------------------------------------------------------------------
    // Assign
    // -----------------------------------------------------------------------

    /// Loan an available territory to a user and open its delivery record.
    pub async fn assign(&self, request: AssignRequest) -> Result<Assignment, LifecycleError> {
        let today = self.today();
        let number = request.number;
        if let Some(due) = request.due_date
            && due < today
        {
            return Err(LifecycleError::validation(format!(
                "due date {due} is before today ({today})"
            )));
        }

        let territory = self.load(number).await?;
        match territory.state()? {
            TerritoryState::Available { rest_until } => {
                if let Some(rest) = rest_until
                    && rest > today
                {
                    return Err(LifecycleError::TerritoryNotAvailable {
                        number,
                        status: territory.status,
                        rest_until: Some(rest),
                    });
                }
            }
            TerritoryState::Cooldown { rest_until } => {
                return Err(LifecycleError::TerritoryNotAvailable {
                    number,
                    status: territory.status,
                    rest_until,
                });
            }
            TerritoryState::OnLoan(_) => {
                return Err(LifecycleError::TerritoryNotAvailable {
                    number,
                    status: territory.status,
                    rest_until: None,
                });
            }
        }

        let user = self
            .call("user get", self.repo.get_user(request.user))
            .await?
            .ok_or(LifecycleError::UserNotFound { user: request.user })?;
        if !user.active {
            return Err(LifecycleError::UserInactive { user: user.id });
        }

        let due_date = match request.due_date {
            Some(due) => due,
            None => add_months(today, self.lifecycle.default_assignment_months)?,
        };

        let patch = TerritoryPatch {
            status: Some(TerritoryStatus::Assigned),
            assigned_user: Some(Some(user.id)),
            delivered_on: Some(Some(today)),
            due_date: Some(Some(due_date)),
            rest_until: Some(None),
            comment: Some(request.comment.clone()),
            is_special_campaign: Some(request.special),
            document_url: None,
        };
        let updated = match self
            .update_guarded("territory assign", &territory, patch)
            .await?
        {
            UpdateOutcome::Applied(row) => *row,
            UpdateOutcome::Stale(found) if found.status != TerritoryStatus::Available => {
                return Err(LifecycleError::TerritoryNotAvailable {
                    number,
                    status: found.status,
                    rest_until: None,
                });
            }
            UpdateOutcome::Stale(_) => return Err(LifecycleError::ConcurrentUpdate { number }),
        };

        let record = DeliveryRecord {
            id: DeliveryId::new(),
            territory_number: number,
            user_id: user.id,
            delivered_on: today,
            due_date: Some(due_date),
            returned_on: None,
            cycle_status: CycleStatus::opening(request.special),
            comment: request.comment,
            created_at: Utc::now(),
        };
        let record = match self.call("delivery insert", self.repo.insert(record)).await {
            Ok(record) => record,
            Err(cause) => {
                return Err(self.roll_back("assign", &territory, &updated, cause).await);
            }
        };

        info!(
            number,
            user = %user.id,
            due_date = %due_date,
            special = request.special,
            "territory assigned"
        );
        Ok(Assignment {
            territory: updated,
            record,
            user,
        })
    }

    // -----------------------------------------------------------------------
    // Extend
    // -----------------------------------------------------------------------

    /// Push the due date of a loan back by `months` calendar months
    /// (default from configuration).
    ///
    /// An `expired` territory goes back to `assigned`.
    pub async fn extend(
        &self,
        number: u32,
        months: Option<u32>,
    ) -> Result<Extension, LifecycleError> {
        let months = months.unwrap_or(self.lifecycle.default_extension_months);
        if months == 0 {
            return Err(LifecycleError::validation("extension must be at least one month"));
        }

        let territory = self.load(number).await?;
        let TerritoryState::OnLoan(loan) = territory.state()? else {
            return Err(LifecycleError::TerritoryNotAssigned {
                number,
                status: territory.status,
            });
        };
        let Some(previous_due_date) = loan.due_date else {
            return Err(LifecycleError::validation(format!(
                "territory {number} has no due date to extend"
            )));
        };
        self.require_open_record(number).await?;

        let due_date = add_months(previous_due_date, months)?;
        let comment = append_note(
            territory.comment.as_deref(),
            &extension_note(months, due_date),
        );
        let patch = TerritoryPatch {
            status: Some(TerritoryStatus::Assigned),
            due_date: Some(Some(due_date)),
            comment: Some(Some(comment)),
            ..TerritoryPatch::default()
        };
        let updated = match self
            .update_guarded("territory extend", &territory, patch)
            .await?
        {
            UpdateOutcome::Applied(row) => *row,
            UpdateOutcome::Stale(found) => return Err(stale_loan(number, &found)),
        };

        let patch = DeliveryPatch {
            cycle_status: Some(CycleStatus::Extended),
            ..DeliveryPatch::default()
        };
        let record = match self
            .call("delivery extend", self.repo.update_open_record(number, patch))
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                return Err(self
                    .roll_back(
                        "extend",
                        &territory,
                        &updated,
                        LifecycleError::NoOpenDeliveryRecord { number },
                    )
                    .await);
            }
            Err(cause) => {
                return Err(self.roll_back("extend", &territory, &updated, cause).await);
            }
        };

        info!(
            number,
            months,
            from = %previous_due_date,
            to = %due_date,
            "territory loan extended"
        );
        Ok(Extension {
            territory: updated,
            record,
            previous_due_date,
        })
    }

    // -----------------------------------------------------------------------
    // Return
    // -----------------------------------------------------------------------

    /// Close a loan and start the cooldown.
    pub async fn return_territory(
        &self,
        request: ReturnRequest,
    ) -> Result<Returned, LifecycleError> {
        let today = self.today();
        let number = request.number;
        if request.returned_on > today {
            return Err(LifecycleError::FutureReturnDate {
                returned_on: request.returned_on,
                today,
            });
        }

        let territory = self.load(number).await?;
        let TerritoryState::OnLoan(loan) = territory.state()? else {
            return Err(LifecycleError::TerritoryNotAssigned {
                number,
                status: territory.status,
            });
        };
        if request.returned_on < loan.delivered_on {
            return Err(LifecycleError::ReturnBeforeDelivery {
                returned_on: request.returned_on,
                delivered_on: loan.delivered_on,
            });
        }
        self.require_open_record(number).await?;

        let rest_until = add_months(request.returned_on, self.lifecycle.cooldown_months)?;
        let patch = TerritoryPatch {
            status: Some(TerritoryStatus::Disabled),
            assigned_user: Some(None),
            delivered_on: Some(None),
            due_date: Some(None),
            rest_until: Some(Some(rest_until)),
            comment: Some(None),
            is_special_campaign: Some(false),
            document_url: None,
        };
        let updated = match self
            .update_guarded("territory return", &territory, patch)
            .await?
        {
            UpdateOutcome::Applied(row) => *row,
            UpdateOutcome::Stale(found) => return Err(stale_loan(number, &found)),
        };

        let patch = DeliveryPatch {
            returned_on: Some(request.returned_on),
            cycle_status: Some(CycleStatus::Returned),
            comment: request.comment,
        };
        let record = match self
            .call("delivery close", self.repo.update_open_record(number, patch))
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                return Err(self
                    .roll_back(
                        "return",
                        &territory,
                        &updated,
                        LifecycleError::NoOpenDeliveryRecord { number },
                    )
                    .await);
            }
            Err(cause) => {
                return Err(self.roll_back("return", &territory, &updated, cause).await);
            }
        };

        info!(
            number,
            user = %loan.user,
            returned_on = %request.returned_on,
            rest_until = %rest_until,
            "territory returned"
        );
        Ok(Returned {
            territory: updated,
            record,
        })
    }
}

/// The row a guarded write of `patch` over `previous` produces.
fn landed(previous: &Territory, patch: &TerritoryPatch) -> Territory {
    let mut row = previous.clone();
    patch.apply(&mut row);
    row.revision = previous.revision.saturating_add(1);
    row
}

/// Error for an Extend or Return whose guard failed.
fn stale_loan(number: u32, found: &Territory) -> LifecycleError {
    if found.status.is_on_loan() {
        LifecycleError::ConcurrentUpdate { number }
    } else {
        LifecycleError::TerritoryNotAssigned {
            number,
            status: found.status,
        }
    }
}

fn extension_note(months: u32, due_date: NaiveDate) -> String {
    let unit = if months == 1 { "mes" } else { "meses" };
    format!("Extensión +{months} {unit} hasta {}", format_dmy(due_date))
}

fn append_note(existing: Option<&str>, note: &str) -> String {
    match existing.map(str::trim).filter(|c| !c.is_empty()) {
        Some(current) => format!("{current}\n{note}"),
        None => note.to_owned(),
    }
}
