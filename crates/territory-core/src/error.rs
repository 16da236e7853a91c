//! Error type for lifecycle operations.
//!
//! Every engine operation returns [`LifecycleError`]. Callers branch on
//! [`LifecycleError::kind`] (for example to choose an HTTP status) and may
//! show [`LifecycleError::rule`], a stable code naming the rule that was
//! violated.

use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use territory_types::{InconsistentTerritory, TerritoryStatus, UserId};

use crate::calendar::CalendarError;
use crate::ports::StoreError;

/// Coarse classification of a [`LifecycleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input.
    Validation,
    /// The territory or user is not in a state that allows the operation.
    PreconditionFailed,
    /// The addressed territory or user does not exist.
    NotFound,
    /// A uniqueness or reference rule was violated.
    Conflict,
    /// Stored state contradicts the lifecycle invariants.
    ConsistencyFault,
    /// A store did not answer, or answered with an error.
    CollaboratorUnavailable,
}

/// Errors returned by lifecycle, administration, and query operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Input failed validation.
    #[error("invalid input: {reason}")]
    Validation {
        /// What is wrong.
        reason: String,
    },

    /// Assign on a territory that is on loan, cooling down, or whose
    /// `rest_until` has not been reached.
    #[error("territory {number} is not available ({status}{})", rest_suffix(.rest_until.as_ref()))]
    TerritoryNotAvailable {
        /// Territory number.
        number: u32,
        /// Status found.
        status: TerritoryStatus,
        /// Cooldown end, when the cooldown is the reason.
        rest_until: Option<NaiveDate>,
    },

    /// Extend or Return on a territory that is not on loan.
    #[error("territory {number} is not assigned (status {status})")]
    TerritoryNotAssigned {
        /// Territory number.
        number: u32,
        /// Status found.
        status: TerritoryStatus,
    },

    /// Another write reached the territory between this operation's read
    /// and its write. Nothing was changed; the caller may retry.
    #[error("territory {number} was changed by a concurrent operation")]
    ConcurrentUpdate {
        /// Territory number.
        number: u32,
    },

    /// Return dated after today.
    #[error("return date {returned_on} is after today ({today})")]
    FutureReturnDate {
        /// Requested return date.
        returned_on: NaiveDate,
        /// Clock date.
        today: NaiveDate,
    },

    /// Return dated before the loan began.
    #[error("return date {returned_on} is before the delivery date {delivered_on}")]
    ReturnBeforeDelivery {
        /// Requested return date.
        returned_on: NaiveDate,
        /// Start of the loan.
        delivered_on: NaiveDate,
    },

    /// Assign to a deactivated user.
    #[error("user {user} is inactive")]
    UserInactive {
        /// The user.
        user: UserId,
    },

    /// No territory with this number.
    #[error("territory {number} not found")]
    TerritoryNotFound {
        /// Requested number.
        number: u32,
    },

    /// No user with this id.
    #[error("user {user} not found")]
    UserNotFound {
        /// Requested id.
        user: UserId,
    },

    /// Create with a number already in use.
    #[error("territory {number} already exists")]
    DuplicateTerritory {
        /// Requested number.
        number: u32,
    },

    /// Delete of a territory that is on loan.
    #[error("territory {number} is on loan and cannot be deleted")]
    TerritoryOnLoan {
        /// Territory number.
        number: u32,
    },

    /// Delete of a user who still holds a territory.
    #[error("user {user} still holds territory {number}")]
    UserInUse {
        /// The user.
        user: UserId,
        /// One territory they hold.
        number: u32,
    },

    /// A territory on loan has no open delivery record.
    #[error("territory {number} is on loan but has no open delivery record")]
    NoOpenDeliveryRecord {
        /// Territory number.
        number: u32,
    },

    /// A territory row contradicts its status.
    #[error(transparent)]
    InconsistentTerritory(#[from] InconsistentTerritory),

    /// A store call failed.
    #[error("{operation} failed: {source}")]
    Store {
        /// The store call.
        operation: &'static str,
        /// The underlying store error.
        source: StoreError,
    },

    /// A store call did not complete in time.
    #[error("{operation} timed out after {} ms", .after.as_millis())]
    StoreTimeout {
        /// The store call.
        operation: &'static str,
        /// Configured bound.
        after: Duration,
    },

    /// The territory was written but the operation could not complete,
    /// either because the delivery write failed or because the territory
    /// write timed out after landing.
    #[error(
        "{operation} on territory {number} failed after the territory write \
         (rolled back: {rolled_back}): {source}"
    )]
    PartialWrite {
        /// Territory number.
        number: u32,
        /// Lifecycle operation.
        operation: &'static str,
        /// Whether the territory row was restored.
        rolled_back: bool,
        /// What made the delivery write fail.
        source: Box<Self>,
    },

    /// Calendar arithmetic left the representable range.
    #[error(transparent)]
    Calendar(#[from] CalendarError),
}

fn rest_suffix(rest_until: Option<&NaiveDate>) -> String {
    rest_until.map_or_else(String::new, |date| format!(", resting until {date}"))
}

impl LifecycleError {
    /// Classification for callers.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::FutureReturnDate { .. } => ErrorKind::Validation,
            Self::TerritoryNotAvailable { .. }
            | Self::TerritoryNotAssigned { .. }
            | Self::ConcurrentUpdate { .. }
            | Self::ReturnBeforeDelivery { .. }
            | Self::UserInactive { .. }
            | Self::TerritoryOnLoan { .. }
            | Self::UserInUse { .. } => ErrorKind::PreconditionFailed,
            Self::TerritoryNotFound { .. } | Self::UserNotFound { .. } => ErrorKind::NotFound,
            Self::DuplicateTerritory { .. } => ErrorKind::Conflict,
            Self::NoOpenDeliveryRecord { .. }
            | Self::InconsistentTerritory(_)
            | Self::PartialWrite { .. }
            | Self::Calendar(_) => ErrorKind::ConsistencyFault,
            Self::Store { source, .. } => match source {
                StoreError::Conflict { .. } => ErrorKind::Conflict,
                StoreError::NotFound { .. } => ErrorKind::NotFound,
                StoreError::Unavailable { .. } | StoreError::Backend { .. } => {
                    ErrorKind::CollaboratorUnavailable
                }
            },
            Self::StoreTimeout { .. } => ErrorKind::CollaboratorUnavailable,
        }
    }

    /// Stable code naming the violated rule.
    pub const fn rule(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "invalid_input",
            Self::TerritoryNotAvailable {
                rest_until: Some(_),
                ..
            } => "cooldown_active",
            Self::TerritoryNotAvailable { .. } => "territory_not_available",
            Self::TerritoryNotAssigned { .. } => "territory_not_assigned",
            Self::ConcurrentUpdate { .. } => "concurrent_update",
            Self::FutureReturnDate { .. } => "future_return_date",
            Self::ReturnBeforeDelivery { .. } => "return_before_delivery",
            Self::UserInactive { .. } => "user_inactive",
            Self::TerritoryNotFound { .. } => "territory_not_found",
            Self::UserNotFound { .. } => "user_not_found",
            Self::DuplicateTerritory { .. } => "duplicate_territory",
            Self::TerritoryOnLoan { .. } => "territory_on_loan",
            Self::UserInUse { .. } => "user_in_use",
            Self::NoOpenDeliveryRecord { .. } => "no_open_delivery_record",
            Self::InconsistentTerritory(_) => "inconsistent_territory",
            Self::Store { .. } => "store_error",
            Self::StoreTimeout { .. } => "store_timeout",
            Self::PartialWrite { .. } => "partial_write",
            Self::Calendar(_) => "date_out_of_range",
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }
}
