//! Core entity structs: territories, users, and delivery records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{CycleStatus, TerritoryStatus};
use crate::ids::{DeliveryId, TerritoryId, UserId};

// ---------------------------------------------------------------------------
// Territory
// ---------------------------------------------------------------------------

/// Current state of one numbered territory.
///
/// `assigned_user` is a weak reference: the territory stores only the id
/// and looks the user up through the directory when it needs a name or a
/// phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Territory {
    /// Opaque durable identifier.
    pub id: TerritoryId,
    /// Human-facing territory number, unique and positive.
    pub number: u32,
    /// Persisted lifecycle status.
    pub status: TerritoryStatus,
    /// User currently holding the territory.
    pub assigned_user: Option<UserId>,
    /// Date the current loan began.
    pub delivered_on: Option<NaiveDate>,
    /// Date by which the current loan must be returned.
    pub due_date: Option<NaiveDate>,
    /// Date before which the territory may not be reassigned.
    pub rest_until: Option<NaiveDate>,
    /// Latest free-text annotation.
    pub comment: Option<String>,
    /// Whether the current loan is exempt from expiry sweeps.
    pub is_special_campaign: bool,
    /// Link to the externally stored map document.
    pub document_url: Option<String>,
    /// Write counter. Every update bumps it; conditional writes compare it.
    pub revision: u64,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Territory {
    /// A fresh, never-assigned territory.
    pub fn new(number: u32) -> Self {
        Self {
            id: TerritoryId::new(),
            number,
            status: TerritoryStatus::Available,
            assigned_user: None,
            delivered_on: None,
            due_date: None,
            rest_until: None,
            comment: None,
            is_special_campaign: false,
            document_url: None,
            revision: 0,
            created_at: Utc::now(),
        }
    }

    /// Project the row into its lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns [`InconsistentTerritory`] when the loan fields disagree with
    /// the status (e.g. an `en_uso` row without a user).
    pub fn state(&self) -> Result<TerritoryState, InconsistentTerritory> {
        let fault = |reason: &'static str| InconsistentTerritory {
            number: self.number,
            status: self.status,
            reason,
        };

        match self.status {
            TerritoryStatus::Available => {
                if self.assigned_user.is_some() || self.delivered_on.is_some() {
                    return Err(fault("available territory still carries a loan"));
                }
                Ok(TerritoryState::Available {
                    rest_until: self.rest_until,
                })
            }
            TerritoryStatus::Assigned | TerritoryStatus::Expired => {
                match (self.assigned_user, self.delivered_on) {
                    (Some(user), Some(delivered_on)) => Ok(TerritoryState::OnLoan(Loan {
                        user,
                        delivered_on,
                        due_date: self.due_date,
                        special: self.is_special_campaign,
                        expired: self.status == TerritoryStatus::Expired,
                    })),
                    (None, None) => Err(fault("territory on loan has no assigned user")),
                    _ => Err(fault("assigned user and delivery date must be set together")),
                }
            }
            TerritoryStatus::Disabled => {
                if self.assigned_user.is_some() {
                    return Err(fault("cooling territory still has an assigned user"));
                }
                Ok(TerritoryState::Cooldown {
                    rest_until: self.rest_until,
                })
            }
        }
    }
}

/// Read-side projection of a territory row.
///
/// The persisted form keeps the special-campaign exemption as a flag next to
/// the status; this view folds it into the loan variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerritoryState {
    /// Not on loan. `rest_until` may still be in the future after a manual
    /// edit; assignment checks it.
    Available {
        /// Earliest reassignment date, if any.
        rest_until: Option<NaiveDate>,
    },
    /// Held by a user.
    OnLoan(Loan),
    /// Returned and waiting for the cooldown to elapse.
    Cooldown {
        /// Earliest reassignment date.
        rest_until: Option<NaiveDate>,
    },
}

/// An active loan as seen from the territory row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loan {
    /// Holder of the territory.
    pub user: UserId,
    /// Start of the loan.
    pub delivered_on: NaiveDate,
    /// Current due date.
    pub due_date: Option<NaiveDate>,
    /// Exempt from expiry sweeps.
    pub special: bool,
    /// Already flagged overdue by a sweep.
    pub expired: bool,
}

/// A territory row whose fields contradict its status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("territory {number} ({status}) is inconsistent: {reason}")]
pub struct InconsistentTerritory {
    /// Territory number.
    pub number: u32,
    /// Status found on the row.
    pub status: TerritoryStatus,
    /// Which pairing rule is broken.
    pub reason: &'static str,
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user who can hold territories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct User {
    /// Unique user identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Contact phone number, used only for notifications.
    pub phone: Option<String>,
    /// Inactive users cannot receive new assignments.
    pub active: bool,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A new active user.
    pub fn new(name: impl Into<String>, phone: Option<String>) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            phone,
            active: true,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery record
// ---------------------------------------------------------------------------

/// One assignment-to-return cycle of a territory.
///
/// Open while `returned_on` is `None`. A territory has at most one open
/// record at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DeliveryRecord {
    /// Unique record identifier.
    pub id: DeliveryId,
    /// Territory this cycle belongs to.
    pub territory_number: u32,
    /// User who held the territory.
    pub user_id: UserId,
    /// Start of the cycle.
    pub delivered_on: NaiveDate,
    /// Due date agreed at assignment.
    pub due_date: Option<NaiveDate>,
    /// End of the cycle; `None` while open.
    pub returned_on: Option<NaiveDate>,
    /// Cycle status.
    pub cycle_status: CycleStatus,
    /// Latest note on the cycle.
    pub comment: Option<String>,
    /// Insertion timestamp.
    pub created_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Whether the cycle is still open.
    pub const fn is_open(&self) -> bool {
        self.returned_on.is_none()
    }
}
