//! Collaborator ports the lifecycle engine is written against.
//!
//! The engine never talks to a database directly. It reads and writes
//! through three narrow traits:
//!
//! - [`TerritoryStore`] -- current state per territory, with a conditional
//!   update that serializes competing writers on the row revision
//! - [`DeliveryLog`] -- append-mostly loan cycles, at most one open per
//!   territory
//! - [`UserDirectory`] -- lookup behind the weak `assigned_user` reference
//!
//! [`crate::memory::MemoryStore`] implements all three in process; the
//! `territory-db` crate implements them over `PostgreSQL`.

use async_trait::async_trait;
use chrono::NaiveDate;
use territory_types::{
    CycleStatus, DeliveryRecord, Territory, TerritoryId, TerritoryStatus, User, UserId,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by any store implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Backend-specific detail.
        message: String,
    },

    /// A uniqueness rule was violated (duplicate number, second open record,
    /// referenced row).
    #[error("store conflict: {message}")]
    Conflict {
        /// Which rule was hit.
        message: String,
    },

    /// The addressed row does not exist.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Kind of row.
        entity: &'static str,
        /// Lookup key as text.
        key: String,
    },

    /// Any other backend failure, including row decoding.
    #[error("store backend error: {message}")]
    Backend {
        /// Backend-specific detail.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Territory store
// ---------------------------------------------------------------------------

/// Selection for [`TerritoryStore::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerritoryFilter {
    /// Only territories in this status.
    pub status: Option<TerritoryStatus>,
    /// Only territories held by this user.
    pub assigned_user: Option<UserId>,
}

impl TerritoryFilter {
    /// Filter on a single status.
    pub const fn status(status: TerritoryStatus) -> Self {
        Self {
            status: Some(status),
            assigned_user: None,
        }
    }

    /// Whether `territory` passes the filter.
    pub fn matches(&self, territory: &Territory) -> bool {
        self.status.is_none_or(|s| s == territory.status)
            && self
                .assigned_user
                .is_none_or(|u| territory.assigned_user == Some(u))
    }
}

/// Field changes for a territory row.
///
/// `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(clippy::option_option)]
pub struct TerritoryPatch {
    /// New status.
    pub status: Option<TerritoryStatus>,
    /// New holder.
    pub assigned_user: Option<Option<UserId>>,
    /// New loan start.
    pub delivered_on: Option<Option<NaiveDate>>,
    /// New due date.
    pub due_date: Option<Option<NaiveDate>>,
    /// New cooldown end.
    pub rest_until: Option<Option<NaiveDate>>,
    /// New comment.
    pub comment: Option<Option<String>>,
    /// New special-campaign flag.
    pub is_special_campaign: Option<bool>,
    /// New document link.
    pub document_url: Option<Option<String>>,
}

impl TerritoryPatch {
    /// A patch that puts every mutable field back to `previous`.
    pub fn restore(previous: &Territory) -> Self {
        Self {
            status: Some(previous.status),
            assigned_user: Some(previous.assigned_user),
            delivered_on: Some(previous.delivered_on),
            due_date: Some(previous.due_date),
            rest_until: Some(previous.rest_until),
            comment: Some(previous.comment.clone()),
            is_special_campaign: Some(previous.is_special_campaign),
            document_url: Some(previous.document_url.clone()),
        }
    }

    /// Apply the patch to a row in place.
    pub fn apply(&self, territory: &mut Territory) {
        if let Some(status) = self.status {
            territory.status = status;
        }
        if let Some(user) = self.assigned_user {
            territory.assigned_user = user;
        }
        if let Some(date) = self.delivered_on {
            territory.delivered_on = date;
        }
        if let Some(date) = self.due_date {
            territory.due_date = date;
        }
        if let Some(date) = self.rest_until {
            territory.rest_until = date;
        }
        if let Some(comment) = &self.comment {
            territory.comment.clone_from(comment);
        }
        if let Some(special) = self.is_special_campaign {
            territory.is_special_campaign = special;
        }
        if let Some(url) = &self.document_url {
            territory.document_url.clone_from(url);
        }
    }
}

/// A conditional update: the patch applies only while the row is still at
/// the revision the caller read.
///
/// Every applied update bumps [`Territory::revision`], so any write that
/// lands between the caller's read and its update makes the guard fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerritoryUpdate {
    /// Revision the caller read. `None` applies unconditionally, which is
    /// only used for metadata edits that never touch lifecycle fields.
    pub expected_revision: Option<u64>,
    /// Changes to apply.
    pub patch: TerritoryPatch,
}

impl TerritoryUpdate {
    /// Update guarded on the revision of `read`.
    pub const fn guarded(read: &Territory, patch: TerritoryPatch) -> Self {
        Self {
            expected_revision: Some(read.revision),
            patch,
        }
    }

    /// Update guarded on an explicit revision.
    pub const fn at_revision(revision: u64, patch: TerritoryPatch) -> Self {
        Self {
            expected_revision: Some(revision),
            patch,
        }
    }

    /// Update with no guard.
    pub const fn unguarded(patch: TerritoryPatch) -> Self {
        Self {
            expected_revision: None,
            patch,
        }
    }
}

/// Result of a conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The guard held; the row after the write.
    Applied(Box<Territory>),
    /// Another writer moved the row first; the row as found.
    Stale(Box<Territory>),
}

/// Result of [`TerritoryStore::delete_many`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Every addressed row that existed was removed.
    Deleted(u64),
    /// Nothing was removed because these territories are on loan.
    OnLoan(Vec<u32>),
}

/// Durable current state of every territory.
#[async_trait]
pub trait TerritoryStore: Send + Sync {
    /// Look a territory up by its number.
    async fn get(&self, number: u32) -> Result<Option<Territory>, StoreError>;

    /// All territories passing `filter`, ordered by number ascending.
    async fn list(&self, filter: &TerritoryFilter) -> Result<Vec<Territory>, StoreError>;

    /// Insert a new row. Fails with [`StoreError::Conflict`] when the number
    /// is taken.
    async fn create(&self, territory: Territory) -> Result<Territory, StoreError>;

    /// Conditionally update a row. Fails with [`StoreError::NotFound`] when
    /// the row is gone.
    async fn update(
        &self,
        id: TerritoryId,
        update: TerritoryUpdate,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Remove a row.
    async fn delete(&self, id: TerritoryId) -> Result<(), StoreError>;

    /// Remove several rows in one step, unless one of them is on loan.
    ///
    /// The loan check and the delete are atomic: a territory assigned
    /// concurrently is either seen as on loan or fails its own update
    /// because the row is gone.
    async fn delete_many(&self, ids: &[TerritoryId]) -> Result<DeleteOutcome, StoreError>;
}

// ---------------------------------------------------------------------------
// Delivery log
// ---------------------------------------------------------------------------

/// Field changes for the open delivery record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryPatch {
    /// Close the cycle on this date.
    pub returned_on: Option<NaiveDate>,
    /// New cycle status.
    pub cycle_status: Option<CycleStatus>,
    /// New note.
    pub comment: Option<String>,
}

impl DeliveryPatch {
    /// Apply the patch to a record in place.
    pub fn apply(&self, record: &mut DeliveryRecord) {
        if let Some(date) = self.returned_on {
            record.returned_on = Some(date);
        }
        if let Some(status) = self.cycle_status {
            record.cycle_status = status;
        }
        if let Some(comment) = &self.comment {
            record.comment = Some(comment.clone());
        }
    }
}

/// Append-mostly log of loan cycles.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    /// Append a record. Fails with [`StoreError::Conflict`] when the record
    /// is open and its territory already has an open record.
    async fn insert(&self, record: DeliveryRecord) -> Result<DeliveryRecord, StoreError>;

    /// The open record of a territory, if any.
    async fn open_record(&self, number: u32) -> Result<Option<DeliveryRecord>, StoreError>;

    /// Update the open record of a territory. Returns `None` when there is
    /// no open record.
    async fn update_open_record(
        &self,
        number: u32,
        patch: DeliveryPatch,
    ) -> Result<Option<DeliveryRecord>, StoreError>;

    /// Records in the given cycle status, ordered by territory number then
    /// delivery date.
    async fn list_by_status(&self, status: CycleStatus) -> Result<Vec<DeliveryRecord>, StoreError>;

    /// Every record, newest first.
    async fn list_all(&self) -> Result<Vec<DeliveryRecord>, StoreError>;

    /// Records of one territory, newest first.
    async fn list_for_territory(&self, number: u32) -> Result<Vec<DeliveryRecord>, StoreError>;
}

// ---------------------------------------------------------------------------
// User directory
// ---------------------------------------------------------------------------

/// Field changes for a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(clippy::option_option)]
pub struct UserPatch {
    /// New display name.
    pub name: Option<String>,
    /// New phone number; `Some(None)` clears it.
    pub phone: Option<Option<String>>,
    /// New active flag.
    pub active: Option<bool>,
}

impl UserPatch {
    /// Apply the patch to a user in place.
    pub fn apply(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name.clone_from(name);
        }
        if let Some(phone) = &self.phone {
            user.phone.clone_from(phone);
        }
        if let Some(active) = self.active {
            user.active = active;
        }
    }
}

/// Registered users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look a user up.
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// All users ordered by name.
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Register a user.
    async fn create_user(&self, user: User) -> Result<User, StoreError>;

    /// Update a user. Fails with [`StoreError::NotFound`] for unknown ids.
    async fn update_user(&self, id: UserId, patch: UserPatch) -> Result<User, StoreError>;

    /// Remove users, returning how many were deleted.
    async fn delete_users(&self, ids: &[UserId]) -> Result<u64, StoreError>;
}

/// Everything the engine needs from persistence.
pub trait Repository: TerritoryStore + DeliveryLog + UserDirectory {}

impl<T> Repository for T where T: TerritoryStore + DeliveryLog + UserDirectory {}
