//! In-process implementation of every store port.
//!
//! [`MemoryStore`] keeps territories, delivery records, and users behind a
//! single [`tokio::sync::RwLock`]. The conditional territory update checks
//! the expected revision and writes under the same write guard, which gives
//! the same serialization the `PostgreSQL` store gets from
//! `UPDATE ... WHERE revision = $n`.
//!
//! With the `test-support` feature the store can be told to fail or stall
//! the next call at a given [`FaultPoint`], which is how the partial-write
//! and timeout paths of the engine are exercised. A stall can sit before
//! the call touches state, or after a write has been applied.

use std::collections::BTreeMap;

use async_trait::async_trait;
use territory_types::{CycleStatus, DeliveryRecord, Territory, TerritoryId, User, UserId};
use tokio::sync::RwLock;

use crate::ports::{
    DeleteOutcome, DeliveryLog, DeliveryPatch, StoreError, TerritoryFilter, TerritoryStore,
    TerritoryUpdate, UpdateOutcome, UserDirectory, UserPatch,
};

/// Store call at which a fault can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// [`TerritoryStore::get`].
    TerritoryGet,
    /// [`TerritoryStore::list`].
    TerritoryList,
    /// [`TerritoryStore::update`].
    TerritoryUpdate,
    /// [`TerritoryStore::delete_many`].
    TerritoryDelete,
    /// [`DeliveryLog::insert`].
    DeliveryInsert,
    /// [`DeliveryLog::open_record`].
    DeliveryOpenRecord,
    /// [`DeliveryLog::update_open_record`].
    DeliveryUpdate,
    /// [`UserDirectory::get_user`].
    UserGet,
    /// [`UserDirectory::delete_users`].
    UserDelete,
}

#[cfg(any(test, feature = "test-support"))]
#[derive(Debug)]
enum Fault {
    Fail(StoreError),
    Stall(std::time::Duration),
    StallAfterWrite(std::time::Duration),
}

#[derive(Debug, Default)]
struct Tables {
    territories: BTreeMap<u32, Territory>,
    deliveries: Vec<DeliveryRecord>,
    users: BTreeMap<UserId, User>,
}

/// Territories, delivery log, and user directory held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    #[cfg(any(test, feature = "test-support"))]
    faults: tokio::sync::Mutex<Vec<(FaultPoint, Fault)>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call at `point` return `error` without touching state.
    #[cfg(any(test, feature = "test-support"))]
    pub async fn fail_next(&self, point: FaultPoint, error: StoreError) {
        self.faults.lock().await.push((point, Fault::Fail(error)));
    }

    /// Make the next call at `point` sleep for `duration` before running.
    #[cfg(any(test, feature = "test-support"))]
    pub async fn stall_next(&self, point: FaultPoint, duration: std::time::Duration) {
        self.faults.lock().await.push((point, Fault::Stall(duration)));
    }

    /// Make the next call at `point` apply its write, then sleep for
    /// `duration` before answering. Only writes honour it.
    #[cfg(any(test, feature = "test-support"))]
    pub async fn stall_after_write(&self, point: FaultPoint, duration: std::time::Duration) {
        self.faults
            .lock()
            .await
            .push((point, Fault::StallAfterWrite(duration)));
    }

    #[cfg(any(test, feature = "test-support"))]
    async fn take_fault(&self, point: FaultPoint, after_write: bool) -> Option<Fault> {
        let mut faults = self.faults.lock().await;
        faults
            .iter()
            .position(|(p, f)| *p == point && matches!(f, Fault::StallAfterWrite(_)) == after_write)
            .map(|index| faults.remove(index).1)
    }

    #[cfg(any(test, feature = "test-support"))]
    async fn inject(&self, point: FaultPoint) -> Result<(), StoreError> {
        match self.take_fault(point, false).await {
            Some(Fault::Fail(error)) => Err(error),
            Some(Fault::Stall(duration) | Fault::StallAfterWrite(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    #[cfg(any(test, feature = "test-support"))]
    async fn inject_after_write(&self, point: FaultPoint) {
        if let Some(Fault::StallAfterWrite(duration)) = self.take_fault(point, true).await {
            tokio::time::sleep(duration).await;
        }
    }

    #[cfg(not(any(test, feature = "test-support")))]
    #[allow(clippy::unused_async)]
    async fn inject(&self, _point: FaultPoint) -> Result<(), StoreError> {
        Ok(())
    }

    #[cfg(not(any(test, feature = "test-support")))]
    #[allow(clippy::unused_async)]
    async fn inject_after_write(&self, _point: FaultPoint) {}
}

fn newest_first(records: &mut [DeliveryRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

// ---------------------------------------------------------------------------
// Territory store
// ---------------------------------------------------------------------------

#[async_trait]
impl TerritoryStore for MemoryStore {
    async fn get(&self, number: u32) -> Result<Option<Territory>, StoreError> {
        self.inject(FaultPoint::TerritoryGet).await?;
        Ok(self.tables.read().await.territories.get(&number).cloned())
    }

    async fn list(&self, filter: &TerritoryFilter) -> Result<Vec<Territory>, StoreError> {
        self.inject(FaultPoint::TerritoryList).await?;
        let tables = self.tables.read().await;
        Ok(tables
            .territories
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn create(&self, territory: Territory) -> Result<Territory, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.territories.contains_key(&territory.number) {
            return Err(StoreError::Conflict {
                message: format!("territory number {} already exists", territory.number),
            });
        }
        tables.territories.insert(territory.number, territory.clone());
        Ok(territory)
    }

    async fn update(
        &self,
        id: TerritoryId,
        update: TerritoryUpdate,
    ) -> Result<UpdateOutcome, StoreError> {
        self.inject(FaultPoint::TerritoryUpdate).await?;
        let applied = {
            let mut tables = self.tables.write().await;
            let row = tables
                .territories
                .values_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "territory",
                    key: id.to_string(),
                })?;

            if let Some(expected) = update.expected_revision
                && row.revision != expected
            {
                return Ok(UpdateOutcome::Stale(Box::new(row.clone())));
            }
            update.patch.apply(row);
            row.revision = row.revision.saturating_add(1);
            row.clone()
        };
        self.inject_after_write(FaultPoint::TerritoryUpdate).await;
        Ok(UpdateOutcome::Applied(Box::new(applied)))
    }

    async fn delete(&self, id: TerritoryId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.territories.len();
        tables.territories.retain(|_, t| t.id != id);
        if tables.territories.len() == before {
            return Err(StoreError::NotFound {
                entity: "territory",
                key: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_many(&self, ids: &[TerritoryId]) -> Result<DeleteOutcome, StoreError> {
        self.inject(FaultPoint::TerritoryDelete).await?;
        let mut tables = self.tables.write().await;
        let on_loan: Vec<u32> = tables
            .territories
            .values()
            .filter(|t| ids.contains(&t.id) && t.status.is_on_loan())
            .map(|t| t.number)
            .collect();
        if !on_loan.is_empty() {
            return Ok(DeleteOutcome::OnLoan(on_loan));
        }
        let before = tables.territories.len();
        tables.territories.retain(|_, t| !ids.contains(&t.id));
        let removed = before.saturating_sub(tables.territories.len());
        Ok(DeleteOutcome::Deleted(u64::try_from(removed).unwrap_or(u64::MAX)))
    }
}

// ---------------------------------------------------------------------------
// Delivery log
// ---------------------------------------------------------------------------

#[async_trait]
impl DeliveryLog for MemoryStore {
    async fn insert(&self, record: DeliveryRecord) -> Result<DeliveryRecord, StoreError> {
        self.inject(FaultPoint::DeliveryInsert).await?;
        let mut tables = self.tables.write().await;
        if record.is_open()
            && tables
                .deliveries
                .iter()
                .any(|r| r.territory_number == record.territory_number && r.is_open())
        {
            return Err(StoreError::Conflict {
                message: format!(
                    "territory {} already has an open delivery record",
                    record.territory_number
                ),
            });
        }
        tables.deliveries.push(record.clone());
        Ok(record)
    }

    async fn open_record(&self, number: u32) -> Result<Option<DeliveryRecord>, StoreError> {
        self.inject(FaultPoint::DeliveryOpenRecord).await?;
        let tables = self.tables.read().await;
        Ok(tables
            .deliveries
            .iter()
            .find(|r| r.territory_number == number && r.is_open())
            .cloned())
    }

    async fn update_open_record(
        &self,
        number: u32,
        patch: DeliveryPatch,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        self.inject(FaultPoint::DeliveryUpdate).await?;
        let mut tables = self.tables.write().await;
        Ok(tables
            .deliveries
            .iter_mut()
            .find(|r| r.territory_number == number && r.is_open())
            .map(|record| {
                patch.apply(record);
                record.clone()
            }))
    }

    async fn list_by_status(&self, status: CycleStatus) -> Result<Vec<DeliveryRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut records: Vec<DeliveryRecord> = tables
            .deliveries
            .iter()
            .filter(|r| r.cycle_status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.territory_number
                .cmp(&b.territory_number)
                .then(a.delivered_on.cmp(&b.delivered_on))
        });
        Ok(records)
    }

    async fn list_all(&self) -> Result<Vec<DeliveryRecord>, StoreError> {
        let mut records = self.tables.read().await.deliveries.clone();
        newest_first(&mut records);
        Ok(records)
    }

    async fn list_for_territory(&self, number: u32) -> Result<Vec<DeliveryRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut records: Vec<DeliveryRecord> = tables
            .deliveries
            .iter()
            .filter(|r| r.territory_number == number)
            .cloned()
            .collect();
        newest_first(&mut records);
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// User directory
// ---------------------------------------------------------------------------

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.inject(FaultPoint::UserGet).await?;
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let tables = self.tables.read().await;
        let mut users: Vec<User> = tables.users.values().cloned().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn create_user(&self, user: User) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.id) {
            return Err(StoreError::Conflict {
                message: format!("user {} already exists", user.id),
            });
        }
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, id: UserId, patch: UserPatch) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity: "user",
            key: id.to_string(),
        })?;
        patch.apply(user);
        Ok(user.clone())
    }

    async fn delete_users(&self, ids: &[UserId]) -> Result<u64, StoreError> {
        self.inject(FaultPoint::UserDelete).await?;
        let mut tables = self.tables.write().await;
        // Mirrors the foreign key from territories.assigned_user.
        if let Some(t) = tables
            .territories
            .values()
            .find(|t| t.assigned_user.is_some_and(|u| ids.contains(&u)))
        {
            return Err(StoreError::Conflict {
                message: format!("user is still assigned territory {}", t.number),
            });
        }
        let before = tables.users.len();
        tables.users.retain(|id, _| !ids.contains(id));
        let removed = before.saturating_sub(tables.users.len());
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }
}
