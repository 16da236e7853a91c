//! Read-only queries for dashboards, lists, and reports.

use std::collections::BTreeMap;

use serde::Serialize;
use territory_types::{CycleStatus, DeliveryRecord, Territory, TerritoryStatus, User, UserId};

use crate::engine::LifecycleEngine;
use crate::error::LifecycleError;
use crate::ports::{DeliveryLog, TerritoryFilter, TerritoryStore, UserDirectory};

/// Number of rows `due_soon` returns when the caller gives no limit.
pub const DEFAULT_DUE_SOON_LIMIT: usize = 5;

/// Territory counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    /// All territories.
    pub total: usize,
    /// `disponible`.
    pub available: usize,
    /// `en_uso`.
    pub assigned: usize,
    /// `caducado`.
    pub expired: usize,
    /// `inhabilitado`.
    pub disabled: usize,
    /// On loan under a special campaign.
    pub special_campaign: usize,
}

/// An on-loan territory approaching its due date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DueSoon {
    /// The territory.
    pub territory: Territory,
    /// Holder, when still registered.
    pub user: Option<User>,
}

impl LifecycleEngine {
    /// One territory by number.
    pub async fn territory(&self, number: u32) -> Result<Territory, LifecycleError> {
        self.load(number).await
    }

    /// Territories passing `filter`, ascending by number.
    pub async fn territories(
        &self,
        filter: &TerritoryFilter,
    ) -> Result<Vec<Territory>, LifecycleError> {
        self.call("territory list", self.repo().list(filter)).await
    }

    /// One user by id.
    pub async fn user(&self, id: UserId) -> Result<User, LifecycleError> {
        self.call("user get", self.repo().get_user(id))
            .await?
            .ok_or(LifecycleError::UserNotFound { user: id })
    }

    /// All users, ordered by name.
    pub async fn users(&self) -> Result<Vec<User>, LifecycleError> {
        self.call("user list", self.repo().list_users()).await
    }

    /// On-loan territories due after today, soonest first. Loans due today
    /// are at their deadline and are not listed.
    pub async fn due_soon(&self, limit: Option<usize>) -> Result<Vec<DueSoon>, LifecycleError> {
        let today = self.today();
        let limit = limit.unwrap_or(DEFAULT_DUE_SOON_LIMIT);
        let mut upcoming: Vec<Territory> = self
            .territories(&TerritoryFilter::default())
            .await?
            .into_iter()
            .filter(|t| t.status.is_on_loan() && t.due_date.is_some_and(|due| due > today))
            .collect();
        upcoming.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.number.cmp(&b.number)));
        upcoming.truncate(limit);

        let users = self.user_index().await?;
        Ok(upcoming
            .into_iter()
            .map(|territory| {
                let user = territory
                    .assigned_user
                    .and_then(|id| users.get(&id).cloned());
                DueSoon { territory, user }
            })
            .collect())
    }

    /// Counts per status.
    pub async fn status_summary(&self) -> Result<StatusSummary, LifecycleError> {
        let rows = self.territories(&TerritoryFilter::default()).await?;
        let mut summary = StatusSummary {
            total: rows.len(),
            ..StatusSummary::default()
        };
        for t in &rows {
            let slot = match t.status {
                TerritoryStatus::Available => &mut summary.available,
                TerritoryStatus::Assigned => &mut summary.assigned,
                TerritoryStatus::Expired => &mut summary.expired,
                TerritoryStatus::Disabled => &mut summary.disabled,
            };
            *slot = slot.saturating_add(1);
            if t.is_special_campaign && t.status.is_on_loan() {
                summary.special_campaign = summary.special_campaign.saturating_add(1);
            }
        }
        Ok(summary)
    }

    /// Delivery records, newest first, optionally for one territory.
    pub async fn history(
        &self,
        territory: Option<u32>,
    ) -> Result<Vec<DeliveryRecord>, LifecycleError> {
        match territory {
            Some(number) => {
                self.call("delivery list", self.repo().list_for_territory(number))
                    .await
            }
            None => self.call("delivery list", self.repo().list_all()).await,
        }
    }

    /// Closed cycles grouped by territory number, each group ordered by
    /// delivery date.
    pub async fn closed_cycles(
        &self,
    ) -> Result<BTreeMap<u32, Vec<DeliveryRecord>>, LifecycleError> {
        let records = self
            .call(
                "delivery list",
                self.repo().list_by_status(CycleStatus::Returned),
            )
            .await?;
        let mut grouped: BTreeMap<u32, Vec<DeliveryRecord>> = BTreeMap::new();
        for record in records {
            grouped
                .entry(record.territory_number)
                .or_default()
                .push(record);
        }
        for cycles in grouped.values_mut() {
            cycles.sort_by_key(|r| r.delivered_on);
        }
        Ok(grouped)
    }

    /// Users keyed by id, for resolving weak references.
    pub async fn user_index(&self) -> Result<BTreeMap<UserId, User>, LifecycleError> {
        Ok(self.users().await?.into_iter().map(|u| (u.id, u)).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::NaiveDate;

    use super::*;
    use crate::admin::NewTerritory;
    use crate::clock::FixedClock;
    use crate::config::LifecycleConfig;
    use crate::engine::{AssignRequest, ReturnRequest};
    use crate::memory::MemoryStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn seeded(clock: Arc<FixedClock>) -> (LifecycleEngine, User) {
        let engine = LifecycleEngine::new(
            Arc::new(MemoryStore::new()),
            clock,
            LifecycleConfig::default(),
            Duration::from_secs(1),
        );
        for number in 1..=4 {
            engine
                .create_territory(NewTerritory {
                    number,
                    ..NewTerritory::default()
                })
                .await
                .unwrap();
        }
        let user = engine.register_user("Pablo", None).await.unwrap();
        (engine, user)
    }

    fn assign(number: u32, user: UserId, due: NaiveDate) -> AssignRequest {
        AssignRequest {
            number,
            user,
            due_date: Some(due),
            special: number == 4,
            comment: None,
        }
    }

    #[tokio::test]
    async fn due_soon_orders_by_due_date() {
        let clock = Arc::new(FixedClock::new(date(2024, 5, 1)));
        let (engine, user) = seeded(clock).await;
        engine.assign(assign(1, user.id, date(2024, 7, 1))).await.unwrap();
        engine.assign(assign(2, user.id, date(2024, 6, 1))).await.unwrap();

        let due = engine.due_soon(None).await.unwrap();
        let numbers: Vec<u32> = due.iter().map(|d| d.territory.number).collect();
        assert_eq!(numbers, vec![2, 1]);
        assert_eq!(due.first().and_then(|d| d.user.as_ref()).map(|u| u.name.as_str()), Some("Pablo"));

        assert_eq!(engine.due_soon(Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn due_soon_skips_loans_due_today() {
        let clock = Arc::new(FixedClock::new(date(2024, 5, 1)));
        let (engine, user) = seeded(clock).await;
        engine.assign(assign(1, user.id, date(2024, 5, 1))).await.unwrap();
        engine.assign(assign(2, user.id, date(2024, 5, 2))).await.unwrap();

        let due = engine.due_soon(None).await.unwrap();
        let numbers: Vec<u32> = due.iter().map(|d| d.territory.number).collect();
        assert_eq!(numbers, vec![2]);
    }

    #[tokio::test]
    async fn summary_counts_each_status() {
        let clock = Arc::new(FixedClock::new(date(2024, 5, 1)));
        let (engine, user) = seeded(clock.clone()).await;
        engine.assign(assign(1, user.id, date(2024, 5, 10))).await.unwrap();
        engine.assign(assign(4, user.id, date(2024, 5, 10))).await.unwrap();
        engine
            .return_territory(ReturnRequest {
                number: 1,
                returned_on: date(2024, 5, 1),
                comment: None,
            })
            .await
            .unwrap();

        let summary = engine.status_summary().await.unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.available, 2);
        assert_eq!(summary.assigned, 1);
        assert_eq!(summary.disabled, 1);
        assert_eq!(summary.special_campaign, 1);
    }

    #[tokio::test]
    async fn closed_cycles_group_by_territory() {
        let clock = Arc::new(FixedClock::new(date(2024, 1, 10)));
        let (engine, user) = seeded(clock.clone()).await;
        engine.assign(assign(2, user.id, date(2024, 2, 10))).await.unwrap();
        clock.set(date(2024, 2, 1));
        engine
            .return_territory(ReturnRequest {
                number: 2,
                returned_on: date(2024, 2, 1),
                comment: Some("completo".to_owned()),
            })
            .await
            .unwrap();

        let grouped = engine.closed_cycles().await.unwrap();
        assert_eq!(grouped.len(), 1);
        let cycles = grouped.get(&2).unwrap();
        assert_eq!(cycles.first().map(|r| r.returned_on), Some(Some(date(2024, 2, 1))));

        assert_eq!(engine.history(Some(2)).await.unwrap().len(), 1);
        assert!(engine.history(Some(3)).await.unwrap().is_empty());
    }
}
