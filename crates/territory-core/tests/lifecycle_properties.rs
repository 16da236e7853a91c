//! Lifecycle properties exercised end to end over the in-memory store.
//!
//! Every test drives the public engine API with a [`FixedClock`] and checks
//! the loan invariant (on loan, assigned user, and open delivery record
//! always agree) after each step.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use territory_core::admin::NewTerritory;
use territory_core::clock::FixedClock;
use territory_core::config::LifecycleConfig;
use territory_core::memory::{FaultPoint, MemoryStore};
use territory_core::ports::{DeliveryLog, StoreError, TerritoryFilter, TerritoryStore, UserDirectory};
use territory_core::{AssignRequest, LifecycleEngine, LifecycleError, ReturnRequest};
use territory_types::{CycleStatus, TerritoryStatus, User, UserId};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

struct Harness {
    engine: LifecycleEngine,
    store: Arc<MemoryStore>,
    clock: Arc<FixedClock>,
}

impl Harness {
    async fn new(today: NaiveDate, numbers: &[u32]) -> Self {
        Self::with_timeout(today, numbers, Duration::from_secs(5)).await
    }

    async fn with_timeout(today: NaiveDate, numbers: &[u32], timeout: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(today));
        let engine = LifecycleEngine::new(
            store.clone(),
            clock.clone(),
            LifecycleConfig::default(),
            timeout,
        );
        for &number in numbers {
            engine
                .create_territory(NewTerritory {
                    number,
                    ..NewTerritory::default()
                })
                .await
                .unwrap();
        }
        Self {
            engine,
            store,
            clock,
        }
    }

    async fn user(&self, name: &str) -> User {
        self.engine.register_user(name, None).await.unwrap()
    }

    async fn assign(&self, number: u32, user: UserId) -> Result<(), LifecycleError> {
        self.engine
            .assign(AssignRequest {
                number,
                user,
                due_date: None,
                special: false,
                comment: None,
            })
            .await
            .map(|_| ())
    }

    /// on loan <=> assigned user <=> open delivery record, for every row.
    async fn assert_loan_invariant(&self) {
        let rows = self.store.list(&TerritoryFilter::default()).await.unwrap();
        for t in rows {
            let open = self.store.open_record(t.number).await.unwrap();
            assert_eq!(
                t.status.is_on_loan(),
                t.assigned_user.is_some(),
                "territory {} status/user disagree",
                t.number
            );
            assert_eq!(
                t.assigned_user.is_some(),
                open.is_some(),
                "territory {} user/open record disagree",
                t.number
            );
            if let Some(record) = open {
                assert_eq!(Some(record.user_id), t.assigned_user);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario and state machine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn territory_twelve_full_cycle() {
    let h = Harness::new(date(2024, 1, 10), &[12]).await;
    let user_a = h.user("Usuario A").await;

    let assigned = h
        .engine
        .assign(AssignRequest {
            number: 12,
            user: user_a.id,
            due_date: Some(date(2024, 4, 10)),
            special: false,
            comment: None,
        })
        .await
        .unwrap();
    assert_eq!(assigned.territory.status, TerritoryStatus::Assigned);
    assert_eq!(assigned.territory.due_date, Some(date(2024, 4, 10)));
    h.assert_loan_invariant().await;

    let extended = h.engine.extend(12, Some(1)).await.unwrap();
    assert_eq!(extended.territory.due_date, Some(date(2024, 5, 10)));
    h.assert_loan_invariant().await;

    h.clock.set(date(2024, 5, 15));
    let returned = h
        .engine
        .return_territory(ReturnRequest {
            number: 12,
            returned_on: date(2024, 5, 15),
            comment: None,
        })
        .await
        .unwrap();
    assert_eq!(returned.territory.status, TerritoryStatus::Disabled);
    assert_eq!(returned.territory.rest_until, Some(date(2024, 11, 15)));
    assert_eq!(returned.record.delivered_on, date(2024, 1, 10));
    assert_eq!(returned.record.returned_on, Some(date(2024, 5, 15)));
    assert_eq!(returned.record.cycle_status, CycleStatus::Returned);
    h.assert_loan_invariant().await;

    h.clock.set(date(2024, 11, 14));
    let report = h.engine.cooldown_release().await.unwrap();
    assert!(report.transitioned.is_empty());
    let t = h.engine.territory(12).await.unwrap();
    assert_eq!(t.status, TerritoryStatus::Disabled);

    h.clock.set(date(2024, 11, 15));
    let report = h.engine.cooldown_release().await.unwrap();
    assert_eq!(report.transitioned, vec![12]);
    let t = h.engine.territory(12).await.unwrap();
    assert_eq!(t.status, TerritoryStatus::Available);
    assert_eq!(t.rest_until, None);
    h.assert_loan_invariant().await;
}

#[tokio::test]
async fn assign_then_return_leaves_one_closed_record() {
    let h = Harness::new(date(2024, 3, 5), &[1]).await;
    let user = h.user("Ana").await;
    h.assign(1, user.id).await.unwrap();
    h.engine
        .return_territory(ReturnRequest {
            number: 1,
            returned_on: date(2024, 3, 5),
            comment: Some("sin novedad".to_owned()),
        })
        .await
        .unwrap();

    let t = h.engine.territory(1).await.unwrap();
    assert_eq!(t.status, TerritoryStatus::Disabled);
    assert_eq!(t.rest_until, Some(date(2024, 9, 5)));
    assert_eq!(t.assigned_user, None);
    assert_eq!(t.delivered_on, None);

    let records = h.engine.history(Some(1)).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = records.first().unwrap();
    assert_eq!(record.delivered_on, date(2024, 3, 5));
    assert_eq!(record.returned_on, Some(date(2024, 3, 5)));
    assert_eq!(record.comment.as_deref(), Some("sin novedad"));
    h.assert_loan_invariant().await;
}

#[tokio::test]
async fn cooldown_release_is_idempotent() {
    let h = Harness::new(date(2024, 1, 1), &[1, 2]).await;
    let user = h.user("Ana").await;
    h.assign(1, user.id).await.unwrap();
    h.engine
        .return_territory(ReturnRequest {
            number: 1,
            returned_on: date(2024, 1, 1),
            comment: None,
        })
        .await
        .unwrap();
    h.clock.set(date(2024, 8, 1));

    h.engine.cooldown_release().await.unwrap();
    let once = h.store.list(&TerritoryFilter::default()).await.unwrap();
    let second = h.engine.cooldown_release().await.unwrap();
    let twice = h.store.list(&TerritoryFilter::default()).await.unwrap();
    assert!(second.transitioned.is_empty());
    assert_eq!(once, twice);
}

#[tokio::test]
async fn extend_twice_is_cumulative_with_one_record() {
    let h = Harness::new(date(2024, 1, 10), &[3]).await;
    let user = h.user("Ana").await;
    h.assign(3, user.id).await.unwrap();

    h.engine.extend(3, Some(1)).await.unwrap();
    let second = h.engine.extend(3, Some(2)).await.unwrap();
    assert_eq!(second.territory.due_date, Some(date(2024, 7, 10)));

    let records = h.engine.history(Some(3)).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records.first().map(|r| r.cycle_status), Some(CycleStatus::Extended));
    assert_eq!(records.first().map(|r| r.delivered_on), Some(date(2024, 1, 10)));
    h.assert_loan_invariant().await;
}

#[tokio::test]
async fn extension_clamps_to_end_of_month() {
    let h = Harness::new(date(2024, 1, 2), &[8]).await;
    let user = h.user("Ana").await;
    h.engine
        .assign(AssignRequest {
            number: 8,
            user: user.id,
            due_date: Some(date(2024, 1, 31)),
            special: false,
            comment: None,
        })
        .await
        .unwrap();
    let ext = h.engine.extend(8, None).await.unwrap();
    assert_eq!(ext.territory.due_date, Some(date(2024, 2, 29)));
}

#[tokio::test]
async fn assign_rejected_while_on_loan_or_cooling() {
    let h = Harness::new(date(2024, 1, 10), &[1, 2, 3]).await;
    let first = h.user("Ana").await;
    let second = h.user("Bea").await;

    // assigned
    h.assign(1, first.id).await.unwrap();
    let err = h.assign(1, second.id).await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::TerritoryNotAvailable {
            status: TerritoryStatus::Assigned,
            ..
        }
    ));

    // expired
    h.assign(2, first.id).await.unwrap();
    h.clock.set(date(2024, 5, 1));
    h.engine.expire_sweep().await.unwrap();
    let err = h.assign(2, second.id).await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::TerritoryNotAvailable {
            status: TerritoryStatus::Expired,
            ..
        }
    ));

    // disabled, rest_until in the future
    h.assign(3, first.id).await.unwrap();
    h.engine
        .return_territory(ReturnRequest {
            number: 3,
            returned_on: date(2024, 5, 1),
            comment: None,
        })
        .await
        .unwrap();
    let err = h.assign(3, second.id).await.unwrap_err();
    assert_eq!(err.rule(), "cooldown_active");
    h.assert_loan_invariant().await;
}

#[tokio::test]
async fn special_campaign_is_exempt_from_expiry() {
    let h = Harness::new(date(2024, 1, 10), &[5]).await;
    let user = h.user("Ana").await;
    h.engine
        .assign(AssignRequest {
            number: 5,
            user: user.id,
            due_date: Some(date(2024, 2, 1)),
            special: true,
            comment: None,
        })
        .await
        .unwrap();
    h.clock.set(date(2024, 6, 1));

    let report = h.engine.expire_sweep().await.unwrap();
    assert!(report.transitioned.is_empty());
    let t = h.engine.territory(5).await.unwrap();
    assert_eq!(t.status, TerritoryStatus::Assigned);
    let open = h.store.open_record(5).await.unwrap().unwrap();
    assert_eq!(open.cycle_status, CycleStatus::Special);
}

#[tokio::test]
async fn expired_loan_can_be_extended_back_to_assigned() {
    let h = Harness::new(date(2024, 1, 10), &[6]).await;
    let user = h.user("Ana").await;
    h.assign(6, user.id).await.unwrap();
    h.clock.set(date(2024, 4, 11));
    h.engine.expire_sweep().await.unwrap();
    assert_eq!(
        h.engine.territory(6).await.unwrap().status,
        TerritoryStatus::Expired
    );

    let ext = h.engine.extend(6, None).await.unwrap();
    assert_eq!(ext.territory.status, TerritoryStatus::Assigned);
    assert_eq!(ext.territory.due_date, Some(date(2024, 5, 10)));
    h.assert_loan_invariant().await;
}

#[tokio::test]
async fn future_return_changes_nothing() {
    let h = Harness::new(date(2024, 1, 10), &[7]).await;
    let user = h.user("Ana").await;
    h.assign(7, user.id).await.unwrap();
    let before = h.engine.territory(7).await.unwrap();
    let records_before = h.engine.history(Some(7)).await.unwrap();

    let err = h
        .engine
        .return_territory(ReturnRequest {
            number: 7,
            returned_on: date(2024, 1, 11),
            comment: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::FutureReturnDate { .. }));
    assert_eq!(h.engine.territory(7).await.unwrap(), before);
    assert_eq!(h.engine.history(Some(7)).await.unwrap(), records_before);
}

#[tokio::test]
async fn extend_and_return_need_a_loan() {
    let h = Harness::new(date(2024, 1, 10), &[9]).await;
    let err = h.engine.extend(9, None).await.unwrap_err();
    assert!(matches!(err, LifecycleError::TerritoryNotAssigned { .. }));
    let err = h
        .engine
        .return_territory(ReturnRequest {
            number: 9,
            returned_on: date(2024, 1, 10),
            comment: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::TerritoryNotAssigned { .. }));
}

// ---------------------------------------------------------------------------
// Concurrency and failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_assigns_have_one_winner() {
    let h = Harness::new(date(2024, 1, 10), &[1]).await;
    let ana = h.user("Ana").await;
    let bea = h.user("Bea").await;

    let (a, b) = tokio::join!(h.assign(1, ana.id), h.assign(1, bea.id));
    let wins = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(wins, 1);
    let loser = a.err().or(b.err()).unwrap();
    assert!(matches!(loser, LifecycleError::TerritoryNotAvailable { .. }));

    assert_eq!(h.engine.history(Some(1)).await.unwrap().len(), 1);
    h.assert_loan_invariant().await;
}

#[tokio::test]
async fn failed_record_insert_rolls_the_assignment_back() {
    let h = Harness::new(date(2024, 1, 10), &[1]).await;
    let user = h.user("Ana").await;
    h.store
        .fail_next(
            FaultPoint::DeliveryInsert,
            StoreError::Unavailable {
                message: "connection reset".to_owned(),
            },
        )
        .await;

    let err = h.assign(1, user.id).await.unwrap_err();
    let LifecycleError::PartialWrite { rolled_back, .. } = err else {
        panic!("expected a partial write, got {err}");
    };
    assert!(rolled_back);
    let t = h.engine.territory(1).await.unwrap();
    assert_eq!(t.status, TerritoryStatus::Available);
    assert_eq!(t.assigned_user, None);
    assert!(h.engine.history(Some(1)).await.unwrap().is_empty());
    h.assert_loan_invariant().await;

    // The territory is usable again.
    h.assign(1, user.id).await.unwrap();
}

#[tokio::test]
async fn failed_record_close_keeps_the_loan() {
    let h = Harness::new(date(2024, 1, 10), &[2]).await;
    let user = h.user("Ana").await;
    h.assign(2, user.id).await.unwrap();
    h.store
        .fail_next(
            FaultPoint::DeliveryUpdate,
            StoreError::Backend {
                message: "disk full".to_owned(),
            },
        )
        .await;

    let err = h
        .engine
        .return_territory(ReturnRequest {
            number: 2,
            returned_on: date(2024, 1, 10),
            comment: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.rule(), "partial_write");
    let t = h.engine.territory(2).await.unwrap();
    assert_eq!(t.status, TerritoryStatus::Assigned);
    assert_eq!(t.assigned_user, Some(user.id));
    h.assert_loan_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_store_times_out() {
    let h = Harness::with_timeout(date(2024, 1, 10), &[1], Duration::from_millis(200)).await;
    let user = h.user("Ana").await;
    h.store
        .stall_next(FaultPoint::TerritoryGet, Duration::from_secs(10))
        .await;

    let err = h.assign(1, user.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::StoreTimeout { .. }));
    assert_eq!(err.rule(), "store_timeout");
    h.assert_loan_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_record_insert_is_rolled_back() {
    let h = Harness::with_timeout(date(2024, 1, 10), &[1], Duration::from_millis(200)).await;
    let user = h.user("Ana").await;
    h.store
        .stall_next(FaultPoint::DeliveryInsert, Duration::from_secs(10))
        .await;

    let err = h.assign(1, user.id).await.unwrap_err();
    let LifecycleError::PartialWrite {
        rolled_back,
        source,
        ..
    } = err
    else {
        panic!("expected a partial write");
    };
    assert!(rolled_back);
    assert!(matches!(*source, LifecycleError::StoreTimeout { .. }));
    h.assert_loan_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn sweep_racing_a_return_skips_the_territory() {
    let h = Harness::new(date(2024, 1, 10), &[4]).await;
    let user = h.user("Ana").await;
    h.assign(4, user.id).await.unwrap();
    h.clock.set(date(2024, 6, 1));

    // The sweep lists the overdue row, then stalls before its write.
    h.store
        .stall_next(FaultPoint::TerritoryUpdate, Duration::from_secs(1))
        .await;
    let (sweep, returned) = tokio::join!(
        h.engine.expire_sweep(),
        h.engine.return_territory(ReturnRequest {
            number: 4,
            returned_on: date(2024, 6, 1),
            comment: None,
        })
    );

    returned.unwrap();
    let sweep = sweep.unwrap();
    assert_eq!(sweep.skipped, vec![4]);
    assert!(sweep.transitioned.is_empty());
    assert_eq!(
        h.engine.territory(4).await.unwrap().status,
        TerritoryStatus::Disabled
    );
    h.assert_loan_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn sweep_racing_an_extension_keeps_the_new_due_date() {
    let h = Harness::new(date(2024, 1, 10), &[12]).await;
    let user = h.user("Ana").await;
    h.engine
        .assign(AssignRequest {
            number: 12,
            user: user.id,
            due_date: Some(date(2024, 2, 1)),
            special: false,
            comment: None,
        })
        .await
        .unwrap();
    h.clock.set(date(2024, 2, 5));

    // The sweep reads the overdue row, then stalls before its write while
    // the loan is extended.
    h.store
        .stall_next(FaultPoint::TerritoryUpdate, Duration::from_secs(1))
        .await;
    let (sweep, extended) = tokio::join!(h.engine.expire_sweep(), h.engine.extend(12, Some(2)));

    assert_eq!(extended.unwrap().territory.due_date, Some(date(2024, 4, 1)));
    let sweep = sweep.unwrap();
    assert_eq!(sweep.skipped, vec![12]);
    assert!(sweep.transitioned.is_empty());
    let t = h.engine.territory(12).await.unwrap();
    assert_eq!(t.status, TerritoryStatus::Assigned);
    assert_eq!(t.due_date, Some(date(2024, 4, 1)));
    h.assert_loan_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_extensions_never_lose_one() {
    let h = Harness::new(date(2024, 1, 10), &[12]).await;
    let user = h.user("Ana").await;
    h.engine
        .assign(AssignRequest {
            number: 12,
            user: user.id,
            due_date: Some(date(2024, 2, 1)),
            special: false,
            comment: None,
        })
        .await
        .unwrap();

    h.store
        .stall_next(FaultPoint::TerritoryUpdate, Duration::from_secs(1))
        .await;
    let (a, b) = tokio::join!(h.engine.extend(12, Some(1)), h.engine.extend(12, Some(1)));
    let wins = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(wins, 1);
    let loser = a.err().or(b.err()).unwrap();
    assert!(matches!(loser, LifecycleError::ConcurrentUpdate { number: 12 }));
    assert_eq!(
        h.engine.territory(12).await.unwrap().due_date,
        Some(date(2024, 3, 1))
    );

    // Retrying after the race applies on top of the winner.
    let again = h.engine.extend(12, Some(1)).await.unwrap();
    assert_eq!(again.previous_due_date, date(2024, 3, 1));
    assert_eq!(again.territory.due_date, Some(date(2024, 4, 1)));
    h.assert_loan_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn delete_racing_an_assign_deletes_nothing() {
    let h = Harness::new(date(2024, 1, 10), &[12, 13]).await;
    let user = h.user("Ana").await;

    // Both numbers pass the loan check, then the delete stalls while 12 is
    // handed out.
    h.store
        .stall_next(FaultPoint::TerritoryDelete, Duration::from_secs(1))
        .await;
    let (deleted, assigned) = tokio::join!(
        h.engine.delete_territories(&[12, 13]),
        h.assign(12, user.id)
    );

    assigned.unwrap();
    let err = deleted.unwrap_err();
    assert!(matches!(err, LifecycleError::TerritoryOnLoan { number: 12 }));
    assert_eq!(
        h.engine.territory(12).await.unwrap().status,
        TerritoryStatus::Assigned
    );
    assert!(h.store.get(13).await.unwrap().is_some());
    assert!(h.store.open_record(12).await.unwrap().is_some());
    h.assert_loan_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn user_delete_racing_an_assign_keeps_the_user() {
    let h = Harness::new(date(2024, 1, 10), &[5]).await;
    let user = h.user("Ana").await;

    h.store
        .stall_next(FaultPoint::UserDelete, Duration::from_secs(1))
        .await;
    let ids = [user.id];
    let (deleted, assigned) = tokio::join!(h.engine.delete_users(&ids), h.assign(5, user.id));

    assigned.unwrap();
    let err = deleted.unwrap_err();
    assert!(matches!(err, LifecycleError::UserInUse { number: 5, .. }));
    assert!(h.store.get_user(user.id).await.unwrap().is_some());
    h.assert_loan_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn territory_write_that_lands_after_its_timeout_is_restored() {
    let h = Harness::with_timeout(date(2024, 1, 10), &[1], Duration::from_millis(200)).await;
    let user = h.user("Ana").await;
    h.store
        .stall_after_write(FaultPoint::TerritoryUpdate, Duration::from_secs(10))
        .await;

    let err = h.assign(1, user.id).await.unwrap_err();
    let LifecycleError::PartialWrite {
        rolled_back,
        source,
        ..
    } = err
    else {
        panic!("expected a partial write, got {err}");
    };
    assert!(rolled_back);
    assert!(matches!(*source, LifecycleError::StoreTimeout { .. }));
    let t = h.engine.territory(1).await.unwrap();
    assert_eq!(t.status, TerritoryStatus::Available);
    assert_eq!(t.assigned_user, None);
    assert!(h.engine.history(Some(1)).await.unwrap().is_empty());
    h.assert_loan_invariant().await;

    h.assign(1, user.id).await.unwrap();
    h.assert_loan_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn territory_write_that_never_landed_is_fenced() {
    let h = Harness::with_timeout(date(2024, 1, 10), &[1], Duration::from_millis(200)).await;
    let user = h.user("Ana").await;
    let before = h.engine.territory(1).await.unwrap();
    h.store
        .stall_next(FaultPoint::TerritoryUpdate, Duration::from_secs(10))
        .await;

    let err = h.assign(1, user.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::StoreTimeout { .. }));
    let t = h.engine.territory(1).await.unwrap();
    assert_eq!(t.status, TerritoryStatus::Available);
    assert!(t.revision > before.revision);
    h.assert_loan_invariant().await;
}
