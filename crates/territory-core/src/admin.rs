//! Territory and user maintenance.
//!
//! These operations never touch lifecycle fields. Metadata edits use an
//! unguarded update because they only write `document_url` or `comment`.

use territory_types::{Territory, User, UserId};
use tracing::info;

use crate::engine::LifecycleEngine;
use crate::error::LifecycleError;
use crate::ports::{
    DeleteOutcome, StoreError, TerritoryFilter, TerritoryPatch, TerritoryStore, TerritoryUpdate,
    UpdateOutcome, UserDirectory, UserPatch,
};

/// Input to [`LifecycleEngine::create_territory`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTerritory {
    /// Human-facing number, positive and unique.
    pub number: u32,
    /// Link to the stored map document.
    pub document_url: Option<String>,
    /// Initial note.
    pub comment: Option<String>,
}

impl LifecycleEngine {
    /// Register a territory. It starts `available`.
    pub async fn create_territory(&self, new: NewTerritory) -> Result<Territory, LifecycleError> {
        let number = new.number;
        if number == 0 {
            return Err(LifecycleError::validation("territory number must be positive"));
        }
        if self.call("territory get", self.repo().get(number)).await?.is_some() {
            return Err(LifecycleError::DuplicateTerritory { number });
        }

        let mut territory = Territory::new(number);
        territory.document_url = new.document_url.filter(|u| !u.trim().is_empty());
        territory.comment = new.comment.filter(|c| !c.trim().is_empty());

        // The store enforces uniqueness too; a concurrent create lands here.
        let created = match self
            .call_raw("territory create", self.repo().create(territory))
            .await?
        {
            Ok(created) => created,
            Err(StoreError::Conflict { .. }) => {
                return Err(LifecycleError::DuplicateTerritory { number });
            }
            Err(source) => {
                return Err(LifecycleError::Store {
                    operation: "territory create",
                    source,
                });
            }
        };
        info!(number, "territory created");
        Ok(created)
    }

    /// Replace or clear the document link.
    pub async fn set_document(
        &self,
        number: u32,
        document_url: Option<String>,
    ) -> Result<Territory, LifecycleError> {
        let patch = TerritoryPatch {
            document_url: Some(document_url.filter(|u| !u.trim().is_empty())),
            ..TerritoryPatch::default()
        };
        self.edit_metadata(number, patch).await
    }

    /// Replace or clear the territory comment.
    pub async fn annotate(
        &self,
        number: u32,
        comment: Option<String>,
    ) -> Result<Territory, LifecycleError> {
        let patch = TerritoryPatch {
            comment: Some(comment.filter(|c| !c.trim().is_empty())),
            ..TerritoryPatch::default()
        };
        self.edit_metadata(number, patch).await
    }

    async fn edit_metadata(
        &self,
        number: u32,
        patch: TerritoryPatch,
    ) -> Result<Territory, LifecycleError> {
        let territory = self.load(number).await?;
        match self
            .call(
                "territory edit",
                self.repo()
                    .update(territory.id, TerritoryUpdate::unguarded(patch)),
            )
            .await?
        {
            UpdateOutcome::Applied(row) => Ok(*row),
            // Unguarded updates cannot go stale.
            UpdateOutcome::Stale(_) => Err(LifecycleError::ConcurrentUpdate { number }),
        }
    }

    /// Delete territories by number.
    ///
    /// Every number is checked first; nothing is deleted when one is
    /// missing or on loan. The store repeats the loan check atomically with
    /// the delete, so an Assign that lands after the first check still
    /// blocks it.
    pub async fn delete_territories(&self, numbers: &[u32]) -> Result<u64, LifecycleError> {
        let mut ids = Vec::with_capacity(numbers.len());
        for &number in numbers {
            let territory = self.load(number).await?;
            if territory.status.is_on_loan() {
                return Err(LifecycleError::TerritoryOnLoan { number });
            }
            ids.push(territory.id);
        }
        match self
            .call("territory delete", self.repo().delete_many(&ids))
            .await?
        {
            DeleteOutcome::Deleted(deleted) => {
                info!(deleted, ?numbers, "territories deleted");
                Ok(deleted)
            }
            DeleteOutcome::OnLoan(held) => {
                let number = held.first().copied().unwrap_or_default();
                info!(?held, "delete refused, territories went on loan");
                Err(LifecycleError::TerritoryOnLoan { number })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    /// Register a new active user.
    pub async fn register_user(
        &self,
        name: &str,
        phone: Option<String>,
    ) -> Result<User, LifecycleError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LifecycleError::validation("user name must not be empty"));
        }
        let phone = phone.map(|p| p.trim().to_owned()).filter(|p| !p.is_empty());
        let user = self
            .call("user create", self.repo().create_user(User::new(name, phone)))
            .await?;
        info!(user = %user.id, "user registered");
        Ok(user)
    }

    /// Rename, change the phone of, or (de)activate a user.
    pub async fn update_user(&self, id: UserId, patch: UserPatch) -> Result<User, LifecycleError> {
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(LifecycleError::validation("user name must not be empty"));
        }
        match self
            .call_raw("user update", self.repo().update_user(id, patch))
            .await?
        {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound { .. }) => Err(LifecycleError::UserNotFound { user: id }),
            Err(source) => Err(LifecycleError::Store {
                operation: "user update",
                source,
            }),
        }
    }

    /// Delete users. Rejected while any of them holds a territory.
    ///
    /// The store refuses the delete on its own when a territory was assigned
    /// to one of them after the check here; that is reported the same way.
    pub async fn delete_users(&self, ids: &[UserId]) -> Result<u64, LifecycleError> {
        if let Some(in_use) = self.holder_among(ids).await? {
            return Err(in_use);
        }
        match self
            .call_raw("user delete", self.repo().delete_users(ids))
            .await?
        {
            Ok(deleted) => {
                info!(deleted, "users deleted");
                Ok(deleted)
            }
            Err(StoreError::Conflict { message }) => match self.holder_among(ids).await? {
                Some(in_use) => Err(in_use),
                None => Err(LifecycleError::Store {
                    operation: "user delete",
                    source: StoreError::Conflict { message },
                }),
            },
            Err(source) => Err(LifecycleError::Store {
                operation: "user delete",
                source,
            }),
        }
    }

    async fn holder_among(&self, ids: &[UserId]) -> Result<Option<LifecycleError>, LifecycleError> {
        for &user in ids {
            let filter = TerritoryFilter {
                status: None,
                assigned_user: Some(user),
            };
            let held = self.call("territory list", self.repo().list(&filter)).await?;
            if let Some(territory) = held.first() {
                return Ok(Some(LifecycleError::UserInUse {
                    user,
                    number: territory.number,
                }));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::NaiveDate;

    use territory_types::TerritoryStatus;

    use super::*;
    use crate::clock::FixedClock;
    use crate::config::LifecycleConfig;
    use crate::engine::AssignRequest;
    use crate::memory::MemoryStore;

    fn engine() -> LifecycleEngine {
        LifecycleEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FixedClock::new(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())),
            LifecycleConfig::default(),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn numbers_are_unique_and_positive() {
        let engine = engine();
        let created = engine
            .create_territory(NewTerritory {
                number: 12,
                ..NewTerritory::default()
            })
            .await
            .unwrap();
        assert_eq!(created.status, TerritoryStatus::Available);

        let dup = engine
            .create_territory(NewTerritory {
                number: 12,
                ..NewTerritory::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(dup, LifecycleError::DuplicateTerritory { number: 12 }));

        let zero = engine.create_territory(NewTerritory::default()).await.unwrap_err();
        assert!(matches!(zero, LifecycleError::Validation { .. }));
    }

    #[tokio::test]
    async fn metadata_edits_leave_status_alone() {
        let engine = engine();
        engine
            .create_territory(NewTerritory {
                number: 4,
                ..NewTerritory::default()
            })
            .await
            .unwrap();
        let t = engine
            .set_document(4, Some("https://files.example/4.pdf".to_owned()))
            .await
            .unwrap();
        assert_eq!(t.document_url.as_deref(), Some("https://files.example/4.pdf"));
        let t = engine.annotate(4, Some("   ".to_owned())).await.unwrap();
        assert_eq!(t.comment, None);
        assert_eq!(t.status, TerritoryStatus::Available);
    }

    #[tokio::test]
    async fn on_loan_territory_and_its_user_cannot_be_deleted() {
        let engine = engine();
        engine
            .create_territory(NewTerritory {
                number: 7,
                ..NewTerritory::default()
            })
            .await
            .unwrap();
        let user = engine.register_user("Luis", None).await.unwrap();
        engine
            .assign(AssignRequest {
                number: 7,
                user: user.id,
                due_date: None,
                special: false,
                comment: None,
            })
            .await
            .unwrap();

        let err = engine.delete_territories(&[7]).await.unwrap_err();
        assert!(matches!(err, LifecycleError::TerritoryOnLoan { number: 7 }));
        let err = engine.delete_users(&[user.id]).await.unwrap_err();
        assert!(matches!(err, LifecycleError::UserInUse { number: 7, .. }));
    }

    #[tokio::test]
    async fn delete_of_missing_number_deletes_nothing() {
        let engine = engine();
        engine
            .create_territory(NewTerritory {
                number: 1,
                ..NewTerritory::default()
            })
            .await
            .unwrap();
        let err = engine.delete_territories(&[1, 2]).await.unwrap_err();
        assert!(matches!(err, LifecycleError::TerritoryNotFound { number: 2 }));
        assert_eq!(engine.delete_territories(&[1]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn blank_user_name_is_rejected() {
        let engine = engine();
        let err = engine.register_user("  ", None).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Validation { .. }));
    }
}
