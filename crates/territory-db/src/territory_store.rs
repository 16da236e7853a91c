//! [`TerritoryStore`] over the `territories` table.
//!
//! The conditional update is a single `UPDATE ... SET revision = revision +
//! 1 ... WHERE id = $n AND revision = $m RETURNING` statement, so two
//! writers racing on the same territory are serialized by the row lock and
//! exactly one of them sees its guard hold.
//!
//! The bulk delete locks every addressed row before it checks for loans,
//! so an Assign either lands first and blocks the delete, or waits and then
//! finds its row gone.

use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use territory_core::ports::{
    DeleteOutcome, StoreError, TerritoryFilter, TerritoryPatch, TerritoryStore, TerritoryUpdate,
    UpdateOutcome,
};
use territory_types::{Territory, TerritoryId, TerritoryStatus};
use uuid::Uuid;

use crate::PgRepository;
use crate::error::{decode_error, store_error};
use crate::rows::{
    TERRITORY_COLUMNS, TerritoryRow, db_number, db_number_for_write, db_revision, decode_all,
};

#[async_trait]
impl TerritoryStore for PgRepository {
    async fn get(&self, number: u32) -> Result<Option<Territory>, StoreError> {
        let Some(number) = db_number(number) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, TerritoryRow>(&format!(
            "SELECT {TERRITORY_COLUMNS} FROM territories WHERE number = $1"
        ))
        .bind(number)
        .fetch_optional(self.pool())
        .await
        .map_err(store_error)?;
        row.map(TerritoryRow::into_domain).transpose()
    }

    async fn list(&self, filter: &TerritoryFilter) -> Result<Vec<Territory>, StoreError> {
        let rows = sqlx::query_as::<_, TerritoryRow>(&format!(
            "SELECT {TERRITORY_COLUMNS} FROM territories
              WHERE ($1::TEXT IS NULL OR status = $1)
                AND ($2::UUID IS NULL OR assigned_user = $2)
              ORDER BY number"
        ))
        .bind(filter.status.map(TerritoryStatus::as_db_str))
        .bind(filter.assigned_user.map(Uuid::from))
        .fetch_all(self.pool())
        .await
        .map_err(store_error)?;
        decode_all(rows, TerritoryRow::into_domain)
    }

    async fn create(&self, territory: Territory) -> Result<Territory, StoreError> {
        let row = sqlx::query_as::<_, TerritoryRow>(&format!(
            "INSERT INTO territories ({TERRITORY_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING {TERRITORY_COLUMNS}"
        ))
        .bind(territory.id.into_inner())
        .bind(db_number_for_write(territory.number)?)
        .bind(territory.status.as_db_str())
        .bind(territory.assigned_user.map(Uuid::from))
        .bind(territory.delivered_on)
        .bind(territory.due_date)
        .bind(territory.rest_until)
        .bind(&territory.comment)
        .bind(territory.is_special_campaign)
        .bind(&territory.document_url)
        .bind(db_revision(territory.revision)?)
        .bind(territory.created_at)
        .fetch_one(self.pool())
        .await
        .map_err(store_error)?;
        tracing::debug!(number = territory.number, "territory row inserted");
        row.into_domain()
    }

    async fn update(
        &self,
        id: TerritoryId,
        update: TerritoryUpdate,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut query = update_statement(id, &update)?;
        let row = query
            .build_query_as::<TerritoryRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(store_error)?;
        if let Some(row) = row {
            return Ok(UpdateOutcome::Applied(Box::new(row.into_domain()?)));
        }

        // Nothing matched: either the row is gone or the guard failed.
        let current = sqlx::query_as::<_, TerritoryRow>(&format!(
            "SELECT {TERRITORY_COLUMNS} FROM territories WHERE id = $1"
        ))
        .bind(id.into_inner())
        .fetch_optional(self.pool())
        .await
        .map_err(store_error)?;
        match current {
            None => Err(StoreError::NotFound {
                entity: "territory",
                key: id.to_string(),
            }),
            Some(row) => Ok(UpdateOutcome::Stale(Box::new(row.into_domain()?))),
        }
    }

    async fn delete(&self, id: TerritoryId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM territories WHERE id = $1")
            .bind(id.into_inner())
            .execute(self.pool())
            .await
            .map_err(store_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "territory",
                key: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_many(&self, ids: &[TerritoryId]) -> Result<DeleteOutcome, StoreError> {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.into_inner()).collect();
        let mut tx = self.pool().begin().await.map_err(store_error)?;

        let locked: Vec<(i32, String)> = sqlx::query_as(
            "SELECT number, status FROM territories
              WHERE id = ANY($1)
              ORDER BY number
                FOR UPDATE",
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(store_error)?;

        let mut on_loan = Vec::new();
        for (number, status) in locked {
            let status: TerritoryStatus =
                status.parse().map_err(|e| decode_error("territory", e))?;
            if status.is_on_loan() {
                on_loan.push(u32::try_from(number).map_err(|e| decode_error("territory", e))?);
            }
        }
        if !on_loan.is_empty() {
            tx.rollback().await.map_err(store_error)?;
            return Ok(DeleteOutcome::OnLoan(on_loan));
        }

        let result = sqlx::query("DELETE FROM territories WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        tx.commit().await.map_err(store_error)?;
        Ok(DeleteOutcome::Deleted(result.rows_affected()))
    }
}

/// Build the guarded `UPDATE` for a patch. Every statement bumps the
/// revision, so an empty patch still fences the row.
fn update_statement(
    id: TerritoryId,
    update: &TerritoryUpdate,
) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let TerritoryPatch {
        status,
        assigned_user,
        delivered_on,
        due_date,
        rest_until,
        comment,
        is_special_campaign,
        document_url,
    } = update.patch.clone();

    let mut query = QueryBuilder::<Postgres>::new("UPDATE territories SET ");
    {
        let mut set = query.separated(", ");
        set.push("revision = revision + 1");
        if let Some(status) = status {
            set.push("status = ");
            set.push_bind_unseparated(status.as_db_str());
        }
        if let Some(user) = assigned_user {
            set.push("assigned_user = ");
            set.push_bind_unseparated(user.map(Uuid::from));
        }
        if let Some(date) = delivered_on {
            set.push("delivered_on = ");
            set.push_bind_unseparated(date);
        }
        if let Some(date) = due_date {
            set.push("due_date = ");
            set.push_bind_unseparated(date);
        }
        if let Some(date) = rest_until {
            set.push("rest_until = ");
            set.push_bind_unseparated(date);
        }
        if let Some(comment) = comment {
            set.push("comment = ");
            set.push_bind_unseparated(comment);
        }
        if let Some(special) = is_special_campaign {
            set.push("is_special_campaign = ");
            set.push_bind_unseparated(special);
        }
        if let Some(url) = document_url {
            set.push("document_url = ");
            set.push_bind_unseparated(url);
        }
    }
    query.push(" WHERE id = ");
    query.push_bind(id.into_inner());
    if let Some(expected) = update.expected_revision {
        query.push(" AND revision = ");
        query.push_bind(db_revision(expected)?);
    }
    query.push(" RETURNING ");
    query.push(TERRITORY_COLUMNS);
    Ok(query)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn guarded_update_checks_revision() {
        let mut read = Territory::new(4);
        read.revision = 7;
        let patch = TerritoryPatch {
            status: Some(TerritoryStatus::Expired),
            ..TerritoryPatch::default()
        };
        let update = TerritoryUpdate::guarded(&read, patch);
        let sql = update_statement(read.id, &update).unwrap().into_sql();
        assert_eq!(
            sql,
            format!(
                "UPDATE territories SET revision = revision + 1, status = $1 WHERE id = $2 AND revision = $3 RETURNING {TERRITORY_COLUMNS}"
            )
        );
    }

    #[test]
    fn empty_patch_only_bumps_the_revision() {
        let update = TerritoryUpdate::at_revision(2, TerritoryPatch::default());
        let sql = update_statement(TerritoryId::new(), &update).unwrap().into_sql();
        assert_eq!(
            sql,
            format!(
                "UPDATE territories SET revision = revision + 1 WHERE id = $1 AND revision = $2 RETURNING {TERRITORY_COLUMNS}"
            )
        );
    }

    #[test]
    fn unguarded_update_only_sets_patched_fields() {
        let patch = TerritoryPatch {
            comment: Some(None),
            document_url: Some(Some("https://maps.example/7".to_owned())),
            ..TerritoryPatch::default()
        };
        let update = TerritoryUpdate::unguarded(patch);
        let sql = update_statement(TerritoryId::new(), &update).unwrap().into_sql();
        assert_eq!(
            sql,
            format!(
                "UPDATE territories SET revision = revision + 1, comment = $1, document_url = $2 WHERE id = $3 RETURNING {TERRITORY_COLUMNS}"
            )
        );
    }

    #[test]
    fn revision_beyond_the_column_is_rejected() {
        let update = TerritoryUpdate::at_revision(u64::MAX, TerritoryPatch::default());
        assert!(update_statement(TerritoryId::new(), &update).is_err());
    }
}
