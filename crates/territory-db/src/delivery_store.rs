//! [`DeliveryLog`] over the `deliveries` table.
//!
//! The partial unique index `deliveries_one_open_idx` rejects a second open
//! record for a territory; the violation surfaces as
//! [`StoreError::Conflict`].

use async_trait::async_trait;
use territory_core::ports::{DeliveryLog, DeliveryPatch, StoreError};
use territory_types::{CycleStatus, DeliveryRecord};

use crate::PgRepository;
use crate::error::store_error;
use crate::rows::{DELIVERY_COLUMNS, DeliveryRow, db_number, db_number_for_write, decode_all};

#[async_trait]
impl DeliveryLog for PgRepository {
    async fn insert(&self, record: DeliveryRecord) -> Result<DeliveryRecord, StoreError> {
        let row = sqlx::query_as::<_, DeliveryRow>(&format!(
            "INSERT INTO deliveries ({DELIVERY_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {DELIVERY_COLUMNS}"
        ))
        .bind(record.id.into_inner())
        .bind(db_number_for_write(record.territory_number)?)
        .bind(record.user_id.into_inner())
        .bind(record.delivered_on)
        .bind(record.due_date)
        .bind(record.returned_on)
        .bind(record.cycle_status.as_db_str())
        .bind(&record.comment)
        .bind(record.created_at)
        .fetch_one(self.pool())
        .await
        .map_err(store_error)?;
        row.into_domain()
    }

    async fn open_record(&self, number: u32) -> Result<Option<DeliveryRecord>, StoreError> {
        let Some(number) = db_number(number) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, DeliveryRow>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries
              WHERE territory_number = $1 AND returned_on IS NULL"
        ))
        .bind(number)
        .fetch_optional(self.pool())
        .await
        .map_err(store_error)?;
        row.map(DeliveryRow::into_domain).transpose()
    }

    async fn update_open_record(
        &self,
        number: u32,
        patch: DeliveryPatch,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        let Some(number) = db_number(number) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, DeliveryRow>(&format!(
            "UPDATE deliveries
                SET returned_on = COALESCE($2, returned_on),
                    cycle_status = COALESCE($3, cycle_status),
                    comment = COALESCE($4, comment)
              WHERE territory_number = $1 AND returned_on IS NULL
              RETURNING {DELIVERY_COLUMNS}"
        ))
        .bind(number)
        .bind(patch.returned_on)
        .bind(patch.cycle_status.map(CycleStatus::as_db_str))
        .bind(patch.comment)
        .fetch_optional(self.pool())
        .await
        .map_err(store_error)?;
        row.map(DeliveryRow::into_domain).transpose()
    }

    async fn list_by_status(&self, status: CycleStatus) -> Result<Vec<DeliveryRecord>, StoreError> {
        let rows = sqlx::query_as::<_, DeliveryRow>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries
              WHERE cycle_status = $1
              ORDER BY territory_number, delivered_on, created_at"
        ))
        .bind(status.as_db_str())
        .fetch_all(self.pool())
        .await
        .map_err(store_error)?;
        decode_all(rows, DeliveryRow::into_domain)
    }

    async fn list_all(&self) -> Result<Vec<DeliveryRecord>, StoreError> {
        let rows = sqlx::query_as::<_, DeliveryRow>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries
              ORDER BY delivered_on DESC, created_at DESC"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(store_error)?;
        decode_all(rows, DeliveryRow::into_domain)
    }

    async fn list_for_territory(&self, number: u32) -> Result<Vec<DeliveryRecord>, StoreError> {
        let Some(number) = db_number(number) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query_as::<_, DeliveryRow>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries
              WHERE territory_number = $1
              ORDER BY delivered_on DESC, created_at DESC"
        ))
        .bind(number)
        .fetch_all(self.pool())
        .await
        .map_err(store_error)?;
        decode_all(rows, DeliveryRow::into_domain)
    }
}
