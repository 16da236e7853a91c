//! Raw table rows and their conversion to domain values.
//!
//! Rows are decoded with runtime types. Numbers live in `INTEGER` columns and
//! statuses in `TEXT` columns holding the persisted Spanish names.

use chrono::{DateTime, NaiveDate, Utc};
use territory_core::ports::StoreError;
use territory_types::{DeliveryRecord, Territory, User};
use uuid::Uuid;

use crate::error::decode_error;

/// Column list for `territories` selects and `RETURNING` clauses.
pub(crate) const TERRITORY_COLUMNS: &str = "id, number, status, assigned_user, delivered_on, \
     due_date, rest_until, comment, is_special_campaign, document_url, revision, created_at";

/// Column list for `deliveries`.
pub(crate) const DELIVERY_COLUMNS: &str = "id, territory_number, user_id, delivered_on, \
     due_date, returned_on, cycle_status, comment, created_at";

/// Column list for `users`.
pub(crate) const USER_COLUMNS: &str = "id, name, phone, active, created_at";

/// A territory number as stored. Numbers beyond `INTEGER` cannot exist in
/// the table.
pub(crate) fn db_number(number: u32) -> Option<i32> {
    i32::try_from(number).ok()
}

/// Like [`db_number`], for writes.
pub(crate) fn db_number_for_write(number: u32) -> Result<i32, StoreError> {
    db_number(number).ok_or_else(|| StoreError::Backend {
        message: format!("territory number {number} exceeds the column range"),
    })
}

/// A revision as stored in its `BIGINT` column.
pub(crate) fn db_revision(revision: u64) -> Result<i64, StoreError> {
    i64::try_from(revision).map_err(|e| StoreError::Backend {
        message: format!("revision {revision} exceeds the column range: {e}"),
    })
}

fn domain_number(entity: &str, number: i32) -> Result<u32, StoreError> {
    u32::try_from(number).map_err(|e| decode_error(entity, format_args!("number {number}: {e}")))
}

/// A row of `territories`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct TerritoryRow {
    pub id: Uuid,
    pub number: i32,
    pub status: String,
    pub assigned_user: Option<Uuid>,
    pub delivered_on: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub rest_until: Option<NaiveDate>,
    pub comment: Option<String>,
    pub is_special_campaign: bool,
    pub document_url: Option<String>,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
}

impl TerritoryRow {
    pub(crate) fn into_domain(self) -> Result<Territory, StoreError> {
        let revision = u64::try_from(self.revision).map_err(|e| {
            decode_error("territory", format_args!("revision {}: {e}", self.revision))
        })?;
        Ok(Territory {
            id: self.id.into(),
            number: domain_number("territory", self.number)?,
            status: self
                .status
                .parse()
                .map_err(|e| decode_error("territory", e))?,
            assigned_user: self.assigned_user.map(Into::into),
            delivered_on: self.delivered_on,
            due_date: self.due_date,
            rest_until: self.rest_until,
            comment: self.comment,
            is_special_campaign: self.is_special_campaign,
            document_url: self.document_url,
            revision,
            created_at: self.created_at,
        })
    }
}

/// A row of `deliveries`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct DeliveryRow {
    pub id: Uuid,
    pub territory_number: i32,
    pub user_id: Uuid,
    pub delivered_on: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub returned_on: Option<NaiveDate>,
    pub cycle_status: String,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryRow {
    pub(crate) fn into_domain(self) -> Result<DeliveryRecord, StoreError> {
        Ok(DeliveryRecord {
            id: self.id.into(),
            territory_number: domain_number("delivery", self.territory_number)?,
            user_id: self.user_id.into(),
            delivered_on: self.delivered_on,
            due_date: self.due_date,
            returned_on: self.returned_on,
            cycle_status: self
                .cycle_status
                .parse()
                .map_err(|e| decode_error("delivery", e))?,
            comment: self.comment,
            created_at: self.created_at,
        })
    }
}

/// A row of `users`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id.into(),
            name: row.name,
            phone: row.phone,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

/// Decode every row, failing on the first bad one.
pub(crate) fn decode_all<R, T>(
    rows: Vec<R>,
    decode: impl Fn(R) -> Result<T, StoreError>,
) -> Result<Vec<T>, StoreError> {
    rows.into_iter().map(decode).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use territory_types::{CycleStatus, TerritoryStatus};

    use super::*;

    fn territory_row(status: &str) -> TerritoryRow {
        TerritoryRow {
            id: Uuid::now_v7(),
            number: 7,
            status: status.to_owned(),
            assigned_user: None,
            delivered_on: None,
            due_date: None,
            rest_until: None,
            comment: None,
            is_special_campaign: false,
            document_url: None,
            revision: 3,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn territory_row_decodes_spanish_status() {
        let territory = territory_row("inhabilitado").into_domain().unwrap();
        assert_eq!(territory.number, 7);
        assert_eq!(territory.status, TerritoryStatus::Disabled);
        assert_eq!(territory.revision, 3);
    }

    #[test]
    fn negative_revision_is_rejected() {
        let mut row = territory_row("disponible");
        row.revision = -1;
        assert!(row.into_domain().is_err());
        assert!(db_revision(u64::MAX).is_err());
    }

    #[test]
    fn unknown_status_is_a_backend_error() {
        assert!(matches!(
            territory_row("perdido").into_domain(),
            Err(StoreError::Backend { .. })
        ));
    }

    #[test]
    fn negative_number_is_rejected() {
        let mut row = territory_row("disponible");
        row.number = -3;
        assert!(row.into_domain().is_err());
    }

    #[test]
    fn delivery_row_decodes_cycle_status() {
        let row = DeliveryRow {
            id: Uuid::now_v7(),
            territory_number: 12,
            user_id: Uuid::now_v7(),
            delivered_on: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            due_date: None,
            returned_on: None,
            cycle_status: "especial".to_owned(),
            comment: None,
            created_at: Utc::now(),
        };
        let record = row.into_domain().unwrap();
        assert_eq!(record.cycle_status, CycleStatus::Special);
        assert!(record.is_open());
    }

    #[test]
    fn numbers_beyond_integer_are_not_addressable() {
        assert_eq!(db_number(12), Some(12));
        assert_eq!(db_number(u32::MAX), None);
        assert!(db_number_for_write(u32::MAX).is_err());
    }
}
