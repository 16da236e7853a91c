//! [`UserDirectory`] over the `users` table.
//!
//! `territories.assigned_user` references `users.id` with `ON DELETE
//! RESTRICT`, so deleting a user who still holds a territory fails with
//! [`StoreError::Conflict`].

use async_trait::async_trait;
use territory_core::ports::{StoreError, UserDirectory, UserPatch};
use territory_types::{User, UserId};
use uuid::Uuid;

use crate::PgRepository;
use crate::error::store_error;
use crate::rows::{USER_COLUMNS, UserRow};

#[async_trait]
impl UserDirectory for PgRepository {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id.into_inner())
        .fetch_optional(self.pool())
        .await
        .map_err(store_error)?;
        Ok(row.map(User::from))
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY name, id"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(store_error)?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn create_user(&self, user: User) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users ({USER_COLUMNS}) VALUES ($1, $2, $3, $4, $5)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(user.id.into_inner())
        .bind(&user.name)
        .bind(&user.phone)
        .bind(user.active)
        .bind(user.created_at)
        .fetch_one(self.pool())
        .await
        .map_err(store_error)?;
        Ok(row.into())
    }

    async fn update_user(&self, id: UserId, patch: UserPatch) -> Result<User, StoreError> {
        // `$3` says whether the phone is being set at all, since `$4` may be
        // a deliberate NULL.
        let (phone_set, phone) = match patch.phone {
            Some(phone) => (true, phone),
            None => (false, None),
        };
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users
                SET name = COALESCE($2, name),
                    phone = CASE WHEN $3 THEN $4 ELSE phone END,
                    active = COALESCE($5, active)
              WHERE id = $1
              RETURNING {USER_COLUMNS}"
        ))
        .bind(id.into_inner())
        .bind(patch.name)
        .bind(phone_set)
        .bind(phone)
        .bind(patch.active)
        .fetch_optional(self.pool())
        .await
        .map_err(store_error)?;
        row.map(User::from).ok_or_else(|| StoreError::NotFound {
            entity: "user",
            key: id.to_string(),
        })
    }

    async fn delete_users(&self, ids: &[UserId]) -> Result<u64, StoreError> {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.into_inner()).collect();
        let result = sqlx::query("DELETE FROM users WHERE id = ANY($1)")
            .bind(&ids)
            .execute(self.pool())
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected())
    }
}
