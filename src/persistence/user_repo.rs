//! User repository built on scoped pool acquisition.

use std::sync::Arc;

use chrono::Utc;

use super::pool_manager::{PoolKind, PoolManager};
use crate::models::history::{parse_db_timestamp, to_db_timestamp};
use crate::models::User;
use crate::{AppError, Result};

/// Outcome of looking a sender up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserLookup {
    /// The sender is known under this user id.
    Found(i64),
    /// The sender has never been seen.
    NotFound,
    /// No read connection could be leased in time.
    Unavailable,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    external_id: String,
    created_at: String,
}

impl UserRow {
    fn into_user(self) -> Result<User> {
        Ok(User {
            id: self.id,
            external_id: self.external_id,
            created_at: parse_db_timestamp(&self.created_at)?,
        })
    }
}

/// Repository for sender records.
#[derive(Clone)]
pub struct UserRepo {
    pools: Arc<PoolManager>,
}

impl UserRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self { pools }
    }

    /// Look up the user id for `sender_id` on a read pool.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_user_id(&self, sender_id: &str) -> Result<UserLookup> {
        let sender = sender_id.to_owned();
        let outcome = self
            .pools
            .with_scope(PoolKind::Read, move |conn| {
                Box::pin(async move {
                    sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE external_id = ?1")
                        .bind(sender)
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(AppError::from)
                })
            })
            .await?;

        Ok(match outcome {
            Some(Some(id)) => UserLookup::Found(id),
            Some(None) => UserLookup::NotFound,
            None => UserLookup::Unavailable,
        })
    }

    /// Insert a user for `sender_id` on a write pool and return its id.
    ///
    /// If a concurrent caller inserted the same sender first, the existing
    /// id is returned instead of creating a duplicate. `Ok(None)` means no
    /// write connection could be leased in time.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert_user(&self, sender_id: &str) -> Result<Option<i64>> {
        let sender = sender_id.to_owned();
        let created_at = to_db_timestamp(Utc::now());
        self.pools
            .with_scope(PoolKind::Write, move |conn| {
                Box::pin(async move {
                    sqlx::query_scalar::<_, i64>(
                        "INSERT INTO users (external_id, created_at) VALUES (?1, ?2)
                         ON CONFLICT(external_id) DO UPDATE SET external_id = excluded.external_id
                         RETURNING id",
                    )
                    .bind(sender)
                    .bind(created_at)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(AppError::from)
                })
            })
            .await
    }

    /// List every known user, oldest first.
    ///
    /// `Ok(None)` means no read connection could be leased in time.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a row is malformed.
    pub async fn list_users(&self) -> Result<Option<Vec<User>>> {
        let rows = self
            .pools
            .with_scope(PoolKind::Read, |conn| {
                Box::pin(async move {
                    sqlx::query_as::<_, UserRow>(
                        "SELECT id, external_id, created_at FROM users ORDER BY id ASC",
                    )
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(AppError::from)
                })
            })
            .await?;

        rows.map(|rows| {
            rows.into_iter()
                .map(UserRow::into_user)
                .collect::<Result<Vec<_>>>()
        })
        .transpose()
    }
}
