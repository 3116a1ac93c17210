//! Query/answer repository and the recent-history window.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::pool_manager::{PoolKind, PoolManager};
use super::store::ConversationStore;
use super::user_repo::{UserLookup, UserRepo};
use crate::models::history::{
    history_window, parse_db_timestamp, to_db_timestamp, HISTORY_LIMIT,
};
use crate::models::{HistoryEntry, QueryRecord};
use crate::{AppError, Result};

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct HistoryRow {
    query: String,
    answer: String,
    created_at: String,
}

impl HistoryRow {
    fn into_entry(self) -> Result<HistoryEntry> {
        Ok(HistoryEntry {
            query: self.query,
            answer: self.answer,
            created_at: parse_db_timestamp(&self.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct QueryRow {
    id: i64,
    user_id: i64,
    query: String,
    answer: String,
    created_at: String,
}

impl QueryRow {
    fn into_record(self) -> Result<QueryRecord> {
        Ok(QueryRecord {
            id: self.id,
            user_id: self.user_id,
            query: self.query,
            answer: self.answer,
            created_at: parse_db_timestamp(&self.created_at)?,
        })
    }
}

/// Repository for answered queries.
#[derive(Clone)]
pub struct QueryRepo {
    pools: Arc<PoolManager>,
    users: UserRepo,
}

impl QueryRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(pools: Arc<PoolManager>) -> Self {
        let users = UserRepo::new(Arc::clone(&pools));
        Self { pools, users }
    }

    /// Append a query record stamped with the current time.
    ///
    /// `Ok(None)` means no write connection could be leased in time.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert_query(
        &self,
        user_id: i64,
        query: &str,
        answer: &str,
    ) -> Result<Option<i64>> {
        self.insert_query_at(user_id, query, answer, Utc::now())
            .await
    }

    /// Append a query record with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert_query_at(
        &self,
        user_id: i64,
        query: &str,
        answer: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let query = query.to_owned();
        let answer = answer.to_owned();
        let created_at = to_db_timestamp(created_at);
        self.pools
            .with_scope(PoolKind::Write, move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO queries (user_id, query, answer, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                    )
                    .bind(user_id)
                    .bind(query)
                    .bind(answer)
                    .bind(created_at)
                    .execute(&mut *conn)
                    .await
                    .map(|done| done.last_insert_rowid())
                    .map_err(AppError::from)
                })
            })
            .await
    }

    /// Fetch the recent-history window for `sender_id`.
    ///
    /// Returns at most five exchanges from the last two hours. When more
    /// qualify, the most recent ones are kept. The result is ordered oldest
    /// first. `Ok(None)` means no read connection could be leased in time.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a row is malformed.
    pub async fn get_recent_queries(&self, sender_id: &str) -> Result<Option<Vec<HistoryEntry>>> {
        let sender = sender_id.to_owned();
        let cutoff = to_db_timestamp(Utc::now() - history_window());
        let rows = self
            .pools
            .with_scope(PoolKind::Read, move |conn| {
                Box::pin(async move {
                    sqlx::query_as::<_, HistoryRow>(
                        "SELECT q.query, q.answer, q.created_at
                         FROM queries q
                         JOIN users u ON q.user_id = u.id
                         WHERE u.external_id = ?1 AND q.created_at >= ?2
                         ORDER BY q.created_at DESC, q.id DESC
                         LIMIT ?3",
                    )
                    .bind(sender)
                    .bind(cutoff)
                    .bind(HISTORY_LIMIT)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(AppError::from)
                })
            })
            .await?;

        let Some(rows) = rows else {
            return Ok(None);
        };
        let mut entries = rows
            .into_iter()
            .map(HistoryRow::into_entry)
            .collect::<Result<Vec<_>>>()?;
        entries.reverse();
        Ok(Some(entries))
    }

    /// List every query recorded for `user_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a row is malformed.
    pub async fn list_for_user(&self, user_id: i64) -> Result<Option<Vec<QueryRecord>>> {
        let rows = self
            .pools
            .with_scope(PoolKind::Read, move |conn| {
                Box::pin(async move {
                    sqlx::query_as::<_, QueryRow>(
                        "SELECT id, user_id, query, answer, created_at
                         FROM queries WHERE user_id = ?1
                         ORDER BY created_at ASC, id ASC",
                    )
                    .bind(user_id)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(AppError::from)
                })
            })
            .await?;

        rows.map(|rows| {
            rows.into_iter()
                .map(QueryRow::into_record)
                .collect::<Result<Vec<_>>>()
        })
        .transpose()
    }

    /// Record an answered query, creating the sender's user on first contact.
    ///
    /// Runs the lookup, the optional user insert, and the query insert as
    /// three independent scoped operations; there is no enclosing
    /// transaction. If the lookup cannot get a connection nothing is written,
    /// so an unavailable pool never creates a duplicate user. Returns the new
    /// query id, or `Ok(None)` when any step timed out.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if any statement fails.
    pub async fn insert_data(
        &self,
        sender_id: &str,
        query: &str,
        answer: &str,
    ) -> Result<Option<i64>> {
        let user_id = match self.users.get_user_id(sender_id).await? {
            UserLookup::Found(id) => id,
            UserLookup::NotFound => {
                info!(sender_id, "message from unknown sender; adding user");
                let Some(id) = self.users.insert_user(sender_id).await? else {
                    return Ok(None);
                };
                id
            }
            UserLookup::Unavailable => return Ok(None),
        };

        let query_id = self.insert_query(user_id, query, answer).await?;
        if query_id.is_some() {
            info!(sender_id, user_id, "query record inserted");
        }
        Ok(query_id)
    }
}

impl ConversationStore for QueryRepo {
    fn recent_history<'a>(
        &'a self,
        sender_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<HistoryEntry>>> + Send + 'a>> {
        Box::pin(async move {
            match self.get_recent_queries(sender_id).await? {
                Some(entries) => Ok(entries),
                None => {
                    warn!(sender_id, "history unavailable; answering without context");
                    Ok(Vec::new())
                }
            }
        })
    }

    fn record<'a>(
        &'a self,
        sender_id: &'a str,
        query: &'a str,
        answer: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let stored = self.insert_data(sender_id, query, answer).await?;
            Ok(stored.is_some())
        })
    }
}
