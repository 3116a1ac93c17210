//! `SQLite` schema bootstrap logic.
//!
//! All definitions use `IF NOT EXISTS`, so the bootstrap is safe to re-run
//! on every server startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply the `users` and `queries` definitions to the connected database.
///
/// `users.external_id` is unique so two concurrent first messages from the
/// same sender cannot create two users. `queries.user_id` is not a foreign
/// key; insert ordering guarantees the user exists.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS users (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id     TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS queries (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL,
    query           TEXT NOT NULL,
    answer          TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_users_external_id ON users(external_id);
CREATE INDEX IF NOT EXISTS idx_queries_user_created ON queries(user_id, created_at);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
