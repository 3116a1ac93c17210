//! Read/write connection-pool sets with scoped acquisition.
//!
//! [`PoolManager`] owns a fixed number of read pools and write pools over the
//! same `SQLite` file. Callers never touch a pool directly: they hand an
//! operation to [`PoolManager::with_scope`], which picks a pool of the
//! requested kind, leases one connection under a bounded wait, runs the
//! operation, and returns the connection to the pool it came from on every
//! exit path.

use std::fmt::{Display, Formatter};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use super::schema;
use crate::config::DatabaseConfig;
use crate::{AppError, Result};

/// Access kind a pool is dedicated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Query-only connections.
    Read,
    /// Read-write connections.
    Write,
}

impl Display for PoolKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// A connection leased for one scoped operation.
///
/// Dropping the lease hands the inner connection back to the pool it was
/// acquired from.
struct Lease {
    conn: PoolConnection<Sqlite>,
    kind: PoolKind,
    pool_index: usize,
}

impl Drop for Lease {
    fn drop(&mut self) {
        debug!(kind = %self.kind, pool = self.pool_index, "connection released");
    }
}

/// Owner of every database pool in the process.
///
/// Built once at startup by [`initialize`](Self::initialize) and shared as
/// `Arc<PoolManager>`.
pub struct PoolManager {
    read: Vec<SqlitePool>,
    write: Vec<SqlitePool>,
    read_cursor: AtomicUsize,
    write_cursor: AtomicUsize,
    acquire_timeout: Duration,
}

impl PoolManager {
    /// Create all pools, bootstrap the schema, and validate both kinds.
    ///
    /// Write pools are opened first so the database file and schema exist
    /// before any read pool connects. Read pools run with
    /// `PRAGMA query_only`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if any pool cannot be created or either
    /// validation query fails. Callers must treat this as fatal.
    pub async fn initialize(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|err| AppError::Db(format!("failed to create db dir: {err}")))?;
            }
        }

        let write_options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.acquire_timeout());
        let read_options = SqliteConnectOptions::new()
            .filename(&config.path)
            .busy_timeout(config.acquire_timeout())
            .pragma("query_only", "ON");

        let mut write = Vec::with_capacity(config.write_pools);
        for index in 0..config.write_pools {
            let pool = open_pool(config, write_options.clone())
                .await
                .map_err(|err| AppError::Db(format!("failed to open write pool {index}: {err}")))?;
            write.push(pool);
        }

        if let Some(first) = write.first() {
            schema::bootstrap_schema(first).await?;
        }

        let mut read = Vec::with_capacity(config.read_pools);
        for index in 0..config.read_pools {
            let pool = open_pool(config, read_options.clone())
                .await
                .map_err(|err| AppError::Db(format!("failed to open read pool {index}: {err}")))?;
            read.push(pool);
        }

        let manager = Self {
            read,
            write,
            read_cursor: AtomicUsize::new(0),
            write_cursor: AtomicUsize::new(0),
            acquire_timeout: config.acquire_timeout(),
        };
        manager.validate().await?;

        info!(
            path = %config.path.display(),
            read_pools = config.read_pools,
            write_pools = config.write_pools,
            min_connections = config.min_connections,
            max_connections = config.max_connections,
            "connection pools initialized"
        );
        Ok(manager)
    }

    /// Pick one pool of `kind` (round-robin, shared cursor).
    #[must_use]
    pub fn get_pool(&self, kind: PoolKind) -> &SqlitePool {
        self.select(kind).1
    }

    /// Every pool of `kind`, in creation order.
    #[must_use]
    pub fn pools(&self, kind: PoolKind) -> &[SqlitePool] {
        match kind {
            PoolKind::Read => &self.read,
            PoolKind::Write => &self.write,
        }
    }

    /// Bounded wait applied to every connection lease.
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Run `operation` on a connection leased from a pool of `kind`.
    ///
    /// Returns `Ok(None)` when no connection could be leased within the
    /// acquire timeout; the timeout is logged and never raised. Errors from
    /// `operation` are returned as-is. The connection goes back to the pool
    /// it was leased from whether the operation succeeds, fails, or panics.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or `AppError::Db` if the pool fails
    /// for a reason other than the timeout (for example, it was closed).
    pub async fn with_scope<T, F>(&self, kind: PoolKind, operation: F) -> Result<Option<T>>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>>,
    {
        let (pool_index, pool) = self.select(kind);
        let Some(mut lease) = self.lease(kind, pool_index, pool).await? else {
            return Ok(None);
        };

        let value = operation(&mut *lease.conn).await?;
        Ok(Some(value))
    }

    /// Close every pool, waiting for leased connections to come back.
    pub async fn close(&self) {
        for pool in self.read.iter().chain(self.write.iter()) {
            pool.close().await;
        }
        info!("connection pools closed");
    }

    fn select(&self, kind: PoolKind) -> (usize, &SqlitePool) {
        let (pools, cursor) = match kind {
            PoolKind::Read => (&self.read, &self.read_cursor),
            PoolKind::Write => (&self.write, &self.write_cursor),
        };
        let index = cursor.fetch_add(1, Ordering::Relaxed) % pools.len();
        (index, &pools[index])
    }

    async fn lease(
        &self,
        kind: PoolKind,
        pool_index: usize,
        pool: &SqlitePool,
    ) -> Result<Option<Lease>> {
        match tokio::time::timeout(self.acquire_timeout, pool.acquire()).await {
            Ok(Ok(conn)) => Ok(Some(Lease {
                conn,
                kind,
                pool_index,
            })),
            Ok(Err(sqlx::Error::PoolTimedOut)) | Err(_) => {
                warn!(
                    %kind,
                    pool = pool_index,
                    timeout_ms = u64::try_from(self.acquire_timeout.as_millis()).unwrap_or(u64::MAX),
                    "connection acquire timed out"
                );
                Ok(None)
            }
            Ok(Err(err)) => Err(AppError::Db(format!(
                "failed to acquire {kind} connection from pool {pool_index}: {err}"
            ))),
        }
    }

    async fn validate(&self) -> Result<()> {
        for kind in [PoolKind::Read, PoolKind::Write] {
            let pool = self
                .pools(kind)
                .first()
                .ok_or_else(|| AppError::Db(format!("no {kind} pools configured")))?;
            let one: i64 = sqlx::query_scalar("SELECT 1")
                .fetch_one(pool)
                .await
                .map_err(|err| AppError::Db(format!("{kind} pool validation failed: {err}")))?;
            if one != 1 {
                return Err(AppError::Db(format!(
                    "{kind} pool validation returned {one}"
                )));
            }
            debug!(%kind, "pool validated");
        }
        Ok(())
    }
}

async fn open_pool(
    config: &DatabaseConfig,
    options: SqliteConnectOptions,
) -> std::result::Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout())
        .connect_with(options)
        .await
}
