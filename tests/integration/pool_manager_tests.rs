//! Integration tests for pool creation, round-robin selection, and scoped
//! acquisition against a real `SQLite` file.

use std::time::{Duration, Instant};

use relaybot::persistence::{PoolKind, PoolManager};
use relaybot::AppError;
use tokio::sync::oneshot;

use super::test_helpers::{db_config, test_db, test_db_with};

async fn select_one(pools: &PoolManager, kind: PoolKind) -> relaybot::Result<Option<i64>> {
    pools
        .with_scope(kind, |conn| {
            Box::pin(async move {
                sqlx::query_scalar::<_, i64>("SELECT 1")
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(AppError::from)
            })
        })
        .await
}

/// Wait until the single write pool holds `expected` idle connections.
///
/// A dropped connection is handed back to its pool asynchronously.
async fn wait_for_idle_writes(pools: &PoolManager, expected: usize) {
    let pool = &pools.pools(PoolKind::Write)[0];
    let deadline = Instant::now() + Duration::from_secs(2);
    while pool.num_idle() != expected {
        assert!(
            Instant::now() < deadline,
            "write pool has {} idle connections, expected {expected}",
            pool.num_idle()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn initialize_creates_database_and_every_pool() {
    let db = test_db().await;

    assert!(db.dir.path().join("relaybot.db").exists());
    assert_eq!(db.pools.pools(PoolKind::Read).len(), 2);
    assert_eq!(db.pools.pools(PoolKind::Write).len(), 2);
    assert_eq!(db.pools.acquire_timeout(), Duration::from_millis(500));
    assert_eq!(select_one(&db.pools, PoolKind::Read).await.expect("read"), Some(1));
    assert_eq!(select_one(&db.pools, PoolKind::Write).await.expect("write"), Some(1));
}

#[tokio::test]
async fn get_pool_rotates_through_pools_of_a_kind() {
    let db = test_db_with(|config| config.read_pools = 3).await;
    let read = db.pools.pools(PoolKind::Read);

    for round in 0..6 {
        let picked = db.pools.get_pool(PoolKind::Read);
        assert!(
            std::ptr::eq(picked, &read[round % 3]),
            "round {round} picked the wrong pool"
        );
    }
}

#[tokio::test]
async fn initialize_fails_when_path_is_unusable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "file in the way").expect("write blocker");

    let mut config = db_config(dir.path());
    config.path = blocker.join("relaybot.db");

    let result = PoolManager::initialize(&config).await;
    assert!(matches!(result, Err(AppError::Db(_))));
}

#[tokio::test]
async fn read_pools_reject_writes() {
    let db = test_db().await;

    let result = db
        .pools
        .with_scope(PoolKind::Read, |conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO users (external_id, created_at) VALUES ('x', 'y')")
                    .execute(&mut *conn)
                    .await
                    .map(|_| ())
                    .map_err(AppError::from)
            })
        })
        .await;
    assert!(matches!(result, Err(AppError::Db(_))));
}

#[tokio::test]
async fn connection_is_released_when_operation_fails() {
    let db = test_db_with(|config| {
        config.write_pools = 1;
        config.min_connections = 1;
        config.max_connections = 1;
    })
    .await;
    wait_for_idle_writes(&db.pools, 1).await;

    let failed: relaybot::Result<Option<()>> = db
        .pools
        .with_scope(PoolKind::Write, |_conn| {
            Box::pin(async { Err(AppError::Db("operation failed".into())) })
        })
        .await;
    assert!(matches!(failed, Err(AppError::Db(msg)) if msg == "operation failed"));
    wait_for_idle_writes(&db.pools, 1).await;

    // The only connection went back to the pool, so this lease succeeds.
    assert_eq!(
        select_one(&db.pools, PoolKind::Write).await.expect("write"),
        Some(1)
    );
}

#[tokio::test]
async fn connection_is_released_when_operation_panics() {
    let db = test_db_with(|config| {
        config.write_pools = 1;
        config.min_connections = 1;
        config.max_connections = 1;
    })
    .await;
    wait_for_idle_writes(&db.pools, 1).await;

    let pools = std::sync::Arc::clone(&db.pools);
    let crashed = tokio::spawn(async move {
        let explode = true;
        pools
            .with_scope(PoolKind::Write, move |_conn| {
                Box::pin(async move {
                    assert!(!explode, "operation panicked");
                    Ok(())
                })
            })
            .await
    })
    .await;
    assert!(crashed.is_err());
    wait_for_idle_writes(&db.pools, 1).await;

    assert_eq!(
        select_one(&db.pools, PoolKind::Write).await.expect("write"),
        Some(1)
    );
}

#[tokio::test]
async fn acquire_times_out_when_pool_is_exhausted() {
    let db = test_db_with(|config| {
        config.write_pools = 1;
        config.min_connections = 1;
        config.max_connections = 1;
        config.acquire_timeout_ms = 200;
    })
    .await;

    let (leased_tx, leased_rx) = oneshot::channel();
    let holder = {
        let pools = std::sync::Arc::clone(&db.pools);
        tokio::spawn(async move {
            pools
                .with_scope(PoolKind::Write, move |_conn| {
                    Box::pin(async move {
                        let _ = leased_tx.send(());
                        tokio::time::sleep(Duration::from_millis(800)).await;
                        Ok(())
                    })
                })
                .await
        })
    };
    leased_rx.await.expect("holder leased the connection");

    let started = Instant::now();
    let outcome = select_one(&db.pools, PoolKind::Write).await.expect("no error");
    let waited = started.elapsed();

    assert_eq!(outcome, None);
    assert!(waited >= Duration::from_millis(150), "gave up after {waited:?}");
    assert!(waited < Duration::from_millis(700), "waited {waited:?}");

    assert_eq!(holder.await.expect("holder").expect("holder op"), Some(()));
    assert_eq!(
        select_one(&db.pools, PoolKind::Write).await.expect("write"),
        Some(1)
    );
}

#[tokio::test]
async fn closed_pools_report_an_error() {
    let db = test_db().await;
    db.pools.close().await;

    let result = select_one(&db.pools, PoolKind::Read).await;
    assert!(matches!(result, Err(AppError::Db(_))));
}
