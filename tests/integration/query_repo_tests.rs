//! Integration tests for user and query persistence.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use relaybot::persistence::{ConversationStore, PoolKind, QueryRepo, UserLookup, UserRepo};
use tokio::sync::oneshot;

use super::test_helpers::{test_db, test_db_with};

#[tokio::test]
async fn unknown_sender_is_not_found() {
    let db = test_db().await;
    let users = UserRepo::new(Arc::clone(&db.pools));

    let lookup = users.get_user_id("15550000000").await.expect("lookup");
    assert_eq!(lookup, UserLookup::NotFound);
}

#[tokio::test]
async fn inserted_user_is_found() {
    let db = test_db().await;
    let users = UserRepo::new(Arc::clone(&db.pools));

    let id = users
        .insert_user("15550000001")
        .await
        .expect("insert")
        .expect("connection available");
    let lookup = users.get_user_id("15550000001").await.expect("lookup");
    assert_eq!(lookup, UserLookup::Found(id));
}

#[tokio::test]
async fn duplicate_insert_returns_existing_user() {
    let db = test_db().await;
    let users = UserRepo::new(Arc::clone(&db.pools));

    let first = users.insert_user("15550000002").await.expect("first");
    let second = users.insert_user("15550000002").await.expect("second");
    assert_eq!(first, second);

    let all = users.list_users().await.expect("list").expect("connection");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].external_id, "15550000002");
}

#[tokio::test]
async fn insert_data_twice_creates_one_user_and_two_queries() {
    let db = test_db().await;
    let repo = QueryRepo::new(Arc::clone(&db.pools));
    let users = UserRepo::new(Arc::clone(&db.pools));

    let first = repo
        .insert_data("15550000003", "what time is it?", "noon")
        .await
        .expect("first insert");
    let second = repo
        .insert_data("15550000003", "and tomorrow?", "also noon")
        .await
        .expect("second insert");
    assert!(first.is_some() && second.is_some());
    assert_ne!(first, second);

    let all = users.list_users().await.expect("list").expect("connection");
    assert_eq!(all.len(), 1);

    let records = repo
        .list_for_user(all[0].id)
        .await
        .expect("records")
        .expect("connection");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].query, "what time is it?");
    assert_eq!(records[1].answer, "also noon");
    assert!(records.iter().all(|record| record.user_id == all[0].id));
}

#[tokio::test]
async fn recent_queries_cover_only_the_last_two_hours() {
    let db = test_db().await;
    let repo = QueryRepo::new(Arc::clone(&db.pools));
    let users = UserRepo::new(Arc::clone(&db.pools));
    let user_id = users
        .insert_user("15550000004")
        .await
        .expect("insert")
        .expect("connection");

    let now = Utc::now();
    for minutes_ago in [170, 130, 100, 70, 40, 20, 5] {
        repo.insert_query_at(
            user_id,
            &format!("q-{minutes_ago}"),
            &format!("a-{minutes_ago}"),
            now - ChronoDuration::minutes(minutes_ago),
        )
        .await
        .expect("insert")
        .expect("connection");
    }

    let history = repo
        .get_recent_queries("15550000004")
        .await
        .expect("history")
        .expect("connection");
    let queries: Vec<&str> = history.iter().map(|entry| entry.query.as_str()).collect();
    assert_eq!(queries, ["q-100", "q-70", "q-40", "q-20", "q-5"]);
    assert!(history.windows(2).all(|pair| pair[0].created_at <= pair[1].created_at));
}

#[tokio::test]
async fn recent_queries_keep_the_five_most_recent() {
    let db = test_db().await;
    let repo = QueryRepo::new(Arc::clone(&db.pools));

    for n in 0..8 {
        repo.insert_data("15550000005", &format!("q{n}"), &format!("a{n}"))
            .await
            .expect("insert")
            .expect("connection");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let history = repo
        .get_recent_queries("15550000005")
        .await
        .expect("history")
        .expect("connection");
    let queries: Vec<&str> = history.iter().map(|entry| entry.query.as_str()).collect();
    assert_eq!(queries, ["q3", "q4", "q5", "q6", "q7"]);
}

#[tokio::test]
async fn recent_queries_are_scoped_to_the_sender() {
    let db = test_db().await;
    let repo = QueryRepo::new(Arc::clone(&db.pools));

    repo.insert_data("alice", "mine", "yours").await.expect("alice");
    repo.insert_data("bob", "his", "theirs").await.expect("bob");

    let alice = repo
        .get_recent_queries("alice")
        .await
        .expect("history")
        .expect("connection");
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].query, "mine");

    let nobody = repo
        .get_recent_queries("carol")
        .await
        .expect("history")
        .expect("connection");
    assert!(nobody.is_empty());
}

#[tokio::test]
async fn conversation_store_round_trip() {
    let db = test_db().await;
    let store: Arc<dyn ConversationStore> = Arc::new(QueryRepo::new(Arc::clone(&db.pools)));

    assert!(store.recent_history("dave").await.expect("empty").is_empty());
    assert!(store.record("dave", "hello?", "hi!").await.expect("record"));

    let history = store.recent_history("dave").await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].answer, "hi!");
}

#[tokio::test]
async fn insert_data_writes_nothing_when_lookup_times_out() {
    let db = test_db_with(|config| {
        config.read_pools = 1;
        config.min_connections = 1;
        config.max_connections = 1;
        config.acquire_timeout_ms = 150;
    })
    .await;
    let repo = QueryRepo::new(Arc::clone(&db.pools));

    let (leased_tx, leased_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let holder = {
        let pools = Arc::clone(&db.pools);
        tokio::spawn(async move {
            pools
                .with_scope(PoolKind::Read, move |_conn| {
                    Box::pin(async move {
                        let _ = leased_tx.send(());
                        let _ = release_rx.await;
                        Ok(())
                    })
                })
                .await
        })
    };
    leased_rx.await.expect("read connection held");

    let outcome = repo
        .insert_data("erin", "anyone there?", "yes")
        .await
        .expect("no error");
    assert_eq!(outcome, None);
    assert!(!repo.record("erin", "again?", "yes").await.expect("no error"));

    release_tx.send(()).expect("holder waiting");
    holder.await.expect("holder").expect("holder op");

    let users = UserRepo::new(Arc::clone(&db.pools));
    assert_eq!(
        users.get_user_id("erin").await.expect("lookup"),
        UserLookup::NotFound
    );
}
