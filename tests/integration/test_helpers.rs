//! Shared test helpers for integration tests.
//!
//! Each helper opens its own `SQLite` file inside a fresh temporary
//! directory so tests never share state.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use relaybot::config::DatabaseConfig;
use relaybot::generator::AnswerGenerator;
use relaybot::models::HistoryEntry;
use relaybot::notifier::Notifier;
use relaybot::persistence::PoolManager;
use relaybot::Result;
use tempfile::TempDir;

/// An initialized pool manager with the directory that backs it.
pub struct TestDb {
    /// Kept alive for the lifetime of the pools.
    #[allow(dead_code)]
    pub dir: TempDir,
    pub pools: Arc<PoolManager>,
}

/// Small pools with a short acquire timeout.
pub fn db_config(dir: &Path) -> DatabaseConfig {
    DatabaseConfig {
        read_pools: 2,
        write_pools: 2,
        min_connections: 1,
        max_connections: 2,
        connect_timeout_seconds: 5,
        acquire_timeout_ms: 500,
        ..DatabaseConfig::with_path(dir.join("relaybot.db"))
    }
}

/// Open pools on a fresh database built from `tweak(db_config(..))`.
pub async fn test_db_with(tweak: impl FnOnce(&mut DatabaseConfig)) -> TestDb {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = db_config(dir.path());
    tweak(&mut config);
    let pools = PoolManager::initialize(&config)
        .await
        .expect("pools initialize");
    TestDb {
        dir,
        pools: Arc::new(pools),
    }
}

/// Open pools on a fresh database with the default test settings.
pub async fn test_db() -> TestDb {
    test_db_with(|_| {}).await
}

/// Generator echoing the query and the size of the history it was given.
pub struct EchoGenerator;

impl AnswerGenerator for EchoGenerator {
    fn generate<'a>(
        &'a self,
        query: &'a str,
        history: &'a [HistoryEntry],
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move { Ok(format!("{query} (with {} earlier)", history.len())) })
    }
}

/// Notifier capturing `(recipient, message)` pairs.
#[derive(Default)]
pub struct CapturingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl Notifier for CapturingNotifier {
    fn send<'a>(
        &'a self,
        message: &'a str,
        recipient: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_owned(), message.to_owned()));
            Ok(())
        })
    }
}
