// src/storage/tests/sqlite_tests.rs

use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::common;
use crate::algorithms::{FixedWindow, Step};
use crate::config::SqliteConfig;
use crate::error::RateLimiterError;
use crate::storage::{SqliteStorage, StorageBackend};

// Removes the database and its WAL files when the test ends
struct TempDb(PathBuf);

impl TempDb {
    fn new() -> Self {
        Self(std::env::temp_dir().join(format!("ratelimit-{}.db", Uuid::new_v4())))
    }

    fn config(&self) -> SqliteConfig {
        SqliteConfig::new(self.0.to_string_lossy())
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.0.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(path);
        }
    }
}

#[tokio::test]
async fn test_sqlite_save_and_load() {
    let sqlite = SqliteStorage::in_memory().unwrap();
    common::test_save_and_load(&sqlite, "sql:roundtrip").await.unwrap();
}

#[tokio::test]
async fn test_sqlite_update() {
    let sqlite = SqliteStorage::in_memory().unwrap();
    common::test_update_creates_and_decrements(&sqlite, "sql:update", 0)
        .await
        .unwrap();
    assert_eq!(sqlite.name(), "sqlite");
}

#[tokio::test]
async fn test_sqlite_concurrent_updates() {
    let sqlite = Arc::new(SqliteStorage::in_memory().unwrap());
    common::test_concurrent_updates(sqlite, "sql:concurrent", 0)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_sqlite_state_survives_reopen() {
    let db = TempDb::new();
    {
        let sqlite = SqliteStorage::new(db.config()).await.unwrap();
        common::test_update_creates_and_decrements(&sqlite, "sql:durable", 0)
            .await
            .unwrap();
    }

    let reopened = SqliteStorage::new(db.config()).await.unwrap();
    let rate = reopened.load("sql:durable").await.unwrap().unwrap();
    assert_eq!(rate.remaining, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_two_connections_share_one_counter() {
    let db = TempDb::new();
    let first = Arc::new(SqliteStorage::new(db.config()).await.unwrap());
    let second = Arc::new(SqliteStorage::new(db.config()).await.unwrap());
    let policy = common::policy(20);

    let mut handles = Vec::new();
    for i in 0..30 {
        let storage = if i % 2 == 0 { Arc::clone(&first) } else { Arc::clone(&second) };
        let policy = policy.clone();
        handles.push(tokio::spawn(async move {
            let consume =
                |c| FixedWindow::apply(c, "sql:shared", &policy, Step::Consume(1), 0);
            storage.update("sql:shared", &consume).await.map(|t| t.admitted)
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 20);
}

// A writer holding the database lock must not stall updates past the
// engine timeout
#[tokio::test]
async fn test_sqlite_locked_database_fails_within_engine_timeout() {
    let db = TempDb::new();
    let engine_timeout = Duration::from_millis(100);
    let sqlite = SqliteStorage::new(db.config().fit_within(engine_timeout))
        .await
        .unwrap();

    let blocker = Connection::open(&db.0).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

    let policy = common::policy(5);
    let started = Instant::now();
    let result = sqlite
        .update("sql:locked", &|c| FixedWindow::apply(c, "sql:locked", &policy, Step::Consume(1), 0))
        .await;
    let waited = started.elapsed();

    let err = result.unwrap_err();
    assert!(err.is_unavailable(), "Lock contention reads as unavailable: {}", err);
    assert!(waited < Duration::from_secs(1), "Waited {:?}", waited);

    blocker.execute_batch("ROLLBACK").unwrap();
    let admitted = sqlite
        .update("sql:locked", &|c| FixedWindow::apply(c, "sql:locked", &policy, Step::Consume(1), 0))
        .await
        .unwrap();
    assert!(admitted.admitted);
}

#[tokio::test]
async fn test_sqlite_rejects_corrupt_rows() {
    let sqlite = SqliteStorage::in_memory().unwrap();

    sqlite.put_row("neg", 5, -1, 1000).unwrap();
    let err = sqlite.load("neg").await.unwrap_err();
    assert!(matches!(err, RateLimiterError::Decode { .. }));

    sqlite.put_row("over", 5, 9, 1000).unwrap();
    let err = sqlite.load("over").await.unwrap_err();
    assert!(matches!(err, RateLimiterError::Decode { .. }));

    // A corrupt row also fails the update instead of being overwritten
    let policy = common::policy(5);
    let result = sqlite
        .update("over", &|c| FixedWindow::apply(c, "over", &policy, Step::Consume(1), 0))
        .await;
    assert!(matches!(result, Err(RateLimiterError::Decode { .. })));
}
