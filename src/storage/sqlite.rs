// src/storage/sqlite.rs

//! Relational backend on SQLite.
//!
//! One row per key, unique on `rate_key`. Updates run in an IMMEDIATE
//! transaction, which takes the database write lock before the row is read
//! and keeps it until the upsert commits. Processes sharing the database file
//! therefore serialise their read-modify-write cycles.
//!
//! Calls are synchronous and run on the calling task, so the engine timeout
//! cannot cut them short. Their wait for the database lock is bounded by
//! `busy_timeout` instead; build the config with
//! [`SqliteConfig::fit_within`] to keep that wait inside the engine timeout.
//! On a multi-threaded runtime the work runs under `block_in_place` so other
//! tasks move off the blocked worker.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task;

use crate::config::SqliteConfig;
use crate::error::{RateLimiterError, Result};
use crate::rate::{Rate, Transition};
use crate::storage::{Mutation, StorageBackend};

const SELECT_RATE: &str =
    "SELECT rate_key, rate_limit, remaining, reset FROM rate_limit WHERE rate_key = ?1";

const UPSERT_RATE: &str = "INSERT INTO rate_limit (rate_key, rate_limit, remaining, reset)
     VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT(rate_key) DO UPDATE SET
        rate_limit = excluded.rate_limit,
        remaining = excluded.remaining,
        reset = excluded.reset";

/// SQLite-backed rate storage
#[derive(Clone)]
pub struct SqliteStorage {
    // rusqlite connections are not Sync; the mutex also orders callers within
    // this process before SQLite's own lock orders processes
    conn: Arc<Mutex<Connection>>,
    config: SqliteConfig,
}

impl fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("path", &self.config.path)
            .finish()
    }
}

impl SqliteStorage {
    /// Opens (or creates) the database and its table
    pub fn open(config: SqliteConfig) -> Result<Self> {
        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(config.busy_timeout)?;
        if config.path != ":memory:" {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }

        conn.execute(
            "CREATE TABLE IF NOT EXISTS rate_limit (
                rate_key TEXT PRIMARY KEY,
                rate_limit INTEGER NOT NULL,
                remaining INTEGER NOT NULL,
                reset INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    /// Private in-memory database, mostly for tests
    pub fn in_memory() -> Result<Self> {
        Self::open(SqliteConfig::new(":memory:"))
    }

    /// Overwrites a row without validation, for corruption tests and repairs
    pub fn put_row(&self, key: &str, limit: i64, remaining: i64, reset: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(UPSERT_RATE, params![key, limit, remaining, reset])?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RateLimiterError::Internal("sqlite connection lock poisoned".to_string()))
    }
}

// block_in_place panics on a current-thread runtime, where blocking the one
// worker is unavoidable anyway
fn run_blocking<T>(work: impl FnOnce() -> T) -> T {
    let multi_thread = Handle::try_current()
        .map(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
        .unwrap_or(false);
    if multi_thread {
        task::block_in_place(work)
    } else {
        work()
    }
}

// Columns are signed; anything negative or inconsistent is corruption
fn rate_from_row(key: &str, row: (String, i64, i64, i64)) -> Result<Rate> {
    let (stored_key, limit, remaining, reset) = row;
    let column = |name: &str, value: i64| {
        u64::try_from(value)
            .map_err(|_| RateLimiterError::decode(key, format!("negative {}: {}", name, value)))
    };

    let rate = Rate {
        key: stored_key,
        limit: column("rate_limit", limit)?,
        remaining: column("remaining", remaining)?,
        reset: column("reset", reset)?,
    };
    rate.validate(key)?;
    Ok(rate)
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<(String, i64, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn to_column(key: &str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| {
        RateLimiterError::Internal(format!("value {} for key '{}' overflows INTEGER", value, key))
    })
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    type Config = SqliteConfig;

    async fn new(config: Self::Config) -> Result<Self> {
        Self::open(config)
    }

    async fn load(&self, key: &str) -> Result<Option<Rate>> {
        let row = run_blocking(|| -> Result<_> {
            let conn = self.lock()?;
            Ok(conn
                .query_row(SELECT_RATE, params![key], read_row)
                .optional()?)
        })?;
        row.map(|row| rate_from_row(key, row)).transpose()
    }

    async fn save(&self, rate: &Rate) -> Result<()> {
        run_blocking(|| -> Result<()> {
            let conn = self.lock()?;
            conn.execute(
                UPSERT_RATE,
                params![
                    rate.key,
                    to_column(&rate.key, rate.limit)?,
                    to_column(&rate.key, rate.remaining)?,
                    to_column(&rate.key, rate.reset)?
                ],
            )?;
            Ok(())
        })
    }

    async fn update(&self, key: &str, mutate: Mutation<'_>) -> Result<Transition> {
        run_blocking(|| -> Result<Transition> {
            let mut conn = self.lock()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let row = tx
                .query_row(SELECT_RATE, params![key], read_row)
                .optional()?;
            let current = row.map(|row| rate_from_row(key, row)).transpose()?;

            let transition = mutate(current);
            let rate = &transition.rate;
            tx.execute(
                UPSERT_RATE,
                params![
                    key,
                    to_column(key, rate.limit)?,
                    to_column(key, rate.remaining)?,
                    to_column(key, rate.reset)?
                ],
            )?;
            tx.commit()?;

            Ok(transition)
        })
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
