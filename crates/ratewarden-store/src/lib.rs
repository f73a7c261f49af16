//! # Ratewarden Store
//!
//! DuckDB-based durable tier for the ratewarden rate cache.
//!
//! ## Overview
//!
//! Consolidated rates are written here alongside the in-process cache tier so
//! that freshly ingested rates survive process restarts and can be shared by
//! sibling workers pointed at the same database file.
//!
//! - Rates are keyed by pair symbol (`"EUR/USD"`), one row per pair
//! - Payloads are opaque JSON documents produced by the core crate
//! - An optional expiry column gives streaming ticks a short lifetime while
//!   consolidated snapshots persist until replaced
//! - All statements are parameterized; pair symbols are never interpolated
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ratewarden_store::RateStore;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), ratewarden_store::StoreError> {
//!     let store = RateStore::open("rates.duckdb")?;
//!     store.put("EUR/USD", r#"{"rate":0.925}"#, 92.0, None)?;
//!     store.put("GBP/USD", r#"{"rate":1.27}"#, 85.0, Some(Duration::from_secs(60)))?;
//!
//!     if let Some(stored) = store.get("EUR/USD")? {
//!         println!("payload: {}", stored.payload);
//!     }
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use duckdb::{params, Connection};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] duckdb::Error),

    /// The stored row is malformed (schema drift or manual edits).
    #[error("corrupt rate row for pair '{pair}': {reason}")]
    CorruptRow { pair: String, reason: String },
}

/// One persisted rate row as returned by [`RateStore::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRate {
    pub pair: String,
    /// JSON document written by the core crate.
    pub payload: String,
    pub quality_score: f64,
    /// Unix seconds at write time.
    pub updated_at: i64,
}

/// Durable rate store backed by a single DuckDB connection.
///
/// The connection is guarded by a mutex; callers issue short single-row
/// statements so contention stays negligible next to network I/O.
pub struct RateStore {
    conn: Mutex<Connection>,
}

impl RateStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store. Used by tests and by deployments that opt out
    /// of cross-process sharing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rates (
                pair        TEXT PRIMARY KEY,
                payload     TEXT NOT NULL,
                quality     DOUBLE NOT NULL,
                updated_at  BIGINT NOT NULL,
                expires_at  BIGINT
            );",
        )?;
        Ok(())
    }

    /// Upsert the rate row for a pair.
    ///
    /// `ttl = None` means the row lives until the next write for the same
    /// pair; `Some(ttl)` marks the row expired once the interval elapses.
    pub fn put(
        &self,
        pair: &str,
        payload: &str,
        quality_score: f64,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let now = unix_now();
        let expires_at = ttl.map(|ttl| now + ttl.as_secs() as i64);
        let conn = self.conn.lock().expect("store lock is not poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO rates (pair, payload, quality, updated_at, expires_at)
             VALUES (?, ?, ?, ?, ?)",
            params![pair, payload, quality_score, now, expires_at],
        )?;
        Ok(())
    }

    /// Fetch the rate row for a pair, treating expired rows as absent.
    pub fn get(&self, pair: &str) -> Result<Option<StoredRate>, StoreError> {
        let now = unix_now();
        let conn = self.conn.lock().expect("store lock is not poisoned");
        let mut stmt = conn.prepare(
            "SELECT payload, quality, updated_at, expires_at FROM rates WHERE pair = ?",
        )?;
        let mut rows = stmt.query(params![pair])?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let payload: String = row.get(0)?;
        let quality_score: f64 = row.get(1)?;
        let updated_at: i64 = row.get(2)?;
        let expires_at: Option<i64> = row.get(3)?;

        if quality_score.is_nan() {
            return Err(StoreError::CorruptRow {
                pair: pair.to_owned(),
                reason: String::from("quality column is NaN"),
            });
        }

        if let Some(expires_at) = expires_at {
            if expires_at <= now {
                return Ok(None);
            }
        }

        Ok(Some(StoredRate {
            pair: pair.to_owned(),
            payload,
            quality_score,
            updated_at,
        }))
    }

    /// Delete rows whose expiry has passed. Returns the number of rows removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = unix_now();
        let conn = self.conn.lock().expect("store lock is not poisoned");
        let removed = conn.execute(
            "DELETE FROM rates WHERE expires_at IS NOT NULL AND expires_at <= ?",
            params![now],
        )?;
        Ok(removed)
    }

    /// Cheap liveness probe used by the orchestrator during startup and by the
    /// operational status surface.
    pub fn ping(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store lock is not poisoned");
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips_payload() {
        let store = RateStore::open_in_memory().expect("open store");
        store
            .put("EUR/USD", r#"{"rate":0.925}"#, 92.0, None)
            .expect("put");

        let stored = store.get("EUR/USD").expect("get").expect("row present");
        assert_eq!(stored.pair, "EUR/USD");
        assert_eq!(stored.payload, r#"{"rate":0.925}"#);
        assert!((stored.quality_score - 92.0).abs() < f64::EPSILON);
    }

    #[test]
    fn second_put_replaces_first() {
        let store = RateStore::open_in_memory().expect("open store");
        store.put("EUR/USD", "old", 80.0, None).expect("put");
        store.put("EUR/USD", "new", 90.0, None).expect("put");

        let stored = store.get("EUR/USD").expect("get").expect("row present");
        assert_eq!(stored.payload, "new");
    }

    #[test]
    fn expired_rows_read_as_absent_and_purge() {
        let store = RateStore::open_in_memory().expect("open store");
        store
            .put("GBP/USD", "tick", 70.0, Some(Duration::ZERO))
            .expect("put");

        assert!(store.get("GBP/USD").expect("get").is_none());
        assert_eq!(store.purge_expired().expect("purge"), 1);
        // A second purge has nothing left to remove.
        assert_eq!(store.purge_expired().expect("purge"), 0);
    }

    #[test]
    fn missing_pair_is_none() {
        let store = RateStore::open_in_memory().expect("open store");
        assert!(store.get("AUD/NZD").expect("get").is_none());
    }

    #[test]
    fn survives_reopen_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rates.duckdb");

        {
            let store = RateStore::open(&path).expect("open store");
            store.put("USD/JPY", "snapshot", 88.0, None).expect("put");
        }

        let reopened = RateStore::open(&path).expect("reopen store");
        let stored = reopened.get("USD/JPY").expect("get").expect("row present");
        assert_eq!(stored.payload, "snapshot");
    }
}
