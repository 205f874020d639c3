//! Database layer for the clinic ledger.
//!
//! Each submodule exposes free functions over `&Connection`, so the same code
//! runs inside a multi-entity transaction or on a plain connection, plus
//! `impl Database` conveniences for standalone reads and writes.

pub mod catalog;
pub mod events;
pub mod lots;
pub mod patients;
mod schema;
pub mod transactions;
pub mod visits;

pub use events::{ChangeEvent, EntityType};
pub use schema::*;

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use thiserror::Error;

use crate::config::StorageConfig;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Stale {entity} {id}: expected version {expected}, found {actual}")]
    StaleVersion {
        entity: &'static str,
        id: String,
        expected: i64,
        actual: i64,
    },
}

impl DbError {
    /// Lock contention or an optimistic-lock miss; the operation may be retried.
    pub fn is_conflict(&self) -> bool {
        match self {
            DbError::StaleVersion { .. } => true,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Errors produced inside [`Database::write_transaction`].
pub trait RetryableError: From<DbError> {
    /// Whether a fresh attempt could succeed.
    fn is_conflict(&self) -> bool;

    /// Error reported once retries are exhausted.
    fn conflict(attempts: u32, cause: String) -> Self;
}

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::open_with(path, &StorageConfig::default())
    }

    /// Open database at path with explicit storage settings.
    pub fn open_with<P: AsRef<Path>>(path: P, storage: &StorageConfig) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(storage.busy_timeout_ms))?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a write transaction that takes the database write lock up front.
    ///
    /// Dropping the returned transaction without committing rolls it back.
    pub fn begin_immediate(&self) -> DbResult<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    /// Run `f` in an immediate transaction and commit it.
    ///
    /// Any error rolls the whole transaction back. Conflicts (lock timeouts,
    /// stale lot versions) are retried with a fresh transaction up to
    /// `max_retries` times, then surfaced as `E::conflict`.
    pub fn write_transaction<T, E, F>(&self, max_retries: u32, mut f: F) -> Result<T, E>
    where
        E: RetryableError + std::fmt::Display,
        F: FnMut(&Transaction<'_>) -> Result<T, E>,
    {
        let mut attempt: u32 = 0;
        loop {
            let result = self.begin_immediate().map_err(E::from).and_then(|tx| {
                let value = f(&tx)?;
                tx.commit().map_err(|e| E::from(DbError::from(e)))?;
                Ok(value)
            });

            match result {
                Err(err) if err.is_conflict() => {
                    attempt += 1;
                    if attempt > max_retries {
                        tracing::warn!(attempts = attempt, error = %err, "write conflict, giving up");
                        return Err(E::conflict(attempt, err.to_string()));
                    }
                    tracing::warn!(attempt, error = %err, "write conflict, retrying");
                }
                other => return other,
            }
        }
    }
}

impl RetryableError for DbError {
    fn is_conflict(&self) -> bool {
        DbError::is_conflict(self)
    }

    fn conflict(attempts: u32, cause: String) -> Self {
        DbError::Constraint(format!("conflict after {} attempts: {}", attempts, cause))
    }
}

/// Wrap a parse failure of column `idx` as a rusqlite conversion error.
pub(crate) fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

/// Read a `YYYY-MM-DD` column.
pub(crate) fn date_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

/// Read an optional `YYYY-MM-DD` column.
pub(crate) fn optional_date_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| conversion_error(idx, e)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_schema_initialized() {
        let db = Database::open_in_memory().unwrap();

        let tables: Vec<String> = db
            .conn()
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in [
            "medicines",
            "patients",
            "visit_records",
            "visit_completions",
            "inventory_lots",
            "dispense_transactions",
            "change_events",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        {
            let tx = db.begin_immediate().unwrap();
            tx.execute(
                "INSERT INTO change_events (entity_type, entity_id, change, created_at) VALUES ('lot', 'x', 'created', 'now')",
                [],
            )
            .unwrap();
        }
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM change_events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_write_transaction_retries_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let mut attempts = 0;
        let result: DbResult<i64> = db.write_transaction(3, |tx| {
            attempts += 1;
            tx.execute(
                "INSERT INTO change_events (entity_type, entity_id, change, created_at) VALUES ('lot', 'x', 'created', 'now')",
                [],
            )?;
            if attempts < 3 {
                return Err(DbError::StaleVersion {
                    entity: "lot",
                    id: "x".into(),
                    expected: 0,
                    actual: 1,
                });
            }
            Ok(attempts)
        });
        assert_eq!(result.unwrap(), 3);

        // Failed attempts were rolled back
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM change_events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_write_transaction_gives_up() {
        let db = Database::open_in_memory().unwrap();
        let mut attempts = 0;
        let result: DbResult<()> = db.write_transaction(2, |_| {
            attempts += 1;
            Err(DbError::StaleVersion {
                entity: "lot",
                id: "x".into(),
                expected: 0,
                actual: 1,
            })
        });
        assert!(matches!(result, Err(DbError::Constraint(_))));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clinic.db");
        {
            let db = Database::open(&path).unwrap();
            db.conn()
                .execute(
                    "INSERT INTO change_events (entity_type, entity_id, change, created_at) VALUES ('lot', 'x', 'created', 'now')",
                    [],
                )
                .unwrap();
        }
        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM change_events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
