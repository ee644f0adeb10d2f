//! SQLite persistence for reference data, batches, derived records, and
//! demographic statistics.
//!
//! Query helpers are free functions over `&Connection`; [`SqliteStore`] owns
//! the single connection and hands out transactions.

pub mod batches;
pub mod demographics;
pub mod records;
pub mod reference;
pub(crate) mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::info;

/// Error enumeration for storage failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("migration v{version} failed: {reason}")]
    Migration { version: i64, reason: String },
    #[error("stored {field} has unexpected value '{value}'")]
    InvalidStored { field: &'static str, value: String },
    #[error("stored JSON could not be decoded: {0}")]
    Json(#[from] serde_json::Error),
}

/// Owner of the engine's SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run pending migrations.
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path)?;
        Self::prepare(conn)
    }

    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()?;
        Self::prepare(conn)
    }

    fn prepare(conn: Connection) -> Result<Self, RepositoryError> {
        configure_pragmas(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.conn
            .lock()
            .map_err(|_| RepositoryError::Unavailable("connection mutex poisoned".to_string()))
    }

    /// Run read or single-statement work outside an explicit transaction.
    pub fn with_connection<T>(
        &self,
        work: impl FnOnce(&Connection) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let guard = self.lock()?;
        work(&guard)
    }

    /// Run `work` inside one IMMEDIATE transaction. Commits on `Ok`, rolls back on `Err`.
    pub fn with_transaction<T, E>(
        &self,
        work: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<RepositoryError>,
    {
        let mut guard = self.lock()?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(RepositoryError::from)?;

        let value = work(&tx)?;
        tx.commit().map_err(RepositoryError::from)?;
        Ok(value)
    }
}

fn configure_pragmas(conn: &Connection) -> Result<(), RepositoryError> {
    conn.execute_batch(
        "PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout=5000;",
    )?;
    Ok(())
}

/// Apply every embedded migration newer than the stored schema version.
pub fn run_migrations(conn: &Connection) -> Result<(), RepositoryError> {
    let current_version = current_version(conn);

    let migrations: Vec<(i64, &str)> = vec![(
        1,
        include_str!("../../resources/migrations/001_initial.sql"),
    )];

    for (version, sql) in migrations {
        if version > current_version {
            info!(version, "running migration");
            conn.execute_batch(sql)
                .map_err(|error| RepositoryError::Migration {
                    version,
                    reason: error.to_string(),
                })?;
        }
    }

    Ok(())
}

/// 0 when the schema has never been created.
pub fn current_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i64>>(0)
    })
    .ok()
    .flatten()
    .unwrap_or(0)
}

/// Maps a stored enum label through its `parse` function.
pub(crate) fn decode<T>(
    field: &'static str,
    raw: String,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    parse(&raw).ok_or(RepositoryError::InvalidStored { field, value: raw })
}
