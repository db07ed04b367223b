//! Database access using rusqlite.
//!
//! All access goes through [`Database::with_connection`] or
//! [`Database::with_transaction`]. When an operation fails because the connection
//! itself is gone, the connection is reopened and the operation retried exactly once;
//! a second failure surfaces as [`DatabaseError::ConnectionLost`].

use crate::storage::schema::{CURRENT_VERSION, SCHEMA, SCHEMA_VERSION_TABLE};
use rusqlite::{Connection, ErrorCode, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Timestamp format of stored date-times.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date format of stored dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Database wrapper for SQLite operations.
pub struct Database {
    conn: Mutex<Connection>,
    /// `None` for in-memory databases, which cannot be reopened
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::IoError(e.to_string()))?;
        }

        let conn = open_connection(path)?;
        tracing::info!("Opened database at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
        initialize(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Run `op` against the connection, reconnecting and retrying once if it was lost.
    pub fn with_connection<T, F>(&self, op: F) -> Result<T, DatabaseError>
    where
        F: Fn(&Connection) -> Result<T, DatabaseError>,
    {
        self.ensure_connection(|conn| op(conn))
    }

    /// Run `op` inside a transaction. Any error rolls the whole batch back.
    pub fn with_transaction<T, F>(&self, op: F) -> Result<T, DatabaseError>
    where
        F: Fn(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        self.ensure_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
            let value = op(&tx)?;
            tx.commit()
                .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
            Ok(value)
        })
    }

    fn ensure_connection<T, F>(&self, op: F) -> Result<T, DatabaseError>
    where
        F: Fn(&mut Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

        match op(&mut conn) {
            Err(DatabaseError::Disconnected(reason)) => {
                tracing::warn!("Database connection lost ({}), reconnecting", reason);

                let Some(path) = &self.path else {
                    return Err(DatabaseError::ConnectionLost(reason));
                };
                *conn = open_connection(path)
                    .map_err(|e| DatabaseError::ConnectionLost(e.to_string()))?;

                op(&mut conn).map_err(|e| match e {
                    DatabaseError::Disconnected(reason) => DatabaseError::ConnectionLost(reason),
                    other => other,
                })
            }
            result => result,
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection, DatabaseError> {
    let conn = Connection::open(path).map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
    initialize(&conn)?;
    Ok(conn)
}

/// Create the schema or migrate it to the current version.
fn initialize(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(SCHEMA_VERSION_TABLE)
        .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

    if current_version < 1 {
        conn.execute_batch(SCHEMA)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
            [CURRENT_VERSION],
        )
        .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        tracing::info!("Database migrated to version {}", CURRENT_VERSION);
    }

    Ok(())
}

/// Whether a SQLite error means the connection itself is unusable.
pub fn is_connection_error(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::CannotOpen | ErrorCode::SystemIoFailure | ErrorCode::NotADatabase
            )
    )
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Connection dropped during an operation; retried once internally
    #[error("Database disconnected: {0}")]
    Disconnected(String),

    #[error("Database connection lost: {0}")]
    ConnectionLost(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Two records hold different identifiers for the same platform
    #[error("Identity conflict: {0}")]
    Conflict(String),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(error: rusqlite::Error) -> Self {
        if is_connection_error(&error) {
            return DatabaseError::Disconnected(error.to_string());
        }
        match error {
            rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound(error.to_string()),
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                DatabaseError::ConstraintViolation(error.to_string())
            }
            other => DatabaseError::QueryFailed(other.to_string()),
        }
    }
}
