//! Database layer for the petition engine
//!
//! This module provides:
//! - Connection pooling (r2d2-sqlite) with WAL + foreign-key pragmas
//! - ACID transaction helpers
//! - Schema migrations
//! - An async bridge for running store calls off the runtime threads

pub mod async_wrapper;
pub mod connection;
pub mod migrations;
pub mod transactions;

pub use async_wrapper::with_connection;
pub use connection::{DbPool, initialize_pool};
pub use transactions::{execute_in_transaction, execute_read_snapshot};

/// Database module result type
pub type Result<T> = std::result::Result<T, DbError>;

/// Database error types
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Migration error: {0}")]
    Migration(String),
}

/// Whether a SQLite failure is a UNIQUE / PRIMARY KEY constraint violation.
///
/// Foreign-key and CHECK failures share the same primary code, so the
/// extended code is inspected.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

/// Open an in-memory connection with pragmas and schema applied.
#[cfg(test)]
pub(crate) fn test_connection() -> rusqlite::Connection {
    #![allow(clippy::expect_used)]
    let mut conn = rusqlite::Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .expect("enable foreign keys");
    migrations::migrate_to_latest(&mut conn).expect("migrate");
    conn
}
