//! Connection pooling and pragma configuration

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;

use super::{DbError, Result};

/// Pooled SQLite connections shared by every request.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Initialize connection pool with pragmas applied to every connection
///
/// - WAL mode so readers never block the single writer
/// - Foreign key enforcement (cascading deletes depend on it)
/// - `busy_timeout` so concurrent IMMEDIATE transactions queue instead of
///   failing with `SQLITE_BUSY`
pub fn initialize_pool(db_path: &Path, pool_size: u32, busy_timeout: Duration) -> Result<DbPool> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            DbError::Pool(format!(
                "failed to create db directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    let manager = SqliteConnectionManager::file(db_path)
        .with_init(move |conn| apply_pragmas(conn, busy_timeout));

    let pool = Pool::builder()
        .max_size(pool_size)
        .build(manager)
        .map_err(|e| DbError::Pool(format!("Failed to build pool: {e}")))?;

    let conn = pool
        .get()
        .map_err(|e| DbError::Pool(format!("Failed to get connection: {e}")))?;
    verify_pragmas(&conn)?;

    tracing::debug!(
        path = %db_path.display(),
        pool_size,
        "SQLite pool initialized"
    );

    Ok(pool)
}

/// Apply per-connection pragmas
fn apply_pragmas(
    conn: &mut rusqlite::Connection,
    busy_timeout: Duration,
) -> std::result::Result<(), rusqlite::Error> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )
}

/// Verify critical pragmas are applied
fn verify_pragmas(conn: &rusqlite::Connection) -> Result<()> {
    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !journal_mode.eq_ignore_ascii_case("wal") {
        return Err(DbError::Pool(format!(
            "expected WAL journal mode, got {journal_mode}"
        )));
    }

    let foreign_keys: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    if foreign_keys != 1 {
        return Err(DbError::Pool("foreign keys are not enabled".to_string()));
    }

    Ok(())
}
