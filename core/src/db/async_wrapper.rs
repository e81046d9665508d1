//! Async database wrapper for bridging sync SQLite with async Tokio runtime
//!
//! SQLite calls are synchronous. `with_connection` checks a connection out of
//! the pool and runs the closure on the blocking thread pool so request tasks
//! never stall a runtime worker.

use super::{DbError, DbPool};
use rusqlite::Connection;

/// Execute sync database operation in async context using spawn_blocking
///
/// The closure's error type must absorb pool and join failures, so domain
/// callers pass their own error (anything `From<DbError>`).
pub async fn with_connection<F, T, E>(pool: &DbPool, f: F) -> Result<T, E>
where
    F: FnOnce(&mut Connection) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<DbError> + Send + 'static,
{
    let pool = pool.clone();

    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| E::from(DbError::Pool(format!("Failed to get connection: {e}"))))?;

        f(&mut conn)
    })
    .await
    .map_err(|e| E::from(DbError::Transaction(format!("Task join error: {e}"))))?
}
