//! ACID transaction helpers

use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Execute operation within ACID transaction
///
/// Commits when the closure returns `Ok`; any `Err` drops the transaction,
/// which rolls it back. The error type is the caller's, so domain errors
/// raised inside the closure come out unchanged.
///
/// Writers use `TransactionBehavior::Immediate` so the write lock is taken
/// up front and concurrent writers queue on `busy_timeout`.
pub fn execute_in_transaction<F, T, E>(
    conn: &mut Connection,
    behavior: TransactionBehavior,
    operation: F,
) -> Result<T, E>
where
    F: FnOnce(&Transaction) -> Result<T, E>,
    E: From<rusqlite::Error>,
{
    let tx = conn.transaction_with_behavior(behavior)?;

    match operation(&tx) {
        Ok(result) => {
            tx.commit()?;
            Ok(result)
        }
        // Rollback happens via Drop
        Err(e) => Err(e),
    }
}

/// Run a multi-statement read against one snapshot.
///
/// Under WAL each autocommit statement sees the latest commit, so a reader
/// issuing several SELECTs can interleave with a writer. A DEFERRED
/// transaction pins the snapshot at its first read.
pub fn execute_read_snapshot<F, T, E>(conn: &mut Connection, operation: F) -> Result<T, E>
where
    F: FnOnce(&Connection) -> Result<T, E>,
    E: From<rusqlite::Error>,
{
    execute_in_transaction(conn, TransactionBehavior::Deferred, |tx| operation(tx))
}
