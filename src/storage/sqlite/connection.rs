//! Guarded connection handling.
//!
//! A store owns exactly one `Mutex<Connection>`. Holding the guard is what
//! makes an operation exclusive within the process; the transaction opened
//! under it is what makes the operation atomic.

use crate::config::StoreConfig;
use crate::{Error, Result};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const JOURNAL_MODES: &[&str] = &["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];
const SYNCHRONOUS_MODES: &[&str] = &["OFF", "NORMAL", "FULL", "EXTRA"];

/// Acquires the store guard, recovering from poisoning.
///
/// A panic inside a previous critical section drops its transaction, which
/// rolls it back, so the connection itself is still consistent.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("store mutex was poisoned, recovering");
            metrics::counter!("kvtree_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Applies the configured pragmas to a freshly opened connection.
///
/// # Configuration Applied
///
/// - **`journal_mode`**: `WAL` by default; in-memory databases stay in `memory` mode
/// - **`synchronous`**: `NORMAL` by default
/// - **`busy_timeout`**: how long to wait on another process's lock before failing
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for an unknown journal or synchronous mode,
/// and [`Error::StorageFailure`] if a pragma cannot be applied.
pub fn configure_connection(conn: &Connection, config: &StoreConfig) -> Result<()> {
    let journal_mode = config.journal_mode.to_uppercase();
    if !JOURNAL_MODES.contains(&journal_mode.as_str()) {
        return Err(Error::InvalidInput(format!(
            "unknown journal_mode '{}'",
            config.journal_mode
        )));
    }
    let synchronous = config.synchronous.to_uppercase();
    if !SYNCHRONOUS_MODES.contains(&synchronous.as_str()) {
        return Err(Error::InvalidInput(format!(
            "unknown synchronous mode '{}'",
            config.synchronous
        )));
    }

    // journal_mode answers with the mode actually in effect
    let effective: String = conn
        .pragma_update_and_check(None, "journal_mode", &journal_mode, |row| row.get(0))
        .map_err(|e| Error::storage("pragma_journal_mode", e))?;
    conn.pragma_update(None, "synchronous", &synchronous)
        .map_err(|e| Error::storage("pragma_synchronous", e))?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|e| Error::storage("busy_timeout", e))?;

    tracing::debug!(
        journal_mode = %effective,
        synchronous = %synchronous,
        busy_timeout_ms = config.busy_timeout_ms,
        "Configured connection"
    );
    Ok(())
}
