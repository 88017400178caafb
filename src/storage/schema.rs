//! Schema versioning and migrations.
//!
//! The schema version lives in `PRAGMA user_version`, not in a table. A file
//! is in one of these states:
//!
//! | State | Version | Meaning |
//! |-------|---------|---------|
//! | [`SchemaState::Uninitialized`] | 0 | new or empty file, no table |
//! | [`SchemaState::Current`] | [`SCHEMA_VERSION`] | ready for use |
//! | [`SchemaState::Stale`] | below current | needs an explicit [`migrate`] |
//! | [`SchemaState::Newer`] | above current | written by a newer build, unusable |
//!
//! [`open`] only ever initializes brand-new files. Stale files are refused
//! until [`migrate`] is called, so format drift never happens behind the
//! caller's back.

use crate::{Error, Result};
use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior, params};

/// Row id of the root entry.
pub const ROOT_ID: i64 = 1;

/// A single schema migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version reached after applying (sequential, starting at 1).
    pub version: u32,
    /// Human-readable description.
    pub description: &'static str,
    /// SQL to apply, possibly several statements.
    pub sql: &'static str,
    /// Data seeding to run after `sql`, inside the same transaction.
    pub seed: Option<fn(&Connection) -> Result<()>>,
}

/// All migrations, in order.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "entries table with lookup indexes and root entry",
    sql: "CREATE TABLE entries (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            parent INTEGER NOT NULL DEFAULT 0,
            is_value INTEGER NOT NULL DEFAULT 0,
            value TEXT NOT NULL DEFAULT '',
            last_update_us INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_parent_name ON entries(parent, name);
        CREATE INDEX IF NOT EXISTS idx_entries_parent ON entries(parent);",
    seed: Some(seed_root),
}];

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: u32 = max_version(MIGRATIONS);

/// Maximum version across a set of migrations.
#[must_use]
pub const fn max_version(migrations: &[Migration]) -> u32 {
    let mut max = 0;
    let mut i = 0;
    while i < migrations.len() {
        if migrations[i].version > max {
            max = migrations[i].version;
        }
        i += 1;
    }
    max
}

/// Schema state of a database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    /// Version 0: nothing created yet.
    Uninitialized,
    /// Version matches [`SCHEMA_VERSION`].
    Current,
    /// Older than [`SCHEMA_VERSION`].
    Stale(u32),
    /// Newer than [`SCHEMA_VERSION`].
    Newer(u32),
}

impl SchemaState {
    /// Classifies a stored version against `supported`.
    #[must_use]
    pub const fn classify(found: u32, supported: u32) -> Self {
        if found == 0 {
            Self::Uninitialized
        } else if found == supported {
            Self::Current
        } else if found < supported {
            Self::Stale(found)
        } else {
            Self::Newer(found)
        }
    }
}

/// Reads the stored schema version.
pub fn version(conn: &Connection) -> Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| Error::storage("read_schema_version", e))
}

/// Reads and classifies the stored schema version.
pub fn state(conn: &Connection) -> Result<SchemaState> {
    Ok(SchemaState::classify(version(conn)?, SCHEMA_VERSION))
}

/// Prepares a freshly opened file for use.
///
/// Returns `true` if the schema was created. Fails with
/// [`Error::SchemaMismatch`] for stale or newer files.
pub fn open(conn: &mut Connection) -> Result<bool> {
    match state(conn)? {
        SchemaState::Uninitialized => {
            run_migrations(conn, MIGRATIONS)?;
            Ok(true)
        },
        SchemaState::Current => Ok(false),
        SchemaState::Stale(found) | SchemaState::Newer(found) => Err(Error::SchemaMismatch {
            found,
            supported: SCHEMA_VERSION,
        }),
    }
}

/// Brings the file up to [`SCHEMA_VERSION`].
///
/// Idempotent: returns `false` when the file is already current. Files newer
/// than this build cannot be downgraded and fail with
/// [`Error::SchemaMismatch`].
pub fn migrate(conn: &mut Connection) -> Result<bool> {
    run_migrations(conn, MIGRATIONS)
}

/// Applies every migration above the stored version in one immediate
/// transaction, stamping the final version before commit.
///
/// Returns `true` if anything was applied.
pub fn run_migrations(conn: &mut Connection, migrations: &[Migration]) -> Result<bool> {
    let supported = max_version(migrations);
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| Error::storage("migration_begin_tx", e))?;

    let found = version(&tx)?;
    if found > supported {
        return Err(Error::SchemaMismatch { found, supported });
    }
    if found == supported {
        return Ok(false);
    }

    for migration in migrations.iter().filter(|m| m.version > found) {
        tx.execute_batch(migration.sql).map_err(|e| {
            Error::storage(
                &format!("migration_v{}: {}", migration.version, migration.description),
                e,
            )
        })?;
        if let Some(seed) = migration.seed {
            seed(&tx)?;
        }
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "Applied migration"
        );
    }

    tx.pragma_update(None, "user_version", supported)
        .map_err(|e| Error::storage("stamp_schema_version", e))?;
    tx.commit()
        .map_err(|e| Error::storage("migration_commit", e))?;

    Ok(true)
}

fn seed_root(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO entries (id, name, parent, is_value, value, last_update_us)
         VALUES (?1, '', 0, 0, '', ?2)",
        params![ROOT_ID, Utc::now().timestamp_micros()],
    )
    .map_err(|e| Error::storage("insert_root_entry", e))?;
    Ok(())
}
