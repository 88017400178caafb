//! The store handle.
//!
//! A [`Store`] owns one `SQLite` connection behind a mutex. Every public
//! operation takes the mutex, runs inside a single transaction and commits
//! only on success; on error the transaction is dropped, which rolls it back,
//! so callers never observe partial writes. Two stores opened on the same file
//! are serialized only by `SQLite`'s own locking.

use crate::config::StoreConfig;
use crate::convert::Stringable;
use crate::hooks::{HookDispatch, HookGate};
use crate::io::json;
use crate::models::Entry;
use crate::path;
use crate::storage::sqlite::{acquire_lock, configure_connection, record_operation_metrics};
use crate::storage::{MergeStats, entries, schema, traverse};
use crate::{Error, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::instrument;

/// Handle to a hierarchical key-value store.
///
/// `Store` is `Send + Sync`; share it between threads with an [`Arc`].
pub struct Store {
    /// Protected by Mutex because `rusqlite::Connection` is not `Sync`.
    conn: Mutex<Connection>,
    /// Path to the database file (None for in-memory).
    db_path: Option<PathBuf>,
    hooks: HookGate,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("db_path", &self.db_path)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Opens the store at `path` with default settings, creating the file and
    /// its parent directories if needed.
    ///
    /// Returns the store and whether the schema was created by this call.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if `path` is empty
    /// - [`Error::SchemaMismatch`] if the file has a different schema version
    /// - [`Error::StorageFailure`] if the file cannot be opened
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, bool)> {
        Self::open_with_config(&StoreConfig::default().with_db_path(path.as_ref()))
    }

    /// Opens the store at `config.db_path`, applying the configured pragmas
    /// before the schema is checked.
    #[instrument(skip(config), fields(operation = "open", db_path = %config.db_path.display()))]
    pub fn open_with_config(config: &StoreConfig) -> Result<(Self, bool)> {
        let mut conn = open_connection(config)?;
        let created = schema::open(&mut conn)?;

        if created {
            tracing::info!(db_path = %config.db_path.display(), "Created store");
        } else {
            tracing::debug!(db_path = %config.db_path.display(), "Opened store");
        }

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(config.db_path.clone()),
            hooks: HookGate::default(),
        };
        Ok((store, created))
    }

    /// Creates an empty in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()
            .map_err(|e| Error::storage("open_sqlite_in_memory", e))?;
        configure_connection(&conn, &StoreConfig::default())?;
        schema::open(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
            hooks: HookGate::default(),
        })
    }

    /// Brings the file at `path` to the current schema version, creating it
    /// if it does not exist.
    ///
    /// Returns `true` if any migration ran. Safe to call on a current file.
    ///
    /// # Errors
    ///
    /// [`Error::SchemaMismatch`] if the file was written by a newer build.
    #[instrument(skip(path), fields(operation = "migrate", db_path = %path.as_ref().display()))]
    pub fn migrate(path: impl AsRef<Path>) -> Result<bool> {
        let config = StoreConfig::default().with_db_path(path.as_ref());
        let mut conn = open_connection(&config)?;
        let applied = schema::migrate(&mut conn)?;
        if applied {
            tracing::info!(version = schema::SCHEMA_VERSION, "Migrated store");
        }
        Ok(applied)
    }

    /// Closes the connection, reporting any error from `SQLite`.
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        conn.close()
            .map_err(|(_, e)| Error::storage("close_sqlite", e))
    }

    /// Replaces the hook dispatcher. The on/off switch keeps its state.
    #[must_use]
    pub fn with_hooks(mut self, dispatch: Arc<dyn HookDispatch>) -> Self {
        let enabled = self.hooks.is_enabled();
        self.hooks = HookGate::new(dispatch);
        self.hooks.set_enabled(enabled);
        self
    }

    /// Turns hook dispatch on or off for every subsequent write.
    pub fn set_hooks_enabled(&self, enabled: bool) {
        self.hooks.set_enabled(enabled);
    }

    /// Returns true if hooks are dispatched.
    pub fn hooks_enabled(&self) -> bool {
        self.hooks.is_enabled()
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Reads the schema version stamped in the file.
    pub fn schema_version(&self) -> Result<u32> {
        let conn = acquire_lock(&self.conn);
        schema::version(&conn)
    }

    /// Schema version this build reads and writes.
    #[must_use]
    pub const fn supported_schema_version() -> u32 {
        schema::SCHEMA_VERSION
    }

    fn with_tx<T, E>(
        &self,
        operation: &'static str,
        behavior: TransactionBehavior,
        f: impl FnOnce(&Transaction<'_>) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        let start = Instant::now();
        let result = (|| -> std::result::Result<T, E> {
            let mut conn = acquire_lock(&self.conn);
            let tx = conn
                .transaction_with_behavior(behavior)
                .map_err(|e| Error::storage("begin_transaction", e))?;

            // Dropping `tx` on error rolls back.
            let value = f(&tx)?;

            tx.commit()
                .map_err(|e| Error::storage("commit_transaction", e))?;
            Ok(value)
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics(operation, start, status);
        result
    }

    fn read<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        self.with_tx(operation, TransactionBehavior::Deferred, f)
    }

    fn write<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        self.with_tx(operation, TransactionBehavior::Immediate, f)
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// Returns the value at `path`.
    ///
    /// # Errors
    ///
    /// [`Error::PathNotFound`] or [`Error::PathIsNotAValue`].
    #[instrument(skip(self), fields(operation = "get_value"))]
    pub fn get(&self, path: &str) -> Result<String> {
        self.read("get_value", |tx| entries::get_value(tx, path))
    }

    /// Returns the value at `path`, failing with [`Error::InvalidInput`] if
    /// it is the empty string.
    #[instrument(skip(self), fields(operation = "get_non_empty"))]
    pub fn get_non_empty(&self, path: &str) -> Result<String> {
        let value = self.read("get_value", |tx| entries::get_value(tx, path))?;
        if value.is_empty() {
            return Err(Error::InvalidInput(format!(
                "value at '{}' is empty",
                path::normalize(path)
            )));
        }
        Ok(value)
    }

    /// Writes `value` at `path`, creating missing ancestors.
    ///
    /// # Errors
    ///
    /// - [`Error::PathInvalid`] for the root or when an ancestor is a value
    /// - [`Error::PathIsNotAValue`] when `path` is a container
    /// - [`Error::HookRejected`] when the pre-set hook vetoes the write
    #[instrument(skip(self, value), fields(operation = "set_value"))]
    pub fn set(&self, path: &str, value: &str) -> Result<()> {
        self.write("set_value", |tx| {
            entries::set_value(tx, &self.hooks, path, value, false, false)
        })
    }

    /// Writes `value` at `path`, replacing any container at `path` and any
    /// value standing where an ancestor container is needed.
    #[instrument(skip(self, value), fields(operation = "force_value"))]
    pub fn force(&self, path: &str, value: &str) -> Result<()> {
        self.write("force_value", |tx| {
            entries::set_value(tx, &self.hooks, path, value, true, false)
        })
    }

    /// Reads the value at `path` and parses it as `T`.
    ///
    /// # Errors
    ///
    /// As [`Store::get`], plus [`Error::Conversion`].
    pub fn get_as<T: Stringable>(&self, path: &str) -> Result<T> {
        T::from_stored(&self.get(path)?)
    }

    /// Writes `value` rendered with [`Stringable::to_stored`].
    pub fn set_as<T: Stringable>(&self, path: &str, value: &T) -> Result<()> {
        self.set(path, &value.to_stored())
    }

    /// Forces `value` rendered with [`Stringable::to_stored`].
    pub fn force_as<T: Stringable>(&self, path: &str, value: &T) -> Result<()> {
        self.force(path, &value.to_stored())
    }

    // ------------------------------------------------------------------
    // Tree
    // ------------------------------------------------------------------

    /// Returns the whole subtree at `path`.
    #[instrument(skip(self), fields(operation = "get_entry"))]
    pub fn get_entry(&self, path: &str) -> Result<Entry> {
        self.read("get_entry", |tx| entries::get_entry_depth(tx, path, -1))
    }

    /// Returns the subtree at `path`, at most `depth` levels deep. `0` returns
    /// the entry alone; negative depths are unlimited.
    #[instrument(skip(self), fields(operation = "get_entry_depth"))]
    pub fn get_entry_depth(&self, path: &str, depth: i32) -> Result<Entry> {
        self.read("get_entry_depth", |tx| {
            entries::get_entry_depth(tx, path, depth)
        })
    }

    /// Returns true if an entry exists at `path`.
    ///
    /// Only storage failures are reported as errors.
    #[instrument(skip(self), fields(operation = "exists"))]
    pub fn exists(&self, path: &str) -> Result<bool> {
        self.read("exists", |tx| entries::exists(tx, path))
    }

    /// Returns true if a value entry exists at `path`.
    #[instrument(skip(self), fields(operation = "is_value"))]
    pub fn is_value(&self, path: &str) -> Result<bool> {
        self.read("is_value", |tx| entries::path_is_value(tx, path))
    }

    /// Walks the subtree at `path` breadth-first inside one write transaction.
    ///
    /// See [`traverse::recurse`] for ordering and depth semantics. The
    /// callback receives the transaction and may modify the store through
    /// [`crate::storage::entries`]; all of it commits or rolls back together.
    pub fn recurse<F, E>(
        &self,
        path: &str,
        depth: i32,
        callback: F,
    ) -> std::result::Result<usize, E>
    where
        F: FnMut(&Transaction<'_>, &Entry, Option<&Entry>, u32) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        self.with_tx("recurse", TransactionBehavior::Immediate, |tx| {
            traverse::recurse(tx, path, depth, callback)
        })
    }

    /// Deletes the entry at `path` and its subtree, returning the number of
    /// entries removed.
    ///
    /// # Errors
    ///
    /// [`Error::PathInvalid`] for the root, [`Error::PathNotFound`] if absent.
    #[instrument(skip(self), fields(operation = "delete_entry"))]
    pub fn delete(&self, path: &str) -> Result<usize> {
        self.write("delete_entry", |tx| entries::delete_entry(tx, path))
    }

    /// Deletes everything below the root. Returns the number of entries
    /// removed.
    #[instrument(skip(self), fields(operation = "wipe"))]
    pub fn wipe(&self) -> Result<usize> {
        let removed = self.with_tx("wipe", TransactionBehavior::Immediate, |tx| {
            let mut removed = 0;
            traverse::recurse(tx, "", 1, |tx, node, _, level| {
                if level == 1 {
                    removed += entries::delete_entry(tx, &node.path)?;
                }
                Ok::<(), Error>(())
            })?;
            Ok::<usize, Error>(removed)
        })?;
        tracing::info!(removed, "Wiped store");
        Ok(removed)
    }

    /// Applies `entry` onto the store from the root. See
    /// [`entries::set_root_entry`].
    #[instrument(skip(self, entry), fields(operation = "set_root_entry", entries = entry.node_count()))]
    pub fn set_root_entry(
        &self,
        entry: &Entry,
        force: bool,
        skip_hooks: bool,
        only_merge: bool,
    ) -> Result<MergeStats> {
        let stats = self.write("set_root_entry", |tx| {
            entries::set_root_entry(tx, &self.hooks, entry, force, skip_hooks, only_merge)
        })?;
        tracing::debug!(
            inserted = stats.inserted,
            updated = stats.updated,
            replaced = stats.replaced,
            skipped = stats.skipped,
            "Applied entry tree"
        );
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // JSON
    // ------------------------------------------------------------------

    /// Exports the subtree at `path` in the values format.
    #[instrument(skip(self), fields(operation = "values_to_json"))]
    pub fn values_to_json(&self, path: &str) -> Result<String> {
        let entry = self.read("values_to_json", |tx| {
            entries::get_entry_depth(tx, path, -1)
        })?;
        json::values_to_json(&entry)
    }

    /// Exports the subtree at `path` in the entries format.
    #[instrument(skip(self), fields(operation = "entry_to_json"))]
    pub fn entry_to_json(&self, path: &str) -> Result<String> {
        let entry = self.read("entry_to_json", |tx| {
            entries::get_entry_depth(tx, path, -1)
        })?;
        json::entry_to_json(&entry)
    }

    /// Imports a values-format document. Hooks are skipped and conflicting
    /// entries are replaced, unless `only_merge` restricts the import to
    /// absent paths. Returns the number of values written.
    #[instrument(skip(self, reader), fields(operation = "set_values_from_json"))]
    pub fn set_values_from_json(&self, reader: impl Read, only_merge: bool) -> Result<usize> {
        let values = json::parse_values(reader)?;
        let written = self.write("set_values_from_json", |tx| {
            json::apply_values(tx, &self.hooks, &values, only_merge)
        })?;
        tracing::info!(written, only_merge, "Imported values");
        Ok(written)
    }

    /// Imports an entries-format document with force, hooks skipped.
    #[instrument(skip(self, reader), fields(operation = "set_entries_from_json"))]
    pub fn set_entries_from_json(&self, reader: impl Read, only_merge: bool) -> Result<MergeStats> {
        let entry = json::parse_entries(reader)?;
        let stats = self.write("set_entries_from_json", |tx| {
            entries::set_root_entry(tx, &self.hooks, &entry, true, true, only_merge)
        })?;
        tracing::info!(
            inserted = stats.inserted,
            updated = stats.updated,
            replaced = stats.replaced,
            skipped = stats.skipped,
            only_merge,
            "Imported entries"
        );
        Ok(stats)
    }
}

fn open_connection(config: &StoreConfig) -> Result<Connection> {
    if config.db_path.as_os_str().is_empty() {
        return Err(Error::InvalidInput("database path is empty".to_string()));
    }
    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::storage("create_db_dir", e))?;
    }

    let conn = Connection::open(&config.db_path).map_err(|e| Error::storage("open_sqlite", e))?;
    configure_connection(&conn, config)?;
    Ok(conn)
}
