//! The entry store: tree nodes mapped onto rows.
//!
//! Each entry is one row of `entries`, identified by a surrogate `id` and
//! linked to its parent's `id`. A path is resolved one segment at a time
//! through the `(parent, name)` index, starting from the root row.
//!
//! Every function here runs inside a transaction supplied by the caller and
//! never commits or opens one itself; a failed call leaves the transaction to
//! be rolled back by its owner.
//!
//! # Invariants
//!
//! - Exactly one root row (`id = 1`, name `""`), always a container.
//! - `(parent, name)` is unique, so no two rows share a path.
//! - `is_value` is never updated in place: a type change is a delete followed
//!   by an insert.
//! - Deleting a container deletes its whole subtree.
//! - Writing a value materializes every missing ancestor container.

use crate::hooks::HookGate;
use crate::models::Entry;
use crate::path;
use crate::storage::schema::ROOT_ID;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use std::collections::{BTreeMap, VecDeque};

/// Counters reported by [`set_root_entry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Rows inserted.
    pub inserted: usize,
    /// Existing values overwritten in place.
    pub updated: usize,
    /// Existing entries deleted and recreated with the other type.
    pub replaced: usize,
    /// Subtrees left untouched because of a type conflict in merge mode.
    pub skipped: usize,
}

/// One stored row.
#[derive(Debug, Clone)]
pub(crate) struct EntryRow {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) is_value: bool,
    pub(crate) value: String,
    pub(crate) last_update_us: i64,
}

impl EntryRow {
    const COLUMNS: &'static str = "id, name, is_value, value, last_update_us";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            is_value: row.get(2)?,
            value: row.get(3)?,
            last_update_us: row.get(4)?,
        })
    }

    /// Converts to a childless entry at `path`.
    pub(crate) fn into_entry(self, path: String) -> Entry {
        Entry {
            path,
            last_update: from_micros(self.last_update_us),
            is_value: self.is_value,
            value: self.value,
            children: BTreeMap::new(),
        }
    }
}

pub(crate) fn from_micros(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_default()
}

fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// Returns true if expansion may continue below `level` for a depth limit.
/// Negative limits are unlimited.
pub(crate) fn within_depth(depth: i32, level: u32) -> bool {
    u32::try_from(depth).ok().is_none_or(|max| level < max)
}

// ---------------------------------------------------------------------------
// Row primitives
// ---------------------------------------------------------------------------

pub(crate) fn find_child(conn: &Connection, parent: i64, name: &str) -> Result<Option<EntryRow>> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT {} FROM entries WHERE parent = ?1 AND name = ?2",
            EntryRow::COLUMNS
        ))
        .map_err(|e| Error::storage("prepare_find_child", e))?;
    stmt.query_row(params![parent, name], EntryRow::from_row)
        .optional()
        .map_err(|e| Error::storage("find_child", e))
}

pub(crate) fn load_row(conn: &Connection, id: i64) -> Result<Option<EntryRow>> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT {} FROM entries WHERE id = ?1",
            EntryRow::COLUMNS
        ))
        .map_err(|e| Error::storage("prepare_load_row", e))?;
    stmt.query_row(params![id], EntryRow::from_row)
        .optional()
        .map_err(|e| Error::storage("load_row", e))
}

pub(crate) fn children_rows(conn: &Connection, parent: i64) -> Result<Vec<EntryRow>> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT {} FROM entries WHERE parent = ?1 ORDER BY name",
            EntryRow::COLUMNS
        ))
        .map_err(|e| Error::storage("prepare_children", e))?;
    let rows = stmt
        .query_map(params![parent], EntryRow::from_row)
        .map_err(|e| Error::storage("children", e))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| Error::storage("children_row", e))?);
    }
    Ok(out)
}

fn insert_row(
    conn: &Connection,
    parent: i64,
    name: &str,
    is_value: bool,
    value: &str,
    last_update_us: i64,
) -> Result<i64> {
    conn.prepare_cached(
        "INSERT INTO entries (name, parent, is_value, value, last_update_us)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .and_then(|mut stmt| stmt.execute(params![name, parent, is_value, value, last_update_us]))
    .map_err(|e| Error::storage("insert_entry", e))?;
    Ok(conn.last_insert_rowid())
}

fn update_value(conn: &Connection, id: i64, value: &str, last_update_us: i64) -> Result<()> {
    conn.prepare_cached("UPDATE entries SET value = ?1, last_update_us = ?2 WHERE id = ?3")
        .and_then(|mut stmt| stmt.execute(params![value, last_update_us, id]))
        .map_err(|e| Error::storage("update_value", e))?;
    Ok(())
}

/// Resolves a path to its row, walking from the root one segment at a time.
pub(crate) fn resolve(conn: &Connection, path: &str) -> Result<Option<EntryRow>> {
    let mut current = match load_row(conn, ROOT_ID)? {
        Some(root) => root,
        None => return Ok(None),
    };
    for segment in path::split(path) {
        if current.is_value {
            return Ok(None);
        }
        match find_child(conn, current.id, segment)? {
            Some(row) => current = row,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Deletes a row and every descendant.
///
/// Descendants are collected breadth-first through the parent index, then
/// all collected rows are deleted in one pass. Returns the number of rows
/// deleted. The root can never be deleted.
pub(crate) fn delete_subtree(conn: &Connection, id: i64) -> Result<usize> {
    if id == ROOT_ID || id <= 0 {
        return Err(Error::PathInvalid(String::new()));
    }

    let mut collected = Vec::new();
    let mut queue = VecDeque::from([id]);
    {
        let mut stmt = conn
            .prepare_cached("SELECT id FROM entries WHERE parent = ?1")
            .map_err(|e| Error::storage("prepare_collect_subtree", e))?;
        while let Some(current) = queue.pop_front() {
            collected.push(current);
            let children = stmt
                .query_map(params![current], |row| row.get::<_, i64>(0))
                .map_err(|e| Error::storage("collect_subtree", e))?;
            for child in children {
                queue.push_back(child.map_err(|e| Error::storage("collect_subtree_row", e))?);
            }
        }
    }

    let mut stmt = conn
        .prepare_cached("DELETE FROM entries WHERE id = ?1")
        .map_err(|e| Error::storage("prepare_delete_entry", e))?;
    for row_id in &collected {
        stmt.execute(params![row_id])
            .map_err(|e| Error::storage("delete_entry", e))?;
    }

    Ok(collected.len())
}

// ---------------------------------------------------------------------------
// Entry store operations
// ---------------------------------------------------------------------------

/// Returns the value stored at `path`.
///
/// # Errors
///
/// [`Error::PathNotFound`] if nothing is stored there,
/// [`Error::PathIsNotAValue`] if the entry is a container.
pub fn get_value(tx: &Transaction<'_>, path: &str) -> Result<String> {
    Ok(get_entry(tx, path)?.value)
}

/// Returns the value entry at `path` with its metadata.
///
/// Same failure modes as [`get_value`]; use [`get_entry_depth`] to read
/// containers.
pub fn get_entry(tx: &Transaction<'_>, path: &str) -> Result<Entry> {
    let path = path::normalize(path);
    let row = resolve(tx, &path)?.ok_or_else(|| Error::PathNotFound(path.clone()))?;
    if !row.is_value {
        return Err(Error::PathIsNotAValue(path));
    }
    Ok(row.into_entry(path))
}

/// Builds the tree rooted at `path`, expanding children breadth-first.
///
/// `depth = 0` returns the entry alone, `depth = n` includes `n` levels of
/// descendants, and a negative depth includes the whole subtree.
///
/// # Errors
///
/// [`Error::PathNotFound`] if `path` itself does not exist.
pub fn get_entry_depth(tx: &Transaction<'_>, path: &str, depth: i32) -> Result<Entry> {
    let path = path::normalize(path);
    let root = resolve(tx, &path)?.ok_or_else(|| Error::PathNotFound(path.clone()))?;

    // Flat arena in BFS order: every parent precedes its children.
    let mut arena: Vec<(Entry, Option<usize>, String)> = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back((0usize, root.id, 0u32));
    let root_name = root.name.clone();
    arena.push((root.into_entry(path), None, root_name));

    while let Some((index, id, level)) = queue.pop_front() {
        if arena[index].0.is_value || !within_depth(depth, level) {
            continue;
        }
        for row in children_rows(tx, id)? {
            let child_path = path::child(&arena[index].0.path, &row.name);
            let row_id = row.id;
            let name = row.name.clone();
            arena.push((row.into_entry(child_path), Some(index), name));
            queue.push_back((arena.len() - 1, row_id, level + 1));
        }
    }

    // Attach from the back so each node is complete before it moves into
    // its parent.
    while arena.len() > 1 {
        if let Some((entry, Some(parent), name)) = arena.pop() {
            arena[parent].0.children.insert(name, entry);
        }
    }
    arena
        .pop()
        .map(|(entry, _, _)| entry)
        .ok_or_else(|| Error::storage("get_entry_depth", "empty tree arena"))
}

/// Returns true if an entry exists at `path`.
pub fn exists(tx: &Transaction<'_>, path: &str) -> Result<bool> {
    Ok(resolve(tx, &path::normalize(path))?.is_some())
}

/// Returns true if a value entry exists at `path`; false for containers and
/// missing paths.
pub fn path_is_value(tx: &Transaction<'_>, path: &str) -> Result<bool> {
    Ok(resolve(tx, &path::normalize(path))?.is_some_and(|row| row.is_value))
}

/// Returns the closest proper ancestor of `path` that is stored as a value.
pub fn value_ancestor(tx: &Transaction<'_>, path: &str) -> Result<Option<String>> {
    let segments = path::split(path);
    let Some((_, ancestors)) = segments.split_last() else {
        return Ok(None);
    };

    let mut parent = ROOT_ID;
    let mut walked = String::new();
    for segment in ancestors {
        walked = path::child(&walked, segment);
        match find_child(tx, parent, segment)? {
            Some(row) if row.is_value => return Ok(Some(walked)),
            Some(row) => parent = row.id,
            None => return Ok(None),
        }
    }
    Ok(None)
}

/// Writes `value` at `path`.
///
/// Missing ancestors are created as containers. An existing value is
/// overwritten in place with a strictly later timestamp. With `force`, an
/// existing container at `path` is replaced by the value, and value entries
/// standing where an ancestor container is needed are replaced by
/// containers; without it both cases fail.
///
/// Unless `skip_hooks` is set, the pre-set hook runs before the row is
/// written (and may veto it) and the post-set hook runs after.
///
/// # Errors
///
/// - [`Error::PathInvalid`]: `path` is the root, or an ancestor is a value and
///   `force` is false
/// - [`Error::PathIsNotAValue`]: `path` is a container and `force` is false
/// - [`Error::HookRejected`]: the pre-set hook vetoed the write
pub fn set_value(
    tx: &Transaction<'_>,
    hooks: &HookGate,
    path: &str,
    value: &str,
    force: bool,
    skip_hooks: bool,
) -> Result<()> {
    let path = path::normalize(path);
    let segments = path::split(&path);
    let Some((leaf, ancestors)) = segments.split_last() else {
        return Err(Error::PathInvalid(path));
    };

    let now = now_micros();
    let mut parent = ROOT_ID;
    let mut walked = String::new();
    for segment in ancestors {
        walked = path::child(&walked, segment);
        parent = match find_child(tx, parent, segment)? {
            None => insert_row(tx, parent, segment, false, "", now)?,
            Some(row) if !row.is_value => row.id,
            Some(row) => {
                if !force {
                    return Err(Error::PathInvalid(walked));
                }
                let deleted = delete_subtree(tx, row.id)?;
                tracing::debug!(path = %walked, deleted, "Replaced value with container");
                insert_row(tx, parent, segment, false, "", now)?
            },
        };
    }

    let existing = match find_child(tx, parent, leaf)? {
        Some(row) if !row.is_value => {
            if !force {
                return Err(Error::PathIsNotAValue(path));
            }
            let deleted = delete_subtree(tx, row.id)?;
            tracing::debug!(path = %path, deleted, "Replaced container with value");
            None
        },
        other => other,
    };

    if !skip_hooks {
        hooks.pre_set(&path, value)?;
    }

    match existing {
        Some(row) => update_value(tx, row.id, value, now.max(row.last_update_us + 1))?,
        None => {
            insert_row(tx, parent, leaf, true, value, now)?;
        },
    }

    if !skip_hooks {
        hooks.post_set(&path, value);
    }
    Ok(())
}

/// Applies an in-memory tree onto storage, starting at the root.
///
/// `entry` must be a container; it stands for the root and its `path` is
/// ignored. Each node is matched against the row at the same position:
///
/// - missing: inserted with the node's type, value and timestamp
/// - same type: values are overwritten (unless `only_merge`), containers are
///   descended into
/// - other type: with `only_merge` the node and its whole subtree are
///   skipped, leaving stored data untouched; otherwise `force` is required to
///   delete the stored subtree and insert the node
///
/// # Errors
///
/// [`Error::PathInvalid`] if the root node is a value, a child name is not a
/// single path segment, or a type conflict occurs without `force` or
/// `only_merge`.
pub fn set_root_entry(
    tx: &Transaction<'_>,
    hooks: &HookGate,
    entry: &Entry,
    force: bool,
    skip_hooks: bool,
    only_merge: bool,
) -> Result<MergeStats> {
    if entry.is_value {
        return Err(Error::PathInvalid(String::new()));
    }

    let mut stats = MergeStats::default();
    let mut stack: Vec<(&Entry, &str, i64, String)> = entry
        .children
        .iter()
        .rev()
        .map(|(name, child)| (child, name.as_str(), ROOT_ID, name.clone()))
        .collect();

    while let Some((node, name, parent, node_path)) = stack.pop() {
        if name.is_empty() || name.contains(path::SEPARATOR) {
            return Err(Error::PathInvalid(node_path));
        }

        let id = match find_child(tx, parent, name)? {
            None => {
                stats.inserted += 1;
                insert_node(tx, hooks, node, parent, name, &node_path, skip_hooks)?
            },
            Some(row) if row.is_value != node.is_value => {
                if only_merge {
                    stats.skipped += 1;
                    tracing::debug!(path = %node_path, "Skipped conflicting subtree in merge");
                    continue;
                }
                if !force {
                    return Err(Error::PathInvalid(node_path));
                }
                delete_subtree(tx, row.id)?;
                stats.replaced += 1;
                insert_node(tx, hooks, node, parent, name, &node_path, skip_hooks)?
            },
            Some(row) => {
                if node.is_value && !only_merge {
                    if !skip_hooks {
                        hooks.pre_set(&node_path, &node.value)?;
                    }
                    update_value(tx, row.id, &node.value, node.last_update.timestamp_micros())?;
                    if !skip_hooks {
                        hooks.post_set(&node_path, &node.value);
                    }
                    stats.updated += 1;
                }
                row.id
            },
        };

        if !node.is_value {
            for (child_name, child) in node.children.iter().rev() {
                stack.push((
                    child,
                    child_name.as_str(),
                    id,
                    path::child(&node_path, child_name),
                ));
            }
        }
    }

    Ok(stats)
}

fn insert_node(
    tx: &Transaction<'_>,
    hooks: &HookGate,
    node: &Entry,
    parent: i64,
    name: &str,
    node_path: &str,
    skip_hooks: bool,
) -> Result<i64> {
    let ts = node.last_update.timestamp_micros();
    if !node.is_value {
        return insert_row(tx, parent, name, false, "", ts);
    }
    if !skip_hooks {
        hooks.pre_set(node_path, &node.value)?;
    }
    let id = insert_row(tx, parent, name, true, &node.value, ts)?;
    if !skip_hooks {
        hooks.post_set(node_path, &node.value);
    }
    Ok(id)
}

/// Deletes the entry at `path` and its whole subtree, returning the number of
/// rows removed.
///
/// # Errors
///
/// [`Error::PathInvalid`] for the root (in any spelling, e.g. `""` or `"/"`),
/// [`Error::PathNotFound`] if nothing is stored at `path`.
pub fn delete_entry(tx: &Transaction<'_>, path: &str) -> Result<usize> {
    let path = path::normalize(path);
    if path.is_empty() {
        return Err(Error::PathInvalid(path));
    }
    let row = resolve(tx, &path)?.ok_or_else(|| Error::PathNotFound(path.clone()))?;
    let deleted = delete_subtree(tx, row.id).map_err(|e| match e {
        Error::PathInvalid(_) => Error::PathInvalid(path.clone()),
        other => other,
    })?;
    tracing::debug!(path = %path, deleted, "Deleted subtree");
    Ok(deleted)
}
