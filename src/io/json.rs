//! JSON format adapter for import/export.
//!
//! Two shapes are supported:
//!
//! - **Values**: nested objects with string leaves, e.g.
//!   `{"network": {"mtu": "1500"}}`. Only paths and values survive.
//! - **Entries**: every node is an object carrying `last_update_ms` and either
//!   `value` or `children`. Timestamps and empty containers survive.
//!
//! Output is pretty-printed with four-space indentation, keys in name order.

use crate::hooks::HookGate;
use crate::models::Entry;
use crate::path;
use crate::storage::entries;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::Transaction;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::io::Read;

/// One node of the entries format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonEntry {
    /// Last update in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_ms: Option<i64>,
    /// Payload of a value entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Children of a container entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<BTreeMap<String, Self>>,
}

impl From<&Entry> for JsonEntry {
    fn from(entry: &Entry) -> Self {
        map_tree(
            entry,
            |node| Self {
                last_update_ms: Some(node.last_update.timestamp_millis()),
                value: node.is_value.then(|| node.value.clone()),
                children: (!node.is_value).then(BTreeMap::new),
            },
            |parent, name, child| {
                parent
                    .children
                    .get_or_insert_with(BTreeMap::new)
                    .insert(name, child);
            },
        )
    }
}

impl JsonEntry {
    /// Converts into an [`Entry`] placed at `at`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a node has both `value` and
    /// `children`, neither, a `last_update_ms` outside the representable
    /// range, or a child name that is not a single segment.
    pub fn into_entry(self, at: &str) -> Result<Entry> {
        let at = path::normalize(at);
        let (mut root, children) = self.into_node(&at)?;

        let mut arena: Vec<(Option<usize>, String, Entry)> = Vec::new();
        let mut queue = VecDeque::new();
        if let Some(children) = children {
            queue.push_back((None, at, children));
        }

        while let Some((slot, parent_path, children)) = queue.pop_front() {
            for (name, child) in children {
                if name.is_empty() || name.contains(path::SEPARATOR) {
                    return Err(Error::InvalidInput(format!(
                        "invalid child name '{name}' under '{parent_path}'"
                    )));
                }
                let child_path = path::child(&parent_path, &name);
                let (entry, grandchildren) = child.into_node(&child_path)?;
                arena.push((slot, name, entry));
                if let Some(grandchildren) = grandchildren {
                    queue.push_back((Some(arena.len() - 1), child_path, grandchildren));
                }
            }
        }

        attach_all(&mut root, arena, |parent, name, child| {
            parent.children.insert(name, child);
        });
        Ok(root)
    }

    /// Validates one node and splits off its children.
    fn into_node(self, at: &str) -> Result<(Entry, Option<BTreeMap<String, Self>>)> {
        let last_update = match self.last_update_ms {
            None => Utc::now(),
            Some(ms) => DateTime::from_timestamp_millis(ms).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "entry '{at}' has out-of-range last_update_ms {ms}"
                ))
            })?,
        };

        match (self.value, self.children) {
            (Some(_), Some(_)) => Err(Error::InvalidInput(format!(
                "entry '{at}' has both value and children"
            ))),
            (None, None) => Err(Error::InvalidInput(format!(
                "entry '{at}' has neither value nor children"
            ))),
            (Some(value), None) => {
                let mut entry = Entry::value(at, value);
                entry.last_update = last_update;
                Ok((entry, None))
            },
            (None, Some(children)) => {
                let mut entry = Entry::container(at);
                entry.last_update = last_update;
                Ok((entry, Some(children)))
            },
        }
    }
}

/// Maps an entry tree node by node without recursion.
///
/// Descendants are collected breadth-first, so every parent precedes its
/// children in the arena, then attached from the back.
fn map_tree<N>(
    entry: &Entry,
    mut node: impl FnMut(&Entry) -> N,
    attach: impl FnMut(&mut N, String, N),
) -> N {
    let mut root = node(entry);
    let mut arena: Vec<(Option<usize>, String, N)> = Vec::new();
    let mut queue = VecDeque::from([(None, entry)]);

    while let Some((slot, current)) = queue.pop_front() {
        if current.is_value {
            continue;
        }
        for (name, child) in &current.children {
            arena.push((slot, name.clone(), node(child)));
            queue.push_back((Some(arena.len() - 1), child));
        }
    }

    attach_all(&mut root, arena, attach);
    root
}

/// Moves every arena node into its parent. A slot of `None` is the root.
fn attach_all<N>(
    root: &mut N,
    mut arena: Vec<(Option<usize>, String, N)>,
    mut attach: impl FnMut(&mut N, String, N),
) {
    while let Some((slot, name, child)) = arena.pop() {
        match slot {
            Some(parent) => attach(&mut arena[parent].2, name, child),
            None => attach(root, name, child),
        }
    }
}

// Nesting depth is bounded only by the tree, so both directions go through
// `serde_stacker`, which grows the stack on demand.
fn to_pretty<T: Serialize>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(serde_stacker::Serializer::new(&mut serializer))
        .map_err(|e| Error::InvalidInput(format!("cannot encode JSON: {e}")))?;
    buf.push(b'\n');
    String::from_utf8(buf).map_err(|e| Error::InvalidInput(format!("cannot encode JSON: {e}")))
}

fn from_reader<T: DeserializeOwned>(reader: impl Read, format: &str) -> Result<T> {
    let parse_error = |e: serde_json::Error| {
        Error::InvalidInput(format!("cannot parse {format} JSON: {e}"))
    };

    let mut deserializer = serde_json::Deserializer::from_reader(reader);
    deserializer.disable_recursion_limit();
    let value = T::deserialize(serde_stacker::Deserializer::new(&mut deserializer))
        .map_err(parse_error)?;
    deserializer.end().map_err(parse_error)?;
    Ok(value)
}

fn values_of(entry: &Entry) -> Value {
    map_tree(
        entry,
        |node| {
            if node.is_value {
                Value::String(node.value.clone())
            } else {
                Value::Object(Map::new())
            }
        },
        |parent, name, child| {
            if let Value::Object(map) = parent {
                map.insert(name, child);
            }
        },
    )
}

/// Renders a tree in the values format. A value entry renders as a bare
/// JSON string.
pub fn values_to_json(entry: &Entry) -> Result<String> {
    to_pretty(&values_of(entry))
}

/// Renders a tree in the entries format.
pub fn entry_to_json(entry: &Entry) -> Result<String> {
    to_pretty(&JsonEntry::from(entry))
}

/// Reads a values-format document. The top level must be an object.
pub fn parse_values(reader: impl Read) -> Result<Map<String, Value>> {
    from_reader(reader, "values")
}

/// Reads an entries-format document into a tree rooted at `""`.
pub fn parse_entries(reader: impl Read) -> Result<Entry> {
    let root: JsonEntry = from_reader(reader, "entries")?;
    root.into_entry("")
}

/// Writes every string leaf of a values document, depth-first.
///
/// Writes use `force` and skip hooks. With `only_merge`, leaves whose path
/// already exists, or whose path is blocked by a stored value ancestor, are
/// left alone. Empty objects create nothing.
///
/// Returns the number of values written.
///
/// # Errors
///
/// [`Error::InvalidInput`] for empty keys and for leaves that are neither
/// strings nor objects, plus any storage error.
pub fn apply_values(
    tx: &Transaction<'_>,
    hooks: &HookGate,
    values: &Map<String, Value>,
    only_merge: bool,
) -> Result<usize> {
    let mut written = 0;
    let mut stack: Vec<(String, &Value)> = values
        .iter()
        .rev()
        .map(|(key, value)| (key.clone(), value))
        .collect();

    while let Some((key_path, value)) = stack.pop() {
        if path::split(&key_path).is_empty() {
            return Err(Error::InvalidInput(format!("empty key in '{key_path}'")));
        }
        match value {
            Value::String(s) => {
                let target = path::normalize(&key_path);
                if only_merge
                    && (entries::exists(tx, &target)?
                        || entries::value_ancestor(tx, &target)?.is_some())
                {
                    continue;
                }
                entries::set_value(tx, hooks, &target, s, true, true)?;
                written += 1;
            },
            Value::Object(children) => {
                for (name, child) in children.iter().rev() {
                    if name.is_empty() {
                        return Err(Error::InvalidInput(format!(
                            "empty key under '{key_path}'"
                        )));
                    }
                    stack.push((format!("{key_path}{}{name}", path::SEPARATOR), child));
                }
            },
            other => {
                return Err(Error::InvalidInput(format!(
                    "invalid JSON entry at '{key_path}': expected string or object, got {other}"
                )));
            },
        }
    }

    Ok(written)
}
