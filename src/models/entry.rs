//! Entry tree types.

use crate::path;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A node of the hierarchical namespace.
///
/// When `is_value` is true the entry is a leaf carrying `value` and has no
/// children. Otherwise it is a container and `children` maps each child's name
/// to its subtree. Trees returned by reads are snapshots: they hold no
/// reference back to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Normalized path of this entry. The root is `""`.
    pub path: String,
    /// Time of the last mutation of this entry.
    pub last_update: DateTime<Utc>,
    /// Whether this entry is a value or a container.
    pub is_value: bool,
    /// Payload. Empty for containers.
    pub value: String,
    /// Children by name. Always empty for values.
    pub children: BTreeMap<String, Self>,
}

impl Entry {
    /// Creates a value entry stamped with the current time.
    #[must_use]
    pub fn value(path: &str, value: impl Into<String>) -> Self {
        Self {
            path: path::normalize(path),
            last_update: Utc::now(),
            is_value: true,
            value: value.into(),
            children: BTreeMap::new(),
        }
    }

    /// Creates an empty container entry stamped with the current time.
    #[must_use]
    pub fn container(path: &str) -> Self {
        Self {
            path: path::normalize(path),
            last_update: Utc::now(),
            is_value: false,
            value: String::new(),
            children: BTreeMap::new(),
        }
    }

    /// Adds a child under `name`, rewriting the paths of the whole child
    /// subtree to sit below this entry.
    #[must_use]
    pub fn with_child(mut self, name: &str, child: Self) -> Self {
        self.insert_child(name, child);
        self
    }

    /// Inserts a child under `name`, replacing any previous child of that name.
    pub fn insert_child(&mut self, name: &str, mut child: Self) {
        child.path = path::child(&self.path, name);
        let mut stack: Vec<&mut Self> = vec![&mut child];
        while let Some(node) = stack.pop() {
            let base = node.path.clone();
            for (child_name, grandchild) in &mut node.children {
                grandchild.path = path::child(&base, child_name);
                stack.push(grandchild);
            }
        }
        self.children.insert(name.to_string(), child);
    }

    /// Name of this entry: the last path segment, empty for the root.
    #[must_use]
    pub fn name(&self) -> &str {
        path::leaf_name(&self.path)
    }

    /// Returns true if this entry is the root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Flattens the tree into `(path, value)` pairs for every value entry,
    /// sorted by path.
    #[must_use]
    pub fn values(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.is_value {
                out.push((node.path.clone(), node.value.clone()));
            } else {
                stack.extend(node.children.values());
            }
        }
        out.sort();
        out
    }

    /// Counts the entries in this tree, including itself.
    #[must_use]
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.values());
        }
        count
    }
}
