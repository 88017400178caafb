//! Breadth-first walks over stored subtrees.

use crate::models::Entry;
use crate::path;
use crate::storage::entries::{children_rows, resolve, within_depth};
use crate::Error;
use rusqlite::Transaction;
use std::collections::VecDeque;

/// Walks the subtree at `path` breadth-first, calling `callback` once per
/// entry with the entry, its parent (`None` for the starting entry) and its
/// depth relative to the start.
///
/// Entries passed to the callback carry no children. Children of an entry
/// are fetched and queued before the callback sees that entry, so a callback
/// may delete the entry it is handed without losing the rest of the walk.
/// `depth` bounds how many levels below the start are visited; negative means
/// unlimited.
///
/// The first callback error aborts the walk and is returned unchanged.
/// Returns the number of entries visited.
///
/// # Errors
///
/// [`Error::PathNotFound`] if `path` does not exist, storage errors from
/// child lookups, and any error from `callback`.
pub fn recurse<F, E>(
    tx: &Transaction<'_>,
    path: &str,
    depth: i32,
    mut callback: F,
) -> std::result::Result<usize, E>
where
    F: FnMut(&Transaction<'_>, &Entry, Option<&Entry>, u32) -> std::result::Result<(), E>,
    E: From<Error>,
{
    let path = path::normalize(path);
    let start = resolve(tx, &path)?.ok_or_else(|| Error::PathNotFound(path.clone()))?;

    // Visited nodes stay in `nodes` so parents can be handed out by reference.
    let mut nodes: Vec<(Entry, Option<usize>)> = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back((start.id, 0u32));
    nodes.push((start.into_entry(path), None));

    let mut visited = 0;
    while let Some((id, level)) = queue.pop_front() {
        let index = visited;
        if !nodes[index].0.is_value && within_depth(depth, level) {
            for row in children_rows(tx, id)? {
                let child_path = path::child(&nodes[index].0.path, &row.name);
                queue.push_back((row.id, level + 1));
                nodes.push((row.into_entry(child_path), Some(index)));
            }
        }

        let (node, parent) = &nodes[index];
        callback(tx, node, parent.map(|p| &nodes[p].0), level)?;
        visited += 1;
    }

    Ok(visited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookGate;
    use crate::storage::{entries, schema};
    use rusqlite::Connection;

    fn seeded() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        schema::open(&mut conn).unwrap();
        let tx = conn.transaction().unwrap();
        let hooks = HookGate::default();
        // a1 {b1 {c1, c2}, b2 = v}: six nodes with the root
        entries::set_value(&tx, &hooks, "a1/b1/c1", "1", false, true).unwrap();
        entries::set_value(&tx, &hooks, "a1/b1/c2", "2", false, true).unwrap();
        entries::set_value(&tx, &hooks, "a1/b2", "v", false, true).unwrap();
        tx.commit().unwrap();
        conn
    }

    #[test]
    fn test_visits_whole_tree_in_bfs_order() {
        let mut conn = seeded();
        let tx = conn.transaction().unwrap();
        let mut seen = Vec::new();

        let visited = recurse::<_, Error>(&tx, "", -1, |_, node, parent, level| {
            seen.push((
                node.path.clone(),
                parent.map(|p| p.path.clone()),
                level,
            ));
            Ok(())
        })
        .unwrap();

        assert_eq!(visited, 6);
        assert_eq!(
            seen,
            vec![
                (String::new(), None, 0),
                ("a1".to_string(), Some(String::new()), 1),
                ("a1/b1".to_string(), Some("a1".to_string()), 2),
                ("a1/b2".to_string(), Some("a1".to_string()), 2),
                ("a1/b1/c1".to_string(), Some("a1/b1".to_string()), 3),
                ("a1/b1/c2".to_string(), Some("a1/b1".to_string()), 3),
            ]
        );
    }

    #[test]
    fn test_depth_limit() {
        let mut conn = seeded();
        let tx = conn.transaction().unwrap();

        let count = |depth| recurse::<_, Error>(&tx, "a1", depth, |_, _, _, _| Ok(())).unwrap();
        assert_eq!(count(0), 1);
        assert_eq!(count(1), 3);
        assert_eq!(count(-1), 5);
    }

    #[test]
    fn test_callback_may_delete_visited_node() {
        let mut conn = seeded();
        let tx = conn.transaction().unwrap();
        let mut seen = Vec::new();

        recurse::<_, Error>(&tx, "a1", -1, |tx, node, _, level| {
            seen.push(node.path.clone());
            if level == 1 {
                entries::delete_entry(tx, &node.path)?;
            }
            Ok(())
        })
        .unwrap();

        // c1 and c2 were queued before b1 was deleted
        assert!(seen.contains(&"a1/b1/c1".to_string()));
        assert!(seen.contains(&"a1/b1/c2".to_string()));
        assert!(!entries::exists(&tx, "a1/b1").unwrap());
        assert!(entries::exists(&tx, "a1").unwrap());
    }

    #[test]
    fn test_callback_error_aborts() {
        let mut conn = seeded();
        let tx = conn.transaction().unwrap();
        let mut calls = 0;

        let err = recurse(&tx, "", -1, |_, node, _, _| {
            calls += 1;
            if node.path == "a1" {
                return Err(Error::InvalidInput("stop".to_string()));
            }
            Ok(())
        })
        .unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_missing_start() {
        let mut conn = seeded();
        let tx = conn.transaction().unwrap();
        let result = recurse::<_, Error>(&tx, "nope", -1, |_, _, _, _| Ok(()));
        assert!(matches!(result, Err(Error::PathNotFound(_))));
    }
}
