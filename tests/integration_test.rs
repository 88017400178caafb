//! Integration tests for kvtree against on-disk databases.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use kvtree::{Entry, Error, ErrorKind, HookDispatch, HookRegistry, Store, StoreConfig};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::TempDir;

fn db_in(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("settings.db")
}

#[test]
fn test_reopen_persists_values() {
    let dir = TempDir::new().unwrap();
    let path = db_in(&dir);

    let (store, created) = Store::open(&path).unwrap();
    assert!(created);
    store.set("network/eth0/address", "10.0.0.2").unwrap();
    store.close().unwrap();

    let (store, created) = Store::open(&path).unwrap();
    assert!(!created);
    assert_eq!(store.get("network/eth0/address").unwrap(), "10.0.0.2");
    assert_eq!(store.db_path(), Some(path.as_path()));
}

#[test]
fn test_open_creates_parent_dirs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("deeper").join("kv.db");

    let (store, created) = Store::open(&path).unwrap();
    assert!(created);
    assert!(path.exists());
    drop(store);
}

#[test]
fn test_open_empty_path() {
    assert!(matches!(Store::open(""), Err(Error::InvalidInput(_))));
}

#[test]
fn test_newer_schema_is_refused() {
    let dir = TempDir::new().unwrap();
    let path = db_in(&dir);
    Store::open(&path).unwrap().0.close().unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.pragma_update(None, "user_version", Store::supported_schema_version() + 1)
        .unwrap();
    drop(conn);

    let err = Store::open(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    assert!(matches!(Store::migrate(&path), Err(Error::SchemaMismatch { .. })));
}

#[test]
fn test_migrate_creates_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = db_in(&dir);

    assert!(Store::migrate(&path).unwrap());
    assert!(!Store::migrate(&path).unwrap());

    let (store, created) = Store::open(&path).unwrap();
    assert!(!created);
    assert_eq!(
        store.schema_version().unwrap(),
        Store::supported_schema_version()
    );
}

#[test]
fn test_open_with_config_file() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    let db_path = dir.path().join("from-config.db");
    let mut file = std::fs::File::create(&config_path).unwrap();
    writeln!(file, "db_path = {:?}", db_path.display().to_string()).unwrap();
    writeln!(file, "journal_mode = \"DELETE\"").unwrap();
    writeln!(file, "busy_timeout_ms = 100").unwrap();
    drop(file);

    let config = StoreConfig::load_from_file(&config_path).unwrap();
    let (store, created) = Store::open_with_config(&config).unwrap();
    assert!(created);
    assert_eq!(store.db_path(), Some(db_path.as_path()));

    let bad = StoreConfig {
        journal_mode: "sideways".to_string(),
        ..config
    };
    assert!(matches!(
        Store::open_with_config(&bad),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn test_two_handles_share_file() {
    let dir = TempDir::new().unwrap();
    let path = db_in(&dir);
    let (first, _) = Store::open(&path).unwrap();
    let (second, created) = Store::open(&path).unwrap();
    assert!(!created);

    first.set("shared/key", "from-first").unwrap();
    assert_eq!(second.get("shared/key").unwrap(), "from-first");
    second.delete("shared").unwrap();
    assert!(!first.exists("shared").unwrap());
}

#[test]
fn test_concurrent_writers() {
    let dir = TempDir::new().unwrap();
    let (store, _) = Store::open(db_in(&dir)).unwrap();
    let store = Arc::new(store);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..25 {
                    store.set(&format!("workers/w{t}/k{i}"), &i.to_string()).unwrap();
                    store.force("workers/last", &t.to_string()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let workers = store.get_entry("workers").unwrap();
    assert_eq!(workers.children.len(), 9);
    for t in 0..8 {
        assert_eq!(workers.children[&format!("w{t}")].children.len(), 25);
    }
    let last: usize = store.get_as("workers/last").unwrap();
    assert!(last < 8);
}

#[test]
fn test_last_update_strictly_increases() {
    let store = Store::in_memory().unwrap();
    let mut previous = None;
    for i in 0..20 {
        store.set("tick", &i.to_string()).unwrap();
        let entry = store.get_entry("tick").unwrap();
        assert_eq!(entry.value, i.to_string());
        if let Some(prev) = previous {
            assert!(entry.last_update > prev);
        }
        previous = Some(entry.last_update);
    }
}

#[test]
fn test_ancestors_are_containers() {
    let store = Store::in_memory().unwrap();
    store.set("a/b/c/d", "leaf").unwrap();

    for (path, child) in [("a", "b"), ("a/b", "c"), ("a/b/c", "d")] {
        let entry = store.get_entry_depth(path, 1).unwrap();
        assert!(!entry.is_value, "{path} should be a container");
        assert_eq!(entry.children.keys().collect::<Vec<_>>(), vec![child]);
        assert!(matches!(store.get(path), Err(Error::PathIsNotAValue(_))));
    }
}

#[test]
fn test_forced_overwrite_destroys_descendants() {
    let store = Store::in_memory().unwrap();
    store.set("a/b/c", "1").unwrap();
    store.set("a/b/d/e", "2").unwrap();

    let err = store.set("a", "flat").unwrap_err();
    assert!(matches!(err, Error::PathIsNotAValue(_)));
    assert_eq!(store.get("a/b/c").unwrap(), "1");

    store.force("a", "flat").unwrap();
    for gone in ["a/b", "a/b/c", "a/b/d", "a/b/d/e"] {
        assert!(!store.exists(gone).unwrap());
        assert!(matches!(store.get(gone), Err(Error::PathNotFound(_))));
    }
}

#[test]
fn test_delete_cascade_and_root() {
    let store = Store::in_memory().unwrap();
    store.set("a1/b1/c1/d1", "x").unwrap();
    store.set("a1/b1/c2/d1", "y").unwrap();

    assert_eq!(store.delete("a1/b1").unwrap(), 5);
    assert!(store.exists("a1").unwrap());
    for gone in ["a1/b1", "a1/b1/c1", "a1/b1/c1/d1", "a1/b1/c2", "a1/b1/c2/d1"] {
        assert!(!store.exists(gone).unwrap());
    }

    for root in ["", "/", "///"] {
        assert!(matches!(store.delete(root), Err(Error::PathInvalid(_))));
    }
}

#[test]
fn test_traversal_counts() {
    let store = Store::in_memory().unwrap();
    // root, a, a/b, a/c, d, d/e: six nodes
    store.set("a/b", "1").unwrap();
    store.set("a/c", "2").unwrap();
    store.set("d/e", "3").unwrap();

    let all = store
        .recurse("", -1, |_, _, _, _| Ok::<(), Error>(()))
        .unwrap();
    assert_eq!(all, 6);

    let mut shallow = Vec::new();
    store
        .recurse("", 1, |_, node, _, _| {
            shallow.push(node.path.clone());
            Ok::<(), Error>(())
        })
        .unwrap();
    assert_eq!(shallow, vec!["", "a", "d"]);
}

#[test]
fn test_merge_import_keeps_existing() {
    let store = Store::in_memory().unwrap();
    store.set("e1/e2", "original").unwrap();

    let import = Entry::container("")
        .with_child("e1", Entry::container("").with_child("e2", Entry::value("", "merged")));

    store.set_root_entry(&import, false, true, true).unwrap();
    assert_eq!(store.get("e1/e2").unwrap(), "original");

    store.set_root_entry(&import, false, true, false).unwrap();
    assert_eq!(store.get("e1/e2").unwrap(), "merged");
}

#[test]
fn test_merge_conflict_skips_whole_subtree() {
    let store = Store::in_memory().unwrap();
    store.set("cfg", "scalar").unwrap();

    let import = Entry::container("").with_child(
        "cfg",
        Entry::container("")
            .with_child("x", Entry::value("", "1"))
            .with_child("nested", Entry::container("").with_child("y", Entry::value("", "2"))),
    );

    let stats = store.set_root_entry(&import, true, true, true).unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.inserted, 0);
    assert_eq!(store.get("cfg").unwrap(), "scalar");
    assert!(!store.exists("cfg/x").unwrap());
    assert!(!store.exists("cfg/nested/y").unwrap());
}

#[test]
fn test_json_round_trip_through_file() {
    let dir = TempDir::new().unwrap();
    let (source, _) = Store::open(dir.path().join("source.db")).unwrap();
    source.set("display/brightness", "80").unwrap();
    source.set("display/theme", "dark \"solarized\"").unwrap();
    source.set("network/eth0/mtu", "1500").unwrap();
    source.set("hostname", "").unwrap();

    let export = dir.path().join("export.json");
    std::fs::write(&export, source.values_to_json("").unwrap()).unwrap();

    let (target, _) = Store::open(dir.path().join("target.db")).unwrap();
    let file = std::fs::File::open(&export).unwrap();
    assert_eq!(target.set_values_from_json(file, false).unwrap(), 4);

    assert_eq!(
        target.get_entry("").unwrap().values(),
        source.get_entry("").unwrap().values()
    );
}

#[test]
fn test_hooks_bypassed_by_imports() {
    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);
    impl HookDispatch for Recording {
        fn pre_set(&self, path: &str, _value: &str) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(path.to_string());
            Ok(())
        }
        fn post_set(&self, _path: &str, _value: &str) {}
    }

    let recording = Arc::new(Recording::default());
    let store = Store::in_memory().unwrap().with_hooks(recording.clone());
    store.set("direct", "1").unwrap();
    store
        .set_values_from_json(r#"{"imported": {"a": "1"}}"#.as_bytes(), false)
        .unwrap();
    store
        .set_entries_from_json(r#"{"children": {"tree": {"value": "1"}}}"#.as_bytes(), false)
        .unwrap();

    assert_eq!(*recording.0.lock().unwrap(), vec!["direct".to_string()]);
    assert_eq!(store.get("imported/a").unwrap(), "1");
    assert_eq!(store.get("tree").unwrap(), "1");
}

#[test]
fn test_deep_path_round_trips_both_formats() {
    let deep: String = (0..220).map(|i| format!("n{i}")).collect::<Vec<_>>().join("/");
    let source = Store::in_memory().unwrap();
    source.set(&deep, "bottom").unwrap();
    source.set("shallow", "top").unwrap();

    let entries = source.entry_to_json("").unwrap();
    let target = Store::in_memory().unwrap();
    let stats = target
        .set_entries_from_json(entries.as_bytes(), false)
        .unwrap();
    assert_eq!(stats.inserted, 221);
    assert_eq!(target.get(&deep).unwrap(), "bottom");

    let values = source.values_to_json("").unwrap();
    let target = Store::in_memory().unwrap();
    assert_eq!(
        target.set_values_from_json(values.as_bytes(), false).unwrap(),
        2
    );
    assert_eq!(
        target.get_entry("").unwrap().values(),
        source.get_entry("").unwrap().values()
    );
}

#[test]
fn test_registry_hooks_on_disk_store() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(HookRegistry::new());
    registry.register_pre_set("mode", |_, value| {
        if matches!(value, "on" | "off") {
            Ok(())
        } else {
            anyhow::bail!("mode must be on or off")
        }
    });

    let (store, _) = Store::open(db_in(&dir)).unwrap();
    let store = store.with_hooks(registry.clone());
    store.set("mode", "on").unwrap();
    let err = store.set("mode", "maybe").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HookRejected);
    assert_eq!(store.get("mode").unwrap(), "on");
    store.close().unwrap();

    let (reopened, _) = Store::open(db_in(&dir)).unwrap();
    reopened.set("mode", "maybe").unwrap();
    assert_eq!(registry.hook_count("mode"), 1);
}
