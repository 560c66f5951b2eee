use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use workflow_persist::CheckpointStore;
use workflow_persist::CheckpointStoreConfig;
use workflow_persist::DurableStorage;
use workflow_persist::EntryMeta;
use workflow_persist::LocalStorage;
use workflow_persist::PersistError;
use workflow_persist::SystemClock;

fn open_checkpoints(dir: &TempDir, max_versions: usize) -> CheckpointStore {
    let config = CheckpointStoreConfig {
        max_versions_per_session: max_versions,
        ..CheckpointStoreConfig::with_dir(dir.path().join("checkpoints"))
    };
    CheckpointStore::open(config, Arc::new(LocalStorage::new()), Arc::new(SystemClock))
        .expect("checkpoint store should open")
}

#[test]
fn test_concurrent_saves_get_unique_versions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(open_checkpoints(&dir, 100));
    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                (0..10)
                    .map(|i| {
                        store
                            .save("shared", json!({"worker": worker, "step": i}))
                            .expect("save should succeed")
                            .version
                    })
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut all: Vec<u64> = Vec::new();
    for handle in handles {
        let versions = handle.join().expect("worker should not panic");
        // Each worker observes its own versions strictly increasing.
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
        all.extend(versions);
    }
    let unique: BTreeSet<u64> = all.iter().copied().collect();
    assert_eq!(unique.len(), 40);
    assert_eq!(unique.iter().copied().min(), Some(1));
    assert_eq!(unique.iter().copied().max(), Some(40));
    assert_eq!(store.list_versions("shared").len(), 40);
}

#[test]
fn test_retention_keeps_cap_highest_versions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cap = 10;
    let store = open_checkpoints(&dir, cap);
    for step in 0..25 {
        store.save("s1", json!({"step": step})).expect("save");
    }
    let versions: Vec<u64> = store
        .list_versions("s1")
        .into_iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(versions, (16..=25).rev().collect::<Vec<u64>>());
    assert!(store.load("s1", 15).is_none());
    assert_eq!(
        store.load("s1", 16).map(|r| r.payload),
        Some(json!({"step": 15}))
    );
}

#[test]
fn test_backup_delete_restore_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_checkpoints(&dir, 10);
    for phase in 1..=3 {
        store.save("team_alpha", json!({"phase": phase})).expect("save");
    }
    let before = store.list_versions("team_alpha");

    let backup = store
        .backup("team_alpha", &dir.path().join("backups"))
        .expect("backup");
    assert!(
        backup
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("checkpoint_backup_team_alpha_"))
    );

    for version in 1..=3 {
        assert!(store.delete("team_alpha", version));
    }
    assert!(!store.exists("team_alpha"));

    let restored = store.restore(&backup).expect("restore");
    assert_eq!(restored, "team_alpha");
    let after = store.list_versions("team_alpha");
    assert_eq!(
        after.iter().map(|v| v.version).collect::<Vec<_>>(),
        before.iter().map(|v| v.version).collect::<Vec<_>>()
    );
    for phase in 1..=3 {
        assert_eq!(
            store.load("team_alpha", phase).map(|r| r.payload),
            Some(json!({"phase": phase}))
        );
    }
    assert_eq!(store.save("team_alpha", json!({})).expect("save").version, 4);
}

#[test]
fn test_validate_false_for_missing_and_truncated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_checkpoints(&dir, 10);
    assert!(!store.validate("never-saved", 1));

    let saved = store
        .save("s1", json!({"notes": "x".repeat(1024)}))
        .expect("save");
    assert!(store.validate("s1", saved.version));

    let bytes = std::fs::read(&saved.location).expect("read checkpoint");
    std::fs::write(&saved.location, &bytes[..bytes.len() / 2]).expect("truncate");
    assert!(!store.validate("s1", saved.version));
    assert!(store.load("s1", saved.version).is_none());
}

#[test]
fn test_backup_of_unknown_session_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_checkpoints(&dir, 10);
    let err = store
        .backup("ghost", dir.path())
        .expect_err("nothing to back up");
    assert!(err.is_not_found());
    assert!(matches!(err, PersistError::CheckpointNotFound(_)));
}

/// Local storage whose writes into restore staging directories can be made
/// to fail.
#[derive(Default)]
struct StagingFailStorage {
    inner: LocalStorage,
    fail_staging: AtomicBool,
}

impl DurableStorage for StagingFailStorage {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir_all(path)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let staged = path.to_string_lossy().contains(".restore_");
        if staged && self.fail_staging.load(Ordering::SeqCst) {
            return Err(io::Error::other("simulated disk full"));
        }
        self.inner.write(path, bytes)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner.read(path)
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        self.inner.list(dir)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_dir(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.inner.rename(from, to)
    }

    fn metadata(&self, path: &Path) -> io::Result<EntryMeta> {
        self.inner.metadata(path)
    }
}

fn versions_of(store: &CheckpointStore, session_id: &str) -> Vec<u64> {
    store
        .list_versions(session_id)
        .into_iter()
        .map(|v| v.version)
        .collect()
}

#[test]
fn test_failed_restore_keeps_existing_history() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Arc::new(StagingFailStorage::default());
    let root = dir.path().join("checkpoints");
    let store = CheckpointStore::open(
        CheckpointStoreConfig::with_dir(&root),
        storage.clone(),
        Arc::new(SystemClock),
    )
    .expect("open");

    for step in 1..=3 {
        store.save("s1", json!({"step": step})).expect("save");
    }
    let backup = store
        .backup("s1", &dir.path().join("backups"))
        .expect("backup");
    store.save("s1", json!({"step": 4})).expect("save");

    storage.fail_staging.store(true, Ordering::SeqCst);
    let err = store.restore(&backup).expect_err("staging failure should propagate");
    assert!(matches!(err, PersistError::Storage { .. }));
    assert_eq!(versions_of(&store, "s1"), vec![4, 3, 2, 1]);
    assert!(!root.join(".restore_s1").exists());
    assert_eq!(
        store.load_latest("s1").map(|r| r.payload),
        Some(json!({"step": 4}))
    );

    storage.fail_staging.store(false, Ordering::SeqCst);
    assert_eq!(store.restore(&backup).expect("restore"), "s1");
    assert_eq!(versions_of(&store, "s1"), vec![3, 2, 1]);
    assert!(!root.join(".replaced_s1").exists());
    assert_eq!(store.save("s1", json!({})).expect("save").version, 4);
}
