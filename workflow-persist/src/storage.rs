//! Durable storage backends.
//!
//! The stores only ever talk to storage through [`DurableStorage`], which is
//! the small filesystem-like surface they need: directories, whole-file byte
//! reads and writes, listings, deletes and `stat`. [`LocalStorage`] is the
//! production backend; [`MemoryStorage`] keeps everything in a map and stamps
//! modification times from a [`Clock`], which makes age-based retention
//! testable without sleeping.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use parking_lot::Mutex;

use crate::clock::Clock;

/// Result of a `stat` on a storage entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub modified: DateTime<Utc>,
    pub size: u64,
    pub is_dir: bool,
}

/// Trait for durable storage backends.
pub trait DurableStorage: Send + Sync {
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    /// Replace the file at `path` with `bytes`. The parent must exist.
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    /// Immediate children of `dir`, as full paths.
    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    /// Remove an empty directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
    /// Move a file or directory tree. `to` must not exist.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn metadata(&self, path: &Path) -> io::Result<EntryMeta>;

    fn exists(&self, path: &Path) -> bool {
        self.metadata(path).is_ok()
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.metadata(path).is_ok_and(|meta| meta.is_dir)
    }

    /// Recursively copy the tree rooted at `from` to `to`.
    fn copy_dir_all(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.create_dir_all(to)?;
        for child in self.list(from)? {
            let Some(name) = child.file_name() else {
                continue;
            };
            let target = to.join(name);
            if self.is_dir(&child) {
                self.copy_dir_all(&child, &target)?;
            } else {
                let bytes = self.read(&child)?;
                self.write(&target, &bytes)?;
            }
        }
        Ok(())
    }
}

/// Storage on the local filesystem.
///
/// Writes go to a hidden sibling temp file that is renamed over the target,
/// so a crash mid-write leaves either the previous file or a stray temp file.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }
}

fn temp_path_for(path: &Path) -> io::Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no file name: {}", path.display()),
        )
    })?;
    let mut tmp_name = OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}

fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(tmp, path)
}

impl DurableStorage for LocalStorage {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let tmp = temp_path_for(path)?;
        let result = write_then_rename(&tmp, path, bytes);
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            entries.push(entry?.path());
        }
        entries.sort();
        Ok(entries)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if fs::symlink_metadata(to).is_ok() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("rename target exists: {}", to.display()),
            ));
        }
        fs::rename(from, to)
    }

    fn metadata(&self, path: &Path) -> io::Result<EntryMeta> {
        let meta = fs::metadata(path)?;
        Ok(EntryMeta {
            modified: DateTime::<Utc>::from(meta.modified()?),
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }
}

#[derive(Debug, Clone)]
enum Node {
    Dir { modified: DateTime<Utc> },
    File { bytes: Vec<u8>, modified: DateTime<Utc> },
}

/// In-memory storage. Modification times come from the supplied clock.
#[derive(Debug)]
pub struct MemoryStorage {
    clock: Arc<dyn Clock>,
    nodes: Mutex<BTreeMap<PathBuf, Node>>,
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such entry: {}", path.display()),
    )
}

impl MemoryStorage {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            nodes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of files (not directories) currently stored.
    pub fn file_count(&self) -> usize {
        self.nodes
            .lock()
            .values()
            .filter(|node| matches!(node, Node::File { .. }))
            .count()
    }
}

impl DurableStorage for MemoryStorage {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let now = self.clock.now();
        let mut nodes = self.nodes.lock();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            match nodes.get(ancestor) {
                Some(Node::Dir { .. }) => {}
                Some(Node::File { .. }) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("file exists at {}", ancestor.display()),
                    ));
                }
                None => {
                    nodes.insert(ancestor.to_path_buf(), Node::Dir { modified: now });
                }
            }
        }
        Ok(())
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let now = self.clock.now();
        let mut nodes = self.nodes.lock();
        let parent = path.parent().ok_or_else(|| not_found(path))?;
        if !parent.as_os_str().is_empty() && !matches!(nodes.get(parent), Some(Node::Dir { .. }))
        {
            return Err(not_found(parent));
        }
        if matches!(nodes.get(path), Some(Node::Dir { .. })) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("directory exists at {}", path.display()),
            ));
        }
        nodes.insert(
            path.to_path_buf(),
            Node::File {
                bytes: bytes.to_vec(),
                modified: now,
            },
        );
        Ok(())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        match self.nodes.lock().get(path) {
            Some(Node::File { bytes, .. }) => Ok(bytes.clone()),
            Some(Node::Dir { .. }) => Err(io::Error::other(format!(
                "is a directory: {}",
                path.display()
            ))),
            None => Err(not_found(path)),
        }
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let nodes = self.nodes.lock();
        if !matches!(nodes.get(dir), Some(Node::Dir { .. })) {
            return Err(not_found(dir));
        }
        Ok(nodes
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .cloned()
            .collect())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.nodes.lock();
        match nodes.get(path) {
            Some(Node::File { .. }) => {
                nodes.remove(path);
                Ok(())
            }
            Some(Node::Dir { .. }) => Err(io::Error::other(format!(
                "is a directory: {}",
                path.display()
            ))),
            None => Err(not_found(path)),
        }
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.nodes.lock();
        if !matches!(nodes.get(path), Some(Node::Dir { .. })) {
            return Err(not_found(path));
        }
        if nodes.keys().any(|key| key.parent() == Some(path)) {
            return Err(io::Error::other(format!(
                "directory not empty: {}",
                path.display()
            )));
        }
        nodes.remove(path);
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.nodes.lock();
        if !matches!(nodes.get(path), Some(Node::Dir { .. })) {
            return Err(not_found(path));
        }
        nodes.retain(|key, _| !key.starts_with(path));
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut nodes = self.nodes.lock();
        if !nodes.contains_key(from) {
            return Err(not_found(from));
        }
        if nodes.contains_key(to) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("rename target exists: {}", to.display()),
            ));
        }
        let moves: Vec<(PathBuf, PathBuf)> = nodes
            .keys()
            .filter_map(|key| {
                let rest = key.strip_prefix(from).ok()?;
                let target = if rest.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(rest)
                };
                Some((key.clone(), target))
            })
            .collect();
        for (key, target) in moves {
            if let Some(node) = nodes.remove(&key) {
                nodes.insert(target, node);
            }
        }
        Ok(())
    }

    fn metadata(&self, path: &Path) -> io::Result<EntryMeta> {
        match self.nodes.lock().get(path) {
            Some(Node::Dir { modified }) => Ok(EntryMeta {
                modified: *modified,
                size: 0,
                is_dir: true,
            }),
            Some(Node::File { bytes, modified }) => Ok(EntryMeta {
                modified: *modified,
                size: bytes.len() as u64,
                is_dir: false,
            }),
            None => Err(not_found(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn memory() -> (Arc<ManualClock>, MemoryStorage) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let storage = MemoryStorage::new(clock.clone());
        (clock, storage)
    }

    #[test]
    fn test_local_write_replaces_without_leaving_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new();
        let path = dir.path().join("record.json");

        storage.write(&path, b"first").unwrap();
        storage.write(&path, b"second").unwrap();

        assert_eq!(storage.read(&path).unwrap(), b"second".to_vec());
        assert_eq!(storage.list(dir.path()).unwrap(), vec![path.clone()]);
        assert_eq!(storage.metadata(&path).unwrap().size, 6);
    }

    #[test]
    fn test_local_write_into_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new();
        let path = dir.path().join("missing").join("record.json");
        assert!(storage.write(&path, b"x").is_err());
        assert!(!storage.exists(&path));
    }

    #[test]
    fn test_local_copy_dir_all() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new();
        let src = dir.path().join("src");
        storage.create_dir_all(&src.join("nested")).unwrap();
        storage.write(&src.join("a.json"), b"a").unwrap();
        storage.write(&src.join("nested").join("b.json"), b"b").unwrap();

        let dst = dir.path().join("dst");
        storage.copy_dir_all(&src, &dst).unwrap();

        assert_eq!(storage.read(&dst.join("a.json")).unwrap(), b"a".to_vec());
        assert_eq!(
            storage.read(&dst.join("nested").join("b.json")).unwrap(),
            b"b".to_vec()
        );
    }

    #[test]
    fn test_memory_write_requires_parent() {
        let (_clock, storage) = memory();
        assert!(storage.write(Path::new("/root/a.json"), b"x").is_err());

        storage.create_dir_all(Path::new("/root")).unwrap();
        storage.write(Path::new("/root/a.json"), b"x").unwrap();
        assert_eq!(storage.read(Path::new("/root/a.json")).unwrap(), b"x".to_vec());
        assert_eq!(storage.file_count(), 1);
    }

    #[test]
    fn test_memory_list_returns_immediate_children_only() {
        let (_clock, storage) = memory();
        storage.create_dir_all(Path::new("/root/s1")).unwrap();
        storage.write(Path::new("/root/a.json"), b"a").unwrap();
        storage.write(Path::new("/root/s1/b.json"), b"b").unwrap();

        let children = storage.list(Path::new("/root")).unwrap();
        assert_eq!(
            children,
            vec![PathBuf::from("/root/a.json"), PathBuf::from("/root/s1")]
        );
    }

    #[test]
    fn test_memory_mtime_follows_clock() {
        let (clock, storage) = memory();
        storage.create_dir_all(Path::new("/root")).unwrap();
        let first = clock.now();
        storage.write(Path::new("/root/a.json"), b"a").unwrap();
        clock.advance(Duration::hours(3));
        storage.write(Path::new("/root/b.json"), b"bb").unwrap();

        let a = storage.metadata(Path::new("/root/a.json")).unwrap();
        let b = storage.metadata(Path::new("/root/b.json")).unwrap();
        assert_eq!(a.modified, first);
        assert_eq!(b.modified, first + Duration::hours(3));
        assert_eq!(b.size, 2);
        assert!(!b.is_dir);
    }

    #[test]
    fn test_memory_remove_dir_refuses_non_empty() {
        let (_clock, storage) = memory();
        storage.create_dir_all(Path::new("/root/s1")).unwrap();
        storage.write(Path::new("/root/s1/a.json"), b"a").unwrap();

        assert!(storage.remove_dir(Path::new("/root/s1")).is_err());
        storage.remove_file(Path::new("/root/s1/a.json")).unwrap();
        storage.remove_dir(Path::new("/root/s1")).unwrap();
        assert!(!storage.exists(Path::new("/root/s1")));
    }

    #[test]
    fn test_memory_rename_moves_tree() {
        let (_clock, storage) = memory();
        storage.create_dir_all(Path::new("/root/s1/deep")).unwrap();
        storage.write(Path::new("/root/s1/deep/a.json"), b"a").unwrap();
        storage.create_dir_all(Path::new("/root/taken")).unwrap();

        assert!(storage
            .rename(Path::new("/root/s1"), Path::new("/root/taken"))
            .is_err());
        storage
            .rename(Path::new("/root/s1"), Path::new("/root/s2"))
            .unwrap();
        assert!(!storage.exists(Path::new("/root/s1")));
        assert!(storage.is_dir(Path::new("/root/s2")));
        assert_eq!(
            storage.read(Path::new("/root/s2/deep/a.json")).unwrap(),
            b"a".to_vec()
        );
    }

    #[test]
    fn test_local_rename_refuses_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new();
        let from = dir.path().join("from");
        let to = dir.path().join("to");
        storage.create_dir_all(&from).unwrap();
        storage.write(&from.join("a.json"), b"a").unwrap();
        storage.create_dir_all(&to).unwrap();

        assert!(storage.rename(&from, &to).is_err());
        storage.remove_dir(&to).unwrap();
        storage.rename(&from, &to).unwrap();
        assert_eq!(storage.read(&to.join("a.json")).unwrap(), b"a".to_vec());
    }

    #[test]
    fn test_memory_remove_dir_all_removes_descendants() {
        let (_clock, storage) = memory();
        storage.create_dir_all(Path::new("/root/s1/deep")).unwrap();
        storage.write(Path::new("/root/s1/deep/a.json"), b"a").unwrap();
        storage.write(Path::new("/root/keep.json"), b"k").unwrap();

        storage.remove_dir_all(Path::new("/root/s1")).unwrap();
        assert!(!storage.exists(Path::new("/root/s1/deep/a.json")));
        assert!(storage.exists(Path::new("/root/keep.json")));
    }
}
