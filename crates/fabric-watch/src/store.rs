//! Key/value store seam
//!
//! One trait serves both the configuration source (read-only, per-category
//! resource records) and the shared status snapshot (one key per node).
//! Keys are `/`-separated paths.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use thiserror::Error;

/// Store failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store task failed: {0}")]
    Task(String),
}

/// Minimal keyed store
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Value of `key`, `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Direct children of `prefix` as `(key, value)` pairs, in key order
    ///
    /// A missing prefix is an empty listing, not an error.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Create or replace `key`
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
}

fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Directory-backed store: one file per key under `root`
///
/// Writes go to a temporary file in the target directory and are renamed
/// into place, so readers never see a partial value.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Store rooted at `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory keys are resolved under
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key.trim_matches('/'));
        let valid = !key.trim_matches('/').is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn blocking<T, F>(key: &str, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> io::Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(work)
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
            .map_err(|source| StoreError::Io {
                key: key.to_string(),
                source,
            })
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        Self::blocking(key, move || match std::fs::read(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let dir = self.path_for(prefix)?;
        let base = prefix.to_string();
        Self::blocking(prefix, move || {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };

            let mut children = Vec::new();
            for entry in entries {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                // In-flight temporary files
                if name.starts_with('.') {
                    continue;
                }
                children.push((join_key(&base, &name), std::fs::read(entry.path())?));
            }
            children.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(children)
        })
        .await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        Self::blocking(key, move || {
            let parent = path
                .parent()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "key has no parent"))?;
            std::fs::create_dir_all(parent)?;

            let mut file = tempfile::Builder::new()
                .prefix(".fabric-")
                .tempfile_in(parent)?;
            io::Write::write_all(&mut file, &value)?;
            file.as_file().sync_all()?;
            file.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
    }
}

/// In-process store
///
/// `set_fail_writes(true)` makes every `put` fail with
/// [`StoreError::Unavailable`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, bypassing the write toggle
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.into(), value.into());
        }
    }

    /// Delete a key, bypassing the write toggle
    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.write().ok()?.remove(key)
    }

    /// Current value, bypassing the async interface
    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().ok()?.get(key).cloned()
    }

    /// Make every following `put` fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.get(key).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        let prefix = join_key(prefix, "");
        Ok(entries
            .iter()
            .filter(|(key, _)| {
                key.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("write to '{}' refused", key)));
        }
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_put_get() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        assert!(store.get("status/pop-1").await.unwrap().is_none());

        store.put("status/pop-1", b"[]".to_vec()).await.unwrap();
        assert_eq!(store.get("status/pop-1").await.unwrap().unwrap(), b"[]");

        store.put("status/pop-1", b"[1]".to_vec()).await.unwrap();
        assert_eq!(store.get("status/pop-1").await.unwrap().unwrap(), b"[1]");
    }

    #[tokio::test]
    async fn test_file_store_list_direct_children() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        store.put("fabric/n1/ports/b", b"2".to_vec()).await.unwrap();
        store.put("fabric/n1/ports/a", b"1".to_vec()).await.unwrap();
        store.put("fabric/n1/ports/deep/x", b"3".to_vec()).await.unwrap();
        std::fs::write(dir.path().join("fabric/n1/ports/.partial"), b"?").unwrap();

        let listed = store.list("fabric/n1/ports").await.unwrap();
        assert_eq!(
            listed,
            vec![
                ("fabric/n1/ports/a".to_string(), b"1".to_vec()),
                ("fabric/n1/ports/b".to_string(), b"2".to_vec()),
            ]
        );

        assert!(store.list("fabric/n1/tunnels").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        for key in ["", "/", "../etc/passwd", "a/../../b"] {
            assert!(
                matches!(store.get(key).await, Err(StoreError::InvalidKey(_))),
                "key {:?} accepted",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_memory_store_list_and_fail_writes() {
        let store = MemoryStore::new();
        store.insert("fabric/n1/ports/p1", "x");
        store.insert("fabric/n1/ports/p2", "y");
        store.insert("fabric/n1/portsx/p3", "z");
        store.insert("fabric/n1/ports/nested/p4", "w");

        let keys: Vec<String> = store
            .list("fabric/n1/ports")
            .await
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec!["fabric/n1/ports/p1", "fabric/n1/ports/p2"]);

        store.set_fail_writes(true);
        assert!(store.put("k", b"v".to_vec()).await.is_err());
        store.set_fail_writes(false);
        store.put("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.value("k").unwrap(), b"v");
        assert_eq!(store.remove("k").unwrap(), b"v");
        assert!(store.get("k").await.unwrap().is_none());
    }
}
