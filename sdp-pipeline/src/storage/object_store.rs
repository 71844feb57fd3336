//! Object store abstraction
//!
//! Objects are immutable byte blobs addressed by `/`-separated keys, each
//! carrying a content fingerprint and a string-to-string metadata map.
//!
//! Two implementations:
//! - [`FsObjectStore`]: directory tree, metadata in a `<key>.meta.json` sidecar
//! - [`InMemoryObjectStore`]: map-backed, with fault injection for tests

use async_trait::async_trait;
use sdp_common::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use walkdir::WalkDir;

const SIDECAR_SUFFIX: &str = ".meta.json";

/// Object content plus its fingerprint and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub fingerprint: String,
    pub metadata: BTreeMap<String, String>,
}

/// Object attributes without the content
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub fingerprint: String,
    pub size: u64,
    pub metadata: BTreeMap<String, String>,
}

/// Lowercase hex SHA-256 of the content; changes iff the bytes change
pub fn fingerprint(body: &[u8]) -> String {
    format!("{:x}", Sha256::digest(body))
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object; [`Error::NotFound`] if absent
    async fn get(&self, key: &str) -> Result<StoredObject>;

    /// Attributes of an object, `None` if absent
    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>>;

    /// Store an object with its metadata, returning the new fingerprint
    async fn put(&self, key: &str, body: Vec<u8>, metadata: BTreeMap<String, String>) -> Result<String>;

    /// Keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Filesystem-backed object store rooted at a directory
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path under the root, refusing anything that escapes it
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = key.is_empty()
            || key.ends_with(SIDECAR_SUFFIX)
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(Error::InvalidInput(format!("invalid object key: {}", key)));
        }
        Ok(self.root.join(relative))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    async fn read_metadata(path: &Path) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read(Self::sidecar_path(path)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<StoredObject> {
        let path = self.object_path(key)?;
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("object {}", key)));
            }
            Err(e) => return Err(e.into()),
        };
        let metadata = Self::read_metadata(&path).await?;

        Ok(StoredObject {
            fingerprint: fingerprint(&body),
            body,
            metadata,
        })
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        match self.get(key).await {
            Ok(object) => Ok(Some(ObjectInfo {
                key: key.to_string(),
                fingerprint: object.fingerprint,
                size: object.body.len() as u64,
                metadata: object.metadata,
            })),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>, metadata: BTreeMap<String, String>) -> Result<String> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Metadata first, so a visible object never lacks its sidecar
        let sidecar = Self::sidecar_path(&path);
        tokio::fs::write(&sidecar, serde_json::to_vec_pretty(&metadata)?).await?;

        let mut staging = path.as_os_str().to_os_string();
        staging.push(".partial");
        let staging = PathBuf::from(staging);
        tokio::fs::write(&staging, &body).await?;
        tokio::fs::rename(&staging, &path).await?;

        tracing::debug!(object_key = %key, bytes = body.len(), "Stored object");
        Ok(fingerprint(&body))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || {
            if !root.is_dir() {
                return Ok(Vec::new());
            }

            let mut keys = Vec::new();
            for entry in WalkDir::new(&root).follow_links(false) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!("Error accessing entry: {}", e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.ends_with(SIDECAR_SUFFIX) || key.ends_with(".partial") {
                    continue;
                }
                if key.starts_with(&prefix) {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| Error::Internal(format!("list task failed: {}", e)))?
    }
}

/// In-memory object store
///
/// `fail_next_gets` / `fail_next_puts` queue errors returned before the
/// store behaves normally again, so retry paths can be exercised.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, BTreeMap<String, String>)>>,
    get_failures: Mutex<VecDeque<Error>>,
    put_failures: Mutex<VecDeque<Error>>,
    puts: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an object without counting it as a pipeline write
    pub fn insert(&self, key: &str, body: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (body.into(), BTreeMap::new()));
    }

    pub fn fail_next_gets(&self, errors: impl IntoIterator<Item = Error>) {
        self.get_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(errors);
    }

    pub fn fail_next_puts(&self, errors: impl IntoIterator<Item = Error>) {
        self.put_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(errors);
    }

    /// Number of successful `put` calls
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &str) -> Result<StoredObject> {
        if let Some(err) = self.get_failures.lock().unwrap_or_else(|e| e.into_inner()).pop_front() {
            return Err(err);
        }
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let (body, metadata) = objects
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("object {}", key)))?;
        Ok(StoredObject {
            body: body.clone(),
            fingerprint: fingerprint(body),
            metadata: metadata.clone(),
        })
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        Ok(objects.get(key).map(|(body, metadata)| ObjectInfo {
            key: key.to_string(),
            fingerprint: fingerprint(body),
            size: body.len() as u64,
            metadata: metadata.clone(),
        }))
    }

    async fn put(&self, key: &str, body: Vec<u8>, metadata: BTreeMap<String, String>) -> Result<String> {
        if let Some(err) = self.put_failures.lock().unwrap_or_else(|e| e.into_inner()).pop_front() {
            return Err(err);
        }
        let etag = fingerprint(&body);
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (body, metadata));
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(etag)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        Ok(objects.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_fs_put_get_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let metadata = BTreeMap::from([("source-etag".to_string(), "e1".to_string())]);

        let etag = store.put("processed/a.csv", b"x,y\n".to_vec(), metadata.clone()).await.unwrap();
        let object = store.get("processed/a.csv").await.unwrap();

        assert_eq!(object.body, b"x,y\n");
        assert_eq!(object.fingerprint, etag);
        assert_eq!(object.metadata, metadata);
        assert!(dir.path().join("processed/a.csv.meta.json").exists());
    }

    #[tokio::test]
    async fn test_fs_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(matches!(store.get("input/none.csv").await, Err(Error::NotFound(_))));
        assert!(store.head("input/none.csv").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_list_skips_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.put("processed/b.csv", vec![1], BTreeMap::new()).await.unwrap();
        store.put("processed/a.csv", vec![2], BTreeMap::new()).await.unwrap();
        store.put("rejected/a.csv", vec![3], BTreeMap::new()).await.unwrap();

        let keys = store.list("processed/").await.unwrap();
        assert_eq!(keys, vec!["processed/a.csv", "processed/b.csv"]);
    }

    #[tokio::test]
    async fn test_fs_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(matches!(store.get("../etc/passwd").await, Err(Error::InvalidInput(_))));
        assert!(matches!(store.get("/abs.csv").await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_memory_fault_injection() {
        let store = InMemoryObjectStore::new();
        store.insert("input/a.csv", "h\n");
        store.fail_next_gets([Error::Transient("reset".into())]);

        assert!(store.get("input/a.csv").await.is_err());
        assert!(store.get("input/a.csv").await.is_ok());
        assert_eq!(store.put_count(), 0);
    }
}
