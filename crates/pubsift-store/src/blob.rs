//! Blob storage addressed by `(container, path)`.
//!
//! Absence is a value (`Ok(None)`), not an error: callers treat a missing
//! inventory, chunk or removal list as empty.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use pubsift_core::{RetryPolicy, Retryable, retry_with_backoff};

/// Page size used by [`list_all`].
pub const LIST_PAGE: usize = 1000;

/// Error from a storage backend
#[derive(Debug)]
pub enum StoreError {
    /// Local filesystem failure
    Io(io::Error),
    /// Backend temporarily unreachable
    Unavailable(String),
    /// Object exists but could not be decoded
    Corrupt { path: String, message: String },
    /// Object could not be encoded before upload
    Encode(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO: {e}"),
            Self::Unavailable(msg) => write!(f, "storage unavailable: {msg}"),
            Self::Corrupt { path, message } => write!(f, "corrupt object {path}: {message}"),
            Self::Encode(msg) => write!(f, "encode error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(e) => !matches!(
                e.kind(),
                io::ErrorKind::StorageFull | io::ErrorKind::PermissionDenied | io::ErrorKind::InvalidInput
            ),
            Self::Unavailable(_) => true,
            Self::Corrupt { .. } | Self::Encode(_) => false,
        }
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        StoreError::is_retryable(self)
    }
}

/// Object storage contract.
pub trait BlobStore: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist.
    fn get(&self, container: &str, path: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Create or overwrite an object.
    fn put(&self, container: &str, path: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Names under `prefix`, sorted, strictly after `marker`, at most `limit`.
    fn list(
        &self,
        container: &str,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;
}

impl<S: BlobStore + ?Sized> BlobStore for &S {
    fn get(&self, container: &str, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(container, path)
    }

    fn put(&self, container: &str, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        (**self).put(container, path, bytes)
    }

    fn list(
        &self,
        container: &str,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        (**self).list(container, prefix, marker, limit)
    }
}

impl<S: BlobStore + ?Sized> BlobStore for std::sync::Arc<S> {
    fn get(&self, container: &str, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(container, path)
    }

    fn put(&self, container: &str, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        (**self).put(container, path, bytes)
    }

    fn list(
        &self,
        container: &str,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        (**self).list(container, prefix, marker, limit)
    }
}

/// Enumerate every name under `prefix`, following the marker page by page.
pub fn list_all<S: BlobStore + ?Sized>(
    store: &S,
    container: &str,
    prefix: &str,
) -> Result<Vec<String>, StoreError> {
    let mut names = Vec::new();
    loop {
        let marker = names.last().cloned();
        let page = store.list(container, prefix, marker.as_deref(), LIST_PAGE)?;
        let done = page.len() < LIST_PAGE;
        names.extend(page);
        if done {
            return Ok(names);
        }
    }
}

/// Filesystem backend: `{root}/{container}/{path}`.
///
/// Writes go to a `.tmp` sibling and are renamed into place, so readers
/// never observe a half-written object.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, container: &str, path: &str) -> Result<PathBuf, StoreError> {
        if path.is_empty() || path.split('/').any(|seg| seg.is_empty() || seg == "..") {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid object path {path:?}"),
            )));
        }
        Ok(self.root.join(container).join(path))
    }
}

impl BlobStore for FsBlobStore {
    fn get(&self, container: &str, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.object_path(container, path)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, container: &str, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let final_path = self.object_path(container, path)?;
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_name = final_path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    fn list(
        &self,
        container: &str,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let base = self.root.join(container);
        let mut names = Vec::new();
        if base.is_dir() {
            walk(&base, &base, &mut names)?;
        }
        names.retain(|n| n.starts_with(prefix) && marker.is_none_or(|m| n.as_str() > m));
        names.sort();
        names.truncate(limit);
        Ok(names)
    }
}

/// Collect object names (relative, `/`-separated) below `dir`.
fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(base, &path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "tmp") {
            continue;
        } else if let Ok(rel) = path.strip_prefix(base) {
            let name: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(name.join("/"));
        }
    }
    Ok(())
}

/// In-memory backend for tests and dry runs.
///
/// Counts writes so callers can assert that an unchanged run stored nothing,
/// and can inject transient failures to exercise [`RetryingStore`].
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    puts: AtomicUsize,
    failures: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    /// Make the next `n` operations fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::Relaxed);
    }

    pub fn contains(&self, container: &str, path: &str) -> bool {
        self.lock()
            .contains_key(&(container.to_string(), path.to_string()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(String, String), Vec<u8>>> {
        self.objects.lock().expect("memory store lock poisoned")
    }

    fn injected_failure(&self) -> Result<(), StoreError> {
        let injected = self
            .failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(StoreError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, container: &str, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.injected_failure()?;
        Ok(self
            .lock()
            .get(&(container.to_string(), path.to_string()))
            .cloned())
    }

    fn put(&self, container: &str, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.injected_failure()?;
        self.lock()
            .insert((container.to_string(), path.to_string()), bytes.to_vec());
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn list(
        &self,
        container: &str,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        self.injected_failure()?;
        Ok(self
            .lock()
            .keys()
            .filter(|(c, n)| c == container && n.starts_with(prefix))
            .map(|(_, n)| n)
            .filter(|n| marker.is_none_or(|m| n.as_str() > m))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Wraps a backend and retries transient failures with exponential backoff.
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: BlobStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: BlobStore> BlobStore for RetryingStore<S> {
    fn get(&self, container: &str, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        retry_with_backoff(&format!("get {container}/{path}"), self.policy, || {
            self.inner.get(container, path)
        })
    }

    fn put(&self, container: &str, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        retry_with_backoff(&format!("put {container}/{path}"), self.policy, || {
            self.inner.put(container, path, bytes)
        })
    }

    fn list(
        &self,
        container: &str,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        retry_with_backoff(&format!("list {container}/{prefix}"), self.policy, || {
            self.inner.list(container, prefix, marker, limit)
        })
    }
}
