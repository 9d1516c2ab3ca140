//! In-memory storage backend for testing.

use super::{FileInfoStream, WriteOutcome};
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::StorageBackend;

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation.
///
/// Failures can be injected to exercise cleanup paths: see
/// [`fail_writes_after`](Self::fail_writes_after) and
/// [`fail_deletes`](Self::fail_deletes). Every successful write is counted
/// (see [`writes`](Self::writes)).
///
/// # Examples
///
/// ```
/// use shelf_storage::backend::MockBackend;
/// use shelf_storage::StorageBackend;
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("uploads/chapter-1.cbz", b"PK..."),
/// ]);
/// assert!(backend.exists(Path::new("uploads/chapter-1.cbz")).await?);
/// assert_eq!(backend.writes(), 0);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<HashMap<PathBuf, (OffsetDateTime, Vec<u8>)>>,
    writes: AtomicUsize,
    write_budget: Option<usize>,
    fail_deletes: AtomicBool,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        let now = OffsetDateTime::now_utc();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            writes: AtomicUsize::new(0),
            write_budget: None,
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Allow `count` successful writes, then fail every write after that
    /// with [`BackendError`](ErrorKind::BackendError).
    pub fn fail_writes_after(mut self, count: usize) -> Self {
        self.write_budget = Some(count);
        self
    }

    /// Make every subsequent delete fail (or succeed again with `false`).
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of writes that actually stored data.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Sorted paths of every stored file.
    pub async fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.storage.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn file_info(path: &Path, size: u64, inserted: OffsetDateTime) -> FileInfo {
        FileInfo::new(path, size, inserted)
    }

    fn claim_write(&self, path: &Path) -> Result<()> {
        if let Some(budget) = self.write_budget
            && self.writes.load(Ordering::SeqCst) >= budget
        {
            exn::bail!(ErrorKind::BackendError(format!("injected write failure for {}", path.display())));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot under the read lock; never hold it across a yield.
            let entries: Vec<(PathBuf, OffsetDateTime, u64)> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| validated_prefix.as_ref().is_none_or(|pfx| path.starts_with(pfx)))
                    .map(|(path, (inserted, data))| (path.clone(), *inserted, data.len() as u64))
                    .collect()
            };
            for (path, inserted, size) in entries {
                yield Ok(Self::file_info(&path, size, inserted));
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let (_inserted, data) =
            self.storage.read().await.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        Ok(data)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        self.claim_write(&path)?;
        self.storage.write().await.insert(path, (OffsetDateTime::now_utc(), data.to_vec()));
        Ok(())
    }

    async fn write_if_absent(&self, path: &Path, data: &[u8]) -> Result<WriteOutcome> {
        let path = validate_path(path)?;
        let mut guard = self.storage.write().await;
        let outcome = match guard.get(&path) {
            Some((_, existing)) if existing.len() == data.len() => return Ok(WriteOutcome::AlreadyPresent),
            Some(_) => WriteOutcome::Replaced,
            None => WriteOutcome::Written,
        };
        self.claim_write(&path)?;
        guard.insert(path, (OffsetDateTime::now_utc(), data.to_vec()));
        Ok(outcome)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::BackendError(format!("injected delete failure for {}", path.display())));
        }
        self.storage.write().await.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let (inserted, data) = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(Self::file_info(&path, data.len() as u64, *inserted))
    }
}
