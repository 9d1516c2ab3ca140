//! Storage backend trait and implementations.
//!
//! This module defines the [`StorageBackend`] trait, the page store the
//! ingest pipeline writes chapter pages into and reads uploaded archives
//! from. Where bytes physically live (local disk, a bucket) is up to the
//! implementation.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::error::Result;
use crate::file::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// The result of [`write_if_absent`](StorageBackend::write_if_absent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Nothing was stored at the path; the data has been written.
    Written,
    /// A file of the same length was already stored at the path; nothing was
    /// written.
    AlreadyPresent,
    /// A file of a different length was stored at the path, left there by an
    /// interrupted write. It has been replaced with the data.
    Replaced,
}

/// Unified interface for storage backends.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations should
/// enforce this validation.
///
/// # Content Addressing
/// Page files are stored at paths derived from a hash of their contents, so
/// the same path always holds the same bytes. [`write_if_absent`](Self::write_if_absent)
/// relies on that: finding *anything* at the path counts as success.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use shelf_storage::{StorageBackend, WriteOutcome, error::Result};
///
/// async fn store_page(backend: &dyn StorageBackend, bytes: &[u8]) -> Result<bool> {
///     let path = Path::new("series/berserk/vol1/ch1/0123456789abcdef0123456789abcdef.png");
///     let outcome = backend.write_if_absent(path, bytes).await?;
///     Ok(outcome == WriteOutcome::Written)
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend. Used for logging only.
    fn name(&self) -> &str;

    /// List all files matching an optional prefix.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream file metadata matching an optional prefix.
    ///
    /// Prefix matching is component-based: the prefix `series/a` matches
    /// `series/a/vol0/ch1/ff.png` but not `series/ab/vol0/ch1/ff.png`.
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file contents, creating or overwriting the file.
    ///
    /// Implementations should create parent directories as needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Write file contents only if nothing is stored at `path` yet.
    ///
    /// Meant for content-addressed paths, where the same path always means
    /// the same bytes. Returns [`WriteOutcome::AlreadyPresent`] (not an error)
    /// when a file of the same length is stored at the path; it is left
    /// untouched. A file of a different length can only be the remains of an
    /// interrupted write and is replaced ([`WriteOutcome::Replaced`]).
    ///
    /// A reader must never see a partially written file at `path`. The
    /// default implementation checks then writes, which is only safe when
    /// writers to the same path are serialized and [`write`](Self::write) is
    /// atomic. Backends that can create exclusively should override it.
    async fn write_if_absent(&self, path: &Path, data: &[u8]) -> Result<WriteOutcome> {
        match self.stat(path).await {
            Ok(info) if info.size == data.len() as u64 => return Ok(WriteOutcome::AlreadyPresent),
            Ok(_) => {
                self.write(path, data).await?;
                return Ok(WriteOutcome::Replaced);
            },
            Err(e) if matches!(&*e, crate::error::ErrorKind::NotFound(_)) => {},
            Err(e) => return Err(e),
        }
        self.write(path, data).await?;
        Ok(WriteOutcome::Written)
    }

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Get file metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;
}
