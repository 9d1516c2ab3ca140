//! Local filesystem storage backend.
//!
//! Files are stored in a configured directory and accessed using standard
//! filesystem operations via `tokio::fs` for async I/O.

use crate::backend::{FileInfoStream, WriteOutcome};
use crate::error::ErrorKind;
use crate::{FileInfo, StorageBackend, error::Result, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self, DirEntry, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Marks files that are still being written; they are never listed.
const TEMP_MARKER: &str = ".tmp-";
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

enum WalkEntry {
    File(FileInfo),
    Descend(PathBuf),
    Skip,
}

/// A hidden sibling of the destination that data is written to first.
///
/// Removed when dropped, including when the writing future is cancelled.
/// Once it has been renamed or linked into place, removing it is harmless.
struct TempFile {
    path: PathBuf,
}
impl TempFile {
    fn beside(destination: &Path) -> Self {
        let file_name = destination.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
        let unique = format!("{}-{}", std::process::id(), TEMP_COUNTER.fetch_add(1, Ordering::Relaxed));
        Self {
            path: destination.with_file_name(format!(".{file_name}{TEMP_MARKER}{unique}")),
        }
    }

    fn is_temp(path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with('.') && name.contains(TEMP_MARKER))
    }
}
impl Drop for TempFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove temporary file"),
        }
    }
}

/// Local filesystem storage backend.
///
/// Stores files in a directory on the local filesystem. All paths are relative
/// to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use shelf_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("media", "/srv/shelf/media")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Root directory for stored files
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend, creating the root directory if
    /// it doesn't exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPath`](ErrorKind::InvalidPath) if the root is not
    /// absolute or is not a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Happens once at startup; not worth making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    /// Get the absolute path for a relative storage path.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    /// Convert an absolute path back to a relative storage path.
    fn relative_path(&self, absolute: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = absolute.as_ref();
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{:?}` is not within root `{:?}`", absolute, self.root))
        })?;
        validate_path(relative)
    }

    fn metadata(path: &Path, metadata: Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?;
        Ok(FileInfo::new(path, metadata.len(), modified))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    async fn create_parent(&self, absolute: &Path, path: &Path) -> Result<()> {
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        Ok(())
    }

    /// Write `data` to a synced temporary file next to `absolute`.
    async fn write_temp(&self, absolute: &Path, path: &Path, data: &[u8]) -> Result<TempFile> {
        let temp = TempFile::beside(absolute);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp.path)
            .await
            .map_err(|e| Self::map_io_error(e, path))?;
        file.write_all(data).await.map_err(|e| Self::map_io_error(e, path))?;
        file.sync_all().await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(temp)
    }

    async fn process_entry(&self, entry: DirEntry, prefix: Option<&Path>) -> Result<WalkEntry> {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
        let relative = self.relative_path(&path)?;
        if metadata.is_dir() {
            // Descend into directories on the way to the prefix as well as below it.
            let on_the_way = prefix.is_none_or(|pfx| relative.starts_with(pfx) || pfx.starts_with(&relative));
            return Ok(if on_the_way { WalkEntry::Descend(path) } else { WalkEntry::Skip });
        }
        if let Some(pfx) = prefix
            && !relative.starts_with(pfx)
        {
            return Ok(WalkEntry::Skip);
        }
        if metadata.is_file() && !TempFile::is_temp(&relative) {
            return Ok(WalkEntry::File(Self::metadata(&relative, metadata)?));
        }
        // Silently drop what is most likely a broken symlink.
        Ok(WalkEntry::Skip)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };
        let mut stack = vec![self.root.clone()];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // A directory that doesn't exist lists as empty, same as a bucket.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current))); continue 'entries; },
                    };
                    match self.process_entry(entry, validated_prefix.as_deref()).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        self.create_parent(&abs_path, path).await?;
        let temp = self.write_temp(&abs_path, path, data).await?;
        Ok(fs::rename(&temp.path, &abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn write_if_absent(&self, path: &Path, data: &[u8]) -> Result<WriteOutcome> {
        let abs_path = self.absolute_path(path)?;
        let expected = data.len() as u64;
        match fs::metadata(&abs_path).await {
            Ok(existing) if existing.len() == expected => return Ok(WriteOutcome::AlreadyPresent),
            Ok(_) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => exn::bail!(Self::map_io_error(e, path)),
        }
        self.create_parent(&abs_path, path).await?;
        let temp = self.write_temp(&abs_path, path, data).await?;
        // A hard link never replaces an existing file, so a concurrent writer
        // of the same path cannot be clobbered.
        match fs::hard_link(&temp.path, &abs_path).await {
            Ok(()) => Ok(WriteOutcome::Written),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
                if existing.len() == expected {
                    return Ok(WriteOutcome::AlreadyPresent);
                }
                tracing::warn!(
                    path = %path.display(),
                    stored = existing.len(),
                    expected,
                    "Replacing partially written file"
                );
                fs::rename(&temp.path, &abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
                Ok(WriteOutcome::Replaced)
            },
            Err(e) => exn::bail!(Self::map_io_error(e, path)),
        }
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::remove_file(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Self::metadata(path, metadata)
    }
}
