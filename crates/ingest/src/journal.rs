//! Tracking the files one ingest attempt wrote, so they can be taken back.
//!
//! Only files that were *newly* written are recorded. A page whose path was
//! already occupied is shared with whatever put it there (a previous upload of
//! the same chapter, most likely) and must survive a rollback.

use crate::lock::ChapterGuard;
use shelf_storage::error::{ErrorKind as StorageErrorKind, Result as StorageResult};
use shelf_storage::{BackendHandle, WriteOutcome};
use std::mem;
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;
use tracing::{debug, error, instrument, warn};

/// Newly written files of one attempt.
///
/// While armed, dropping the journal removes its files in a task spawned on
/// the current Tokio runtime; this covers an ingest future that is abandoned
/// part way through. A held [`ChapterGuard`] moves into that task, so the
/// chapter stays locked until the cleanup is done.
pub struct WriteJournal {
    backend: BackendHandle,
    written: Vec<PathBuf>,
    armed: bool,
    guard: Option<ChapterGuard>,
}

impl WriteJournal {
    pub fn new(backend: BackendHandle) -> Self {
        Self {
            backend,
            written: Vec::new(),
            armed: true,
            guard: None,
        }
    }

    /// Keep `guard` alive for as long as this journal (or its background
    /// cleanup) lives.
    pub fn hold(&mut self, guard: ChapterGuard) {
        self.guard = Some(guard);
    }

    /// Store `data` at `path` unless it is already there, recording the path
    /// if it was newly written.
    ///
    /// A repaired file (left truncated by an earlier interrupted write) is
    /// not recorded: a committed page set may already point at it.
    pub async fn write_if_absent(&mut self, path: &Path, data: &[u8]) -> StorageResult<WriteOutcome> {
        let outcome = self.backend.write_if_absent(path, data).await?;
        match outcome {
            WriteOutcome::Written => self.written.push(path.to_path_buf()),
            WriteOutcome::Replaced => warn!(path = %path.display(), "repaired partially written page"),
            WriteOutcome::AlreadyPresent => {},
        }
        debug!(path = %path.display(), ?outcome, "stored page");
        Ok(outcome)
    }

    /// Paths newly written so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Keep everything written so far. Returns the newly written paths.
    ///
    /// The journal stays alive (and keeps holding its guard, if any) until it
    /// is dropped, but dropping it no longer removes anything.
    pub fn commit(&mut self) -> Vec<PathBuf> {
        self.armed = false;
        self.written.clone()
    }

    /// Remove every newly written file now.
    ///
    /// Returns the paths that could not be removed; they are orphans and have
    /// already been logged.
    #[instrument(skip_all, fields(files = self.written.len()))]
    pub async fn rollback(mut self) -> Vec<PathBuf> {
        self.armed = false;
        let written = mem::take(&mut self.written);
        purge(&self.backend, written).await
    }
}

impl Drop for WriteJournal {
    fn drop(&mut self) {
        if !self.armed || self.written.is_empty() {
            return;
        }
        let written = mem::take(&mut self.written);
        match Handle::try_current() {
            Ok(handle) => {
                warn!(files = written.len(), "ingest abandoned, removing its files in the background");
                let backend = self.backend.clone();
                let guard = self.guard.take();
                handle.spawn(async move {
                    purge(&backend, written).await;
                    drop(guard);
                });
            },
            Err(_) => {
                for path in &written {
                    error!(path = %path.display(), "ingest abandoned outside a runtime, file orphaned");
                }
            },
        }
    }
}

/// Delete `paths`, returning those that could not be deleted. Files that are
/// already gone count as deleted.
pub(crate) async fn purge(backend: &BackendHandle, paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut orphaned = Vec::new();
    for path in paths {
        match backend.delete(&path).await {
            Ok(()) => debug!(path = %path.display(), "removed file"),
            Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => {},
            Err(e) => {
                warn!(path = %path.display(), error = ?e, "could not remove file, orphaned");
                orphaned.push(path);
            },
        }
    }
    orphaned
}
