//! Per-chapter serialization.
//!
//! Two ingests of the same chapter must never interleave: they would race on
//! the same storage prefix and on the catalog swap. Different chapters share
//! nothing and run in parallel.

use crate::models::ChapterId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// A registry of per-chapter async locks, keyed by storage prefix.
///
/// Waiters are served in arrival order, so of two concurrent re-uploads the
/// later one commits last and wins. Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct ChapterLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>,
}

/// Exclusive access to one chapter. Released on drop.
#[derive(Debug)]
pub struct ChapterGuard {
    prefix: PathBuf,
    _guard: OwnedMutexGuard<()>,
}
impl ChapterGuard {
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }
}

impl ChapterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `chapter`.
    pub async fn lock(&self, chapter: &ChapterId) -> ChapterGuard {
        let prefix = chapter.prefix();
        let mutex = {
            // The map stays consistent even if a holder panicked.
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on are only referenced by the map.
            locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            Arc::clone(locks.entry(prefix.clone()).or_default())
        };
        trace!(chapter = %prefix.display(), "waiting for chapter lock");
        ChapterGuard {
            prefix,
            _guard: mutex.lock_owned().await,
        }
    }

    /// Number of chapters currently locked or waited on.
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.values().filter(|mutex| Arc::strong_count(mutex) > 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn chapter(number: f64) -> ChapterId {
        ChapterId::new("berserk", None, number).unwrap()
    }

    #[tokio::test]
    async fn test_same_chapter_is_exclusive() {
        let locks = ChapterLocks::new();
        let held = locks.lock(&chapter(1.0)).await;
        let waiting = tokio::time::timeout(Duration::from_millis(50), locks.lock(&chapter(1.0))).await;
        assert!(waiting.is_err());
        drop(held);
        let reacquired = tokio::time::timeout(Duration::from_millis(50), locks.lock(&chapter(1.0))).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_different_chapters_do_not_block() {
        let locks = ChapterLocks::new();
        let _one = locks.lock(&chapter(1.0)).await;
        let two = tokio::time::timeout(Duration::from_millis(50), locks.lock(&chapter(2.0))).await;
        assert!(two.is_ok());
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = ChapterLocks::new();
        drop(locks.lock(&chapter(1.0)).await);
        assert_eq!(locks.active(), 0);
        let _two = locks.lock(&chapter(2.0)).await;
        assert_eq!(locks.locks.lock().unwrap().len(), 1);
    }
}
