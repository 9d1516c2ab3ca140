use super::PageCatalog;
use super::error::{ErrorKind, Result};
use crate::models::{ChapterId, PageSet};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// In-memory page catalog for testing and embedding.
///
/// Page sets are keyed by chapter storage prefix. Swaps can be made to fail
/// with [`fail_swaps`](Self::fail_swaps) to exercise commit failures.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    chapters: RwLock<HashMap<PathBuf, PageSet>>,
    fail_swaps: AtomicBool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent swap fail (or succeed again with `false`).
    pub fn fail_swaps(&self, fail: bool) {
        self.fail_swaps.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PageCatalog for MemoryCatalog {
    async fn swap(&self, chapter: &ChapterId, pages: &PageSet) -> Result<Option<PageSet>> {
        if self.fail_swaps.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Unavailable);
        }
        Ok(self.chapters.write().await.insert(chapter.prefix(), pages.clone()))
    }

    async fn pages(&self, chapter: &ChapterId) -> Result<Option<PageSet>> {
        Ok(self.chapters.read().await.get(&chapter.prefix()).cloned())
    }
}
