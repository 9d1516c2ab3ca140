//! The seam between ingestion and the catalog that owns page records.
//!
//! Ingestion never writes catalog metadata on its own. Once a chapter's pages
//! are stored, it hands the new [`PageSet`] to a [`PageCatalog`], which must
//! make it visible in one step: readers see either the old pages or the new
//! ones, never a mix and never nothing.

pub mod error;
#[cfg(any(test, feature = "mock"))]
mod memory;

#[cfg(any(test, feature = "mock"))]
pub use self::memory::MemoryCatalog;
use crate::catalog::error::Result;
use crate::models::{ChapterId, PageSet};
use async_trait::async_trait;
use std::sync::Arc;

pub type CatalogHandle = Arc<dyn PageCatalog + Send + Sync>;

/// Where a chapter's live page records are kept.
#[async_trait]
pub trait PageCatalog: Send + Sync {
    /// Atomically replace the chapter's page records with `pages`, returning
    /// the set that was live before (if any).
    ///
    /// On error nothing may have changed: the previous set stays live.
    async fn swap(&self, chapter: &ChapterId, pages: &PageSet) -> Result<Option<PageSet>>;

    /// The chapter's live page set, if it has one.
    async fn pages(&self, chapter: &ChapterId) -> Result<Option<PageSet>>;
}
