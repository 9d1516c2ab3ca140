//! Committing an extraction: swapping a chapter's live page set.

use crate::catalog::CatalogHandle;
use crate::error::{ErrorKind, Result};
use crate::extract::Extraction;
use crate::journal::purge;
use crate::models::{ChapterId, PageSet};
use exn::ResultExt;
use shelf_storage::BackendHandle;
use std::path::PathBuf;
use tracing::{error, info, instrument, warn};

/// What a successful replace did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// The chapter's pages, now live.
    pub pages: PageSet,
    /// Files the new set added to the page store.
    pub written: Vec<PathBuf>,
    /// Files of the previous set that were removed.
    pub removed: Vec<PathBuf>,
    /// Files of the previous set that could not be removed. They are no
    /// longer referenced and can be swept later.
    pub orphaned: Vec<PathBuf>,
}

/// Swaps a chapter's committed page set for a freshly extracted one.
#[derive(Clone)]
pub struct Replacer {
    backend: BackendHandle,
    catalog: CatalogHandle,
}

impl Replacer {
    pub fn new(backend: BackendHandle, catalog: CatalogHandle) -> Self {
        Self { backend, catalog }
    }

    /// Make `extraction` the chapter's live page set.
    ///
    /// The catalog swap is the commit point. If it fails, the extraction's
    /// files are removed and [`Replace`](ErrorKind::Replace) is returned; the
    /// previous page set stays live. Once it succeeds, files of the previous
    /// set that the new set does not reuse are deleted. A failed deletion is
    /// logged and reported in [`ReplaceOutcome::orphaned`], never returned as
    /// an error.
    #[instrument(skip_all, fields(chapter = %chapter, pages = extraction.pages().len()))]
    pub async fn replace(&self, chapter: &ChapterId, extraction: Extraction) -> Result<ReplaceOutcome> {
        let previous = match self.catalog.swap(chapter, extraction.pages()).await {
            Ok(previous) => previous,
            Err(err) => {
                error!(error = ?err, "catalog swap failed, discarding new pages");
                extraction.discard().await;
                return Err(err).or_raise(|| ErrorKind::Replace);
            },
        };

        // From here on the new pages are live and must never be rolled back.
        // The journal (and any chapter guard it holds) lives until the end of
        // this function.
        let (pages, mut journal) = extraction.into_parts();
        let written = journal.commit();

        let stale: Vec<PathBuf> = match &previous {
            Some(previous) => {
                let live = pages.paths();
                previous.paths().into_iter().filter(|path| !live.contains(path)).map(PathBuf::from).collect()
            },
            None => Vec::new(),
        };
        let orphaned = purge(&self.backend, stale.clone()).await;
        if !orphaned.is_empty() {
            warn!(orphaned = orphaned.len(), "previous pages left behind");
        }
        let removed = stale.into_iter().filter(|path| !orphaned.contains(path)).collect();

        info!(
            written = written.len(),
            previous = previous.as_ref().map_or(0, PageSet::len),
            "page set committed"
        );
        drop(journal);
        Ok(ReplaceOutcome {
            pages,
            written,
            removed,
            orphaned,
        })
    }
}
