//! One call per upload: lock the chapter, extract, commit.

use crate::catalog::CatalogHandle;
use crate::error::{ErrorKind, Result};
use crate::extract::Extractor;
use crate::limits::{DecodeLimits, Limits};
use crate::lock::ChapterLocks;
use crate::models::ChapterId;
use crate::replace::{ReplaceOutcome, Replacer};
use crate::sniff::ImageSniffer;
use crate::validate::validate_upload;
use exn::ResultExt;
use shelf_storage::BackendHandle;
use shelf_storage::error::ErrorKind as StorageErrorKind;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use tracing::{error, info, instrument, warn};

/// Archive ingestion for a page store and a catalog.
///
/// Same-chapter ingests are serialized in arrival order; different chapters
/// proceed in parallel. Cloning is cheap and clones share the chapter locks.
///
/// ```no_run
/// use shelf_ingest::{ChapterId, Pipeline, catalog::CatalogHandle};
/// use shelf_storage::BackendHandle;
/// use std::path::Path;
///
/// # async fn example(backend: BackendHandle, catalog: CatalogHandle) -> shelf_ingest::error::Result<()> {
/// let pipeline = Pipeline::new(backend, catalog);
/// let chapter = ChapterId::new("berserk", Some(1), 1.0)?;
/// let outcome = pipeline.ingest_upload(&chapter, Path::new("uploads/berserk-v01-c001.cbz")).await?;
/// for page in outcome.pages.descriptors() {
///     println!("{} -> {}", page.ordinal, page.storage_path.display());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    backend: BackendHandle,
    extractor: Extractor,
    replacer: Replacer,
    locks: ChapterLocks,
}

impl Pipeline {
    pub fn new(backend: BackendHandle, catalog: CatalogHandle) -> Self {
        Self {
            extractor: Extractor::new(backend.clone()),
            replacer: Replacer::new(backend.clone(), catalog),
            backend,
            locks: ChapterLocks::new(),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.extractor = self.extractor.with_limits(limits);
        self
    }

    pub fn with_decode_limits(mut self, limits: DecodeLimits) -> Self {
        self.extractor = self.extractor.with_sniffer(ImageSniffer::new(limits));
        self
    }

    /// Extract `archive` into `chapter` and make it the chapter's live page
    /// set, replacing whatever was there.
    ///
    /// Waits for any ingest of the same chapter already in progress. On
    /// error nothing this call wrote is left behind and the previous page set
    /// is still live.
    #[instrument(skip_all, fields(chapter = %chapter))]
    pub async fn ingest<R: Read + Seek + Send>(&self, chapter: &ChapterId, archive: R) -> Result<ReplaceOutcome> {
        let guard = self.locks.lock(chapter).await;
        let extraction = self.extractor.extract_locked(chapter, archive, guard).await?;
        let outcome = self.replacer.replace(chapter, extraction).await?;
        info!(pages = outcome.pages.len(), "chapter ingested");
        Ok(outcome)
    }

    /// Ingest an archive that was uploaded into the page store at `upload`.
    ///
    /// The upload's name and size are checked before it is read. The
    /// uploaded archive is deleted afterwards whether the ingest succeeded or
    /// not; only the derived pages are kept.
    #[instrument(skip_all, fields(chapter = %chapter, upload = %upload.display()))]
    pub async fn ingest_upload(&self, chapter: &ChapterId, upload: &Path) -> Result<ReplaceOutcome> {
        let result = self.ingest_upload_inner(chapter, upload).await;
        match self.backend.delete(upload).await {
            Ok(()) => {},
            Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => {},
            Err(e) => warn!(error = ?e, "could not delete uploaded archive"),
        }
        result
    }

    async fn ingest_upload_inner(&self, chapter: &ChapterId, upload: &Path) -> Result<ReplaceOutcome> {
        let storage_error = |e: &shelf_storage::error::Error| {
            if matches!(&**e, StorageErrorKind::NotFound(_)) {
                ErrorKind::UploadNotFound(upload.to_path_buf())
            } else {
                error!(error = ?e, "could not read uploaded archive");
                ErrorKind::Storage(upload.to_path_buf())
            }
        };

        let info = match self.backend.stat(upload).await {
            Ok(info) => info,
            Err(e) => {
                let kind = storage_error(&e);
                return Err(e).or_raise(|| kind);
            },
        };
        let file_name = upload.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
        validate_upload(&file_name, info.size, self.extractor.limits())
            .map_err(|reason| exn::Exn::from(ErrorKind::Rejected(reason)))?;

        let bytes = match self.backend.read(upload).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let kind = storage_error(&e);
                return Err(e).or_raise(|| kind);
            },
        };
        self.ingest(chapter, Cursor::new(bytes)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::address;
    use crate::catalog::{MemoryCatalog, PageCatalog};
    use crate::test_support::{ZipBuilder, chapter_zip, png};
    use crate::validate::Rejection;
    use shelf_storage::StorageBackend;
    use shelf_storage::backend::{LocalBackend, MockBackend};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn setup() -> (Arc<MockBackend>, Arc<MemoryCatalog>, Pipeline) {
        let backend = Arc::new(MockBackend::default());
        let catalog = Arc::new(MemoryCatalog::new());
        let pipeline = Pipeline::new(backend.clone(), catalog.clone());
        (backend, catalog, pipeline)
    }

    fn chapter(number: f64) -> ChapterId {
        ChapterId::new("berserk", Some(1), number).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_upload_deletes_archive_on_success() {
        let (backend, catalog, pipeline) = setup();
        let upload = Path::new("uploads/chapter.cbz");
        backend.write(upload, &chapter_zip(&["01.png", "02.png"])).await.unwrap();

        let outcome = pipeline.ingest_upload(&chapter(1.0), upload).await.unwrap();
        assert_eq!(outcome.pages.len(), 2);
        assert!(!backend.exists(upload).await.unwrap());
        assert_eq!(catalog.pages(&chapter(1.0)).await.unwrap().map(|set| set.len()), Some(2));
    }

    #[tokio::test]
    async fn test_ingest_upload_deletes_archive_on_failure() {
        let (backend, catalog, pipeline) = setup();
        let upload = Path::new("uploads/chapter.zip");
        backend.write(upload, &ZipBuilder::new().file("readme.txt", b"no pages").finish()).await.unwrap();

        let err = pipeline.ingest_upload(&chapter(1.0), upload).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Rejected(Rejection::NoImages)));
        assert!(backend.paths().await.is_empty());
        assert_eq!(catalog.pages(&chapter(1.0)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ingest_upload_checks_name_and_size() {
        let (backend, _catalog, pipeline) = setup();
        let upload = Path::new("uploads/chapter.rar");
        backend.write(upload, &chapter_zip(&["01.png"])).await.unwrap();
        let err = pipeline.ingest_upload(&chapter(1.0), upload).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Rejected(Rejection::UnsupportedUpload(_))));

        let pipeline = pipeline.with_limits(Limits {
            max_archive_bytes: 10,
            ..Limits::default()
        });
        let upload = Path::new("uploads/chapter.cbz");
        backend.write(upload, &chapter_zip(&["01.png"])).await.unwrap();
        let err = pipeline.ingest_upload(&chapter(1.0), upload).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Rejected(Rejection::ArchiveTooLarge { limit: 10, .. })));
        assert!(backend.paths().await.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_upload_missing() {
        let (_backend, _catalog, pipeline) = setup();
        let err = pipeline.ingest_upload(&chapter(1.0), Path::new("uploads/gone.cbz")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UploadNotFound(_)));
    }

    #[tokio::test]
    async fn test_reupload_replaces_and_cleans_up() {
        let (backend, catalog, pipeline) = setup();
        let first = ZipBuilder::new().file("01.png", &png(10, 10, 1)).file("02.png", &png(10, 10, 2)).finish();
        let second = ZipBuilder::new().file("01.png", &png(10, 10, 3)).finish();

        pipeline.ingest(&chapter(1.0), Cursor::new(first)).await.unwrap();
        let outcome = pipeline.ingest(&chapter(1.0), Cursor::new(second)).await.unwrap();
        assert_eq!(outcome.removed.len(), 2);
        let live: Vec<PathBuf> = outcome.pages.paths().into_iter().map(PathBuf::from).collect();
        assert_eq!(backend.paths().await, live);
        assert_eq!(catalog.pages(&chapter(1.0)).await.unwrap(), Some(outcome.pages));
    }

    #[tokio::test]
    async fn test_truncated_page_from_interrupted_write_is_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(LocalBackend::new("local", dir.path()).unwrap());
        let catalog = Arc::new(MemoryCatalog::new());
        let pipeline = Pipeline::new(backend.clone(), catalog.clone());
        let page = png(10, 10, 7);
        let stored_at = address(&chapter(1.0), &page, "png").path;
        backend.write(&stored_at, &page[..page.len() / 3]).await.unwrap();

        let archive = ZipBuilder::new().file("01.png", &page).finish();
        let outcome = pipeline.ingest(&chapter(1.0), Cursor::new(archive)).await.unwrap();
        assert_eq!(outcome.pages.pages()[0].path, stored_at);
        let stored = backend.read(&stored_at).await.unwrap();
        assert_eq!(stored, page);
        assert!(ImageSniffer::default().sniff(&stored).is_ok());
        assert_eq!(catalog.pages(&chapter(1.0)).await.unwrap(), Some(outcome.pages));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_chapters() {
        let (backend, catalog, pipeline) = setup();
        let tasks: Vec<_> = (1..=4)
            .map(|n| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    let archive = ZipBuilder::new()
                        .file("01.png", &png(10, 10, n))
                        .file("02.png", &png(10, 10, n + 100))
                        .finish();
                    pipeline.ingest(&chapter(f64::from(n)), Cursor::new(archive)).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(backend.paths().await.len(), 8);
        for n in 1..=4u8 {
            assert_eq!(catalog.pages(&chapter(f64::from(n))).await.unwrap().map(|set| set.len()), Some(2));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_chapter_ingests_serialize() {
        let (backend, catalog, pipeline) = setup();
        let tasks: Vec<_> = (1..=5u8)
            .map(|seed| {
                let pipeline = pipeline.clone();
                let archive = ZipBuilder::new().file("01.png", &png(10, 10, seed)).finish();
                tokio::spawn(async move { pipeline.ingest(&chapter(1.0), Cursor::new(archive)).await })
            })
            .collect();
        let mut removed = 0;
        for task in tasks {
            removed += task.await.unwrap().unwrap().removed.len();
        }
        // Every ingest but the first replaced exactly one page, and only the
        // pages of whichever ingest committed last are still stored.
        assert_eq!(removed, 4);
        let live = catalog.pages(&chapter(1.0)).await.unwrap().unwrap();
        let stored: Vec<PathBuf> = live.paths().into_iter().map(PathBuf::from).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(backend.paths().await, stored);
    }

    #[tokio::test]
    async fn test_abandoned_ingest_cleans_up_and_unlocks() {
        let (backend, catalog, pipeline) = setup();
        let archive = chapter_zip(&["01.png", "02.png", "03.png"]);

        // Extract under the chapter lock, then abandon the uncommitted result.
        let extraction = pipeline
            .extractor
            .extract_locked(&chapter(1.0), Cursor::new(archive.clone()), pipeline.locks.lock(&chapter(1.0)).await)
            .await
            .unwrap();
        drop(extraction);

        // The next ingest waits for the background cleanup, then succeeds.
        let outcome = pipeline.ingest(&chapter(1.0), Cursor::new(archive)).await.unwrap();
        assert_eq!(outcome.written.len(), 3);
        assert_eq!(backend.paths().await.len(), 3);
        assert_eq!(catalog.pages(&chapter(1.0)).await.unwrap().map(|set| set.len()), Some(3));
    }
}
