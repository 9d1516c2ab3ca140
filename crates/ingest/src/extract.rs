//! Turning a validated archive into stored, content-addressed pages.

use crate::address::address;
use crate::archive::Archive;
use crate::error::{ErrorKind, Result};
use crate::journal::WriteJournal;
use crate::limits::Limits;
use crate::lock::ChapterGuard;
use crate::models::{ChapterId, ExtractedPage, ImageKind, PageDescriptor, PageSet};
use crate::sniff::ImageSniffer;
use crate::validate::{ArchiveEntry, EntryClass, validate_with};
use exn::ResultExt;
use shelf_storage::BackendHandle;
use std::io::{Read, Seek};
use std::path::PathBuf;
use tracing::{debug, error, info, instrument};

/// Pages of one extraction attempt, stored but not yet committed.
///
/// Hand it to a [`Replacer`](crate::Replacer) to make it live, or
/// [`discard`](Self::discard) it. Dropping it uncommitted removes its newly
/// written files in the background.
pub struct Extraction {
    pages: PageSet,
    journal: WriteJournal,
}

impl Extraction {
    pub fn pages(&self) -> &PageSet {
        &self.pages
    }

    pub fn descriptors(&self) -> Vec<PageDescriptor> {
        self.pages.descriptors()
    }

    /// Files this attempt wrote. Pages whose bytes were already stored are
    /// not included.
    pub fn written(&self) -> &[PathBuf] {
        self.journal.written()
    }

    /// Remove this attempt's newly written files. Returns the ones that
    /// could not be removed.
    pub async fn discard(self) -> Vec<PathBuf> {
        self.journal.rollback().await
    }

    pub(crate) fn into_parts(self) -> (PageSet, WriteJournal) {
        (self.pages, self.journal)
    }
}

/// Validates archives and stores their pages.
#[derive(Clone)]
pub struct Extractor {
    backend: BackendHandle,
    limits: Limits,
    sniffer: ImageSniffer,
}

impl Extractor {
    pub fn new(backend: BackendHandle) -> Self {
        Self {
            backend,
            limits: Limits::default(),
            sniffer: ImageSniffer::default(),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_sniffer(mut self, sniffer: ImageSniffer) -> Self {
        self.sniffer = sniffer;
        self
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Validate `archive` and store every image in it under `chapter`.
    ///
    /// 1. The index is validated before anything is decompressed. A rejected
    ///    archive leaves no trace.
    /// 2. Images are taken in lexicographic name order (ties broken by index
    ///    position); ordinals follow that order, starting at 1.
    /// 3. Each image is decompressed, fully decoded, hashed and stored with
    ///    [`write_if_absent`](shelf_storage::StorageBackend::write_if_absent),
    ///    so re-extracting identical bytes writes nothing.
    ///
    /// Any failure part way through removes the files this call wrote before
    /// the error is returned.
    ///
    /// Decompression and decoding run inline on the calling task.
    pub async fn extract<R: Read + Seek + Send>(&self, chapter: &ChapterId, archive: R) -> Result<Extraction> {
        self.extract_inner(chapter, archive, None).await
    }

    /// [`extract`](Self::extract) while holding `guard`. The guard is
    /// released when the returned [`Extraction`] is committed or discarded
    /// (or, on failure, once cleanup is done).
    pub async fn extract_locked<R: Read + Seek + Send>(
        &self,
        chapter: &ChapterId,
        archive: R,
        guard: ChapterGuard,
    ) -> Result<Extraction> {
        self.extract_inner(chapter, archive, Some(guard)).await
    }

    #[instrument(skip_all, fields(chapter = %chapter))]
    async fn extract_inner<R: Read + Seek + Send>(
        &self,
        chapter: &ChapterId,
        archive: R,
        guard: Option<ChapterGuard>,
    ) -> Result<Extraction> {
        let mut archive = Archive::open(archive)?;
        let image_count = validate_with(archive.entries(), &self.limits)
            .into_result()
            .map_err(|reason| exn::Exn::from(ErrorKind::Rejected(reason)))?;

        let mut images: Vec<(ArchiveEntry, ImageKind)> = archive
            .entries()
            .iter()
            .filter_map(|entry| match entry.class() {
                EntryClass::Image(kind) => Some((entry.clone(), kind)),
                _ => None,
            })
            .collect();
        images.sort_by(|(a, _), (b, _)| a.name.cmp(&b.name).then(a.index.cmp(&b.index)));
        debug!(image_count, "archive accepted");

        let mut journal = WriteJournal::new(self.backend.clone());
        if let Some(guard) = guard {
            journal.hold(guard);
        }

        let mut pages = Vec::with_capacity(images.len());
        for (ordinal, (entry, kind)) in (1u32..).zip(images) {
            let page = self.extract_page(&mut archive, &mut journal, chapter, ordinal, &entry, kind).await;
            match page {
                Ok(page) => pages.push(page),
                Err(err) => {
                    journal.rollback().await;
                    return Err(err);
                },
            }
        }

        let pages = match PageSet::new(pages) {
            Ok(pages) => pages,
            Err(err) => {
                journal.rollback().await;
                return Err(err);
            },
        };
        info!(pages = pages.len(), written = journal.written().len(), "chapter extracted");
        Ok(Extraction { pages, journal })
    }

    async fn extract_page<R: Read + Seek>(
        &self,
        archive: &mut Archive<R>,
        journal: &mut WriteJournal,
        chapter: &ChapterId,
        ordinal: u32,
        entry: &ArchiveEntry,
        kind: ImageKind,
    ) -> Result<ExtractedPage> {
        let bytes = archive.read(entry)?;
        let info = self.sniffer.sniff_as(&bytes, kind).or_raise(|| ErrorKind::Decode(entry.name.clone()))?;
        let extension = entry.extension().unwrap_or_default();
        let address = address(chapter, &bytes, &extension);
        journal.write_if_absent(&address.path, &bytes).await.or_raise(|| {
            error!(path = %address.path.display(), entry = %entry.name, "page store refused a page");
            ErrorKind::Storage(address.path.clone())
        })?;
        debug!(ordinal, entry = %entry.name, path = %address.path.display(), "page stored");
        Ok(ExtractedPage {
            ordinal,
            fingerprint: address.fingerprint,
            extension,
            size: bytes.len() as u64,
            width: info.width,
            height: info.height,
            kind: info.kind,
            path: address.path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Fingerprint;
    use crate::test_support::{ZipBuilder, chapter_zip, jpeg, png};
    use crate::validate::Rejection;
    use shelf_storage::StorageBackend;
    use shelf_storage::backend::{LocalBackend, MockBackend};
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Arc;

    fn chapter() -> ChapterId {
        ChapterId::new("berserk", Some(1), 3.0).unwrap()
    }

    fn setup() -> (Arc<MockBackend>, Extractor) {
        let backend = Arc::new(MockBackend::default());
        let extractor = Extractor::new(backend.clone());
        (backend, extractor)
    }

    #[tokio::test]
    async fn test_ordinals_follow_name_order_not_index_order() {
        let (_backend, extractor) = setup();
        let first = jpeg(10, 10, 1);
        let second = jpeg(10, 10, 2);
        let archive = ZipBuilder::new().file("02.jpg", &second).file("01.jpg", &first).finish();

        let extraction = extractor.extract(&chapter(), Cursor::new(archive)).await.unwrap();
        let pages = extraction.pages().pages();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].ordinal, 1);
        assert_eq!(pages[0].fingerprint, Fingerprint::of(&first));
        assert_eq!(pages[1].ordinal, 2);
        assert_eq!(pages[1].fingerprint, Fingerprint::of(&second));
        assert_eq!((pages[0].width, pages[0].height), (10, 10));
        assert_eq!(pages[0].media_type(), "image/jpeg");
        extraction.discard().await;
    }

    #[tokio::test]
    async fn test_pages_are_content_addressed() {
        let (backend, extractor) = setup();
        let page = png(10, 10, 9);
        let archive = ZipBuilder::new().deflated().file("Page01.PNG", &page).finish();

        let extraction = extractor.extract(&chapter(), Cursor::new(archive)).await.unwrap();
        let expected = format!("series/berserk/vol1/ch3/{}.png", Fingerprint::of(&page));
        let stored = &extraction.pages().pages()[0];
        assert_eq!(stored.path, Path::new(&expected));
        assert_eq!(stored.extension, "png");
        assert_eq!(stored.size, page.len() as u64);
        assert_eq!(backend.read(Path::new(&expected)).await.unwrap(), page);
        assert_eq!(extraction.descriptors()[0].storage_path, Path::new(&expected));
        extraction.discard().await;
    }

    #[tokio::test]
    async fn test_identical_pages_share_one_file() {
        let (backend, extractor) = setup();
        let page = png(10, 10, 5);
        let archive = ZipBuilder::new().file("01.png", &page).file("02.png", &page).finish();

        let extraction = extractor.extract(&chapter(), Cursor::new(archive)).await.unwrap();
        assert_eq!(extraction.pages().len(), 2);
        assert_eq!(extraction.written().len(), 1);
        assert_eq!(backend.paths().await.len(), 1);
        assert_eq!(backend.writes(), 1);
        extraction.discard().await;
    }

    #[tokio::test]
    async fn test_extraction_is_idempotent() {
        let (backend, extractor) = setup();
        let archive = chapter_zip(&["01.png", "02.png", "03.png"]);

        let first = extractor.extract(&chapter(), Cursor::new(archive.clone())).await.unwrap();
        let (first_pages, mut first_journal) = first.into_parts();
        first_journal.commit();
        let files_after_first = backend.paths().await;
        let writes_after_first = backend.writes();

        let second = extractor.extract(&chapter(), Cursor::new(archive)).await.unwrap();
        let pairs = |set: &PageSet| set.iter().map(|p| (p.fingerprint, p.path.clone())).collect::<Vec<_>>();
        assert_eq!(pairs(&first_pages), pairs(second.pages()));
        assert!(second.written().is_empty());
        assert_eq!(backend.writes(), writes_after_first);
        assert_eq!(backend.paths().await, files_after_first);
    }

    #[tokio::test]
    async fn test_rejection_writes_nothing() {
        let (backend, extractor) = setup();
        let archive = (0..1001).fold(ZipBuilder::new(), |builder, i| builder.file(&format!("{i:04}.jpg"), b"x")).finish();

        let err = extractor.extract(&chapter(), Cursor::new(archive)).await.err().unwrap();
        match &*err {
            ErrorKind::Rejected(reason) => assert!(reason.to_string().contains("entry-count ceiling")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(backend.writes(), 0);
    }

    #[tokio::test]
    async fn test_path_traversal_is_rejected() {
        let (backend, extractor) = setup();
        let archive = ZipBuilder::new().file("01.png", &png(4, 4, 1)).file("../02.png", &png(4, 4, 2)).finish();

        let err = extractor.extract(&chapter(), Cursor::new(archive)).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::Rejected(Rejection::UnsafePath(_))));
        assert_eq!(backend.writes(), 0);
    }

    #[tokio::test]
    async fn test_not_a_zip() {
        let (_backend, extractor) = setup();
        let err = extractor.extract(&chapter(), Cursor::new(png(4, 4, 1))).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::Rejected(Rejection::NotAnArchive)));
    }

    #[tokio::test]
    async fn test_mismatched_content_fails_without_orphans() {
        let (backend, extractor) = setup();
        // PNG bytes behind a .jpg name, sorted after a good page.
        let archive = ZipBuilder::new().file("01.jpg", &jpeg(10, 10, 1)).file("02.jpg", &png(10, 10, 2)).finish();

        let err = extractor.extract(&chapter(), Cursor::new(archive)).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::Decode(name) if name == "02.jpg"));
        assert_eq!(backend.writes(), 1);
        assert!(backend.paths().await.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_image_fails_without_orphans() {
        let (backend, extractor) = setup();
        let broken = png(64, 64, 2);
        let archive = ZipBuilder::new()
            .file("01.png", &png(10, 10, 1))
            .file("02.png", &broken[..broken.len() / 2])
            .file("03.png", &png(10, 10, 3))
            .finish();

        let err = extractor.extract(&chapter(), Cursor::new(archive)).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::Decode(name) if name == "02.png"));
        assert!(backend.paths().await.is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_rolls_back() {
        let backend = Arc::new(MockBackend::default().fail_writes_after(2));
        let extractor = Extractor::new(backend.clone());
        let archive = chapter_zip(&["01.png", "02.png", "03.png"]);

        let err = extractor.extract(&chapter(), Cursor::new(archive)).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::Storage(_)));
        assert!(err.is_retryable());
        assert_eq!(err.public_message(), crate::error::TRY_AGAIN_LATER);
        assert!(backend.paths().await.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_spares_files_already_present() {
        let (backend, extractor) = setup();
        let shared = png(10, 10, 1);
        let committed = ZipBuilder::new().file("01.png", &shared).finish();
        let (_, mut journal) = extractor.extract(&chapter(), Cursor::new(committed)).await.unwrap().into_parts();
        journal.commit();

        let broken = ZipBuilder::new().file("01.png", &shared).file("02.png", b"not an image").finish();
        assert!(extractor.extract(&chapter(), Cursor::new(broken)).await.is_err());
        assert_eq!(backend.paths().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sidecars_and_directories_are_skipped() {
        let (_backend, extractor) = setup();
        let archive = ZipBuilder::new()
            .directory("ch3/")
            .file("ch3/01.png", &png(10, 10, 1))
            .file("ch3/info.txt", b"scanned by someone")
            .file("__MACOSX/._01.png", b"resource fork")
            .finish();

        let extraction = extractor.extract(&chapter(), Cursor::new(archive)).await.unwrap();
        assert_eq!(extraction.pages().len(), 1);
        extraction.discard().await;
    }

    #[tokio::test]
    async fn test_dot_underscore_page_at_root_is_extracted() {
        let (_backend, extractor) = setup();
        let archive = ZipBuilder::new().file("01.png", &png(10, 10, 1)).file("._02.png", &png(10, 10, 2)).finish();

        let extraction = extractor.extract(&chapter(), Cursor::new(archive)).await.unwrap();
        assert_eq!(extraction.pages().len(), 2);
        extraction.discard().await;
    }

    #[tokio::test]
    async fn test_extract_to_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(LocalBackend::new("local", dir.path()).unwrap());
        let extractor = Extractor::new(backend.clone());
        let archive = chapter_zip(&["01.png", "02.png"]);

        let extraction = extractor.extract(&chapter(), Cursor::new(archive)).await.unwrap();
        for page in extraction.pages() {
            assert!(dir.path().join(&page.path).is_file());
        }
        let written = extraction.written().to_vec();
        assert!(extraction.discard().await.is_empty());
        for path in written {
            assert!(!dir.path().join(path).exists());
        }
    }
}
