//! Reading a ZIP container: its index, then individual entries.

use crate::error::{ErrorKind, Result};
use crate::validate::{ArchiveEntry, Rejection};
use exn::ResultExt;
use std::io::{Read, Seek};
use tracing::instrument;
use zip::ZipArchive;

/// Entries declaring more than this are still read, just without reserving
/// the whole buffer up front.
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// An opened archive plus its index.
pub struct Archive<R> {
    zip: ZipArchive<R>,
    entries: Vec<ArchiveEntry>,
}

impl<R: Read + Seek> Archive<R> {
    /// Read the archive's central directory.
    ///
    /// Anything that is not a readable ZIP is
    /// [`Rejected(NotAnArchive)`](Rejection::NotAnArchive).
    #[instrument(level = "debug", skip_all)]
    pub fn open(reader: R) -> Result<Self> {
        let mut zip = ZipArchive::new(reader).or_raise(|| ErrorKind::Rejected(Rejection::NotAnArchive))?;
        let mut entries = Vec::with_capacity(zip.len());
        for index in 0..zip.len() {
            let file = zip.by_index_raw(index).or_raise(|| ErrorKind::Rejected(Rejection::NotAnArchive))?;
            entries.push(ArchiveEntry {
                index,
                name: file.name().to_string(),
                size: file.size(),
                compressed_size: file.compressed_size(),
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { zip, entries })
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Decompress one entry.
    ///
    /// Reads at most one byte past the declared size: an entry that keeps
    /// producing data is [`Rejected(EntrySizeMismatch)`](Rejection::EntrySizeMismatch)
    /// instead of being inflated without bound. Corrupt compressed data and
    /// checksum mismatches are [`Decode`](ErrorKind::Decode) failures.
    pub fn read(&mut self, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        let decode = || ErrorKind::Decode(entry.name.clone());
        let file = self.zip.by_index(entry.index).or_raise(decode)?;
        let capacity = usize::try_from(entry.size.min(MAX_PREALLOCATION)).unwrap_or(0);
        let mut data = Vec::with_capacity(capacity);
        file.take(entry.size.saturating_add(1)).read_to_end(&mut data).or_raise(decode)?;
        if data.len() as u64 > entry.size {
            exn::bail!(ErrorKind::Rejected(Rejection::EntrySizeMismatch(entry.name.clone())));
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ZipBuilder, png};
    use std::io::Cursor;

    #[test]
    fn test_open_reads_index_in_archive_order() {
        let bytes = ZipBuilder::new()
            .file("02.png", &png(4, 4, 2))
            .directory("extras/")
            .file("extras/01.png", &png(4, 4, 1))
            .finish();
        let archive = Archive::open(Cursor::new(bytes)).unwrap();
        let names: Vec<&str> = archive.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["02.png", "extras/", "extras/01.png"]);
        assert!(archive.entries()[1].is_dir);
        assert_eq!(archive.entries()[2].index, 2);
    }

    #[test]
    fn test_open_rejects_garbage() {
        let err = Archive::open(Cursor::new(b"definitely not a zip".to_vec())).err().unwrap();
        assert!(matches!(&*err, ErrorKind::Rejected(Rejection::NotAnArchive)));
    }

    #[test]
    fn test_read_entry_round_trip() {
        let page = png(8, 6, 7);
        let bytes = ZipBuilder::new().deflated().file("01.png", &page).finish();
        let mut archive = Archive::open(Cursor::new(bytes)).unwrap();
        let entry = archive.entries()[0].clone();
        assert_eq!(entry.size, page.len() as u64);
        assert_eq!(archive.read(&entry).unwrap(), page);
    }

    #[test]
    fn test_read_refuses_more_than_declared() {
        let bytes = ZipBuilder::new().file("01.png", &png(8, 8, 1)).finish();
        let mut archive = Archive::open(Cursor::new(bytes)).unwrap();
        let mut entry = archive.entries()[0].clone();
        entry.size = 10;
        let err = archive.read(&entry).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Rejected(Rejection::EntrySizeMismatch(name)) if name == "01.png"));
    }
}
