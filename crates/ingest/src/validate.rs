//! Structural and security checks on an archive index.
//!
//! Validation only ever looks at index metadata (names and declared sizes),
//! never at entry contents, so it is cheap and runs before anything is
//! decompressed. The rules are applied in a fixed order and the first
//! violated rule is reported:
//!
//! 1. entry-count ceiling (directories included),
//! 2. uncompressed-size ceiling for the whole archive,
//! 3. compression-ratio ceiling (zip-bomb heuristic),
//! 4. path safety (no `..`, no absolute names),
//! 5. directory nesting depth,
//! 6. extension policy (images, benign sidecars, macOS metadata),
//! 7. per-image size ceiling,
//! 8. at least one image.
//!
//! Each rule runs over the whole index before the next one is considered, so
//! an archive breaking rules 4 and 6 is always reported under rule 4, no
//! matter which offending entry comes first.

use crate::limits::Limits;
use crate::models::ImageKind;
use derive_more::Display;
use tracing::{instrument, warn};

/// Sidecar files commonly bundled with scans. Accepted but never extracted.
const SIDECAR_EXTENSIONS: [&str; 4] = ["txt", "nfo", "xml", "json"];
const MACOS_METADATA_DIR: &str = "__MACOSX/";
/// Upload file name suffixes that denote a ZIP container.
const ARCHIVE_SUFFIXES: [&str; 2] = [".zip", ".cbz"];

/// Why an archive was refused.
///
/// The [`Display`](std::fmt::Display) output names the rule (and, where it
/// helps, the entry) and is meant to be shown to the uploader as-is.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum Rejection {
    #[display("the upload is not a readable ZIP archive")]
    NotAnArchive,
    #[display("unsupported upload {_0:?}: only .zip and .cbz archives are accepted")]
    UnsupportedUpload(String),
    #[display("archive file is too large: {size} bytes exceeds the limit of {limit} bytes")]
    ArchiveTooLarge { size: u64, limit: u64 },
    #[display("entry-count ceiling exceeded: {count} entries, at most {limit} allowed")]
    TooManyEntries { count: usize, limit: usize },
    #[display("uncompressed-size ceiling exceeded: archive expands to {total} bytes, at most {limit} allowed")]
    TooLarge { total: u64, limit: u64 },
    #[display("compression-ratio ceiling exceeded: archive expands more than {limit}x its compressed size")]
    CompressionRatio { limit: u64 },
    #[display("path-safety violation: unsafe entry name {_0:?}")]
    UnsafePath(String),
    #[display("directory nesting too deep: {_0:?} (at most {_1} level(s) of subdirectory)")]
    TooDeep(String, usize),
    #[display("unsupported file type: {_0:?}")]
    UnsupportedEntry(String),
    #[display("per-image size ceiling exceeded: {name:?} is {size} bytes, at most {limit} allowed")]
    ImageTooLarge { name: String, size: u64, limit: u64 },
    #[display("entry {_0:?} holds more data than its declared size")]
    EntrySizeMismatch(String),
    #[display("no images found in archive")]
    NoImages,
}

/// One item of an archive's index. Nothing here comes from entry contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Position in the archive's index.
    pub index: usize,
    /// Path-like name, as stored in the archive.
    pub name: String,
    /// Declared uncompressed size.
    pub size: u64,
    /// Declared compressed size.
    pub compressed_size: u64,
    pub is_dir: bool,
}

/// What an entry is, as far as the extension policy is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryClass {
    Directory,
    Image(ImageKind),
    /// Sidecars, extensionless files and macOS metadata.
    Ignored,
    Unsupported,
}

impl ArchiveEntry {
    pub fn file(index: usize, name: impl Into<String>, size: u64, compressed_size: u64) -> Self {
        Self {
            index,
            name: name.into(),
            size,
            compressed_size,
            is_dir: false,
        }
    }

    pub fn directory(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            size: 0,
            compressed_size: 0,
            is_dir: true,
        }
    }

    fn is_directory(&self) -> bool {
        self.is_dir || self.name.ends_with('/')
    }

    /// Last path segment.
    fn basename(&self) -> &str {
        let trimmed = self.name.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    /// Lowercase extension of the basename, if any. Dotfiles such as
    /// `.DS_Store` have no extension.
    pub fn extension(&self) -> Option<String> {
        match self.basename().rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_ascii_lowercase()),
            _ => None,
        }
    }

    /// Only the `__MACOSX/` tree counts. A `._` name anywhere else is treated
    /// like any other entry.
    fn is_macos_metadata(&self) -> bool {
        self.name.starts_with(MACOS_METADATA_DIR)
    }

    fn is_unsafe(&self) -> bool {
        let name = self.name.as_str();
        name.contains("..")
            || name.starts_with('/')
            || name.starts_with('\\')
            || name.contains('\0')
            || has_drive_prefix(name)
    }

    /// Directory levels this entry implies. `a.jpg` is 0, `ch1/a.jpg` and
    /// `ch1/` are 1, `ch1/extra/a.jpg` is 2.
    fn depth(&self) -> usize {
        let segments = self.name.split('/').filter(|segment| !segment.is_empty()).count();
        if self.is_directory() { segments } else { segments.saturating_sub(1) }
    }

    pub(crate) fn class(&self) -> EntryClass {
        if self.is_directory() {
            return EntryClass::Directory;
        }
        if self.is_macos_metadata() {
            return EntryClass::Ignored;
        }
        match self.extension() {
            None => EntryClass::Ignored,
            Some(ext) if SIDECAR_EXTENSIONS.contains(&ext.as_str()) => EntryClass::Ignored,
            Some(ext) => ImageKind::from_extension(&ext).map_or(EntryClass::Unsupported, EntryClass::Image),
        }
    }
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Outcome of validating an archive index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationReport {
    Accepted { image_count: usize },
    Rejected { reason: Rejection },
}
impl ValidationReport {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn into_result(self) -> Result<usize, Rejection> {
        match self {
            Self::Accepted { image_count } => Ok(image_count),
            Self::Rejected { reason } => Err(reason),
        }
    }
}
impl From<Result<usize, Rejection>> for ValidationReport {
    fn from(value: Result<usize, Rejection>) -> Self {
        match value {
            Ok(image_count) => Self::Accepted { image_count },
            Err(reason) => Self::Rejected { reason },
        }
    }
}

/// Validate an archive index against the default [`Limits`].
///
/// ```
/// use shelf_ingest::validate::{ArchiveEntry, Rejection, ValidationReport, validate};
///
/// let index = [ArchiveEntry::file(0, "01.jpg", 2048, 1024), ArchiveEntry::file(1, "../02.jpg", 2048, 1024)];
/// assert_eq!(
///     validate(&index),
///     ValidationReport::Rejected { reason: Rejection::UnsafePath("../02.jpg".into()) }
/// );
/// ```
pub fn validate(index: &[ArchiveEntry]) -> ValidationReport {
    validate_with(index, &Limits::default())
}

/// Validate an archive index against explicit limits.
#[instrument(level = "debug", skip_all, fields(entries = index.len()))]
pub fn validate_with(index: &[ArchiveEntry], limits: &Limits) -> ValidationReport {
    let report = ValidationReport::from(check(index, limits));
    if let ValidationReport::Rejected { reason } = &report {
        warn!(%reason, "archive rejected");
    }
    report
}

fn check(index: &[ArchiveEntry], limits: &Limits) -> Result<usize, Rejection> {
    if index.len() > limits.max_entries {
        return Err(Rejection::TooManyEntries {
            count: index.len(),
            limit: limits.max_entries,
        });
    }

    let total = index.iter().fold(0u64, |sum, entry| sum.saturating_add(entry.size));
    if total > limits.max_uncompressed_bytes {
        return Err(Rejection::TooLarge {
            total,
            limit: limits.max_uncompressed_bytes,
        });
    }

    let compressed = index.iter().fold(0u64, |sum, entry| sum.saturating_add(entry.compressed_size));
    if compressed > 0 && u128::from(total) > u128::from(limits.max_compression_ratio) * u128::from(compressed) {
        return Err(Rejection::CompressionRatio {
            limit: limits.max_compression_ratio,
        });
    }

    if let Some(entry) = index.iter().find(|entry| entry.is_unsafe()) {
        return Err(Rejection::UnsafePath(entry.name.clone()));
    }

    if let Some(entry) = index
        .iter()
        .filter(|entry| !entry.is_macos_metadata())
        .find(|entry| entry.depth() > limits.max_directory_depth)
    {
        return Err(Rejection::TooDeep(entry.name.clone(), limits.max_directory_depth));
    }

    let classes: Vec<(&ArchiveEntry, EntryClass)> = index.iter().map(|entry| (entry, entry.class())).collect();
    if let Some((entry, _)) = classes.iter().find(|(_, class)| *class == EntryClass::Unsupported) {
        return Err(Rejection::UnsupportedEntry(entry.name.clone()));
    }

    let images: Vec<&ArchiveEntry> = classes
        .iter()
        .filter(|(_, class)| matches!(class, EntryClass::Image(_)))
        .map(|(entry, _)| *entry)
        .collect();
    if let Some(entry) = images.iter().find(|entry| entry.size > limits.max_image_bytes) {
        return Err(Rejection::ImageTooLarge {
            name: entry.name.clone(),
            size: entry.size,
            limit: limits.max_image_bytes,
        });
    }

    if images.is_empty() {
        return Err(Rejection::NoImages);
    }
    Ok(images.len())
}

/// Cheap checks on the uploaded file itself, before its index is opened.
pub fn validate_upload(file_name: &str, size: u64, limits: &Limits) -> Result<(), Rejection> {
    let lower = file_name.to_ascii_lowercase();
    if !ARCHIVE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
        return Err(Rejection::UnsupportedUpload(file_name.to_string()));
    }
    if size > limits.max_archive_bytes {
        return Err(Rejection::ArchiveTooLarge {
            size,
            limit: limits.max_archive_bytes,
        });
    }
    Ok(())
}
