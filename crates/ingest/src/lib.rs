//! Validation and content-addressed extraction of uploaded chapter archives.
//!
//! An uploaded chapter is a ZIP (or CBZ, the same thing) full of page images.
//! Turning it into a chapter's live page set goes through these steps:
//!
//! 1. [`validate`](validate::validate) the archive index: entry count, sizes,
//!    compression ratio, path safety, nesting, extensions. Nothing is
//!    decompressed before this passes.
//! 2. [`Extractor::extract`] the images in name order, fully decoding each one
//!    ([`ImageSniffer`]) and storing it under a path derived from a hash of
//!    its bytes ([`address()`]). Identical bytes land on the same path, so
//!    re-uploads write nothing new.
//! 3. [`Replacer::replace`] swaps the chapter's page records in the
//!    [`PageCatalog`](catalog::PageCatalog) and removes files the new set no
//!    longer uses.
//!
//! Any failure before the swap removes every file the attempt wrote; the
//! previous page set stays live. [`Pipeline`] strings the steps together and
//! serializes ingests of the same chapter.
//!
//! Pages are stored through a [`shelf_storage::StorageBackend`]; where the
//! bytes physically live is up to the caller.

mod address;
mod archive;
pub mod catalog;
mod cover;
pub mod error;
mod extract;
mod journal;
pub mod limits;
mod lock;
mod models;
mod pipeline;
mod replace;
mod sniff;
#[cfg(test)]
mod test_support;
pub mod validate;

pub use crate::address::{Address, address};
pub use crate::archive::Archive;
pub use crate::cover::validate_cover;
pub use crate::extract::{Extraction, Extractor};
pub use crate::journal::WriteJournal;
pub use crate::limits::{CoverLimits, DecodeLimits, Limits};
pub use crate::lock::{ChapterGuard, ChapterLocks};
pub use crate::models::{ChapterId, ExtractedPage, Fingerprint, ImageKind, PageDescriptor, PageSet};
pub use crate::pipeline::Pipeline;
pub use crate::replace::{ReplaceOutcome, Replacer};
pub use crate::sniff::{DecodeError, ImageInfo, ImageSniffer};
pub use crate::validate::{ArchiveEntry, Rejection, ValidationReport};
