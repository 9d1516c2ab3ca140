//! Ingest Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Lower layers (storage, catalog,
//! decoders) are chained underneath with `or_raise`, so the full cause is
//! available for logging while [`ErrorKind::public_message`] decides what an
//! uploader gets to see.

use crate::validate::Rejection;
use derive_more::{Display, Error};
use std::path::PathBuf;

/// An ingest error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for ingest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Message shown to uploaders for failures that are not their fault.
pub const TRY_AGAIN_LATER: &str = "the page store is temporarily unavailable, please try again later";

/// Actionable error categories.
///
/// ### Uploader Errors
/// Fixable by correcting the archive and uploading again. The message is safe
/// to show verbatim.
/// - [`ErrorKind::Rejected`]
/// - [`ErrorKind::Decode`]
/// - [`ErrorKind::Cover`]
///
/// ### Operational Errors
/// The cause is logged, never exposed. Retrying the whole ingest later may
/// succeed.
/// - [`ErrorKind::Storage`]
/// - [`ErrorKind::Replace`]
///
/// ### Caller Errors
/// - [`ErrorKind::InvalidChapter`]
/// - [`ErrorKind::InvalidPageSet`]
/// - [`ErrorKind::UploadNotFound`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The archive broke a structural or security rule. Nothing was written.
    #[display("{_0}")]
    Rejected(#[error(not(source))] Rejection),
    /// An image entry did not decode to a valid raster image.
    #[display("page {_0} is not a valid image")]
    Decode(#[error(not(source))] String),
    /// The page store refused a read, write or delete.
    #[display("storage failure at {}", _0.display())]
    Storage(#[error(not(source))] PathBuf),
    /// The new page set could not be committed; the previous one is still live.
    #[display("could not commit the new page set")]
    Replace,
    /// The chapter identity cannot be turned into a storage prefix.
    #[display("invalid chapter: {_0}")]
    InvalidChapter(#[error(not(source))] String),
    /// Page records do not form a contiguous `1..=N` sequence.
    #[display("invalid page set: {_0}")]
    InvalidPageSet(#[error(not(source))] String),
    /// The uploaded archive is not in the page store.
    #[display("uploaded archive not found: {}", _0.display())]
    UploadNotFound(#[error(not(source))] PathBuf),
    /// A series cover image broke one of the cover rules.
    #[display("{_0}")]
    Cover(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Replace)
    }

    /// The message to surface to the person who uploaded the archive.
    ///
    /// Rule violations and decode failures are described exactly so the
    /// archive can be fixed. Storage and commit failures are opaque.
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage(_) | Self::Replace => TRY_AGAIN_LATER.to_string(),
            other => other.to_string(),
        }
    }
}
