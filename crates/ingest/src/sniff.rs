//! Proving that a byte buffer really is an accepted raster image.
//!
//! A header peek is not enough: a truncated or corrupt file can carry a
//! perfectly good header. The sniffer decodes the whole image (under a memory
//! ceiling) and only then reports its dimensions.

use crate::limits::DecodeLimits;
use crate::models::ImageKind;
use derive_more::{Display, Error};
use image::{ImageError, ImageReader};
use std::io::Cursor;
use tracing::{instrument, trace};

/// Intrinsic properties of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub kind: ImageKind,
}
impl ImageInfo {
    pub fn media_type(&self) -> &'static str {
        self.kind.media_type()
    }
}

/// Why a buffer is not an acceptable image. The caller attaches the entry
/// name.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[display("not a recognizable image")]
    Unrecognized,
    #[display("image format is not accepted")]
    Unsupported,
    #[display("expected {expected} data, found {found}")]
    Mismatch { expected: ImageKind, found: ImageKind },
    #[display("image exceeds the decoder memory limit")]
    TooLarge,
    #[display("corrupt or truncated image: {_0}")]
    Corrupt(#[error(not(source))] String),
}
impl From<ImageError> for DecodeError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::Limits(_) => Self::TooLarge,
            ImageError::Unsupported(_) => Self::Unsupported,
            other => Self::Corrupt(other.to_string()),
        }
    }
}

/// Fully decodes images to validate them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageSniffer {
    limits: DecodeLimits,
}

impl ImageSniffer {
    pub fn new(limits: DecodeLimits) -> Self {
        Self { limits }
    }

    /// Decode `bytes` and report their dimensions and format.
    #[instrument(level = "trace", skip_all, fields(bytes = bytes.len()))]
    pub fn sniff(&self, bytes: &[u8]) -> Result<ImageInfo, DecodeError> {
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|err| DecodeError::Corrupt(err.to_string()))?;
        let format = reader.format().ok_or(DecodeError::Unrecognized)?;
        let kind = ImageKind::from_format(format).ok_or(DecodeError::Unsupported)?;

        let mut limits = image::Limits::default();
        limits.max_alloc = Some(self.limits.max_alloc);
        reader.limits(limits);

        let image = reader.decode()?;
        let info = ImageInfo {
            width: image.width(),
            height: image.height(),
            kind,
        };
        trace!(?info, "decoded image");
        Ok(info)
    }

    /// Like [`sniff`](Self::sniff), but the decoded format must also match
    /// `expected` (usually derived from the file extension).
    pub fn sniff_as(&self, bytes: &[u8], expected: ImageKind) -> Result<ImageInfo, DecodeError> {
        let info = self.sniff(bytes)?;
        if info.kind != expected {
            return Err(DecodeError::Mismatch {
                expected,
                found: info.kind,
            });
        }
        Ok(info)
    }
}
