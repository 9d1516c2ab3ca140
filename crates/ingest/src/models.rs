//! Chapter identity, content fingerprints and page records.

use crate::error::{Error, ErrorKind, Result};
use image::ImageFormat;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which chapter a set of pages belongs to.
///
/// Only used to derive the storage prefix
/// `series/{slug}/vol{volume or 0}/ch{number}`; uniqueness of the identity is
/// the catalog's business.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterId {
    series: String,
    volume: Option<u32>,
    number: f64,
}
impl ChapterId {
    /// Build a chapter identity.
    ///
    /// The slug must be non-empty ASCII letters, digits, `-` or `_`. A volume,
    /// when present, starts at 1. The chapter number must be finite and
    /// non-negative; fractional numbers are sub-chapters (`12.5`).
    ///
    /// ```
    /// use shelf_ingest::ChapterId;
    /// use std::path::Path;
    ///
    /// let chapter = ChapterId::new("berserk", Some(1), 12.5).unwrap();
    /// assert_eq!(chapter.prefix(), Path::new("series/berserk/vol1/ch12.5"));
    /// assert!(ChapterId::new("../berserk", None, 1.0).is_err());
    /// ```
    pub fn new(series: impl Into<String>, volume: Option<u32>, number: f64) -> Result<Self> {
        let series = series.into();
        if series.is_empty() || !series.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
            exn::bail!(ErrorKind::InvalidChapter(format!("series slug {series:?} is not URL-safe")));
        }
        if volume == Some(0) {
            exn::bail!(ErrorKind::InvalidChapter("volume numbers start at 1".to_string()));
        }
        if !number.is_finite() || number < 0.0 {
            exn::bail!(ErrorKind::InvalidChapter(format!("chapter number {number} must be finite and non-negative")));
        }
        // -0.0 would render as "ch-0".
        let number = if number == 0.0 { 0.0 } else { number };
        Ok(Self { series, volume, number })
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    pub fn volume(&self) -> Option<u32> {
        self.volume
    }

    pub fn number(&self) -> f64 {
        self.number
    }

    /// Storage prefix every page of this chapter lives under.
    pub fn prefix(&self) -> PathBuf {
        PathBuf::from(format!("series/{}/vol{}/ch{}", self.series, self.volume.unwrap_or(0), self.number))
    }
}
impl fmt::Display for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.volume {
            Some(volume) => write!(f, "{} vol.{} ch.{}", self.series, volume, self.number),
            None => write!(f, "{} ch.{}", self.series, self.number),
        }
    }
}

/// A 128-bit content hash: the first 16 bytes of BLAKE3's extendable output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(into = "String", try_from = "String"))]
pub struct Fingerprint([u8; 16]);
impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        let mut out = [0u8; 16];
        blake3::Hasher::new().update(bytes).finalize_xof().fill(&mut out);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// 32 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}
impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|b| write!(f, "{b:02x}"))
    }
}
impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}
impl Fingerprint {
    fn parse_hex(s: &str) -> Option<[u8; 16]> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut out = [0u8; 16];
        for (byte, pair) in out.iter_mut().zip(s.as_bytes().chunks(2)) {
            *byte = u8::from_str_radix(std::str::from_utf8(pair).ok()?, 16).ok()?;
        }
        Some(out)
    }
}
impl FromStr for Fingerprint {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(Self::try_from(s.to_string())?)
    }
}
impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.to_string()
    }
}
impl TryFrom<String> for Fingerprint {
    type Error = ErrorKind;
    fn try_from(value: String) -> std::result::Result<Self, ErrorKind> {
        Self::parse_hex(&value)
            .map(Self)
            .ok_or_else(|| ErrorKind::InvalidPageSet(format!("malformed fingerprint {value:?}")))
    }
}

/// An accepted raster image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(rename_all = "lowercase"))]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
}
impl ImageKind {
    /// Detect the image kind from a (case-insensitive) file extension, with
    /// or without the leading dot.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    /// Map a format reported by the decoder. Formats outside the accepted set
    /// yield `None`.
    #[must_use]
    pub fn from_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Gif => Some(Self::Gif),
            ImageFormat::WebP => Some(Self::Webp),
            ImageFormat::Bmp => Some(Self::Bmp),
            _ => None,
        }
    }

    pub fn format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::Gif => ImageFormat::Gif,
            Self::Webp => ImageFormat::WebP,
            Self::Bmp => ImageFormat::Bmp,
        }
    }

    /// IANA media type.
    pub fn media_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
        }
    }
}
impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::Gif => "GIF",
            Self::Webp => "WebP",
            Self::Bmp => "BMP",
        })
    }
}

/// One successfully decoded and stored page.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtractedPage {
    /// 1-based reading position.
    pub ordinal: u32,
    pub fingerprint: Fingerprint,
    /// Lowercase, without the dot.
    pub extension: String,
    /// Byte length of the stored file.
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub kind: ImageKind,
    /// Relative to the page store root.
    pub path: PathBuf,
}
impl ExtractedPage {
    pub fn media_type(&self) -> &'static str {
        self.kind.media_type()
    }

    pub fn descriptor(&self) -> PageDescriptor {
        PageDescriptor {
            ordinal: self.ordinal,
            storage_path: self.path.clone(),
            width: self.width,
            height: self.height,
            media_type: self.kind.media_type(),
        }
    }
}

/// The record handed to the catalog for each page.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PageDescriptor {
    pub ordinal: u32,
    pub storage_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub media_type: &'static str,
}

/// The ordered pages of one chapter. Ordinals are always exactly `1..=N`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(into = "Vec<ExtractedPage>", try_from = "Vec<ExtractedPage>")
)]
pub struct PageSet {
    pages: Vec<ExtractedPage>,
}
impl PageSet {
    /// Build a page set from records in any order, checking that their
    /// ordinals are exactly `1..=N`.
    pub fn new(pages: Vec<ExtractedPage>) -> Result<Self> {
        Ok(Self::try_from(pages)?)
    }

    pub fn pages(&self) -> &[ExtractedPage] {
        &self.pages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ExtractedPage> {
        self.pages.iter()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Distinct storage paths. Identical pages share one file.
    pub fn paths(&self) -> BTreeSet<&Path> {
        self.pages.iter().map(|page| page.path.as_path()).collect()
    }

    pub fn descriptors(&self) -> Vec<PageDescriptor> {
        self.pages.iter().map(ExtractedPage::descriptor).collect()
    }
}
impl TryFrom<Vec<ExtractedPage>> for PageSet {
    type Error = ErrorKind;
    fn try_from(mut pages: Vec<ExtractedPage>) -> std::result::Result<Self, ErrorKind> {
        pages.sort_by_key(|page| page.ordinal);
        for (expected, page) in (1u32..).zip(&pages) {
            if page.ordinal != expected {
                return Err(ErrorKind::InvalidPageSet(format!(
                    "expected ordinal {expected}, found {}",
                    page.ordinal
                )));
            }
        }
        Ok(Self { pages })
    }
}
impl From<PageSet> for Vec<ExtractedPage> {
    fn from(value: PageSet) -> Self {
        value.pages
    }
}
impl<'a> IntoIterator for &'a PageSet {
    type Item = &'a ExtractedPage;
    type IntoIter = std::slice::Iter<'a, ExtractedPage>;
    fn into_iter(self) -> Self::IntoIter {
        self.pages.iter()
    }
}
