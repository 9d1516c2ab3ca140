//! Tunable ceilings for archive validation, image decoding and covers.
//!
//! The defaults are the production values. Everything here is plain data so
//! it can be loaded from configuration (enable the `serde` feature).

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Ceilings applied to an uploaded archive before anything is decompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct Limits {
    /// Entries in the archive index, directories included.
    pub max_entries: usize,
    /// Sum of declared uncompressed sizes.
    pub max_uncompressed_bytes: u64,
    /// Highest allowed `uncompressed / compressed` ratio for the whole archive.
    pub max_compression_ratio: u64,
    /// Directory levels an entry may sit under (or, for directory entries,
    /// name).
    pub max_directory_depth: usize,
    /// Declared uncompressed size of a single image entry.
    pub max_image_bytes: u64,
    /// Size of the uploaded archive file itself.
    pub max_archive_bytes: u64,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_uncompressed_bytes: 2 * GIB,
            max_compression_ratio: 100,
            max_directory_depth: 1,
            max_image_bytes: 50 * MIB,
            max_archive_bytes: 500 * MIB,
        }
    }
}

/// Memory ceiling handed to the image decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct DecodeLimits {
    /// Largest single allocation the decoder may make, in bytes.
    pub max_alloc: u64,
}
impl Default for DecodeLimits {
    fn default() -> Self {
        Self { max_alloc: 512 * MIB }
    }
}

/// Rules for series cover images.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct CoverLimits {
    pub max_bytes: u64,
    pub min_dimension: u32,
    pub max_dimension: u32,
    /// Highest allowed `width / height`.
    pub max_aspect_ratio: f64,
}
impl Default for CoverLimits {
    fn default() -> Self {
        Self {
            max_bytes: 2 * MIB,
            min_dimension: 100,
            max_dimension: 10_000,
            max_aspect_ratio: 1.5,
        }
    }
}
