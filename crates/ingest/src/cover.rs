//! Series cover image checks.

use crate::error::{ErrorKind, Result};
use crate::limits::CoverLimits;
use crate::sniff::{ImageInfo, ImageSniffer};
use exn::ResultExt;
use tracing::instrument;

/// Check an uploaded cover image and return its properties.
///
/// The image must be at most `max_bytes` long, decode as an accepted raster
/// format, have both sides within `min_dimension..=max_dimension`, and be no
/// wider than `max_aspect_ratio` times its height. Every failure is a
/// [`Cover`](ErrorKind::Cover) error whose message can be shown to the
/// uploader.
///
/// `sniffer` carries the decoder memory ceiling, the same one page
/// extraction uses.
#[instrument(skip_all, fields(bytes = bytes.len()))]
pub fn validate_cover(bytes: &[u8], limits: &CoverLimits, sniffer: &ImageSniffer) -> Result<ImageInfo> {
    if bytes.len() as u64 > limits.max_bytes {
        exn::bail!(ErrorKind::Cover(format!(
            "cover image is too large: {} bytes, at most {} allowed",
            bytes.len(),
            limits.max_bytes
        )));
    }
    let info = sniffer
        .sniff(bytes)
        .or_raise(|| ErrorKind::Cover("cover is not a valid JPEG, PNG, GIF, WebP or BMP image".to_string()))?;

    let in_range = |side: u32| (limits.min_dimension..=limits.max_dimension).contains(&side);
    if !in_range(info.width) || !in_range(info.height) {
        exn::bail!(ErrorKind::Cover(format!(
            "cover dimensions {}x{} are outside {}..={} pixels",
            info.width, info.height, limits.min_dimension, limits.max_dimension
        )));
    }
    if f64::from(info.width) / f64::from(info.height) > limits.max_aspect_ratio {
        exn::bail!(ErrorKind::Cover(format!(
            "cover is too wide: {}x{} exceeds an aspect ratio of {}",
            info.width, info.height, limits.max_aspect_ratio
        )));
    }
    Ok(info)
}
