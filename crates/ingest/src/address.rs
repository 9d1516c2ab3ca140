//! Content addressing: where a page's bytes are stored.

use crate::models::{ChapterId, Fingerprint};
use std::path::PathBuf;

/// Fingerprint of some bytes and the path they are stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
}

/// Derive the storage path for `bytes` within `chapter`.
///
/// The path is `{chapter prefix}/{fingerprint}.{extension}`. Only the
/// extension of the uploaded name survives, lowercased; anything that is not
/// plain ASCII alphanumerics is dropped rather than spliced into the path.
///
/// ```
/// use shelf_ingest::{ChapterId, address};
///
/// let chapter = ChapterId::new("berserk", None, 1.0).unwrap();
/// let a = address(&chapter, b"page bytes", "JPG");
/// let b = address(&chapter, b"page bytes", ".jpg");
/// assert_eq!(a, b);
/// assert!(a.path.starts_with("series/berserk/vol0/ch1"));
/// assert!(a.path.to_string_lossy().ends_with(".jpg"));
/// ```
pub fn address(chapter: &ChapterId, bytes: &[u8], extension: &str) -> Address {
    let fingerprint = Fingerprint::of(bytes);
    let extension = extension.trim_start_matches('.').to_ascii_lowercase();
    let file_name = if !extension.is_empty() && extension.bytes().all(|b| b.is_ascii_alphanumeric()) {
        format!("{fingerprint}.{extension}")
    } else {
        fingerprint.to_string()
    };
    Address {
        fingerprint,
        path: chapter.prefix().join(file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::Path;

    fn chapter(series: &str, volume: Option<u32>, number: f64) -> ChapterId {
        ChapterId::new(series, volume, number).unwrap()
    }

    #[test]
    fn test_stable() {
        let ch = chapter("berserk", Some(2), 14.0);
        assert_eq!(address(&ch, b"abc", "png"), address(&ch, b"abc", "png"));
    }

    #[test]
    fn test_layout() {
        let ch = chapter("berserk", Some(2), 14.0);
        let addr = address(&ch, b"abc", "PNG");
        let expected = format!("series/berserk/vol2/ch14/{}.png", Fingerprint::of(b"abc"));
        assert_eq!(addr.path, Path::new(&expected));
    }

    #[test]
    fn test_distinct_bytes_distinct_paths() {
        let ch = chapter("berserk", None, 1.0);
        assert_ne!(address(&ch, b"page one", "jpg").path, address(&ch, b"page two", "jpg").path);
    }

    #[test]
    fn test_chapters_never_collide() {
        let a = address(&chapter("berserk", None, 1.0), b"same", "jpg");
        let b = address(&chapter("berserk", None, 1.5), b"same", "jpg");
        let c = address(&chapter("berserk", Some(1), 1.0), b"same", "jpg");
        let d = address(&chapter("claymore", None, 1.0), b"same", "jpg");
        assert_eq!(a.fingerprint, b.fingerprint);
        let paths = [a.path, b.path, c.path, d.path];
        for (i, left) in paths.iter().enumerate() {
            for right in &paths[i + 1..] {
                assert_ne!(left, right);
            }
        }
    }

    #[rstest]
    #[case("")]
    #[case("/../../etc")]
    #[case("p n g")]
    fn test_hostile_extension_is_dropped(#[case] extension: &str) {
        let ch = chapter("berserk", None, 1.0);
        let addr = address(&ch, b"abc", extension);
        assert_eq!(addr.path, ch.prefix().join(addr.fingerprint.to_string()));
    }
}
