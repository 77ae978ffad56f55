//! On-disk pool cache for incremental scans.
//!
//! Reading EXIF, decoding image headers and parsing XMP sidecars is cheap per
//! file but adds up over a photo library of tens of thousands of images. The
//! pool cache lets `scan-pool` skip every file whose fingerprint is unchanged
//! since the last scan.
//!
//! ## Fingerprints
//!
//! A fingerprint is the SHA-256 over the path, size and modification time of
//! the image **and** of its XMP sidecar. Editing tags in Geeqie or darktable
//! touches only the sidecar, which is enough to invalidate the entry.
//!
//! ## Storage
//!
//! A versioned JSON document, by default `.image_pool.json`:
//!
//! ```text
//! {
//!   "version": 1,
//!   "images": {
//!     "/photos/2021/beach.jpg": {
//!       "fingerprint": "9f2c…",
//!       "meta": { "geometry": [6000, 4000], "snaptime": "2021-07-14T18:03:55" },
//!       "tags": { "grp": ["beach2021"] }
//!     }
//!   }
//! }
//! ```
//!
//! A file that is missing, corrupt or written by a different format version
//! loads as an empty cache.

use super::xmp::TagSets;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Version of the cache format. Bump this to invalidate all existing caches
/// when the format or the fingerprint computation changes.
pub(crate) const CACHE_VERSION: u32 = 1;

/// Metadata read from the image file itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryMeta {
    /// `[width, height]`; absent when the header could not be read.
    #[serde(default)]
    pub geometry: Option<[u32; 2]>,
    /// Capture time at second resolution.
    #[serde(default)]
    pub snaptime: Option<NaiveDateTime>,
}

/// One scanned image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolEntry {
    pub fingerprint: String,
    pub meta: EntryMeta,
    #[serde(default)]
    pub tags: TagSets,
}

impl PoolEntry {
    /// Union of the `grp` tag values.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.tags
            .get(crate::assignment::GROUP_TAG)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CacheFile {
    pub version: u32,
    pub images: BTreeMap<PathBuf, PoolEntry>,
}

impl CacheFile {
    pub fn new(images: BTreeMap<PathBuf, PoolEntry>) -> Self {
        Self {
            version: CACHE_VERSION,
            images,
        }
    }
}

/// SHA-256 over path, size and mtime of the image and its sidecar.
pub fn fingerprint(image: &Path, sidecar: Option<&Path>) -> String {
    let mut hasher = Sha256::new();
    hash_file_key(&mut hasher, image);
    match sidecar {
        Some(path) => {
            hasher.update(b"\x01");
            hash_file_key(&mut hasher, path);
        }
        None => hasher.update(b"\x00"),
    }
    format!("{:x}", hasher.finalize())
}

fn hash_file_key(hasher: &mut Sha256, path: &Path) {
    hasher.update(path.as_os_str().as_encoded_bytes());
    hasher.update(b"\0");
    match std::fs::metadata(path) {
        Ok(meta) => {
            hasher.update(meta.len().to_le_bytes());
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_nanos());
            hasher.update(mtime.to_le_bytes());
        }
        Err(_) => hasher.update(b"missing"),
    }
}

/// Serialize the cache to `path`.
pub(crate) fn write_cache(path: &Path, cache: &CacheFile) -> io::Result<()> {
    let json = serde_json::to_string_pretty(cache)?;
    std::fs::write(path, json + "\n")
}

/// Summary of one scan run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub scanned: u32,
    pub reused: u32,
    pub failed: u32,
}

impl ScanStats {
    pub fn total(&self) -> u32 {
        self.scanned + self.reused + self.failed
    }
}

impl std::ops::AddAssign for ScanStats {
    fn add_assign(&mut self, other: Self) {
        self.scanned += other.scanned;
        self.reused += other.reused;
        self.failed += other.failed;
    }
}

impl fmt::Display for ScanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reused > 0 {
            write!(
                f,
                "{} cached, {} scanned ({} total)",
                self.reused,
                self.scanned,
                self.total()
            )?;
        } else {
            write!(f, "{} scanned", self.scanned)?;
        }
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // =========================================================================
    // Fingerprints
    // =========================================================================

    #[test]
    fn fingerprint_deterministic() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.jpg");
        fs::write(&path, b"hello").unwrap();

        let f1 = fingerprint(&path, None);
        let f2 = fingerprint(&path, None);
        assert_eq!(f1, f2);
        assert_eq!(f1.len(), 64);
    }

    #[test]
    fn fingerprint_changes_with_size() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.jpg");
        fs::write(&path, b"v1").unwrap();
        let f1 = fingerprint(&path, None);
        fs::write(&path, b"version two").unwrap();
        assert_ne!(f1, fingerprint(&path, None));
    }

    #[test]
    fn fingerprint_changes_with_sidecar() {
        let tmp = TempDir::new().unwrap();
        let image = tmp.path().join("a.jpg");
        let sidecar = tmp.path().join("a.jpg.xmp");
        fs::write(&image, b"img").unwrap();

        let without = fingerprint(&image, None);
        fs::write(&sidecar, b"<x/>").unwrap();
        let with = fingerprint(&image, Some(&sidecar));
        assert_ne!(without, with);

        fs::write(&sidecar, b"<x>longer</x>").unwrap();
        assert_ne!(with, fingerprint(&image, Some(&sidecar)));
    }

    #[test]
    fn fingerprint_of_missing_file_is_stable() {
        let path = Path::new("/nonexistent/a.jpg");
        assert_eq!(fingerprint(path, None), fingerprint(path, None));
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    #[test]
    fn entry_json_shape() {
        let entry = PoolEntry {
            fingerprint: "abc".into(),
            meta: EntryMeta {
                geometry: Some([6000, 4000]),
                snaptime: NaiveDateTime::parse_from_str("2021-07-14 18:03:55", "%Y-%m-%d %H:%M:%S")
                    .ok(),
            },
            tags: TagSets::from([(
                "grp".to_string(),
                std::collections::BTreeSet::from(["beach".to_string()]),
            )]),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["meta"]["geometry"], serde_json::json!([6000, 4000]));
        assert_eq!(value["meta"]["snaptime"], "2021-07-14T18:03:55");
        assert_eq!(value["tags"]["grp"], serde_json::json!(["beach"]));
        assert_eq!(entry.groups().collect::<Vec<_>>(), vec!["beach"]);
    }

    #[test]
    fn entry_without_tags_or_geometry_deserializes() {
        let entry: PoolEntry =
            serde_json::from_str(r#"{"fingerprint": "f", "meta": {}}"#).unwrap();
        assert_eq!(entry.meta.geometry, None);
        assert!(entry.tags.is_empty());
    }

    // =========================================================================
    // ScanStats
    // =========================================================================

    #[test]
    fn scan_stats_display_with_reuse() {
        let s = ScanStats {
            scanned: 2,
            reused: 5,
            failed: 0,
        };
        assert_eq!(format!("{}", s), "5 cached, 2 scanned (7 total)");
    }

    #[test]
    fn scan_stats_display_fresh_with_failures() {
        let s = ScanStats {
            scanned: 3,
            reused: 0,
            failed: 1,
        };
        assert_eq!(format!("{}", s), "3 scanned, 1 failed");
    }

    #[test]
    fn scan_stats_accumulate() {
        let mut s = ScanStats::default();
        s += ScanStats {
            scanned: 1,
            reused: 2,
            failed: 3,
        };
        s += ScanStats {
            scanned: 1,
            reused: 0,
            failed: 0,
        };
        assert_eq!(s.total(), 7);
    }
}
