//! Shared test utilities for the calgen test suite.
//!
//! Provides fixture builders for synthetic photos (with and without EXIF
//! timestamps), XMP sidecars, and placement candidates.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = tempfile::TempDir::new().unwrap();
//! let photo = tmp.path().join("beach.jpg");
//! write_photo(&photo, 160, 90, Some("2021:07:14 18:03:55"));
//! write_xmp_sidecar(&photo, &["grp=holiday", "only=grandma+grandpa"]);
//!
//! let c = candidate("beach.jpg", 1600, 900, Some("2021-07-14T18:03:55"), &[("grp", &["holiday"])]);
//! ```

use crate::assignment::ImagePoolCandidate;
use chrono::NaiveDateTime;
use image::{ImageEncoder, RgbImage};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

// =========================================================================
// Synthetic photos
// =========================================================================

fn encode_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut bytes = Vec::new();
    image::codecs::jpeg::JpegEncoder::new(&mut bytes)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    bytes
}

/// Create a small valid JPEG file with the given dimensions.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    std::fs::write(path, encode_jpeg(width, height)).unwrap();
}

/// Create a JPEG, optionally carrying an EXIF DateTimeOriginal.
pub fn write_photo(path: &Path, width: u32, height: u32, taken: Option<&str>) {
    let bytes = match taken {
        Some(ts) => jpeg_with_exif(width, height, &exif_tiff(Some(ts), None, false)),
        None => encode_jpeg(width, height),
    };
    std::fs::write(path, bytes).unwrap();
}

/// Encode a JPEG and splice an APP1 Exif segment right after SOI.
pub fn jpeg_with_exif(width: u32, height: u32, tiff: &[u8]) -> Vec<u8> {
    let jpeg = encode_jpeg(width, height);
    let seg_len = (2 + 6 + tiff.len()) as u16;
    let mut out = Vec::with_capacity(jpeg.len() + tiff.len() + 10);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&seg_len.to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(tiff);
    out.extend_from_slice(&jpeg[2..]);
    out
}

/// Build a TIFF structure with an optional IFD0 DateTime and an optional
/// Exif sub-IFD holding DateTimeOriginal.
///
/// Layout: header | IFD0 | IFD0 strings | Exif IFD | Exif strings
pub fn exif_tiff(original: Option<&str>, modified: Option<&str>, big_endian: bool) -> Vec<u8> {
    let u16b = |v: u16| {
        if big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        }
    };
    let u32b = |v: u32| {
        if big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        }
    };
    let cstr = |s: &str| {
        let mut b = s.as_bytes().to_vec();
        b.push(0);
        b
    };

    let modified = modified.map(cstr);
    let original = original.map(cstr);
    let ifd0_count = modified.is_some() as u16 + original.is_some() as u16;
    let ifd0_start = 8u32;
    let ifd0_data = ifd0_start + 2 + 12 * ifd0_count as u32 + 4;
    let exif_ifd = ifd0_data + modified.as_ref().map_or(0, |b| b.len() as u32);

    let mut out = Vec::new();
    out.extend_from_slice(if big_endian { b"MM" } else { b"II" });
    out.extend_from_slice(&u16b(42));
    out.extend_from_slice(&u32b(ifd0_start));

    out.extend_from_slice(&u16b(ifd0_count));
    if let Some(b) = &modified {
        out.extend_from_slice(&u16b(0x0132));
        out.extend_from_slice(&u16b(2));
        out.extend_from_slice(&u32b(b.len() as u32));
        out.extend_from_slice(&u32b(ifd0_data));
    }
    if original.is_some() {
        out.extend_from_slice(&u16b(0x8769));
        out.extend_from_slice(&u16b(4));
        out.extend_from_slice(&u32b(1));
        out.extend_from_slice(&u32b(exif_ifd));
    }
    out.extend_from_slice(&u32b(0));
    if let Some(b) = &modified {
        out.extend_from_slice(b);
    }

    if let Some(b) = &original {
        let exif_data = exif_ifd + 2 + 12 + 4;
        out.extend_from_slice(&u16b(1));
        out.extend_from_slice(&u16b(0x9003));
        out.extend_from_slice(&u16b(2));
        out.extend_from_slice(&u32b(b.len() as u32));
        out.extend_from_slice(&u32b(exif_data));
        out.extend_from_slice(&u32b(0));
        out.extend_from_slice(b);
    }
    out
}

// =========================================================================
// XMP sidecars
// =========================================================================

/// Write `<photo>.xmp` with the given `dc:subject` bag entries.
pub fn write_xmp_sidecar(photo: &Path, subjects: &[&str]) -> PathBuf {
    let items: String = subjects
        .iter()
        .map(|s| format!("          <rdf:li>{s}</rdf:li>\n"))
        .collect();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about="" xmlns:dc="http://purl.org/dc/elements/1.1/">
      <dc:subject>
        <rdf:Bag>
{items}        </rdf:Bag>
      </dc:subject>
    </rdf:Description>
  </rdf:RDF>
</x:xmpmeta>
"#
    );
    let mut name = photo.as_os_str().to_os_string();
    name.push(".xmp");
    let path = PathBuf::from(name);
    std::fs::write(&path, xml).unwrap();
    path
}

// =========================================================================
// Placement candidates
// =========================================================================

/// Build a candidate. `snaptime` uses `%Y-%m-%dT%H:%M:%S`.
pub fn candidate(
    filename: &str,
    width: u32,
    height: u32,
    snaptime: Option<&str>,
    tags: &[(&str, &[&str])],
) -> ImagePoolCandidate {
    let tag_sets: BTreeMap<String, BTreeSet<String>> = tags
        .iter()
        .map(|(key, values)| {
            (
                key.to_string(),
                values.iter().map(|v| v.to_string()).collect(),
            )
        })
        .collect();
    ImagePoolCandidate {
        filename: PathBuf::from(filename),
        snaptime: snaptime.map(|s| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .unwrap_or_else(|e| panic!("bad test snaptime '{s}': {e}"))
        }),
        width,
        height,
        tag_sets,
    }
}
