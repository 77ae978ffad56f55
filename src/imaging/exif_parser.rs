//! Minimal EXIF capture-time parser for JPEG and TIFF files.
//!
//! Extracts one value: when the photo was taken.
//! - DateTimeOriginal (0x9003) from the Exif sub-IFD, preferred
//! - DateTime (0x0132) from IFD0, as fallback
//!
//! For JPEG: reads the TIFF structure embedded in the APP1 "Exif" segment.
//! For TIFF: the file itself is the TIFF structure.

use chrono::NaiveDateTime;
use std::path::Path;

const EXIF_HEADER: &[u8] = b"Exif\0\0";
const TAG_DATETIME: u16 = 0x0132;
const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_DATETIME_ORIGINAL: u16 = 0x9003;
const TYPE_ASCII: u16 = 2;

/// EXIF timestamp layout, e.g. `2021:07:14 18:03:55`.
pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Read the capture time from a file, dispatching by extension.
/// Returns `None` on any parse failure or when no timestamp is present.
pub fn read_snaptime(path: &Path) -> Option<NaiveDateTime> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let bytes = std::fs::read(path).ok()?;
    match ext.as_str() {
        "jpg" | "jpeg" => snaptime_from_tiff(find_jpeg_app1_exif(&bytes)?),
        "tif" | "tiff" => snaptime_from_tiff(&bytes),
        _ => None,
    }
}

/// Parse an EXIF `YYYY:MM:DD HH:MM:SS` string. Trailing NULs are ignored.
pub fn parse_exif_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim_end_matches('\0').trim();
    NaiveDateTime::parse_from_str(text, EXIF_DATETIME_FORMAT).ok()
}

// ---------------------------------------------------------------------------
// JPEG: locate APP1 / Exif
// ---------------------------------------------------------------------------

/// Find the TIFF bytes inside a JPEG's APP1 Exif segment.
fn find_jpeg_app1_exif(data: &[u8]) -> Option<&[u8]> {
    let mut pos = 0;
    while pos + 4 < data.len() {
        if data[pos] == 0xFF && data[pos + 1] == 0xE1 {
            let seg_len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
            let seg_start = pos + 4;
            let seg_end = (pos + 2 + seg_len).min(data.len());
            if seg_start <= seg_end {
                let segment = &data[seg_start..seg_end];
                if let Some(tiff) = segment.strip_prefix(EXIF_HEADER) {
                    return Some(tiff);
                }
            }
        }

        // Advance: if 0xFF, skip marker + length; otherwise byte-by-byte
        if data[pos] == 0xFF && pos + 3 < data.len() && data[pos + 1] != 0x00 {
            let marker = data[pos + 1];
            // SOS (0xDA) means image data starts, stop scanning
            if marker == 0xDA {
                break;
            }
            // Markers without length field
            if marker == 0xD8 || marker == 0xD9 || (0xD0..=0xD7).contains(&marker) {
                pos += 2;
            } else {
                let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
                pos += 2 + len;
            }
        } else {
            pos += 1;
        }
    }
    None
}

// ---------------------------------------------------------------------------
// TIFF: walk IFD0 and the Exif sub-IFD
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct IfdEntry {
    tag: u16,
    typ: u16,
    count: usize,
    /// Offset of the 4-byte value/offset field.
    field: usize,
}

/// Bounds-checked reader over a TIFF byte structure.
struct TiffReader<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl<'a> TiffReader<'a> {
    fn new(data: &'a [u8]) -> Option<Self> {
        let big_endian = match data.get(0..2)? {
            b"MM" => true,
            b"II" => false,
            _ => return None,
        };
        let reader = Self { data, big_endian };
        // Verify TIFF magic (42)
        (reader.u16(2)? == 42).then_some(reader)
    }

    fn u16(&self, offset: usize) -> Option<u16> {
        let b = self.data.get(offset..offset + 2)?;
        Some(if self.big_endian {
            u16::from_be_bytes([b[0], b[1]])
        } else {
            u16::from_le_bytes([b[0], b[1]])
        })
    }

    fn u32(&self, offset: usize) -> Option<u32> {
        let b = self.data.get(offset..offset + 4)?;
        Some(if self.big_endian {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        })
    }

    fn entries(&self, ifd_offset: usize) -> Option<Vec<IfdEntry>> {
        let count = self.u16(ifd_offset)? as usize;
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let offset = ifd_offset + 2 + i * 12;
            entries.push(IfdEntry {
                tag: self.u16(offset)?,
                typ: self.u16(offset + 2)?,
                count: self.u32(offset + 4)? as usize,
                field: offset + 8,
            });
        }
        Some(entries)
    }

    /// ASCII values of up to four bytes are stored inline in the value field.
    fn ascii(&self, entry: &IfdEntry) -> Option<&'a str> {
        if entry.typ != TYPE_ASCII {
            return None;
        }
        let start = if entry.count <= 4 {
            entry.field
        } else {
            self.u32(entry.field)? as usize
        };
        let bytes = self.data.get(start..start.checked_add(entry.count)?)?;
        std::str::from_utf8(bytes).ok()
    }

    fn datetime(&self, entry: &IfdEntry) -> Option<NaiveDateTime> {
        self.ascii(entry).and_then(parse_exif_datetime)
    }
}

fn snaptime_from_tiff(data: &[u8]) -> Option<NaiveDateTime> {
    let tiff = TiffReader::new(data)?;
    let ifd0 = tiff.entries(tiff.u32(4)? as usize)?;

    let mut fallback = None;
    for entry in &ifd0 {
        match entry.tag {
            TAG_DATETIME_ORIGINAL => {
                if let Some(ts) = tiff.datetime(entry) {
                    return Some(ts);
                }
            }
            TAG_EXIF_IFD => {
                let original = tiff
                    .u32(entry.field)
                    .and_then(|offset| tiff.entries(offset as usize))
                    .and_then(|sub| {
                        sub.iter()
                            .find(|e| e.tag == TAG_DATETIME_ORIGINAL)
                            .and_then(|e| tiff.datetime(e))
                    });
                if original.is_some() {
                    return original;
                }
            }
            TAG_DATETIME => fallback = tiff.datetime(entry),
            _ => {}
        }
    }
    fallback
}
