//! Pure calculation functions for aspect ratios and crop geometry.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::Gravity;

/// Minimum fraction of a slot's aspect ratio a photo must cover.
///
/// A photo whose native ratio covers less than this would lose more than a
/// quarter of one dimension when cropped into the slot.
pub const MIN_COVERAGE: f64 = 0.75;

/// Slack for float noise around the coverage boundary. Exactly 0.75 is
/// usable even when it is computed as 0.7499999999999999.
const COVERAGE_EPSILON: f64 = 1e-9;

/// Fraction of an image that survives a crop to `crop_ratio`.
///
/// Both ratios are width / height. The result is `min / max` of the two, so
/// it is symmetric and `1.0` for identical ratios.
///
/// ```
/// # use calgen::imaging::usable_image_ratio;
/// assert_eq!(usable_image_ratio(16.0 / 9.0, 16.0 / 9.0), 1.0);
/// assert!((usable_image_ratio(4.0 / 3.0, 16.0 / 9.0) - 0.75).abs() < 1e-12);
/// ```
pub fn usable_image_ratio(image_ratio: f64, crop_ratio: f64) -> f64 {
    if image_ratio <= 0.0 || crop_ratio <= 0.0 {
        return 0.0;
    }
    image_ratio.min(crop_ratio) / image_ratio.max(crop_ratio)
}

/// Whether a photo of `image_ratio` may fill a slot of `slot_ratio`.
/// The boundary is inclusive.
pub fn is_compatible_ratio(image_ratio: f64, slot_ratio: f64) -> bool {
    usable_image_ratio(image_ratio, slot_ratio) + COVERAGE_EPSILON >= MIN_COVERAGE
}

/// An aspect ratio together with its exact and shortened fractional forms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectRatio {
    pub value: f64,
    /// Exact reduced fraction `(numerator, denominator)`.
    pub ideal: (u32, u32),
    /// Approximation with both terms at most `shorten_above`.
    pub short: (u32, u32),
}

/// Approximate `width:height` by a short fraction for display.
///
/// While either term exceeds `shorten_above`, the fraction is nudged to the
/// neighbour with the smaller reduced numerator: odd numerators step the
/// numerator by ±1, even numerators step the denominator by ±1.
///
/// ```
/// # use calgen::imaging::approximate_aspect_ratio;
/// assert_eq!(approximate_aspect_ratio(6240, 4160, 20).short, (3, 2));
/// assert_eq!(approximate_aspect_ratio(768, 600, 20).short, (4, 3));
/// ```
pub fn approximate_aspect_ratio(width: u32, height: u32, shorten_above: u32) -> AspectRatio {
    let ideal = reduce(width.max(1), height.max(1));
    let mut ratio = ideal;
    while ratio.0 > shorten_above || ratio.1 > shorten_above {
        let (num, den) = ratio;
        let (lower, upper) = if num % 2 == 1 {
            (reduce(num - 1, den), reduce(num + 1, den))
        } else if den > 1 {
            (reduce(num, den - 1), reduce(num, den + 1))
        } else {
            (reduce(num, den + 1), reduce(num, den + 1))
        };
        let next = if lower.0 > 0 && lower.0 < upper.0 {
            lower
        } else {
            upper
        };
        if next == ratio {
            break;
        }
        ratio = next;
    }
    AspectRatio {
        value: width as f64 / height.max(1) as f64,
        ideal,
        short: ratio,
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn reduce(num: u32, den: u32) -> (u32, u32) {
    let g = gcd(num, den).max(1);
    (num / g, den / g)
}

/// A rectangle within a source image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Largest region of `aspect` (width / height) inside `source`, anchored by
/// `gravity`.
pub fn calculate_crop_rect(source: (u32, u32), aspect: f64, gravity: Gravity) -> CropRect {
    let (src_w, src_h) = (source.0.max(1), source.1.max(1));
    let src_aspect = src_w as f64 / src_h as f64;

    let (width, height) = if src_aspect > aspect {
        // Source is wider: keep full height, trim width
        let w = (src_h as f64 * aspect).round() as u32;
        (w.clamp(1, src_w), src_h)
    } else {
        // Source is taller: keep full width, trim height
        let h = (src_w as f64 / aspect).round() as u32;
        (src_w, h.clamp(1, src_h))
    };

    let (fx, fy) = gravity.anchor();
    let x = anchored_offset(src_w - width, fx);
    let y = anchored_offset(src_h - height, fy);
    CropRect {
        x,
        y,
        width,
        height,
    }
}

fn anchored_offset(slack: u32, fraction: f64) -> u32 {
    (slack as f64 * fraction).round() as u32
}

/// Scale `dims` down so the longer edge is at most `max_edge`. Never scales up.
pub fn fit_within(dims: (u32, u32), max_edge: u32) -> (u32, u32) {
    let (w, h) = dims;
    let longer = w.max(h);
    if longer <= max_edge || longer == 0 {
        return dims;
    }
    let scale = max_edge as f64 / longer as f64;
    (
        ((w as f64 * scale).round() as u32).max(1),
        ((h as f64 * scale).round() as u32).max(1),
    )
}
