//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the render pipeline (which decides which files to crop,
//! merge and convert) and the [`backend`](super::backend) (which does the
//! pixel work). A mock backend can record them in tests.
//!
//! ## Types
//!
//! - [`Gravity`]: Anchor of a crop region inside its source.
//! - [`CompositionMethod`]: How an upper layer is merged onto the one below.
//! - [`CropParams`]: Source, output, crop aspect ratio, gravity, target size.
//! - [`ComposeParams`]: Lower and upper layer files plus the method.
//! - [`FinalizeParams`]: Final conversion of a page raster to its output file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Anchor for a crop region, named after compass directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gravity {
    #[default]
    Center,
    North,
    #[serde(alias = "north-east")]
    NorthEast,
    East,
    #[serde(alias = "south-east")]
    SouthEast,
    South,
    #[serde(alias = "south-west")]
    SouthWest,
    West,
    #[serde(alias = "north-west")]
    NorthWest,
}

impl Gravity {
    /// Horizontal and vertical anchor fractions: 0.0 = left/top, 1.0 = right/bottom.
    pub fn anchor(self) -> (f64, f64) {
        match self {
            Gravity::Center => (0.5, 0.5),
            Gravity::North => (0.5, 0.0),
            Gravity::NorthEast => (1.0, 0.0),
            Gravity::East => (1.0, 0.5),
            Gravity::SouthEast => (1.0, 1.0),
            Gravity::South => (0.5, 1.0),
            Gravity::SouthWest => (0.0, 1.0),
            Gravity::West => (0.0, 0.5),
            Gravity::NorthWest => (0.0, 0.0),
        }
    }
}

/// Layer composition mode.
///
/// - `AlphaCompose`: the upper layer is drawn over the lower one using its
///   alpha channel.
/// - `InvertedCompose`: the upper layer contributes only its alpha channel
///   as a mask. Where the mask is opaque the lower layer shows tone-inverted,
///   where it is transparent the lower layer shows unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositionMethod {
    #[default]
    #[serde(rename = "alpha", alias = "compose")]
    AlphaCompose,
    #[serde(rename = "invert", alias = "inverted")]
    InvertedCompose,
}

/// Crop `source` to `aspect_ratio` around `gravity`, then scale to exactly
/// `width` x `height` and write `output`.
#[derive(Debug, Clone, PartialEq)]
pub struct CropParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub aspect_ratio: f64,
    pub gravity: Gravity,
    pub width: u32,
    pub height: u32,
}

/// Merge `upper` onto `lower`; the result replaces `output`.
///
/// The render pipeline writes the merge over the upper layer's file so that
/// the next merge in the chain picks it up as its lower layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeParams {
    pub lower: PathBuf,
    pub upper: PathBuf,
    pub output: PathBuf,
    pub method: CompositionMethod,
}

/// Convert the final page raster to the output file. The format follows the
/// output extension.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeParams {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Flatten onto white instead of keeping transparency.
    pub flatten: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gravity_defaults_to_center() {
        assert_eq!(Gravity::default(), Gravity::Center);
        assert_eq!(Gravity::default().anchor(), (0.5, 0.5));
    }

    #[test]
    fn gravity_parses_compass_names() {
        let g: Gravity = serde_json::from_str("\"northeast\"").unwrap();
        assert_eq!(g, Gravity::NorthEast);
        let g: Gravity = serde_json::from_str("\"south-west\"").unwrap();
        assert_eq!(g, Gravity::SouthWest);
    }

    #[test]
    fn composition_method_accepts_aliases() {
        let m: CompositionMethod = serde_json::from_str("\"compose\"").unwrap();
        assert_eq!(m, CompositionMethod::AlphaCompose);
        let m: CompositionMethod = serde_json::from_str("\"invert\"").unwrap();
        assert_eq!(m, CompositionMethod::InvertedCompose);
        assert_eq!(
            serde_json::to_string(&CompositionMethod::AlphaCompose).unwrap(),
            "\"alpha\""
        );
    }
}
