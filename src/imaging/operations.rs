//! High-level image operations.
//!
//! These functions combine calculations with backend execution.
//! They take configuration, compute parameters, and call the backend.

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::calculations::{calculate_crop_rect, fit_within};
use super::params::{CropParams, Gravity};
use std::path::Path;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Get image dimensions using the backend.
pub fn get_dimensions(backend: &dyn ImageBackend, path: &Path) -> Result<(u32, u32)> {
    let dims = backend.identify(path)?;
    Ok((dims.width, dims.height))
}

/// How to cut a photo for one slot on a page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropConfig {
    /// Target width / height.
    pub aspect_ratio: f64,
    pub gravity: Gravity,
    /// Downscale so the longer output edge is at most this many pixels.
    pub max_edge: Option<u32>,
}

/// Compute crop parameters for a source of known size.
///
/// The output keeps the crop region's native resolution unless `max_edge`
/// asks for a smaller one.
pub fn plan_crop(
    source: &Path,
    output: &Path,
    source_dims: Dimensions,
    config: &CropConfig,
) -> CropParams {
    let rect = calculate_crop_rect(
        (source_dims.width, source_dims.height),
        config.aspect_ratio,
        config.gravity,
    );
    let (width, height) = match config.max_edge {
        Some(edge) => fit_within((rect.width, rect.height), edge),
        None => (rect.width, rect.height),
    };
    CropParams {
        source: source.to_path_buf(),
        output: output.to_path_buf(),
        aspect_ratio: config.aspect_ratio,
        gravity: config.gravity,
        width,
        height,
    }
}

/// Identify `source`, then crop it into `output`.
///
/// Returns the executed parameters so callers can report output sizes.
pub fn crop_image(
    backend: &dyn ImageBackend,
    source: &Path,
    output: &Path,
    config: &CropConfig,
) -> Result<CropParams> {
    let dims = backend.identify(source)?;
    let params = plan_crop(source, output, dims, config);
    backend.crop(&params)?;
    Ok(params)
}
