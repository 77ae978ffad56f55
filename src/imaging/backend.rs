//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the operations the calendar pipeline
//! needs: identify, read_snaptime, crop, compose and finalize.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Render jobs hold the backend behind an `Arc<dyn ImageBackend>`,
//! so implementations must be `Send + Sync`.

use super::params::{ComposeParams, CropParams, FinalizeParams};
use chrono::NaiveDateTime;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

/// Trait for image processing backends.
pub trait ImageBackend: Send + Sync {
    /// Get image dimensions.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Read the capture timestamp, if the file carries one.
    fn read_snaptime(&self, path: &Path) -> Result<Option<NaiveDateTime>, BackendError>;

    /// Crop to an aspect ratio and scale to the target size.
    fn crop(&self, params: &CropParams) -> Result<(), BackendError>;

    /// Merge two layer rasters.
    fn compose(&self, params: &ComposeParams) -> Result<(), BackendError>;

    /// Produce the final page file.
    fn finalize(&self, params: &FinalizeParams) -> Result<(), BackendError>;
}
