//! Image processing: pure Rust, no external binaries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::image_dimensions` |
//! | **Capture time** | custom parser (JPEG APP1 + TIFF IFD) |
//! | **Crop** | `crop_imm` + Lanczos3 resize |
//! | **Compose** | `imageops::overlay` / inverted alpha mask |
//! | **Finalize** | flatten onto white, encode by extension |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for ratio and crop math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: High-level functions combining calculations + backend

pub mod backend;
mod calculations;
pub(crate) mod exif_parser;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{
    AspectRatio, CropRect, MIN_COVERAGE, approximate_aspect_ratio, calculate_crop_rect,
    fit_within, is_compatible_ratio, usable_image_ratio,
};
pub use exif_parser::parse_exif_datetime;
pub use operations::{CropConfig, crop_image, get_dimensions, plan_crop};
pub use params::{ComposeParams, CompositionMethod, CropParams, FinalizeParams, Gravity};
pub use rust_backend::RustBackend;
