//! Pure Rust image processing backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | Identify | `image::image_dimensions` (header only) |
//! | Capture time | custom `exif_parser` (JPEG APP1 + TIFF IFD) |
//! | Crop | `DynamicImage::crop_imm` + `resize_exact` with `Lanczos3` |
//! | Alpha compose | `image::imageops::overlay` |
//! | Inverted compose | per-pixel mask arithmetic on RGBA8 |
//! | Flatten | per-pixel blend onto white |

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::calculations::calculate_crop_rect;
use super::params::{ComposeParams, CompositionMethod, CropParams, FinalizeParams};
use chrono::NaiveDateTime;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, Rgba, RgbaImage};
use std::path::Path;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Load and decode an image from disk.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)
        .map_err(BackendError::Io)?
        .with_guessed_format()
        .map_err(BackendError::Io)?
        .decode()
        .map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
        })
}

/// Output format for an extension. Formats without alpha support are
/// flagged so the caller can drop the channel first.
fn output_format(path: &Path) -> Result<(ImageFormat, bool), BackendError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "png" => Ok((ImageFormat::Png, true)),
        "jpg" | "jpeg" => Ok((ImageFormat::Jpeg, false)),
        "tif" | "tiff" => Ok((ImageFormat::Tiff, true)),
        "webp" => Ok((ImageFormat::WebP, true)),
        other => Err(BackendError::ProcessingFailed(format!(
            "Unsupported output format: {}",
            other
        ))),
    }
}

/// Save a DynamicImage to the given path, inferring format from extension.
fn save_image(img: &DynamicImage, path: &Path) -> Result<(), BackendError> {
    let (format, keeps_alpha) = output_format(path)?;
    let result = if keeps_alpha {
        img.save_with_format(path, format)
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8()).save_with_format(path, format)
    };
    result.map_err(|e| {
        BackendError::ProcessingFailed(format!("Failed to write {}: {}", path.display(), e))
    })
}

fn unit(v: u8) -> f32 {
    v as f32 / 255.0
}

fn byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Use the upper layer's alpha as a mask over the lower layer.
///
/// With `a` the upper alpha and `l` a lower colour channel (both 0..1):
/// `out = a·(a·(1 − l·a)) + (1 − a)·l`. Opaque mask regions show `1 − l`,
/// transparent ones show `l`. The lower layer's alpha is kept. Pixels outside
/// the upper layer count as transparent.
fn inverted_compose(lower: &RgbaImage, upper: &RgbaImage) -> RgbaImage {
    let mut out = lower.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let a = if x < upper.width() && y < upper.height() {
            unit(upper.get_pixel(x, y)[3])
        } else {
            0.0
        };
        let [r, g, b, alpha] = pixel.0;
        let mix = |l: u8| {
            let l = unit(l);
            byte(a * (a * (1.0 - l * a)) + (1.0 - a) * l)
        };
        *pixel = Rgba([mix(r), mix(g), mix(b), alpha]);
    }
    out
}

/// Blend every pixel onto an opaque white background.
fn flatten_on_white(img: &DynamicImage) -> DynamicImage {
    let mut rgba = img.to_rgba8();
    for pixel in rgba.pixels_mut() {
        let [r, g, b, alpha] = pixel.0;
        let a = unit(alpha);
        let blend = |c: u8| byte(unit(c) * a + (1.0 - a));
        *pixel = Rgba([blend(r), blend(g), blend(b), 255]);
    }
    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba).to_rgb8())
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        let (width, height) = image::image_dimensions(path).map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to read dimensions: {}", e))
        })?;
        Ok(Dimensions { width, height })
    }

    fn read_snaptime(&self, path: &Path) -> Result<Option<NaiveDateTime>, BackendError> {
        Ok(super::exif_parser::read_snaptime(path))
    }

    fn crop(&self, params: &CropParams) -> Result<(), BackendError> {
        let img = load_image(&params.source)?;
        let rect = calculate_crop_rect(
            (img.width(), img.height()),
            params.aspect_ratio,
            params.gravity,
        );
        let cropped = img.crop_imm(rect.x, rect.y, rect.width, rect.height);
        let sized = if (rect.width, rect.height) == (params.width, params.height) {
            cropped
        } else {
            cropped.resize_exact(params.width, params.height, FilterType::Lanczos3)
        };
        save_image(&sized, &params.output)
    }

    fn compose(&self, params: &ComposeParams) -> Result<(), BackendError> {
        let mut lower = load_image(&params.lower)?.to_rgba8();
        let upper = load_image(&params.upper)?.to_rgba8();
        let merged = match params.method {
            CompositionMethod::AlphaCompose => {
                image::imageops::overlay(&mut lower, &upper, 0, 0);
                lower
            }
            CompositionMethod::InvertedCompose => inverted_compose(&lower, &upper),
        };
        save_image(&DynamicImage::ImageRgba8(merged), &params.output)
    }

    fn finalize(&self, params: &FinalizeParams) -> Result<(), BackendError> {
        let img = load_image(&params.source)?;
        let img = if params.flatten {
            flatten_on_white(&img)
        } else {
            img
        };
        save_image(&img, &params.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::params::Gravity;
    use crate::test_helpers::create_test_jpeg;

    fn write_rgba(path: &Path, width: u32, height: u32, pixel: [u8; 4]) {
        RgbaImage::from_pixel(width, height, Rgba(pixel))
            .save(path)
            .unwrap();
    }

    #[test]
    fn identify_synthetic_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("test.jpg");
        create_test_jpeg(&path, 200, 150);

        let backend = RustBackend::new();
        let dims = backend.identify(&path).unwrap();
        assert_eq!(dims.width, 200);
        assert_eq!(dims.height, 150);
    }

    #[test]
    fn identify_nonexistent_file_errors() {
        let backend = RustBackend::new();
        let result = backend.identify(Path::new("/nonexistent/image.jpg"));
        assert!(result.is_err());
    }

    #[test]
    fn read_snaptime_without_exif_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("test.jpg");
        create_test_jpeg(&path, 100, 100);

        let backend = RustBackend::new();
        assert_eq!(backend.read_snaptime(&path).unwrap(), None);
    }

    #[test]
    fn crop_to_exact_target_size() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        create_test_jpeg(&source, 400, 300);

        let output = tmp.path().join("crop.png");
        let backend = RustBackend::new();
        backend
            .crop(&CropParams {
                source,
                output: output.clone(),
                aspect_ratio: 1.0,
                gravity: Gravity::Center,
                width: 120,
                height: 120,
            })
            .unwrap();

        let dims = backend.identify(&output).unwrap();
        assert_eq!((dims.width, dims.height), (120, 120));
    }

    #[test]
    fn crop_unsupported_output_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        create_test_jpeg(&source, 100, 100);

        let backend = RustBackend::new();
        let result = backend.crop(&CropParams {
            source,
            output: tmp.path().join("out.xyz"),
            aspect_ratio: 1.0,
            gravity: Gravity::Center,
            width: 50,
            height: 50,
        });
        assert!(result.is_err());
    }

    #[test]
    fn alpha_compose_draws_upper_over_lower() {
        let tmp = tempfile::TempDir::new().unwrap();
        let lower = tmp.path().join("lower.png");
        let upper = tmp.path().join("upper.png");
        write_rgba(&lower, 4, 4, [255, 0, 0, 255]);
        write_rgba(&upper, 4, 4, [0, 0, 255, 255]);

        RustBackend::new()
            .compose(&ComposeParams {
                lower,
                upper: upper.clone(),
                output: upper.clone(),
                method: CompositionMethod::AlphaCompose,
            })
            .unwrap();

        let merged = image::open(&upper).unwrap().to_rgba8();
        assert_eq!(merged.get_pixel(0, 0).0, [0, 0, 255, 255]);
    }

    #[test]
    fn alpha_compose_transparent_upper_keeps_lower() {
        let tmp = tempfile::TempDir::new().unwrap();
        let lower = tmp.path().join("lower.png");
        let upper = tmp.path().join("upper.png");
        write_rgba(&lower, 4, 4, [10, 20, 30, 255]);
        write_rgba(&upper, 4, 4, [200, 200, 200, 0]);

        RustBackend::new()
            .compose(&ComposeParams {
                lower,
                upper: upper.clone(),
                output: upper.clone(),
                method: CompositionMethod::AlphaCompose,
            })
            .unwrap();

        let merged = image::open(&upper).unwrap().to_rgba8();
        assert_eq!(merged.get_pixel(2, 2).0, [10, 20, 30, 255]);
    }

    #[test]
    fn inverted_compose_inverts_under_opaque_mask() {
        let lower = RgbaImage::from_pixel(2, 1, Rgba([255, 0, 64, 255]));
        let mut upper = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 0]));
        upper.put_pixel(0, 0, Rgba([12, 34, 56, 255]));

        let out = inverted_compose(&lower, &upper);
        // Opaque mask: lower inverted, upper colour ignored
        assert_eq!(out.get_pixel(0, 0).0, [0, 255, 191, 255]);
        // Transparent mask: lower unchanged
        assert_eq!(out.get_pixel(1, 0).0, [255, 0, 64, 255]);
    }

    #[test]
    fn inverted_compose_outside_upper_keeps_lower() {
        let lower = RgbaImage::from_pixel(3, 3, Rgba([100, 100, 100, 255]));
        let upper = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
        let out = inverted_compose(&lower, &upper);
        assert_eq!(out.get_pixel(2, 2).0, [100, 100, 100, 255]);
        assert_eq!(out.get_pixel(0, 0).0, [155, 155, 155, 255]);
    }

    #[test]
    fn finalize_flattens_on_white() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("layer.png");
        write_rgba(&source, 2, 2, [0, 0, 0, 0]);
        let output = tmp.path().join("page.png");

        RustBackend::new()
            .finalize(&FinalizeParams {
                source,
                output: output.clone(),
                flatten: true,
            })
            .unwrap();

        let img = image::open(&output).unwrap();
        assert!(!img.color().has_alpha());
        assert_eq!(img.to_rgb8().get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[test]
    fn finalize_keeps_transparency_without_flatten() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("layer.png");
        write_rgba(&source, 2, 2, [9, 9, 9, 0]);
        let output = tmp.path().join("page.png");

        RustBackend::new()
            .finalize(&FinalizeParams {
                source,
                output: output.clone(),
                flatten: false,
            })
            .unwrap();

        let img = image::open(&output).unwrap();
        assert_eq!(img.to_rgba8().get_pixel(1, 1).0[3], 0);
    }

    #[test]
    fn finalize_to_jpeg_drops_alpha() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("layer.png");
        write_rgba(&source, 8, 8, [50, 60, 70, 255]);
        let output = tmp.path().join("page.jpg");

        let backend = RustBackend::new();
        backend
            .finalize(&FinalizeParams {
                source,
                output: output.clone(),
                flatten: false,
            })
            .unwrap();

        let dims = backend.identify(&output).unwrap();
        assert_eq!((dims.width, dims.height), (8, 8));
    }
}
