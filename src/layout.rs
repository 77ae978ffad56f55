//! Layout files: the concrete, placed form of one calendar variant.
//!
//! A layout lists every page as a stack of layers and maps each photo slot to
//! the file chosen for it. It is written by `calgen layout` and consumed by
//! `calgen render`; users may edit it by hand between the two.
//!
//! ```text
//! {
//!   "meta": { "name": "family-2022", "format": "30x20" },
//!   "pages": [
//!     [
//!       { "template": "photo", "transform": { "photo": { "image": "jan", "aspect_ratio": "3:2" } } },
//!       { "template": "month", "compose": "invert", "vars": { "month": 1 } }
//!     ]
//!   ],
//!   "images": {
//!     "jan": { "filename": "/photos/2021/beach.jpg", "dimensions": [6000, 4000] },
//!     "feb": null
//!   }
//! }
//! ```

use crate::imaging::{CompositionMethod, Gravity};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("layout has no pages")]
    NoPages,
    #[error("page {0} has no layers")]
    EmptyPage(usize),
    #[error("page {page}, element '{element}' references unknown image '{slot}'")]
    UnknownImage {
        page: usize,
        element: String,
        slot: String,
    },
    #[error("invalid aspect ratio '{0}'")]
    InvalidAspectRatio(String),
}

/// A positive width / height ratio.
///
/// Deserializes from a number (`1.5`) or a `"W:H"` string (`"3:2"`);
/// serializes as a number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ratio(f64);

impl Ratio {
    pub fn new(value: f64) -> Result<Self, LayoutError> {
        if value.is_finite() && value > 0.0 {
            Ok(Self(value))
        } else {
            Err(LayoutError::InvalidAspectRatio(value.to_string()))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl FromStr for Ratio {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LayoutError::InvalidAspectRatio(s.to_string());
        let value = match s.split_once(':') {
            Some((w, h)) => {
                let w: f64 = w.trim().parse().map_err(|_| invalid())?;
                let h: f64 = h.trim().parse().map_err(|_| invalid())?;
                w / h
            }
            None => s.trim().parse().map_err(|_| invalid())?,
        };
        Self::new(value).map_err(|_| invalid())
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

impl Serialize for Ratio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0)
    }
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }
        let parsed = match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ratio::new(n),
            Repr::Text(s) => s.parse(),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutMeta {
    pub name: String,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "30x20".to_string()
}

/// How one template element is filled.
///
/// `image`, `aspect_ratio`, `gravity` and `max_edge` drive the crop job; every
/// other key is passed through to the layer renderer untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ElementTransform {
    /// Slot name, a key of [`Layout::images`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<Ratio>,
    #[serde(default)]
    pub gravity: Gravity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_edge: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One template rendered into a raster and merged onto the layers below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Layer {
    pub template: String,
    #[serde(default)]
    pub compose: CompositionMethod,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub vars: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub transform: BTreeMap<String, ElementTransform>,
}

impl Layer {
    /// Elements that show a photo, with their slot names.
    pub fn image_elements(&self) -> impl Iterator<Item = (&str, &str, &ElementTransform)> {
        self.transform.iter().filter_map(|(element, t)| {
            t.image
                .as_deref()
                .map(|slot| (element.as_str(), slot, t))
        })
    }
}

/// The photo placed in a slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageRef {
    pub filename: PathBuf,
    pub dimensions: [u32; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Layout {
    pub meta: LayoutMeta,
    pub pages: Vec<Vec<Layer>>,
    /// Slot → placed photo; `None` for slots placement could not fill.
    #[serde(default)]
    pub images: BTreeMap<String, Option<ImageRef>>,
}

impl Layout {
    /// Read and check a layout file.
    pub fn load(path: &Path) -> Result<Self, LayoutError> {
        let content = std::fs::read_to_string(path)?;
        let layout: Self = serde_json::from_str(&content)?;
        layout.check()?;
        Ok(layout)
    }

    pub fn save(&self, path: &Path) -> Result<(), LayoutError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json + "\n")?;
        Ok(())
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Placed photo for a slot, if any.
    pub fn image(&self, slot: &str) -> Option<&ImageRef> {
        self.images.get(slot).and_then(Option::as_ref)
    }

    /// Slot → filename for every filled slot.
    pub fn placed_filenames(&self) -> BTreeMap<String, PathBuf> {
        self.images
            .iter()
            .filter_map(|(slot, image)| image.as_ref().map(|i| (slot.clone(), i.filename.clone())))
            .collect()
    }

    /// Structural checks: pages exist, no page is empty, every image
    /// reference names a known slot.
    pub fn check(&self) -> Result<(), LayoutError> {
        if self.pages.is_empty() {
            return Err(LayoutError::NoPages);
        }
        for (index, page) in self.pages.iter().enumerate() {
            let page_no = index + 1;
            if page.is_empty() {
                return Err(LayoutError::EmptyPage(page_no));
            }
            for layer in page {
                for (element, slot, _) in layer.image_elements() {
                    if !self.images.contains_key(slot) {
                        return Err(LayoutError::UnknownImage {
                            page: page_no,
                            element: element.to_string(),
                            slot: slot.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
