//! Calendar definitions and layout creation.
//!
//! A calendar definition is the hand-written description of a calendar: which
//! pages it has, which photo slots each page offers and which variants
//! (recipients) exist. `calgen layout` turns it into one [`Layout`] per
//! variant by placing photos from the [`ImagePool`] into the slots.
//!
//! ```text
//! {
//!   "meta": { "name": "family-2022", "format": "30x20" },
//!   "pool": { "directories": ["photos"], "exclusion_window_secs": 7200 },
//!   "variants": [ { "name": "grandma" }, { "name": "friends" } ],
//!   "pages": [
//!     { "type": "static", "layers": [ { "template": "cover" } ] },
//!     { "type": "photo",
//!       "slots": [ { "name": "jan", "aspect_ratio": "3:2" } ],
//!       "layers": [
//!         { "template": "photo", "transform": { "photo": { "image": "jan" } } },
//!         { "template": "month", "compose": "invert", "vars": { "month": 1 } } ] }
//!   ]
//! }
//! ```
//!
//! ## Sticky placement
//!
//! Re-running `layout` on an existing output keeps every photo that was
//! already placed and only fills the empty slots, unless `--reassign` is
//! given. Placement is retried with fresh randomness until every slot is
//! filled or the attempt budget is used up; the last attempt is written
//! either way, with `null` for unfilled slots.

use crate::assignment::{
    DEFAULT_EXCLUSION_WINDOW_SECS, ImagePoolAssignment, PlacementError, PlacementReport,
};
use crate::imaging::ImageBackend;
use crate::layout::{ImageRef, Layer, Layout, LayoutError, LayoutMeta, Ratio};
use crate::pool::{ImagePool, PoolError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("calendar definition has no pages")]
    NoPages,
    #[error("calendar definition has no variants")]
    NoVariants,
    #[error("duplicate variant name: {0}")]
    DuplicateVariant(String),
    #[error("duplicate slot name: {0}")]
    DuplicateSlot(String),
    #[error("page {0} has no layers")]
    EmptyPage(usize),
    #[error("slot(s) {} are used but never declared", .0.join(", "))]
    UndeclaredSlots(Vec<String>),
    #[error("slot(s) {} are declared but never used", .0.join(", "))]
    UnusedSlots(Vec<String>),
    #[error("unknown variant: {0}")]
    UnknownVariant(String),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Placement(#[from] PlacementError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PoolDefinition {
    #[serde(default)]
    pub directories: Vec<PathBuf>,
    #[serde(default)]
    pub cache_file: Option<PathBuf>,
    #[serde(default)]
    pub exclusion_window_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantDefinition {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SlotDefinition {
    pub name: String,
    pub aspect_ratio: Ratio,
}

/// A page of the calendar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PageDefinition {
    /// A page with photo slots to fill.
    Photo {
        slots: Vec<SlotDefinition>,
        layers: Vec<Layer>,
    },
    /// A page rendered from templates alone.
    Static { layers: Vec<Layer> },
}

impl PageDefinition {
    pub fn layers(&self) -> &[Layer] {
        match self {
            PageDefinition::Photo { layers, .. } | PageDefinition::Static { layers } => layers,
        }
    }

    pub fn slots(&self) -> &[SlotDefinition] {
        match self {
            PageDefinition::Photo { slots, .. } => slots,
            PageDefinition::Static { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarDefinition {
    pub meta: LayoutMeta,
    #[serde(default)]
    pub pool: PoolDefinition,
    pub variants: Vec<VariantDefinition>,
    pub pages: Vec<PageDefinition>,
    /// Directory the definition was loaded from; relative paths resolve here.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Knobs for turning a definition into layouts.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutOptions {
    pub exclusion_window_secs: i64,
    /// Placement attempts before settling for a partial result.
    pub placement_attempts: u32,
    /// Fixed seed for reproducible placement.
    pub seed: Option<u64>,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            exclusion_window_secs: DEFAULT_EXCLUSION_WINDOW_SECS,
            placement_attempts: 100,
            seed: None,
        }
    }
}

/// A layout plus how its placement went.
#[derive(Debug, Clone)]
pub struct GeneratedLayout {
    pub layout: Layout,
    pub report: PlacementReport,
    pub attempts: u32,
}

impl CalendarDefinition {
    /// Read and check a definition file.
    pub fn load(path: &Path) -> Result<Self, DefinitionError> {
        let content = std::fs::read_to_string(path)?;
        let mut definition: Self = serde_json::from_str(&content)?;
        definition.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        definition.check()?;
        Ok(definition)
    }

    pub fn variant_names(&self) -> impl Iterator<Item = &str> {
        self.variants.iter().map(|v| v.name.as_str())
    }

    pub fn slots(&self) -> impl Iterator<Item = &SlotDefinition> {
        self.pages.iter().flat_map(|p| p.slots())
    }

    /// Photo directories, resolved against the definition's directory.
    pub fn pool_directories(&self) -> Vec<PathBuf> {
        self.pool
            .directories
            .iter()
            .map(|d| self.base_dir.join(d))
            .collect()
    }

    /// The definition's cache file, or `default` when it names none.
    pub fn pool_cache_file(&self, default: &Path) -> PathBuf {
        match &self.pool.cache_file {
            Some(file) => self.base_dir.join(file),
            None => default.to_path_buf(),
        }
    }

    /// Plausibility checks. Every problem here is fatal.
    pub fn check(&self) -> Result<(), DefinitionError> {
        if self.pages.is_empty() {
            return Err(DefinitionError::NoPages);
        }
        if self.variants.is_empty() {
            return Err(DefinitionError::NoVariants);
        }

        let mut variants = BTreeSet::new();
        for name in self.variant_names() {
            if !variants.insert(name) {
                return Err(DefinitionError::DuplicateVariant(name.to_string()));
            }
        }

        let mut declared = BTreeSet::new();
        for slot in self.slots() {
            if !declared.insert(slot.name.as_str()) {
                return Err(DefinitionError::DuplicateSlot(slot.name.clone()));
            }
        }

        let mut used = BTreeSet::new();
        for (index, page) in self.pages.iter().enumerate() {
            if page.layers().is_empty() {
                return Err(DefinitionError::EmptyPage(index + 1));
            }
            for layer in page.layers() {
                used.extend(layer.image_elements().map(|(_, slot, _)| slot));
            }
        }

        let undeclared: Vec<String> = used.difference(&declared).map(|s| s.to_string()).collect();
        if !undeclared.is_empty() {
            return Err(DefinitionError::UndeclaredSlots(undeclared));
        }
        let unused: Vec<String> = declared.difference(&used).map(|s| s.to_string()).collect();
        if !unused.is_empty() {
            return Err(DefinitionError::UnusedSlots(unused));
        }
        Ok(())
    }

    /// Place photos for one variant and build its layout.
    ///
    /// `previous` maps slot names to photos placed by an earlier run; those
    /// that are still in the pool stay where they are.
    pub fn generate_layout(
        &self,
        pool: &ImagePool,
        variant: &str,
        previous: &BTreeMap<String, PathBuf>,
        options: &LayoutOptions,
    ) -> Result<GeneratedLayout, DefinitionError> {
        if !self.variant_names().any(|v| v == variant) {
            return Err(DefinitionError::UnknownVariant(variant.to_string()));
        }

        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut assignment = ImagePoolAssignment::new(pool, Some(variant))
            .with_exclusion_window_secs(options.exclusion_window_secs)
            .with_rng(rng);

        for slot in self.slots() {
            let sticky = previous.get(&slot.name).and_then(|file| {
                if pool.get(file).is_some() {
                    Some(file.clone())
                } else {
                    warn!(slot = %slot.name, file = %file.display(),
                        "previously placed image is no longer in the pool, reassigning");
                    None
                }
            });
            assignment.add_slot(&slot.name, slot.aspect_ratio.value(), sticky)?;
        }
        for slot in previous.keys() {
            if !self.slots().any(|s| &s.name == slot) {
                debug!(slot = %slot, "dropping placement for slot no longer in the definition");
            }
        }

        let max_attempts = options.placement_attempts.max(1);
        let mut attempts = 0;
        let report = loop {
            attempts += 1;
            let report = assignment.attempt_placement();
            if report.is_success() || attempts >= max_attempts {
                break report;
            }
            debug!(attempt = attempts, "placement incomplete, retrying");
        };
        if report.is_success() {
            info!(variant, attempts, slots = report.total_slots, "all slots filled");
        } else {
            warn!(
                variant,
                attempts,
                unfilled = report.unfilled_slots.len(),
                unplaced_forced = report.unplaced_forced.len(),
                "placement incomplete"
            );
        }

        let images = assignment
            .slots()
            .map(|slot| {
                let image = slot.filled_by().and_then(|file| {
                    let [w, h] = pool.get(file)?.meta.geometry?;
                    Some(ImageRef {
                        filename: file.to_path_buf(),
                        dimensions: [w, h],
                    })
                });
                (slot.name().to_string(), image)
            })
            .collect();

        let layout = Layout {
            meta: self.meta.clone(),
            pages: self.pages.iter().map(|p| self.page_layers(p)).collect(),
            images,
        };
        layout.check()?;
        Ok(GeneratedLayout {
            layout,
            report,
            attempts,
        })
    }

    /// Page layers with each photo element's crop ratio taken from its slot
    /// unless the element sets one.
    fn page_layers(&self, page: &PageDefinition) -> Vec<Layer> {
        let ratios: BTreeMap<&str, Ratio> = self
            .slots()
            .map(|s| (s.name.as_str(), s.aspect_ratio))
            .collect();
        page.layers()
            .iter()
            .map(|layer| {
                let mut layer = layer.clone();
                for transform in layer.transform.values_mut() {
                    if transform.aspect_ratio.is_none()
                        && let Some(slot) = &transform.image
                    {
                        transform.aspect_ratio = ratios.get(slot.as_str()).copied();
                    }
                }
                layer
            })
            .collect()
    }
}

/// What `create_layouts` did for one variant.
#[derive(Debug)]
pub enum LayoutOutcome {
    Written {
        variant: String,
        path: PathBuf,
        report: PlacementReport,
        attempts: u32,
    },
    Skipped {
        variant: String,
        path: PathBuf,
    },
}

/// Options of the `layout` command.
#[derive(Debug, Clone, Default)]
pub struct CreateLayoutOptions {
    pub output_dir: PathBuf,
    /// Variants to generate; empty means all.
    pub variants: Vec<String>,
    pub force: bool,
    /// Ignore placements from an existing layout.
    pub reassign: bool,
    pub layout: LayoutOptions,
}

/// Write `<output_dir>/<variant>.json` for each selected variant.
pub fn create_layouts(
    definition: &CalendarDefinition,
    pool: &mut ImagePool,
    backend: &dyn ImageBackend,
    options: &CreateLayoutOptions,
) -> Result<Vec<LayoutOutcome>, DefinitionError> {
    for name in &options.variants {
        if !definition.variant_names().any(|v| v == name) {
            return Err(DefinitionError::UnknownVariant(name.clone()));
        }
    }
    std::fs::create_dir_all(&options.output_dir)?;

    let mut outcomes = Vec::new();
    for variant in definition.variant_names() {
        if !options.variants.is_empty() && !options.variants.iter().any(|v| v == variant) {
            continue;
        }
        let path = options.output_dir.join(format!("{variant}.json"));
        if path.exists() && !options.force {
            warn!(path = %path.display(), "not overwriting existing layout");
            outcomes.push(LayoutOutcome::Skipped {
                variant: variant.to_string(),
                path,
            });
            continue;
        }

        let previous = if path.is_file() && !options.reassign {
            let placed = Layout::load(&path)?.placed_filenames();
            let files: Vec<&PathBuf> = placed.values().collect();
            pool.scan_files(backend, &files);
            placed
        } else {
            BTreeMap::new()
        };

        info!(path = %path.display(), "generating layout");
        let generated = definition.generate_layout(pool, variant, &previous, &options.layout)?;
        generated.layout.save(&path)?;
        outcomes.push(LayoutOutcome::Written {
            variant: variant.to_string(),
            path,
            report: generated.report,
            attempts: generated.attempts,
        });
    }
    Ok(outcomes)
}
