//! Photo-to-slot assignment.
//!
//! An [`ImagePoolAssignment`] fills named layout slots with photos from a
//! [`CandidateSource`] (normally the [`ImagePool`](crate::pool::ImagePool)).
//!
//! ## Candidate filtering
//!
//! The first placement attempt computes the initial candidate list once and
//! caches it for the assignment's lifetime:
//!
//! 1. Every photo the source offers becomes a candidate.
//! 2. Each photo already placed in a sticky slot is removed, together with
//!    its *dependencies*: every candidate sharing one of its `grp` tag values
//!    and every candidate shot within the exclusion window (inclusive) of it.
//! 3. Candidates carrying a non-empty `only` tag set that does not name the
//!    current variant are removed.
//!
//! ## Placement
//!
//! Each attempt resets the slots to their sticky state and works on a fresh
//! copy of the cached list. Photos tagged `forced` with the variant name are
//! preferred. Unfilled slots are processed last-added first; each slot takes
//! a uniformly random compatible photo, first from the forced list, then
//! from the whole pool. A photo is compatible when its aspect ratio covers
//! at least [`MIN_COVERAGE`](crate::imaging::MIN_COVERAGE) of the slot's.
//!
//! Every placement removes the chosen photo and its dependencies from the
//! pool, the same way sticky photos are removed, so no photo fills two slots.
//!
//! Failure is reported, not fatal: slots that could be filled keep their
//! photos and the [`PlacementReport`] names what is missing.

use crate::imaging::is_compatible_ratio;
use chrono::NaiveDateTime;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// Tag whose values group near-duplicate photos.
pub const GROUP_TAG: &str = "grp";
/// Tag restricting a photo to the listed variants.
pub const ONLY_TAG: &str = "only";
/// Tag requiring a photo to be placed in the listed variants.
pub const FORCED_TAG: &str = "forced";
/// Default half-width of the capture-time exclusion window.
pub const DEFAULT_EXCLUSION_WINDOW_SECS: i64 = 3600;

#[derive(Error, Debug, PartialEq)]
pub enum PlacementError {
    #[error("slot '{0}' added twice")]
    DuplicateSlot(String),
    #[error("slot '{slot}' has invalid aspect ratio {ratio}")]
    InvalidAspectRatio { slot: String, ratio: f64 },
}

/// A photo eligible for placement.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePoolCandidate {
    pub filename: PathBuf,
    pub snaptime: Option<NaiveDateTime>,
    pub width: u32,
    pub height: u32,
    /// Tag name → values, e.g. `grp → {beach2021}`.
    pub tag_sets: BTreeMap<String, BTreeSet<String>>,
}

impl ImagePoolCandidate {
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }

    pub fn tag(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.tag_sets.get(name)
    }

    pub fn has_tag_value(&self, name: &str, value: &str) -> bool {
        self.tag(name).is_some_and(|values| values.contains(value))
    }

    fn is_compatible_with(&self, slot_ratio: f64) -> bool {
        is_compatible_ratio(self.aspect_ratio(), slot_ratio)
    }

    /// Whether `other` must leave the pool once `self` is placed.
    fn excludes(&self, other: &ImagePoolCandidate, window_secs: i64) -> bool {
        if other.filename == self.filename {
            return true;
        }
        if let (Some(placed), Some(t)) = (self.snaptime, other.snaptime)
            && (t - placed).num_seconds().abs() <= window_secs
        {
            return true;
        }
        match (self.tag(GROUP_TAG), other.tag(GROUP_TAG)) {
            (Some(mine), Some(theirs)) => !mine.is_disjoint(theirs),
            _ => false,
        }
    }
}

/// Anything that can enumerate placement candidates.
pub trait CandidateSource {
    fn candidates(&self) -> Vec<ImagePoolCandidate>;
}

impl CandidateSource for [ImagePoolCandidate] {
    fn candidates(&self) -> Vec<ImagePoolCandidate> {
        self.to_vec()
    }
}

impl CandidateSource for Vec<ImagePoolCandidate> {
    fn candidates(&self) -> Vec<ImagePoolCandidate> {
        self.clone()
    }
}

/// A named placement needing one photo of a target aspect ratio.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePoolSlot {
    name: String,
    aspect_ratio: f64,
    initially_filled_by: Option<PathBuf>,
    filled_by: Option<PathBuf>,
}

impl ImagePoolSlot {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.aspect_ratio
    }

    pub fn filled_by(&self) -> Option<&Path> {
        self.filled_by.as_deref()
    }

    pub fn is_filled(&self) -> bool {
        self.filled_by.is_some()
    }

    /// Whether the fill came from a previous run.
    pub fn is_sticky(&self) -> bool {
        self.initially_filled_by.is_some()
    }

    /// Restore the initial (possibly sticky) fill.
    pub fn reset(&mut self) {
        self.filled_by = self.initially_filled_by.clone();
    }
}

impl fmt::Display for ImagePoolSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filled_by {
            Some(path) => write!(f, "{} ({:.3}): {}", self.name, self.aspect_ratio, path.display()),
            None => write!(f, "{} ({:.3})", self.name, self.aspect_ratio),
        }
    }
}

/// Result of one placement attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementReport {
    pub total_slots: usize,
    pub filled: usize,
    /// Slots left empty, in processing order.
    pub unfilled_slots: Vec<String>,
    /// Forced photos that found no compatible slot.
    pub unplaced_forced: Vec<PathBuf>,
}

impl PlacementReport {
    pub fn is_success(&self) -> bool {
        self.unfilled_slots.is_empty() && self.unplaced_forced.is_empty()
    }
}

/// Fills slots from a candidate source for one variant.
pub struct ImagePoolAssignment<'a> {
    source: &'a dyn CandidateSource,
    variant: Option<String>,
    exclusion_window_secs: i64,
    slots: Vec<ImagePoolSlot>,
    initial_candidates: Option<Vec<ImagePoolCandidate>>,
    rng: StdRng,
}

impl<'a> ImagePoolAssignment<'a> {
    pub fn new(source: &'a dyn CandidateSource, variant: Option<&str>) -> Self {
        Self {
            source,
            variant: variant.map(str::to_string),
            exclusion_window_secs: DEFAULT_EXCLUSION_WINDOW_SECS,
            slots: Vec::new(),
            initial_candidates: None,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_exclusion_window_secs(mut self, secs: i64) -> Self {
        self.exclusion_window_secs = secs;
        self.initial_candidates = None;
        self
    }

    /// Make random choices reproducible.
    pub fn with_seed(self, seed: u64) -> Self {
        self.with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    pub fn add_slot(
        &mut self,
        name: &str,
        aspect_ratio: f64,
        filled_by: Option<PathBuf>,
    ) -> Result<&mut Self, PlacementError> {
        if self.slots.iter().any(|slot| slot.name == name) {
            return Err(PlacementError::DuplicateSlot(name.to_string()));
        }
        if !aspect_ratio.is_finite() || aspect_ratio <= 0.0 {
            return Err(PlacementError::InvalidAspectRatio {
                slot: name.to_string(),
                ratio: aspect_ratio,
            });
        }
        self.slots.push(ImagePoolSlot {
            name: name.to_string(),
            aspect_ratio,
            initially_filled_by: filled_by.clone(),
            filled_by,
        });
        // Sticky fills change the initial candidate set.
        self.initial_candidates = None;
        Ok(self)
    }

    pub fn slots(&self) -> impl Iterator<Item = &ImagePoolSlot> {
        self.slots.iter()
    }

    pub fn slot(&self, name: &str) -> Option<&ImagePoolSlot> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    /// Current slot → photo mapping.
    pub fn assignments(&self) -> BTreeMap<String, Option<PathBuf>> {
        self.slots
            .iter()
            .map(|slot| (slot.name.clone(), slot.filled_by.clone()))
            .collect()
    }

    /// Size of the cached initial candidate set.
    pub fn candidate_count(&mut self) -> usize {
        self.initial_candidates().len()
    }

    fn initial_candidates(&mut self) -> &[ImagePoolCandidate] {
        if self.initial_candidates.is_none() {
            self.initial_candidates = Some(self.calculate_candidates());
        }
        self.initial_candidates.as_deref().unwrap_or_default()
    }

    fn calculate_candidates(&self) -> Vec<ImagePoolCandidate> {
        let all = self.source.candidates();
        for candidate in &all {
            trace!(file = %candidate.filename.display(), ratio = candidate.aspect_ratio(), "candidate");
        }
        debug!(count = all.len(), "initial list of candidates");

        let mut candidates = all.clone();
        for slot in &self.slots {
            let Some(filename) = &slot.initially_filled_by else {
                continue;
            };
            match all.iter().find(|c| &c.filename == filename) {
                Some(sticky) => {
                    remove_with_dependencies(&mut candidates, sticky, self.exclusion_window_secs);
                }
                None => {
                    warn!(slot = %slot.name, file = %filename.display(),
                        "sticky image is not part of the pool");
                    candidates.retain(|c| &c.filename != filename);
                }
            }
        }

        if let Some(variant) = &self.variant {
            candidates.retain(|c| match c.tag(ONLY_TAG) {
                Some(only) if !only.is_empty() => only.contains(variant),
                _ => true,
            });
        }
        debug!(count = candidates.len(), "candidates after filtering");
        candidates
    }

    /// Try to fill every unfilled slot. Placements are kept on failure.
    pub fn attempt_placement(&mut self) -> PlacementReport {
        let mut candidates = self.initial_candidates().to_vec();
        for slot in &mut self.slots {
            slot.reset();
        }

        let mut forced: Vec<ImagePoolCandidate> = match &self.variant {
            Some(variant) => candidates
                .iter()
                .filter(|c| c.has_tag_value(FORCED_TAG, variant))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        let mut remaining: Vec<usize> = (0..self.slots.len())
            .filter(|&i| !self.slots[i].is_filled())
            .collect();
        debug!(count = remaining.len(), forced = forced.len(), "attempting to fill slots");

        let mut unfilled_slots = Vec::new();
        let mut excluded_forced = Vec::new();
        while let Some(index) = remaining.pop() {
            let slot = &mut self.slots[index];
            let chosen = place_one(
                &mut self.rng,
                slot.aspect_ratio,
                &mut forced,
                &mut excluded_forced,
                &mut candidates,
                self.exclusion_window_secs,
            );
            match chosen {
                Some(filename) => {
                    debug!(slot = %slot.name, file = %filename.display(), "slot filled");
                    slot.filled_by = Some(filename);
                }
                None => {
                    warn!(slot = %slot.name, ratio = slot.aspect_ratio, "no compatible candidate for slot");
                    unfilled_slots.push(slot.name.clone());
                }
            }
        }

        if !unfilled_slots.is_empty() {
            error!(
                count = unfilled_slots.len(),
                "image placement failed: slots could not be filled with suitable candidates"
            );
        }
        for image in &forced {
            warn!(file = %image.filename.display(), "image marked as forced was not placed");
        }
        for image in &excluded_forced {
            warn!(file = %image.filename.display(),
                "image marked as forced was excluded by another placement");
        }

        let filled = self.slots.iter().filter(|s| s.is_filled()).count();
        PlacementReport {
            total_slots: self.slots.len(),
            filled,
            unfilled_slots,
            unplaced_forced: forced
                .into_iter()
                .chain(excluded_forced)
                .map(|c| c.filename)
                .collect(),
        }
    }
}

/// Fill one slot: forced photos first, then the whole pool.
///
/// Forced photos that the placement excludes move to `excluded_forced`.
fn place_one(
    rng: &mut StdRng,
    slot_ratio: f64,
    forced: &mut Vec<ImagePoolCandidate>,
    excluded_forced: &mut Vec<ImagePoolCandidate>,
    candidates: &mut Vec<ImagePoolCandidate>,
    window_secs: i64,
) -> Option<PathBuf> {
    let chosen = match pick(rng, forced, slot_ratio) {
        Some(index) => forced.remove(index),
        None => {
            let index = pick(rng, candidates, slot_ratio)?;
            candidates[index].clone()
        }
    };
    remove_with_dependencies(candidates, &chosen, window_secs);
    let (blocked, kept): (Vec<_>, Vec<_>) = std::mem::take(forced)
        .into_iter()
        .filter(|c| c.filename != chosen.filename)
        .partition(|c| chosen.excludes(c, window_secs));
    *forced = kept;
    excluded_forced.extend(blocked);
    Some(chosen.filename)
}

/// Uniformly random index of a compatible candidate.
fn pick(rng: &mut StdRng, pool: &[ImagePoolCandidate], slot_ratio: f64) -> Option<usize> {
    let compatible: Vec<usize> = pool
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_compatible_with(slot_ratio))
        .map(|(i, _)| i)
        .collect();
    compatible.choose(rng).copied()
}

/// Remove `placed` plus its group and time-window neighbours.
fn remove_with_dependencies(
    candidates: &mut Vec<ImagePoolCandidate>,
    placed: &ImagePoolCandidate,
    window_secs: i64,
) -> usize {
    let before = candidates.len();
    candidates.retain(|c| !placed.excludes(c, window_secs));
    let removed = before - candidates.len();
    trace!(file = %placed.filename.display(), removed, "removed candidate with dependencies");
    removed
}
