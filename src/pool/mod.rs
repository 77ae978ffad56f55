//! The image pool: every photo eligible for a calendar.
//!
//! The pool maps absolute image paths to [`PoolEntry`] records (fingerprint,
//! geometry, capture time, XMP tags) and persists them in a JSON cache so
//! repeated scans only touch changed files. See [`cache`] for the file format.
//!
//! Scanning walks directories recursively for `.jpg`/`.jpeg` files and reads
//! metadata in parallel with rayon. Dimensions and capture time come from the
//! [`ImageBackend`]; tags come from the XMP sidecar (see [`xmp`]).
//!
//! The pool is the usual [`CandidateSource`] for photo placement.

pub mod cache;
pub mod xmp;

pub use cache::{EntryMeta, PoolEntry, ScanStats, fingerprint};
pub use xmp::TagSets;

use crate::assignment::{CandidateSource, GROUP_TAG, ImagePoolCandidate};
use crate::imaging::ImageBackend;
use cache::{CACHE_VERSION, CacheFile, write_cache};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot walk directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("pool cache {path} has version {found}, expected {expected}")]
    VersionMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("cannot read image {path}: {message}")]
    Image { path: PathBuf, message: String },
    #[error("not an image directory: {0}")]
    NotADirectory(PathBuf),
}

/// Photos known to the calendar, keyed by absolute path.
#[derive(Debug, Default, Clone)]
pub struct ImagePool {
    entries: BTreeMap<PathBuf, PoolEntry>,
}

enum ScanOutcome {
    Reused,
    Scanned(PathBuf, PoolEntry),
    Failed,
}

impl ImagePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool from already known entries, without touching the filesystem.
    pub fn from_entries(entries: impl IntoIterator<Item = (PathBuf, PoolEntry)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Load a cache file, failing on any problem.
    pub fn load(path: &Path) -> Result<Self, PoolError> {
        let content = std::fs::read_to_string(path)?;
        let cache: CacheFile = serde_json::from_str(&content)?;
        if cache.version != CACHE_VERSION {
            return Err(PoolError::VersionMismatch {
                path: path.to_path_buf(),
                found: cache.version,
                expected: CACHE_VERSION,
            });
        }
        debug!(path = %path.display(), images = cache.images.len(), "loaded pool cache");
        Ok(Self {
            entries: cache.images,
        })
    }

    /// Load a cache file; a missing, corrupt or outdated cache is empty.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(pool) => pool,
            Err(PoolError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no pool cache yet");
                Self::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding pool cache");
                Self::new()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), PoolError> {
        write_cache(path, &CacheFile::new(self.entries.clone()))?;
        debug!(path = %path.display(), images = self.entries.len(), "saved pool cache");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&PoolEntry> {
        self.entries.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &PoolEntry)> {
        self.entries.iter().map(|(p, e)| (p.as_path(), e))
    }

    /// Group name → member images.
    pub fn groups(&self) -> BTreeMap<String, Vec<PathBuf>> {
        let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for (path, entry) in &self.entries {
            for group in entry.groups() {
                groups
                    .entry(group.to_string())
                    .or_default()
                    .push(path.clone());
            }
        }
        groups
    }

    /// Recursively add every JPEG below `dir`.
    pub fn add_directory(
        &mut self,
        backend: &dyn ImageBackend,
        dir: &Path,
    ) -> Result<ScanStats, PoolError> {
        if !dir.is_dir() {
            return Err(PoolError::NotADirectory(dir.to_path_buf()));
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() && is_jpeg(entry.path()) {
                files.push(entry.into_path());
            }
        }
        info!(dir = %dir.display(), files = files.len(), "scanning image directory");
        Ok(self.scan_files(backend, &files))
    }

    /// Make sure the given files are in the pool, rescanning changed ones.
    pub fn scan_files<P: AsRef<Path> + Sync>(
        &mut self,
        backend: &dyn ImageBackend,
        paths: &[P],
    ) -> ScanStats {
        let outcomes: Vec<ScanOutcome> = paths
            .par_iter()
            .map(|path| self.scan_one(backend, path.as_ref()))
            .collect();

        let mut stats = ScanStats::default();
        for outcome in outcomes {
            match outcome {
                ScanOutcome::Reused => stats.reused += 1,
                ScanOutcome::Failed => stats.failed += 1,
                ScanOutcome::Scanned(path, entry) => {
                    stats.scanned += 1;
                    self.entries.insert(path, entry);
                }
            }
        }
        debug!(%stats, "scan finished");
        stats
    }

    fn scan_one(&self, backend: &dyn ImageBackend, path: &Path) -> ScanOutcome {
        let path = match std::path::absolute(path).and_then(|p| p.canonicalize()) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot resolve image path");
                return ScanOutcome::Failed;
            }
        };
        let sidecar = xmp::find_sidecar(&path);
        let fingerprint = fingerprint(&path, sidecar.as_deref());
        if self
            .entries
            .get(&path)
            .is_some_and(|e| e.fingerprint == fingerprint)
        {
            trace!(path = %path.display(), "unchanged");
            return ScanOutcome::Reused;
        }

        match read_entry(backend, &path, sidecar.as_deref(), fingerprint) {
            Ok(entry) => {
                trace!(path = %path.display(), ?entry, "scanned");
                ScanOutcome::Scanned(path, entry)
            }
            Err(e) => {
                warn!(error = %e, "skipping image");
                ScanOutcome::Failed
            }
        }
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
}

fn read_entry(
    backend: &dyn ImageBackend,
    path: &Path,
    sidecar: Option<&Path>,
    fingerprint: String,
) -> Result<PoolEntry, PoolError> {
    let image_error = |e: crate::imaging::BackendError| PoolError::Image {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let dims = backend.identify(path).map_err(image_error)?;
    let snaptime = backend.read_snaptime(path).map_err(image_error)?;

    let tags = match sidecar {
        Some(sidecar) => {
            let xml = std::fs::read_to_string(sidecar)?;
            xmp::parse_tags(&xml).unwrap_or_else(|e| {
                warn!(sidecar = %sidecar.display(), error = %e, "ignoring malformed XMP sidecar");
                TagSets::new()
            })
        }
        None => TagSets::new(),
    };

    Ok(PoolEntry {
        fingerprint,
        meta: EntryMeta {
            geometry: Some([dims.width, dims.height]),
            snaptime,
        },
        tags,
    })
}

impl CandidateSource for ImagePool {
    fn candidates(&self) -> Vec<ImagePoolCandidate> {
        self.entries
            .iter()
            .filter_map(|(path, entry)| {
                let Some([width, height]) = entry.meta.geometry else {
                    trace!(path = %path.display(), "no geometry, not a candidate");
                    return None;
                };
                Some(ImagePoolCandidate {
                    filename: path.clone(),
                    snaptime: entry.meta.snaptime,
                    width,
                    height,
                    tag_sets: entry.tags.clone(),
                })
            })
            .collect()
    }
}

impl std::fmt::Display for ImagePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let grouped = self
            .entries
            .values()
            .filter(|e| e.tags.contains_key(GROUP_TAG))
            .count();
        write!(f, "{} images ({} grouped)", self.entries.len(), grouped)
    }
}
