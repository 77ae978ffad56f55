//! # calgen
//!
//! A photo calendar generator. A calendar definition describes pages as stacks
//! of template layers with photo slots; calgen fills the slots from a tagged
//! photo library and renders every page into a raster file.
//!
//! # Architecture: Three Steps
//!
//! ```text
//! 1. scan-pool   photos/        →  .image_pool.json    (geometry, capture time, tags)
//! 2. layout      definition     →  layouts/<variant>.json  (slots → photos)
//! 3. render      layouts/*.json →  out/<name>/<name>_NNN.png
//! ```
//!
//! Each step writes human-readable JSON the next one consumes. Layout files in
//! particular are meant to be inspected and hand-edited: re-running `layout`
//! keeps the photos already placed unless told to reassign.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`jobs`] | Dependency-graph job scheduler with bounded concurrency |
//! | [`assignment`] | Slot-filling: matches pool photos to slots under tag and time constraints |
//! | [`pool`] | Image pool scanning, XMP tags, incremental cache |
//! | [`calendar`] | Calendar definitions and layout creation |
//! | [`layout`] | The layout file format |
//! | [`render`] | Per-page job graphs: crop, render, merge, finalize |
//! | [`imaging`] | Pure-Rust image operations: crop, compose, finalize, EXIF |
//! | [`config`] | `calgen.toml` loading, validation and merging |
//! | [`output`] | CLI output formatting |
//! | [`logging`] | Tracing setup for the binary |
//!
//! # Design Decisions
//!
//! ## Thread per Job
//!
//! Render jobs spend most of their time waiting on an external layer renderer,
//! so the scheduler runs every admitted job on its own OS thread and bounds
//! the number of running jobs rather than the number of threads in a pool.
//! Dependencies are explicit edges; a failed job fails its strict dependents
//! without running them, while unconditional dependents (cleanup) still run.
//!
//! ## Randomized Greedy Placement
//!
//! Slot filling is a randomized greedy search retried a bounded number of
//! times. It is simple, fast on libraries of tens of thousands of photos, and
//! a different seed gives a different calendar, which is the point.
//!
//! ## Pure-Rust Imaging
//!
//! Cropping, compositing and the final conversion use the `image` crate; only
//! template rendering is delegated to an external program.

pub mod assignment;
pub mod calendar;
pub mod config;
pub mod imaging;
pub mod jobs;
pub mod layout;
pub mod logging;
pub mod output;
pub mod pool;
pub mod render;

#[cfg(test)]
pub(crate) mod test_helpers;
