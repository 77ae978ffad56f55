//! Page rendering: from a [`Layout`] to one raster file per page.
//!
//! Every page becomes a small job graph that runs on the shared
//! [`JobServer`]:
//!
//! ```text
//! crop(jan) ──▶ layer 1 ──┐
//!               layer 2 ──┴──▶ merge 1 ──┐
//!               layer 3 ─────────────────┴──▶ merge 2 ──▶ final ┄┄▶ cleanup
//! ```
//!
//! - **crop**: cut the placed photo to the element's aspect ratio around its
//!   gravity (in-process, [`ImageBackend`]).
//! - **layer**: render one template into a raster. Delegated to a
//!   [`LayerRenderer`], normally an external command.
//! - **merge**: compose layer *n+1* onto the merged result of layers 1..=n;
//!   the result replaces layer *n+1*'s file.
//! - **final**: convert the last layer file into the output format,
//!   optionally flattened onto white.
//! - **cleanup**: remove the page's scratch directory. It runs even when the
//!   page failed.
//!
//! Output files are named `<output_dir>/<name>/<name>_<page:03>.<format>`.

use crate::imaging::{
    BackendError, ComposeParams, CropConfig, FinalizeParams, ImageBackend, crop_image,
};
use crate::jobs::{Job, JobServer, JobServerError, JobServerOptions, JobStats};
use crate::layout::{ElementTransform, Layout, LayoutError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Jobs(#[from] JobServerError),
    #[error("invalid page selection '{0}' (expected N or N-M)")]
    InvalidPageRange(String),
    #[error("page {page} does not exist (layout has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },
    #[error("slot '{0}' has no image placed")]
    MissingImage(String),
    #[error("no layer renderer command configured")]
    NoRendererCommand,
    #[error("layer renderer '{command}' failed with status {status:?}: {stderr}")]
    ToolFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("layer renderer produced no output at {0}")]
    NoOutput(PathBuf),
}

// ============================================================================
// Page selection
// ============================================================================

/// An inclusive, 1-based range of page numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub first: usize,
    pub last: usize,
}

impl PageRange {
    pub fn contains(&self, page: usize) -> bool {
        (self.first..=self.last).contains(&page)
    }
}

impl FromStr for PageRange {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RenderError::InvalidPageRange(s.to_string());
        let number = |t: &str| t.trim().parse::<usize>().ok().filter(|&n| n > 0);
        let (first, last) = match s.split_once('-') {
            Some((a, b)) => (number(a).ok_or_else(invalid)?, number(b).ok_or_else(invalid)?),
            None => {
                let n = number(s).ok_or_else(invalid)?;
                (n, n)
            }
        };
        if first > last {
            return Err(invalid());
        }
        Ok(Self { first, last })
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.last)
        }
    }
}

/// Pages of a `total`-page layout selected by `ranges`; empty selects all.
pub fn select_pages(ranges: &[PageRange], total: usize) -> Vec<usize> {
    if ranges.is_empty() {
        return (1..=total).collect();
    }
    for range in ranges {
        if range.last > total {
            warn!(range = %range, total, "page selection exceeds layout");
        }
    }
    (1..=total)
        .filter(|page| ranges.iter().any(|r| r.contains(*page)))
        .collect()
}

/// `<dir>/<name>_<page:03>.<format>`
pub fn page_output_path(dir: &Path, name: &str, page: usize, format: &str) -> PathBuf {
    dir.join(format!("{name}_{page:03}.{format}"))
}

// ============================================================================
// Layer rendering
// ============================================================================

/// One template element as the layer renderer sees it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RenderElement {
    /// Cropped photo for this element, if it shows one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,
    #[serde(flatten)]
    pub instructions: Map<String, Value>,
}

/// Everything needed to render one layer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LayerRequest {
    /// `<format>_<template>`
    pub template: String,
    pub template_dir: PathBuf,
    pub output: PathBuf,
    pub resolution_dpi: u32,
    /// `page_no`, `total_pages` and the layer's own vars.
    pub vars: Map<String, Value>,
    pub elements: BTreeMap<String, RenderElement>,
}

/// Renders a template into a raster file at `request.output`.
pub trait LayerRenderer: Send + Sync {
    fn render(&self, request: &LayerRequest) -> Result<(), RenderError>;
}

/// Runs an external program with the path of a JSON request file as its
/// last argument.
#[derive(Debug, Clone)]
pub struct CommandLayerRenderer {
    command: Vec<String>,
}

impl CommandLayerRenderer {
    pub fn new(command: Vec<String>) -> Result<Self, RenderError> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(RenderError::NoRendererCommand);
        }
        Ok(Self { command })
    }
}

impl LayerRenderer for CommandLayerRenderer {
    fn render(&self, request: &LayerRequest) -> Result<(), RenderError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(RenderError::NoRendererCommand);
        };
        let request_file = request.output.with_extension("json");
        std::fs::write(&request_file, serde_json::to_string_pretty(request)?)?;

        debug!(command = ?self.command, request = %request_file.display(), "running layer renderer");
        let output = Command::new(program)
            .args(args)
            .arg(&request_file)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            return Err(RenderError::ToolFailed {
                command: program.clone(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if !request.output.is_file() {
            return Err(RenderError::NoOutput(request.output.clone()));
        }
        Ok(())
    }
}

// ============================================================================
// Page job graphs
// ============================================================================

/// Output settings shared by every page.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub resolution_dpi: u32,
    pub flatten: bool,
    pub template_dir: PathBuf,
}

/// What page jobs need at run time.
pub struct RenderContext {
    pub backend: Arc<dyn ImageBackend>,
    pub renderer: Arc<dyn LayerRenderer>,
    pub settings: RenderSettings,
}

/// The jobs making up one page.
pub struct PageJobs {
    pub crops: Vec<Job>,
    pub layers: Vec<Job>,
    pub merges: Vec<Job>,
    pub finalize: Job,
    pub cleanup: Job,
}

impl PageJobs {
    pub fn all(&self) -> impl Iterator<Item = &Job> {
        self.crops
            .iter()
            .chain(&self.layers)
            .chain(&self.merges)
            .chain([&self.finalize, &self.cleanup])
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Build (but do not submit) the job graph for page `page_no` (1-based).
pub fn page_jobs(
    ctx: &Arc<RenderContext>,
    layout: &Layout,
    page_no: usize,
    output: PathBuf,
) -> Result<PageJobs, RenderError> {
    let total = layout.page_count();
    let layers = page_no
        .checked_sub(1)
        .and_then(|i| layout.pages.get(i))
        .ok_or(RenderError::PageOutOfRange {
            page: page_no,
            total,
        })?;
    if layers.is_empty() {
        return Err(LayoutError::EmptyPage(page_no).into());
    }

    let scratch = tempfile::Builder::new()
        .prefix(&format!("calgen_{}_{page_no:03}_", file_safe(&layout.meta.name)))
        .tempdir()?;
    let dir = scratch.path().to_path_buf();
    let layer_file = |n: usize| dir.join(format!("layer_{n:03}.png"));
    let tag = format!("{}:{page_no:03}", layout.meta.name);

    let mut crops = Vec::new();
    let mut renders: Vec<Job> = Vec::with_capacity(layers.len());
    for (index, layer) in layers.iter().enumerate() {
        let layer_no = index + 1;
        let mut layer_crops = Vec::new();
        let mut elements = BTreeMap::new();
        for (element, transform) in &layer.transform {
            let mut rendered = RenderElement {
                image: None,
                instructions: transform.extra.clone(),
            };
            if let Some(slot) = &transform.image {
                let crop_file = dir.join(format!("crop_{layer_no:03}_{}.png", file_safe(element)));
                layer_crops.push(crop_job(ctx, &tag, layout, slot, transform, crop_file.clone()));
                rendered.image = Some(crop_file);
            }
            elements.insert(element.clone(), rendered);
        }

        let mut vars = Map::new();
        vars.insert("page_no".into(), page_no.into());
        vars.insert("total_pages".into(), total.into());
        vars.extend(layer.vars.clone());
        let request = LayerRequest {
            template: format!("{}_{}", layout.meta.format, layer.template),
            template_dir: ctx.settings.template_dir.clone(),
            output: layer_file(layer_no),
            resolution_dpi: ctx.settings.resolution_dpi,
            vars,
            elements,
        };
        let renderer = Arc::clone(&ctx.renderer);
        let job = Job::named(format!("{tag} layer {layer_no}"), move || {
            renderer.render(&request)?;
            Ok(())
        });
        job.depends_on(&layer_crops);
        crops.extend(layer_crops);
        renders.push(job);
    }

    let mut merges = Vec::new();
    let mut last = renders[0].clone();
    for (index, upper) in renders.iter().enumerate().skip(1) {
        let params = ComposeParams {
            lower: layer_file(index),
            upper: layer_file(index + 1),
            output: layer_file(index + 1),
            method: layers[index].compose,
        };
        let backend = Arc::clone(&ctx.backend);
        let job = Job::named(format!("{tag} merge {index}"), move || {
            backend.compose(&params)?;
            Ok(())
        });
        job.depends_on([&last, upper]);
        merges.push(job.clone());
        last = job;
    }

    let params = FinalizeParams {
        source: layer_file(layers.len()),
        output,
        flatten: ctx.settings.flatten,
    };
    let backend = Arc::clone(&ctx.backend);
    let finalize = Job::named(format!("{tag} final"), move || {
        if let Some(parent) = params.output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        backend.finalize(&params)?;
        info!(output = %params.output.display(), "page written");
        Ok(())
    });
    finalize.depends_on([&last]);

    let cleanup = Job::named(format!("{tag} cleanup"), move || {
        scratch.close()?;
        Ok(())
    });
    finalize.finally_do([&cleanup]);

    Ok(PageJobs {
        crops,
        layers: renders,
        merges,
        finalize,
        cleanup,
    })
}

fn crop_job(
    ctx: &Arc<RenderContext>,
    tag: &str,
    layout: &Layout,
    slot: &str,
    transform: &ElementTransform,
    output: PathBuf,
) -> Job {
    let image = layout.image(slot).cloned();
    let slot = slot.to_string();
    let aspect_ratio = transform.aspect_ratio.map(|r| r.value());
    let gravity = transform.gravity;
    let max_edge = transform.max_edge;
    let backend = Arc::clone(&ctx.backend);

    Job::named(format!("{tag} crop {slot}"), move || {
        let image = image.ok_or(RenderError::MissingImage(slot))?;
        let [width, height] = image.dimensions;
        let config = CropConfig {
            aspect_ratio: aspect_ratio.unwrap_or(width as f64 / height.max(1) as f64),
            gravity,
            max_edge,
        };
        let params = crop_image(backend.as_ref(), &image.filename, &output, &config)?;
        debug!(source = %image.filename.display(), width = params.width, height = params.height, "cropped");
        Ok(())
    })
}

// ============================================================================
// The render command
// ============================================================================

/// Options of the `render` command.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub output_dir: PathBuf,
    /// Render into an existing output directory.
    pub force: bool,
    /// Delete an existing output directory first.
    pub remove: bool,
    /// Empty renders every page.
    pub pages: Vec<PageRange>,
    pub format: String,
    pub settings: RenderSettings,
    pub jobs: Option<usize>,
    pub raise_on_failure: bool,
    pub job_graph: Option<PathBuf>,
}

/// What a render run produced.
#[derive(Debug, Clone, Default)]
pub struct RenderSummary {
    pub rendered_layouts: Vec<String>,
    pub skipped_layouts: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub stats: JobStats,
}

/// Render every selected page of every layout on one job server.
pub fn render_layouts(
    layouts: &[PathBuf],
    options: &RenderOptions,
    backend: Arc<dyn ImageBackend>,
    renderer: Arc<dyn LayerRenderer>,
) -> Result<RenderSummary, RenderError> {
    let ctx = Arc::new(RenderContext {
        backend,
        renderer,
        settings: options.settings.clone(),
    });
    let server = JobServer::new(JobServerOptions {
        concurrency: options.jobs,
        raise_on_failure: options.raise_on_failure,
        graph_file: options.job_graph.clone(),
    })?;
    info!(jobs = server.concurrency(), "rendering {} layout(s)", layouts.len());

    let mut summary = RenderSummary::default();
    for path in layouts {
        let layout = Layout::load(path)?;
        let dir = options.output_dir.join(&layout.meta.name);
        if dir.exists() {
            if options.remove {
                info!(dir = %dir.display(), "removing previous output");
                std::fs::remove_dir_all(&dir)?;
            } else if !options.force {
                warn!(dir = %dir.display(), "refusing to overwrite existing output (use --force)");
                summary.skipped_layouts.push(path.clone());
                continue;
            }
        }
        std::fs::create_dir_all(&dir)?;

        let pages = select_pages(&options.pages, layout.page_count());
        info!(layout = %layout.meta.name, pages = pages.len(), "scheduling pages");
        for page_no in pages {
            let output = page_output_path(&dir, &layout.meta.name, page_no, &options.format);
            let jobs = page_jobs(&ctx, &layout, page_no, output.clone())?;
            server.add_jobs(jobs.all());
            summary.outputs.push(output);
        }
        summary.rendered_layouts.push(layout.meta.name.clone());
    }

    summary.stats = server.await_completion()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::CompositionMethod;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::jobs::{JobError, JobState};
    use crate::layout::ImageRef;
    use std::sync::Mutex;

    /// Records requests instead of rendering.
    #[derive(Default)]
    struct RecordingRenderer {
        requests: Mutex<Vec<LayerRequest>>,
    }

    impl LayerRenderer for RecordingRenderer {
        fn render(&self, request: &LayerRequest) -> Result<(), RenderError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    fn layout() -> Layout {
        serde_json::from_str(
            r#"{
                "meta": { "name": "fam", "format": "a4" },
                "pages": [
                    [ { "template": "cover" } ],
                    [
                        { "template": "photo", "transform": {
                            "main": { "image": "jan", "aspect_ratio": 1.0, "gravity": "south", "frame": "thin" },
                            "title": { "text": "January" } } },
                        { "template": "grid", "compose": "invert", "vars": { "month": 1, "page_no": 99 } },
                        { "template": "labels" }
                    ]
                ],
                "images": { "jan": { "filename": "/photos/jan.jpg", "dimensions": [400, 300] } }
            }"#,
        )
        .unwrap()
    }

    fn context(backend: Arc<MockBackend>, renderer: Arc<RecordingRenderer>) -> Arc<RenderContext> {
        Arc::new(RenderContext {
            backend,
            renderer,
            settings: RenderSettings {
                resolution_dpi: 150,
                flatten: true,
                template_dir: PathBuf::from("templates"),
            },
        })
    }

    fn run(jobs: &PageJobs) -> Result<JobStats, JobServerError> {
        let server = JobServer::new(JobServerOptions {
            concurrency: Some(2),
            ..JobServerOptions::default()
        })
        .unwrap();
        server.add_jobs(jobs.all());
        server.await_completion()
    }

    // =========================================================================
    // Page selection
    // =========================================================================

    #[test]
    fn page_range_parsing() {
        assert_eq!("3".parse::<PageRange>().unwrap(), PageRange { first: 3, last: 3 });
        assert_eq!("2-5".parse::<PageRange>().unwrap(), PageRange { first: 2, last: 5 });
        assert!("0".parse::<PageRange>().is_err());
        assert!("5-2".parse::<PageRange>().is_err());
        assert!("x".parse::<PageRange>().is_err());
        assert_eq!(PageRange { first: 2, last: 5 }.to_string(), "2-5");
    }

    #[test]
    fn select_pages_unions_ranges() {
        assert_eq!(select_pages(&[], 3), vec![1, 2, 3]);
        let ranges = ["2".parse().unwrap(), "4-9".parse().unwrap()];
        assert_eq!(select_pages(&ranges, 5), vec![2, 4, 5]);
    }

    #[test]
    fn output_path_format() {
        assert_eq!(
            page_output_path(Path::new("out/fam"), "fam", 7, "png"),
            PathBuf::from("out/fam/fam_007.png")
        );
    }

    // =========================================================================
    // Page graphs
    // =========================================================================

    #[test]
    fn page_graph_shape() {
        let backend = Arc::new(MockBackend::with_dimensions(vec![crate::imaging::Dimensions {
            width: 400,
            height: 300,
        }]));
        let renderer = Arc::new(RecordingRenderer::default());
        let ctx = context(backend.clone(), renderer.clone());
        let jobs = page_jobs(&ctx, &layout(), 2, PathBuf::from("/out/fam_002.png")).unwrap();

        assert_eq!(jobs.crops.len(), 1);
        assert_eq!(jobs.layers.len(), 3);
        assert_eq!(jobs.merges.len(), 2);

        run(&jobs).unwrap();
        assert!(jobs.all().all(|j| j.state() == JobState::Finished));

        let requests = renderer.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        let photo = requests.iter().find(|r| r.template == "a4_photo").unwrap();
        assert_eq!(photo.resolution_dpi, 150);
        assert_eq!(photo.vars["total_pages"], 2);
        assert!(photo.elements["main"].image.is_some());
        assert_eq!(photo.elements["main"].instructions["frame"], "thin");
        assert_eq!(photo.elements["title"].image, None);
        let grid = requests.iter().find(|r| r.template == "a4_grid").unwrap();
        assert_eq!(grid.vars["page_no"], 99);
        assert_eq!(grid.vars["month"], 1);

        let ops = backend.get_operations();
        let crop = ops
            .iter()
            .find_map(|op| match op {
                RecordedOp::Crop { width, height, gravity, .. } => Some((*width, *height, *gravity)),
                _ => None,
            })
            .unwrap();
        assert_eq!(crop, (300, 300, crate::imaging::Gravity::South));

        let composes: Vec<_> = ops
            .iter()
            .filter_map(|op| match op {
                RecordedOp::Compose { lower, upper, output, method } => {
                    Some((lower.clone(), upper.clone(), output.clone(), *method))
                }
                _ => None,
            })
            .collect();
        assert_eq!(composes.len(), 2);
        assert!(composes[0].0.ends_with("layer_001.png"));
        assert!(composes[0].1.ends_with("layer_002.png"));
        assert_eq!(composes[0].1, composes[0].2);
        assert_eq!(composes[0].3, CompositionMethod::InvertedCompose);
        assert!(composes[1].0.ends_with("layer_002.png"));
        assert_eq!(composes[1].3, CompositionMethod::AlphaCompose);

        assert!(matches!(
            ops.last().unwrap(),
            RecordedOp::Finalize { output, flatten: true, source } if output == "/out/fam_002.png" && source.ends_with("layer_003.png")
        ));
    }

    #[test]
    fn single_layer_page_has_no_merges() {
        let ctx = context(
            Arc::new(MockBackend::new()),
            Arc::new(RecordingRenderer::default()),
        );
        let jobs = page_jobs(&ctx, &layout(), 1, PathBuf::from("/out/fam_001.png")).unwrap();
        assert!(jobs.crops.is_empty());
        assert!(jobs.merges.is_empty());
        run(&jobs).unwrap();
        assert_eq!(jobs.finalize.state(), JobState::Finished);
    }

    #[test]
    fn scratch_dir_removed_after_failure() {
        let mut layout = layout();
        layout.images.insert("jan".into(), None::<ImageRef>);
        let ctx = context(
            Arc::new(MockBackend::new()),
            Arc::new(RecordingRenderer::default()),
        );
        let jobs = page_jobs(&ctx, &layout, 2, PathBuf::from("/out/fam_002.png")).unwrap();

        let result = run(&jobs);
        assert!(matches!(
            result,
            Err(JobServerError::ExecutionFailed { failed: 1, .. })
        ));
        assert!(matches!(jobs.crops[0].error(), Some(JobError::Callback { .. })));
        assert_eq!(jobs.layers[0].state(), JobState::Failed);
        assert_eq!(jobs.layers[1].state(), JobState::Finished);
        assert_eq!(jobs.finalize.state(), JobState::Failed);
        assert_eq!(jobs.cleanup.state(), JobState::Finished);
    }

    #[test]
    fn page_out_of_range() {
        let ctx = context(
            Arc::new(MockBackend::new()),
            Arc::new(RecordingRenderer::default()),
        );
        assert!(matches!(
            page_jobs(&ctx, &layout(), 3, PathBuf::from("/x.png")),
            Err(RenderError::PageOutOfRange { page: 3, total: 2 })
        ));
        assert!(page_jobs(&ctx, &layout(), 0, PathBuf::from("/x.png")).is_err());
    }

    // =========================================================================
    // External renderer
    // =========================================================================

    fn request(dir: &Path) -> LayerRequest {
        LayerRequest {
            template: "a4_cover".into(),
            template_dir: dir.to_path_buf(),
            output: dir.join("layer_001.png"),
            resolution_dpi: 72,
            vars: Map::new(),
            elements: BTreeMap::new(),
        }
    }

    #[test]
    fn command_renderer_requires_a_program() {
        assert!(matches!(
            CommandLayerRenderer::new(Vec::new()),
            Err(RenderError::NoRendererCommand)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn command_renderer_reports_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let renderer = CommandLayerRenderer::new(vec![
            "sh".into(),
            "-c".into(),
            "echo boom >&2; exit 3".into(),
            "render".into(),
        ])
        .unwrap();
        let err = renderer.render(&request(tmp.path())).unwrap_err();
        assert!(matches!(
            err,
            RenderError::ToolFailed { status: Some(3), ref stderr, .. } if stderr == "boom"
        ));
        assert!(tmp.path().join("layer_001.json").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn command_renderer_checks_output_exists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let renderer = CommandLayerRenderer::new(vec!["true".into()]).unwrap();
        assert!(matches!(
            renderer.render(&request(tmp.path())),
            Err(RenderError::NoOutput(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn command_renderer_receives_request_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        // Copy the request file to the expected output path.
        let renderer = CommandLayerRenderer::new(vec![
            "sh".into(),
            "-c".into(),
            "cp \"$1\" \"${1%.json}.png\"".into(),
            "render".into(),
        ])
        .unwrap();
        let req = request(tmp.path());
        renderer.render(&req).unwrap();
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&req.output).unwrap()).unwrap();
        assert_eq!(written["template"], "a4_cover");
        assert_eq!(written["resolution_dpi"], 72);
    }
}
