//! Layout → page files with the real imaging backend and a fake layer
//! renderer that paints solid rasters.

use calgen::imaging::RustBackend;
use calgen::jobs::JobServerError;
use calgen::layout::Layout;
use calgen::render::{
    LayerRenderer, LayerRequest, PageRange, RenderError, RenderOptions, RenderSettings,
    render_layouts,
};
use image::{GenericImageView, Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const PAGE_W: u32 = 60;
const PAGE_H: u32 = 40;

/// Paints each layer: the first template of a page opaque grey, later ones
/// transparent with a blue square. Records every request.
#[derive(Default)]
struct PaintingRenderer {
    requests: Mutex<Vec<LayerRequest>>,
    fail_template: Option<String>,
}

impl LayerRenderer for PaintingRenderer {
    fn render(&self, request: &LayerRequest) -> Result<(), RenderError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_template.as_deref() == Some(request.template.as_str()) {
            return Err(RenderError::ToolFailed {
                command: "paint".into(),
                status: Some(1),
                stderr: "template error".into(),
            });
        }
        for element in request.elements.values() {
            if let Some(crop) = &element.image {
                assert!(crop.is_file(), "crop must exist before its layer renders");
            }
        }
        let base = request.output.file_name().and_then(|n| n.to_str()) == Some("layer_001.png");
        let img = RgbaImage::from_fn(PAGE_W, PAGE_H, |x, y| {
            if base {
                Rgba([128, 128, 128, 255])
            } else if x < 10 && y < 10 {
                Rgba([0, 0, 255, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        });
        img.save(&request.output)
            .map_err(|e| RenderError::Io(std::io::Error::other(e)))?;
        Ok(())
    }
}

fn write_layout(dir: &Path, name: &str) -> PathBuf {
    let photo = dir.join(format!("{name}.jpg"));
    image::RgbImage::from_pixel(90, 60, image::Rgb([200, 40, 40]))
        .save(&photo)
        .unwrap();
    let json = format!(
        r#"{{
            "meta": {{ "name": "{name}", "format": "a4" }},
            "pages": [
                [ {{ "template": "cover" }} ],
                [
                    {{ "template": "photo", "transform": {{
                        "main": {{ "image": "jan", "aspect_ratio": 1.0 }} }} }},
                    {{ "template": "month", "vars": {{ "month": 1 }} }},
                    {{ "template": "mask", "compose": "invert" }}
                ],
                [ {{ "template": "back" }}, {{ "template": "imprint" }} ]
            ],
            "images": {{ "jan": {{ "filename": "{}", "dimensions": [90, 60] }} }}
        }}"#,
        photo.display()
    );
    let path = dir.join(format!("{name}.json"));
    std::fs::write(&path, json).unwrap();
    Layout::load(&path).unwrap();
    path
}

fn options(out: &Path) -> RenderOptions {
    RenderOptions {
        output_dir: out.to_path_buf(),
        force: false,
        remove: false,
        pages: Vec::new(),
        format: "png".into(),
        settings: RenderSettings {
            resolution_dpi: 72,
            flatten: true,
            template_dir: PathBuf::from("templates"),
        },
        jobs: Some(4),
        raise_on_failure: true,
        job_graph: None,
    }
}

fn render(
    layouts: &[PathBuf],
    options: &RenderOptions,
    renderer: Arc<PaintingRenderer>,
) -> Result<calgen::render::RenderSummary, RenderError> {
    render_layouts(layouts, options, Arc::new(RustBackend::new()), renderer)
}

// =============================================================================
// Happy path
// =============================================================================

#[test]
fn renders_every_page_of_every_layout() {
    let tmp = TempDir::new().unwrap();
    let layouts = vec![write_layout(tmp.path(), "fam"), write_layout(tmp.path(), "kids")];
    let out = tmp.path().join("out");
    let renderer = Arc::new(PaintingRenderer::default());

    let summary = render(&layouts, &options(&out), renderer.clone()).unwrap();

    assert_eq!(summary.rendered_layouts, vec!["fam", "kids"]);
    assert_eq!(summary.outputs.len(), 6);
    // Pages 1-3 have 1, 6 (crop, 3 layers, 2 merges) and 3 work jobs, plus
    // a final and a cleanup job each.
    assert_eq!(summary.stats.successful, 2 * (1 + 6 + 3 + 3 * 2));
    assert!(summary.stats.all_succeeded());

    for name in ["fam", "kids"] {
        for page in 1..=3 {
            let file = out.join(name).join(format!("{name}_{page:03}.png"));
            let img = image::open(&file).unwrap();
            assert_eq!(img.dimensions(), (PAGE_W, PAGE_H));
        }
    }

    let requests = renderer.requests.lock().unwrap();
    assert_eq!(requests.len(), 12);
    let photo = requests.iter().find(|r| r.template == "a4_photo").unwrap();
    assert_eq!(photo.resolution_dpi, 72);
    assert_eq!(photo.vars["page_no"], 2);
    assert_eq!(photo.vars["total_pages"], 3);
    let month = requests.iter().find(|r| r.template == "a4_month").unwrap();
    assert_eq!(month.vars["month"], 1);
}

#[test]
fn merged_layers_show_through_in_the_final_page() {
    let tmp = TempDir::new().unwrap();
    let layouts = vec![write_layout(tmp.path(), "fam")];
    let out = tmp.path().join("out");
    let mut opts = options(&out);
    opts.pages = vec!["3".parse::<PageRange>().unwrap()];

    render(&layouts, &opts, Arc::new(PaintingRenderer::default())).unwrap();

    // Page 3: grey base with the blue square alpha-composed on top.
    let page = image::open(out.join("fam/fam_003.png")).unwrap().to_rgba8();
    assert_eq!(page.get_pixel(2, 2).0, [0, 0, 255, 255]);
    assert_eq!(page.get_pixel(30, 30).0, [128, 128, 128, 255]);
}

#[test]
fn page_selection_and_jpg_output() {
    let tmp = TempDir::new().unwrap();
    let layouts = vec![write_layout(tmp.path(), "fam")];
    let out = tmp.path().join("out");
    let mut opts = options(&out);
    opts.format = "jpg".into();
    opts.pages = vec!["2-9".parse().unwrap()];

    let summary = render(&layouts, &opts, Arc::new(PaintingRenderer::default())).unwrap();

    assert_eq!(
        summary.outputs,
        vec![out.join("fam/fam_002.jpg"), out.join("fam/fam_003.jpg")]
    );
    assert!(!out.join("fam/fam_001.jpg").exists());
    assert!(image::open(out.join("fam/fam_002.jpg")).is_ok());
}

#[test]
fn job_graph_is_written() {
    let tmp = TempDir::new().unwrap();
    let layouts = vec![write_layout(tmp.path(), "fam")];
    let mut opts = options(&tmp.path().join("out"));
    opts.job_graph = Some(tmp.path().join("jobs.dot"));
    opts.pages = vec!["1".parse().unwrap()];

    render(&layouts, &opts, Arc::new(PaintingRenderer::default())).unwrap();

    let dot = std::fs::read_to_string(tmp.path().join("jobs.dot")).unwrap();
    assert!(dot.starts_with("digraph jobs {"));
    assert!(dot.contains("fam:001 final"));
    assert!(dot.contains("[style=dashed]"));
}

// =============================================================================
// Existing output
// =============================================================================

#[test]
fn existing_output_is_skipped_without_force() {
    let tmp = TempDir::new().unwrap();
    let layouts = vec![write_layout(tmp.path(), "fam")];
    let out = tmp.path().join("out");
    std::fs::create_dir_all(out.join("fam")).unwrap();
    std::fs::write(out.join("fam/keep.txt"), "mine").unwrap();

    let summary = render(&layouts, &options(&out), Arc::new(PaintingRenderer::default())).unwrap();
    assert!(summary.rendered_layouts.is_empty());
    assert_eq!(summary.skipped_layouts, layouts);
    assert_eq!(summary.stats.total(), 0);

    let mut opts = options(&out);
    opts.force = true;
    opts.pages = vec!["1".parse().unwrap()];
    render(&layouts, &opts, Arc::new(PaintingRenderer::default())).unwrap();
    assert!(out.join("fam/keep.txt").exists());
    assert!(out.join("fam/fam_001.png").exists());

    let mut opts = options(&out);
    opts.remove = true;
    opts.pages = vec!["2".parse().unwrap()];
    render(&layouts, &opts, Arc::new(PaintingRenderer::default())).unwrap();
    assert!(!out.join("fam/keep.txt").exists());
    assert!(!out.join("fam/fam_001.png").exists());
    assert!(out.join("fam/fam_002.png").exists());
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn failing_layer_fails_only_its_page() {
    let tmp = TempDir::new().unwrap();
    let layouts = vec![write_layout(tmp.path(), "fam")];
    let out = tmp.path().join("out");
    let renderer = Arc::new(PaintingRenderer {
        fail_template: Some("a4_month".into()),
        ..PaintingRenderer::default()
    });

    let err = render(&layouts, &options(&out), renderer).unwrap_err();
    match err {
        RenderError::Jobs(JobServerError::ExecutionFailed {
            failed,
            skipped,
            failures,
            ..
        }) => {
            assert_eq!(failed, 1);
            // Both merges and the final job of page 2.
            assert_eq!(skipped, 3);
            assert_eq!(failures[0].label.as_deref(), Some("fam:002 layer 2"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(out.join("fam/fam_001.png").exists());
    assert!(!out.join("fam/fam_002.png").exists());
    assert!(out.join("fam/fam_003.png").exists());
}

#[test]
fn failures_are_counted_without_raising() {
    let tmp = TempDir::new().unwrap();
    let layouts = vec![write_layout(tmp.path(), "fam")];
    let mut opts = options(&tmp.path().join("out"));
    opts.raise_on_failure = false;
    let renderer = Arc::new(PaintingRenderer {
        fail_template: Some("a4_cover".into()),
        ..PaintingRenderer::default()
    });

    let summary = render(&layouts, &opts, renderer).unwrap();
    assert_eq!(summary.stats.failed, 1);
    assert_eq!(summary.stats.skipped, 1);
    assert!(!summary.stats.all_succeeded());
}

#[test]
fn missing_photo_fails_its_crop() {
    let tmp = TempDir::new().unwrap();
    let path = write_layout(tmp.path(), "fam");
    std::fs::remove_file(tmp.path().join("fam.jpg")).unwrap();
    let mut opts = options(&tmp.path().join("out"));
    opts.pages = vec!["2".parse().unwrap()];

    let err = render(&[path], &opts, Arc::new(PaintingRenderer::default())).unwrap_err();
    assert!(matches!(
        err,
        RenderError::Jobs(JobServerError::ExecutionFailed { failed: 1, .. })
    ));
}

#[test]
fn invalid_layout_is_rejected_before_scheduling() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bad.json");
    std::fs::write(&path, r#"{"meta": {"name": "bad"}, "pages": []}"#).unwrap();

    let err = render(
        &[path],
        &options(&tmp.path().join("out")),
        Arc::new(PaintingRenderer::default()),
    )
    .unwrap_err();
    assert!(matches!(err, RenderError::Layout(_)));
}
