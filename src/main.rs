use calgen::calendar::{CalendarDefinition, CreateLayoutOptions, LayoutOptions, create_layouts};
use calgen::config::{self, CalgenConfig};
use calgen::imaging::RustBackend;
use calgen::jobs::JobServerError;
use calgen::pool::{ImagePool, ScanStats};
use calgen::render::{
    CommandLayerRenderer, PageRange, RenderError, RenderOptions, RenderSettings, render_layouts,
};
use calgen::{logging, output};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once, at startup.
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "calgen")]
#[command(about = "Photo calendar generator")]
#[command(long_about = "\
Photo calendar generator

A calendar definition lists pages as stacks of template layers with photo
slots. calgen fills the slots from a tagged photo library and renders every
page into a raster file.

Workflow:

  calgen scan-pool ~/Photos/2021            # index photos (incremental)
  calgen layout family.json                 # place photos → layouts/<variant>.json
  calgen render layouts/*.json              # render pages → out/<name>/<name>_NNN.png

Photo tags come from XMP sidecars (dc:subject entries like 'grp=beach2021',
'only=grandma', 'forced=yes'). Photos sharing a grp value, or taken within
the exclusion window of each other, never appear on the same calendar.

Run 'calgen gen-config' to generate a documented calgen.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (default: ./calgen.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan photo directories into the image pool cache
    ScanPool {
        /// Directories to scan recursively
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
        /// Pool cache file (default: [pool] cache_file)
        #[arg(long)]
        cache: Option<PathBuf>,
    },
    /// Place photos into slots and write one layout per variant
    Layout {
        /// Calendar definition file
        definition: PathBuf,
        /// Directory for the layout files
        #[arg(long, default_value = "layouts")]
        output_dir: PathBuf,
        /// Variant to generate (repeatable; default: all)
        #[arg(long = "variant")]
        variants: Vec<String>,
        /// Overwrite existing layout files
        #[arg(long)]
        force: bool,
        /// Ignore the photos placed by an existing layout
        #[arg(long)]
        reassign: bool,
        /// Seed for reproducible placement
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Render layouts into page images
    Render {
        /// Layout files
        #[arg(required = true)]
        layouts: Vec<PathBuf>,
        #[arg(long, default_value = "out")]
        output_dir: PathBuf,
        /// Render into an existing output directory
        #[arg(long)]
        force: bool,
        /// Delete an existing output directory first
        #[arg(long)]
        remove: bool,
        /// Page or page range to render, e.g. 3 or 2-5 (repeatable)
        #[arg(long = "page")]
        pages: Vec<PageRange>,
        /// Output format (default: [render] output_format)
        #[arg(long, value_parser = ["png", "jpg"])]
        format: Option<String>,
        /// Layer resolution (default: [render] resolution_dpi)
        #[arg(long)]
        dpi: Option<u32>,
        /// Keep transparency in the finished pages
        #[arg(long)]
        no_flatten: bool,
        /// Write the job graph as Graphviz to this file
        #[arg(long)]
        job_graph: Option<PathBuf>,
        /// Maximum concurrent jobs (default: [jobs] max_jobs)
        #[arg(long)]
        jobs: Option<usize>,
    },
    /// Print a stock calgen.toml with all options documented
    GenConfig,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let load_config = || config::load_config(cli.config.as_deref());

    match cli.command {
        Command::ScanPool { dirs, cache } => {
            let config = load_config()?;
            let cache = cache.unwrap_or_else(|| config.pool.cache_file.clone());
            let mut pool = ImagePool::load_or_default(&cache);
            let mut stats = ScanStats::default();
            let backend = RustBackend::new();
            for dir in &dirs {
                stats += pool.add_directory(&backend, dir)?;
            }
            pool.save(&cache)?;
            output::print_scan_output(&pool, &stats, cli.verbose > 0);
        }
        Command::Layout {
            definition,
            output_dir,
            variants,
            force,
            reassign,
            seed,
        } => {
            let config = load_config()?;
            let definition = CalendarDefinition::load(&definition)?;
            let cache = definition.pool_cache_file(&config.pool.cache_file);
            let backend = RustBackend::new();
            let mut pool = ImagePool::load_or_default(&cache);
            let mut stats = ScanStats::default();
            for dir in definition.pool_directories() {
                stats += pool.add_directory(&backend, &dir)?;
            }
            info!(pool = %pool, scan = %stats, "image pool ready");

            let options = CreateLayoutOptions {
                output_dir,
                variants,
                force,
                reassign,
                layout: LayoutOptions {
                    exclusion_window_secs: definition
                        .pool
                        .exclusion_window_secs
                        .unwrap_or(config.pool.exclusion_window_secs),
                    placement_attempts: config.pool.placement_attempts,
                    seed,
                },
            };
            let outcomes = create_layouts(&definition, &mut pool, &backend, &options)?;
            pool.save(&cache)?;
            output::print_layout_output(&outcomes);
        }
        Command::Render {
            layouts,
            output_dir,
            force,
            remove,
            pages,
            format,
            dpi,
            no_flatten,
            job_graph,
            jobs,
        } => {
            let config = load_config()?;
            let options = render_options(
                &config,
                output_dir,
                force,
                remove,
                pages,
                format,
                dpi,
                no_flatten,
                job_graph,
                jobs,
            );
            let renderer = CommandLayerRenderer::new(config.tools.layer_renderer.clone())?;
            let result = render_layouts(
                &layouts,
                &options,
                Arc::new(RustBackend::new()),
                Arc::new(renderer),
            );
            match result {
                Ok(summary) => output::print_render_output(&summary, &options.output_dir),
                Err(RenderError::Jobs(JobServerError::ExecutionFailed {
                    successful,
                    failed,
                    skipped,
                    failures,
                })) => {
                    let stats = calgen::jobs::JobStats {
                        successful,
                        failed,
                        skipped,
                    };
                    output::print_job_failures(&stats, &failures);
                    return Ok(ExitCode::FAILURE);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[allow(clippy::too_many_arguments)]
fn render_options(
    config: &CalgenConfig,
    output_dir: PathBuf,
    force: bool,
    remove: bool,
    pages: Vec<PageRange>,
    format: Option<String>,
    dpi: Option<u32>,
    no_flatten: bool,
    job_graph: Option<PathBuf>,
    jobs: Option<usize>,
) -> RenderOptions {
    RenderOptions {
        output_dir,
        force,
        remove,
        pages,
        format: format.unwrap_or_else(|| config.render.output_format.clone()),
        settings: RenderSettings {
            resolution_dpi: dpi.unwrap_or(config.render.resolution_dpi),
            flatten: config.render.flatten && !no_flatten,
            template_dir: config.render.template_dir.clone(),
        },
        jobs: Some(config::effective_jobs(&config.jobs, jobs)),
        raise_on_failure: config.jobs.raise_on_failure,
        job_graph,
    }
}
