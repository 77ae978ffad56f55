//! Tool configuration.
//!
//! Handles loading, validating, and merging `calgen.toml`. Stock defaults are
//! overridden by the user file, which only needs the keys it changes.
//!
//! ## Config File Location
//!
//! `calgen.toml` in the working directory, or any file passed with
//! `--config`. A missing default file is not an error; a missing file named
//! explicitly is.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [render]
//! resolution_dpi = 300        # Raster resolution of rendered layers
//! output_format = "png"       # "png" or "jpg"
//! flatten = true              # Flatten final pages onto white
//! template_dir = "templates"  # Passed to the layer renderer
//!
//! [jobs]
//! # max_jobs = 4              # Concurrent jobs (omit for auto = CPU cores)
//! raise_on_failure = true     # Non-zero exit when any job failed
//!
//! [pool]
//! cache_file = ".image_pool.json"
//! exclusion_window_secs = 3600
//! placement_attempts = 100
//!
//! [tools]
//! layer_renderer = ["calgen-render-layer"]
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "calgen.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `calgen.toml`.
///
/// All fields have defaults. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalgenConfig {
    /// Page rendering settings.
    pub render: RenderConfig,
    /// Job scheduler settings.
    pub jobs: JobsConfig,
    /// Image pool and placement settings.
    pub pool: PoolConfig,
    /// External programs.
    pub tools: ToolsConfig,
}

impl CalgenConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render.resolution_dpi == 0 {
            return Err(ConfigError::Validation(
                "render.resolution_dpi must be positive".into(),
            ));
        }
        if !OUTPUT_FORMATS.contains(&self.render.output_format.as_str()) {
            return Err(ConfigError::Validation(format!(
                "render.output_format must be one of {}",
                OUTPUT_FORMATS.join(", ")
            )));
        }
        if self.jobs.max_jobs == Some(0) {
            return Err(ConfigError::Validation(
                "jobs.max_jobs must be at least 1".into(),
            ));
        }
        if self.pool.exclusion_window_secs < 0 {
            return Err(ConfigError::Validation(
                "pool.exclusion_window_secs must not be negative".into(),
            ));
        }
        if self.pool.placement_attempts == 0 {
            return Err(ConfigError::Validation(
                "pool.placement_attempts must be at least 1".into(),
            ));
        }
        if self.tools.layer_renderer.is_empty() {
            return Err(ConfigError::Validation(
                "tools.layer_renderer must name a program".into(),
            ));
        }
        Ok(())
    }
}

/// Accepted values of `render.output_format`.
pub const OUTPUT_FORMATS: &[&str] = &["png", "jpg"];

/// Page rendering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub resolution_dpi: u32,
    pub output_format: String,
    pub flatten: bool,
    pub template_dir: PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            resolution_dpi: 300,
            output_format: "png".to_string(),
            flatten: true,
            template_dir: PathBuf::from("templates"),
        }
    }
}

/// Job scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsConfig {
    /// Maximum number of simultaneously running jobs.
    /// When absent, defaults to the number of CPU cores.
    pub max_jobs: Option<usize>,
    pub raise_on_failure: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_jobs: None,
            raise_on_failure: true,
        }
    }
}

/// Resolve the effective job concurrency.
///
/// - a CLI value wins over the config
/// - `None` everywhere → all available cores
///
/// Unlike image workers, jobs spend most of their time waiting on external
/// renderers, so values above the core count are honored.
pub fn effective_jobs(config: &JobsConfig, cli: Option<usize>) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cli.or(config.max_jobs).unwrap_or(cores).max(1)
}

/// Image pool and placement settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub cache_file: PathBuf,
    pub exclusion_window_secs: i64,
    pub placement_attempts: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cache_file: PathBuf::from(".image_pool.json"),
            exclusion_window_secs: crate::assignment::DEFAULT_EXCLUSION_WINDOW_SECS,
            placement_attempts: 100,
        }
    }
}

/// External programs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// Layer renderer command; the request file path is appended.
    pub layer_renderer: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            layer_renderer: vec!["calgen-render-layer".to_string()],
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(CalgenConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<CalgenConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: CalgenConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the configuration.
///
/// With `Some(path)` the file must exist. With `None`, [`DEFAULT_CONFIG_FILE`]
/// in the working directory is used when present.
pub fn load_config(path: Option<&Path>) -> Result<CalgenConfig, ConfigError> {
    let overlay = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            Some(toml::from_str(&content)?)
        }
        None => load_raw_config(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    resolve_config(stock_defaults_value()?, overlay)
}

/// Returns a fully-commented stock `calgen.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# calgen Configuration
# ====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# calgen reads ./calgen.toml, or the file given with --config.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Page rendering
# ---------------------------------------------------------------------------
[render]
# Resolution at which layers are rasterized.
resolution_dpi = 300

# File format of the finished pages: "png" or "jpg".
output_format = "png"

# Flatten finished pages onto a white background (drops transparency).
flatten = true

# Template directory handed to the layer renderer.
template_dir = "templates"

# ---------------------------------------------------------------------------
# Job scheduler
# ---------------------------------------------------------------------------
[jobs]
# Maximum number of jobs running at the same time.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_jobs = 4

# Exit with an error when any render job failed.
raise_on_failure = true

# ---------------------------------------------------------------------------
# Image pool and photo placement
# ---------------------------------------------------------------------------
[pool]
# Scan cache, used when the calendar definition names none.
cache_file = ".image_pool.json"

# Photos taken within this many seconds of a placed photo are not placed
# on the same calendar.
exclusion_window_secs = 3600

# Placement retries with fresh randomness before giving up on a full fill.
placement_attempts = 100

# ---------------------------------------------------------------------------
# External tools
# ---------------------------------------------------------------------------
[tools]
# Renders one template layer. Receives the path of a JSON request file as
# its last argument and must write the PNG named in the request's "output".
layer_renderer = ["calgen-render-layer"]
"##
}
