//! CLI output formatting for all commands.
//!
//! # Output Format
//!
//! ## Scan
//!
//! ```text
//! Pool: 1204 images (87 grouped)
//! Scan: 1190 cached, 14 scanned (1204 total)
//!
//! Groups
//! 001 beach2021 (3 photos)
//!     /photos/2021/beach1.jpg
//!     /photos/2021/beach2.jpg
//! ```
//!
//! Groups are listed only at `-v`.
//!
//! ## Layout
//!
//! ```text
//! family → layouts/family.json (12/12 slots, 3 attempts)
//! friends → layouts/friends.json (11/12 slots, 100 attempts)
//!     unfilled: dec
//!     forced not placed: /photos/2021/wedding.jpg
//! kids: skipped, layouts/kids.json exists (use --force)
//! ```
//!
//! ## Render
//!
//! ```text
//! family: 13 pages → out/family/
//! kids: skipped, output exists (use --force)
//! Jobs: 182 succeeded, 0 failed, 0 skipped
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::assignment::PlacementReport;
use crate::calendar::LayoutOutcome;
use crate::jobs::{FailedJob, JobStats};
use crate::pool::{ImagePool, ScanStats};
use crate::render::RenderSummary;
use std::ffi::OsStr;
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

// ============================================================================
// Scan
// ============================================================================

pub fn format_scan_output(pool: &ImagePool, stats: &ScanStats, show_groups: bool) -> Vec<String> {
    let mut lines = vec![format!("Pool: {pool}"), format!("Scan: {stats}")];

    if show_groups {
        let groups = pool.groups();
        if !groups.is_empty() {
            lines.push(String::new());
            lines.push("Groups".to_string());
            for (i, (name, files)) in groups.iter().enumerate() {
                lines.push(format!(
                    "{} {} ({})",
                    format_index(i + 1),
                    name,
                    plural(files.len(), "photo", "photos")
                ));
                for file in files {
                    lines.push(format!("{}{}", indent(1), file.display()));
                }
            }
        }
    }
    lines
}

pub fn print_scan_output(pool: &ImagePool, stats: &ScanStats, show_groups: bool) {
    for line in format_scan_output(pool, stats, show_groups) {
        println!("{}", line);
    }
}

// ============================================================================
// Layout
// ============================================================================

fn placement_details(report: &PlacementReport) -> Vec<String> {
    let mut lines = Vec::new();
    if !report.unfilled_slots.is_empty() {
        lines.push(format!(
            "{}unfilled: {}",
            indent(1),
            report.unfilled_slots.join(", ")
        ));
    }
    for path in &report.unplaced_forced {
        lines.push(format!("{}forced not placed: {}", indent(1), path.display()));
    }
    lines
}

pub fn format_layout_output(outcomes: &[LayoutOutcome]) -> Vec<String> {
    let mut lines = Vec::new();
    for outcome in outcomes {
        match outcome {
            LayoutOutcome::Written {
                variant,
                path,
                report,
                attempts,
            } => {
                lines.push(format!(
                    "{} → {} ({}/{} slots, {})",
                    variant,
                    path.display(),
                    report.filled,
                    report.total_slots,
                    plural(*attempts as usize, "attempt", "attempts")
                ));
                lines.extend(placement_details(report));
            }
            LayoutOutcome::Skipped { variant, path } => {
                lines.push(format!(
                    "{}: skipped, {} exists (use --force)",
                    variant,
                    path.display()
                ));
            }
        }
    }
    lines
}

pub fn print_layout_output(outcomes: &[LayoutOutcome]) {
    for line in format_layout_output(outcomes) {
        println!("{}", line);
    }
}

// ============================================================================
// Render
// ============================================================================

pub fn format_render_output(summary: &RenderSummary, output_dir: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    for name in &summary.rendered_layouts {
        let prefix = format!("{name}_");
        let pages = summary
            .outputs
            .iter()
            .filter(|p| {
                p.parent().and_then(Path::file_name) == Some(OsStr::new(name))
                    && p.file_name()
                        .and_then(|f| f.to_str())
                        .is_some_and(|f| f.starts_with(&prefix))
            })
            .count();
        lines.push(format!(
            "{}: {} → {}/",
            name,
            plural(pages, "page", "pages"),
            output_dir.join(name).display()
        ));
    }
    for path in &summary.skipped_layouts {
        lines.push(format!(
            "{}: skipped, output exists (use --force)",
            path.display()
        ));
    }
    lines.push(format_job_stats(&summary.stats));
    lines
}

pub fn print_render_output(summary: &RenderSummary, output_dir: &Path) {
    for line in format_render_output(summary, output_dir) {
        println!("{}", line);
    }
}

pub fn format_job_stats(stats: &JobStats) -> String {
    format!("Jobs: {stats}")
}

/// Aggregate failure report, one line per failed job.
pub fn format_job_failures(stats: &JobStats, failures: &[FailedJob]) -> Vec<String> {
    let mut lines = vec![format_job_stats(stats)];
    if !failures.is_empty() {
        lines.push("Failed".to_string());
        lines.extend(failures.iter().map(|f| format!("{}{}", indent(1), f)));
    }
    lines
}

pub fn print_job_failures(stats: &JobStats, failures: &[FailedJob]) {
    for line in format_job_failures(stats, failures) {
        eprintln!("{}", line);
    }
}
