//! CLI output formatting.
//!
//! # Information-First Display
//!
//! The primary line for every item is its identity (kind, name tag and
//! timestamp); files are shown as indented context lines. Frame listings use
//! the same 3-digit positional index the RAW archive uses.
//!
//! # Output Format
//!
//! ## Inspect
//!
//! ```text
//! Metadata nime/Some_Show__2024-05-01_12-00-00_123.gif
//!     Overlay name: yes
//!     Size: 16:9 @ 640
//!     Playback: REFLECT
//!     Disabled frames: 3, 4
//! ```
//!
//! ## Reexport
//!
//! ```text
//! Video Some Show 2024-05-01_12-00-00_123 (24 frames, 20 enabled, 40 ms)
//!     Source: raw/Some_Show__2024-05-01_12-00-00_123.zip
//!     001 640x360
//!     002 640x360 (disabled)
//!     Duplicates: 4 of 24 frames disabled
//!     raw/Some_Show__2024-05-01_12-00-00_123.zip: unchanged
//!     nime/Some_Show__2024-05-01_12-00-00_123.gif: written
//! ```
//!
//! # Architecture
//!
//! Each `format_*` function returns `Vec<String>` for testability;
//! [`print_lines`] writes them to stdout. Format functions do no I/O.

use std::path::Path;

use crate::imaging::{AspectRatioPattern, ResolutionPattern};
use crate::metadata::ContentsMetadata;
use crate::model::{ImageLayer, ImageModel, VideoModel};
use crate::naming::NIME_PREFIX;
use crate::persist::{ContentModel, LoadedContent, SaveReport};

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Display form of a name tag: the tag without its prefix, or `(untagged)`.
fn display_name(nime_name: Option<&str>) -> &str {
    match nime_name {
        Some(name) => name.strip_prefix(NIME_PREFIX).unwrap_or(name),
        None => "(untagged)",
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn raw_size(model: &ImageModel) -> String {
    model
        .raw_image()
        .map(|img| format!("{}x{}", img.width(), img.height()))
        .unwrap_or_else(|| "empty".to_string())
}

pub fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}

// ============================================================================
// Inspect
// ============================================================================

/// Format the metadata embedded in `path`. Unset fields are omitted; fully
/// empty metadata prints `(none)`.
pub fn format_metadata(path: &Path, metadata: &ContentsMetadata) -> Vec<String> {
    let mut lines = vec![format!("Metadata {}", path.display())];
    let mut fields = Vec::new();

    if let Some(overlay) = metadata.overlay_nime_name {
        fields.push(format!("Overlay name: {}", yes_no(overlay)));
    }
    if let Some(crop) = metadata.crop_params {
        let parts: Vec<String> = crop
            .iter()
            .map(|v| v.map_or_else(|| "-".to_string(), |v| format!("{v:.3}")))
            .collect();
        fields.push(format!("Crop: {}", parts.join(", ")));
    }
    match (
        metadata.resize_aspect_ratio_pattern,
        metadata.resize_resolution_pattern,
    ) {
        (Some(aspect), Some(resolution)) => fields.push(format_size(aspect, resolution)),
        (Some(aspect), None) => fields.push(format!("Aspect: {}", aspect.as_str())),
        (None, Some(resolution)) => fields.push(format!("Resolution: {}", resolution.as_str())),
        (None, None) => {}
    }
    if let Some(mode) = metadata.playback_mode {
        fields.push(format!("Playback: {}", mode.as_str()));
    }
    if let Some(disabled) = &metadata.disabled_frame_indices {
        let list: Vec<String> = disabled.iter().map(u32::to_string).collect();
        let list = if list.is_empty() {
            "none".to_string()
        } else {
            list.join(", ")
        };
        fields.push(format!("Disabled frames: {list}"));
    }

    if fields.is_empty() {
        fields.push("(none)".to_string());
    }
    lines.extend(fields.into_iter().map(|f| format!("{}{}", indent(1), f)));
    lines
}

fn format_size(aspect: AspectRatioPattern, resolution: ResolutionPattern) -> String {
    format!("Size: {} @ {}", aspect.as_str(), resolution.as_str())
}

// ============================================================================
// Loaded content
// ============================================================================

/// Header and per-frame lines of loaded content.
pub fn format_loaded(loaded: &LoadedContent) -> Vec<String> {
    let mut lines = match &loaded.model {
        ContentModel::Image(model) => vec![format!(
            "Still {} {} ({})",
            display_name(model.nime_name()),
            model.time_stamp(),
            raw_size(model)
        )],
        ContentModel::Video(video) => {
            let mut lines = vec![video_header(video)];
            lines.extend(format_frames(video, 1));
            lines
        }
    };
    lines.insert(1, format!("{}Source: {}", indent(1), loaded.path.display()));
    lines
}

fn video_header(video: &VideoModel) -> String {
    format!(
        "Video {} {} ({} frames, {} enabled, {} ms)",
        display_name(video.nime_name()),
        video.time_stamp(),
        video.num_total_frames(),
        video.num_enable_frames(),
        video.duration_in_msec()
    )
}

/// One line per frame: index, RAW size, disabled marker.
pub fn format_frames(video: &VideoModel, depth: usize) -> Vec<String> {
    (0..video.num_total_frames())
        .filter_map(|i| video.frame(i).map(|frame| (i, frame)))
        .map(|(i, frame)| {
            let marker = if frame.enable() { "" } else { " (disabled)" };
            format!("{}{} {}{}", indent(depth), format_index(i + 1), raw_size(frame), marker)
        })
        .collect()
}

// ============================================================================
// Save and export
// ============================================================================

/// Which files a save wrote, relative to `export_root` when possible.
pub fn format_save_report(report: &SaveReport, export_root: &Path) -> Vec<String> {
    let shown = |path: &Path| {
        path.strip_prefix(export_root)
            .unwrap_or(path)
            .display()
            .to_string()
    };
    let status = |written: bool| if written { "written" } else { "unchanged" };
    vec![
        format!("{}{}: {}", indent(1), shown(&report.raw_path), status(report.raw_written)),
        format!("{}{}: {}", indent(1), shown(&report.main_path), status(report.main_written)),
    ]
}

pub fn format_dedup(disabled: usize, total: usize) -> String {
    format!("{}Duplicates: {} of {} frames disabled", indent(1), disabled, total)
}

pub fn format_resize(layer: ImageLayer, aspect: AspectRatioPattern, resolution: ResolutionPattern) -> String {
    format!("{}{:?} {}", indent(1), layer, format_size(aspect, resolution))
}

pub fn format_encoded(dest: &Path, frames: usize, frame_rate: f64) -> String {
    format!("Encoded {} ({} frames @ {} fps)", dest.display(), frames, frame_rate)
}
