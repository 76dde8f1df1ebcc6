//! Application configuration.
//!
//! Loaded from `config.toml` in the config directory. Stock defaults are
//! serialized to a TOML table, the user file is merged on top, and the
//! result is deserialized and validated.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [capture]
//! buffer_secs = 10.0              # History kept by a capture session
//! frame_rate = 30.0               # Grabber rate
//! first_frame_retries = 20        # Polls while waiting for the first frame
//! first_frame_timeout_secs = 2.0  # Total first-frame wait
//! preload_max_width = 1920        # Frames larger than this box are shrunk
//! preload_max_height = 1080
//!
//! [export]
//! raw_dir = "raw"                 # Below the export directory
//! nime_dir = "nime"
//! jpeg_quality = 92
//! gif_colors = 256                # ffmpeg palette size (2-256)
//! gif_bayer_scale = 2             # Dither scale (0-5, 0 = strongest)
//! ffmpeg = "ffmpeg"
//! gifsicle = "gifsicle"
//! # overlay_font = "font.ttf"     # TrueType/OpenType font for name overlays
//!
//! [settings]
//! path = "user_properties.json"   # Relative to the config directory
//! debounce_secs = 2.0
//! poll_interval_ms = 1
//! close_timeout_secs = 1.0
//!
//! [dedup]
//! threshold = 0.95                # SSIM at or above which frames are duplicates
//! analysis_edge = 256             # Longer edge of the comparison images
//!
//! [processing]
//! max_threads = 4                 # Omit for auto = CPU cores
//! ```
//!
//! Config files are sparse; unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Everything `config.toml` can set. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub export: ExportConfig,
    pub settings: SettingsConfig,
    pub dedup: DedupConfig,
    pub processing: ProcessingConfig,
}

impl AppConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| -> Result<(), ConfigError> { Err(ConfigError::Validation(msg.into())) };
        let positive = |v: f64| v.is_finite() && v > 0.0;

        let c = &self.capture;
        if !positive(c.buffer_secs) {
            return invalid("capture.buffer_secs must be positive");
        }
        if !positive(c.frame_rate) {
            return invalid("capture.frame_rate must be positive");
        }
        if c.first_frame_retries == 0 {
            return invalid("capture.first_frame_retries must be at least 1");
        }
        if !positive(c.first_frame_timeout_secs) {
            return invalid("capture.first_frame_timeout_secs must be positive");
        }
        if c.preload_max_width == 0 || c.preload_max_height == 0 {
            return invalid("capture.preload_max_width/height must be non-zero");
        }

        let e = &self.export;
        if !(1..=100).contains(&e.jpeg_quality) {
            return invalid("export.jpeg_quality must be 1-100");
        }
        if !(2..=256).contains(&e.gif_colors) {
            return invalid("export.gif_colors must be 2-256");
        }
        if e.gif_bayer_scale > 5 {
            return invalid("export.gif_bayer_scale must be 0-5");
        }

        let s = &self.settings;
        if !positive(s.debounce_secs) {
            return invalid("settings.debounce_secs must be positive");
        }
        if s.poll_interval_ms == 0 {
            return invalid("settings.poll_interval_ms must be positive");
        }
        if !positive(s.close_timeout_secs) {
            return invalid("settings.close_timeout_secs must be positive");
        }

        if !(0.0..=1.0).contains(&self.dedup.threshold) {
            return invalid("dedup.threshold must be 0-1");
        }
        if self.dedup.analysis_edge < 8 {
            return invalid("dedup.analysis_edge must be at least 8");
        }
        if self.processing.max_threads == Some(0) {
            return invalid("processing.max_threads must be at least 1");
        }
        Ok(())
    }
}

/// Capture session timing and preload size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Seconds of history a session keeps.
    pub buffer_secs: f64,
    pub frame_rate: f64,
    pub first_frame_retries: u32,
    pub first_frame_timeout_secs: f64,
    pub preload_max_width: u32,
    pub preload_max_height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_secs: 10.0,
            frame_rate: 30.0,
            first_frame_retries: 20,
            first_frame_timeout_secs: 2.0,
            preload_max_width: 1920,
            preload_max_height: 1080,
        }
    }
}

/// Export tree layout, encoder settings and external tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// RAW tree, relative to the export directory.
    pub raw_dir: PathBuf,
    /// NIME tree, relative to the export directory.
    pub nime_dir: PathBuf,
    pub jpeg_quality: u32,
    pub gif_colors: u32,
    pub gif_bayer_scale: u32,
    pub ffmpeg: PathBuf,
    pub gifsicle: PathBuf,
    /// Font for the name overlay on NIME renditions, relative to the config
    /// directory. Without one the overlay draws only its backdrop.
    pub overlay_font: Option<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("raw"),
            nime_dir: PathBuf::from("nime"),
            jpeg_quality: 92,
            gif_colors: 256,
            gif_bayer_scale: 2,
            ffmpeg: PathBuf::from("ffmpeg"),
            gifsicle: PathBuf::from("gifsicle"),
            overlay_font: None,
        }
    }
}

/// Persistent user settings file and its writer timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsConfig {
    pub path: PathBuf,
    pub debounce_secs: f64,
    pub poll_interval_ms: u64,
    pub close_timeout_secs: f64,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("user_properties.json"),
            debounce_secs: 2.0,
            poll_interval_ms: 1,
            close_timeout_secs: 1.0,
        }
    }
}

/// Duplicate-frame detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    /// SSIM at or above which a frame duplicates its predecessor.
    pub threshold: f64,
    pub analysis_edge: u32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            analysis_edge: 256,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of worker threads.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_threads: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_threads.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Stock defaults as a `toml::Value::Table`, the base layer for merging.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(AppConfig::default())?)
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

/// `config.toml` in `dir` as a raw TOML value; `Ok(None)` when absent.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults, then deserialize and
/// validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<AppConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: AppConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in `dir`.
pub fn load_config(dir: &Path) -> Result<AppConfig, ConfigError> {
    let config = resolve_config(load_raw_config(dir)?)?;
    log::debug!("Loaded config from {}", dir.display());
    Ok(config)
}

/// Fully-commented stock `config.toml`, printed by `gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# nime-capture Configuration
# ==========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Capture
# ---------------------------------------------------------------------------
[capture]
# Seconds of history kept by a capture session. Stills can reach back this
# far and clips can be at most this long.
buffer_secs = 10.0

# Frames grabbed per second.
frame_rate = 30.0

# Polls while waiting for the first frame after binding a window, spread
# over first_frame_timeout_secs.
first_frame_retries = 20
first_frame_timeout_secs = 2.0

# Frames larger than this box are shrunk (aspect kept) as they are
# captured. The box grows on demand when a larger export size is chosen.
preload_max_width = 1920
preload_max_height = 1080

# ---------------------------------------------------------------------------
# Export
# ---------------------------------------------------------------------------
[export]
# Output trees below the export directory.
raw_dir = "raw"
nime_dir = "nime"

# JPEG quality of still exports (1 = worst, 100 = best).
jpeg_quality = 92

# GIF palette size (2-256) and Bayer dither scale (0-5, 0 = strongest).
gif_colors = 256
gif_bayer_scale = 2

# External tools for MP4 and optimized GIF export.
ffmpeg = "ffmpeg"
gifsicle = "gifsicle"

# Font for the name drawn over NIME renditions, relative to the config
# directory. Leave unset to draw only the darkened backdrop.
# overlay_font = "fonts/overlay.ttf"

# ---------------------------------------------------------------------------
# User settings
# ---------------------------------------------------------------------------
[settings]
# JSON file, relative to the config directory.
path = "user_properties.json"

# Changes are written once nothing changed for this long.
debounce_secs = 2.0
poll_interval_ms = 1

# Longest wait for the final write on shutdown.
close_timeout_secs = 1.0

# ---------------------------------------------------------------------------
# Duplicate-frame detection
# ---------------------------------------------------------------------------
[dedup]
# Frames whose SSIM against the previous kept frame reaches this value are
# disabled.
threshold = 0.95

# Longer edge of the downscaled images compared.
analysis_edge = 256

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum worker threads.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_threads = 4
"##
}
