//! Configuration loading and parsing.
//!
//! Parses `hintstack.toml` (or an override path provided by the binary). Two
//! sections are recognized:
//!
//! ```toml
//! [layout]
//! display_width = 1200.0
//! default_size = 34.7
//! default_line_height = 40.665
//! ems_to_pixels = 34.7
//! smallcaps_ratio = 0.8
//! position_scale = 2.14
//! position_baseline = -755.0
//!
//! [schedule]
//! rate_limit_ms = 525
//! batch_window_ms = 625
//! ```
//!
//! Every field is optional and defaults to the built-in constants. Unknown
//! fields are ignored (TOML deserialization tolerance). Values that would make
//! the layout math degenerate (zero sizes, zero position scale, ratios outside
//! `(0, 1]`) are clamped by `Config::sanitize`, which logs under the `config`
//! target whenever it changes something.

use anyhow::Result;
use core_schedule::{HINT_RATE_LIMIT, MIN_BATCH_WINDOW};
use core_text::LayoutMetrics;
use serde::Deserialize;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::{info, warn};

/// Typed failure for callers that want to surface parse errors instead of
/// silently falling back to defaults.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LayoutConfig {
    #[serde(default = "LayoutConfig::default_display_width")]
    pub display_width: f32,
    #[serde(default = "LayoutConfig::default_size")]
    pub default_size: f32,
    #[serde(default = "LayoutConfig::default_line_height")]
    pub default_line_height: f32,
    #[serde(default = "LayoutConfig::default_ems_to_pixels")]
    pub ems_to_pixels: f32,
    #[serde(default = "LayoutConfig::default_smallcaps_ratio")]
    pub smallcaps_ratio: f32,
    #[serde(default = "LayoutConfig::default_position_scale")]
    pub position_scale: f32,
    #[serde(default = "LayoutConfig::default_position_baseline")]
    pub position_baseline: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            display_width: Self::default_display_width(),
            default_size: Self::default_size(),
            default_line_height: Self::default_line_height(),
            ems_to_pixels: Self::default_ems_to_pixels(),
            smallcaps_ratio: Self::default_smallcaps_ratio(),
            position_scale: Self::default_position_scale(),
            position_baseline: Self::default_position_baseline(),
        }
    }
}

impl LayoutConfig {
    const fn default_display_width() -> f32 {
        core_text::DISPLAY_AREA_WIDTH
    }
    const fn default_size() -> f32 {
        core_text::DEFAULT_SIZE
    }
    const fn default_line_height() -> f32 {
        core_text::DEFAULT_HEIGHT
    }
    const fn default_ems_to_pixels() -> f32 {
        core_text::EMS_TO_PIXELS
    }
    const fn default_smallcaps_ratio() -> f32 {
        core_text::CAPS_TO_SMALLCAPS
    }
    const fn default_position_scale() -> f32 {
        core_text::POSITION_SCALE
    }
    const fn default_position_baseline() -> f32 {
        core_text::POSITION_BASELINE
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    #[serde(default = "ScheduleConfig::default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    #[serde(default = "ScheduleConfig::default_batch_window_ms")]
    pub batch_window_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: Self::default_rate_limit_ms(),
            batch_window_ms: Self::default_batch_window_ms(),
        }
    }
}

impl ScheduleConfig {
    fn default_rate_limit_ms() -> u64 {
        HINT_RATE_LIMIT.as_millis() as u64
    }
    fn default_batch_window_ms() -> u64 {
        MIN_BATCH_WINDOW.as_millis() as u64
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct ConfigFile {
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>, // original file string (optional)
    pub file: ConfigFile,    // parsed (or default) data
}

/// Best-effort config path following platform conventions (XDG / AppData Roaming).
pub fn discover() -> PathBuf {
    let local = PathBuf::from("hintstack.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("hintstack").join("hintstack.toml");
    }
    PathBuf::from("hintstack.toml")
}

/// Parse a configuration document without touching the filesystem.
pub fn parse_str(content: &str) -> Result<ConfigFile, ConfigError> {
    Ok(toml::from_str::<ConfigFile>(content)?)
}

/// Read and parse `path`, surfacing IO and parse errors.
pub fn try_load(path: &std::path::Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file = parse_str(&content)?;
    let mut cfg = Config {
        raw: Some(content),
        file,
    };
    cfg.sanitize();
    Ok(cfg)
}

/// Load configuration, falling back to defaults when the file is missing or
/// malformed.
pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    match try_load(&path) {
        Ok(cfg) => Ok(cfg),
        Err(ConfigError::Read { .. }) => Ok(Config::default()),
        Err(err) => {
            warn!(target: "config", path = %path.display(), %err, "config_parse_failed_using_defaults");
            Ok(Config::default())
        }
    }
}

impl Config {
    /// Clamp values that would break layout or scheduling math. Returns `true`
    /// when anything was changed.
    pub fn sanitize(&mut self) -> bool {
        let defaults = LayoutConfig::default();
        let layout = &mut self.file.layout;
        let mut changed = false;

        let mut positive = |name: &'static str, value: &mut f32, fallback: f32| {
            if !value.is_finite() || *value <= 0.0 {
                info!(target: "config", field = name, raw = *value, clamped = fallback, "layout_value_clamped");
                *value = fallback;
                changed = true;
            }
        };
        positive("display_width", &mut layout.display_width, defaults.display_width);
        positive("default_size", &mut layout.default_size, defaults.default_size);
        positive(
            "default_line_height",
            &mut layout.default_line_height,
            defaults.default_line_height,
        );
        positive("ems_to_pixels", &mut layout.ems_to_pixels, defaults.ems_to_pixels);
        positive("smallcaps_ratio", &mut layout.smallcaps_ratio, defaults.smallcaps_ratio);
        positive("position_scale", &mut layout.position_scale, defaults.position_scale);

        if layout.smallcaps_ratio > 1.0 {
            info!(target: "config", field = "smallcaps_ratio", raw = layout.smallcaps_ratio, clamped = 1.0, "layout_value_clamped");
            layout.smallcaps_ratio = 1.0;
            changed = true;
        }
        if !layout.position_baseline.is_finite() {
            info!(target: "config", field = "position_baseline", clamped = defaults.position_baseline, "layout_value_clamped");
            layout.position_baseline = defaults.position_baseline;
            changed = true;
        }

        let schedule = &mut self.file.schedule;
        if schedule.batch_window_ms == 0 {
            info!(target: "config", field = "batch_window_ms", raw = 0u64, clamped = 1u64, "schedule_value_clamped");
            schedule.batch_window_ms = 1;
            changed = true;
        }
        changed
    }

    pub fn layout_metrics(&self) -> LayoutMetrics {
        let l = &self.file.layout;
        LayoutMetrics {
            display_width: l.display_width,
            default_size: l.default_size,
            default_line_height: l.default_line_height,
            ems_to_pixels: l.ems_to_pixels,
            smallcaps_ratio: l.smallcaps_ratio,
            position_scale: l.position_scale,
            position_baseline: l.position_baseline,
        }
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.file.schedule.rate_limit_ms)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.file.schedule.batch_window_ms)
    }
}
