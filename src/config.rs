// src/config.rs - Startup configuration for sessions, searches, calibration and cameras

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::auto_gamma::{GammaStrategy, SweepParams};
use crate::camera::SyntheticPattern;
use crate::errors::{AreaError, Result};

/// Configuration for the area measurement tool
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Image (or directory of images) opened at startup
    pub input_path: String,
    pub output_csv: String,
    #[serde(default = "default_parallel")]
    pub use_parallel: bool,

    // Manual gamma control
    #[serde(default = "default_initial_gamma")]
    pub initial_gamma: f64,

    #[serde(default = "default_max_manual_gamma")]
    pub max_manual_gamma: f64,

    // Gamma sweep parameters
    #[serde(default = "default_sweep_min_gamma")]
    pub sweep_min_gamma: f64,

    #[serde(default = "default_sweep_max_gamma")]
    pub sweep_max_gamma: f64,

    #[serde(default = "default_sweep_step")]
    pub sweep_step: f64,

    #[serde(default = "default_std_window")]
    pub std_window: usize,

    // DEPRECATED: only read by the ratio-threshold strategy
    #[serde(default = "default_ratio_coefficient")]
    pub ratio_coefficient: f64,

    #[serde(default = "default_percentile_top")]
    pub percentile_top: f64,

    #[serde(default = "default_percentile_target")]
    pub percentile_target: f64,

    #[serde(default = "default_strategy")]
    pub default_strategy: GammaStrategy,

    // Bright-region stretch mode
    #[serde(default = "default_stretch_threshold")]
    pub stretch_threshold: f64,

    // Calibration strip (fractions of the reference image)
    #[serde(default = "default_calibration_strip_height")]
    pub calibration_strip_height: f64,

    #[serde(default = "default_calibration_strip_width")]
    pub calibration_strip_width: f64,

    #[serde(default = "default_calibration_threshold")]
    pub calibration_threshold: u8,

    /// External OCR command line, `{image}` is replaced by the strip path
    #[serde(default)]
    pub ocr_command: Option<String>,

    // Contour overlay
    #[serde(default = "default_overlay_color_rgb")]
    pub overlay_color_rgb: [u8; 3],

    #[serde(default = "default_overlay_stroke_width")]
    pub overlay_stroke_width: u32,

    // Camera producer
    #[serde(default = "default_camera_timeout_ms")]
    pub camera_timeout_ms: u64,

    #[serde(default = "default_camera_timeout_warn_after")]
    pub camera_timeout_warn_after: u32,

    #[serde(default = "default_synthetic_width")]
    pub synthetic_width: u32,

    #[serde(default = "default_synthetic_height")]
    pub synthetic_height: u32,

    #[serde(default = "default_synthetic_fps")]
    pub synthetic_fps: u32,

    #[serde(default = "default_synthetic_pattern")]
    pub synthetic_pattern: SyntheticPattern,
}

fn default_parallel() -> bool {
    true
}

fn default_initial_gamma() -> f64 {
    1.0
}

fn default_max_manual_gamma() -> f64 {
    15.0
}

fn default_sweep_min_gamma() -> f64 {
    1.0
}

fn default_sweep_max_gamma() -> f64 {
    15.0
}

fn default_sweep_step() -> f64 {
    0.1
}

fn default_std_window() -> usize {
    5
}

fn default_ratio_coefficient() -> f64 {
    20.0
}

fn default_percentile_top() -> f64 {
    0.001 // top 0.1% of samples
}

fn default_percentile_target() -> f64 {
    0.6
}

fn default_strategy() -> GammaStrategy {
    GammaStrategy::StdWindow
}

fn default_stretch_threshold() -> f64 {
    0.7
}

fn default_calibration_strip_height() -> f64 {
    0.10
}

fn default_calibration_strip_width() -> f64 {
    0.32
}

fn default_calibration_threshold() -> u8 {
    200
}

fn default_overlay_color_rgb() -> [u8; 3] {
    [255, 0, 0] // Red
}

fn default_overlay_stroke_width() -> u32 {
    3
}

fn default_camera_timeout_ms() -> u64 {
    2000
}

fn default_camera_timeout_warn_after() -> u32 {
    5
}

fn default_synthetic_width() -> u32 {
    640
}

fn default_synthetic_height() -> u32 {
    480
}

fn default_synthetic_fps() -> u32 {
    30
}

fn default_synthetic_pattern() -> SyntheticPattern {
    SyntheticPattern::Gradient
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: "./input".to_string(),
            output_csv: "./results.csv".to_string(),
            use_parallel: default_parallel(),
            initial_gamma: default_initial_gamma(),
            max_manual_gamma: default_max_manual_gamma(),
            sweep_min_gamma: default_sweep_min_gamma(),
            sweep_max_gamma: default_sweep_max_gamma(),
            sweep_step: default_sweep_step(),
            std_window: default_std_window(),
            ratio_coefficient: default_ratio_coefficient(),
            percentile_top: default_percentile_top(),
            percentile_target: default_percentile_target(),
            default_strategy: default_strategy(),
            stretch_threshold: default_stretch_threshold(),
            calibration_strip_height: default_calibration_strip_height(),
            calibration_strip_width: default_calibration_strip_width(),
            calibration_threshold: default_calibration_threshold(),
            ocr_command: None,
            overlay_color_rgb: default_overlay_color_rgb(),
            overlay_stroke_width: default_overlay_stroke_width(),
            camera_timeout_ms: default_camera_timeout_ms(),
            camera_timeout_warn_after: default_camera_timeout_warn_after(),
            synthetic_width: default_synthetic_width(),
            synthetic_height: default_synthetic_height(),
            synthetic_fps: default_synthetic_fps(),
            synthetic_pattern: default_synthetic_pattern(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AreaError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| AreaError::ConfigLoad {
            source: e,
            path: path.to_path_buf(),
        })?;

        Ok(config)
    }

    /// Sweep parameters used by the interactive auto-gamma action
    pub fn sweep_params(&self) -> SweepParams {
        SweepParams {
            min_gamma: self.sweep_min_gamma,
            max_gamma: self.sweep_max_gamma,
            step: self.sweep_step,
            window: self.std_window,
            ratio_coefficient: self.ratio_coefficient,
            top_percent: self.percentile_top,
            target: self.percentile_target,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_gamma > 0.0 && self.initial_gamma <= self.max_manual_gamma) {
            return Err(AreaError::Config(
                "initial_gamma must be > 0.0 and <= max_manual_gamma".to_string(),
            ));
        }

        if self.sweep_min_gamma <= 0.0 || self.sweep_max_gamma < self.sweep_min_gamma {
            return Err(AreaError::Config(
                "sweep_min_gamma must be > 0.0 and <= sweep_max_gamma".to_string(),
            ));
        }

        if self.sweep_step <= 0.0 {
            return Err(AreaError::Config("sweep_step must be > 0.0".to_string()));
        }

        if self.std_window == 0 {
            return Err(AreaError::Config("std_window must be > 0".to_string()));
        }

        if self.ratio_coefficient <= 1.0 {
            return Err(AreaError::Config(
                "ratio_coefficient must be > 1.0".to_string(),
            ));
        }

        if self.percentile_top <= 0.0 || self.percentile_top > 1.0 {
            return Err(AreaError::Config(
                "percentile_top must be in (0.0, 1.0]".to_string(),
            ));
        }

        if self.percentile_target <= 0.0 || self.percentile_target >= 1.0 {
            return Err(AreaError::Config(
                "percentile_target must be in (0.0, 1.0)".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.stretch_threshold) {
            return Err(AreaError::Config(
                "stretch_threshold must be in [0.0, 1.0)".to_string(),
            ));
        }

        for (name, fraction) in [
            ("calibration_strip_height", self.calibration_strip_height),
            ("calibration_strip_width", self.calibration_strip_width),
        ] {
            if fraction <= 0.0 || fraction > 1.0 {
                return Err(AreaError::Config(format!("{} must be in (0.0, 1.0]", name)));
            }
        }

        if self.overlay_stroke_width == 0 {
            return Err(AreaError::Config(
                "overlay_stroke_width must be > 0".to_string(),
            ));
        }

        if self.synthetic_width == 0 || self.synthetic_height == 0 || self.synthetic_fps == 0 {
            return Err(AreaError::Config(
                "synthetic camera dimensions and fps must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            AreaError::Config(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, content)?;

        Ok(())
    }
}
