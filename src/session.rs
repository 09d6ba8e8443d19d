// src/session.rs - Per-image pipeline state: render mode, processed buffer, contours, calibration

use std::fmt;

use image::{GrayImage, RgbImage};
use serde::Serialize;

use crate::auto_gamma::{search, CancelToken, GammaStrategy, SearchOutcome, SweepParams};
use crate::calibration::Calibration;
use crate::config::Config;
use crate::contours::{extract, render_overlay, total_area, Contour, NOT_EXTRACTED};
use crate::errors::{AreaError, Result};
use crate::image_io::InputImage;
use crate::sinks::{ProgressSink, Rendered};
use crate::transform::{apply_gamma, stretch_bright_region};

/// Which transform produces the processed buffer; the two are mutually exclusive
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderMode {
    Gamma,
    Stretch { threshold: f64 },
}

/// Derived data held for the current gamma/mode.
///
/// Any gamma or mode change drops back to `Loaded`, so contours never outlive
/// the pixels they were extracted from.
#[derive(Debug, Clone)]
pub enum Stage {
    Loaded,
    GammaApplied {
        processed: GrayImage,
    },
    ContoursExtracted {
        processed: GrayImage,
        contours: Vec<Contour>,
        annotated: RgbImage,
    },
}

/// Session settings taken from the startup configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub initial_gamma: f64,
    pub max_manual_gamma: f64,
    pub overlay_color: [u8; 3],
    pub overlay_stroke_width: u32,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial_gamma: config.initial_gamma,
            max_manual_gamma: config.max_manual_gamma,
            overlay_color: config.overlay_color_rgb,
            overlay_stroke_width: config.overlay_stroke_width,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Area of the current contours, in pixels and (when calibrated) physical units
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaReport {
    /// Total area in px², or [`NOT_EXTRACTED`]
    pub area_px: f64,
    pub area_units: Option<f64>,
    pub unit_name: Option<String>,
    pub contour_count: usize,
}

impl AreaReport {
    pub fn not_extracted() -> Self {
        Self {
            area_px: NOT_EXTRACTED,
            area_units: None,
            unit_name: None,
            contour_count: 0,
        }
    }

    pub fn from_contours(contours: &[Contour], calibration: Option<&Calibration>) -> Self {
        let area_px = total_area(contours);
        if area_px < 0.0 {
            return Self::not_extracted();
        }

        Self {
            area_px,
            area_units: calibration.map(|c| c.area_in_units(area_px)),
            unit_name: calibration.map(|c| c.unit_name.clone()),
            contour_count: contours.len(),
        }
    }

    pub fn is_extracted(&self) -> bool {
        self.area_px >= 0.0
    }
}

impl fmt::Display for AreaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_extracted() {
            return write!(f, "No contours extracted");
        }

        match (self.area_units, &self.unit_name) {
            (Some(units), Some(name)) => write!(
                f,
                "Calculated area: {:.4} {}\n{} px\nContours: {}",
                units, name, self.area_px, self.contour_count
            ),
            _ => write!(
                f,
                "Area is not calibrated,\n{} px\nContours: {}",
                self.area_px, self.contour_count
            ),
        }
    }
}

/// Mutable session for one loaded image
#[derive(Debug, Clone)]
pub struct PipelineState {
    source: GrayImage,
    name: String,
    gamma: f64,
    mode: RenderMode,
    show_contours: bool,
    stage: Stage,
    calibration: Option<Calibration>,
    options: SessionOptions,
}

impl PipelineState {
    pub fn new(input: InputImage, options: &SessionOptions) -> Self {
        Self {
            source: input.image,
            name: input.filename,
            gamma: options.initial_gamma,
            mode: RenderMode::Gamma,
            show_contours: false,
            stage: Stage::Loaded,
            calibration: None,
            options: options.clone(),
        }
    }

    /// Replace the source buffer, keeping mode, gamma, contour toggle and calibration
    pub fn reload(&mut self, input: InputImage) {
        self.source = input.image;
        self.name = input.filename;
        self.stage = Stage::Loaded;
    }

    pub fn source(&self) -> &GrayImage {
        &self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn show_contours(&self) -> bool {
        self.show_contours
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    pub fn set_calibration(&mut self, calibration: Option<Calibration>) {
        self.calibration = calibration;
    }

    fn invalidate(&mut self) {
        self.stage = Stage::Loaded;
    }

    /// Switch to gamma mode at `gamma`; values above the manual limit are clamped.
    /// Returns the gamma actually applied.
    pub fn set_gamma(&mut self, gamma: f64) -> Result<f64> {
        if !gamma.is_finite() || gamma <= 0.0 {
            return Err(AreaError::InvalidGamma(gamma));
        }

        let gamma = if gamma > self.options.max_manual_gamma {
            log::warn!("Gamma {:.2} above limit, clamped to {:.2}", gamma, self.options.max_manual_gamma);
            self.options.max_manual_gamma
        } else {
            gamma
        };

        self.gamma = gamma;
        self.mode = RenderMode::Gamma;
        self.invalidate();
        Ok(gamma)
    }

    /// Switch to bright-region stretch mode
    pub fn set_stretch_mode(&mut self, threshold: f64) -> Result<()> {
        if !(0.0..1.0).contains(&threshold) {
            return Err(AreaError::InvalidThreshold(threshold));
        }
        self.mode = RenderMode::Stretch { threshold };
        self.invalidate();
        Ok(())
    }

    /// Leave stretch mode and go back to the current gamma
    pub fn clear_stretch_mode(&mut self) {
        if self.mode != RenderMode::Gamma {
            self.mode = RenderMode::Gamma;
            self.invalidate();
        }
    }

    /// Show or hide the contour overlay; showing runs extraction when needed
    pub fn toggle_contours(&mut self, on: bool) -> Result<()> {
        self.show_contours = on;
        if on {
            self.ensure_extracted()?;
        }
        Ok(())
    }

    fn ensure_processed(&mut self) -> Result<()> {
        if let Stage::Loaded = self.stage {
            let processed = match self.mode {
                RenderMode::Gamma => apply_gamma(&self.source, self.gamma)?,
                RenderMode::Stretch { threshold } => stretch_bright_region(&self.source, threshold)?,
            };
            self.stage = Stage::GammaApplied { processed };
        }
        Ok(())
    }

    fn ensure_extracted(&mut self) -> Result<()> {
        self.ensure_processed()?;

        let stage = std::mem::replace(&mut self.stage, Stage::Loaded);
        self.stage = match stage {
            Stage::GammaApplied { processed } => {
                let extraction = extract(&processed);
                let annotated = render_overlay(
                    &processed,
                    &extraction.contours,
                    self.options.overlay_color,
                    self.options.overlay_stroke_width,
                );
                Stage::ContoursExtracted {
                    processed,
                    contours: extraction.contours,
                    annotated,
                }
            }
            other => other,
        };
        Ok(())
    }

    /// Run contour extraction on the processed buffer
    pub fn extract_contours(&mut self) -> Result<&[Contour]> {
        self.ensure_extracted()?;
        match &self.stage {
            Stage::ContoursExtracted { contours, .. } => Ok(contours.as_slice()),
            _ => Err(AreaError::Other("contour extraction did not complete".to_string())),
        }
    }

    /// Contours extracted for the current gamma/mode, if any
    pub fn contours(&self) -> Option<&[Contour]> {
        match &self.stage {
            Stage::ContoursExtracted { contours, .. } => Some(contours.as_slice()),
            _ => None,
        }
    }

    /// Buffer to display: the overlay when contours are shown, else the processed image
    pub fn render(&mut self) -> Result<Rendered<'_>> {
        if self.show_contours {
            self.ensure_extracted()?;
        } else {
            self.ensure_processed()?;
        }

        match &self.stage {
            Stage::ContoursExtracted { annotated, .. } if self.show_contours => Ok(Rendered::Color(annotated)),
            Stage::ContoursExtracted { processed, .. } | Stage::GammaApplied { processed } => {
                Ok(Rendered::Gray(processed))
            }
            Stage::Loaded => Ok(Rendered::Gray(&self.source)),
        }
    }

    /// Area of the current contours; the sentinel when extraction has not run
    pub fn compute_area(&self) -> AreaReport {
        match self.contours() {
            Some(contours) => AreaReport::from_contours(contours, self.calibration.as_ref()),
            None => AreaReport::not_extracted(),
        }
    }

    /// Search a gamma on the source image and switch to it
    pub fn auto_gamma(
        &mut self,
        strategy: GammaStrategy,
        params: &SweepParams,
        progress: &mut dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<SearchOutcome> {
        let outcome = search(&self.source, strategy, params, progress, cancel)?;
        self.set_gamma(outcome.gamma)?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::NoProgress;
    use image::Luma;

    fn square_session() -> PipelineState {
        let image = GrayImage::from_fn(80, 80, |x, y| {
            let inside = (20..60).contains(&x) && (20..60).contains(&y);
            Luma([if inside { 220 } else { 30 }])
        });
        PipelineState::new(InputImage::from_buffer(image, "square.png"), &SessionOptions::default())
    }

    #[test]
    fn new_session_starts_loaded() {
        let state = square_session();
        assert!(matches!(state.stage(), Stage::Loaded));
        assert_eq!(state.gamma(), 1.0);
        assert!(!state.compute_area().is_extracted());
    }

    #[test]
    fn set_gamma_invalidates_contours() {
        let mut state = square_session();
        state.toggle_contours(true).unwrap();
        assert!(state.compute_area().is_extracted());

        state.set_gamma(2.0).unwrap();
        let report = state.compute_area();
        assert_eq!(report.area_px, NOT_EXTRACTED);
        assert!(state.contours().is_none());
    }

    #[test]
    fn stretch_mode_invalidates_and_is_exclusive() {
        let mut state = square_session();
        state.extract_contours().unwrap();

        state.set_stretch_mode(0.7).unwrap();
        assert!(matches!(state.stage(), Stage::Loaded));
        assert_eq!(state.mode(), RenderMode::Stretch { threshold: 0.7 });

        state.set_gamma(1.5).unwrap();
        assert_eq!(state.mode(), RenderMode::Gamma);
        assert!(state.set_stretch_mode(1.0).is_err());
    }

    #[test]
    fn render_follows_contour_toggle() {
        let mut state = square_session();
        assert!(matches!(state.render().unwrap(), Rendered::Gray(_)));

        state.toggle_contours(true).unwrap();
        assert!(matches!(state.render().unwrap(), Rendered::Color(_)));

        // Hiding keeps the extracted contours
        state.toggle_contours(false).unwrap();
        assert!(matches!(state.render().unwrap(), Rendered::Gray(_)));
        assert!(state.contours().is_some());
    }

    #[test]
    fn gamma_is_validated_and_clamped() {
        let mut state = square_session();
        assert!(matches!(state.set_gamma(0.0), Err(AreaError::InvalidGamma(_))));
        assert_eq!(state.set_gamma(40.0).unwrap(), 15.0);
    }

    #[test]
    fn calibrated_area_uses_squared_factor() {
        let mut state = square_session();
        state.set_calibration(Some(Calibration::new(100.0, 50.0, "mm").unwrap()));
        state.extract_contours().unwrap();

        let report = state.compute_area();
        let area_units = report.area_units.unwrap();
        assert!((area_units - report.area_px * 0.25).abs() < 1e-9);
        assert_eq!(report.unit_name.as_deref(), Some("mm"));
        assert!(report.to_string().starts_with("Calculated area"));
    }

    #[test]
    fn report_serializes_to_json() {
        let mut state = square_session();
        state.extract_contours().unwrap();
        let json = serde_json::to_value(state.compute_area()).unwrap();
        assert_eq!(json["contour_count"], 1);
        assert!(json["area_units"].is_null());
    }

    #[test]
    fn empty_image_reports_sentinel_after_extraction() {
        let mut state = PipelineState::new(
            InputImage::from_buffer(GrayImage::new(32, 32), "black.png"),
            &SessionOptions::default(),
        );
        assert!(state.extract_contours().unwrap().is_empty());
        assert!(!state.compute_area().is_extracted());
    }

    #[test]
    fn reload_keeps_mode_and_toggle() {
        let mut state = square_session();
        state.set_stretch_mode(0.5).unwrap();
        state.toggle_contours(true).unwrap();

        state.reload(InputImage::from_buffer(GrayImage::new(10, 10), "frame"));
        assert_eq!(state.mode(), RenderMode::Stretch { threshold: 0.5 });
        assert!(state.show_contours());
        assert!(matches!(state.stage(), Stage::Loaded));
    }

    #[test]
    fn auto_gamma_switches_to_found_gamma() {
        let mut state = square_session();
        state.set_stretch_mode(0.5).unwrap();
        let outcome = state
            .auto_gamma(GammaStrategy::Percentile, &SweepParams::default(), &mut NoProgress, &CancelToken::new())
            .unwrap();
        assert_eq!(state.gamma(), outcome.gamma);
        assert_eq!(state.mode(), RenderMode::Gamma);
    }
}
