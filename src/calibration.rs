// src/calibration.rs - Pixel to physical unit calibration from a printed scale bar

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use image::{imageops, GrayImage};

use crate::config::Config;
use crate::contours::extract_with_threshold;
use crate::errors::{AreaError, Result};
use crate::image_io::save_gray_image;

/// Unit name used when the label carries a number but no unit
pub const DEFAULT_UNIT_NAME: &str = "units";

/// Resolved scale: `physical_value` units span `pixel_length` pixels
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub pixel_length: f64,
    pub physical_value: f64,
    pub unit_name: String,
}

impl Calibration {
    pub fn new(pixel_length: f64, physical_value: f64, unit_name: &str) -> Result<Self> {
        if !(pixel_length > 0.0 && physical_value > 0.0) {
            return Err(AreaError::CalibrationUnresolved(format!(
                "non-positive scale {} {} over {} px",
                physical_value, unit_name, pixel_length
            )));
        }
        Ok(Self {
            pixel_length,
            physical_value,
            unit_name: unit_name.to_string(),
        })
    }

    /// Physical length of one pixel
    pub fn unit_factor(&self) -> f64 {
        self.physical_value / self.pixel_length
    }

    /// Convert an area in px² to squared physical units
    pub fn area_in_units(&self, area_px: f64) -> f64 {
        let factor = self.unit_factor();
        area_px * factor * factor
    }
}

/// Reads the printed scale label from the calibration strip
pub trait TextRecognizer {
    fn recognize(&self, strip: &GrayImage) -> Result<Vec<String>>;
}

/// Label typed in by the user instead of recognized from pixels
#[derive(Debug, Clone)]
pub struct LabelText(pub String);

impl TextRecognizer for LabelText {
    fn recognize(&self, _strip: &GrayImage) -> Result<Vec<String>> {
        Ok(self.0.split_whitespace().map(str::to_string).collect())
    }
}

/// External OCR program; `{image}` in the command line is replaced by the strip path
#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    command_line: String,
    scratch_dir: PathBuf,
}

/// Distinguishes scratch files of recognizers running at the same time
static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Strip image handed to the OCR program, removed when dropped
struct ScratchFile(PathBuf);

impl ScratchFile {
    fn write(dir: &Path, strip: &GrayImage) -> Result<Self> {
        let id = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        let scratch = Self(dir.join(format!("gamma_area_strip_{}_{}.png", std::process::id(), id)));
        save_gray_image(strip, &scratch.0)?;
        Ok(scratch)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

impl CommandRecognizer {
    pub fn new(command_line: &str) -> Self {
        Self::with_scratch_dir(command_line, std::env::temp_dir())
    }

    /// Write strip images into `scratch_dir` instead of the system temp directory
    pub fn with_scratch_dir<P: Into<PathBuf>>(command_line: &str, scratch_dir: P) -> Self {
        Self {
            command_line: command_line.to_string(),
            scratch_dir: scratch_dir.into(),
        }
    }
}

impl TextRecognizer for CommandRecognizer {
    fn recognize(&self, strip: &GrayImage) -> Result<Vec<String>> {
        let scratch = ScratchFile::write(&self.scratch_dir, strip)?;
        let image_arg = scratch.0.to_string_lossy().to_string();

        let mut parts = self
            .command_line
            .split_whitespace()
            .map(|part| part.replace("{image}", &image_arg));
        let program = parts
            .next()
            .ok_or_else(|| AreaError::Config("ocr_command is empty".to_string()))?;

        log::debug!("Running OCR command: {}", self.command_line);
        let output = Command::new(&program).args(parts).output()?;

        if !output.status.success() {
            return Err(AreaError::CalibrationUnresolved(format!(
                "{} exited with {}",
                program, output.status
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.split_whitespace().map(str::to_string).collect())
    }
}

fn is_number_char(chars: &[char], i: usize) -> bool {
    let c = chars[i];
    if c.is_ascii_digit() {
        return true;
    }
    // A single separator between two digits belongs to the number
    (c == '.' || c == ',')
        && i > 0
        && i + 1 < chars.len()
        && chars[i - 1].is_ascii_digit()
        && chars[i + 1].is_ascii_digit()
}

/// Split glued tokens such as `50mm` into `50` and `mm`
pub fn split_tokens<S: AsRef<str>>(tokens: &[S]) -> Vec<String> {
    let mut split = Vec::new();
    for token in tokens {
        let chars: Vec<char> = token.as_ref().chars().collect();
        let mut current = String::new();
        let mut current_numeric = None;

        for i in 0..chars.len() {
            let numeric = is_number_char(&chars, i);
            if current_numeric.is_some() && current_numeric != Some(numeric) {
                split.push(std::mem::take(&mut current));
            }
            current.push(chars[i]);
            current_numeric = Some(numeric);
        }
        if !current.is_empty() {
            split.push(current);
        }
    }
    split
}

fn is_number_token(token: &str) -> bool {
    token.chars().next().map_or(false, |c| c.is_ascii_digit())
}

/// Parse recognized tokens into `(physical_value, unit_name)`.
///
/// Tokens before the first number are noise; consecutive number tokens are joined
/// (OCR tends to split "100" into "1 00"), and one following token is the unit.
pub fn parse_label<S: AsRef<str>>(tokens: &[S]) -> Result<(f64, String)> {
    let tokens = split_tokens(tokens);

    let start = tokens
        .iter()
        .position(|t| is_number_token(t))
        .ok_or_else(|| AreaError::CalibrationUnresolved("no digits in scale label".to_string()))?;

    let run: Vec<&String> = tokens[start..].iter().take_while(|t| is_number_token(t)).collect();
    let digits: String = run.iter().map(|t| t.as_str()).collect::<String>().replace(',', ".");

    let value: f64 = digits.parse().map_err(|_| {
        AreaError::CalibrationUnresolved(format!("cannot parse '{}' as a length", digits))
    })?;

    let unit = tokens
        .get(start + run.len())
        .cloned()
        .unwrap_or_else(|| DEFAULT_UNIT_NAME.to_string());

    Ok((value, unit))
}

/// Crop the bottom-right strip that holds the scale bar and its label
pub fn calibration_strip(image: &GrayImage, height_fraction: f64, width_fraction: f64) -> GrayImage {
    let (width, height) = image.dimensions();
    let strip_width = ((width as f64 * width_fraction).round() as u32).clamp(1, width.max(1));
    let strip_height = ((height as f64 * height_fraction).round() as u32).clamp(1, height.max(1));

    imageops::crop_imm(
        image,
        width.saturating_sub(strip_width),
        height.saturating_sub(strip_height),
        strip_width,
        strip_height,
    )
    .to_image()
}

/// Longest bounding-box side over every contour above the fixed cutoff
pub fn measure_reference_length(strip: &GrayImage, threshold: u8) -> Option<u32> {
    extract_with_threshold(strip, threshold)
        .contours
        .iter()
        .filter_map(|c| c.bounding_rect())
        .map(|r| r.long_side())
        .max()
}

/// Resolve the calibration of a reference image
pub fn resolve(
    image: &GrayImage,
    recognizer: &dyn TextRecognizer,
    config: &Config,
) -> Result<Calibration> {
    let strip = calibration_strip(
        image,
        config.calibration_strip_height,
        config.calibration_strip_width,
    );

    let pixel_length = measure_reference_length(&strip, config.calibration_threshold)
        .ok_or_else(|| AreaError::CalibrationUnresolved("no scale bar found".to_string()))?;

    let tokens = recognizer.recognize(&strip)?;
    log::debug!("Scale label tokens: {:?}", tokens);
    let (value, unit) = parse_label(&tokens)?;

    let calibration = Calibration::new(pixel_length as f64, value, &unit)?;
    log::info!(
        "Calibrated: {} {} over {} px ({:.6} {}/px)",
        value,
        unit,
        pixel_length,
        calibration.unit_factor(),
        unit
    );

    Ok(calibration)
}
