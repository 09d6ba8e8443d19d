// src/sinks.rs - Outputs served to callers: rendered buffers and progress updates

use std::path::{Path, PathBuf};
use image::{GrayImage, RgbImage};

use crate::errors::Result;
use crate::image_io::save_rendered;

/// A displayable buffer borrowed from the pipeline state
#[derive(Debug, Clone, Copy)]
pub enum Rendered<'a> {
    Gray(&'a GrayImage),
    Color(&'a RgbImage),
}

impl<'a> Rendered<'a> {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Rendered::Gray(image) => image.dimensions(),
            Rendered::Color(image) => image.dimensions(),
        }
    }

    /// Pack pixels as 0x00RRGGBB words (framebuffer layout)
    pub fn to_rgb_words(&self) -> Vec<u32> {
        match self {
            Rendered::Gray(image) => image
                .pixels()
                .map(|p| {
                    let v = p[0] as u32;
                    (v << 16) | (v << 8) | v
                })
                .collect(),
            Rendered::Color(image) => image
                .pixels()
                .map(|p| ((p[0] as u32) << 16) | ((p[1] as u32) << 8) | p[2] as u32)
                .collect(),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_rendered(self, path)
    }
}

/// Consumer of rendered buffers (window, file, ...)
pub trait RenderSink {
    fn present(&mut self, frame: &Rendered<'_>) -> Result<()>;
}

/// Writes every presented buffer to the same PNG path
pub struct PngSink {
    path: PathBuf,
    pub presented: usize,
}

impl PngSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            presented: 0,
        }
    }
}

impl RenderSink for PngSink {
    fn present(&mut self, frame: &Rendered<'_>) -> Result<()> {
        frame.save(&self.path)?;
        self.presented += 1;
        log::info!("Rendered {}x{} image to {}", frame.dimensions().0, frame.dimensions().1, self.path.display());
        Ok(())
    }
}

/// Receives `(current, max)` progress updates from sweeps and batches
pub trait ProgressSink: Send {
    fn update(&mut self, current: u32, max: u32);
}

impl<F> ProgressSink for F
where
    F: FnMut(u32, u32) + Send,
{
    fn update(&mut self, current: u32, max: u32) {
        self(current, max)
    }
}

/// Discards progress
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&mut self, _current: u32, _max: u32) {}
}

/// Logs progress at every 10% boundary
pub struct LogProgress {
    label: String,
    last_decile: Option<u32>,
}

impl LogProgress {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            last_decile: None,
        }
    }
}

impl ProgressSink for LogProgress {
    fn update(&mut self, current: u32, max: u32) {
        if max == 0 {
            return;
        }
        let decile = (current.min(max) * 10) / max;
        if self.last_decile != Some(decile) {
            self.last_decile = Some(decile);
            log::info!("{}: {}/{} ({}%)", self.label, current, max, decile * 10);
        }
    }
}
