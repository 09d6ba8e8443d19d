// src/camera/synthetic.rs - Animated test-pattern camera used without hardware

use std::thread;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_circle_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use super::{luma, DeviceInfo};
use crate::errors::{AreaError, Result};

const CHESS_CELL: u32 = 40;
const RING_COUNT: i32 = 9;
const RING_SPACING: i32 = 30;

/// Test image generated by the synthetic camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SyntheticPattern {
    /// Chessboard with a moving, pulsing square
    Chessboard,
    /// Drifting sinusoidal intensity field
    Gradient,
    /// Concentric rings around a wandering center
    Circles,
    /// Scrolling color bars converted to gray
    Bars,
}

/// Camera producing paced synthetic frames
pub struct SyntheticCamera {
    info: DeviceInfo,
    width: u32,
    height: u32,
    frame_interval: Duration,
    pattern: SyntheticPattern,
    frame_count: u64,
    next_frame_at: Option<Instant>,
}

impl SyntheticCamera {
    pub fn new(info: DeviceInfo, width: u32, height: u32, fps: u32, pattern: SyntheticPattern) -> Self {
        Self {
            info,
            width,
            height,
            frame_interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            pattern,
            frame_count: 0,
            next_frame_at: None,
        }
    }

    /// The three emulated devices
    pub fn devices() -> Vec<DeviceInfo> {
        (0..3)
            .map(|index| DeviceInfo {
                index,
                model: format!("Mock-Camera-{}000", index + 1),
                vendor: "Hikrobot-Emulator".to_string(),
                serial_number: format!("MOCK{:03}", index + 1),
            })
            .collect()
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn pattern(&self) -> SyntheticPattern {
        self.pattern
    }

    pub fn set_pattern(&mut self, pattern: SyntheticPattern) {
        self.pattern = pattern;
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Reset frame pacing (animation continues where it stopped)
    pub fn restart(&mut self) {
        self.next_frame_at = None;
    }

    /// Wait for the next frame slot, then render it
    pub fn grab(&mut self, timeout: Duration) -> Result<GrayImage> {
        let now = Instant::now();
        if let Some(due) = self.next_frame_at {
            if due > now {
                let wait = due - now;
                if wait > timeout {
                    thread::sleep(timeout);
                    return Err(AreaError::CameraTimeout);
                }
                thread::sleep(wait);
            }
        }
        let slot_start = self.next_frame_at.map_or(now, |due| due.max(now));
        self.next_frame_at = Some(slot_start + self.frame_interval);

        let frame = self.render();
        self.frame_count += 1;
        Ok(frame)
    }

    /// Render the current frame without pacing
    pub fn render(&self) -> GrayImage {
        let t = self.frame_count as f64;
        match self.pattern {
            SyntheticPattern::Chessboard => self.chessboard(t),
            SyntheticPattern::Gradient => self.gradient(t),
            SyntheticPattern::Circles => self.circles(t),
            SyntheticPattern::Bars => self.bars(t),
        }
    }

    fn chessboard(&self, t: f64) -> GrayImage {
        let mut image = GrayImage::from_fn(self.width, self.height, |x, y| {
            let white = (x / CHESS_CELL + y / CHESS_CELL) % 2 == 0;
            Luma([if white { 255 } else { 0 }])
        });

        let size = (20.0 + 15.0 * (t * 0.1).sin()) as u32 + 1;
        let x = self.width as i32 / 2 + (100.0 * (t * 0.05).sin()) as i32;
        let y = self.height as i32 / 2 + (80.0 * (t * 0.05).cos()) as i32;
        draw_filled_rect_mut(&mut image, Rect::at(x, y).of_size(size, size), Luma([128]));
        image
    }

    fn gradient(&self, t: f64) -> GrayImage {
        let phase = t * 0.02;
        let x_scale = 255.0 / (self.width.max(2) - 1) as f64;
        let y_scale = 255.0 / (self.height.max(2) - 1) as f64;

        GrayImage::from_fn(self.width, self.height, |x, y| {
            let u = x as f64 * x_scale * 0.01 + phase;
            let v = y as f64 * y_scale * 0.01 + phase;
            Luma([(128.0 + 127.0 * u.sin() * v.cos()) as u8])
        })
    }

    fn circles(&self, t: f64) -> GrayImage {
        let mut image = GrayImage::new(self.width, self.height);
        let cx = self.width as i32 / 2 + (50.0 * (t * 0.03).sin()) as i32;
        let cy = self.height as i32 / 2 + (50.0 * (t * 0.03).cos()) as i32;

        for ring in 1..=RING_COUNT {
            let color = Luma([if ring % 2 == 0 { 255 } else { 128 }]);
            let radius = ring * RING_SPACING;
            // Three-pixel stroke
            for r in radius - 1..=radius + 1 {
                draw_hollow_circle_mut(&mut image, (cx, cy), r, color);
            }
        }
        image
    }

    fn bars(&self, t: f64) -> GrayImage {
        const COLORS: [[u8; 3]; 8] = [
            [255, 0, 0],
            [0, 255, 0],
            [0, 0, 255],
            [255, 255, 0],
            [255, 0, 255],
            [0, 255, 255],
            [255, 255, 255],
            [0, 0, 0],
        ];
        let bar_width = (self.width / COLORS.len() as u32).max(1);
        let shift = (t as u64 * 2 % bar_width as u64) as u32;

        GrayImage::from_fn(self.width, self.height, |x, _| {
            let bar = ((x + shift) / bar_width) as usize;
            match COLORS.get(bar) {
                Some(color) => Luma([luma(*color)]),
                None => Luma([0]),
            }
        })
    }
}
