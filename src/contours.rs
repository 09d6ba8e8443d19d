// src/contours.rs - Otsu binarization, external contour extraction, area and overlay rendering

use bresenham::Bresenham;
use image::{imageops, GrayImage, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};

use crate::transform::{histogram, in_bounds};

/// Area reported when no contours are available (extraction not run, or nothing found)
pub const NOT_EXTRACTED: f64 = -1.0;

/// Closed boundary of one connected foreground region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contour {
    pub points: Vec<(i32, i32)>,
}

/// Axis-aligned bounding rectangle in pixel units (inclusive extents)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingRect {
    pub fn long_side(&self) -> u32 {
        self.width.max(self.height)
    }
}

impl Contour {
    pub fn new(points: Vec<(i32, i32)>) -> Self {
        Self { points }
    }

    /// Polygon area (shoelace formula) of the closed point sequence, in px²
    pub fn area(&self) -> f64 {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }

        let mut twice_area: i64 = 0;
        for i in 0..n {
            let (x0, y0) = self.points[i];
            let (x1, y1) = self.points[(i + 1) % n];
            twice_area += x0 as i64 * y1 as i64 - x1 as i64 * y0 as i64;
        }

        twice_area.abs() as f64 / 2.0
    }

    pub fn bounding_rect(&self) -> Option<BoundingRect> {
        let (first_x, first_y) = *self.points.first()?;
        let (mut min_x, mut max_x, mut min_y, mut max_y) = (first_x, first_x, first_y, first_y);

        for &(x, y) in &self.points[1..] {
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }

        Some(BoundingRect {
            x: min_x,
            y: min_y,
            width: (max_x - min_x + 1) as u32,
            height: (max_y - min_y + 1) as u32,
        })
    }
}

/// Result of one extraction pass
#[derive(Debug, Clone)]
pub struct Extraction {
    pub contours: Vec<Contour>,
    pub mask: GrayImage,
    /// Cutoff used for binarization (samples above it are foreground)
    pub threshold: u8,
}

impl Extraction {
    pub fn total_area(&self) -> f64 {
        total_area(&self.contours)
    }
}

/// Otsu's threshold: the cutoff maximizing between-class variance of the histogram.
///
/// Samples at or below the returned level form the background class. Counts are
/// kept in `u64`, so any image size is safe.
pub fn otsu_threshold(image: &GrayImage) -> u8 {
    let histogram = histogram(image);
    let total: u64 = histogram.iter().sum();
    let total_sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &count)| level as f64 * count as f64)
        .sum();

    let mut background_weight = 0u64;
    let mut background_sum = 0f64;
    let mut largest_variance = 0f64;
    let mut best_level = 0u8;

    for (level, &count) in histogram.iter().enumerate() {
        background_weight += count;
        if background_weight == 0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0 {
            break;
        }

        background_sum += level as f64 * count as f64;
        let background_mean = background_sum / background_weight as f64;
        let foreground_mean = (total_sum - background_sum) / foreground_weight as f64;

        let variance = background_weight as f64
            * foreground_weight as f64
            * (background_mean - foreground_mean).powi(2);
        if variance > largest_variance {
            largest_variance = variance;
            best_level = level as u8;
        }
    }

    best_level
}

/// Binarize: samples strictly above `level` become 255, the rest 0
pub fn binarize(image: &GrayImage, level: u8) -> GrayImage {
    let mut mask = image.clone();
    for pixel in mask.pixels_mut() {
        pixel.0[0] = if pixel.0[0] > level { 255 } else { 0 };
    }
    mask
}

/// Outermost contours of a binary mask, holes and everything nested in them excluded
pub fn external_contours(mask: &GrayImage) -> Vec<Contour> {
    // Border following only starts an outer border after a background pixel,
    // so regions on the image edge need a ring of background around the mask
    let (width, height) = mask.dimensions();
    let mut padded = GrayImage::new(width + 2, height + 2);
    imageops::replace(&mut padded, mask, 1, 1);

    find_contours::<i32>(&padded)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| {
            let points: Vec<(i32, i32)> = c.points.iter().map(|p| (p.x - 1, p.y - 1)).collect();
            Contour::new(compress_collinear(&points))
        })
        .collect()
}

/// Drop points lying inside straight runs of a closed boundary, keeping run endpoints
pub fn compress_collinear(points: &[(i32, i32)]) -> Vec<(i32, i32)> {
    let mut deduped: Vec<(i32, i32)> = Vec::with_capacity(points.len());
    for &p in points {
        if deduped.last() != Some(&p) {
            deduped.push(p);
        }
    }
    while deduped.len() > 1 && deduped.first() == deduped.last() {
        deduped.pop();
    }

    let n = deduped.len();
    if n < 3 {
        return deduped;
    }

    let step = |a: (i32, i32), b: (i32, i32)| ((b.0 - a.0).signum(), (b.1 - a.1).signum());

    let compressed: Vec<(i32, i32)> = (0..n)
        .filter(|&i| {
            let prev = deduped[(i + n - 1) % n];
            let current = deduped[i];
            let next = deduped[(i + 1) % n];
            step(prev, current) != step(current, next)
        })
        .map(|i| deduped[i])
        .collect();

    if compressed.is_empty() {
        vec![deduped[0]]
    } else {
        compressed
    }
}

/// Binarize with Otsu's threshold and extract the external contours
pub fn extract(image: &GrayImage) -> Extraction {
    let threshold = otsu_threshold(image);
    extract_with_threshold(image, threshold)
}

/// Binarize at a fixed cutoff and extract the external contours
pub fn extract_with_threshold(image: &GrayImage, threshold: u8) -> Extraction {
    let mask = binarize(image, threshold);
    let contours = external_contours(&mask);

    log::debug!("Extracted {} external contours (threshold {})", contours.len(), threshold);

    Extraction {
        contours,
        mask,
        threshold,
    }
}

/// Sum of contour areas in px², or [`NOT_EXTRACTED`] when there are no contours
pub fn total_area(contours: &[Contour]) -> f64 {
    if contours.is_empty() {
        return NOT_EXTRACTED;
    }
    contours.iter().map(Contour::area).sum()
}

/// Expand a grayscale buffer to three channels
pub fn gray_to_rgb(image: &GrayImage) -> RgbImage {
    let (width, height) = image.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let v = image.get_pixel(x, y)[0];
        Rgb([v, v, v])
    })
}

/// Draw contour outlines (not filled) over a color copy of `base`
pub fn render_overlay(
    base: &GrayImage,
    contours: &[Contour],
    color: [u8; 3],
    stroke_width: u32,
) -> RgbImage {
    let mut overlay = gray_to_rgb(base);
    let stroke = stroke_width.max(1) as i64;
    let brush_start = -(stroke - 1) / 2;
    let brush_end = brush_start + stroke;

    for contour in contours {
        let n = contour.points.len();
        for i in 0..n {
            let (x0, y0) = contour.points[i];
            let (x1, y1) = contour.points[(i + 1) % n];

            // Bresenham skips the end point; it is the start of the next segment
            let mut line: Vec<(isize, isize)> =
                Bresenham::new((x0 as isize, y0 as isize), (x1 as isize, y1 as isize)).collect();
            if line.is_empty() {
                line.push((x0 as isize, y0 as isize));
            }

            for (px, py) in line {
                for dy in brush_start..brush_end {
                    for dx in brush_start..brush_end {
                        let sx = px as i64 + dx;
                        let sy = py as i64 + dy;
                        if in_bounds(sx, sy, overlay.width(), overlay.height()) {
                            overlay.put_pixel(sx as u32, sy as u32, Rgb(color));
                        }
                    }
                }
            }
        }
    }

    overlay
}
