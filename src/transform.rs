// src/transform.rs - Per-pixel intensity transforms (gamma lookup table, bright-region stretch)

use image::GrayImage;

use crate::errors::{AreaError, Result};

/// Number of entries in an 8-bit lookup table
const LUT_SIZE: usize = 256;

/// Build the gamma lookup table: `table[i] = round(255 * (i / 255)^gamma)`
pub fn gamma_table(gamma: f64) -> Result<[u8; LUT_SIZE]> {
    if !gamma.is_finite() || gamma <= 0.0 {
        return Err(AreaError::InvalidGamma(gamma));
    }

    let mut table = [0u8; LUT_SIZE];
    for (i, entry) in table.iter_mut().enumerate() {
        let normalized = i as f64 / 255.0;
        *entry = (255.0 * normalized.powf(gamma)).round().clamp(0.0, 255.0) as u8;
    }

    Ok(table)
}

/// Map every sample of `image` through a lookup table into a new buffer
pub fn apply_lut(image: &GrayImage, table: &[u8; LUT_SIZE]) -> GrayImage {
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        pixel.0[0] = table[pixel.0[0] as usize];
    }
    output
}

/// Apply gamma correction to a grayscale image
pub fn apply_gamma(image: &GrayImage, gamma: f64) -> Result<GrayImage> {
    let table = gamma_table(gamma)?;
    Ok(apply_lut(image, &table))
}

/// Contrast-stretch the band above `threshold` (normalized) onto the full range.
///
/// Samples at or below the threshold become 0, the brightest sample stays 255.
pub fn stretch_bright_region(image: &GrayImage, threshold: f64) -> Result<GrayImage> {
    if !(0.0..1.0).contains(&threshold) {
        return Err(AreaError::InvalidThreshold(threshold));
    }

    let mut table = [0u8; LUT_SIZE];
    for (i, entry) in table.iter_mut().enumerate() {
        let normalized = i as f64 / 255.0;
        let stretched = ((normalized - threshold) / (1.0 - threshold)).clamp(0.0, 1.0);
        *entry = (stretched * 255.0).round() as u8;
    }

    Ok(apply_lut(image, &table))
}

/// Sample count per intensity level
pub fn histogram(image: &GrayImage) -> [u64; LUT_SIZE] {
    let mut counts = [0u64; LUT_SIZE];
    for pixel in image.pixels() {
        counts[pixel.0[0] as usize] += 1;
    }
    counts
}

/// Check if a point is inside the image bounds
#[inline]
pub fn in_bounds(x: i64, y: i64, width: u32, height: u32) -> bool {
    x >= 0 && y >= 0 && x < width as i64 && y < height as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn ramp() -> GrayImage {
        GrayImage::from_fn(256, 1, |x, _| Luma([x as u8]))
    }

    #[test]
    fn identity_gamma_maps_every_level_to_itself() {
        let table = gamma_table(1.0).unwrap();
        for (i, value) in table.iter().enumerate() {
            assert_eq!(*value as usize, i);
        }

        let image = ramp();
        assert_eq!(apply_gamma(&image, 1.0).unwrap(), image);
    }

    #[test]
    fn table_entries_do_not_increase_with_gamma() {
        let gammas = [0.5, 1.0, 1.7, 2.2, 4.0, 10.0, 15.0];
        for pair in gammas.windows(2) {
            let low = gamma_table(pair[0]).unwrap();
            let high = gamma_table(pair[1]).unwrap();
            for i in 1..255 {
                assert!(high[i] <= low[i], "entry {} increased from gamma {} to {}", i, pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn endpoints_are_fixed() {
        let table = gamma_table(3.3).unwrap();
        assert_eq!(table[0], 0);
        assert_eq!(table[255], 255);
    }

    #[test]
    fn non_positive_gamma_is_rejected() {
        assert!(matches!(gamma_table(0.0), Err(AreaError::InvalidGamma(_))));
        assert!(matches!(gamma_table(-1.0), Err(AreaError::InvalidGamma(_))));
        assert!(gamma_table(f64::NAN).is_err());
    }

    #[test]
    fn stretch_clamps_below_threshold_and_rescales_above() {
        let threshold = 0.5;
        let stretched = stretch_bright_region(&ramp(), threshold).unwrap();

        for x in 0..256u32 {
            let input = x as f64 / 255.0;
            let output = stretched.get_pixel(x, 0)[0];
            if input <= threshold {
                assert_eq!(output, 0, "level {} should be clamped", x);
            } else {
                let expected = ((input - threshold) / (1.0 - threshold) * 255.0).round() as u8;
                assert_eq!(output, expected);
            }
        }
        assert_eq!(stretched.get_pixel(255, 0)[0], 255);
    }

    #[test]
    fn stretch_rejects_threshold_outside_unit_interval() {
        assert!(matches!(stretch_bright_region(&ramp(), 1.0), Err(AreaError::InvalidThreshold(_))));
        assert!(stretch_bright_region(&ramp(), -0.1).is_err());
    }

    #[test]
    fn transforms_leave_source_untouched() {
        let image = ramp();
        let copy = image.clone();
        let _ = apply_gamma(&image, 2.0).unwrap();
        let _ = stretch_bright_region(&image, 0.3).unwrap();
        assert_eq!(image, copy);
    }
}
