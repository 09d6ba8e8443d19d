// src/auto_gamma.rs - Automatic gamma selection over the area-vs-gamma curve
//
// All sweep-based strategies share one scaffold: for each gamma on a fixed grid,
// apply the gamma lookup table, extract external contours and record the total area.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::ValueEnum;
use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::contours::extract;
use crate::errors::Result;
use crate::sinks::ProgressSink;
use crate::transform::{apply_gamma, histogram};

/// Lower bound of the closed-form percentile estimate
pub const PERCENTILE_GAMMA_MIN: f64 = 0.5;
/// Upper bound of the closed-form percentile estimate
pub const PERCENTILE_GAMMA_MAX: f64 = 10.0;
/// Keeps `ln` away from 0 and 1 for degenerate images
const LOG_EPSILON: f64 = 1e-6;

/// Selectable auto-gamma algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GammaStrategy {
    /// Closed form from the brightest samples, no sweep
    Percentile,
    /// DEPRECATED: first sudden area collapse along the sweep
    Ratio,
    /// Window of maximum area deviation along the full sweep
    #[serde(rename = "std")]
    #[value(name = "std")]
    StdWindow,
}

/// Parameters shared by the three strategies
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepParams {
    pub min_gamma: f64,
    pub max_gamma: f64,
    pub step: f64,
    pub window: usize,
    pub ratio_coefficient: f64,
    pub top_percent: f64,
    pub target: f64,
}

impl Default for SweepParams {
    fn default() -> Self {
        Self {
            min_gamma: 1.0,
            max_gamma: 10.0,
            step: 0.1,
            window: 5,
            ratio_coefficient: 20.0,
            top_percent: 0.001,
            target: 0.6,
        }
    }
}

impl SweepParams {
    /// Gamma values visited by a sweep: `min + k * step` up to and including `max`
    pub fn gammas(&self) -> Vec<f64> {
        if self.step <= 0.0 || self.max_gamma < self.min_gamma {
            return vec![self.min_gamma];
        }
        let steps = ((self.max_gamma - self.min_gamma) / self.step + 1e-9).floor() as usize;
        (0..=steps).map(|k| self.min_gamma + k as f64 * self.step).collect()
    }
}

/// Cooperative cancellation flag shared with a running search or batch
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Chosen gamma plus how the search ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOutcome {
    pub gamma: f64,
    pub cancelled: bool,
    /// Number of gamma steps that were evaluated
    pub evaluated: usize,
}

/// Area-vs-gamma samples collected by a sweep
#[derive(Debug, Clone, Default)]
pub struct Sweep {
    pub gammas: Vec<f64>,
    pub areas: Vec<f64>,
    pub cancelled: bool,
}

/// Total contour area after applying `gamma`; no contours counts as zero area
pub fn area_at_gamma(image: &GrayImage, gamma: f64) -> Result<f64> {
    let processed = apply_gamma(image, gamma)?;
    let extraction = extract(&processed);
    if extraction.contours.is_empty() {
        Ok(0.0)
    } else {
        Ok(extraction.total_area())
    }
}

fn percent(done: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total).min(100) as u32
}

/// Walk the sweep, calling `visit` with each (gamma, area) until it returns false
fn walk_sweep<F>(
    image: &GrayImage,
    params: &SweepParams,
    progress: &mut dyn ProgressSink,
    cancel: &CancelToken,
    mut visit: F,
) -> Result<bool>
where
    F: FnMut(f64, f64) -> bool,
{
    let gammas = params.gammas();
    let total = gammas.len();

    for (k, gamma) in gammas.into_iter().enumerate() {
        if cancel.is_cancelled() {
            log::info!("Gamma sweep cancelled at gamma {:.2}", gamma);
            return Ok(true);
        }

        let area = area_at_gamma(image, gamma)?;
        log::debug!("Sweep gamma {:.2}: area {:.1} px", gamma, area);
        progress.update(percent(k + 1, total), 100);

        if !visit(gamma, area) {
            break;
        }
    }

    Ok(false)
}

/// Collect the full area-vs-gamma curve
pub fn area_sweep(
    image: &GrayImage,
    params: &SweepParams,
    progress: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<Sweep> {
    let mut sweep = Sweep::default();
    sweep.cancelled = walk_sweep(image, params, progress, cancel, |gamma, area| {
        sweep.gammas.push(gamma);
        sweep.areas.push(area);
        true
    })?;
    Ok(sweep)
}

/// Gamma that maps the average of the brightest `top_percent` samples onto `target`.
///
/// Solves `bright_avg^gamma = target` and clamps into [0.5, 10.0].
pub fn gamma_from_high_percentile(image: &GrayImage, top_percent: f64, target: f64) -> f64 {
    let histogram = histogram(image);

    let total = image.width() as u64 * image.height() as u64;
    let top_k = ((total as f64 * top_percent) as u64).max(1);

    // Take the top_k brightest samples straight from the histogram
    let mut remaining = top_k;
    let mut sum = 0.0;
    for level in (0..256).rev() {
        if remaining == 0 {
            break;
        }
        let take = histogram[level].min(remaining);
        sum += take as f64 * (level as f64 / 255.0);
        remaining -= take;
    }
    let taken = top_k - remaining;
    let bright_avg = if taken == 0 { 0.0 } else { sum / taken as f64 };

    let bright_avg = bright_avg.clamp(LOG_EPSILON, 1.0 - LOG_EPSILON);
    let target = target.clamp(LOG_EPSILON, 1.0 - LOG_EPSILON);
    let gamma = target.ln() / bright_avg.ln();

    log::debug!("Percentile gamma: bright_avg {:.4}, raw gamma {:.4}", bright_avg, gamma);

    if gamma.is_finite() {
        gamma.clamp(PERCENTILE_GAMMA_MIN, PERCENTILE_GAMMA_MAX)
    } else {
        PERCENTILE_GAMMA_MAX
    }
}

/// True when the area fell by more than `coefficient` times between two steps.
///
/// A zero current or previous area never counts as a collapse.
pub fn is_area_collapse(prev_area: f64, current_area: f64, coefficient: f64) -> bool {
    if current_area <= 0.0 || prev_area <= 0.0 {
        return false;
    }
    prev_area / current_area > coefficient
}

/// Step-by-step collapse check of the ratio scan.
///
/// Empty steps are skipped and keep the previous non-empty area.
#[derive(Debug, Clone, Copy)]
pub struct CollapseDetector {
    coefficient: f64,
    prev_area: Option<f64>,
}

impl CollapseDetector {
    pub fn new(coefficient: f64) -> Self {
        Self {
            coefficient,
            prev_area: None,
        }
    }

    /// Feed the next step's area; true when it collapsed against the previous one
    pub fn observe(&mut self, area: f64) -> bool {
        if area <= 0.0 {
            return false;
        }
        if let Some(prev) = self.prev_area {
            if is_area_collapse(prev, area, self.coefficient) {
                return true;
            }
        }
        self.prev_area = Some(area);
        false
    }
}

/// DEPRECATED ratio-threshold scan: stops at the first sudden area collapse.
///
/// Returns `gamma + step` at the collapse, `min_gamma` if none occurs or on cancel.
pub fn ratio_threshold_scan(
    image: &GrayImage,
    params: &SweepParams,
    progress: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<SearchOutcome> {
    let mut detector = CollapseDetector::new(params.ratio_coefficient);
    let mut found = None;
    let mut evaluated = 0;

    let cancelled = walk_sweep(image, params, progress, cancel, |gamma, area| {
        evaluated += 1;
        if detector.observe(area) {
            found = Some(gamma + params.step);
            return false;
        }
        true
    })?;

    let gamma = match (cancelled, found) {
        (false, Some(gamma)) => gamma,
        _ => params.min_gamma,
    };

    Ok(SearchOutcome {
        gamma,
        cancelled,
        evaluated,
    })
}

/// Population standard deviation
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Start index of the window with the largest population standard deviation.
///
/// `None` when there are fewer samples than the window; ties keep the earliest window.
pub fn max_std_window_start(areas: &[f64], window: usize) -> Option<usize> {
    if window == 0 || areas.len() < window {
        return None;
    }

    let mut best: Option<(usize, f64)> = None;
    for (start, slice) in areas.windows(window).enumerate() {
        let deviation = population_std(slice);
        match best {
            Some((_, best_deviation)) if deviation <= best_deviation => {}
            _ => best = Some((start, deviation)),
        }
    }

    best.map(|(start, _)| start)
}

/// Std-deviation-window scan over the full sweep (the default strategy).
///
/// Returns `min_gamma + step * (start + window)` for the most unstable window.
pub fn std_window_scan(
    image: &GrayImage,
    params: &SweepParams,
    progress: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<SearchOutcome> {
    let sweep = area_sweep(image, params, progress, cancel)?;

    let gamma = match max_std_window_start(&sweep.areas, params.window) {
        Some(start) => params.min_gamma + params.step * (start + params.window) as f64,
        None => params.min_gamma,
    };

    Ok(SearchOutcome {
        gamma,
        cancelled: sweep.cancelled,
        evaluated: sweep.areas.len(),
    })
}

/// Run the selected strategy on `image`
pub fn search(
    image: &GrayImage,
    strategy: GammaStrategy,
    params: &SweepParams,
    progress: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<SearchOutcome> {
    let outcome = match strategy {
        GammaStrategy::Percentile => {
            let gamma = gamma_from_high_percentile(image, params.top_percent, params.target);
            progress.update(100, 100);
            SearchOutcome {
                gamma,
                cancelled: false,
                evaluated: 0,
            }
        }
        GammaStrategy::Ratio => ratio_threshold_scan(image, params, progress, cancel)?,
        GammaStrategy::StdWindow => std_window_scan(image, params, progress, cancel)?,
    };

    log::info!(
        "Auto gamma ({:?}): {:.2} after {} steps{}",
        strategy,
        outcome.gamma,
        outcome.evaluated,
        if outcome.cancelled { " (cancelled)" } else { "" }
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::NoProgress;
    use assert_approx_eq::assert_approx_eq;
    use image::Luma;

    /// Soft blob: intensity falls off with distance, so higher gamma shrinks the object
    fn soft_blob() -> GrayImage {
        GrayImage::from_fn(48, 48, |x, y| {
            let dx = x as f64 - 24.0;
            let dy = y as f64 - 24.0;
            let d = (dx * dx + dy * dy).sqrt();
            Luma([(250.0 - d * 9.0).max(20.0) as u8])
        })
    }

    #[test]
    fn sweep_grid_is_index_based() {
        let params = SweepParams { min_gamma: 1.0, max_gamma: 15.0, ..SweepParams::default() };
        let gammas = params.gammas();
        assert_eq!(gammas.len(), 141);
        assert_approx_eq!(gammas[0], 1.0);
        assert_approx_eq!(gammas[140], 15.0);
    }

    #[test]
    fn percentile_gamma_is_always_in_range() {
        for value in [0u8, 1, 50, 128, 254, 255] {
            let image = GrayImage::from_pixel(20, 20, Luma([value]));
            let gamma = gamma_from_high_percentile(&image, 0.001, 0.6);
            assert!(gamma.is_finite());
            assert!((PERCENTILE_GAMMA_MIN..=PERCENTILE_GAMMA_MAX).contains(&gamma), "gamma {} for {}", gamma, value);
        }
        assert_eq!(gamma_from_high_percentile(&GrayImage::new(10, 10), 0.001, 0.6), PERCENTILE_GAMMA_MIN);
        assert_eq!(gamma_from_high_percentile(&GrayImage::from_pixel(10, 10, Luma([255])), 0.001, 0.6), PERCENTILE_GAMMA_MAX);
    }

    #[test]
    fn percentile_gamma_solves_for_target() {
        // Brightest samples at 204/255 = 0.8
        let mut image = GrayImage::from_pixel(100, 10, Luma([40]));
        image.put_pixel(0, 0, Luma([204]));
        let gamma = gamma_from_high_percentile(&image, 0.001, 0.6);
        assert_approx_eq!(gamma, 0.6f64.ln() / 0.8f64.ln(), 1e-9);
    }

    #[test]
    fn population_std_matches_definition() {
        assert_approx_eq!(population_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.0);
        assert_eq!(population_std(&[]), 0.0);
    }

    #[test]
    fn max_std_window_prefers_transition() {
        let areas = [100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 90.0, 10.0, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(max_std_window_start(&areas, 5), Some(3));
        assert_eq!(max_std_window_start(&areas[..3], 5), None);
        // Flat curve: every window ties, the first one wins
        assert_eq!(max_std_window_start(&[5.0; 8], 5), Some(0));
    }

    #[test]
    fn collapse_detection_guards_zero() {
        assert!(is_area_collapse(2100.0, 100.0, 20.0));
        assert!(!is_area_collapse(2000.0, 100.0, 20.0));
        assert!(!is_area_collapse(500.0, 0.0, 20.0));
        assert!(!is_area_collapse(0.0, 10.0, 20.0));
    }

    /// Large mid-gray region plus a small bright square. Once gamma darkens the
    /// large region enough, Otsu separates only the bright square.
    fn two_level_scene() -> GrayImage {
        GrayImage::from_fn(100, 100, |x, y| {
            let small = (60..70).contains(&x) && (70..80).contains(&y);
            let large = (5..85).contains(&x) && (5..55).contains(&y);
            Luma([if small { 255 } else if large { 200 } else { 0 }])
        })
    }

    #[test]
    fn empty_steps_keep_the_previous_area() {
        let mut detector = CollapseDetector::new(20.0);
        assert!(!detector.observe(500.0));
        assert!(!detector.observe(0.0));
        // Compared against 500, not against the empty step
        assert!(detector.observe(10.0));

        let mut detector = CollapseDetector::new(20.0);
        assert!(!detector.observe(500.0));
        assert!(!detector.observe(400.0));
        assert!(!detector.observe(0.0));
        assert!(!detector.observe(25.0));
        assert!(detector.observe(1.0));
    }

    #[test]
    fn ratio_scan_stops_one_step_after_collapse() {
        let image = two_level_scene();
        assert_eq!(area_at_gamma(&image, 7.3).unwrap(), 79.0 * 49.0 + 9.0 * 9.0);
        assert_eq!(area_at_gamma(&image, 7.4).unwrap(), 9.0 * 9.0);

        let params = SweepParams::default();
        let outcome = ratio_threshold_scan(&image, &params, &mut NoProgress, &CancelToken::new()).unwrap();
        assert!(!outcome.cancelled);
        assert_eq!(outcome.evaluated, 65);
        assert_approx_eq!(outcome.gamma, 7.5, 1e-9);
    }

    #[test]
    fn std_scan_returns_gamma_past_the_widest_window() {
        let params = SweepParams { min_gamma: 1.0, max_gamma: 3.0, ..SweepParams::default() };
        let sweep = area_sweep(&soft_blob(), &params, &mut NoProgress, &CancelToken::new()).unwrap();
        assert_eq!(max_std_window_start(&sweep.areas, params.window), Some(3));

        let outcome = std_window_scan(&soft_blob(), &params, &mut NoProgress, &CancelToken::new()).unwrap();
        assert_approx_eq!(outcome.gamma, 1.0 + 0.1 * (3 + 5) as f64, 1e-9);
    }

    #[test]
    fn ratio_scan_without_collapse_returns_min_gamma() {
        let params = SweepParams { min_gamma: 1.0, max_gamma: 2.0, ..SweepParams::default() };
        let outcome = ratio_threshold_scan(&GrayImage::new(16, 16), &params, &mut NoProgress, &CancelToken::new()).unwrap();
        assert_eq!(outcome.gamma, 1.0);
        assert!(outcome.gamma.is_finite());
        assert_eq!(outcome.evaluated, 11);
    }

    #[test]
    fn std_scan_reports_progress_up_to_100() {
        let params = SweepParams { min_gamma: 1.0, max_gamma: 3.0, ..SweepParams::default() };
        let mut updates = Vec::new();
        let outcome = {
            let mut progress = |current: u32, max: u32| updates.push((current, max));
            std_window_scan(&soft_blob(), &params, &mut progress, &CancelToken::new()).unwrap()
        };

        assert_eq!(outcome.evaluated, 21);
        assert_eq!(updates.len(), 21);
        assert_eq!(updates.last(), Some(&(100, 100)));
        assert!(updates.windows(2).all(|w| w[0].0 <= w[1].0));
        assert!(outcome.gamma >= 1.0 + 0.1 * 5.0 - 1e-9);
        assert!(outcome.gamma <= 3.0 + 0.1 * 5.0 + 1e-9);
    }

    #[test]
    fn cancelled_search_falls_back() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let params = SweepParams::default();

        let std = std_window_scan(&soft_blob(), &params, &mut NoProgress, &cancel).unwrap();
        assert!(std.cancelled);
        assert_eq!(std.evaluated, 0);
        assert_eq!(std.gamma, params.min_gamma);

        let ratio = ratio_threshold_scan(&soft_blob(), &params, &mut NoProgress, &cancel).unwrap();
        assert!(ratio.cancelled);
        assert_eq!(ratio.gamma, params.min_gamma);
    }

    #[test]
    fn blob_area_shrinks_with_gamma() {
        let image = soft_blob();
        let low = area_at_gamma(&image, 1.0).unwrap();
        let high = area_at_gamma(&image, 8.0).unwrap();
        assert!(low > 0.0);
        assert!(high <= low);
    }

    #[test]
    fn percentile_strategy_reports_completion() {
        let mut last = None;
        let outcome = {
            let mut progress = |current: u32, max: u32| last = Some((current, max));
            search(&soft_blob(), GammaStrategy::Percentile, &SweepParams::default(), &mut progress, &CancelToken::new()).unwrap()
        };
        assert_eq!(last, Some((100, 100)));
        assert!((0.5..=10.0).contains(&outcome.gamma));
    }
}
