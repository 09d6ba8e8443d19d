// src/batch.rs - Auto-gamma area measurement over a list of image files

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;

use crate::auto_gamma::{search, CancelToken, GammaStrategy, SweepParams};
use crate::calibration::Calibration;
use crate::config::Config;
use crate::contours::extract;
use crate::errors::Result;
use crate::image_io::{load_image, InputImage};
use crate::session::AreaReport;
use crate::sinks::{NoProgress, ProgressSink};
use crate::transform::apply_gamma;

/// Upper end of the batch gamma sweep
pub const BATCH_MAX_GAMMA: f64 = 15.0;
/// Unit column value for uncalibrated rows
pub const UNCALIBRATED_UNIT: &str = "N/A";

/// One output row
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRow {
    pub filename: String,
    pub gamma: f64,
    /// 0 when no contours were found
    pub area_px: f64,
    /// 0 when no calibration is active
    pub area_units: f64,
    pub unit_name: String,
    pub contours_count: usize,
}

/// Item that could not be processed
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub rows: Vec<BatchRow>,
    pub failures: Vec<BatchFailure>,
    pub cancelled: bool,
}

/// How each batch item is searched
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub strategy: GammaStrategy,
    pub params: SweepParams,
    pub use_parallel: bool,
}

impl BatchOptions {
    /// Std-window search over the configured sweep, capped at gamma 15
    pub fn from_config(config: &Config) -> Self {
        let mut params = config.sweep_params();
        params.max_gamma = BATCH_MAX_GAMMA;
        Self {
            strategy: GammaStrategy::StdWindow,
            params,
            use_parallel: config.use_parallel,
        }
    }
}

/// Search, apply gamma, extract and measure one loaded image
pub fn process_image(
    input: &InputImage,
    options: &BatchOptions,
    calibration: Option<&Calibration>,
) -> Result<BatchRow> {
    // Batch items always run to completion; cancellation is checked between items
    let outcome = search(
        &input.image,
        options.strategy,
        &options.params,
        &mut NoProgress,
        &CancelToken::new(),
    )?;

    let processed = apply_gamma(&input.image, outcome.gamma)?;
    let extraction = extract(&processed);
    let report = AreaReport::from_contours(&extraction.contours, calibration);

    log::info!(
        "{}: gamma {:.2}, {} contours, area {} px",
        input.filename,
        outcome.gamma,
        report.contour_count,
        report.area_px
    );

    Ok(BatchRow {
        filename: input.filename.clone(),
        gamma: outcome.gamma,
        area_px: report.area_px.max(0.0),
        area_units: report.area_units.unwrap_or(0.0),
        unit_name: calibration.map_or_else(|| UNCALIBRATED_UNIT.to_string(), |c| c.unit_name.clone()),
        contours_count: report.contour_count,
    })
}

enum ItemResult {
    Row(BatchRow),
    Failed(BatchFailure),
    Skipped,
}

fn process_path(
    path: &Path,
    options: &BatchOptions,
    calibration: Option<&Calibration>,
    cancel: &CancelToken,
) -> ItemResult {
    if cancel.is_cancelled() {
        return ItemResult::Skipped;
    }

    log::info!("Processing: {}", path.display());
    match load_image(path).and_then(|input| process_image(&input, options, calibration)) {
        Ok(row) => ItemResult::Row(row),
        Err(e) => {
            log::warn!("Skipping {}: {}", path.display(), e);
            ItemResult::Failed(BatchFailure {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    }
}

/// Process every path, continuing past failures; rows keep input order
pub fn process_batch(
    paths: &[PathBuf],
    options: &BatchOptions,
    calibration: Option<&Calibration>,
    progress: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> BatchOutcome {
    let total = paths.len() as u32;
    let done = AtomicU32::new(0);
    let progress = Mutex::new(progress);

    let step = |path: &PathBuf| {
        let result = process_path(path, options, calibration, cancel);
        let current = done.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut sink) = progress.lock() {
            sink.update(current, total);
        }
        result
    };

    let results: Vec<ItemResult> = if options.use_parallel {
        paths.par_iter().map(step).collect()
    } else {
        paths.iter().map(step).collect()
    };

    let mut outcome = BatchOutcome::default();
    for result in results {
        match result {
            ItemResult::Row(row) => outcome.rows.push(row),
            ItemResult::Failed(failure) => outcome.failures.push(failure),
            ItemResult::Skipped => outcome.cancelled = true,
        }
    }

    log::info!(
        "Batch finished: {} rows, {} failures{}",
        outcome.rows.len(),
        outcome.failures.len(),
        if outcome.cancelled { " (cancelled)" } else { "" }
    );

    outcome
}
