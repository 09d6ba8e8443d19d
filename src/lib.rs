// src/lib.rs - Library interface for gamma-driven object area measurement

pub mod auto_gamma;
pub mod batch;
pub mod calibration;
pub mod camera;
pub mod config;
pub mod contours;
pub mod controller;
pub mod errors;
pub mod image_io;
pub mod output;
pub mod session;
pub mod sinks;
pub mod transform;
#[cfg(feature = "viewer")]
pub mod viewer;

// Re-export commonly used types and functions
pub use errors::{AreaError, Result};
pub use config::Config;
pub use image_io::{InputImage, load_image, get_image_files_in_dir, save_rendered};
pub use transform::{apply_gamma, stretch_bright_region};
pub use contours::{extract, total_area, render_overlay, Contour, Extraction, NOT_EXTRACTED};
pub use auto_gamma::{
    gamma_from_high_percentile,
    ratio_threshold_scan,
    std_window_scan,
    search,
    CancelToken,
    GammaStrategy,
    SearchOutcome,
    SweepParams,
};
pub use calibration::{resolve, Calibration, CommandRecognizer, LabelText, TextRecognizer};
pub use session::{AreaReport, PipelineState, RenderMode, SessionOptions, Stage};
pub use batch::{process_batch, BatchOptions, BatchOutcome, BatchRow};
pub use output::write_batch_csv;
pub use camera::{FrameSource, DeviceInfo, FrameGrabber, SyntheticPattern};
pub use controller::Controller;
pub use sinks::{LogProgress, NoProgress, PngSink, ProgressSink, RenderSink, Rendered};
