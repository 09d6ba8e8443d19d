use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use clap::{Parser, ValueEnum};

use gamma_area_lib::auto_gamma::{CancelToken, GammaStrategy};
use gamma_area_lib::batch::{process_batch, BatchOptions};
use gamma_area_lib::calibration::{CommandRecognizer, LabelText, TextRecognizer};
use gamma_area_lib::camera::FrameSource;
use gamma_area_lib::config::Config;
use gamma_area_lib::controller::{Background, Controller};
use gamma_area_lib::errors::{AreaError, Result};
use gamma_area_lib::image_io::get_image_files_in_dir;
use gamma_area_lib::output::write_batch_csv;
use gamma_area_lib::session::PipelineState;
use gamma_area_lib::sinks::{LogProgress, PngSink, ProgressSink, RenderSink};

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "Gamma-driven object area measurement")]
struct Args {
    /// Image file, or directory of images for batch processing
    #[clap(short, long)]
    input: Option<String>,

    /// Batch results CSV
    #[clap(short, long)]
    output: Option<String>,

    /// Path to configuration file
    #[clap(short, long, default_value = "config.toml")]
    config: String,

    /// Manual gamma
    #[clap(short, long)]
    gamma: Option<f64>,

    /// Pick gamma automatically
    #[clap(short, long, value_enum)]
    auto: Option<GammaStrategy>,

    /// Bright-region stretch instead of gamma (threshold defaults to the config value)
    #[clap(long, num_args = 0..=1)]
    stretch: Option<Option<f64>>,

    /// Extract and report contours
    #[clap(long)]
    contours: bool,

    /// Save the contour overlay as PNG
    #[clap(long)]
    overlay: Option<PathBuf>,

    /// Reference image with a printed scale bar
    #[clap(long)]
    calibration: Option<PathBuf>,

    /// Scale bar label, e.g. "50 mm" (otherwise the configured OCR command is used)
    #[clap(long)]
    scale_label: Option<String>,

    /// Use a camera instead of --input
    #[clap(long, value_enum)]
    camera: Option<CameraArg>,

    /// Synthetic camera index
    #[clap(long, default_value_t = 0)]
    device: usize,

    /// Camera frames to take before measuring
    #[clap(long, default_value_t = 1)]
    frames: u32,

    /// Show the result in a window
    #[cfg(feature = "viewer")]
    #[clap(long)]
    view: bool,

    /// Print the area report as JSON
    #[clap(long)]
    json: bool,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CameraArg {
    Synthetic,
    List,
}

/// Main function
fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = if Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        log::warn!("Config file {} not found, using defaults", args.config);
        Config::default()
    };

    // Override config with command-line arguments
    if let Some(input) = args.input.clone() {
        config.input_path = input;
    }
    if let Some(output) = args.output.clone() {
        config.output_csv = output;
    }
    if let Some(strategy) = args.auto {
        config.default_strategy = strategy;
    }

    config.validate()?;

    let start_time = Instant::now();
    let mut controller = Controller::new(config.clone());

    if let Some(reference) = &args.calibration {
        calibrate(&mut controller, reference, &args, &config)?;
    }

    match args.camera {
        Some(CameraArg::List) => {
            for device in FrameSource::devices() {
                println!("{}", device);
            }
        }
        Some(CameraArg::Synthetic) => run_camera(&mut controller, &args, &config)?,
        None => {
            let input_path = PathBuf::from(&config.input_path);
            if input_path.is_dir() {
                run_batch(&controller, &input_path, &args, &config)?;
            } else {
                run_single(&mut controller, &input_path, &args, &config)?;
            }
        }
    }

    controller.shutdown()?;
    log::info!("Finished in {:.2?}", start_time.elapsed());
    Ok(())
}

fn calibrate(controller: &mut Controller, reference: &Path, args: &Args, config: &Config) -> Result<()> {
    let recognizer: Box<dyn TextRecognizer> = match (&args.scale_label, &config.ocr_command) {
        (Some(label), _) => Box::new(LabelText(label.clone())),
        (None, Some(command)) => Box::new(CommandRecognizer::new(command)),
        (None, None) => {
            return Err(AreaError::Config(
                "--calibration needs --scale-label or ocr_command in the config".to_string(),
            ))
        }
    };

    // Unresolved calibration is not fatal: areas are reported in px
    if let Err(e) = controller.calibrate(reference, recognizer.as_ref()) {
        log::warn!("{}; areas will be reported in px", e);
    }
    Ok(())
}

/// Apply gamma / stretch / contour flags to a session (manual gamma overrides auto)
fn apply_view_args(state: &mut PipelineState, args: &Args, config: &Config) -> Result<()> {
    if let Some(gamma) = args.gamma {
        let applied = state.set_gamma(gamma)?;
        log::info!("Gamma set to {:.2}", applied);
    }
    if let Some(threshold) = args.stretch {
        state.set_stretch_mode(threshold.unwrap_or(config.stretch_threshold))?;
    }
    if args.contours || args.overlay.is_some() {
        state.toggle_contours(true)?;
    }
    Ok(())
}

fn run_auto_gamma(controller: &mut Controller, strategy: GammaStrategy) -> Result<()> {
    controller.start_auto_gamma(strategy)?;
    let mut progress = LogProgress::new("Auto gamma");

    while matches!(controller.background(), Background::Sweep { .. }) {
        if let Some(percent) = controller.sweep_progress() {
            progress.update(percent, 100);
        }
        if let Some(outcome) = controller.poll_auto_gamma()? {
            println!("Auto gamma ({:?}): {:.2}", strategy, outcome.gamma);
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}

/// Auto gamma first, then the manual flags, so `--gamma` and `--stretch` always win
fn configure_session(controller: &mut Controller, args: &Args, config: &Config) -> Result<()> {
    if args.auto.is_some() {
        run_auto_gamma(controller, config.default_strategy)?;
    }
    if let Some(state) = controller.state_mut() {
        apply_view_args(state, args, config)?;
    }
    Ok(())
}

fn report(controller: &mut Controller, args: &Args) -> Result<()> {
    let state = controller
        .state_mut()
        .ok_or_else(|| AreaError::Other("no image to measure".to_string()))?;

    state.extract_contours()?;
    let area = state.compute_area();
    if args.json {
        let json = serde_json::to_string_pretty(&area)
            .map_err(|e| AreaError::Other(format!("Failed to serialize report: {}", e)))?;
        println!("{}", json);
    } else {
        println!("{}: gamma {:.2}", state.name(), state.gamma());
        println!("{}", area);
    }

    if let Some(path) = &args.overlay {
        state.toggle_contours(true)?;
        PngSink::new(path).present(&state.render()?)?;
    }

    #[cfg(feature = "viewer")]
    if args.view {
        let mut window = gamma_area_lib::viewer::WindowSink::new("gamma_area");
        window.present(&state.render()?)?;
        window.wait_until_closed()?;
    }

    Ok(())
}

fn run_single(controller: &mut Controller, path: &Path, args: &Args, config: &Config) -> Result<()> {
    if !path.is_file() {
        return Err(AreaError::InvalidPath(path.to_path_buf()));
    }

    controller.load_image(path)?;
    configure_session(controller, args, config)?;

    report(controller, args)
}

fn run_camera(controller: &mut Controller, args: &Args, config: &Config) -> Result<()> {
    let source = FrameSource::synthetic(args.device, config)?;
    println!("Using camera {}", source.describe());
    controller.start_camera(source)?;

    let timeout = Duration::from_millis(config.camera_timeout_ms);
    let mut received = 0;
    let mut misses = 0;

    while received < args.frames.max(1) && misses < config.camera_timeout_warn_after {
        if controller.wait_frame(timeout) {
            received += 1;
            misses = 0;
        } else {
            misses += 1;
            log::warn!("No camera frame within {} ms", config.camera_timeout_ms);
        }
    }
    log::info!("Received {} camera frames", received);

    configure_session(controller, args, config)?;
    controller.stop_camera()?;

    report(controller, args)
}

fn run_batch(controller: &Controller, dir: &Path, args: &Args, config: &Config) -> Result<()> {
    let files = get_image_files_in_dir(dir)?;
    println!("Found {} images in {}", files.len(), dir.display());

    let mut options = BatchOptions::from_config(config);
    if args.auto.is_some() {
        options.strategy = config.default_strategy;
    }

    let outcome = process_batch(
        &files,
        &options,
        controller.calibration(),
        &mut LogProgress::new("Batch"),
        &CancelToken::new(),
    );

    write_batch_csv(&outcome.rows, &config.output_csv)?;

    println!("Processed {} of {} images", outcome.rows.len(), files.len());
    for failure in &outcome.failures {
        println!("  failed: {} ({})", failure.path.display(), failure.reason);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamma_area_lib::camera::SyntheticPattern;
    use gamma_area_lib::image_io::InputImage;
    use gamma_area_lib::session::RenderMode;
    use image::{GrayImage, Luma};

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.sweep_max_gamma = 2.0;
        config.synthetic_width = 32;
        config.synthetic_height = 24;
        config.synthetic_fps = 200;
        config.synthetic_pattern = SyntheticPattern::Circles;
        config
    }

    fn blob() -> InputImage {
        let image = GrayImage::from_fn(40, 40, |x, y| {
            let inside = (10..30).contains(&x) && (10..30).contains(&y);
            Luma([if inside { 200 } else { 20 }])
        });
        InputImage::from_buffer(image, "blob.png")
    }

    #[test]
    fn manual_gamma_wins_over_auto() {
        let config = fast_config();
        let args = Args::parse_from(["gamma_area_cli", "--auto", "percentile", "--gamma", "3.5"]);
        let mut controller = Controller::new(config.clone());
        controller.load_buffer(blob()).unwrap();

        configure_session(&mut controller, &args, &config).unwrap();
        assert_eq!(controller.state().unwrap().gamma(), 3.5);
    }

    #[test]
    fn stretch_wins_over_auto_while_streaming() {
        let config = fast_config();
        let args = Args::parse_from(["gamma_area_cli", "--auto", "std", "--stretch", "0.4"]);
        let mut controller = Controller::new(config.clone());
        controller.start_camera(FrameSource::synthetic(0, &config).unwrap()).unwrap();
        assert!(controller.wait_frame(Duration::from_secs(2)));

        configure_session(&mut controller, &args, &config).unwrap();
        controller.stop_camera().unwrap();

        let state = controller.state().unwrap();
        assert_eq!(state.mode(), RenderMode::Stretch { threshold: 0.4 });
        controller.shutdown().unwrap();
    }
}
