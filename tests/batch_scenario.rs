// tests/batch_scenario.rs - Batch over a square, an empty frame and a corrupt file

use std::fs;
use std::path::PathBuf;

use image::{GrayImage, Luma};

use gamma_area_lib::auto_gamma::CancelToken;
use gamma_area_lib::batch::{process_batch, BatchOptions};
use gamma_area_lib::config::Config;
use gamma_area_lib::image_io::get_image_files_in_dir;
use gamma_area_lib::output::write_batch_csv;
use gamma_area_lib::sinks::NoProgress;

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("gamma_area_batch_{}_{}", tag, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_inputs(dir: &PathBuf) {
    let square = GrayImage::from_fn(100, 100, |x, y| {
        let inside = (25..75).contains(&x) && (25..75).contains(&y);
        Luma([if inside { 230 } else { 15 }])
    });
    square.save(dir.join("a_square.png")).unwrap();
    GrayImage::new(100, 100).save(dir.join("b_empty.png")).unwrap();
    fs::write(dir.join("c_corrupt.png"), b"definitely not an image").unwrap();
}

fn fast_options(use_parallel: bool) -> BatchOptions {
    let mut config = Config::default();
    config.use_parallel = use_parallel;
    let mut options = BatchOptions::from_config(&config);
    // Short sweep keeps the test quick; the selection rule is the same
    options.params.max_gamma = 3.0;
    options
}

#[test]
fn batch_keeps_going_past_failures() {
    let dir = scratch_dir("seq");
    write_inputs(&dir);
    let files = get_image_files_in_dir(&dir).unwrap();
    assert_eq!(files.len(), 3);

    let outcome = process_batch(&files, &fast_options(false), None, &mut NoProgress, &CancelToken::new());

    assert_eq!(outcome.rows.len(), 2);
    assert_eq!(outcome.failures.len(), 1);
    assert!(!outcome.cancelled);
    assert!(outcome.failures[0].path.ends_with("c_corrupt.png"));

    let square = &outcome.rows[0];
    assert_eq!(square.filename, "a_square.png");
    assert_eq!(square.contours_count, 1);
    assert!((square.area_px - 2500.0).abs() <= 100.0, "area {}", square.area_px);
    assert_eq!(square.area_units, 0.0);

    let empty = &outcome.rows[1];
    assert_eq!(empty.filename, "b_empty.png");
    assert_eq!(empty.area_px, 0.0);
    assert_eq!(empty.contours_count, 0);

    let csv_path = dir.join("results.csv");
    write_batch_csv(&outcome.rows, &csv_path).unwrap();
    let content = fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "filename,gamma,area_px,area_units,unit_name,contours_count");
    assert!(lines[1].starts_with("a_square.png,"));
    assert!(lines[2].starts_with("b_empty.png,"));
    assert!(lines[2].ends_with(",0.000000,0.000000,N/A,0"));
}

#[test]
fn parallel_batch_matches_sequential_order() {
    let dir = scratch_dir("par");
    write_inputs(&dir);
    let files = get_image_files_in_dir(&dir).unwrap();

    let sequential = process_batch(&files, &fast_options(false), None, &mut NoProgress, &CancelToken::new());
    let parallel = process_batch(&files, &fast_options(true), None, &mut NoProgress, &CancelToken::new());

    assert_eq!(sequential.rows, parallel.rows);
    assert_eq!(sequential.failures, parallel.failures);
}
