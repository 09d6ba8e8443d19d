// tests/calibration_scenario.rs - Scale bar calibration feeding area reports

use assert_approx_eq::assert_approx_eq;
use image::{GrayImage, Luma};

use gamma_area_lib::calibration::{calibration_strip, measure_reference_length, parse_label, Calibration};
use gamma_area_lib::contours::Contour;
use gamma_area_lib::session::AreaReport;

#[test]
fn hundred_pixel_bar_labelled_fifty_mm() {
    let strip = GrayImage::from_fn(200, 40, |x, y| {
        let bar = (50..150).contains(&x) && (15..25).contains(&y);
        Luma([if bar { 255 } else { 0 }])
    });

    let pixel_length = measure_reference_length(&strip, 200).unwrap();
    assert_eq!(pixel_length, 100);

    let (value, unit) = parse_label(&["50", "mm"]).unwrap();
    let calibration = Calibration::new(pixel_length as f64, value, &unit).unwrap();
    assert_approx_eq!(calibration.unit_factor(), 0.5);

    // 20x20 polygon: 400 px²
    let contour = Contour::new(vec![(0, 0), (20, 0), (20, 20), (0, 20)]);
    let report = AreaReport::from_contours(&[contour], Some(&calibration));
    assert_approx_eq!(report.area_px, 400.0);
    assert_approx_eq!(report.area_units.unwrap(), 100.0);
    assert_eq!(report.unit_name.as_deref(), Some("mm"));
}

#[test]
fn uncalibrated_report_is_px_only() {
    let contour = Contour::new(vec![(0, 0), (10, 0), (10, 10), (0, 10)]);
    let report = AreaReport::from_contours(&[contour], None);
    assert!(report.is_extracted());
    assert!(report.area_units.is_none());
    assert!(report.to_string().starts_with("Area is not calibrated"));

    assert!(!AreaReport::from_contours(&[], None).is_extracted());
}

#[test]
fn strip_is_taken_from_bottom_right() {
    let image = GrayImage::from_fn(100, 100, |x, y| Luma([if x >= 68 && y >= 90 { 255 } else { 0 }]));
    let strip = calibration_strip(&image, 0.10, 0.32);
    assert_eq!(strip.dimensions(), (32, 10));
    assert!(strip.pixels().all(|p| p[0] == 255));
}
