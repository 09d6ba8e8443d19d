use std::fs;
use std::path::Path;
use csv::Writer;

use crate::batch::BatchRow;
use crate::errors::{AreaError, Result};

/// Column header of the batch results file
pub const BATCH_HEADER: [&str; 6] = [
    "filename",
    "gamma",
    "area_px",
    "area_units",
    "unit_name",
    "contours_count",
];

/// Write batch rows to CSV, one row per processed image
pub fn write_batch_csv<P: AsRef<Path>>(rows: &[BatchRow], output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();

    // Create directory if it doesn't exist
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(AreaError::Io)?;
        }
    }

    let mut writer = Writer::from_path(output_path).map_err(AreaError::CsvOutput)?;

    writer.write_record(BATCH_HEADER).map_err(AreaError::CsvOutput)?;

    for row in rows {
        writer.write_record(&[
            row.filename.clone(),
            format!("{:.6}", row.gamma),
            format!("{:.6}", row.area_px),
            format!("{:.6}", row.area_units),
            row.unit_name.clone(),
            row.contours_count.to_string(),
        ]).map_err(AreaError::CsvOutput)?;
    }

    writer.flush().map_err(|e| AreaError::CsvOutput(csv::Error::from(e)))?;

    log::info!("Wrote {} rows to {}", rows.len(), output_path.display());

    Ok(())
}
