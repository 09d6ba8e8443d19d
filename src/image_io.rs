// src/image_io.rs - Image loading, directory listing and PNG output

use std::path::{Path, PathBuf};
use std::fs;
use image::{GrayImage, ImageFormat, RgbImage};

use crate::errors::{AreaError, Result};
use crate::sinks::Rendered;

/// Extensions accepted when collecting images from a directory
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Represents an input image with its metadata
#[derive(Debug, Clone)]
pub struct InputImage {
    pub image: GrayImage,
    pub path: PathBuf,
    pub filename: String,
}

impl InputImage {
    /// Wrap an in-memory buffer (camera frame, generated image)
    pub fn from_buffer(image: GrayImage, name: &str) -> Self {
        Self {
            image,
            path: PathBuf::new(),
            filename: name.to_string(),
        }
    }
}

/// Get all image files directly inside a directory, sorted by name
pub fn get_image_files_in_dir<P: AsRef<Path>>(dir_path: P) -> Result<Vec<PathBuf>> {
    let dir_path = dir_path.as_ref();

    if !dir_path.exists() {
        return Err(AreaError::InvalidPath(dir_path.to_path_buf()));
    }

    if !dir_path.is_dir() {
        return Err(AreaError::Config(format!(
            "{} is not a directory", dir_path.display()
        )));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir_path)? {
        let path = entry?.path();
        if path.is_file() && has_image_extension(&path) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.iter().any(|known| *known == ext)
        })
        .unwrap_or(false)
}

/// Load an image from disk as 8-bit grayscale
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<InputImage> {
    let path = path.as_ref();

    // Keep the extension: it is the row key in batch output
    let filename = path.file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| AreaError::InvalidPath(path.to_path_buf()))?
        .to_string();

    let img = image::open(path).map_err(|e| AreaError::LoadFailure {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    Ok(InputImage {
        image: img.to_luma8(),
        path: path.to_path_buf(),
        filename,
    })
}

/// Save a grayscale image as PNG
pub fn save_gray_image<P: AsRef<Path>>(image: &GrayImage, path: P) -> Result<()> {
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Save an RGB image as PNG
pub fn save_rgb_image<P: AsRef<Path>>(image: &RgbImage, path: P) -> Result<()> {
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Save whatever the session rendered (gray or overlay) as PNG
pub fn save_rendered<P: AsRef<Path>>(rendered: &Rendered<'_>, path: P) -> Result<()> {
    match rendered {
        Rendered::Gray(image) => save_gray_image(image, path),
        Rendered::Color(image) => save_rgb_image(image, path),
    }
}
