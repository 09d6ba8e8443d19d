// src/camera/mod.rs - Frame sources: driver-backed, vendor SDK and synthetic cameras

mod producer;
mod synthetic;

pub use producer::{CameraOptions, CameraWorker, LatestSlot, StoppedCamera};
pub use synthetic::{SyntheticCamera, SyntheticPattern};

use std::fmt;
use std::time::Duration;

use image::{GrayImage, Luma};

use crate::config::Config;
use crate::errors::{AreaError, Result};

/// Identity of a camera as shown in a device picker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: usize,
    pub model: String,
    pub vendor: String,
    pub serial_number: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {} (SN {})", self.index, self.vendor, self.model, self.serial_number)
    }
}

/// Layout of the bytes in a raw frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Mono8,
    Rgb8,
    Bgr8,
    BayerRg8,
    BayerBg8,
    BayerGr8,
    BayerGb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            _ => 1,
        }
    }

    /// Color of the top-left 2x2 cell, row-major, as channel indices (0 = R, 1 = G, 2 = B)
    fn bayer_cell(self) -> Option<[usize; 4]> {
        match self {
            PixelFormat::BayerRg8 => Some([0, 1, 1, 2]),
            PixelFormat::BayerBg8 => Some([2, 1, 1, 0]),
            PixelFormat::BayerGr8 => Some([1, 0, 2, 1]),
            PixelFormat::BayerGb8 => Some([1, 2, 0, 1]),
            _ => None,
        }
    }
}

/// Frame as delivered by a grabber, before grayscale conversion
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// Rec.601 luma (0.299 R + 0.587 G + 0.114 B) in 14-bit fixed point, rounded
pub(crate) fn luma(rgb: [u8; 3]) -> u8 {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    let [r, g, b] = rgb.map(u32::from);
    ((r * R + g * G + b * B + (1 << 13)) >> 14) as u8
}

/// Convert a raw frame to 8-bit grayscale
pub fn to_gray(frame: &RawFrame) -> Result<GrayImage> {
    let (width, height) = (frame.width as usize, frame.height as usize);
    let expected = width * height * frame.format.bytes_per_pixel();
    if frame.data.len() != expected {
        return Err(AreaError::Other(format!(
            "{:?} frame {}x{} has {} bytes, expected {}",
            frame.format, width, height, frame.data.len(), expected
        )));
    }

    let image = match frame.format {
        PixelFormat::Mono8 => GrayImage::from_raw(frame.width, frame.height, frame.data.clone()),
        PixelFormat::Rgb8 | PixelFormat::Bgr8 => {
            let bgr = frame.format == PixelFormat::Bgr8;
            let gray = frame
                .data
                .chunks_exact(3)
                .map(|c| if bgr { luma([c[2], c[1], c[0]]) } else { luma([c[0], c[1], c[2]]) })
                .collect();
            GrayImage::from_raw(frame.width, frame.height, gray)
        }
        bayer => {
            let cell = bayer.bayer_cell().ok_or_else(|| AreaError::Other(format!("unsupported format {:?}", bayer)))?;
            Some(bayer_to_gray(frame, cell))
        }
    };

    image.ok_or_else(|| AreaError::Other("frame buffer does not match its dimensions".to_string()))
}

/// Each 2x2 Bayer cell is collapsed to one luma value shared by its four pixels
fn bayer_to_gray(frame: &RawFrame, cell: [usize; 4]) -> GrayImage {
    let (width, height) = (frame.width, frame.height);
    let sample = |x: u32, y: u32| frame.data[(y.min(height - 1) * width + x.min(width - 1)) as usize] as u32;

    GrayImage::from_fn(width, height, |x, y| {
        let (cx, cy) = (x & !1, y & !1);
        let mut sums = [0u32; 3];
        let mut counts = [0u32; 3];
        for (k, (dx, dy)) in [(0, 0), (1, 0), (0, 1), (1, 1)].into_iter().enumerate() {
            sums[cell[k]] += sample(cx + dx, cy + dy);
            counts[cell[k]] += 1;
        }
        let channel = |c: usize| (sums[c] / counts[c].max(1)) as u8;
        Luma([luma([channel(0), channel(1), channel(2)])])
    })
}

/// Value pushed to a camera parameter node
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Enum(&'static str),
}

/// Driver or SDK binding supplied by the integrator
pub trait FrameGrabber: Send {
    fn info(&self) -> DeviceInfo;

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Block for the next frame, at most `timeout`
    fn grab(&mut self, timeout: Duration) -> Result<RawFrame>;

    fn set_parameter(&mut self, name: &str, _value: ParamValue) -> Result<()> {
        Err(AreaError::CameraUnavailable(format!("parameter {} not supported", name)))
    }

    fn close(&mut self) {}
}

/// Acquisition settings applied to vendor cameras on start
#[derive(Debug, Clone, PartialEq)]
pub struct CameraParams {
    pub exposure_us: f64,
    pub gain_db: f64,
    pub frame_rate: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub offset_x: Option<u32>,
    pub offset_y: Option<u32>,
    pub auto_exposure: bool,
    pub auto_gain: bool,
    pub auto_white_balance: bool,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            exposure_us: 33333.0,
            gain_db: 0.0,
            frame_rate: 30.0,
            width: None,
            height: None,
            offset_x: None,
            offset_y: None,
            auto_exposure: false,
            auto_gain: false,
            auto_white_balance: false,
        }
    }
}

fn auto_mode(on: bool) -> ParamValue {
    ParamValue::Enum(if on { "Continuous" } else { "Off" })
}

impl CameraParams {
    fn nodes(&self) -> Vec<(&'static str, ParamValue)> {
        let mut nodes = vec![
            ("ExposureAuto", auto_mode(self.auto_exposure)),
            ("GainAuto", auto_mode(self.auto_gain)),
            ("BalanceWhiteAuto", auto_mode(self.auto_white_balance)),
            ("ExposureTime", ParamValue::Float(self.exposure_us)),
            ("Gain", ParamValue::Float(self.gain_db)),
            ("AcquisitionFrameRate", ParamValue::Float(self.frame_rate)),
        ];
        for (name, value) in [
            ("Width", self.width),
            ("Height", self.height),
            ("OffsetX", self.offset_x),
            ("OffsetY", self.offset_y),
        ] {
            if let Some(value) = value {
                nodes.push((name, ParamValue::Int(value as i64)));
            }
        }
        nodes
    }

    /// Push every setting; rejected ones are logged and skipped
    pub fn apply(&self, grabber: &mut dyn FrameGrabber) -> usize {
        let mut applied = 0;
        for (name, value) in self.nodes() {
            match grabber.set_parameter(name, value) {
                Ok(()) => applied += 1,
                Err(e) => log::warn!("Could not set {}: {}", name, e),
            }
        }
        applied
    }
}

/// Plain camera driven through its driver binding
pub struct DeviceCamera {
    grabber: Box<dyn FrameGrabber>,
}

impl DeviceCamera {
    pub fn new(grabber: Box<dyn FrameGrabber>) -> Self {
        Self { grabber }
    }
}

/// Industrial camera driven through a vendor SDK, configured on start
pub struct VendorCamera {
    grabber: Box<dyn FrameGrabber>,
    params: CameraParams,
}

impl VendorCamera {
    pub fn new(grabber: Box<dyn FrameGrabber>, params: CameraParams) -> Self {
        Self { grabber, params }
    }

    pub fn params(&self) -> &CameraParams {
        &self.params
    }
}

/// Any camera the producer can pull frames from
pub enum FrameSource {
    Device(DeviceCamera),
    Vendor(VendorCamera),
    Synthetic(SyntheticCamera),
}

impl FrameSource {
    /// Cameras available without external drivers
    pub fn devices() -> Vec<DeviceInfo> {
        SyntheticCamera::devices()
    }

    /// Synthetic camera `index` configured from `config`
    pub fn synthetic(index: usize, config: &Config) -> Result<Self> {
        let info = Self::devices()
            .into_iter()
            .find(|d| d.index == index)
            .ok_or_else(|| AreaError::CameraUnavailable(format!("no synthetic camera with index {}", index)))?;

        Ok(FrameSource::Synthetic(SyntheticCamera::new(
            info,
            config.synthetic_width,
            config.synthetic_height,
            config.synthetic_fps,
            config.synthetic_pattern,
        )))
    }

    pub fn describe(&self) -> DeviceInfo {
        match self {
            FrameSource::Device(camera) => camera.grabber.info(),
            FrameSource::Vendor(camera) => camera.grabber.info(),
            FrameSource::Synthetic(camera) => camera.info().clone(),
        }
    }

    /// Open the device (and push acquisition settings for vendor cameras)
    pub fn start(&mut self) -> Result<()> {
        match self {
            FrameSource::Device(camera) => camera.grabber.open(),
            FrameSource::Vendor(camera) => {
                camera.grabber.open()?;
                let applied = camera.params.apply(camera.grabber.as_mut());
                log::debug!("Applied {} camera parameters", applied);
                Ok(())
            }
            FrameSource::Synthetic(camera) => {
                camera.restart();
                Ok(())
            }
        }
    }

    /// Next grayscale frame, or `CameraTimeout` when none arrived within `timeout`
    pub fn grab(&mut self, timeout: Duration) -> Result<GrayImage> {
        match self {
            FrameSource::Device(camera) => to_gray(&camera.grabber.grab(timeout)?),
            FrameSource::Vendor(camera) => to_gray(&camera.grabber.grab(timeout)?),
            FrameSource::Synthetic(camera) => camera.grab(timeout),
        }
    }

    pub fn stop(&mut self) {
        match self {
            FrameSource::Device(camera) => camera.grabber.close(),
            FrameSource::Vendor(camera) => camera.grabber.close(),
            FrameSource::Synthetic(_) => {}
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Grabber replaying queued results, then timing out
    pub(crate) struct ScriptedGrabber {
        pub frames: VecDeque<Result<RawFrame>>,
        pub rejected: Vec<&'static str>,
        pub applied: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedGrabber {
        pub(crate) fn new(frames: Vec<Result<RawFrame>>) -> Self {
            Self {
                frames: frames.into(),
                rejected: Vec::new(),
                applied: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl FrameGrabber for ScriptedGrabber {
        fn info(&self) -> DeviceInfo {
            DeviceInfo {
                index: 0,
                model: "Scripted".to_string(),
                vendor: "Test".to_string(),
                serial_number: "T0".to_string(),
            }
        }

        fn grab(&mut self, timeout: Duration) -> Result<RawFrame> {
            match self.frames.pop_front() {
                Some(frame) => frame,
                None => {
                    std::thread::sleep(timeout.min(Duration::from_millis(5)));
                    Err(AreaError::CameraTimeout)
                }
            }
        }

        fn set_parameter(&mut self, name: &str, _value: ParamValue) -> Result<()> {
            if self.rejected.contains(&name) {
                return Err(AreaError::CameraUnavailable(format!("{} is read-only", name)));
            }
            self.applied.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    pub(crate) fn mono(width: u32, height: u32, value: u8) -> RawFrame {
        RawFrame {
            width,
            height,
            format: PixelFormat::Mono8,
            data: vec![value; (width * height) as usize],
        }
    }

    #[test]
    fn rgb_and_bgr_frames_agree() {
        let rgb = RawFrame { width: 1, height: 1, format: PixelFormat::Rgb8, data: vec![200, 100, 50] };
        let bgr = RawFrame { width: 1, height: 1, format: PixelFormat::Bgr8, data: vec![50, 100, 200] };
        assert_eq!(to_gray(&rgb).unwrap(), to_gray(&bgr).unwrap());
        assert_eq!(to_gray(&mono(3, 2, 9)).unwrap().get_pixel(2, 1)[0], 9);
    }

    #[test]
    fn color_frames_use_rec601_weights() {
        let primaries = RawFrame {
            width: 4,
            height: 1,
            format: PixelFormat::Rgb8,
            data: vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255],
        };
        let gray = to_gray(&primaries).unwrap();
        let values: Vec<u8> = gray.pixels().map(|p| p[0]).collect();
        assert_eq!(values, vec![76, 150, 29, 255]);
    }

    #[test]
    fn uniform_bayer_mosaic_stays_uniform() {
        let frame = RawFrame { width: 4, height: 4, format: PixelFormat::BayerRg8, data: vec![120; 16] };
        let gray = to_gray(&frame).unwrap();
        assert!(gray.pixels().all(|p| p[0] == 120));
    }

    #[test]
    fn bayer_cells_follow_pattern_order() {
        // Only the red sites are lit
        let rg = RawFrame { width: 2, height: 2, format: PixelFormat::BayerRg8, data: vec![255, 0, 0, 0] };
        let bg = RawFrame { width: 2, height: 2, format: PixelFormat::BayerBg8, data: vec![0, 0, 0, 255] };
        assert_eq!(to_gray(&rg).unwrap(), to_gray(&bg).unwrap());
    }

    #[test]
    fn short_buffers_are_rejected() {
        let frame = RawFrame { width: 4, height: 4, format: PixelFormat::Rgb8, data: vec![0; 16] };
        assert!(to_gray(&frame).is_err());
    }

    #[test]
    fn vendor_start_applies_params_and_tolerates_rejections() {
        let mut grabber = ScriptedGrabber::new(vec![Ok(mono(2, 2, 1))]);
        grabber.rejected = vec!["Gain"];
        let applied = Arc::clone(&grabber.applied);

        let mut source = FrameSource::Vendor(VendorCamera::new(Box::new(grabber), CameraParams::default()));
        source.start().unwrap();

        let names = applied.lock().unwrap().clone();
        assert!(names.contains(&"ExposureTime".to_string()));
        assert!(!names.contains(&"Gain".to_string()));
        assert_eq!(source.grab(Duration::from_millis(10)).unwrap().dimensions(), (2, 2));
        assert!(matches!(source.grab(Duration::from_millis(1)), Err(AreaError::CameraTimeout)));
    }

    #[test]
    fn synthetic_devices_are_listed() {
        let devices = FrameSource::devices();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].serial_number, "MOCK001");
        assert!(FrameSource::synthetic(7, &Config::default()).is_err());

        let source = FrameSource::synthetic(1, &Config::default()).unwrap();
        assert_eq!(source.describe().model, "Mock-Camera-2000");
    }
}
