// src/controller.rs - Interactive control flow: one session plus at most one background worker

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::GrayImage;

use crate::auto_gamma::{search, CancelToken, GammaStrategy, SearchOutcome, SweepParams};
use crate::calibration::{resolve, Calibration, TextRecognizer};
use crate::camera::{CameraOptions, CameraWorker, FrameSource, LatestSlot};
use crate::config::Config;
use crate::errors::{AreaError, Result};
use crate::image_io::{load_image, InputImage};
use crate::session::{PipelineState, SessionOptions};
use crate::sinks::Rendered;

/// Name given to images taken from the camera
pub const CAMERA_FRAME_NAME: &str = "camera_frame";

/// Auto-gamma search running on its own thread
pub struct SweepWorker {
    cancel: CancelToken,
    percent: Arc<AtomicU32>,
    handle: Option<JoinHandle<Result<SearchOutcome>>>,
    epoch: u64,
}

impl SweepWorker {
    pub fn start(image: GrayImage, strategy: GammaStrategy, params: SweepParams, epoch: u64) -> Result<Self> {
        let cancel = CancelToken::new();
        let percent = Arc::new(AtomicU32::new(0));

        let thread_cancel = cancel.clone();
        let thread_percent = Arc::clone(&percent);
        let handle = thread::Builder::new()
            .name("gamma-sweep".to_string())
            .spawn(move || {
                let mut progress = move |current: u32, max: u32| {
                    thread_percent.store(current * 100 / max.max(1), Ordering::SeqCst);
                };
                search(&image, strategy, &params, &mut progress, &thread_cancel)
            })?;

        Ok(Self {
            cancel,
            percent,
            handle: Some(handle),
            epoch,
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Progress in percent (0-100)
    pub fn percent(&self) -> u32 {
        self.percent.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the search; a cancelled search still yields its fallback gamma
    pub fn join(mut self) -> Result<SearchOutcome> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| AreaError::Other("sweep already joined".to_string()))?;
        handle
            .join()
            .map_err(|_| AreaError::Other("sweep thread panicked".to_string()))?
    }
}

impl Drop for SweepWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cancel.cancel();
            let _ = handle.join();
        }
    }
}

/// The single background activity allowed at a time
pub enum Background {
    Idle,
    Camera(CameraWorker),
    Sweep {
        worker: SweepWorker,
        /// Camera paused for the sweep, resumed once the result is applied
        resume: Option<FrameSource>,
    },
}

/// Owns the current session and routes background results into it
pub struct Controller {
    config: Config,
    options: SessionOptions,
    state: Option<PipelineState>,
    calibration: Option<Calibration>,
    epoch: u64,
    background: Background,
    frames: Arc<LatestSlot<GrayImage>>,
}

impl Controller {
    pub fn new(config: Config) -> Self {
        let options = SessionOptions::from_config(&config);
        Self {
            config,
            options,
            state: None,
            calibration: None,
            epoch: 0,
            background: Background::Idle,
            frames: Arc::new(LatestSlot::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> Option<&PipelineState> {
        self.state.as_ref()
    }

    pub fn state_mut(&mut self) -> Option<&mut PipelineState> {
        self.state.as_mut()
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    pub fn background(&self) -> &Background {
        &self.background
    }

    pub fn camera_running(&self) -> bool {
        matches!(self.background, Background::Camera(_))
    }

    fn bump_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Halt whatever runs in the background; a running sweep is cancelled and dropped
    fn halt_background(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.background, Background::Idle) {
            Background::Idle => {}
            Background::Camera(worker) => {
                worker.stop()?;
            }
            Background::Sweep { worker, .. } => {
                worker.cancel();
                log::info!("Gamma search superseded");
            }
        }
        Ok(())
    }

    fn install(&mut self, input: InputImage) {
        let mut state = PipelineState::new(input, &self.options);
        state.set_calibration(self.calibration.clone());
        self.state = Some(state);
    }

    /// Open an image file as the new session; on failure the current session stays
    pub fn load_image<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let input = load_image(path)?;
        self.load_buffer(input)
    }

    pub fn load_buffer(&mut self, input: InputImage) -> Result<()> {
        self.halt_background()?;
        self.bump_epoch();
        log::info!("Loaded {} ({}x{})", input.filename, input.image.width(), input.image.height());
        self.install(input);
        Ok(())
    }

    /// Set the session calibration (applies to the current and later images)
    pub fn set_calibration(&mut self, calibration: Option<Calibration>) {
        if let Some(state) = self.state.as_mut() {
            state.set_calibration(calibration.clone());
        }
        self.calibration = calibration;
    }

    /// Resolve calibration from a reference image; on failure the previous one stays
    pub fn calibrate<P: AsRef<Path>>(&mut self, path: P, recognizer: &dyn TextRecognizer) -> Result<()> {
        let reference = load_image(path)?;
        let calibration = resolve(&reference.image, recognizer, &self.config)?;
        self.set_calibration(Some(calibration));
        Ok(())
    }

    /// Start streaming from `source`, replacing any background activity
    pub fn start_camera(&mut self, source: FrameSource) -> Result<()> {
        self.halt_background()?;
        let epoch = self.bump_epoch();
        let options = CameraOptions::from_config(&self.config);
        let worker = CameraWorker::start(source, Arc::clone(&self.frames), epoch, options)?;
        self.background = Background::Camera(worker);
        Ok(())
    }

    /// Stop the camera; its final frame becomes the session image
    pub fn stop_camera(&mut self) -> Result<Option<FrameSource>> {
        match std::mem::replace(&mut self.background, Background::Idle) {
            Background::Camera(worker) => {
                let stopped = worker.stop()?;
                if let Some(frame) = stopped.last_frame {
                    self.apply_frame(frame);
                }
                Ok(Some(stopped.source))
            }
            other => {
                self.background = other;
                Ok(None)
            }
        }
    }

    fn apply_frame(&mut self, frame: GrayImage) {
        let input = InputImage::from_buffer(frame, CAMERA_FRAME_NAME);
        match self.state.as_mut() {
            Some(state) => state.reload(input),
            None => self.install(input),
        }
    }

    fn accept_frame(&mut self, published: Option<(u64, GrayImage)>) -> bool {
        match published {
            Some((epoch, frame)) if epoch == self.epoch => {
                self.apply_frame(frame);
                true
            }
            Some((epoch, _)) => {
                log::debug!("Dropped frame from epoch {} (current {})", epoch, self.epoch);
                false
            }
            None => false,
        }
    }

    /// Apply the newest camera frame if there is one
    pub fn poll_frame(&mut self) -> bool {
        let published = self.frames.take();
        self.accept_frame(published)
    }

    /// Block up to `timeout` for a camera frame
    pub fn wait_frame(&mut self, timeout: Duration) -> bool {
        let published = self.frames.wait_take(timeout);
        self.accept_frame(published)
    }

    /// Run an auto-gamma search in the background, pausing the camera meanwhile
    pub fn start_auto_gamma(&mut self, strategy: GammaStrategy) -> Result<()> {
        let resume = match std::mem::replace(&mut self.background, Background::Idle) {
            Background::Camera(worker) => {
                let stopped = worker.stop()?;
                if let Some(frame) = stopped.last_frame {
                    self.apply_frame(frame);
                }
                Some(stopped.source)
            }
            Background::Sweep { worker, resume } => {
                worker.cancel();
                resume
            }
            Background::Idle => None,
        };

        let image = match self.state.as_ref().map(|state| state.source().clone()) {
            Some(image) => image,
            None => {
                if let Some(source) = resume {
                    self.start_camera(source)?;
                }
                return Err(AreaError::Other("no image loaded".to_string()));
            }
        };

        let epoch = self.bump_epoch();
        let worker = SweepWorker::start(image, strategy, self.config.sweep_params(), epoch)?;
        self.background = Background::Sweep { worker, resume };
        Ok(())
    }

    /// Progress of the running search, if any
    pub fn sweep_progress(&self) -> Option<u32> {
        match &self.background {
            Background::Sweep { worker, .. } => Some(worker.percent()),
            _ => None,
        }
    }

    pub fn cancel_auto_gamma(&self) {
        if let Background::Sweep { worker, .. } = &self.background {
            worker.cancel();
        }
    }

    /// Wait for the running search and apply its gamma if still current
    pub fn finish_auto_gamma(&mut self) -> Result<Option<SearchOutcome>> {
        let (worker, resume) = match std::mem::replace(&mut self.background, Background::Idle) {
            Background::Sweep { worker, resume } => (worker, resume),
            other => {
                self.background = other;
                return Ok(None);
            }
        };

        let worker_epoch = worker.epoch();
        let outcome = worker.join()?;

        let applied = if worker_epoch == self.epoch {
            match self.state.as_mut() {
                Some(state) => {
                    state.set_gamma(outcome.gamma)?;
                    Some(outcome)
                }
                None => None,
            }
        } else {
            log::debug!("Dropped gamma result from epoch {}", worker_epoch);
            None
        };

        if let Some(source) = resume {
            self.start_camera(source)?;
        }

        Ok(applied)
    }

    /// Apply the search result if the worker has finished
    pub fn poll_auto_gamma(&mut self) -> Result<Option<SearchOutcome>> {
        match &self.background {
            Background::Sweep { worker, .. } if worker.is_finished() => self.finish_auto_gamma(),
            _ => Ok(None),
        }
    }

    /// Render the current session
    pub fn render(&mut self) -> Result<Option<Rendered<'_>>> {
        match self.state.as_mut() {
            Some(state) => state.render().map(Some),
            None => Ok(None),
        }
    }

    /// Stop any background worker
    pub fn shutdown(&mut self) -> Result<()> {
        self.halt_background()
    }
}
