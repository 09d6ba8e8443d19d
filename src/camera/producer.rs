// src/camera/producer.rs - Camera producer thread and the latest-frame mailbox

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::GrayImage;

use super::FrameSource;
use crate::config::Config;
use crate::errors::{AreaError, Result};

/// Single-slot mailbox: publishing overwrites, readers only ever see the newest value
pub struct LatestSlot<T> {
    value: Mutex<Option<(u64, T)>>,
    ready: Condvar,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<(u64, T)>> {
        self.value.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `value` tagged with `epoch`; returns true if an unread value was dropped
    pub fn publish(&self, epoch: u64, value: T) -> bool {
        let superseded = self.lock().replace((epoch, value)).is_some();
        self.ready.notify_all();
        superseded
    }

    pub fn take(&self) -> Option<(u64, T)> {
        self.lock().take()
    }

    /// Wait up to `timeout` for a value
    pub fn wait_take(&self, timeout: Duration) -> Option<(u64, T)> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        while guard.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            guard = match self.ready.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        guard.take()
    }
}

/// Producer loop settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraOptions {
    pub timeout: Duration,
    /// Warn after this many consecutive timeouts
    pub warn_after: u32,
}

impl CameraOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: Duration::from_millis(config.camera_timeout_ms),
            warn_after: config.camera_timeout_warn_after.max(1),
        }
    }
}

/// Returned by [`CameraWorker::stop`]: the source for restarting, plus the final frame
pub struct StoppedCamera {
    pub source: FrameSource,
    pub last_frame: Option<GrayImage>,
}

/// Producer thread publishing grayscale frames into a [`LatestSlot`]
pub struct CameraWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<FrameSource>>,
    epoch: u64,
    timeout: Duration,
}

fn run_producer(
    mut source: FrameSource,
    slot: Arc<LatestSlot<GrayImage>>,
    epoch: u64,
    options: CameraOptions,
    running: Arc<AtomicBool>,
) -> FrameSource {
    let mut consecutive_timeouts = 0u32;

    while running.load(Ordering::SeqCst) {
        match source.grab(options.timeout) {
            Ok(frame) => {
                consecutive_timeouts = 0;
                if slot.publish(epoch, frame) {
                    log::trace!("Dropped unread camera frame");
                }
            }
            Err(AreaError::CameraTimeout) => {
                consecutive_timeouts += 1;
                if consecutive_timeouts % options.warn_after == 0 {
                    log::warn!("Camera timed out {} times in a row", consecutive_timeouts);
                }
            }
            Err(AreaError::CameraUnavailable(reason)) => {
                log::error!("Camera unavailable: {}", reason);
                break;
            }
            Err(e) => log::warn!("Dropped camera frame: {}", e),
        }
    }

    running.store(false, Ordering::SeqCst);
    source
}

impl CameraWorker {
    /// Start `source` and run the producer loop on its own thread
    pub fn start(
        mut source: FrameSource,
        slot: Arc<LatestSlot<GrayImage>>,
        epoch: u64,
        options: CameraOptions,
    ) -> Result<Self> {
        source.start()?;
        log::info!("Camera started: {}", source.describe());

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("camera-producer".to_string())
            .spawn(move || run_producer(source, slot, epoch, options, thread_running))?;

        Ok(Self {
            running,
            handle: Some(handle),
            epoch,
            timeout: options.timeout,
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// False once the loop has exited (stopped or camera lost)
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the loop, wait for the thread, and capture one final frame
    pub fn stop(mut self) -> Result<StoppedCamera> {
        self.running.store(false, Ordering::SeqCst);
        let handle = self
            .handle
            .take()
            .ok_or_else(|| AreaError::Other("camera worker already stopped".to_string()))?;
        let mut source = handle
            .join()
            .map_err(|_| AreaError::Other("camera thread panicked".to_string()))?;

        let last_frame = match source.grab(self.timeout) {
            Ok(frame) => Some(frame),
            Err(e) => {
                log::warn!("No final frame on stop: {}", e);
                None
            }
        };
        source.stop();
        log::info!("Camera stopped: {}", source.describe());

        Ok(StoppedCamera { source, last_frame })
    }
}

impl Drop for CameraWorker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if let Ok(mut source) = handle.join() {
                source.stop();
            }
        }
    }
}
