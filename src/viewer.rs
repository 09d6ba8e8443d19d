// src/viewer.rs - minifb window used as a rendering sink (feature "viewer")

use std::time::Duration;

use minifb::{Key, Window, WindowOptions};

use crate::errors::{AreaError, Result};
use crate::sinks::{RenderSink, Rendered};

/// Window that shows every presented buffer at its native size
pub struct WindowSink {
    title: String,
    window: Option<Window>,
    size: (usize, usize),
}

impl WindowSink {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            window: None,
            size: (0, 0),
        }
    }

    /// False once the user closed the window or pressed Escape
    pub fn is_open(&self) -> bool {
        self.window
            .as_ref()
            .map_or(true, |w| w.is_open() && !w.is_key_down(Key::Escape))
    }

    /// Keep the window responsive until it is closed
    pub fn wait_until_closed(&mut self) -> Result<()> {
        while self.is_open() {
            match self.window.as_mut() {
                Some(window) => window.update(),
                None => break,
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        Ok(())
    }

    fn window_for(&mut self, width: usize, height: usize) -> Result<&mut Window> {
        if self.window.is_none() || self.size != (width, height) {
            let mut window = Window::new(
                &self.title,
                width,
                height,
                WindowOptions {
                    resize: false,
                    scale: minifb::Scale::X1,
                    ..WindowOptions::default()
                },
            )
            .map_err(|e| AreaError::Other(format!("Failed to create window: {}", e)))?;
            window.limit_update_rate(Some(Duration::from_millis(33)));
            self.window = Some(window);
            self.size = (width, height);
        }

        self.window
            .as_mut()
            .ok_or_else(|| AreaError::Other("window unavailable".to_string()))
    }
}

impl RenderSink for WindowSink {
    fn present(&mut self, frame: &Rendered<'_>) -> Result<()> {
        let (width, height) = frame.dimensions();
        let buffer = frame.to_rgb_words();
        self.window_for(width as usize, height as usize)?
            .update_with_buffer(&buffer, width as usize, height as usize)
            .map_err(|e| AreaError::Other(format!("Failed to update window: {}", e)))
    }
}
