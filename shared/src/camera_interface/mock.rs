//! Synthetic cameras for tests and bench bring-up without hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;

use super::{CameraError, CameraInterface, CameraResult, CameraSource};

/// Scene rendered by [`SyntheticTargetCamera`]: a dark disk on a light field.
#[derive(Debug, Clone)]
pub struct SyntheticTarget {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Disk centre `(x, y)` in pixels, or `None` for an empty field
    pub center: Option<(i32, i32)>,
    /// Disk radius in pixels
    pub radius: i32,
    /// Background grey level
    pub background: u8,
    /// Disk grey level
    pub target_level: u8,
}

impl SyntheticTarget {
    /// Target offset from frame centre by `(dx, dy)` pixels (image axes).
    pub fn offset_from_center(width: u32, height: u32, dx: i32, dy: i32) -> Self {
        Self {
            width,
            height,
            center: Some((width as i32 / 2 + dx, height as i32 / 2 + dy)),
            ..Self::default()
        }
    }

    /// Render the scene.
    pub fn render(&self) -> RgbImage {
        let bg = self.background;
        let mut image = RgbImage::from_pixel(self.width, self.height, Rgb([bg, bg, bg]));
        if let Some(center) = self.center {
            let level = self.target_level;
            draw_filled_circle_mut(&mut image, center, self.radius, Rgb([level, level, level]));
        }
        image
    }
}

impl Default for SyntheticTarget {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            center: Some((640, 360)),
            radius: 40,
            background: 210,
            target_level: 40,
        }
    }
}

/// Camera producing a fixed synthetic scene.
///
/// Optionally fails after a number of captures, to exercise capture-loop
/// termination.
pub struct SyntheticTargetCamera {
    frame: RgbImage,
    captures: u64,
    fail_after: Option<u64>,
}

impl SyntheticTargetCamera {
    pub fn new(target: &SyntheticTarget) -> Self {
        Self {
            frame: target.render(),
            captures: 0,
            fail_after: None,
        }
    }

    /// Fail every capture after the first `captures` succeed.
    pub fn failing_after(mut self, captures: u64) -> Self {
        self.fail_after = Some(captures);
        self
    }
}

impl CameraInterface for SyntheticTargetCamera {
    fn capture_frame(&mut self) -> CameraResult<RgbImage> {
        if self.fail_after.is_some_and(|limit| self.captures >= limit) {
            return Err(CameraError::CaptureFailed(
                "synthetic camera disconnected".to_string(),
            ));
        }
        self.captures += 1;
        Ok(self.frame.clone())
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

/// [`CameraSource`] for [`SyntheticTargetCamera`].
#[derive(Debug, Clone)]
pub struct SyntheticCameraSource {
    target: SyntheticTarget,
    fail_after: Option<u64>,
    available: Arc<AtomicBool>,
}

impl SyntheticCameraSource {
    pub fn new(target: SyntheticTarget) -> Self {
        Self {
            target,
            fail_after: None,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Cameras opened from this source fail after `captures` frames.
    pub fn failing_after(mut self, captures: u64) -> Self {
        self.fail_after = Some(captures);
        self
    }

    /// Make subsequent `open()` calls fail (or succeed again).
    ///
    /// Clones share this flag.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl CameraSource for SyntheticCameraSource {
    fn open(&self) -> CameraResult<Box<dyn CameraInterface>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CameraError::NotAvailable(
                "synthetic camera unplugged".to_string(),
            ));
        }
        let mut camera = SyntheticTargetCamera::new(&self.target);
        camera.fail_after = self.fail_after;
        Ok(Box::new(camera))
    }
}
