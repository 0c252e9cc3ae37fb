//! Camera that replays a single image loaded from disk.

use std::path::PathBuf;

use image::RgbImage;
use tracing::info;

use super::{CameraInterface, CameraResult, CameraSource};

/// Returns the same image on every capture.
pub struct StillImageCamera {
    image: RgbImage,
    name: String,
}

impl StillImageCamera {
    /// Wrap an in-memory image.
    pub fn new(image: RgbImage, name: impl Into<String>) -> Self {
        Self {
            image,
            name: name.into(),
        }
    }
}

impl CameraInterface for StillImageCamera {
    fn capture_frame(&mut self) -> CameraResult<RgbImage> {
        Ok(self.image.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Opens a [`StillImageCamera`] from an image file.
///
/// The file is read on every `open()` so a replaced file takes effect on the
/// next gantry session.
#[derive(Debug, Clone)]
pub struct StillImageSource {
    path: PathBuf,
}

impl StillImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CameraSource for StillImageSource {
    fn open(&self) -> CameraResult<Box<dyn CameraInterface>> {
        let image = image::open(&self.path)?.to_rgb8();
        info!(
            "Loaded still image {} ({}x{})",
            self.path.display(),
            image.width(),
            image.height()
        );
        Ok(Box::new(StillImageCamera::new(
            image,
            format!("still:{}", self.path.display()),
        )))
    }
}
