//! Camera capability used by the frame acquisition loop.
//!
//! The physical camera driver is outside this crate; anything that can hand
//! back an RGB image implements [`CameraInterface`]. A [`CameraSource`] opens
//! a fresh camera each time a gantry session starts.

pub mod mock;
mod still_image;

use image::RgbImage;
use thiserror::Error;

pub use still_image::{StillImageCamera, StillImageSource};

/// Errors reported by a camera.
#[derive(Error, Debug)]
pub enum CameraError {
    /// The camera could not be opened.
    #[error("Camera not available: {0}")]
    NotAvailable(String),

    /// A capture failed; the acquisition loop treats this as terminal.
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// Image loading or conversion failed.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Result type for camera operations.
pub type CameraResult<T> = Result<T, CameraError>;

/// A camera that captures one RGB frame per call.
pub trait CameraInterface: Send {
    /// Capture a frame, blocking until it is available.
    fn capture_frame(&mut self) -> CameraResult<RgbImage>;

    /// Human-readable camera name for logging.
    fn name(&self) -> &str;
}

/// Opens cameras on demand.
pub trait CameraSource: Send + Sync {
    /// Open the camera for a new acquisition session.
    fn open(&self) -> CameraResult<Box<dyn CameraInterface>>;
}
