//! Image processing for frame annotation, encoding and target detection.

pub mod circle;
pub mod jpeg;
pub mod reticle;

pub use circle::{
    CandidateSelection, Circle, CircleDetector, DetectedCircle, HoughCircleConfig,
    HoughCircleDetector,
};
pub use jpeg::{decode_luma, encode_rgb_jpeg, DEFAULT_JPEG_QUALITY};
pub use reticle::{draw_reticle, ReticleStyle};
