//! Vision-to-motion alignment step.
//!
//! Decodes the published frame, finds the circular target and turns its
//! offset from the frame centre into a machine move:
//!
//! ```text
//! dx_px = circle_x - width / 2
//! dy_px = height / 2 - circle_y     (image rows grow downwards, machine Y grows upwards)
//! dx_mm = dx_px * mm_per_pixel
//! ```
//!
//! Both axes within tolerance (inclusive) means the target is centred and
//! the optional post-centering X move is issued instead of a correction.
//!
//! The frame carries the operator reticle. The 7x7 median applied before
//! detection erases its one-pixel strokes, and its ring is smaller than the
//! minimum detection radius, so it never registers as a target.

use image::GrayImage;
use imageproc::filter::median_filter;
use serde::Serialize;
use shared::alignment_calibration::AlignmentCalibration;
use shared::frame_buffer::Frame;
use shared::image_proc::{decode_luma, CircleDetector, DetectedCircle, HoughCircleDetector};
use thiserror::Error;
use tracing::{debug, warn};

use hardware::gantry::GcodeCommand;

/// Median kernel radius (7x7 window).
pub const DEFAULT_MEDIAN_RADIUS: u32 = 3;

/// Reasons an alignment step cannot produce a move.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlignmentError {
    #[error("No camera feed available")]
    NoFrameAvailable,

    #[error("No circles detected in image")]
    NoTargetFound,

    /// The acquisition loop has failed; the last frame is stale.
    #[error("Capture stopped: {reason}")]
    CaptureStopped { reason: String },
}

/// Outcome of classifying a target offset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AlignmentDecision {
    /// Offset within tolerance on both axes.
    AlreadyCentered {
        /// Post-centering move, when the calibration asks for one
        follow_up: Option<GcodeCommand>,
    },
    /// Offset outside tolerance; `command` moves the gantry by the offset.
    Correction {
        dx_mm: f64,
        dy_mm: f64,
        command: GcodeCommand,
    },
    NoTargetFound,
}

impl AlignmentDecision {
    /// The command this decision asks the gantry to execute, if any.
    pub fn command(&self) -> Option<&GcodeCommand> {
        match self {
            Self::AlreadyCentered { follow_up } => follow_up.as_ref(),
            Self::Correction { command, .. } => Some(command),
            Self::NoTargetFound => None,
        }
    }
}

/// Decision plus the circle it was based on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alignment {
    pub decision: AlignmentDecision,
    pub circle: Option<DetectedCircle>,
}

/// Pixel offset of `circle` from the frame centre, machine-oriented.
pub fn pixel_offset(circle: &DetectedCircle, width: u32, height: u32) -> (i64, i64) {
    let center_x = i64::from(width / 2);
    let center_y = i64::from(height / 2);
    (
        i64::from(circle.pixel_x) - center_x,
        center_y - i64::from(circle.pixel_y),
    )
}

/// Classify an offset in millimetres.
pub fn decide(dx_mm: f64, dy_mm: f64, calibration: &AlignmentCalibration) -> AlignmentDecision {
    let tolerance = calibration.tolerance_mm;
    if dx_mm.abs() <= tolerance && dy_mm.abs() <= tolerance {
        AlignmentDecision::AlreadyCentered {
            follow_up: calibration
                .post_centering_x_mm
                .map(|x_mm| GcodeCommand::x_move(x_mm, calibration.feed_rate)),
        }
    } else {
        AlignmentDecision::Correction {
            dx_mm,
            dy_mm,
            command: GcodeCommand::linear_move(dx_mm, dy_mm, calibration.feed_rate),
        }
    }
}

/// Detects the target in a frame and decides the corrective move.
pub struct AlignmentEngine {
    detector: Box<dyn CircleDetector>,
    median_radius: u32,
}

impl AlignmentEngine {
    pub fn new(detector: Box<dyn CircleDetector>) -> Self {
        Self {
            detector,
            median_radius: DEFAULT_MEDIAN_RADIUS,
        }
    }

    /// Override the smoothing kernel radius (0 disables smoothing).
    pub fn with_median_radius(mut self, radius: u32) -> Self {
        self.median_radius = radius;
        self
    }

    /// Find the target in an encoded frame.
    ///
    /// Returns the circle together with the decoded image dimensions.
    pub fn detect_target(&self, jpeg_data: &[u8]) -> Option<(DetectedCircle, u32, u32)> {
        let gray = match decode_luma(jpeg_data) {
            Ok(gray) => gray,
            Err(e) => {
                warn!("Frame could not be decoded: {e}");
                return None;
            }
        };
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        let smoothed = self.smooth(gray);
        let circle = self.detector.detect_circle(&smoothed)?.rounded();
        debug!(
            "Target at ({}, {}) r={} in {width}x{height} frame",
            circle.pixel_x, circle.pixel_y, circle.pixel_radius
        );
        Some((circle, width, height))
    }

    /// Run one alignment computation on `frame`.
    ///
    /// Deterministic for a given frame and calibration.
    pub fn compute_alignment(&self, frame: &Frame, calibration: &AlignmentCalibration) -> Alignment {
        let Some((circle, width, height)) = self.detect_target(&frame.jpeg_data) else {
            return Alignment {
                decision: AlignmentDecision::NoTargetFound,
                circle: None,
            };
        };

        let (dx_px, dy_px) = pixel_offset(&circle, width, height);
        let (dx_mm, dy_mm) = calibration.pixels_to_mm(dx_px, dy_px);

        Alignment {
            decision: decide(dx_mm, dy_mm, calibration),
            circle: Some(circle),
        }
    }

    fn smooth(&self, gray: GrayImage) -> GrayImage {
        if self.median_radius == 0 {
            gray
        } else {
            median_filter(&gray, self.median_radius, self.median_radius)
        }
    }
}

impl Default for AlignmentEngine {
    fn default() -> Self {
        Self::new(Box::new(HoughCircleDetector::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use bytes::Bytes;
    use image::{Rgb, RgbImage};
    use shared::camera_interface::mock::SyntheticTarget;
    use shared::image_proc::{draw_reticle, encode_rgb_jpeg, Circle, ReticleStyle};
    use std::time::SystemTime;

    /// Reports the same circle for every image.
    struct FixedDetector(Option<(f64, f64)>);

    impl CircleDetector for FixedDetector {
        fn detect(&self, _image: &GrayImage) -> Vec<Circle> {
            self.0
                .map(|(x, y)| Circle {
                    x,
                    y,
                    radius: 20.0,
                    votes: 100,
                })
                .into_iter()
                .collect()
        }
    }

    fn frame_from(image: &RgbImage) -> Frame {
        Frame {
            jpeg_data: encode_rgb_jpeg(image, 85).unwrap(),
            width: image.width(),
            height: image.height(),
            captured_at: SystemTime::UNIX_EPOCH,
            frame_number: 0,
        }
    }

    fn blank_frame(width: u32, height: u32) -> Frame {
        frame_from(&RgbImage::from_pixel(width, height, Rgb([210, 210, 210])))
    }

    fn fixed_engine(x: f64, y: f64) -> AlignmentEngine {
        AlignmentEngine::new(Box::new(FixedDetector(Some((x, y))))).with_median_radius(0)
    }

    #[test]
    fn test_offset_right_of_center_sends_correction() {
        let engine = fixed_engine(645.0, 360.0);
        let alignment =
            engine.compute_alignment(&blank_frame(1280, 720), &AlignmentCalibration::default());

        let AlignmentDecision::Correction {
            dx_mm,
            dy_mm,
            command,
        } = &alignment.decision
        else {
            panic!("expected correction, got {:?}", alignment.decision);
        };
        assert_relative_eq!(*dx_mm, 0.05, epsilon = 1e-12);
        assert_relative_eq!(*dy_mm, 0.0);
        assert_eq!(command.as_str(), "G1 X0.05 Y0.00 F1000");
        assert_eq!(alignment.circle.map(|c| (c.pixel_x, c.pixel_y)), Some((645, 360)));
    }

    #[test]
    fn test_exact_center_is_already_centered() {
        let engine = fixed_engine(640.0, 360.0);
        let alignment =
            engine.compute_alignment(&blank_frame(1280, 720), &AlignmentCalibration::default());

        assert_eq!(
            alignment.decision.command().map(GcodeCommand::as_str),
            Some("G1 X70 F1000")
        );
        assert!(matches!(
            alignment.decision,
            AlignmentDecision::AlreadyCentered { .. }
        ));
    }

    #[test]
    fn test_vertical_axis_is_inverted() {
        // Target above centre in the image is positive machine Y
        let circle = DetectedCircle {
            pixel_x: 640,
            pixel_y: 350,
            pixel_radius: 20,
        };
        assert_eq!(pixel_offset(&circle, 1280, 720), (0, 10));
    }

    #[test]
    fn test_odd_dimensions_use_integer_center() {
        let circle = DetectedCircle {
            pixel_x: 2,
            pixel_y: 2,
            pixel_radius: 1,
        };
        assert_eq!(pixel_offset(&circle, 5, 5), (0, 0));
    }

    #[test]
    fn test_tolerance_bound_is_inclusive() {
        let calibration = AlignmentCalibration {
            tolerance_mm: 0.25,
            ..Default::default()
        };

        assert!(matches!(
            decide(0.25, -0.25, &calibration),
            AlignmentDecision::AlreadyCentered { .. }
        ));
        assert!(matches!(
            decide(0.25 + 0.0001, 0.0, &calibration),
            AlignmentDecision::Correction { .. }
        ));
        assert!(matches!(
            decide(0.0, -0.2501, &calibration),
            AlignmentDecision::Correction { .. }
        ));
    }

    #[test]
    fn test_centered_without_follow_up() {
        let calibration = AlignmentCalibration {
            post_centering_x_mm: None,
            ..Default::default()
        };
        assert_eq!(
            decide(0.0, 0.0, &calibration),
            AlignmentDecision::AlreadyCentered { follow_up: None }
        );
    }

    #[test]
    fn test_correction_uses_calibration_feed_rate() {
        let calibration = AlignmentCalibration {
            feed_rate: 600,
            ..Default::default()
        };
        let decision = decide(-1.234, 0.5, &calibration);
        assert_eq!(
            decision.command().map(GcodeCommand::as_str),
            Some("G1 X-1.23 Y0.50 F600")
        );
    }

    #[test]
    fn test_no_detection_is_no_target() {
        let engine = AlignmentEngine::new(Box::new(FixedDetector(None)));
        let alignment =
            engine.compute_alignment(&blank_frame(64, 48), &AlignmentCalibration::default());
        assert_eq!(alignment.decision, AlignmentDecision::NoTargetFound);
        assert_eq!(alignment.circle, None);
    }

    #[test]
    fn test_undecodable_frame_is_no_target() {
        let engine = fixed_engine(10.0, 10.0);
        let frame = Frame {
            jpeg_data: Bytes::from_static(b"not a jpeg"),
            width: 0,
            height: 0,
            captured_at: SystemTime::UNIX_EPOCH,
            frame_number: 0,
        };
        let alignment = engine.compute_alignment(&frame, &AlignmentCalibration::default());
        assert_eq!(alignment.decision, AlignmentDecision::NoTargetFound);
    }

    #[test]
    fn test_detects_synthetic_target_through_reticle() {
        let target = SyntheticTarget::offset_from_center(640, 480, 60, -40);
        let mut image = target.render();
        draw_reticle(&mut image, &ReticleStyle::default());

        let engine = AlignmentEngine::default();
        let alignment = engine.compute_alignment(&frame_from(&image), &AlignmentCalibration::default());

        let circle = alignment.circle.expect("target detected");
        assert!(circle.pixel_x.abs_diff(380) <= 2, "x = {}", circle.pixel_x);
        assert!(circle.pixel_y.abs_diff(200) <= 2, "y = {}", circle.pixel_y);
        assert!(matches!(alignment.decision, AlignmentDecision::Correction { .. }));
    }

    #[test]
    fn test_reticle_alone_is_not_a_target() {
        let mut image = RgbImage::from_pixel(640, 480, Rgb([210, 210, 210]));
        draw_reticle(&mut image, &ReticleStyle::default());

        let alignment =
            AlignmentEngine::default().compute_alignment(&frame_from(&image), &AlignmentCalibration::default());
        assert_eq!(alignment.decision, AlignmentDecision::NoTargetFound);
    }

    #[test]
    fn test_compute_alignment_is_deterministic() {
        let image = SyntheticTarget::offset_from_center(320, 240, -25, 15).render();
        let frame = frame_from(&image);
        let engine = AlignmentEngine::default();
        let calibration = AlignmentCalibration::default();

        let first = engine.compute_alignment(&frame, &calibration);
        for _ in 0..3 {
            assert_eq!(engine.compute_alignment(&frame, &calibration), first);
        }
    }

    #[test]
    fn test_decision_serialization() {
        let decision = decide(0.05, 0.0, &AlignmentCalibration::default());
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["kind"], "correction");
        assert_eq!(json["command"], "G1 X0.05 Y0.00 F1000");
        assert!(json.get("dxMm").is_some());
    }
}
