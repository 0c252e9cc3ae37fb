//! Camera-to-gantry calibration for single-step alignment.
//!
//! Stores the fixed scale between camera pixels and gantry millimetres along
//! with the decision thresholds used when centring a target.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Calibration values that cannot drive the gantry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("mm_per_pixel must be positive, got {0}")]
    ScaleNotPositive(f64),

    #[error("tolerance_mm must be non-negative, got {0}")]
    NegativeTolerance(f64),

    #[error("feed_rate must be non-zero")]
    ZeroFeedRate,

    #[error("post_centering_x_mm must be finite, got {0}")]
    NonFinitePostCentering(f64),
}

/// Calibration and motion parameters for an alignment step.
///
/// Fields missing from a calibration file take their default values. Setting
/// `post_centering_x_mm` to `null` disables the post-centring move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentCalibration {
    /// Millimetres of gantry travel per camera pixel (same on both axes)
    pub mm_per_pixel: f64,
    /// Largest per-axis offset, in mm, that counts as centred (inclusive)
    pub tolerance_mm: f64,
    /// Feed rate for generated moves, in mm/min
    pub feed_rate: u32,
    /// X move issued once the target is centred, e.g. to advance to the
    /// next workpiece position
    pub post_centering_x_mm: Option<f64>,
}

impl AlignmentCalibration {
    /// Convert a pixel offset from frame centre to millimetres.
    pub fn pixels_to_mm(&self, dx_px: i64, dy_px: i64) -> (f64, f64) {
        (
            dx_px as f64 * self.mm_per_pixel,
            dy_px as f64 * self.mm_per_pixel,
        )
    }

    /// Check that the values can drive the gantry.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if !self.mm_per_pixel.is_finite() || self.mm_per_pixel <= 0.0 {
            return Err(CalibrationError::ScaleNotPositive(self.mm_per_pixel));
        }
        if !self.tolerance_mm.is_finite() || self.tolerance_mm < 0.0 {
            return Err(CalibrationError::NegativeTolerance(self.tolerance_mm));
        }
        if self.feed_rate == 0 {
            return Err(CalibrationError::ZeroFeedRate);
        }
        if let Some(x) = self.post_centering_x_mm {
            if !x.is_finite() {
                return Err(CalibrationError::NonFinitePostCentering(x));
            }
        }
        Ok(())
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load from JSON file, rejecting values that fail [`validate`](Self::validate)
    pub fn load_from_file(path: &Path) -> Result<Self, io::Error> {
        let json = std::fs::read_to_string(path)?;
        let calibration: Self = serde_json::from_str(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        calibration
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(calibration)
    }
}

impl Default for AlignmentCalibration {
    fn default() -> Self {
        Self {
            mm_per_pixel: 0.01,
            tolerance_mm: 0.01,
            feed_rate: 1000,
            post_centering_x_mm: Some(70.0),
        }
    }
}
