//! Operator targeting reticle drawn over published frames.
//!
//! The reticle is cosmetic. Detection runs on the annotated frame, so the
//! default stroke is a single pixel wide (erased by the 7x7 median blur that
//! precedes detection) and the ring radius sits below the detector's minimum
//! radius.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};

/// Reticle geometry and colour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReticleStyle {
    /// Half length of each crosshair line in pixels
    pub half_length: u32,
    /// Radius of the centre ring in pixels
    pub ring_radius: u32,
    /// Stroke colour
    pub color: Rgb<u8>,
}

impl Default for ReticleStyle {
    fn default() -> Self {
        Self {
            half_length: 25,
            ring_radius: 6,
            color: Rgb([0, 255, 0]),
        }
    }
}

/// Draw a crosshair and centre ring at the frame centre.
pub fn draw_reticle(image: &mut RgbImage, style: &ReticleStyle) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    let cx = (width / 2) as f32;
    let cy = (height / 2) as f32;
    let half = style.half_length as f32;

    draw_line_segment_mut(image, (cx - half, cy), (cx + half, cy), style.color);
    draw_line_segment_mut(image, (cx, cy - half), (cx, cy + half), style.color);
    draw_hollow_circle_mut(
        image,
        ((width / 2) as i32, (height / 2) as i32),
        style.ring_radius as i32,
        style.color,
    );
}
