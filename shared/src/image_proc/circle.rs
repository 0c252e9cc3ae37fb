//! Circular target detection using a gradient Hough transform.
//!
//! # Algorithm
//!
//! 1. Canny edge detection (low threshold = half the high threshold)
//! 2. Every edge pixel votes along its Sobel gradient line, in both
//!    directions, for centres between `min_radius` and `max_radius` away.
//!    Votes land in an accumulator whose cells are `accumulator_resolution`
//!    pixels wide.
//! 3. Votes are summed over 3x3 neighbourhoods so that a circle whose
//!    gradient directions scatter by a degree or two still produces a single
//!    strong peak. Local maxima at or above `accumulator_threshold` become
//!    centre candidates, refined to the vote-weighted centroid of their
//!    neighbourhood.
//! 4. Candidates are taken strongest first and dropped if closer than
//!    `min_distance` to an accepted centre.
//! 5. Each accepted centre gets the radius supported by the most edge
//!    pixels. The centre is rejected unless that support reaches both
//!    `accumulator_threshold` and `min_edge_coverage` of the circumference,
//!    so an arc that merely grazes another circle's edge does not count.
//!
//! The returned order follows [`CandidateSelection`], so callers that only
//! want one target take the first entry.

use image::GrayImage;
use imageproc::edges::canny;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use ndarray::Array2;
use serde::Serialize;

/// A detected circle in sub-pixel image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    /// Centre column
    pub x: f64,
    /// Centre row (increasing downwards)
    pub y: f64,
    /// Radius in pixels
    pub radius: f64,
    /// Summed accumulator votes at the centre
    pub votes: u32,
}

impl Circle {
    /// Round to whole pixels.
    pub fn rounded(&self) -> DetectedCircle {
        DetectedCircle {
            pixel_x: self.x.round().max(0.0) as u32,
            pixel_y: self.y.round().max(0.0) as u32,
            pixel_radius: self.radius.round().max(0.0) as u32,
        }
    }
}

/// Circle position and size in whole pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DetectedCircle {
    #[serde(rename = "x")]
    pub pixel_x: u32,
    #[serde(rename = "y")]
    pub pixel_y: u32,
    #[serde(rename = "r")]
    pub pixel_radius: u32,
}

/// Ordering applied when more than one circle is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandidateSelection {
    /// Highest accumulator votes first (ties keep raster order)
    #[default]
    StrongestVotes,
    /// Nearest to the image centre first
    ClosestToCenter,
}

/// Detector capability used by alignment.
pub trait CircleDetector: Send + Sync {
    /// All circles found, best first.
    fn detect(&self, image: &GrayImage) -> Vec<Circle>;

    /// The best circle, if any.
    fn detect_circle(&self, image: &GrayImage) -> Option<Circle> {
        self.detect(image).into_iter().next()
    }
}

/// Tuning for [`HoughCircleDetector`].
#[derive(Debug, Clone, PartialEq)]
pub struct HoughCircleConfig {
    /// Accumulator cell size in image pixels (>= 1.0)
    pub accumulator_resolution: f64,
    /// Minimum distance between detected centres in pixels
    pub min_distance: f64,
    /// Canny high threshold; the low threshold is half of this
    pub canny_high: f32,
    /// Minimum votes for a centre, and minimum edge support for its radius
    pub accumulator_threshold: u32,
    /// Smallest radius searched, in pixels
    pub min_radius: u32,
    /// Largest radius searched, in pixels
    pub max_radius: u32,
    /// Fraction of the circumference (0.0-1.0) that must lie on edge pixels
    pub min_edge_coverage: f64,
    /// Ordering of multiple detections
    pub selection: CandidateSelection,
}

impl Default for HoughCircleConfig {
    fn default() -> Self {
        Self {
            accumulator_resolution: 1.2,
            min_distance: 50.0,
            canny_high: 100.0,
            accumulator_threshold: 45,
            min_radius: 10,
            max_radius: 100,
            min_edge_coverage: 0.4,
            selection: CandidateSelection::StrongestVotes,
        }
    }
}

/// Gradient Hough circle detector.
#[derive(Debug, Clone, Default)]
pub struct HoughCircleDetector {
    config: HoughCircleConfig,
}

impl HoughCircleDetector {
    pub fn new(config: HoughCircleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HoughCircleConfig {
        &self.config
    }

    fn accumulate(
        &self,
        image: &GrayImage,
        dp: f64,
    ) -> (Array2<u32>, Vec<(f64, f64)>) {
        let (width, height) = image.dimensions();
        let acc_w = (width as f64 / dp).ceil() as usize;
        let acc_h = (height as f64 / dp).ceil() as usize;
        let mut acc = Array2::<u32>::zeros((acc_h, acc_w));

        let edges = canny(image, self.config.canny_high * 0.5, self.config.canny_high);
        let gx = horizontal_sobel(image);
        let gy = vertical_sobel(image);

        let min_r = self.config.min_radius as f64;
        let max_r = self.config.max_radius.max(self.config.min_radius) as f64;
        let mut edge_points = Vec::new();

        for (x, y, pixel) in edges.enumerate_pixels() {
            if pixel[0] == 0 {
                continue;
            }
            let dx = gx.get_pixel(x, y)[0] as f64;
            let dy = gy.get_pixel(x, y)[0] as f64;
            let magnitude = dx.hypot(dy);
            if magnitude < f64::EPSILON {
                continue;
            }

            let (px, py) = (x as f64, y as f64);
            let (ux, uy) = (dx / magnitude, dy / magnitude);
            edge_points.push((px, py));

            for sign in [1.0, -1.0] {
                let mut r = min_r;
                while r <= max_r {
                    let cx = px + sign * ux * r;
                    let cy = py + sign * uy * r;
                    if cx < 0.0 || cy < 0.0 || cx >= width as f64 || cy >= height as f64 {
                        break;
                    }
                    let ax = ((cx / dp) as usize).min(acc_w - 1);
                    let ay = ((cy / dp) as usize).min(acc_h - 1);
                    acc[[ay, ax]] += 1;
                    r += dp;
                }
            }
        }

        (acc, edge_points)
    }

    /// Centre candidates as `(x, y, votes)`, strongest first.
    fn find_centers(&self, acc: &Array2<u32>, dp: f64) -> Vec<(f64, f64, u32)> {
        let (acc_h, acc_w) = acc.dim();
        let neighbourhood = |ay: usize, ax: usize| {
            let ys = ay.saturating_sub(1)..=(ay + 1).min(acc_h - 1);
            ys.flat_map(move |ny| {
                (ax.saturating_sub(1)..=(ax + 1).min(acc_w - 1)).map(move |nx| (ny, nx))
            })
        };

        let mut score = Array2::<u32>::zeros((acc_h, acc_w));
        for ((ay, ax), s) in score.indexed_iter_mut() {
            *s = neighbourhood(ay, ax).map(|idx| acc[idx]).sum();
        }

        let mut candidates = Vec::new();
        for ((ay, ax), &s) in score.indexed_iter() {
            if s < self.config.accumulator_threshold || s == 0 {
                continue;
            }
            // Strict maximum over earlier cells, non-strict over later ones,
            // so a plateau yields exactly one peak.
            let is_peak = neighbourhood(ay, ax).all(|(ny, nx)| {
                let other = score[[ny, nx]];
                if (ny, nx) < (ay, ax) {
                    s > other
                } else {
                    s >= other
                }
            });
            if !is_peak {
                continue;
            }

            let (mut sum_x, mut sum_y, mut total) = (0.0, 0.0, 0.0);
            for (ny, nx) in neighbourhood(ay, ax) {
                let w = acc[[ny, nx]] as f64;
                sum_x += w * (nx as f64 + 0.5) * dp;
                sum_y += w * (ny as f64 + 0.5) * dp;
                total += w;
            }
            candidates.push((sum_x / total, sum_y / total, s));
        }

        candidates.sort_by(|a, b| b.2.cmp(&a.2));
        candidates
    }

    /// Radius with the most edge support around `(cx, cy)`, and that support.
    fn estimate_radius(&self, cx: f64, cy: f64, edge_points: &[(f64, f64)]) -> Option<(f64, u32)> {
        let min_r = self.config.min_radius as usize;
        let max_r = self.config.max_radius.max(self.config.min_radius) as usize;
        let mut histogram = vec![0u32; max_r + 2];

        for &(px, py) in edge_points {
            let d = (px - cx).hypot(py - cy).round();
            if d >= min_r as f64 && d <= max_r as f64 {
                histogram[d as usize] += 1;
            }
        }

        let mut best: Option<(f64, u32)> = None;
        for r in min_r.max(1)..=max_r {
            let window = [r - 1, r, r + 1];
            let support: u32 = window.iter().map(|&i| histogram[i]).sum();
            if support == 0 || best.is_some_and(|(_, s)| support <= s) {
                continue;
            }
            let weighted: f64 = window.iter().map(|&i| i as f64 * histogram[i] as f64).sum();
            best = Some((weighted / support as f64, support));
        }

        best.filter(|&(radius, support)| {
            let circumference = std::f64::consts::TAU * radius;
            support >= self.config.accumulator_threshold
                && support as f64 >= self.config.min_edge_coverage * circumference
        })
    }
}

impl CircleDetector for HoughCircleDetector {
    fn detect(&self, image: &GrayImage) -> Vec<Circle> {
        let (width, height) = image.dimensions();
        if width < 3 || height < 3 {
            return Vec::new();
        }

        let dp = self.config.accumulator_resolution.max(1.0);
        let (acc, edge_points) = self.accumulate(image, dp);
        if edge_points.is_empty() {
            return Vec::new();
        }

        let mut accepted: Vec<Circle> = Vec::new();
        for (cx, cy, votes) in self.find_centers(&acc, dp) {
            let too_close = accepted
                .iter()
                .any(|c| (c.x - cx).hypot(c.y - cy) < self.config.min_distance);
            if too_close {
                continue;
            }
            if let Some((radius, _support)) = self.estimate_radius(cx, cy, &edge_points) {
                accepted.push(Circle {
                    x: cx,
                    y: cy,
                    radius,
                    votes,
                });
            }
        }

        if self.config.selection == CandidateSelection::ClosestToCenter {
            let (mx, my) = (width as f64 / 2.0, height as f64 / 2.0);
            accepted.sort_by(|a, b| {
                let da = (a.x - mx).hypot(a.y - my);
                let db = (b.x - mx).hypot(b.y - my);
                da.total_cmp(&db)
            });
        }

        accepted
    }
}
