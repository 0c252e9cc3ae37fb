//! HTTP server driving a serial gantry with camera-guided alignment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hardware::gantry::mock::MockGantry;
use hardware::gantry::{SerialPortOpener, TransportOpener, DEFAULT_BAUD_RATE, DEFAULT_SERIAL_PORT};
use shared::alignment_calibration::AlignmentCalibration;
use shared::camera_interface::mock::{SyntheticCameraSource, SyntheticTarget};
use shared::camera_interface::{CameraSource, StillImageSource};
use shared::config_storage::ConfigStorage;
use shared::image_proc::{CandidateSelection, HoughCircleConfig, HoughCircleDetector};
use test_bench::alignment::AlignmentEngine;
use test_bench::frame_acquisition::AcquisitionConfig;
use test_bench::gantry_server::{router, run_server, AppState, SerialDefaults};
use test_bench::supervisor::{CommandTimeouts, GantrySupervisor};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CameraKind {
    /// Dark disk on a light background
    Synthetic,
    /// Repeat an image loaded from disk
    Still,
}

/// Which circle wins when several are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Selection {
    /// Most accumulator votes
    Strongest,
    /// Nearest to the frame centre
    ClosestToCenter,
}

impl From<Selection> for CandidateSelection {
    fn from(selection: Selection) -> Self {
        match selection {
            Selection::Strongest => CandidateSelection::StrongestVotes,
            Selection::ClosestToCenter => CandidateSelection::ClosestToCenter,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "HTTP server for camera-guided gantry alignment")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// HTTP port
    #[arg(long, default_value_t = 5000)]
    http_port: u16,

    /// Serial device used when a connect request names none
    #[arg(long, default_value = DEFAULT_SERIAL_PORT)]
    serial_port: String,

    /// Baud rate used when a connect request names none
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Simulate the gantry controller instead of opening a serial port
    #[arg(long)]
    mock_gantry: bool,

    /// Camera source
    #[arg(long, value_enum, default_value = "synthetic")]
    camera: CameraKind,

    /// Image file for the still camera
    #[arg(long, required_if_eq("camera", "still"))]
    image: Option<PathBuf>,

    /// Synthetic target offset from frame centre, pixels (x)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    target_dx: i32,

    /// Synthetic target offset from frame centre, pixels (y, image rows)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    target_dy: i32,

    /// Calibration JSON (defaults to ~/.gantry_config/alignment_calibration.json)
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Directory of static frontend files served at /
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Read timeout for commands in milliseconds
    #[arg(long, default_value_t = 5000)]
    command_timeout_ms: u64,

    /// Read timeout for status queries in milliseconds
    #[arg(long, default_value_t = 2000)]
    status_timeout_ms: u64,

    /// Acquisition period in milliseconds
    #[arg(long, default_value_t = 50)]
    frame_period_ms: u64,

    /// Tie-break when more than one circle is detected
    #[arg(long, value_enum, default_value = "strongest")]
    selection: Selection,

    /// Smallest target radius searched, pixels
    #[arg(long, default_value_t = 10)]
    min_radius: u32,

    /// Largest target radius searched, pixels
    #[arg(long, default_value_t = 100)]
    max_radius: u32,

    /// Minimum distance between detected centres, pixels
    #[arg(long, default_value_t = 50.0)]
    min_distance: f64,

    /// Canny high threshold for edge detection
    #[arg(long, default_value_t = 100.0)]
    canny_high: f32,

    /// Minimum accumulator votes for a circle centre
    #[arg(long, default_value_t = 45)]
    accumulator_threshold: u32,

    /// Fraction of a circle's circumference that must lie on edges
    #[arg(long, default_value_t = 0.4)]
    min_edge_coverage: f64,
}

impl Args {
    fn detector_config(&self) -> HoughCircleConfig {
        HoughCircleConfig {
            min_distance: self.min_distance,
            canny_high: self.canny_high,
            accumulator_threshold: self.accumulator_threshold,
            min_radius: self.min_radius,
            max_radius: self.max_radius,
            min_edge_coverage: self.min_edge_coverage,
            selection: self.selection.into(),
            ..HoughCircleConfig::default()
        }
    }
}

fn load_calibration(path: Option<&PathBuf>) -> Result<AlignmentCalibration> {
    if let Some(path) = path {
        return AlignmentCalibration::load_from_file(path)
            .with_context(|| format!("Failed to load calibration from {}", path.display()));
    }

    let stored = ConfigStorage::new()
        .ok()
        .and_then(|storage| storage.get_alignment_calibration());
    match stored {
        Some(Ok(calibration)) => {
            info!("Loaded stored alignment calibration");
            Ok(calibration)
        }
        Some(Err(e)) => {
            warn!("Stored calibration unreadable, using defaults: {e}");
            Ok(AlignmentCalibration::default())
        }
        None => Ok(AlignmentCalibration::default()),
    }
}

fn camera_source(args: &Args) -> Result<Box<dyn CameraSource>> {
    match args.camera {
        CameraKind::Synthetic => {
            let target = SyntheticTarget {
                center: Some((640 + args.target_dx, 360 + args.target_dy)),
                ..SyntheticTarget::default()
            };
            Ok(Box::new(SyntheticCameraSource::new(target)))
        }
        CameraKind::Still => {
            let path = args
                .image
                .clone()
                .context("--image is required for the still camera")?;
            Ok(Box::new(StillImageSource::new(path)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let calibration = load_calibration(args.calibration.as_ref())?;
    calibration.validate().context("Invalid calibration")?;
    info!("Calibration: {calibration:?}");

    let detector_config = args.detector_config();
    anyhow::ensure!(
        detector_config.min_radius <= detector_config.max_radius,
        "--min-radius {} exceeds --max-radius {}",
        detector_config.min_radius,
        detector_config.max_radius
    );
    info!("Detector: {detector_config:?}");
    let engine = AlignmentEngine::new(Box::new(HoughCircleDetector::new(detector_config)));

    let opener: Arc<dyn TransportOpener> = if args.mock_gantry {
        info!("Using simulated gantry controller");
        Arc::new(MockGantry::new())
    } else {
        Arc::new(SerialPortOpener)
    };

    let supervisor = GantrySupervisor::new(opener, camera_source(&args)?)
        .with_calibration(calibration)
        .with_engine(engine)
        .with_timeouts(CommandTimeouts {
            command: Duration::from_millis(args.command_timeout_ms),
            status: Duration::from_millis(args.status_timeout_ms),
        })
        .with_acquisition_config(AcquisitionConfig {
            period: Duration::from_millis(args.frame_period_ms),
            ..Default::default()
        });

    let state = AppState {
        supervisor: Arc::new(supervisor),
        defaults: SerialDefaults {
            port: args.serial_port.clone(),
            baud_rate: args.baud,
        },
    };

    let addr: SocketAddr = format!("{}:{}", args.bind, args.http_port)
        .parse()
        .with_context(|| format!("Invalid bind address {}", args.bind))?;

    run_server(addr, router(state, args.static_dir.clone()))
        .await
        .context("HTTP server failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_defaults_match_library() {
        let args = Args::try_parse_from(["gantry_serve"]).unwrap();
        assert_eq!(args.detector_config(), HoughCircleConfig::default());
    }

    #[test]
    fn test_selection_flag() {
        let args = Args::try_parse_from([
            "gantry_serve",
            "--selection",
            "closest-to-center",
            "--min-radius",
            "15",
            "--max-radius",
            "60",
        ])
        .unwrap();

        let config = args.detector_config();
        assert_eq!(config.selection, CandidateSelection::ClosestToCenter);
        assert_eq!((config.min_radius, config.max_radius), (15, 60));
    }

    #[test]
    fn test_unknown_selection_rejected() {
        assert!(Args::try_parse_from(["gantry_serve", "--selection", "largest"]).is_err());
    }
}
