//! Background frame acquisition.
//!
//! A dedicated thread captures a frame, draws the operator reticle, encodes it
//! to JPEG and publishes it into the shared [`FrameBuffer`], once per period.
//! A slow cycle simply starts the next one late; the buffer already discards
//! frames nobody read.
//!
//! Capture and encode failures are terminal: the thread logs the error, marks
//! the loop [`CaptureState::Failed`] and exits. Restarting requires a new
//! [`FrameAcquisition`].

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use shared::camera_interface::{CameraError, CameraInterface};
use shared::frame_buffer::{Frame, FrameBuffer};
use shared::image_proc::{draw_reticle, encode_rgb_jpeg, ReticleStyle, DEFAULT_JPEG_QUALITY};
use thiserror::Error;
use tracing::{debug, error, info};

/// Target cycle period (about 20 frames per second).
pub const DEFAULT_FRAME_PERIOD: Duration = Duration::from_millis(50);

/// Errors that end an acquisition loop.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("Camera capture failed: {0}")]
    Capture(#[from] CameraError),

    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Observable state of the acquisition loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum CaptureState {
    Running,
    Stopped,
    Failed { reason: String },
}

/// Loop tuning.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Target time between cycle starts
    pub period: Duration,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Overlay drawn on every frame
    pub reticle: ReticleStyle,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_FRAME_PERIOD,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            reticle: ReticleStyle::default(),
        }
    }
}

#[derive(Debug)]
struct LoopStatus {
    state: Mutex<CaptureState>,
    frames_published: AtomicU64,
}

impl LoopStatus {
    fn state(&self) -> CaptureState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, state: CaptureState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Handle to a running acquisition thread.
///
/// Dropping the handle stops the thread and waits for it to exit.
pub struct FrameAcquisition {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    status: Arc<LoopStatus>,
}

impl FrameAcquisition {
    /// Start acquiring from `camera` into `buffer`.
    pub fn spawn(
        camera: Box<dyn CameraInterface>,
        buffer: Arc<FrameBuffer>,
        config: AcquisitionConfig,
    ) -> io::Result<Self> {
        let status = Arc::new(LoopStatus {
            state: Mutex::new(CaptureState::Running),
            frames_published: AtomicU64::new(0),
        });
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);

        let thread_status = status.clone();
        let handle = std::thread::Builder::new()
            .name("frame-acquisition".into())
            .spawn(move || run_loop(camera, buffer, config, thread_status, stop_rx))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            status,
        })
    }

    pub fn state(&self) -> CaptureState {
        self.status.state()
    }

    pub fn frames_published(&self) -> u64 {
        self.status.frames_published.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.state() == CaptureState::Running
    }

    /// Stop the loop and wait for the thread. Idempotent.
    ///
    /// A capture already in progress finishes before the thread exits.
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the channel, which the loop treats as stop
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                self.status.set_state(CaptureState::Failed {
                    reason: "acquisition thread panicked".to_string(),
                });
            }
        }
    }
}

impl Drop for FrameAcquisition {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    mut camera: Box<dyn CameraInterface>,
    buffer: Arc<FrameBuffer>,
    config: AcquisitionConfig,
    status: Arc<LoopStatus>,
    stop_rx: Receiver<()>,
) {
    info!(
        "Frame acquisition started on {} (period {:?})",
        camera.name(),
        config.period
    );
    let mut frame_number = 0u64;

    loop {
        let cycle_start = Instant::now();

        match acquire_frame(camera.as_mut(), &config, frame_number) {
            Ok(frame) => {
                buffer.publish(frame);
                frame_number += 1;
                status.frames_published.store(frame_number, Ordering::Relaxed);
            }
            Err(e) => {
                error!("Frame acquisition on {} stopped: {e}", camera.name());
                status.set_state(CaptureState::Failed {
                    reason: e.to_string(),
                });
                return;
            }
        }

        let remaining = config.period.saturating_sub(cycle_start.elapsed());
        if remaining.is_zero() {
            debug!("Frame {frame_number} overran period by {:?}", cycle_start.elapsed() - config.period);
        }
        match stop_rx.recv_timeout(remaining) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("Frame acquisition stopped after {frame_number} frames");
    status.set_state(CaptureState::Stopped);
}

/// One cycle: capture, annotate, encode.
fn acquire_frame(
    camera: &mut dyn CameraInterface,
    config: &AcquisitionConfig,
    frame_number: u64,
) -> Result<Frame, AcquisitionError> {
    let mut image = camera.capture_frame()?;
    let captured_at = SystemTime::now();

    draw_reticle(&mut image, &config.reticle);
    let jpeg_data = encode_rgb_jpeg(&image, config.jpeg_quality)?;

    Ok(Frame {
        jpeg_data,
        width: image.width(),
        height: image.height(),
        captured_at,
        frame_number,
    })
}
