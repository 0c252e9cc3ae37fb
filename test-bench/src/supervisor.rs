//! Gantry session orchestration.
//!
//! [`GantrySupervisor`] owns the serial link, the frame buffer and the
//! acquisition loop for the lifetime of the process. A session is either
//! `Disconnected` or `Connected`; `connect` only reports `Connected` once the
//! link is open and the acquisition thread is running, and undoes the link
//! if the camera side fails.
//!
//! Every operation is blocking. Request handlers in async contexts should
//! call them through `spawn_blocking`.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hardware::gantry::{
    ConnectError, GcodeCommand, JogDirection, LinkError, MachineStatus, ProtocolError,
    ResponseText, SerialLink, TransportOpener, STATUS_QUERY,
};
use serde::Serialize;
use shared::alignment_calibration::AlignmentCalibration;
use shared::camera_interface::{CameraError, CameraSource};
use shared::frame_buffer::{Frame, FrameBuffer};
use thiserror::Error;
use tracing::{info, warn};

use crate::alignment::{Alignment, AlignmentDecision, AlignmentEngine, AlignmentError};
use crate::frame_acquisition::{AcquisitionConfig, CaptureState, FrameAcquisition};

/// Errors surfaced by supervisor operations.
#[derive(Error, Debug)]
pub enum GantryError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(#[source] CameraError),

    #[error("Failed to start frame acquisition: {0}")]
    AcquisitionStart(#[source] io::Error),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Alignment(#[from] AlignmentError),
}

/// Result type for supervisor operations.
pub type GantryResult<T> = Result<T, GantryError>;

/// Read timeouts per kind of exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeouts {
    /// Motion and raw commands
    pub command: Duration,
    /// Position queries
    pub status: Duration,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(5),
            status: Duration::from_secs(2),
        }
    }
}

/// Session state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Disconnected,
    Connected,
}

/// Result of [`GantrySupervisor::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    AlreadyConnected,
}

/// A command together with the controller's reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReply {
    pub command: GcodeCommand,
    pub response: ResponseText,
}

/// Machine status plus acquisition health.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GantryStatus {
    pub session: SessionState,
    #[serde(flatten)]
    pub machine: MachineStatus,
    pub capture: CaptureState,
    pub frames_published: u64,
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
}

/// Result of one alignment step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentOutcome {
    #[serde(flatten)]
    pub alignment: Alignment,
    /// Command sent to the gantry, with its reply
    pub sent: Option<CommandReply>,
}

impl AlignmentOutcome {
    /// Operator-facing summary.
    pub fn message(&self) -> String {
        match &self.alignment.decision {
            AlignmentDecision::AlreadyCentered { .. } => "Circle is already centered".to_string(),
            AlignmentDecision::Correction { command, .. } => {
                format!("Alignment correction sent: {command}")
            }
            AlignmentDecision::NoTargetFound => "No circles detected in image".to_string(),
        }
    }
}

struct Session {
    acquisition: FrameAcquisition,
    port: String,
    baud_rate: u32,
}

/// Owns the gantry link and camera pipeline.
pub struct GantrySupervisor {
    link: SerialLink,
    frames: Arc<FrameBuffer>,
    camera_source: Box<dyn CameraSource>,
    engine: AlignmentEngine,
    calibration: AlignmentCalibration,
    timeouts: CommandTimeouts,
    acquisition_config: AcquisitionConfig,
    session: Mutex<Option<Session>>,
}

impl GantrySupervisor {
    pub fn new(opener: Arc<dyn TransportOpener>, camera_source: Box<dyn CameraSource>) -> Self {
        Self {
            link: SerialLink::new(opener),
            frames: Arc::new(FrameBuffer::new()),
            camera_source,
            engine: AlignmentEngine::default(),
            calibration: AlignmentCalibration::default(),
            timeouts: CommandTimeouts::default(),
            acquisition_config: AcquisitionConfig::default(),
            session: Mutex::new(None),
        }
    }

    pub fn with_engine(mut self, engine: AlignmentEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_calibration(mut self, calibration: AlignmentCalibration) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_timeouts(mut self, timeouts: CommandTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_acquisition_config(mut self, config: AcquisitionConfig) -> Self {
        self.acquisition_config = config;
        self
    }

    /// Serial polling interval used while waiting for responses.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.link.set_poll_interval(poll_interval);
        self
    }

    pub fn calibration(&self) -> &AlignmentCalibration {
        &self.calibration
    }

    /// Shared frame buffer fed by the acquisition loop.
    pub fn frames(&self) -> Arc<FrameBuffer> {
        self.frames.clone()
    }

    pub fn session_state(&self) -> SessionState {
        if self.lock_session().is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    /// Open the link and start acquisition.
    ///
    /// A no-op if a session is already running, whatever port it was opened
    /// on.
    pub fn connect(&self, port: &str, baud_rate: u32) -> GantryResult<ConnectOutcome> {
        let mut session = self.lock_session();
        if let Some(current) = session.as_ref() {
            info!(
                "Gantry already connected on {} at {} baud",
                current.port, current.baud_rate
            );
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        self.link.open(port, baud_rate)?;

        let camera = match self.camera_source.open() {
            Ok(camera) => camera,
            Err(e) => {
                warn!("Camera failed to open, releasing {port}: {e}");
                self.link.close();
                return Err(GantryError::CameraUnavailable(e));
            }
        };

        let acquisition = match FrameAcquisition::spawn(
            camera,
            self.frames.clone(),
            self.acquisition_config.clone(),
        ) {
            Ok(acquisition) => acquisition,
            Err(e) => {
                warn!("Acquisition thread failed to start, releasing {port}: {e}");
                self.link.close();
                return Err(GantryError::AcquisitionStart(e));
            }
        };

        *session = Some(Session {
            acquisition,
            port: port.to_string(),
            baud_rate,
        });
        info!("Gantry connected on {port} at {baud_rate} baud");
        Ok(ConnectOutcome::Connected)
    }

    /// Stop acquisition, close the link and drop the last frame. Idempotent.
    pub fn disconnect(&self) {
        // Close first so an in-flight request gives up on its next poll
        self.link.close();

        let previous = self.lock_session().take();
        if let Some(mut session) = previous {
            session.acquisition.stop();
            info!(
                "Gantry disconnected from {} after {} frames",
                session.port,
                session.acquisition.frames_published()
            );
        }
        self.frames.clear();
    }

    /// Validate and send a raw command.
    pub fn send_command(&self, raw: &str) -> GantryResult<CommandReply> {
        let command = GcodeCommand::parse(raw)?;
        self.execute(command, self.timeouts.command)
    }

    /// Jog one axis by `step_mm`, or home for [`JogDirection::Home`].
    pub fn jog(&self, direction: JogDirection, step_mm: f64, feed_rate: u32) -> GantryResult<CommandReply> {
        self.execute(GcodeCommand::jog(direction, step_mm, feed_rate), self.timeouts.command)
    }

    /// Query position and report session health.
    ///
    /// Does not touch the link while disconnected.
    pub fn status(&self) -> GantryResult<GantryStatus> {
        let (capture, frames_published, endpoint) = match self.lock_session().as_ref() {
            Some(session) => (
                session.acquisition.state(),
                session.acquisition.frames_published(),
                Some((session.port.clone(), session.baud_rate)),
            ),
            None => {
                return Ok(GantryStatus {
                    session: SessionState::Disconnected,
                    machine: MachineStatus::disconnected(),
                    capture: CaptureState::Stopped,
                    frames_published: 0,
                    port: None,
                    baud_rate: None,
                })
            }
        };

        let response = self.link.request(STATUS_QUERY, self.timeouts.status)?;
        let machine = MachineStatus::from_response(self.link.state(), &response.text());

        Ok(GantryStatus {
            session: SessionState::Connected,
            machine,
            capture,
            frames_published,
            port: endpoint.as_ref().map(|(port, _)| port.clone()),
            baud_rate: endpoint.map(|(_, baud)| baud),
        })
    }

    /// Align once on the latest frame and send the resulting move.
    ///
    /// A centred target sends the post-centering move when one is configured.
    pub fn run_alignment_step(&self) -> GantryResult<AlignmentOutcome> {
        self.require_connected()?;

        let frame = self.latest_frame()?;

        let alignment = self.engine.compute_alignment(&frame, &self.calibration);
        info!(
            "Alignment on frame {}: {:?}",
            frame.frame_number, alignment.decision
        );

        let command = match alignment.decision.command() {
            Some(command) => command.clone(),
            None if alignment.decision == AlignmentDecision::NoTargetFound => {
                return Err(AlignmentError::NoTargetFound.into());
            }
            None => {
                return Ok(AlignmentOutcome {
                    alignment,
                    sent: None,
                })
            }
        };

        let sent = self.execute(command, self.timeouts.command)?;
        Ok(AlignmentOutcome {
            alignment,
            sent: Some(sent),
        })
    }

    /// Most recent frame from a live acquisition loop.
    ///
    /// Fails once capture has stopped with an error instead of handing out
    /// the last frame it managed to publish.
    pub fn latest_frame(&self) -> GantryResult<Arc<Frame>> {
        if let Some(session) = self.lock_session().as_ref() {
            if let CaptureState::Failed { reason } = session.acquisition.state() {
                return Err(AlignmentError::CaptureStopped { reason }.into());
            }
        }
        self.frames
            .snapshot()
            .ok_or_else(|| AlignmentError::NoFrameAvailable.into())
    }

    fn execute(&self, command: GcodeCommand, timeout: Duration) -> GantryResult<CommandReply> {
        self.require_connected()?;
        let response = self.link.request(command.as_str(), timeout)?;
        Ok(CommandReply { command, response })
    }

    fn require_connected(&self) -> Result<(), LinkError> {
        match self.session_state() {
            SessionState::Connected => Ok(()),
            SessionState::Disconnected => Err(LinkError::NotConnected),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for GantrySupervisor {
    fn drop(&mut self) {
        self.disconnect();
    }
}
