//! End-to-end supervisor tests against the simulated controller and camera.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hardware::gantry::mock::MockGantry;
use hardware::gantry::{JogDirection, LinkError, LinkState};
use shared::alignment_calibration::AlignmentCalibration;
use shared::camera_interface::mock::{SyntheticCameraSource, SyntheticTarget};
use test_bench::alignment::{AlignmentDecision, AlignmentError};
use test_bench::frame_acquisition::{AcquisitionConfig, CaptureState};
use test_bench::supervisor::{
    CommandTimeouts, ConnectOutcome, GantryError, GantrySupervisor, SessionState,
};

const PORT: &str = "/dev/ttyMOCK0";

fn target(dx: i32, dy: i32) -> SyntheticTarget {
    SyntheticTarget {
        width: 320,
        height: 240,
        center: Some((160 + dx, 120 + dy)),
        radius: 30,
        ..SyntheticTarget::default()
    }
}

fn supervisor(gantry: &MockGantry, camera: SyntheticCameraSource) -> GantrySupervisor {
    GantrySupervisor::new(Arc::new(gantry.clone()), Box::new(camera))
        .with_poll_interval(Duration::from_millis(5))
        .with_acquisition_config(AcquisitionConfig {
            period: Duration::from_millis(10),
            ..Default::default()
        })
}

fn wait_for_frame(supervisor: &GantrySupervisor) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while supervisor.frames().snapshot().is_none() {
        assert!(Instant::now() < deadline, "no frame published");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_connect_is_idempotent() {
    let gantry = MockGantry::new();
    let supervisor = supervisor(&gantry, SyntheticCameraSource::new(target(0, 0)));

    assert_eq!(supervisor.connect(PORT, 115_200).unwrap(), ConnectOutcome::Connected);
    assert_eq!(
        supervisor.connect(PORT, 115_200).unwrap(),
        ConnectOutcome::AlreadyConnected
    );
    assert_eq!(gantry.open_count(), 1);
    assert_eq!(supervisor.session_state(), SessionState::Connected);

    let status = supervisor.status().unwrap();
    assert_eq!(status.capture, CaptureState::Running);
    assert_eq!(status.port.as_deref(), Some(PORT));
}

#[test]
fn test_connect_port_unavailable() {
    let gantry = MockGantry::unavailable();
    let supervisor = supervisor(&gantry, SyntheticCameraSource::new(target(0, 0)));

    let err = supervisor.connect(PORT, 115_200).unwrap_err();
    assert!(matches!(err, GantryError::Connect(_)), "got {err:?}");
    assert_eq!(supervisor.session_state(), SessionState::Disconnected);
}

#[test]
fn test_camera_failure_releases_link() {
    let gantry = MockGantry::new();
    let camera = SyntheticCameraSource::new(target(0, 0));
    camera.set_available(false);
    let supervisor = supervisor(&gantry, camera.clone());

    let err = supervisor.connect(PORT, 115_200).unwrap_err();
    assert!(matches!(err, GantryError::CameraUnavailable(_)), "got {err:?}");
    assert_eq!(supervisor.session_state(), SessionState::Disconnected);

    let status = supervisor.status().unwrap();
    assert_eq!(status.machine.connection_state, LinkState::Disconnected);

    camera.set_available(true);
    assert_eq!(supervisor.connect(PORT, 115_200).unwrap(), ConnectOutcome::Connected);
    assert_eq!(gantry.open_count(), 2);
}

#[test]
fn test_send_command_and_status() {
    let gantry = MockGantry::new();
    let supervisor = supervisor(&gantry, SyntheticCameraSource::new(target(0, 0)));
    supervisor.connect(PORT, 115_200).unwrap();

    let reply = supervisor.send_command("  G1 X10 Y5 F1000  ").unwrap();
    assert_eq!(reply.command.as_str(), "G1 X10 Y5 F1000");
    assert_eq!(reply.response.text(), "ok");

    let status = supervisor.status().unwrap();
    assert_eq!(status.session, SessionState::Connected);
    assert_eq!(status.machine.connection_state, LinkState::Idle);
    assert_eq!(status.machine.position.x, 10.0);
    assert_eq!(status.machine.position.y, 5.0);
    assert!(status.machine.raw_last_response.ends_with("ok"));
}

#[test]
fn test_send_command_validation() {
    let gantry = MockGantry::new();
    let supervisor = supervisor(&gantry, SyntheticCameraSource::new(target(0, 0)));

    assert!(matches!(
        supervisor.send_command("   "),
        Err(GantryError::Protocol(_))
    ));
    assert!(matches!(
        supervisor.send_command("G28"),
        Err(GantryError::Link(LinkError::NotConnected))
    ));

    supervisor.connect(PORT, 115_200).unwrap();
    assert!(matches!(
        supervisor.send_command("G1 X1\nG1 X2"),
        Err(GantryError::Protocol(_))
    ));
    assert!(gantry.commands().is_empty());
}

#[test]
fn test_jog_and_home() {
    let gantry = MockGantry::new();
    let supervisor = supervisor(&gantry, SyntheticCameraSource::new(target(0, 0)));
    supervisor.connect(PORT, 115_200).unwrap();

    supervisor.jog(JogDirection::XMinus, 2.5, 500).unwrap();
    supervisor.jog(JogDirection::Home, 1.0, 500).unwrap();
    assert_eq!(gantry.commands(), vec!["G1 X-2.5 F500", "G28"]);
}

#[test]
fn test_status_timeout_carries_partial_response() {
    let gantry = MockGantry::with_responder(|_| vec!["busy: processing".to_string()]);
    let supervisor = supervisor(&gantry, SyntheticCameraSource::new(target(0, 0))).with_timeouts(
        CommandTimeouts {
            command: Duration::from_millis(200),
            status: Duration::from_millis(200),
        },
    );
    supervisor.connect(PORT, 115_200).unwrap();

    match supervisor.status() {
        Err(GantryError::Link(LinkError::Timeout { partial, .. })) => {
            assert_eq!(partial, "busy: processing");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[test]
fn test_alignment_requires_connection() {
    let gantry = MockGantry::new();
    let supervisor = supervisor(&gantry, SyntheticCameraSource::new(target(0, 0)));

    assert!(matches!(
        supervisor.run_alignment_step(),
        Err(GantryError::Link(LinkError::NotConnected))
    ));
}

fn wait_for_capture_failure(supervisor: &GantrySupervisor) -> u64 {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = supervisor.status().unwrap();
        if matches!(status.capture, CaptureState::Failed { .. }) {
            return status.frames_published;
        }
        assert!(Instant::now() < deadline, "capture never reported failure");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_latest_frame_without_session() {
    let gantry = MockGantry::new();
    let supervisor = supervisor(&gantry, SyntheticCameraSource::new(target(0, 0)));

    assert!(matches!(
        supervisor.latest_frame(),
        Err(GantryError::Alignment(AlignmentError::NoFrameAvailable))
    ));
}

#[test]
fn test_alignment_when_capture_never_started() {
    let gantry = MockGantry::new();
    let camera = SyntheticCameraSource::new(target(0, 0)).failing_after(0);
    let supervisor = supervisor(&gantry, camera);
    supervisor.connect(PORT, 115_200).unwrap();

    assert_eq!(wait_for_capture_failure(&supervisor), 0);
    assert!(matches!(
        supervisor.run_alignment_step(),
        Err(GantryError::Alignment(AlignmentError::CaptureStopped { .. }))
    ));
}

#[test]
fn test_failed_capture_does_not_serve_stale_frame() {
    let gantry = MockGantry::new();
    let camera = SyntheticCameraSource::new(target(60, 0)).failing_after(1);
    let supervisor = supervisor(&gantry, camera);
    supervisor.connect(PORT, 115_200).unwrap();

    assert_eq!(wait_for_capture_failure(&supervisor), 1);
    // The dead loop's last frame is still in the buffer
    assert!(supervisor.frames().snapshot().is_some());

    for _ in 0..3 {
        match supervisor.run_alignment_step() {
            Err(GantryError::Alignment(AlignmentError::CaptureStopped { reason })) => {
                assert!(reason.contains("synthetic camera disconnected"));
            }
            other => panic!("expected capture stopped, got {other:?}"),
        }
    }
    assert!(matches!(
        supervisor.latest_frame(),
        Err(GantryError::Alignment(AlignmentError::CaptureStopped { .. }))
    ));
    // Only the status queries reached the controller
    assert!(gantry.commands().iter().all(|c| c == "M114"));

    supervisor.disconnect();
    assert!(matches!(
        supervisor.latest_frame(),
        Err(GantryError::Alignment(AlignmentError::NoFrameAvailable))
    ));
}

#[test]
fn test_alignment_sends_correction() {
    let gantry = MockGantry::new();
    let supervisor = supervisor(&gantry, SyntheticCameraSource::new(target(60, 0)));
    supervisor.connect(PORT, 115_200).unwrap();
    wait_for_frame(&supervisor);

    let outcome = supervisor.run_alignment_step().unwrap();
    let AlignmentDecision::Correction { dx_mm, dy_mm, command } = &outcome.alignment.decision else {
        panic!("expected correction, got {:?}", outcome.alignment.decision);
    };
    assert!((dx_mm - 0.6).abs() <= 0.02, "dx_mm = {dx_mm}");
    assert!(dy_mm.abs() <= 0.02, "dy_mm = {dy_mm}");

    let sent = outcome.sent.as_ref().expect("correction sent");
    assert_eq!(&sent.command, command);
    assert_eq!(gantry.commands().last().map(String::as_str), Some(command.as_str()));
    assert!(outcome.message().starts_with("Alignment correction sent: G1 X0."));
}

#[test]
fn test_alignment_centered_sends_follow_up() {
    let gantry = MockGantry::new();
    let supervisor = supervisor(&gantry, SyntheticCameraSource::new(target(0, 0)))
        .with_calibration(AlignmentCalibration {
            tolerance_mm: 0.05,
            ..Default::default()
        });
    supervisor.connect(PORT, 115_200).unwrap();
    wait_for_frame(&supervisor);

    let outcome = supervisor.run_alignment_step().unwrap();
    assert!(matches!(
        outcome.alignment.decision,
        AlignmentDecision::AlreadyCentered { .. }
    ));
    assert_eq!(outcome.message(), "Circle is already centered");
    assert_eq!(gantry.commands(), vec!["G1 X70 F1000"]);
}

#[test]
fn test_alignment_without_target() {
    let gantry = MockGantry::new();
    let blank = SyntheticTarget {
        center: None,
        ..target(0, 0)
    };
    let supervisor = supervisor(&gantry, SyntheticCameraSource::new(blank));
    supervisor.connect(PORT, 115_200).unwrap();
    wait_for_frame(&supervisor);

    assert!(matches!(
        supervisor.run_alignment_step(),
        Err(GantryError::Alignment(AlignmentError::NoTargetFound))
    ));
    assert!(gantry.commands().is_empty());
}

#[test]
fn test_disconnect_clears_frames_and_is_idempotent() {
    let gantry = MockGantry::new();
    let supervisor = supervisor(&gantry, SyntheticCameraSource::new(target(0, 0)));
    supervisor.connect(PORT, 115_200).unwrap();
    wait_for_frame(&supervisor);

    supervisor.disconnect();
    assert!(supervisor.frames().snapshot().is_none());
    assert_eq!(supervisor.session_state(), SessionState::Disconnected);

    supervisor.disconnect();
    let status = supervisor.status().unwrap();
    assert_eq!(status.capture, CaptureState::Stopped);
    assert_eq!(status.machine.connection_state, LinkState::Disconnected);

    // A fresh session starts a new acquisition loop
    supervisor.connect(PORT, 115_200).unwrap();
    wait_for_frame(&supervisor);
    assert_eq!(gantry.open_count(), 2);
}

#[test]
fn test_disconnect_cancels_in_flight_request() {
    let gantry = MockGantry::silent();
    let supervisor = Arc::new(
        supervisor(&gantry, SyntheticCameraSource::new(target(0, 0))).with_timeouts(
            CommandTimeouts {
                command: Duration::from_secs(30),
                status: Duration::from_secs(30),
            },
        ),
    );
    supervisor.connect(PORT, 115_200).unwrap();

    let worker = {
        let supervisor = supervisor.clone();
        thread::spawn(move || supervisor.send_command("G1 X1 F1000"))
    };
    thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    supervisor.disconnect();
    let result = worker.join().unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(matches!(
        result,
        Err(GantryError::Link(LinkError::NotConnected))
    ));
}

#[test]
fn test_io_failure_faults_link() {
    let gantry = MockGantry::new();
    let supervisor = supervisor(&gantry, SyntheticCameraSource::new(target(0, 0)));
    supervisor.connect(PORT, 115_200).unwrap();

    gantry.set_fail_io(true);
    assert!(matches!(
        supervisor.send_command("G28"),
        Err(GantryError::Link(LinkError::IoFailure(_)))
    ));

    gantry.set_fail_io(false);
    assert!(matches!(
        supervisor.send_command("G28"),
        Err(GantryError::Link(LinkError::NotConnected))
    ));

    // Reconnecting requires a fresh session
    supervisor.disconnect();
    supervisor.connect(PORT, 115_200).unwrap();
    assert!(supervisor.send_command("G28").is_ok());
}
