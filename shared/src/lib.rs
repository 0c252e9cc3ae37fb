//! Shared components for the gantry alignment bench.
//!
//! Camera abstractions, the latest-frame buffer, image processing
//! (reticle overlay, JPEG codec, circle detection) and calibration storage.

pub mod alignment_calibration;
pub mod camera_interface;
pub mod config_storage;
pub mod frame_buffer;
pub mod image_proc;
