//! Serial gantry controller driver.
//!
//! This module drives a G-code speaking motion controller (Marlin/GRBL style
//! firmware) over a newline-framed serial link.
//!
//! # Protocol Overview
//!
//! Commands are single lines of ASCII text terminated by LF. The controller
//! may emit any number of informational lines while it works and signals
//! completion of a command with a line containing the token `ok`:
//!
//! ```text
//! > M114
//! < X:10.00 Y:20.00 Z:5.00 E:0.00 Count X:800 Y:1600 Z:2000
//! < ok
//! ```
//!
//! There are no request identifiers, so only one command may be in flight at
//! a time. [`SerialLink`] serializes callers and bounds every exchange with a
//! per-call read timeout.
//!
//! # Example
//!
//! ```no_run
//! use hardware::gantry::{GcodeCommand, SerialLink, SerialPortOpener, STATUS_QUERY};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let link = SerialLink::new(Arc::new(SerialPortOpener));
//! link.open("/dev/ttyUSB0", 115200)?;
//!
//! let response = link.request(STATUS_QUERY, Duration::from_secs(2))?;
//! println!("{}", response.text());
//!
//! let cmd = GcodeCommand::linear_move(1.5, -0.25, 1000);
//! link.request(cmd.as_str(), Duration::from_secs(5))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod gcode;
mod link;
pub mod mock;
mod status;
mod transport;

pub use gcode::{GcodeCommand, JogDirection, ProtocolError, HOME_COMMAND, STATUS_QUERY};
pub use link::{
    ConnectError, LinkError, LinkResult, LinkState, ResponseText, SerialLink,
    DEFAULT_POLL_INTERVAL,
};
pub use status::{MachineStatus, Position};
pub use transport::{LineBuffer, SerialPortOpener, SerialTransport, TransportOpener};

/// Default serial device for USB-attached controllers.
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// Default baud rate for Marlin-style firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
