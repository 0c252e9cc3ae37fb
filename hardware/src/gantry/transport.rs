//! Byte-level transport for the gantry serial link.
//!
//! The link logic in [`SerialLink`](super::SerialLink) only needs two
//! capabilities from the physical medium: write a buffer of bytes, and pull
//! one complete line if one is available without blocking. Keeping those
//! behind [`SerialTransport`] lets the protocol run against the scripted
//! [`MockGantry`](super::mock::MockGantry) in tests.

use std::io::{self, Read, Write};
use std::time::Duration;

use tracing::{debug, trace};

/// Read timeout applied to the underlying serial port.
///
/// Reads are only issued when `bytes_to_read()` reports pending data, so this
/// only bounds a misbehaving driver.
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// A newline-framed, non-blocking byte transport.
pub trait SerialTransport: Send {
    /// Write all bytes to the device.
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Return the next complete line, or `None` if no full line is buffered.
    ///
    /// The returned line has its terminator (`\n` / `\r\n`) stripped. Must not
    /// block waiting for data.
    fn read_line_nonblocking(&mut self) -> io::Result<Option<String>>;
}

/// Opens a [`SerialTransport`] for a port identifier and baud rate.
pub trait TransportOpener: Send + Sync {
    /// Open the device.
    fn open(&self, port: &str, baud_rate: u32) -> io::Result<Box<dyn SerialTransport>>;
}

/// Accumulates raw bytes and splits them into lines.
///
/// Controllers are not guaranteed to deliver a line in a single read, so
/// partial data is held until its terminator arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Remove and return the first complete line, without its terminator.
    ///
    /// Bytes are decoded as Latin-1 so that stray non-UTF-8 bytes from a
    /// noisy line never fail the decode.
    pub fn pop_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line.iter().map(|&b| b as char).collect())
    }

    /// Number of buffered bytes not yet returned as a line.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// [`TransportOpener`] for real serial devices via the `serialport` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortOpener;

impl TransportOpener for SerialPortOpener {
    fn open(&self, port: &str, baud_rate: u32) -> io::Result<Box<dyn SerialTransport>> {
        let handle = serialport::new(port, baud_rate)
            .timeout(PORT_READ_TIMEOUT)
            .open()?;
        debug!("Opened serial port {port} at {baud_rate} baud");
        Ok(Box::new(SerialPortTransport {
            port: handle,
            lines: LineBuffer::new(),
        }))
    }
}

struct SerialPortTransport {
    port: Box<dyn serialport::SerialPort>,
    lines: LineBuffer,
}

impl SerialTransport for SerialPortTransport {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_line_nonblocking(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.lines.pop_line() {
            return Ok(Some(line));
        }

        let available = self.port.bytes_to_read()? as usize;
        if available == 0 {
            return Ok(None);
        }

        let mut buf = vec![0u8; available];
        match self.port.read(&mut buf) {
            Ok(n) => {
                trace!("serial read {n} bytes");
                self.lines.extend(&buf[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => return Err(e),
        }

        Ok(self.lines.pop_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_holds_partial_line() {
        let mut buf = LineBuffer::new();
        buf.extend(b"X:1.00 Y:");
        assert_eq!(buf.pop_line(), None);
        assert_eq!(buf.len(), 9);

        buf.extend(b"2.00\nok\n");
        assert_eq!(buf.pop_line().as_deref(), Some("X:1.00 Y:2.00"));
        assert_eq!(buf.pop_line().as_deref(), Some("ok"));
        assert_eq!(buf.pop_line(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_buffer_strips_crlf() {
        let mut buf = LineBuffer::new();
        buf.extend(b"ok\r\n");
        assert_eq!(buf.pop_line().as_deref(), Some("ok"));
    }

    #[test]
    fn test_line_buffer_latin1_decode() {
        let mut buf = LineBuffer::new();
        buf.extend(&[b'T', b':', 0xB0, b'\n']);
        assert_eq!(buf.pop_line().as_deref(), Some("T:\u{b0}"));
    }

    #[test]
    fn test_line_buffer_empty_line() {
        let mut buf = LineBuffer::new();
        buf.extend(b"\n");
        assert_eq!(buf.pop_line().as_deref(), Some(""));
    }
}
