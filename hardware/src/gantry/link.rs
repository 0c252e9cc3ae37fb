//! Exclusive, timeout-bounded request/response link to the gantry controller.
//!
//! # Connection lifecycle
//!
//! ```text
//!   Disconnected --open()--> Connecting --ok--> Idle <--response/timeout--+
//!                                 |               |                      |
//!                                 +--fail--> Faulted   request() --> AwaitingResponse
//!
//!   any state --close()--> Disconnected
//! ```
//!
//! An I/O failure while a request is in flight also moves the link to
//! `Faulted` and drops the device handle; callers must `open()` again.
//!
//! # Cancellation
//!
//! Every `open()`/`close()` starts a new session. A request polls the session
//! id between reads, so closing the link while a request is waiting makes the
//! request return [`LinkError::NotConnected`] within one poll interval rather
//! than running out its full timeout.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::transport::{SerialTransport, TransportOpener};

/// Interval between polls for response bytes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Benign line written after opening to flush anything half-typed into the
/// controller's input buffer.
const CLEARING_WRITE: &[u8] = b"\n";

/// Upper bound on stale lines discarded in one pass.
const MAX_STALE_LINES: usize = 64;

/// Connection state of a [`SerialLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Idle,
    AwaitingResponse,
    Faulted,
}

/// Failure to open the link.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The device could not be opened or rejected the clearing write.
    #[error("Serial port {port} unavailable: {source}")]
    PortUnavailable {
        port: String,
        #[source]
        source: io::Error,
    },
}

/// Failure of a single request/response exchange.
#[derive(Error, Debug)]
pub enum LinkError {
    /// No `ok` line arrived within the read timeout.
    ///
    /// `partial` holds every line received before giving up.
    #[error("Timeout after {waited:?} waiting for response to {command:?} (received: {partial:?})")]
    Timeout {
        command: String,
        partial: String,
        waited: Duration,
    },

    /// The link is not open, or was closed while the request waited.
    #[error("Serial link not connected")]
    NotConnected,

    /// Low-level read/write failure. The link is now `Faulted`.
    #[error("Serial I/O failure: {0}")]
    IoFailure(#[from] io::Error),
}

/// Result type for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Lines received for one command, up to and including the `ok` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResponseText {
    lines: Vec<String>,
}

impl ResponseText {
    /// Individual response lines.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// All lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// True if a response line carries the `ok` completion token.
fn is_ok_line(line: &str) -> bool {
    line.split_whitespace().any(|token| token == "ok")
}

/// Read and drop lines already waiting on the device, such as the late `ok`
/// of a command that timed out. Returns how many were dropped.
fn discard_pending(transport: &mut dyn SerialTransport) -> io::Result<usize> {
    let mut discarded = 0;
    while discarded < MAX_STALE_LINES {
        match transport.read_line_nonblocking()? {
            Some(line) => {
                debug!("Discarding stale line {line:?}");
                discarded += 1;
            }
            None => break,
        }
    }
    Ok(discarded)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Connection {
    transport: Box<dyn SerialTransport>,
    port: String,
}

struct LinkStatus {
    state: LinkState,
    session: u64,
    port: Option<String>,
    baud_rate: u32,
}

/// Persistent serial connection to the gantry controller.
///
/// The device handle is opened once and reused; `request` holds an internal
/// lock for the whole write-then-read exchange so concurrent callers queue up
/// behind the in-flight command.
pub struct SerialLink {
    opener: Arc<dyn TransportOpener>,
    status: Mutex<LinkStatus>,
    connection: Mutex<Option<Connection>>,
    poll_interval: Duration,
}

impl SerialLink {
    /// Create a disconnected link that opens devices through `opener`.
    pub fn new(opener: Arc<dyn TransportOpener>) -> Self {
        Self {
            opener,
            status: Mutex::new(LinkStatus {
                state: LinkState::Disconnected,
                session: 0,
                port: None,
                baud_rate: 0,
            }),
            connection: Mutex::new(None),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the response poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.set_poll_interval(poll_interval);
        self
    }

    /// Change the response poll interval in place.
    pub fn set_poll_interval(&mut self, poll_interval: Duration) {
        self.poll_interval = poll_interval;
    }

    /// Current connection state.
    pub fn state(&self) -> LinkState {
        lock(&self.status).state
    }

    /// Port identifier and baud rate of the most recent `open()`.
    pub fn endpoint(&self) -> Option<(String, u32)> {
        let status = lock(&self.status);
        status.port.clone().map(|port| (port, status.baud_rate))
    }

    /// Open the device, flush stale input and move to `Idle`.
    ///
    /// Any previously open handle is released first.
    pub fn open(&self, port: &str, baud_rate: u32) -> Result<(), ConnectError> {
        let session = {
            let mut status = lock(&self.status);
            status.session += 1;
            status.state = LinkState::Connecting;
            status.port = Some(port.to_string());
            status.baud_rate = baud_rate;
            status.session
        };

        let mut connection = lock(&self.connection);
        if let Some(previous) = connection.take() {
            debug!("Releasing previous handle on {}", previous.port);
        }

        info!("Opening gantry link on {port} at {baud_rate} baud");
        let unavailable = |source: io::Error| ConnectError::PortUnavailable {
            port: port.to_string(),
            source,
        };

        let mut transport = match self.opener.open(port, baud_rate) {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Failed to open {port}: {e}");
                self.set_state_if_current(session, LinkState::Faulted);
                return Err(unavailable(e));
            }
        };

        if let Err(e) = transport.write_bytes(CLEARING_WRITE) {
            warn!("Clearing write to {port} failed: {e}");
            self.set_state_if_current(session, LinkState::Faulted);
            return Err(unavailable(e));
        }

        if let Err(e) = discard_pending(transport.as_mut()) {
            self.set_state_if_current(session, LinkState::Faulted);
            return Err(unavailable(e));
        }

        *connection = Some(Connection {
            transport,
            port: port.to_string(),
        });
        drop(connection);

        self.set_state_if_current(session, LinkState::Idle);
        info!("Gantry link on {port} ready");
        Ok(())
    }

    /// Send one command and collect its response.
    ///
    /// Writes `command` plus a newline, then polls for lines until one
    /// containing `ok` arrives or `read_timeout` elapses. Only one request is
    /// in flight at a time; other callers block until it finishes.
    ///
    /// # Errors
    ///
    /// - [`LinkError::Timeout`] with the partial response if no `ok` arrived
    /// - [`LinkError::NotConnected`] if the link is not open or is closed
    ///   while waiting
    /// - [`LinkError::IoFailure`] if the device fails; the link becomes `Faulted`
    pub fn request(&self, command: &str, read_timeout: Duration) -> LinkResult<ResponseText> {
        let mut connection = lock(&self.connection);
        let Some(conn) = connection.as_mut() else {
            return Err(LinkError::NotConnected);
        };

        let session = {
            let mut status = lock(&self.status);
            if status.state != LinkState::Idle {
                return Err(LinkError::NotConnected);
            }
            status.state = LinkState::AwaitingResponse;
            status.session
        };

        let result = self.exchange(conn, session, command, read_timeout);

        match &result {
            Ok(_) | Err(LinkError::Timeout { .. }) => {
                self.set_state_if_current(session, LinkState::Idle);
            }
            Err(LinkError::IoFailure(e)) => {
                warn!("Gantry link faulted: {e}");
                connection.take();
                self.set_state_if_current(session, LinkState::Faulted);
            }
            Err(LinkError::NotConnected) => {}
        }

        result
    }

    fn exchange(
        &self,
        conn: &mut Connection,
        session: u64,
        command: &str,
        read_timeout: Duration,
    ) -> LinkResult<ResponseText> {
        let command = command.trim_end();
        let discarded = discard_pending(conn.transport.as_mut())?;
        if discarded > 0 {
            warn!("Dropped {discarded} unsolicited line(s) before {command:?}");
        }
        debug!("gantry send: {command:?}");
        conn.transport.write_bytes(format!("{command}\n").as_bytes())?;

        let started = Instant::now();
        let deadline = started + read_timeout;
        let mut lines = Vec::new();

        loop {
            if !self.is_current(session) {
                debug!("Request {command:?} abandoned, link closed");
                return Err(LinkError::NotConnected);
            }

            match conn.transport.read_line_nonblocking()? {
                Some(line) => {
                    trace!("gantry recv: {line:?}");
                    let done = is_ok_line(&line);
                    lines.push(line);
                    if done {
                        return Ok(ResponseText { lines });
                    }
                }
                None => {
                    let now = Instant::now();
                    if now >= deadline {
                        let waited = now - started;
                        warn!("No ok for {command:?} after {waited:?}");
                        return Err(LinkError::Timeout {
                            command: command.to_string(),
                            partial: lines.join("\n"),
                            waited,
                        });
                    }
                    thread::sleep(self.poll_interval.min(deadline - now));
                }
            }
        }
    }

    /// Release the device and move to `Disconnected`.
    ///
    /// Safe to call in any state. A request blocked waiting for a response
    /// observes [`LinkError::NotConnected`] on its next poll.
    pub fn close(&self) {
        {
            let mut status = lock(&self.status);
            status.session += 1;
            status.state = LinkState::Disconnected;
        }

        if let Some(conn) = lock(&self.connection).take() {
            info!("Closed gantry link on {}", conn.port);
        }
    }

    fn is_current(&self, session: u64) -> bool {
        lock(&self.status).session == session
    }

    fn set_state_if_current(&self, session: u64, state: LinkState) {
        let mut status = lock(&self.status);
        if status.session == session {
            status.state = state;
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}
