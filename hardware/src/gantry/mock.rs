//! Scripted stand-in for a gantry controller.
//!
//! [`MockGantry`] implements [`TransportOpener`] so it can be handed to a
//! [`SerialLink`](super::SerialLink) in place of a real serial port. Each
//! command line written to it is passed to a responder closure whose output
//! lines are queued for reading. Clones share state, so a test can keep one
//! handle to inspect what the link wrote.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::status::Position;
use super::transport::{SerialTransport, TransportOpener};

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

struct MockInner {
    responder: Responder,
    raw_writes: Vec<String>,
    pending: VecDeque<String>,
    stale: Vec<String>,
    unavailable: bool,
    fail_io: bool,
    open_count: usize,
    awaiting_ok: bool,
    overlaps: usize,
}

/// Mock gantry controller with a scripted responder.
#[derive(Clone)]
pub struct MockGantry {
    inner: Arc<Mutex<MockInner>>,
}

impl MockGantry {
    /// Marlin-like controller that tracks an absolute position.
    ///
    /// `G1`/`G0` update the named axes, `G28` zeroes all axes, `M114`
    /// reports the position. Every command is acknowledged with `ok`.
    pub fn new() -> Self {
        let mut position = Position::default();
        Self::with_responder(move |cmd| {
            let mut words = cmd.split_whitespace();
            match words.next() {
                Some("G0") | Some("G1") => {
                    for word in words {
                        let mut chars = word.chars();
                        let axis = chars.next();
                        let Ok(value) = chars.as_str().parse::<f64>() else {
                            continue;
                        };
                        match axis {
                            Some('X') => position.x = value,
                            Some('Y') => position.y = value,
                            Some('Z') => position.z = value,
                            _ => {}
                        }
                    }
                    vec!["ok".to_string()]
                }
                Some("G28") => {
                    position = Position::default();
                    vec!["ok".to_string()]
                }
                Some("M114") => vec![
                    format!(
                        "X:{:.2} Y:{:.2} Z:{:.2} E:0.00 Count X:0 Y:0 Z:0",
                        position.x, position.y, position.z
                    ),
                    "ok".to_string(),
                ],
                _ => vec!["ok".to_string()],
            }
        })
    }

    /// Controller that accepts commands but never answers.
    pub fn silent() -> Self {
        Self::with_responder(|_| Vec::new())
    }

    /// Controller driven by a custom responder.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(MockInner {
                responder: Box::new(responder),
                raw_writes: Vec::new(),
                pending: VecDeque::new(),
                stale: Vec::new(),
                unavailable: false,
                fail_io: false,
                open_count: 0,
                awaiting_ok: false,
                overlaps: 0,
            })),
        }
    }

    /// Device whose port can never be opened.
    pub fn unavailable() -> Self {
        let mock = Self::new();
        mock.lock().unavailable = true;
        mock
    }

    /// Queue a line that will already be waiting when the port is opened.
    pub fn queue_stale_line(&self, line: &str) {
        self.lock().stale.push(line.to_string());
    }

    /// Deliver an unsolicited line, as if the controller sent it late.
    pub fn inject_line(&self, line: &str) {
        self.lock().pending.push_back(line.to_string());
    }

    /// Make every subsequent read and write fail.
    pub fn set_fail_io(&self, fail: bool) {
        self.lock().fail_io = fail;
    }

    /// Every line written, including blank clearing writes, with `\n` kept.
    pub fn raw_writes(&self) -> Vec<String> {
        self.lock().raw_writes.clone()
    }

    /// Non-blank command lines written, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .raw_writes
            .iter()
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .collect()
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.lock().open_count
    }

    /// Commands written while a previous command's `ok` was still unread.
    pub fn overlapping_requests(&self) -> usize {
        self.lock().overlaps
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockGantry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportOpener for MockGantry {
    fn open(&self, port: &str, _baud_rate: u32) -> io::Result<Box<dyn SerialTransport>> {
        let mut inner = self.lock();
        if inner.unavailable {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such device: {port}"),
            ));
        }
        inner.open_count += 1;
        inner.awaiting_ok = false;
        let stale: Vec<String> = inner.stale.drain(..).collect();
        inner.pending.extend(stale);
        Ok(Box::new(MockTransport {
            mock: self.clone(),
        }))
    }
}

struct MockTransport {
    mock: MockGantry,
}

fn injected_failure() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "injected I/O failure")
}

impl SerialTransport for MockTransport {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut inner = self.mock.lock();
        if inner.fail_io {
            return Err(injected_failure());
        }

        let text = String::from_utf8_lossy(bytes).into_owned();
        inner.raw_writes.push(text.clone());

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if inner.awaiting_ok {
                inner.overlaps += 1;
            }
            let replies = (inner.responder)(line);
            if replies.iter().any(|r| r.split_whitespace().any(|t| t == "ok")) {
                inner.awaiting_ok = true;
            }
            inner.pending.extend(replies);
        }
        Ok(())
    }

    fn read_line_nonblocking(&mut self) -> io::Result<Option<String>> {
        let mut inner = self.mock.lock();
        if inner.fail_io {
            return Err(injected_failure());
        }

        let line = inner.pending.pop_front();
        if let Some(ref l) = line {
            if l.split_whitespace().any(|t| t == "ok") {
                inner.awaiting_ok = false;
            }
        }
        Ok(line)
    }
}
