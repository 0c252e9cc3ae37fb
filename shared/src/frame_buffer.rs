//! Single-slot publication point for the latest camera frame.
//!
//! The acquisition loop publishes a new [`Frame`] every cycle while any number
//! of readers take snapshots. Frames are immutable once published and handed
//! out as `Arc<Frame>`, so the lock only guards a pointer swap: a reader sees
//! either no frame or one complete frame, and a publisher never waits on a
//! reader that is still using an older frame.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use bytes::Bytes;

/// An encoded camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// JPEG-encoded image data
    pub jpeg_data: Bytes,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Time the raw image was captured
    pub captured_at: SystemTime,
    /// Frame sequence number since the acquisition loop started
    pub frame_number: u64,
}

/// Holds at most one frame; last writer wins.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    slot: Mutex<Option<Arc<Frame>>>,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame.
    ///
    /// The superseded frame is dropped after the lock is released.
    pub fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let previous = self.lock().replace(frame);
        drop(previous);
    }

    /// The most recently published frame, if any.
    pub fn snapshot(&self) -> Option<Arc<Frame>> {
        self.lock().clone()
    }

    /// Discard the held frame.
    pub fn clear(&self) {
        let previous = self.lock().take();
        drop(previous);
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<Frame>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Frame whose payload length and content are derived from its number.
    fn patterned_frame(n: u64) -> Frame {
        let len = 16 + (n % 97) as usize * 13;
        Frame {
            jpeg_data: Bytes::from(vec![(n % 251) as u8; len]),
            width: len as u32,
            height: 1,
            captured_at: SystemTime::now(),
            frame_number: n,
        }
    }

    fn assert_consistent(frame: &Frame) {
        let n = frame.frame_number;
        let expected_len = 16 + (n % 97) as usize * 13;
        assert_eq!(frame.jpeg_data.len(), expected_len);
        assert_eq!(frame.width as usize, expected_len);
        assert!(frame.jpeg_data.iter().all(|&b| b == (n % 251) as u8));
    }

    #[test]
    fn test_empty_snapshot() {
        let buffer = FrameBuffer::new();
        assert!(buffer.snapshot().is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let buffer = FrameBuffer::new();
        buffer.publish(patterned_frame(1));
        buffer.publish(patterned_frame(2));

        let snap = buffer.snapshot().unwrap();
        assert_eq!(snap.frame_number, 2);
        assert_consistent(&snap);
    }

    #[test]
    fn test_snapshot_survives_supersede() {
        let buffer = FrameBuffer::new();
        buffer.publish(patterned_frame(7));
        let held = buffer.snapshot().unwrap();

        buffer.publish(patterned_frame(8));
        assert_eq!(held.frame_number, 7);
        assert_consistent(&held);
    }

    #[test]
    fn test_clear() {
        let buffer = FrameBuffer::new();
        buffer.publish(patterned_frame(1));
        buffer.clear();
        assert!(buffer.snapshot().is_none());
    }

    #[test]
    fn test_concurrent_publish_and_snapshot_never_tears() {
        let buffer = Arc::new(FrameBuffer::new());

        let writer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for n in 0..5_000 {
                    buffer.publish(patterned_frame(n));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    let mut last_seen = 0;
                    for _ in 0..5_000 {
                        if let Some(frame) = buffer.snapshot() {
                            assert_consistent(&frame);
                            assert!(frame.frame_number >= last_seen);
                            last_seen = frame.frame_number;
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(buffer.snapshot().unwrap().frame_number, 4_999);
    }
}
