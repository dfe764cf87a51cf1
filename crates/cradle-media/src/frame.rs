//! Captured frames and the single-slot frame bus.
//!
//! The inference loop publishes every frame it captures; the video transport
//! reads whatever is newest when it needs to encode. There is no queue: a
//! slow reader sees stale frames, never a backlog.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use crate::error::{MediaError, MediaResult};

/// A packed RGB24 frame.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
    captured_at: Instant,
}

impl Frame {
    /// Wrap raw RGB bytes (`width * height * 3`).
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> MediaResult<Self> {
        let expected = Self::byte_len(width, height);
        if data.len() != expected {
            return Err(MediaError::invalid_frame(format!(
                "expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            data,
            captured_at: Instant::now(),
        })
    }

    /// Byte length of an RGB24 frame of the given size.
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

/// Latest-value handoff of captured frames.
///
/// Cloning the bus shares the same slot. Writes are last-write-wins.
#[derive(Debug, Clone)]
pub struct FrameBus {
    slot: Arc<watch::Sender<Option<Arc<Frame>>>>,
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBus {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Replace the current frame.
    pub fn publish(&self, frame: Arc<Frame>) {
        self.slot.send_replace(Some(frame));
    }

    /// The most recent frame, if any has been captured.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.borrow().clone()
    }

    /// Create a read handle for a consumer.
    pub fn subscribe(&self) -> FrameReceiver {
        FrameReceiver {
            rx: self.slot.subscribe(),
        }
    }
}

/// Read side of the frame bus, handed to transport sessions.
#[derive(Debug, Clone)]
pub struct FrameReceiver {
    rx: watch::Receiver<Option<Arc<Frame>>>,
}

impl FrameReceiver {
    /// The most recent frame without waiting.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.rx.borrow().clone()
    }

    /// Wait for a frame newer than the last one returned.
    ///
    /// Returns `None` once the bus has been dropped.
    pub async fn next(&mut self) -> Option<Arc<Frame>> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(fill: u8) -> Arc<Frame> {
        Arc::new(Frame::from_rgb(2, 2, vec![fill; 12]).unwrap())
    }

    #[test]
    fn test_frame_length_is_validated() {
        assert!(Frame::from_rgb(2, 2, vec![0; 11]).is_err());
        assert!(Frame::from_rgb(2, 2, vec![0; 12]).is_ok());
    }

    #[test]
    fn test_bus_is_last_write_wins() {
        let bus = FrameBus::new();
        assert!(bus.latest().is_none());

        bus.publish(frame(1));
        bus.publish(frame(2));
        bus.publish(frame(3));

        let reader = bus.subscribe();
        assert_eq!(reader.latest().unwrap().data()[0], 3);
    }

    #[tokio::test]
    async fn test_receiver_skips_overwritten_frames() {
        let bus = FrameBus::new();
        let mut reader = bus.subscribe();

        bus.publish(frame(1));
        bus.publish(frame(2));

        let next = reader.next().await.unwrap();
        assert_eq!(next.data()[0], 2);
    }

    #[tokio::test]
    async fn test_receiver_ends_when_bus_dropped() {
        let bus = FrameBus::new();
        let mut reader = bus.subscribe();
        drop(bus);
        assert!(reader.next().await.is_none());
    }
}
