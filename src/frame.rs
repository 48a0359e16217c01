//! Frames and the producer/consumer hand-off buffer.
//!
//! - `Frame`: one captured image. Moved downstream, never cloned.
//! - `FrameBuffer`: capacity-2 lossy queue between a capture thread and the
//!   pipeline consumer. A full buffer discards the *incoming* frame; frames
//!   already queued are never evicted or overwritten.

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::{Duration, Instant};

/// Fixed hand-off capacity between capture and consumption.
pub const FRAME_BUFFER_CAPACITY: usize = 2;

/// Bytes per pixel for every supported packed layout.
pub const CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Channel order of a packed 3-channel frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Rgb24,
    Bgr24,
}

/// A captured image buffer.
///
/// Not `Clone`: a frame has exactly one owner at a time
/// (source, then inference, then sink).
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Per-source capture sequence number, starting at 0.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Wrap packed pixel data. Fails if the length does not match the dimensions.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
    ) -> Result<Self> {
        let expected = packed_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            sequence,
            captured_at: Instant::now(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    /// Monotonic instant at which the frame was produced.
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Pixel at (x, y) in RGB order regardless of the stored layout.
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        let px = &self.data[offset..offset + CHANNELS];
        Some(match self.format {
            PixelFormat::Rgb24 => [px[0], px[1], px[2]],
            PixelFormat::Bgr24 => [px[2], px[1], px[0]],
        })
    }

    /// Integer luma approximation (BT.601 weights) at (x, y).
    pub fn luma_at(&self, x: u32, y: u32) -> Option<u8> {
        self.rgb_at(x, y).map(|[r, g, b]| {
            ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
        })
    }

    /// Write an RGB color at (x, y) in the frame's own channel order.
    pub fn put_rgb(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        let ordered = match self.format {
            PixelFormat::Rgb24 => rgb,
            PixelFormat::Bgr24 => [rgb[2], rgb[1], rgb[0]],
        };
        self.data[offset..offset + CHANNELS].copy_from_slice(&ordered);
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

pub(crate) fn packed_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// FrameBuffer: lossy hand-off queue
// ----------------------------------------------------------------------------

/// Bounded FIFO shared by one producer (capture thread) and one consumer.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct FrameBuffer {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        let (tx, rx) = bounded(FRAME_BUFFER_CAPACITY);
        Self { tx, rx }
    }

    /// Offer a frame without blocking. Returns false (and drops the frame)
    /// when the buffer is full.
    pub fn try_put(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Oldest queued frame, waiting at most `timeout`. `None` on timeout.
    pub fn get(&self, timeout: Duration) -> Option<Frame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        FRAME_BUFFER_CAPACITY
    }

    /// Drop everything still queued. Returns how many frames were discarded.
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_frame(sequence: u64) -> Frame {
        Frame::new(vec![sequence as u8; 4 * 2 * 3], 4, 2, PixelFormat::Rgb24, sequence)
            .expect("frame")
    }

    #[test]
    fn frame_rejects_length_mismatch() {
        let err = Frame::new(vec![0u8; 10], 4, 2, PixelFormat::Rgb24, 0).unwrap_err();
        assert!(err.to_string().contains("length mismatch"));
    }

    #[test]
    fn bgr_frames_read_back_as_rgb() -> Result<()> {
        let mut frame = Frame::new(vec![0u8; 3], 1, 1, PixelFormat::Bgr24, 0)?;
        frame.put_rgb(0, 0, [10, 20, 30]);
        assert_eq!(frame.pixels(), &[30, 20, 10]);
        assert_eq!(frame.rgb_at(0, 0), Some([10, 20, 30]));
        assert_eq!(frame.rgb_at(1, 0), None);
        Ok(())
    }

    #[test]
    fn burst_keeps_first_two_in_fifo_order() {
        for burst in 2..8u64 {
            let buf = FrameBuffer::new();
            let accepted: Vec<bool> = (0..burst).map(|i| buf.try_put(make_test_frame(i))).collect();

            assert_eq!(accepted.iter().filter(|ok| **ok).count(), 2);
            assert!(accepted[0] && accepted[1]);
            assert!(accepted[2..].iter().all(|ok| !ok));

            let first = buf.get(Duration::from_millis(10)).expect("first frame");
            let second = buf.get(Duration::from_millis(10)).expect("second frame");
            assert_eq!(first.sequence, 0);
            assert_eq!(second.sequence, 1);
            assert!(buf.get(Duration::from_millis(10)).is_none());
        }
    }

    #[test]
    fn get_times_out_on_empty_buffer() {
        let buf = FrameBuffer::new();
        let start = Instant::now();
        assert!(buf.get(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn draining_makes_room_again() {
        let buf = FrameBuffer::new();
        assert!(buf.try_put(make_test_frame(0)));
        assert!(buf.try_put(make_test_frame(1)));
        assert!(!buf.try_put(make_test_frame(2)));
        assert_eq!(buf.get(Duration::ZERO).map(|f| f.sequence), Some(0));
        assert!(buf.try_put(make_test_frame(3)));
        assert_eq!(buf.clear(), 2);
        assert!(buf.is_empty());
    }
}
