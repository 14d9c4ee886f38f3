//! Shared off-screen frame buffer.
//!
//! The engine's paint callback writes whole frames from its render thread; the
//! `GetPixels` handler reads whole frames from the RPC dispatch task. One mutex
//! guards the bytes and the only work done under it is a single copy in or
//! out, so a reader always sees one complete frame, never a mix of two.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::commands::PixelsResult;
use crate::error::{BridgeError, Result};

pub const BYTES_PER_PIXEL: usize = 4;

/// Channel order of the raw pixel bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Bgra,
    Rgba,
}

/// Fixed-size raw pixel store for one session.
#[derive(Debug)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    /// Empty until the first paint, then always `width * height * 4` bytes.
    bytes: Mutex<Vec<u8>>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            bytes: Mutex::new(Vec::new()),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Size in bytes of one complete frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Replace the stored frame with `pixels`.
    ///
    /// `pixels` must be exactly one frame long; anything else is rejected
    /// without touching the stored frame.
    pub fn write(&self, pixels: &[u8]) -> Result<()> {
        let expected = self.frame_len();
        if pixels.len() != expected {
            return Err(BridgeError::engine(format!(
                "paint of {} bytes does not match {}x{} frame ({} bytes)",
                pixels.len(),
                self.width,
                self.height,
                expected
            )));
        }

        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        if bytes.len() == expected {
            bytes.copy_from_slice(pixels);
        } else {
            bytes.clear();
            bytes.extend_from_slice(pixels);
        }
        Ok(())
    }

    /// Copy out the current frame. Zero-length before the first paint.
    pub fn read(&self) -> Vec<u8> {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        bytes.clone()
    }

    /// Whether any frame has been painted yet.
    pub fn has_frame(&self) -> bool {
        !self
            .bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Snapshot suitable for a `GetPixels` reply.
    pub fn snapshot(&self) -> PixelsResult {
        PixelsResult {
            width: self.width,
            height: self.height,
            format: self.format,
            pixels: self.read(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_read_before_first_paint_is_empty() {
        let frame = FrameBuffer::new(4, 4, PixelFormat::Bgra);
        assert!(frame.read().is_empty());
        assert!(!frame.has_frame());
        assert!(frame.snapshot().is_empty());
    }

    #[test]
    fn test_write_rejects_wrong_size() {
        let frame = FrameBuffer::new(2, 2, PixelFormat::Rgba);
        assert!(frame.write(&[0u8; 15]).is_err());
        assert!(frame.read().is_empty());

        frame.write(&[7u8; 16]).unwrap();
        assert!(frame.write(&[1u8; 17]).is_err());
        assert_eq!(frame.read(), vec![7u8; 16]);
    }

    #[test]
    fn test_snapshot_carries_geometry() {
        let frame = FrameBuffer::new(3, 2, PixelFormat::Rgba);
        frame.write(&[9u8; 24]).unwrap();
        let snapshot = frame.snapshot();
        assert_eq!((snapshot.width, snapshot.height), (3, 2));
        assert_eq!(snapshot.format, PixelFormat::Rgba);
        assert_eq!(snapshot.pixels.len(), 24);
    }

    #[test]
    fn test_concurrent_reads_never_observe_torn_frames() {
        // Every written frame is filled with a single byte value, so a torn
        // read shows up as a frame holding more than one distinct value.
        let frame = Arc::new(FrameBuffer::new(64, 64, PixelFormat::Bgra));
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let frame = frame.clone();
            let done = done.clone();
            thread::spawn(move || {
                for round in 0..2_000u32 {
                    let fill = (round % 251) as u8;
                    frame.write(&vec![fill; frame.frame_len()]).unwrap();
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let frame = frame.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let mut observed = 0usize;
                    while !done.load(Ordering::SeqCst) {
                        let pixels = frame.read();
                        if pixels.is_empty() {
                            continue;
                        }
                        assert_eq!(pixels.len(), frame.frame_len());
                        let first = pixels[0];
                        assert!(
                            pixels.iter().all(|&b| b == first),
                            "torn frame observed"
                        );
                        observed += 1;
                    }
                    observed
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
