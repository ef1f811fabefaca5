//! Decoded frame container.
//!
//! A `Frame` owns its RGBA8 pixels and guarantees at construction that the
//! buffer length matches `width * height * 4`. Frames are never mutated after
//! they are published to the exchange; a new decode replaces the old frame.

use crate::error::FrameError;

/// Bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: usize = 4;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One decoded image from the stream.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    /// RGBA8, row-major, no padding.
    pixels: Vec<u8>,
}

impl Frame {
    /// Wraps an RGBA8 buffer, rejecting any length that does not match the
    /// dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, FrameError> {
        let expected = rgba_len(width, height)?;
        if pixels.len() != expected {
            return Err(FrameError::LengthMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

// Pixel content stays out of debug output; it is large and not useful in logs.
impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Byte length of an RGBA8 buffer for the given dimensions.
pub fn rgba_len(width: u32, height: u32) -> Result<usize, FrameError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(BYTES_PER_PIXEL))
        .ok_or(FrameError::Overflow { width, height })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
