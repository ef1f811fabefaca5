//! JPEG payload decoding.

use image::{GenericImageView, ImageFormat};

use crate::error::DecodeError;
use crate::frame::Frame;

/// Turns one multipart payload into an RGBA8 frame.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<Frame, DecodeError>;
}

/// In-memory JPEG decoder backed by the `image` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct JpegDecoder;

impl FrameDecoder for JpegDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Frame, DecodeError> {
        let image = image::load_from_memory_with_format(payload, ImageFormat::Jpeg)?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::Empty { width, height });
        }
        let rgba = image.into_rgba8();
        Ok(Frame::new(width, height, rgba.into_raw())?)
    }
}
