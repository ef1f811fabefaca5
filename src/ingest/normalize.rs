use crate::error::FrameError;
use crate::frame::{rgba_len, BYTES_PER_PIXEL};

/// Pixel layouts a sink can ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PixelFormat {
    #[default]
    Rgba8,
    Rgb24,
    Bgr24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => BYTES_PER_PIXEL,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
        }
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "rgba" | "rgba8" => Ok(PixelFormat::Rgba8),
            "rgb" | "rgb24" => Ok(PixelFormat::Rgb24),
            "bgr" | "bgr24" => Ok(PixelFormat::Bgr24),
            other => Err(format!("unknown pixel format '{}'", other)),
        }
    }
}

/// Converts a tightly packed RGBA8 buffer into `format`.
pub fn convert_rgba(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>, FrameError> {
    let expected = rgba_len(width, height)?;
    if pixels.len() != expected {
        return Err(FrameError::LengthMismatch {
            expected,
            actual: pixels.len(),
        });
    }

    match format {
        PixelFormat::Rgba8 => Ok(pixels.to_vec()),
        PixelFormat::Rgb24 => Ok(drop_alpha(pixels, [0, 1, 2])),
        PixelFormat::Bgr24 => Ok(drop_alpha(pixels, [2, 1, 0])),
    }
}

fn drop_alpha(pixels: &[u8], order: [usize; 3]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels.len() / BYTES_PER_PIXEL * 3);
    for px in pixels.chunks_exact(BYTES_PER_PIXEL) {
        out.extend(order.iter().map(|&channel| px[channel]));
    }
    out
}
