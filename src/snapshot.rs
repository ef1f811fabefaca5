//! Writing decoded frames to disk.

use std::path::Path;

use image::{ExtendedColorType, ImageFormat};

use crate::error::SnapshotError;
use crate::exchange::FrameExchange;
use crate::frame::Frame;

/// Encodes `frame` at `path`. The format follows the extension: png, bmp or tga.
pub fn save_frame(frame: &Frame, path: &Path) -> Result<(), SnapshotError> {
    let format = format_for(path)?;
    image::save_buffer_with_format(
        path,
        frame.pixels(),
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgba8,
        format,
    )?;
    log::info!(
        "snapshot: wrote {}x{} frame to {}",
        frame.width(),
        frame.height(),
        path.display()
    );
    Ok(())
}

/// Saves whatever frame the producer slot holds right now.
pub(crate) fn save_latest(exchange: &FrameExchange, path: &Path) -> Result<(), SnapshotError> {
    exchange.with_latest(|frame| match frame {
        Some(frame) => save_frame(frame, path),
        None => Err(SnapshotError::NoFrame),
    })
}

fn format_for(path: &Path) -> Result<ImageFormat, SnapshotError> {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Ok(ImageFormat::Png),
        "bmp" => Ok(ImageFormat::Bmp),
        "tga" => Ok(ImageFormat::Tga),
        _ => Err(SnapshotError::UnsupportedFormat(path.display().to_string())),
    }
}
