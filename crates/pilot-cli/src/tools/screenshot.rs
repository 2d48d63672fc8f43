//! Screenshot preparation before it reaches the model
//!
//! Captures arrive at device resolution (2x on Retina). The model works in
//! the declared screen coordinates, so every capture is scaled to the
//! declared size and re-encoded as JPEG.

use std::io::Cursor;

use anyhow::{Context, Result};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, GenericImageView, RgbImage};
use tracing::debug;

use super::desktop::ScreenSize;
use super::Screenshot;

const JPEG_QUALITY: u8 = 80;

/// Quality used when the first encoding is over `MAX_ENCODED_BYTES`
const REDUCED_QUALITY: u8 = 60;

/// Provider limit for a single image, with some headroom
pub const MAX_ENCODED_BYTES: usize = 4_000_000;

/// Decode a raw capture, scale it to `screen` and encode it for the model
pub fn prepare(raw: &[u8], screen: ScreenSize) -> Result<Screenshot> {
    let img = image::load_from_memory(raw).context("Failed to decode captured screenshot")?;
    let (width, height) = img.dimensions();

    let img = if (width, height) == (screen.width, screen.height) {
        img
    } else {
        debug!(
            from_width = width,
            from_height = height,
            to_width = screen.width,
            to_height = screen.height,
            "Scaling screenshot"
        );
        img.resize_exact(screen.width, screen.height, FilterType::Lanczos3)
    };

    // JPEG has no alpha channel
    let rgb = img.to_rgb8();
    let mut bytes = encode_jpeg(&rgb, JPEG_QUALITY)?;
    if bytes.len() > MAX_ENCODED_BYTES {
        debug!(bytes = bytes.len(), "Screenshot too large, re-encoding at lower quality");
        bytes = encode_jpeg(&rgb, REDUCED_QUALITY)?;
    }

    let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(Screenshot::jpeg_base64(data))
}

fn encode_jpeg(rgb: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .context("Failed to encode screenshot")?;
    Ok(buf.into_inner())
}
