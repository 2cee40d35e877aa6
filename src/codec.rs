use image::{ImageBuffer, ImageOutputFormat, Rgba, RgbImage};
use std::io::Cursor;

use crate::alpha::{PixelBuffer, RgbaBuffer};
use crate::error::{PipelineError, Result};

pub const PNG_MIME: &str = "image/png";

/// Decode any supported raster into normalized RGB. Existing alpha is discarded.
pub fn decode_rgb(bytes: &[u8]) -> Result<PixelBuffer> {
    let decoded = image::load_from_memory(bytes)?.to_rgb8();
    pixel_buffer_from_rgb8(&decoded)
}

pub fn pixel_buffer_from_rgb8(image: &RgbImage) -> Result<PixelBuffer> {
    let pixels = image
        .pixels()
        .map(|px| px.0.map(|c| c as f32 / 255.0))
        .collect();
    PixelBuffer::new(image.width(), image.height(), pixels)
}

/// Encode as 8-bit RGBA PNG.
pub fn encode_png(buffer: &RgbaBuffer) -> Result<Vec<u8>> {
    let image: ImageBuffer<Rgba<u8>, Vec<u8>> =
        ImageBuffer::from_raw(buffer.width(), buffer.height(), buffer.to_rgba8()).ok_or_else(
            || PipelineError::ImageError("RGBA buffer does not match its dimensions".into()),
        )?;
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageOutputFormat::Png)?;
    Ok(out.into_inner())
}
