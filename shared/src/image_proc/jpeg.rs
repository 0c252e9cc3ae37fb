//! JPEG encoding for published frames and decoding for detection.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, ImageFormat, ImageResult, RgbImage};

/// JPEG quality used for published frames.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Encode an RGB frame as JPEG.
pub fn encode_rgb_jpeg(image: &RgbImage, quality: u8) -> ImageResult<Bytes> {
    let mut jpeg_bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_bytes, quality);
    encoder.encode_image(image)?;
    Ok(Bytes::from(jpeg_bytes))
}

/// Decode JPEG bytes to a single-intensity grayscale image.
pub fn decode_luma(jpeg_data: &[u8]) -> ImageResult<GrayImage> {
    let image = image::load_from_memory_with_format(jpeg_data, ImageFormat::Jpeg)?;
    Ok(image.to_luma8())
}
