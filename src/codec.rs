//! Image codec collaborator
//!
//! Pluggable packed-RGB to compressed-bytes encoding. Synchronous and
//! CPU-bound; called on the acquisition loop's blocking path.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::error::{Error, Result};

/// JPEG quality for the live preview path. Deliberately low: the preview is
/// a real-time feed, not an archival one.
pub const PREVIEW_JPEG_QUALITY: u8 = 35;

/// JPEG quality for still captures
pub const STILL_JPEG_QUALITY: u8 = 95;

/// Packed-RGB image encoder
pub trait ImageCodec: Send + Sync {
    /// Encode packed RGB pixels (no row padding) into a compressed image
    fn encode_rgb(&self, pixels: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>>;
}

/// JPEG codec on the `image` crate
#[derive(Debug, Default)]
pub struct JpegCodec;

impl ImageCodec for JpegCodec {
    fn encode_rgb(&self, pixels: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(Error::Codec(format!(
                "packed buffer is {} bytes, expected {} for {}x{}",
                pixels.len(),
                expected,
                width,
                height
            )));
        }

        let mut out = Cursor::new(Vec::with_capacity(expected / 8));
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
        encoder
            .encode(pixels, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| Error::Codec(e.to_string()))?;
        Ok(out.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_produces_jpeg() {
        let codec = JpegCodec;
        let pixels = vec![128u8; 16 * 16 * 3];
        let jpeg = codec
            .encode_rgb(&pixels, 16, 16, PREVIEW_JPEG_QUALITY)
            .unwrap();
        assert!(jpeg.starts_with(&[0xFF, 0xD8]));

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }

    #[test]
    fn test_encode_rejects_wrong_buffer_size() {
        let codec = JpegCodec;
        let pixels = vec![0u8; 10];
        assert!(matches!(
            codec.encode_rgb(&pixels, 16, 16, STILL_JPEG_QUALITY),
            Err(Error::Codec(_))
        ));
    }
}
