//! Image normalization for model transport.
//!
//! Uploaded images arrive in whatever format and size the client produced.
//! Before an image is shipped to the vision endpoint it is decoded, forced
//! into RGB, downscaled so the longer edge fits within [`MAX_EDGE`], and
//! re-encoded as JPEG.

use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GenericImageView;
use thiserror::Error;

/// Longest edge allowed before proportional downscaling kicks in.
pub const MAX_EDGE: u32 = 1024;

const JPEG_QUALITY: u8 = 95;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to decode image data: {source}")]
    Decode {
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode image data: {source}")]
    Encode {
        #[source]
        source: image::ImageError,
    },
}

/// A normalized image ready for a vision model call.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub mime_type: &'static str,
}

/// Decode raw bytes, normalize the color space, and bound the dimensions.
///
/// Aspect ratio is preserved; the new edge lengths are `round(dim * MAX_EDGE
/// / max(width, height))` with a floor of one pixel. Images already within
/// bounds keep their dimensions but are still re-encoded as JPEG.
pub fn prepare(raw: &[u8]) -> Result<PreparedImage, ImageError> {
    let decoded =
        image::load_from_memory(raw).map_err(|source| ImageError::Decode { source })?;

    // Vision endpoints choke on palette and alpha modes; flatten to RGB8.
    let mut normalized = match decoded {
        DynamicImage::ImageRgb8(_) => decoded,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    };

    let (width, height) = normalized.dimensions();
    let longest_edge = width.max(height);

    if longest_edge > MAX_EDGE {
        let scale = MAX_EDGE as f32 / longest_edge as f32;
        let target_width = ((width as f32 * scale).round() as u32).max(1);
        let target_height = ((height as f32 * scale).round() as u32).max(1);
        normalized = normalized.resize_exact(target_width, target_height, FilterType::Lanczos3);
    }

    let (final_width, final_height) = normalized.dimensions();
    debug_assert!(final_width.max(final_height) <= MAX_EDGE || longest_edge <= MAX_EDGE);

    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
    encoder
        .encode_image(&normalized)
        .map_err(|source| ImageError::Encode { source })?;

    Ok(PreparedImage {
        data: buffer,
        width: final_width,
        height: final_height,
        mime_type: "image/jpeg",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let buffer = ImageBuffer::from_pixel(width, height, Rgb::<u8>([120, 40, 200]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(buffer)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .expect("encode test png");
        bytes
    }

    #[test]
    fn oversized_image_is_downscaled_proportionally() {
        let prepared = prepare(&png_bytes(2048, 1024)).expect("prepare succeeds");
        assert_eq!(prepared.width, 1024);
        assert_eq!(prepared.height, 512);
        assert_eq!(prepared.mime_type, "image/jpeg");
    }

    #[test]
    fn small_image_keeps_its_dimensions() {
        let prepared = prepare(&png_bytes(640, 480)).expect("prepare succeeds");
        assert_eq!(prepared.width, 640);
        assert_eq!(prepared.height, 480);
    }

    #[test]
    fn non_square_rounding_matches_scale_formula() {
        // 1500 x 1000 -> scale 1024/1500, height rounds to 683.
        let prepared = prepare(&png_bytes(1500, 1000)).expect("prepare succeeds");
        assert_eq!(prepared.width, 1024);
        assert_eq!(prepared.height, 683);
    }

    #[test]
    fn alpha_images_are_flattened_to_rgb() {
        let buffer = ImageBuffer::from_pixel(16, 16, Rgba::<u8>([10, 20, 30, 128]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(buffer)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .expect("encode rgba png");

        let prepared = prepare(&bytes).expect("prepare succeeds");
        assert_eq!(prepared.mime_type, "image/jpeg");
        assert_eq!(prepared.width, 16);
    }

    #[test]
    fn garbage_bytes_fail_with_decode_error() {
        let error = prepare(b"definitely not an image").expect_err("must fail");
        assert!(matches!(error, ImageError::Decode { .. }));
    }
}
