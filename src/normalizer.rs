//! Decoding and re-encoding of downloaded page images.
//!
//! Sources serve pages in whatever encoding they like. Before packaging, each
//! page is decoded (which also validates it) and re-encoded to one target
//! encoding, so the generators never have to branch per page. The `Raw` target
//! keeps the original bytes once they are known to decode.

use std::io::Cursor;

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Frame, ImageFormat};

use crate::error::{Error, Result};
use crate::types::ImageEncoding;

/// JPEG quality used when none is configured.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// A validated page image ready to be written to its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    /// Encoding of `bytes`. For `Raw` targets this is the detected source encoding.
    pub encoding: ImageEncoding,
}

/// Detects the encoding of `bytes` by content, preferring `hint` when it is concrete.
pub fn detect_encoding(bytes: &[u8], hint: ImageEncoding) -> ImageEncoding {
    match image::guess_format(bytes) {
        Ok(format) => ImageEncoding::from_image_format(format),
        Err(_) => match hint {
            ImageEncoding::Png | ImageEncoding::Jpg | ImageEncoding::Gif => hint,
            ImageEncoding::Raw | ImageEncoding::Unknown => ImageEncoding::Unknown,
        },
    }
}

/// Decodes `bytes` as PNG, JPEG or GIF.
///
/// A concrete `hint` selects the decoder; `Raw`/`Unknown` hints fall back to
/// content sniffing. When the hint disagrees with the actual content (a PNG
/// served as `image/jpeg` is common), sniffing wins.
pub fn decode(bytes: &[u8], hint: ImageEncoding) -> Result<(DynamicImage, ImageEncoding)> {
    let detected = detect_encoding(bytes, hint);
    let format = detected
        .image_format()
        .or_else(|| hint.image_format())
        .ok_or_else(|| {
            Error::Image(image::ImageError::Unsupported(
                image::error::UnsupportedError::from_format_and_kind(
                    image::error::ImageFormatHint::Unknown,
                    image::error::UnsupportedErrorKind::Format(
                        image::error::ImageFormatHint::Unknown,
                    ),
                ),
            ))
        })?;

    let decoded = image::load_from_memory_with_format(bytes, format)?;
    Ok((decoded, ImageEncoding::from_image_format(format)))
}

/// Encodes an already decoded image into `target`.
///
/// # Errors
///
/// `Raw` and `Unknown` are not encodings and yield [`Error::Unsupported`].
pub fn encode(image: &DynamicImage, target: ImageEncoding, jpeg_quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();

    match target {
        ImageEncoding::Jpg => {
            // JPEG has no alpha channel
            let rgb = image.to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut buffer, jpeg_quality.clamp(1, 100));
            rgb.write_with_encoder(encoder)?;
        }
        ImageEncoding::Png => {
            image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
        }
        ImageEncoding::Gif => {
            let mut encoder = GifEncoder::new(&mut buffer);
            encoder.encode_frame(Frame::new(image.to_rgba8()))?;
        }
        ImageEncoding::Raw | ImageEncoding::Unknown => {
            return Err(Error::Unsupported(format!(
                "Cannot encode an image to {:?}",
                target
            )));
        }
    }

    Ok(buffer)
}

/// Validates `source` and converts it to `target`.
///
/// With `target == Raw` the input bytes are returned untouched once they have
/// been decoded successfully.
///
/// # Errors
///
/// [`Error::Image`] when the bytes do not decode, [`Error::Unsupported`] when
/// `target` is `Unknown`.
pub fn normalize(
    source: &[u8],
    hint: ImageEncoding,
    target: ImageEncoding,
    jpeg_quality: u8,
) -> Result<NormalizedImage> {
    if target == ImageEncoding::Unknown {
        return Err(Error::Unsupported(
            "Unknown target encoding for normalization".to_string(),
        ));
    }

    let (decoded, detected) = decode(source, hint)?;

    if target == ImageEncoding::Raw {
        return Ok(NormalizedImage {
            bytes: source.to_vec(),
            encoding: detected,
        });
    }

    Ok(NormalizedImage {
        bytes: encode(&decoded, target, jpeg_quality)?,
        encoding: target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn sample_png() -> Vec<u8> {
        let img = RgbaImage::from_pixel(8, 6, Rgba([10, 200, 30, 128]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_png_to_jpeg_flattens_alpha() {
        let out = normalize(&sample_png(), ImageEncoding::Png, ImageEncoding::Jpg, 90).unwrap();
        assert_eq!(out.encoding, ImageEncoding::Jpg);
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::Jpeg);
        let back = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!((back.width(), back.height()), (8, 6));
    }

    #[test]
    fn test_raw_passthrough_keeps_bytes() {
        let png = sample_png();
        let out = normalize(&png, ImageEncoding::Raw, ImageEncoding::Raw, 90).unwrap();
        assert_eq!(out.bytes, png);
        assert_eq!(out.encoding, ImageEncoding::Png);
    }

    #[test]
    fn test_wrong_hint_is_overridden_by_content() {
        let out = normalize(&sample_png(), ImageEncoding::Jpg, ImageEncoding::Png, 90).unwrap();
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_gif_target() {
        let out = normalize(&sample_png(), ImageEncoding::Unknown, ImageEncoding::Gif, 90).unwrap();
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::Gif);
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        let err = normalize(b"<html>not an image</html>", ImageEncoding::Unknown, ImageEncoding::Jpg, 90)
            .unwrap_err();
        assert!(matches!(err, Error::Image(_)));
    }

    #[test]
    fn test_unknown_target_is_unsupported() {
        let err = normalize(&sample_png(), ImageEncoding::Png, ImageEncoding::Unknown, 90).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
