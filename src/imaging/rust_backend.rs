//! Pure Rust codec backend built on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, BMP) | `image::load_from_memory` |
//! | Encode → PNG | `DynamicImage::write_to` with `ImageFormat::Png` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` (RGB8, explicit quality) |
//! | Encode → GIF | `image::codecs::gif::GifEncoder`, infinite repeat |
//! | Decode GIF frames | `GifDecoder` + `AnimationDecoder::into_frames` |

use super::backend::{BackendError, DecodedAnimation, ImageBackend};
use super::image_value::ImageValue;
use super::params::Quality;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::{AnimationDecoder, Delay, DynamicImage, Frame, ImageFormat};
use std::io::Cursor;

/// GIF encoder quantization speed (1 = best, 30 = fastest).
const GIF_SPEED: i32 = 10;

/// Backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn failed(what: &'static str) -> impl FnOnce(image::ImageError) -> BackendError {
    move |e| BackendError::ProcessingFailed(format!("{what} failed: {e}"))
}

impl ImageBackend for RustBackend {
    fn decode(&self, bytes: &[u8]) -> Result<ImageValue, BackendError> {
        image::load_from_memory(bytes)
            .map(ImageValue::new)
            .map_err(failed("Decode"))
    }

    fn encode_png(&self, image: &ImageValue) -> Result<Vec<u8>, BackendError> {
        let mut out = Cursor::new(Vec::new());
        let source = image.image();
        // 16-bit and float layouts are narrowed to 8-bit RGBA for PNG
        match source {
            DynamicImage::ImageRgb8(_)
            | DynamicImage::ImageRgba8(_)
            | DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageLumaA8(_) => source.write_to(&mut out, ImageFormat::Png),
            other => DynamicImage::ImageRgba8(other.to_rgba8()).write_to(&mut out, ImageFormat::Png),
        }
        .map_err(failed("PNG encode"))?;
        Ok(out.into_inner())
    }

    fn encode_jpeg(&self, image: &ImageValue, quality: Quality) -> Result<Vec<u8>, BackendError> {
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.value() as u8);
        encoder
            .encode_image(image.rgb8())
            .map_err(failed("JPEG encode"))?;
        Ok(out)
    }

    fn encode_gif(&self, frames: &[ImageValue], delay_ms: u32) -> Result<Vec<u8>, BackendError> {
        if frames.is_empty() {
            return Err(BackendError::ProcessingFailed(
                "GIF needs at least one frame".into(),
            ));
        }
        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new_with_speed(&mut out, GIF_SPEED);
            encoder
                .set_repeat(Repeat::Infinite)
                .map_err(failed("GIF encode"))?;
            for frame in frames {
                let delay = Delay::from_numer_denom_ms(delay_ms, 1);
                encoder
                    .encode_frame(Frame::from_parts(frame.image().to_rgba8(), 0, 0, delay))
                    .map_err(failed("GIF encode"))?;
            }
        }
        Ok(out)
    }

    fn decode_gif(&self, bytes: &[u8]) -> Result<DecodedAnimation, BackendError> {
        let decoder = GifDecoder::new(Cursor::new(bytes)).map_err(failed("GIF decode"))?;
        let frames = decoder
            .into_frames()
            .collect_frames()
            .map_err(failed("GIF decode"))?;

        let mut animation = DecodedAnimation::default();
        for frame in frames {
            let (numer, denom) = frame.delay().numer_denom_ms();
            animation.delays_ms.push(numer / denom.max(1));
            animation
                .frames
                .push(ImageValue::new(DynamicImage::ImageRgba8(frame.into_buffer())));
        }
        Ok(animation)
    }
}
