//! Image codec backend trait and shared types.
//!
//! The [`ImageBackend`] trait covers every codec operation the file round trip
//! needs: decode a still, encode PNG/JPEG, and encode/decode a looping GIF.
//! Backends work on in-memory bytes; file I/O and comment blocks are handled by
//! the caller.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Tests use [`tests::MockBackend`], which records every call.

use super::comment::{extract_gif_comment, extract_jpeg_comment, insert_gif_comment, insert_jpeg_comment};
use super::image_value::ImageValue;
use super::params::Quality;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("Unsupported input: {0}")]
    Unsupported(String),
}

/// Frames and per-frame delays of a decoded animation.
#[derive(Debug, Clone, Default)]
pub struct DecodedAnimation {
    pub frames: Vec<ImageValue>,
    pub delays_ms: Vec<u32>,
}

impl DecodedAnimation {
    /// Mean frame delay, `None` for an empty animation.
    pub fn average_delay_ms(&self) -> Option<u32> {
        if self.delays_ms.is_empty() {
            return None;
        }
        let total: u64 = self.delays_ms.iter().map(|&d| d as u64).sum();
        Some((total as f64 / self.delays_ms.len() as f64).round() as u32)
    }
}

/// Trait for image codec backends.
pub trait ImageBackend: Sync {
    /// Decode a still image (PNG, JPEG, GIF first frame, BMP).
    fn decode(&self, bytes: &[u8]) -> Result<ImageValue, BackendError>;

    /// Encode losslessly as PNG.
    fn encode_png(&self, image: &ImageValue) -> Result<Vec<u8>, BackendError>;

    /// Encode as JPEG.
    fn encode_jpeg(&self, image: &ImageValue, quality: Quality) -> Result<Vec<u8>, BackendError>;

    /// Encode an infinitely looping GIF with a constant frame delay.
    fn encode_gif(&self, frames: &[ImageValue], delay_ms: u32) -> Result<Vec<u8>, BackendError>;

    /// Decode every frame of a GIF with its delay.
    fn decode_gif(&self, bytes: &[u8]) -> Result<DecodedAnimation, BackendError>;

    /// Attach a comment block to encoded JPEG or GIF bytes.
    fn embed_comment(&self, encoded: Vec<u8>, comment: &[u8]) -> Result<Vec<u8>, BackendError> {
        if encoded.starts_with(&[0xFF, 0xD8]) {
            insert_jpeg_comment(&encoded, comment)
        } else if encoded.starts_with(b"GIF8") {
            insert_gif_comment(&encoded, comment)
        } else {
            Err(BackendError::Unsupported(
                "comments need a JPEG or GIF container".into(),
            ))
        }
    }

    /// Comment block of encoded JPEG or GIF bytes, if any.
    fn read_comment(&self, encoded: &[u8]) -> Option<Vec<u8>> {
        extract_jpeg_comment(encoded).or_else(|| extract_gif_comment(encoded))
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mock backend that records operations and emits tiny textual "files".
    ///
    /// Encoded bytes look like `mock:png:WxH` or `mock:gif:WxH:N:D`, with an
    /// embedded comment appended after a newline; the decoders parse them
    /// back into blank images of the same size, so the persistence layer can
    /// be exercised without real codecs.
    /// Uses Mutex (not RefCell) so it is Sync.
    #[derive(Default)]
    pub struct MockBackend {
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Decode,
        EncodePng {
            width: u32,
            height: u32,
        },
        EncodeJpeg {
            width: u32,
            height: u32,
            quality: u32,
        },
        EncodeGif {
            frames: usize,
            delay_ms: u32,
        },
        DecodeGif,
        EmbedComment {
            bytes: usize,
        },
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        fn record(&self, op: RecordedOp) {
            self.operations.lock().unwrap().push(op);
        }

        fn parse(bytes: &[u8]) -> Result<Vec<u32>, BackendError> {
            let text = std::str::from_utf8(bytes)
                .map_err(|_| BackendError::ProcessingFailed("not a mock file".into()))?;
            let header = text.split_once('\n').map_or(text, |(header, _)| header);
            let rest = header
                .strip_prefix("mock:")
                .ok_or_else(|| BackendError::ProcessingFailed("not a mock file".into()))?;
            rest.split([':', 'x'])
                .skip(1)
                .map(|n| {
                    n.parse()
                        .map_err(|_| BackendError::ProcessingFailed(format!("bad mock field {n}")))
                })
                .collect()
        }
    }

    impl ImageBackend for MockBackend {
        fn decode(&self, bytes: &[u8]) -> Result<ImageValue, BackendError> {
            self.record(RecordedOp::Decode);
            let fields = Self::parse(bytes)?;
            Ok(ImageValue::empty(fields[0], fields[1]))
        }

        fn encode_png(&self, image: &ImageValue) -> Result<Vec<u8>, BackendError> {
            let (width, height) = image.dimensions();
            self.record(RecordedOp::EncodePng { width, height });
            Ok(format!("mock:png:{width}x{height}").into_bytes())
        }

        fn encode_jpeg(
            &self,
            image: &ImageValue,
            quality: Quality,
        ) -> Result<Vec<u8>, BackendError> {
            let (width, height) = image.dimensions();
            self.record(RecordedOp::EncodeJpeg {
                width,
                height,
                quality: quality.value(),
            });
            Ok(format!("mock:jpg:{width}x{height}").into_bytes())
        }

        fn encode_gif(
            &self,
            frames: &[ImageValue],
            delay_ms: u32,
        ) -> Result<Vec<u8>, BackendError> {
            self.record(RecordedOp::EncodeGif {
                frames: frames.len(),
                delay_ms,
            });
            let (width, height) = frames.first().map(|f| f.dimensions()).unwrap_or((1, 1));
            Ok(format!("mock:gif:{width}x{height}:{}:{delay_ms}", frames.len()).into_bytes())
        }

        fn decode_gif(&self, bytes: &[u8]) -> Result<DecodedAnimation, BackendError> {
            self.record(RecordedOp::DecodeGif);
            let fields = Self::parse(bytes)?;
            let (count, delay) = (fields[2] as usize, fields[3]);
            Ok(DecodedAnimation {
                frames: (0..count)
                    .map(|_| ImageValue::empty(fields[0], fields[1]))
                    .collect(),
                delays_ms: vec![delay; count],
            })
        }

        fn embed_comment(
            &self,
            mut encoded: Vec<u8>,
            comment: &[u8],
        ) -> Result<Vec<u8>, BackendError> {
            self.record(RecordedOp::EmbedComment {
                bytes: comment.len(),
            });
            encoded.push(b'\n');
            encoded.extend_from_slice(comment);
            Ok(encoded)
        }

        fn read_comment(&self, encoded: &[u8]) -> Option<Vec<u8>> {
            let pos = encoded.iter().position(|&b| b == b'\n')?;
            Some(encoded[pos + 1..].to_vec())
        }
    }

    #[test]
    fn mock_roundtrips_sizes() {
        let backend = MockBackend::new();
        let bytes = backend.encode_png(&ImageValue::empty(12, 7)).unwrap();
        assert_eq!(backend.decode(&bytes).unwrap().dimensions(), (12, 7));

        let frames = vec![ImageValue::empty(4, 4); 3];
        let gif = backend.encode_gif(&frames, 70).unwrap();
        let anim = backend.decode_gif(&gif).unwrap();
        assert_eq!(anim.frames.len(), 3);
        assert_eq!(anim.delays_ms, vec![70; 3]);
        assert_eq!(backend.get_operations().len(), 4);
    }

    #[test]
    fn mock_comment_survives_decode() {
        let backend = MockBackend::new();
        let jpeg = backend
            .encode_jpeg(&ImageValue::empty(5, 3), Quality::default())
            .unwrap();
        let tagged = backend.embed_comment(jpeg, b"aismeta1:x").unwrap();
        assert_eq!(backend.read_comment(&tagged), Some(b"aismeta1:x".to_vec()));
        assert_eq!(backend.decode(&tagged).unwrap().dimensions(), (5, 3));
    }

    #[test]
    fn average_delay_rounds() {
        let anim = DecodedAnimation {
            frames: Vec::new(),
            delays_ms: vec![40, 50, 50],
        };
        assert_eq!(anim.average_delay_ms(), Some(47));
        assert_eq!(DecodedAnimation::default().average_delay_ms(), None);
    }
}
