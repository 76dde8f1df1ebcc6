//! Comment blocks inside encoded JPEG and GIF files.
//!
//! The export metadata string travels in the container's native comment slot:
//!
//! | Container | Block |
//! |---|---|
//! | JPEG | `COM` segment (`FF FE`), placed after the leading `APPn` segments |
//! | GIF | comment extension (`21 FE`), placed after the global color table |
//!
//! Extraction walks the block structure instead of searching for byte
//! patterns, so pixel data can never be mistaken for a comment.

use super::backend::BackendError;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_COM: u8 = 0xFE;
const JPEG_SOS: u8 = 0xDA;
const JPEG_EOI: u8 = 0xD9;
const JPEG_MAX_SEGMENT: usize = 0xFFFF - 2;

const GIF_HEADER_LEN: usize = 6;
const GIF_LSD_LEN: usize = 7;
const GIF_EXTENSION: u8 = 0x21;
const GIF_COMMENT_LABEL: u8 = 0xFE;
const GIF_IMAGE: u8 = 0x2C;
const GIF_TRAILER: u8 = 0x3B;

fn be16(data: &[u8], pos: usize) -> Option<usize> {
    Some(u16::from_be_bytes([*data.get(pos)?, *data.get(pos + 1)?]) as usize)
}

/// Position just past the leading `APPn` segments of a JPEG stream.
fn jpeg_insert_position(data: &[u8]) -> usize {
    let mut pos = 2;
    while data.get(pos) == Some(&0xFF)
        && data.get(pos + 1).is_some_and(|m| (0xE0..=0xEF).contains(m))
    {
        match be16(data, pos + 2) {
            Some(len) if pos + 2 + len <= data.len() => pos += 2 + len,
            _ => break,
        }
    }
    pos
}

/// Insert a `COM` segment into an encoded JPEG.
pub fn insert_jpeg_comment(jpeg: &[u8], comment: &[u8]) -> Result<Vec<u8>, BackendError> {
    if !jpeg.starts_with(&JPEG_SOI) {
        return Err(BackendError::Unsupported("not a JPEG stream".into()));
    }
    if comment.len() > JPEG_MAX_SEGMENT {
        return Err(BackendError::ProcessingFailed(format!(
            "JPEG comment too long: {} bytes",
            comment.len()
        )));
    }

    let pos = jpeg_insert_position(jpeg);
    let mut out = Vec::with_capacity(jpeg.len() + comment.len() + 4);
    out.extend_from_slice(&jpeg[..pos]);
    out.extend_from_slice(&[0xFF, JPEG_COM]);
    out.extend_from_slice(&((comment.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(comment);
    out.extend_from_slice(&jpeg[pos..]);
    Ok(out)
}

/// First `COM` segment payload of a JPEG, if any.
pub fn extract_jpeg_comment(jpeg: &[u8]) -> Option<Vec<u8>> {
    if !jpeg.starts_with(&JPEG_SOI) {
        return None;
    }
    let mut pos = 2;
    loop {
        if *jpeg.get(pos)? != 0xFF {
            return None;
        }
        let marker = *jpeg.get(pos + 1)?;
        match marker {
            // fill byte
            0xFF => pos += 1,
            JPEG_SOS | JPEG_EOI => return None,
            0x01 | 0xD0..=0xD7 => pos += 2,
            _ => {
                let len = be16(jpeg, pos + 2)?;
                if len < 2 {
                    return None;
                }
                let body = jpeg.get(pos + 4..pos + 2 + len)?;
                if marker == JPEG_COM {
                    return Some(body.to_vec());
                }
                pos += 2 + len;
            }
        }
    }
}

/// Length of the global color table declared by the logical screen descriptor.
fn gif_global_table_len(data: &[u8]) -> Option<usize> {
    let packed = *data.get(GIF_HEADER_LEN + 4)?;
    Some(if packed & 0x80 != 0 {
        3 * (1 << ((packed & 0x07) + 1))
    } else {
        0
    })
}

/// Insert a comment extension into an encoded GIF.
pub fn insert_gif_comment(gif: &[u8], comment: &[u8]) -> Result<Vec<u8>, BackendError> {
    if !(gif.starts_with(b"GIF87a") || gif.starts_with(b"GIF89a")) {
        return Err(BackendError::Unsupported("not a GIF stream".into()));
    }
    let table = gif_global_table_len(gif)
        .ok_or_else(|| BackendError::ProcessingFailed("truncated GIF header".into()))?;
    let pos = GIF_HEADER_LEN + GIF_LSD_LEN + table;
    if pos > gif.len() {
        return Err(BackendError::ProcessingFailed("truncated GIF color table".into()));
    }

    let mut out = Vec::with_capacity(gif.len() + comment.len() + comment.len() / 255 + 4);
    out.extend_from_slice(&gif[..pos]);
    out.extend_from_slice(&[GIF_EXTENSION, GIF_COMMENT_LABEL]);
    for chunk in comment.chunks(255) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
    out.push(0);
    out.extend_from_slice(&gif[pos..]);
    // Comment extensions are a GIF89a feature
    out[..6].copy_from_slice(b"GIF89a");
    Ok(out)
}

/// Concatenate data sub-blocks starting at `pos`; returns the data and the
/// position after the terminator.
fn read_sub_blocks(data: &[u8], mut pos: usize) -> Option<(Vec<u8>, usize)> {
    let mut body = Vec::new();
    loop {
        let len = *data.get(pos)? as usize;
        pos += 1;
        if len == 0 {
            return Some((body, pos));
        }
        body.extend_from_slice(data.get(pos..pos + len)?);
        pos += len;
    }
}

/// First comment extension payload of a GIF, if any.
pub fn extract_gif_comment(gif: &[u8]) -> Option<Vec<u8>> {
    if !gif.starts_with(b"GIF8") {
        return None;
    }
    let mut pos = GIF_HEADER_LEN + GIF_LSD_LEN + gif_global_table_len(gif)?;
    loop {
        match *gif.get(pos)? {
            GIF_EXTENSION => {
                let label = *gif.get(pos + 1)?;
                let (body, next) = read_sub_blocks(gif, pos + 2)?;
                if label == GIF_COMMENT_LABEL {
                    return Some(body);
                }
                pos = next;
            }
            GIF_IMAGE => {
                let packed = *gif.get(pos + 9)?;
                let local_table = if packed & 0x80 != 0 {
                    3 * (1 << ((packed & 0x07) + 1))
                } else {
                    0
                };
                // descriptor (10) + local table + LZW minimum code size (1)
                let (_, next) = read_sub_blocks(gif, pos + 10 + local_table + 1)?;
                pos = next;
            }
            GIF_TRAILER => return None,
            _ => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_jpeg() -> Vec<u8> {
        // SOI, APP0 (len 4, two bytes payload), SOS stub, EOI
        vec![
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, b'J', b'F', 0xFF, 0xDA, 0x00, 0x02, 0xFF, 0xD9,
        ]
    }

    fn minimal_gif() -> Vec<u8> {
        let mut gif = b"GIF89a".to_vec();
        // 1x1 screen, global table of 2 colors
        gif.extend_from_slice(&[1, 0, 1, 0, 0x80, 0, 0]);
        gif.extend_from_slice(&[0, 0, 0, 255, 255, 255]);
        // image descriptor, no local table
        gif.extend_from_slice(&[0x2C, 0, 0, 0, 0, 1, 0, 1, 0, 0]);
        gif.extend_from_slice(&[2, 2, 0x4C, 0x01, 0]);
        gif.push(0x3B);
        gif
    }

    // =========================================================================
    // JPEG tests
    // =========================================================================

    #[test]
    fn jpeg_comment_inserted_after_app_segments() {
        let out = insert_jpeg_comment(&minimal_jpeg(), b"hello").unwrap();
        assert_eq!(&out[8..10], &[0xFF, 0xFE]);
        assert_eq!(extract_jpeg_comment(&out).unwrap(), b"hello");
    }

    #[test]
    fn jpeg_without_comment_extracts_none() {
        assert_eq!(extract_jpeg_comment(&minimal_jpeg()), None);
    }

    #[test]
    fn jpeg_insert_rejects_non_jpeg() {
        assert!(insert_jpeg_comment(b"PNG", b"x").is_err());
        assert_eq!(extract_jpeg_comment(b"garbage"), None);
    }

    #[test]
    fn jpeg_truncated_stream_extracts_none() {
        let out = insert_jpeg_comment(&minimal_jpeg(), b"hello").unwrap();
        assert_eq!(extract_jpeg_comment(&out[..12]), None);
    }

    // =========================================================================
    // GIF tests
    // =========================================================================

    #[test]
    fn gif_comment_roundtrip() {
        let out = insert_gif_comment(&minimal_gif(), b"meta").unwrap();
        assert_eq!(extract_gif_comment(&out).unwrap(), b"meta");
        assert_eq!(*out.last().unwrap(), 0x3B);
    }

    #[test]
    fn gif_long_comment_spans_sub_blocks() {
        let comment = vec![b'x'; 700];
        let out = insert_gif_comment(&minimal_gif(), &comment).unwrap();
        assert_eq!(extract_gif_comment(&out).unwrap(), comment);
    }

    #[test]
    fn gif_without_comment_extracts_none() {
        assert_eq!(extract_gif_comment(&minimal_gif()), None);
    }

    #[test]
    fn gif_comment_after_image_is_found() {
        let mut gif = minimal_gif();
        gif.pop();
        gif.extend_from_slice(&[0x21, 0xFE, 3, b'e', b'n', b'd', 0, 0x3B]);
        assert_eq!(extract_gif_comment(&gif).unwrap(), b"end");
    }
}
