//! Export metadata embedded in saved files.
//!
//! A saved still or animation carries the export choices that produced it
//! (crop, size patterns, playback order, disabled frames) so a later session
//! can re-export it the same way. The record travels as one ASCII string:
//!
//! ```text
//! aismeta1:zlib+b64:<base64(zlib level 9(compact JSON, sorted keys))>
//! ```
//!
//! JSON keys carry a leading underscore (`_crop_params`, `_playback_mode`, ...)
//! and absent fields are omitted. The string is stored in the container's
//! comment block (see [`crate::imaging::comment`]) or wrapped in an XMP
//! fragment for containers that only take XMP.
//!
//! Decoding never fails. Foreign strings (wrong prefix) decode to the empty
//! record without noise; corrupt payloads are logged and decode to the empty
//! record; each field is validated on its own, so one bad field does not
//! discard the others.

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::sync::LazyLock;

use base64::{Engine, engine::general_purpose::STANDARD};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::imaging::comment::{extract_gif_comment, extract_jpeg_comment};
use crate::imaging::{AspectRatioPattern, PlaybackMode, ResolutionPattern};

pub const METADATA_PREFIX: &str = "aismeta1:zlib+b64:";

const XMP_NS_RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const XMP_NS_AIS: &str = "https://example.com/aynime/1.0/";

static XMP_BODY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"ais:metadata_body="([^"]*)""#).expect("valid regex"));

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Crop box as `[size, x, y]` fractions of the source; `None` entries are unset.
pub type CropParams = [Option<f64>; 3];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentsMetadata {
    pub overlay_nime_name: Option<bool>,
    pub crop_params: Option<CropParams>,
    pub resize_aspect_ratio_pattern: Option<AspectRatioPattern>,
    pub resize_resolution_pattern: Option<ResolutionPattern>,
    pub playback_mode: Option<PlaybackMode>,
    /// `None` means every frame is enabled.
    pub disabled_frame_indices: Option<BTreeSet<u32>>,
}

/// Wire shape of the JSON body. Field order is the sorted key order.
#[derive(Serialize)]
struct Payload<'a> {
    #[serde(rename = "_crop_params", skip_serializing_if = "Option::is_none")]
    crop_params: Option<&'a CropParams>,
    #[serde(rename = "_disabled_frame_indices", skip_serializing_if = "Option::is_none")]
    disabled_frame_indices: Option<&'a BTreeSet<u32>>,
    #[serde(rename = "_overlay_nime_name", skip_serializing_if = "Option::is_none")]
    overlay_nime_name: Option<bool>,
    #[serde(rename = "_playback_mode", skip_serializing_if = "Option::is_none")]
    playback_mode: Option<&'static str>,
    #[serde(rename = "_resize_aspect_ratio_pattern", skip_serializing_if = "Option::is_none")]
    resize_aspect_ratio_pattern: Option<&'static str>,
    #[serde(rename = "_resize_resolution_pattern", skip_serializing_if = "Option::is_none")]
    resize_resolution_pattern: Option<&'static str>,
}

impl ContentsMetadata {
    pub fn with_overlay_nime_name(mut self, overlay: bool) -> Self {
        self.overlay_nime_name = Some(overlay);
        self
    }

    pub fn with_crop_params(mut self, crop: CropParams) -> Self {
        self.crop_params = Some(crop);
        self
    }

    pub fn with_patterns(mut self, aspect: AspectRatioPattern, resolution: ResolutionPattern) -> Self {
        self.resize_aspect_ratio_pattern = Some(aspect);
        self.resize_resolution_pattern = Some(resolution);
        self
    }

    pub fn with_playback_mode(mut self, mode: PlaybackMode) -> Self {
        self.playback_mode = Some(mode);
        self
    }

    /// Frame enable state; frames are enabled unless listed as disabled.
    pub fn is_frame_enable(&self, index: u32) -> bool {
        self.disabled_frame_indices
            .as_ref()
            .is_none_or(|disabled| !disabled.contains(&index))
    }

    pub fn set_frame_enable(&mut self, index: u32, enable: bool) {
        let disabled = self.disabled_frame_indices.get_or_insert_with(BTreeSet::new);
        if enable {
            disabled.remove(&index);
        } else {
            disabled.insert(index);
        }
    }

    /// Forget all frame enable state (every frame enabled, field absent).
    pub fn erase_frame_enable(&mut self) {
        self.disabled_frame_indices = None;
    }

    /// Set the disabled indices from per-frame flags.
    pub fn set_frame_enables(&mut self, flags: &[bool]) {
        self.disabled_frame_indices = Some(
            flags
                .iter()
                .enumerate()
                .filter(|(_, enable)| !**enable)
                .map(|(i, _)| i as u32)
                .collect(),
        );
    }

    fn payload(&self) -> Payload<'_> {
        Payload {
            crop_params: self.crop_params.as_ref(),
            disabled_frame_indices: self.disabled_frame_indices.as_ref(),
            overlay_nime_name: self.overlay_nime_name,
            playback_mode: self.playback_mode.map(PlaybackMode::as_str),
            resize_aspect_ratio_pattern: self.resize_aspect_ratio_pattern.map(AspectRatioPattern::as_str),
            resize_resolution_pattern: self.resize_resolution_pattern.map(ResolutionPattern::as_str),
        }
    }

    /// Serialize to the prefixed, compressed ASCII form.
    pub fn encode(&self) -> Result<String, MetadataError> {
        let json = serde_json::to_vec(&self.payload())?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&json)?;
        let compressed = encoder.finish()?;
        Ok(format!("{METADATA_PREFIX}{}", STANDARD.encode(compressed)))
    }

    /// Parse the prefixed form. Never fails; see the [module docs](self).
    pub fn decode(text: &str) -> Self {
        let Some(body) = text.trim().strip_prefix(METADATA_PREFIX) else {
            return Self::default();
        };
        match decode_body(body) {
            Ok(fields) => Self::from_fields(&fields),
            Err(reason) => {
                log::warn!("Ignoring corrupt metadata: {reason}");
                Self::default()
            }
        }
    }

    /// Parse a raw comment payload.
    pub fn decode_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) if text.is_ascii() => Self::decode(text),
            _ => Self::default(),
        }
    }

    fn from_fields(fields: &Map<String, Value>) -> Self {
        Self {
            overlay_nime_name: field(fields, "_overlay_nime_name", Value::as_bool),
            crop_params: field(fields, "_crop_params", parse_crop),
            resize_aspect_ratio_pattern: field(fields, "_resize_aspect_ratio_pattern", |v| {
                v.as_str()?.parse().ok()
            }),
            resize_resolution_pattern: field(fields, "_resize_resolution_pattern", |v| {
                v.as_str()?.parse().ok()
            }),
            playback_mode: field(fields, "_playback_mode", |v| v.as_str()?.parse().ok()),
            disabled_frame_indices: field(fields, "_disabled_frame_indices", parse_indices),
        }
    }

    /// Wrap the encoded string in an XMP RDF fragment.
    pub fn to_xmp(&self) -> Result<String, MetadataError> {
        Ok(format!(
            r#"<rdf:RDF xmlns:rdf="{XMP_NS_RDF}"><rdf:Description xmlns:ais="{XMP_NS_AIS}" ais:metadata_body="{}" /></rdf:RDF>"#,
            self.encode()?
        ))
    }

    /// Extract from an XMP fragment; no metadata attribute yields the empty record.
    pub fn from_xmp(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        XMP_BODY_RE
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .map(|body| Self::decode(body.as_str()))
            .unwrap_or_default()
    }

    /// Find metadata in an arbitrary saved file: JPEG comment, GIF comment,
    /// XMP fragment or a bare metadata string, in that order.
    pub fn read_embedded(bytes: &[u8]) -> Self {
        if let Some(comment) = extract_jpeg_comment(bytes).or_else(|| extract_gif_comment(bytes)) {
            return Self::decode_bytes(&comment);
        }
        if XMP_BODY_RE.is_match(&String::from_utf8_lossy(bytes)) {
            return Self::from_xmp(bytes);
        }
        Self::decode_bytes(bytes)
    }
}

fn decode_body(body: &str) -> Result<Map<String, Value>, String> {
    let compressed = STANDARD.decode(body).map_err(|e| format!("base64: {e}"))?;
    let mut json = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| format!("zlib: {e}"))?;
    match serde_json::from_slice(&json).map_err(|e| format!("JSON: {e}"))? {
        Value::Object(map) => Ok(map),
        other => Err(format!("JSON: expected an object, found {other}")),
    }
}

/// Read one optional field; a present but invalid value is logged and dropped.
fn field<T>(fields: &Map<String, Value>, key: &str, parse: impl Fn(&Value) -> Option<T>) -> Option<T> {
    let value = fields.get(key)?;
    if value.is_null() {
        return None;
    }
    let parsed = parse(value);
    if parsed.is_none() {
        log::warn!("Ignoring invalid metadata field {key}: {value}");
    }
    parsed
}

fn parse_crop(value: &Value) -> Option<CropParams> {
    let items = value.as_array()?;
    if items.len() != 3 {
        return None;
    }
    let mut crop = [None; 3];
    for (slot, item) in crop.iter_mut().zip(items) {
        if item.is_null() {
            continue;
        }
        let v = item.as_f64()?;
        if !(0.0..=1.0).contains(&v) {
            return None;
        }
        *slot = Some(v);
    }
    Some(crop)
}

fn parse_indices(value: &Value) -> Option<BTreeSet<u32>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_u64().and_then(|i| u32::try_from(i).ok()))
        .collect()
}
