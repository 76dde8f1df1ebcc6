//! Timestamps and filename conventions for saved content.
//!
//! Every saved item is named by a stem `{name}__{timestamp}`:
//!
//! - `name` is the encoded name tag ([`encode_valid_nime_name`]): the tag
//!   text with spaces turned into underscores, or `UNKNOWN` when there is no tag.
//! - `timestamp` is `YYYY-MM-DD_HH-MM-SS_mmm` in local time. Files written by
//!   older versions carry `YYYY-MM-DD_HH-MM-SS`; both are accepted.
//!
//! ```text
//! raw/<NIME>Some Show__2024-05-01_12-00-00_123   (tag "Some Show")
//!   → raw/Some_Show__2024-05-01_12-00-00_123.png
//! raw/UNKNOWN__2024-05-01_12-00-00_123.zip
//!   → 2024-05-01_12-00-00_123_000_e.png, …_001_d.png, …
//! ```

use chrono::Local;
use regex::Regex;
use std::sync::LazyLock;

/// Marker prefix of a name tag produced by the title recognizer.
pub const NIME_PREFIX: &str = "<NIME>";
/// Encoded name used when no tag is set.
pub const UNKNOWN_NAME: &str = "UNKNOWN";

static TIME_STAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}(?:_\d{3})?$").expect("valid regex")
});
static STEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)__(.+)$").expect("valid regex"));
static ENABLE_FLAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_([de])\.png$").expect("valid regex"));

/// Local time as `YYYY-MM-DD_HH-MM-SS_mmm`.
pub fn current_time_stamp() -> String {
    Local::now().format("%Y-%m-%d_%H-%M-%S_%3f").to_string()
}

/// True for the current format and for the legacy seconds-only format.
pub fn is_valid_timestamp(text: &str) -> bool {
    TIME_STAMP_RE.is_match(text)
}

/// Filename-safe form of a name tag.
///
/// - `None` → `UNKNOWN`
/// - `"<NIME>Some Show"` → `Some_Show`
/// - anything without the tag prefix → `UNKNOWN`
pub fn encode_valid_nime_name(name: Option<&str>) -> String {
    match name.and_then(|n| n.strip_prefix(NIME_PREFIX)) {
        Some(rest) => rest.replace(NIME_PREFIX, "").replace(' ', "_"),
        None => UNKNOWN_NAME.to_string(),
    }
}

/// Inverse of [`encode_valid_nime_name`].
pub fn decode_valid_nime_name(text: &str) -> Option<String> {
    if text == UNKNOWN_NAME {
        None
    } else {
        Some(format!("{NIME_PREFIX}{}", text.replace('_', " ")))
    }
}

/// `{encoded name}__{timestamp}`.
pub fn content_stem(name: Option<&str>, time_stamp: &str) -> String {
    format!("{}__{time_stamp}", encode_valid_nime_name(name))
}

/// Name tag and timestamp recovered from a file stem.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStem {
    pub nime_name: Option<String>,
    /// Always valid; regenerated when the stem did not carry one.
    pub time_stamp: String,
}

/// Parse a stem written by [`content_stem`].
///
/// A stem without `__` is taken as a bare timestamp. Invalid timestamps are
/// replaced with the current time.
pub fn parse_stem(stem: &str) -> ParsedStem {
    let (nime_name, candidate) = match STEM_RE.captures(stem) {
        Some(caps) => (decode_valid_nime_name(&caps[1]), caps[2].to_string()),
        None => (None, stem.to_string()),
    };
    let time_stamp = if is_valid_timestamp(&candidate) {
        candidate
    } else {
        current_time_stamp()
    };
    ParsedStem {
        nime_name,
        time_stamp,
    }
}

/// Archive entry name of one frame inside a RAW zip.
pub fn zip_entry_name(time_stamp: &str, index: usize, enable: bool) -> String {
    let flag = if enable { 'e' } else { 'd' };
    format!("{time_stamp}_{index:03}_{flag}.png")
}

/// Enable flag encoded in a zip entry name. Unrecognized names count as enabled.
pub fn zip_entry_enable(entry_name: &str) -> bool {
    ENABLE_FLAG_RE
        .captures(entry_name)
        .is_none_or(|caps| &caps[1] != "d")
}
