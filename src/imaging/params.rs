//! Parameter types for image operations.
//!
//! These types describe *what* to do, not *how* to do it. The pure math lives
//! in [`calculations`](super::calculations) and the pixel work in
//! [`operations`](super::operations).
//!
//! ## Types
//!
//! - [`AspectRatio`]: gcd-reduced ratio, or `RAW` for "use the source ratio".
//! - [`AspectRatioPattern`] / [`ResolutionPattern`]: the preset menus the
//!   export UI offers. Their string values are also the metadata wire values.
//! - [`ResizeSpec`]: (ratio, width, height) triple resolved against a source size.
//! - [`ResizeMode`]: cover (fill + crop) or contain (fit, never upscale).
//! - [`Quality`]: lossy encoding quality (1..=100, default 92). Clamped on construction.
//! - [`PlaybackMode`]: frame order applied when exporting an animation.

use super::calculations::{reduce_ratio, resolve_target_size};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResizeError {
    #[error("aspect ratio {0} needs a width or a height")]
    Underspecified(AspectRatio),
    #[error("resize dimensions must be positive")]
    ZeroDimension,
    #[error("unknown {kind} pattern: {value}")]
    UnknownPattern { kind: &'static str, value: String },
}

/// Aspect ratio stored in lowest terms. `RAW` means "no explicit ratio".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AspectRatio {
    size: Option<(u32, u32)>,
}

impl AspectRatio {
    pub const RAW: Self = Self { size: None };

    /// Build a reduced ratio. A zero component yields `RAW`.
    pub fn new(width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            return Self::RAW;
        }
        Self {
            size: Some(reduce_ratio(width, height)),
        }
    }

    pub fn size(self) -> Option<(u32, u32)> {
        self.size
    }

    pub fn is_raw(self) -> bool {
        self.size.is_none()
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            Some((w, h)) => write!(f, "{w}:{h}"),
            None => f.write_str("RAW"),
        }
    }
}

/// Preset aspect ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AspectRatioPattern {
    Raw,
    Wide16x9,
    Standard4x3,
    Square,
}

impl AspectRatioPattern {
    pub const ALL: [Self; 4] = [Self::Raw, Self::Wide16x9, Self::Standard4x3, Self::Square];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::Wide16x9 => "16:9",
            Self::Standard4x3 => "4:3",
            Self::Square => "1:1",
        }
    }

    pub fn ratio(self) -> AspectRatio {
        match self {
            Self::Raw => AspectRatio::RAW,
            Self::Wide16x9 => AspectRatio::new(16, 9),
            Self::Standard4x3 => AspectRatio::new(4, 3),
            Self::Square => AspectRatio::new(1, 1),
        }
    }
}

impl FromStr for AspectRatioPattern {
    type Err = ResizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ResizeError::UnknownPattern {
                kind: "aspect ratio",
                value: s.to_string(),
            })
    }
}

/// Preset export widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionPattern {
    /// Chat emoji size.
    W128,
    /// Chat sticker size.
    W320,
    W480,
    W640,
    W960,
    W1280,
    W1920,
    W2880,
    W3840,
    /// Long-edge limit of common still-image hosts.
    W4096,
    Raw,
}

impl ResolutionPattern {
    pub const ALL: [Self; 11] = [
        Self::W128,
        Self::W320,
        Self::W480,
        Self::W640,
        Self::W960,
        Self::W1280,
        Self::W1920,
        Self::W2880,
        Self::W3840,
        Self::W4096,
        Self::Raw,
    ];

    pub fn width(self) -> Option<u32> {
        match self {
            Self::W128 => Some(128),
            Self::W320 => Some(320),
            Self::W480 => Some(480),
            Self::W640 => Some(640),
            Self::W960 => Some(960),
            Self::W1280 => Some(1280),
            Self::W1920 => Some(1920),
            Self::W2880 => Some(2880),
            Self::W3840 => Some(3840),
            Self::W4096 => Some(4096),
            Self::Raw => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::W128 => "128",
            Self::W320 => "320",
            Self::W480 => "480",
            Self::W640 => "640",
            Self::W960 => "960",
            Self::W1280 => "1280",
            Self::W1920 => "1920",
            Self::W2880 => "2880",
            Self::W3840 => "3840",
            Self::W4096 => "4096",
            Self::Raw => "RAW",
        }
    }
}

impl FromStr for ResolutionPattern {
    type Err = ResizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ResizeError::UnknownPattern {
                kind: "resolution",
                value: s.to_string(),
            })
    }
}

/// Target size description: an aspect-ratio policy plus optional dimensions.
///
/// Valid shapes are (ratio + one dimension), (both dimensions, ratio used only
/// as a label), (one dimension, no ratio: source ratio applies) and
/// (nothing: passthrough). A ratio without any dimension is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResizeSpec {
    ratio: AspectRatio,
    width: Option<u32>,
    height: Option<u32>,
}

impl ResizeSpec {
    pub fn new(
        ratio: AspectRatio,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<Self, ResizeError> {
        if width == Some(0) || height == Some(0) {
            return Err(ResizeError::ZeroDimension);
        }
        if !ratio.is_raw() && width.is_none() && height.is_none() {
            return Err(ResizeError::Underspecified(ratio));
        }
        Ok(Self {
            ratio,
            width,
            height,
        })
    }

    /// Passthrough: resolves to the source size.
    pub const fn raw() -> Self {
        Self {
            ratio: AspectRatio::RAW,
            width: None,
            height: None,
        }
    }

    /// Explicit box, ratio ignored.
    pub fn exact(width: u32, height: u32) -> Result<Self, ResizeError> {
        Self::new(AspectRatio::RAW, Some(width), Some(height))
    }

    pub fn from_patterns(
        aspect: AspectRatioPattern,
        resolution: ResolutionPattern,
    ) -> Result<Self, ResizeError> {
        Self::new(aspect.ratio(), resolution.width(), None)
    }

    pub fn ratio(&self) -> AspectRatio {
        self.ratio
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    /// Concrete positive target size for a source of the given size.
    pub fn resolve(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        resolve_target_size(
            self.ratio.size(),
            self.width,
            self.height,
            (source_width, source_height),
        )
    }
}

impl Default for ResizeSpec {
    fn default() -> Self {
        Self::raw()
    }
}

/// How a resolved box is applied to an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    /// Fit entirely inside the box; never upscale.
    Contain,
    /// Fill the box exactly; overflow is center-cropped.
    Cover,
}

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(92)
    }
}

/// Frame order of an exported animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackMode {
    #[default]
    Forward,
    Backward,
    /// Forward then backward, without repeating the end frames.
    Reflect,
}

impl PlaybackMode {
    pub const ALL: [Self; 3] = [Self::Forward, Self::Backward, Self::Reflect];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "FORWARD",
            Self::Backward => "BACKWARD",
            Self::Reflect => "REFLECT",
        }
    }

    /// Reorder frames for export.
    pub fn apply<T: Clone>(self, mut frames: Vec<T>) -> Vec<T> {
        match self {
            Self::Forward => frames,
            Self::Backward => {
                frames.reverse();
                frames
            }
            Self::Reflect => {
                if frames.len() >= 3 {
                    let back: Vec<T> = frames[1..frames.len() - 1].iter().rev().cloned().collect();
                    frames.extend(back);
                }
                frames
            }
        }
    }
}

impl FromStr for PlaybackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown playback mode: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_92() {
        assert_eq!(Quality::default().value(), 92);
    }

    #[test]
    fn aspect_ratio_is_reduced() {
        assert_eq!(AspectRatio::new(1920, 1080).size(), Some((16, 9)));
        assert_eq!(AspectRatio::new(1920, 1080), AspectRatio::new(16, 9));
        assert_eq!(AspectRatio::new(1920, 1080).to_string(), "16:9");
    }

    #[test]
    fn aspect_ratio_zero_is_raw() {
        assert!(AspectRatio::new(0, 9).is_raw());
        assert_eq!(AspectRatio::RAW.to_string(), "RAW");
    }

    #[test]
    fn patterns_parse_their_own_strings() {
        for p in AspectRatioPattern::ALL {
            assert_eq!(p.as_str().parse::<AspectRatioPattern>().unwrap(), p);
        }
        for p in ResolutionPattern::ALL {
            assert_eq!(p.as_str().parse::<ResolutionPattern>().unwrap(), p);
        }
        assert!("5:4".parse::<AspectRatioPattern>().is_err());
    }

    #[test]
    fn spec_rejects_ratio_without_dimensions() {
        let err = ResizeSpec::new(AspectRatio::new(16, 9), None, None).unwrap_err();
        assert!(matches!(err, ResizeError::Underspecified(_)));
        assert!(
            ResizeSpec::from_patterns(AspectRatioPattern::Square, ResolutionPattern::Raw).is_err()
        );
    }

    #[test]
    fn spec_rejects_zero_dimension() {
        assert_eq!(
            ResizeSpec::exact(0, 10).unwrap_err(),
            ResizeError::ZeroDimension
        );
    }

    #[test]
    fn raw_patterns_are_passthrough() {
        let spec =
            ResizeSpec::from_patterns(AspectRatioPattern::Raw, ResolutionPattern::Raw).unwrap();
        assert_eq!(spec, ResizeSpec::raw());
        assert_eq!(spec.resolve(123, 45), (123, 45));
    }

    #[test]
    fn spec_equality_is_structural() {
        let a = ResizeSpec::new(AspectRatio::new(32, 18), Some(640), None).unwrap();
        let b = ResizeSpec::from_patterns(AspectRatioPattern::Wide16x9, ResolutionPattern::W640)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn playback_backward_reverses() {
        assert_eq!(PlaybackMode::Backward.apply(vec![1, 2, 3]), vec![3, 2, 1]);
    }

    #[test]
    fn playback_reflect_skips_end_frames() {
        assert_eq!(
            PlaybackMode::Reflect.apply(vec![1, 2, 3, 4]),
            vec![1, 2, 3, 4, 3, 2]
        );
        assert_eq!(PlaybackMode::Reflect.apply(vec![1, 2]), vec![1, 2]);
    }
}
