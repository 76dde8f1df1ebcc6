//! View models for captured content.
//!
//! | Type | Holds |
//! |---|---|
//! | [`ImageModel`] | one RAW image and its cached NIME / PREVIEW / THUMBNAIL renditions |
//! | [`VideoModel`] | an ordered list of frame models plus a global model for shared settings |
//!
//! Each model owns a [`DependencyGraph`](crate::cache_graph::DependencyGraph)
//! over [`ImageLayer`]s:
//!
//! ```text
//! RAW ──cover──▶ NIME ──contain──▶ PREVIEW
//!                  └───cover────▶ THUMBNAIL (enabled) ──▶ THUMBNAIL (disabled)
//! ```
//!
//! All mutation goes through an edit session (`model.edit(|s| ...)`). When the
//! closure returns `Ok`, observers registered per layer are notified once, in
//! topological order.

mod duration;
mod image_model;
mod video_model;

pub use duration::{DurationEntry, DurationMap, FILM_FRAME_RATE, GIF_DURATION_MAP};
pub use image_model::{ImageEditSession, ImageModel, NotifyHandler};
pub use video_model::{DurationHandler, VideoEditSession, VideoModel, plan_duplicate_frames};

use crate::imaging::ResizeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("the RAW layer cannot be resized")]
    RawNotResizable,
    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),
    #[error("frame index {index} out of range (frames: {len})")]
    FrameIndex { index: usize, len: usize },
    #[error("resize error: {0}")]
    Resize(#[from] ResizeError),
}

/// Rendition layers of a content model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageLayer {
    /// Captured source image, never resized.
    Raw,
    /// Export rendition (cover-resized).
    Nime,
    /// On-screen preview (contain-resized).
    Preview,
    /// List thumbnail (cover-resized, dimmed when disabled).
    Thumbnail,
}

impl ImageLayer {
    pub const ALL: [Self; 4] = [Self::Raw, Self::Nime, Self::Preview, Self::Thumbnail];

    /// Layers directly derived from this one.
    pub fn downstream(self) -> &'static [ImageLayer] {
        DOWNSTREAM
            .iter()
            .find(|(layer, _)| *layer == self)
            .map(|(_, next)| *next)
            .unwrap_or(&[])
    }
}

/// Static adjacency of the layer graph.
pub const DOWNSTREAM: &[(ImageLayer, &[ImageLayer])] = &[
    (ImageLayer::Raw, &[ImageLayer::Nime]),
    (ImageLayer::Nime, &[ImageLayer::Preview, ImageLayer::Thumbnail]),
];

/// Order in which notifications are delivered.
pub const TOPOLOGICAL_ORDER: [ImageLayer; 4] = ImageLayer::ALL;

/// Expand a set of directly changed layers to everything they affect,
/// in notification order.
pub(crate) fn affected_layers(changed: &[ImageLayer]) -> Vec<ImageLayer> {
    let mut fired: Vec<ImageLayer> = Vec::new();
    for layer in TOPOLOGICAL_ORDER {
        let upstream_fired = fired.iter().any(|f| f.downstream().contains(&layer));
        if upstream_fired || changed.contains(&layer) {
            fired.push(layer);
        }
    }
    fired
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_change_affects_everything() {
        assert_eq!(affected_layers(&[ImageLayer::Raw]), ImageLayer::ALL.to_vec());
    }

    #[test]
    fn preview_change_is_local() {
        assert_eq!(
            affected_layers(&[ImageLayer::Preview]),
            vec![ImageLayer::Preview]
        );
    }

    #[test]
    fn nime_change_skips_raw() {
        assert_eq!(
            affected_layers(&[ImageLayer::Thumbnail, ImageLayer::Nime]),
            vec![ImageLayer::Nime, ImageLayer::Preview, ImageLayer::Thumbnail]
        );
    }

    #[test]
    fn leaves_have_no_downstream() {
        assert!(ImageLayer::Preview.downstream().is_empty());
        assert!(ImageLayer::Thumbnail.downstream().is_empty());
    }
}
