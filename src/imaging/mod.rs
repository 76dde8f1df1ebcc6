//! Image processing: values, sizing, pixel operations and codecs.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Resize (cover / contain)** | Lanczos3 via `DynamicImage::resize_exact` + `crop_imm` |
//! | **Disabled overlay** | per-pixel dim + badge band on `RgbImage` |
//! | **Name overlay** | `fontdue` glyph coverage over a blurred backdrop |
//! | **Similarity** | mean SSIM over summed-area tables |
//! | **Codecs** | `image` crate behind [`ImageBackend`] |
//! | **Comments** | JPEG `COM` / GIF comment extension, hand-walked |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: High-level functions combining calculations + pixels

pub mod backend;
mod calculations;
pub mod comment;
mod image_value;
pub mod operations;
pub mod overlay;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, DecodedAnimation, ImageBackend};
pub use calculations::{
    center_crop_origin, contain_size, cover_scaled_size, even_size, fit_within_edge,
    resolve_target_size,
};
pub use image_value::ImageValue;
pub use operations::{
    analysis_image, crop_top_left, make_disabled_image, resize, resize_contain, resize_cover,
    ssim,
};
pub use overlay::{install_overlay_font, overlay_nime_name};
pub use params::{
    AspectRatio, AspectRatioPattern, PlaybackMode, Quality, ResizeError, ResizeMode, ResizeSpec,
    ResolutionPattern,
};
pub use rust_backend::RustBackend;
