//! Shared test utilities for the nime-capture test suite.
//!
//! Provides synthetic images (deterministic pixel patterns, no fixture files),
//! model builders, and an observer counter for notification tests.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let img = gradient_image(64, 48);
//! let mut model = image_model(img);
//! let raw_notifications = notify_counter(&mut model, ImageLayer::Raw);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{Rgb, RgbImage};

use crate::imaging::ImageValue;
use crate::model::{ImageLayer, ImageModel, VideoModel};

// =========================================================================
// Synthetic images
// =========================================================================

/// Diagonal RGB gradient: every pixel differs from its neighbours.
pub fn gradient_image(width: u32, height: u32) -> ImageValue {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        let b = ((x + y) * 255 / (width + height).max(1)) as u8;
        Rgb([r, g, b])
    });
    ImageValue::from_rgb(img)
}

/// Black/white checkerboard with `cell`-pixel squares.
pub fn checker_image(width: u32, height: u32, cell: u32) -> ImageValue {
    let cell = cell.max(1);
    let img = RgbImage::from_fn(width, height, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            Rgb([0, 0, 0])
        } else {
            Rgb([255, 255, 255])
        }
    });
    ImageValue::from_rgb(img)
}

/// Uniform gray image.
pub fn solid_image(width: u32, height: u32, level: u8) -> ImageValue {
    ImageValue::from_rgb(RgbImage::from_pixel(width, height, Rgb([level; 3])))
}

// =========================================================================
// Model builders
// =========================================================================

/// Enabled still model with a fixed timestamp.
pub fn image_model(img: ImageValue) -> ImageModel {
    ImageModel::with_raw(Some(img), None, Some(TEST_TIME_STAMP), true).unwrap()
}

/// Video model from `(image, enable)` pairs with a fixed timestamp.
pub fn video_model(frames: Vec<(ImageValue, bool)>, duration_in_msec: u32) -> VideoModel {
    let frames = frames
        .into_iter()
        .map(|(img, enable)| ImageModel::with_raw(Some(img), None, None, enable).unwrap())
        .collect();
    let mut video = VideoModel::new();
    video
        .edit(|s| {
            s.set_time_stamp(Some(TEST_TIME_STAMP))?;
            s.set_duration_in_msec(duration_in_msec);
            s.append_frames(frames)?;
            Ok(())
        })
        .unwrap();
    video
}

pub const TEST_TIME_STAMP: &str = "2024-05-01_12-00-00_123";

// =========================================================================
// Observers
// =========================================================================

/// Register a handler on `layer` that counts its invocations.
pub fn notify_counter(model: &mut ImageModel, layer: ImageLayer) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&count);
    model.register_notify_handler(layer, move || {
        handle.fetch_add(1, Ordering::SeqCst);
    });
    count
}
