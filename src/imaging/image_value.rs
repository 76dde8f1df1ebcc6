//! Shared, immutable decoded image with identity equality.
//!
//! Two [`ImageValue`]s compare equal only when they are clones of the same
//! allocation. Pixel-identical images decoded or captured separately are
//! different values. The cache graph relies on this to treat every fresh
//! capture as new content, even when the screen did not change.

use image::{ColorType, DynamicImage, GrayImage, RgbImage};
use std::fmt;
use std::sync::{Arc, OnceLock};

struct Inner {
    image: DynamicImage,
    rgb: OnceLock<RgbImage>,
    luma: OnceLock<GrayImage>,
}

#[derive(Clone)]
pub struct ImageValue {
    inner: Arc<Inner>,
}

impl ImageValue {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            inner: Arc::new(Inner {
                image,
                rgb: OnceLock::new(),
                luma: OnceLock::new(),
            }),
        }
    }

    pub fn from_rgb(image: RgbImage) -> Self {
        Self::new(DynamicImage::ImageRgb8(image))
    }

    /// Black RGB image, used as a placeholder.
    pub fn empty(width: u32, height: u32) -> Self {
        Self::from_rgb(RgbImage::new(width.max(1), height.max(1)))
    }

    pub fn width(&self) -> u32 {
        self.inner.image.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn color(&self) -> ColorType {
        self.inner.image.color()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.inner.image
    }

    /// RGB8 view, converted once and shared by all clones.
    pub fn rgb8(&self) -> &RgbImage {
        self.inner.rgb.get_or_init(|| match &self.inner.image {
            DynamicImage::ImageRgb8(rgb) => rgb.clone(),
            other => other.to_rgb8(),
        })
    }

    /// Grayscale view, converted once and shared by all clones.
    pub fn luma8(&self) -> &GrayImage {
        self.inner.luma.get_or_init(|| self.inner.image.to_luma8())
    }

    /// True when `other` wraps the same allocation.
    pub fn same_as(&self, other: &ImageValue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for ImageValue {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for ImageValue {}

impl fmt::Debug for ImageValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageValue")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("color", &self.color())
            .field("ptr", &Arc::as_ptr(&self.inner))
            .finish()
    }
}
