//! High-level image operations.
//!
//! These functions combine the pure size math from
//! [`calculations`](super::calculations) with pixel work from the `image`
//! crate. Every operation takes an [`ImageValue`] and returns a new one; inputs
//! are never modified.

use super::calculations::{center_crop_origin, contain_size, cover_scaled_size, fit_within_edge};
use super::image_value::ImageValue;
use super::params::{ResizeMode, ResizeSpec};
use image::imageops::FilterType;
use image::{GrayImage, Rgb};

const FILTER: FilterType = FilterType::Lanczos3;

/// Resize according to `mode`.
pub fn resize(image: &ImageValue, spec: &ResizeSpec, mode: ResizeMode) -> ImageValue {
    match mode {
        ResizeMode::Contain => resize_contain(image, spec),
        ResizeMode::Cover => resize_cover(image, spec),
    }
}

/// Scale so the resolved box is fully covered, then center-crop to it.
///
/// The output always has exactly the resolved size.
pub fn resize_cover(image: &ImageValue, spec: &ResizeSpec) -> ImageValue {
    let source = image.dimensions();
    let target = spec.resolve(source.0, source.1);
    let scaled_size = cover_scaled_size(source, target);

    let scaled = if scaled_size == source {
        image.image().clone()
    } else {
        image
            .image()
            .resize_exact(scaled_size.0, scaled_size.1, FILTER)
    };

    if scaled_size == target {
        return ImageValue::new(scaled);
    }
    let (x, y) = center_crop_origin(scaled_size, target);
    ImageValue::new(scaled.crop_imm(x, y, target.0, target.1))
}

/// Scale down (never up) so the image fits inside the resolved box.
pub fn resize_contain(image: &ImageValue, spec: &ResizeSpec) -> ImageValue {
    let source = image.dimensions();
    let target = spec.resolve(source.0, source.1);
    let size = contain_size(source, target);

    if size == source {
        return ImageValue::new(image.image().clone());
    }
    ImageValue::new(image.image().resize_exact(size.0, size.1, FILTER))
}

/// Downscale for analysis so the longer edge is at most `edge`.
pub fn analysis_image(image: &ImageValue, edge: u32) -> ImageValue {
    let source = image.dimensions();
    let size = fit_within_edge(source, edge);
    if size == source {
        return image.clone();
    }
    ImageValue::new(image.image().resize_exact(size.0, size.1, FilterType::Triangle))
}

/// Crop the top-left `width` x `height` region.
pub fn crop_top_left(image: &ImageValue, width: u32, height: u32) -> ImageValue {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    ImageValue::new(image.image().crop_imm(0, 0, width, height))
}

/// Brightness factor applied to disabled thumbnails.
const DISABLED_BRIGHTNESS: f32 = 0.35;
/// Alpha of the black veil blended over disabled thumbnails.
const DISABLED_VEIL_ALPHA: f32 = 120.0 / 255.0;
const BADGE_GRAY: f32 = 200.0;

/// Dimmed copy with a horizontal badge band, marking a frame as disabled.
pub fn make_disabled_image(image: &ImageValue) -> ImageValue {
    let mut rgb = image.rgb8().clone();
    let (width, height) = rgb.dimensions();
    let band = (height / 6).max(1);
    let band_top = (height - band) / 2;
    let dim = DISABLED_BRIGHTNESS * (1.0 - DISABLED_VEIL_ALPHA);

    for (x, y, pixel) in rgb.enumerate_pixels_mut() {
        let in_band = y >= band_top && y < band_top + band && x >= width / 8 && x < width - width / 8;
        let Rgb(channels) = *pixel;
        *pixel = Rgb(channels.map(|c| {
            let dimmed = c as f32 * dim;
            let v = if in_band {
                dimmed * 0.5 + BADGE_GRAY * 0.5
            } else {
                dimmed
            };
            v.round().clamp(0.0, 255.0) as u8
        }));
    }
    ImageValue::from_rgb(rgb)
}

// =============================================================================
// Structural similarity
// =============================================================================

const SSIM_WINDOW: u32 = 7;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;
const SSIM_RANGE: f64 = 255.0;

/// Mean structural similarity of two images.
///
/// Images of different sizes are first cover-resized to the common minimum
/// size, then compared as grayscale. Identical content scores 1.0.
pub fn ssim(a: &ImageValue, b: &ImageValue) -> f64 {
    if a.dimensions() == b.dimensions() {
        return ssim_gray(a.luma8(), b.luma8());
    }
    let width = a.width().min(b.width());
    let height = a.height().min(b.height());
    let Ok(spec) = ResizeSpec::exact(width, height) else {
        return 0.0;
    };
    let a = resize_cover(a, &spec);
    let b = resize_cover(b, &spec);
    ssim_gray(a.luma8(), b.luma8())
}

/// Summed-area table with a zero row/column prefix.
struct Integral {
    stride: usize,
    sums: Vec<f64>,
}

impl Integral {
    fn build(width: u32, height: u32, value: impl Fn(u32, u32) -> f64) -> Self {
        let stride = width as usize + 1;
        let mut sums = vec![0.0; stride * (height as usize + 1)];
        for y in 0..height {
            let mut row = 0.0;
            for x in 0..width {
                row += value(x, y);
                let idx = (y as usize + 1) * stride + x as usize + 1;
                sums[idx] = sums[idx - stride] + row;
            }
        }
        Self { stride, sums }
    }

    fn window(&self, x: u32, y: u32, size: u32) -> f64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + size as usize, y0 + size as usize);
        self.sums[y1 * self.stride + x1] - self.sums[y0 * self.stride + x1]
            - self.sums[y1 * self.stride + x0]
            + self.sums[y0 * self.stride + x0]
    }
}

/// SSIM of two equally sized grayscale images.
///
/// Uniform square window (7 px, shrunk to fit tiny images), sample
/// covariance, averaged over every position where the window fits.
pub fn ssim_gray(a: &GrayImage, b: &GrayImage) -> f64 {
    let (width, height) = a.dimensions();
    if (width, height) != b.dimensions() || width == 0 || height == 0 {
        return 0.0;
    }

    let mut win = SSIM_WINDOW.min(width).min(height);
    if win % 2 == 0 {
        win -= 1;
    }
    let n = (win * win) as f64;
    let cov_norm = if n > 1.0 { n / (n - 1.0) } else { 1.0 };
    let c1 = (SSIM_K1 * SSIM_RANGE).powi(2);
    let c2 = (SSIM_K2 * SSIM_RANGE).powi(2);

    let pa = |x: u32, y: u32| a.get_pixel(x, y).0[0] as f64;
    let pb = |x: u32, y: u32| b.get_pixel(x, y).0[0] as f64;
    let sum_a = Integral::build(width, height, pa);
    let sum_b = Integral::build(width, height, pb);
    let sum_aa = Integral::build(width, height, |x, y| pa(x, y) * pa(x, y));
    let sum_bb = Integral::build(width, height, |x, y| pb(x, y) * pb(x, y));
    let sum_ab = Integral::build(width, height, |x, y| pa(x, y) * pb(x, y));

    let mut total = 0.0;
    let mut count = 0usize;
    for y in 0..=(height - win) {
        for x in 0..=(width - win) {
            let ux = sum_a.window(x, y, win) / n;
            let uy = sum_b.window(x, y, win) / n;
            let vx = cov_norm * (sum_aa.window(x, y, win) / n - ux * ux);
            let vy = cov_norm * (sum_bb.window(x, y, win) / n - uy * uy);
            let vxy = cov_norm * (sum_ab.window(x, y, win) / n - ux * uy);
            let numerator = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += numerator / denominator;
            count += 1;
        }
    }
    total / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::params::{AspectRatio, AspectRatioPattern, ResolutionPattern};
    use crate::test_helpers::{checker_image, gradient_image};

    // =========================================================================
    // resize tests
    // =========================================================================

    #[test]
    fn cover_output_has_exact_target_size() {
        let img = gradient_image(1920, 1080);
        for (aspect, resolution) in [
            (AspectRatioPattern::Square, ResolutionPattern::W320),
            (AspectRatioPattern::Standard4x3, ResolutionPattern::W640),
            (AspectRatioPattern::Wide16x9, ResolutionPattern::W128),
        ] {
            let spec = ResizeSpec::from_patterns(aspect, resolution).unwrap();
            let out = resize_cover(&img, &spec);
            assert_eq!(out.dimensions(), spec.resolve(1920, 1080));
        }
    }

    #[test]
    fn cover_odd_target_is_exact() {
        let img = gradient_image(100, 60);
        let spec = ResizeSpec::exact(33, 17).unwrap();
        assert_eq!(resize_cover(&img, &spec).dimensions(), (33, 17));
    }

    #[test]
    fn cover_upscales_to_fill() {
        let img = gradient_image(40, 20);
        let spec = ResizeSpec::exact(80, 80).unwrap();
        assert_eq!(resize_cover(&img, &spec).dimensions(), (80, 80));
    }

    #[test]
    fn contain_fits_and_keeps_aspect() {
        let img = gradient_image(1920, 1080);
        let spec = ResizeSpec::exact(640, 640).unwrap();
        let out = resize_contain(&img, &spec);
        assert_eq!(out.dimensions(), (640, 360));
    }

    #[test]
    fn contain_never_upscales() {
        let img = gradient_image(100, 50);
        let spec = ResizeSpec::new(AspectRatio::RAW, Some(1000), None).unwrap();
        let out = resize_contain(&img, &spec);
        assert_eq!(out.dimensions(), (100, 50));
        assert_ne!(out, img, "contain returns a new value even when unchanged");
    }

    #[test]
    fn raw_spec_cover_is_same_size_copy() {
        let img = gradient_image(64, 48);
        let out = resize_cover(&img, &ResizeSpec::raw());
        assert_eq!(out.dimensions(), (64, 48));
        assert_ne!(out, img);
    }

    #[test]
    fn analysis_image_limits_edge() {
        let img = gradient_image(1000, 500);
        assert_eq!(analysis_image(&img, 100).dimensions(), (100, 50));
        let small = gradient_image(10, 10);
        assert_eq!(analysis_image(&small, 100), small);
    }

    // =========================================================================
    // disabled overlay tests
    // =========================================================================

    #[test]
    fn disabled_image_is_darker_and_same_size() {
        let img = ImageValue::from_rgb(image::RgbImage::from_pixel(40, 30, Rgb([255, 255, 255])));
        let out = make_disabled_image(&img);
        assert_eq!(out.dimensions(), (40, 30));
        // Corner pixel is outside the badge band
        let corner = out.rgb8().get_pixel(0, 0).0[0];
        assert!(corner < 100, "corner stayed bright: {corner}");
    }

    #[test]
    fn disabled_image_is_pure() {
        let img = gradient_image(20, 20);
        let a = make_disabled_image(&img);
        let b = make_disabled_image(&img);
        assert_eq!(a.rgb8(), b.rgb8());
    }

    // =========================================================================
    // ssim tests
    // =========================================================================

    #[test]
    fn ssim_identical_is_one() {
        let img = gradient_image(32, 32);
        let copy = ImageValue::from_rgb(img.rgb8().clone());
        assert!((ssim(&img, &copy) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ssim_different_content_is_low() {
        let a = gradient_image(32, 32);
        let b = checker_image(32, 32, 4);
        assert!(ssim(&a, &b) < 0.5);
    }

    #[test]
    fn ssim_handles_size_mismatch() {
        let a = gradient_image(64, 32);
        let b = gradient_image(32, 32);
        let score = ssim(&a, &b);
        assert!(score.is_finite());
    }

    #[test]
    fn ssim_tiny_images() {
        let a = ImageValue::empty(2, 2);
        let b = ImageValue::empty(2, 2);
        assert!((ssim(&a, &b) - 1.0).abs() < 1e-9);
    }
}
