//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.
//! Sizes are `(width, height)` tuples; every function returns positive sizes
//! for positive inputs.

/// Greatest common divisor (Euclid).
pub fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Reduce a ratio to lowest terms. Both components must be non-zero.
pub fn reduce_ratio(width: u32, height: u32) -> (u32, u32) {
    let d = gcd(width, height).max(1);
    (width / d, height / d)
}

fn round_div(numerator: u64, denominator: u64) -> u32 {
    ((numerator as f64 / denominator as f64).round() as u32).max(1)
}

/// Resolve a resize description against a source size.
///
/// The effective ratio is the explicit one if given, else `width:height` when
/// both dimensions are given, else the source ratio. Then:
///
/// | width | height | result |
/// |---|---|---|
/// | yes | yes | both as given |
/// | yes | no | height = round(width · r.h / r.w) |
/// | no | yes | width = round(height · r.w / r.h) |
/// | no | no | source size |
///
/// # Examples
/// ```
/// # use nime_capture::imaging::resolve_target_size;
/// // 16:9 at width 640 → 640x360
/// assert_eq!(resolve_target_size(Some((16, 9)), Some(640), None, (1000, 1000)), (640, 360));
///
/// // no ratio, height only → source ratio applies
/// assert_eq!(resolve_target_size(None, None, Some(300), (800, 600)), (400, 300));
/// ```
pub fn resolve_target_size(
    ratio: Option<(u32, u32)>,
    width: Option<u32>,
    height: Option<u32>,
    source: (u32, u32),
) -> (u32, u32) {
    let (src_w, src_h) = (source.0.max(1), source.1.max(1));
    let (ar_w, ar_h) = match (ratio, width, height) {
        (Some(r), _, _) => r,
        (None, Some(w), Some(h)) => reduce_ratio(w.max(1), h.max(1)),
        _ => reduce_ratio(src_w, src_h),
    };

    match (width, height) {
        (Some(w), Some(h)) => (w.max(1), h.max(1)),
        (Some(w), None) => (w.max(1), round_div(w as u64 * ar_h as u64, ar_w as u64)),
        (None, Some(h)) => (round_div(h as u64 * ar_w as u64, ar_h as u64), h.max(1)),
        (None, None) => (src_w, src_h),
    }
}

/// Pre-crop size for a cover resize: aspect preserved, target box fully covered.
///
/// The axis with the larger scale factor matches the target exactly; the
/// other is floored and is never smaller than the target.
pub fn cover_scaled_size(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = (source.0.max(1) as u64, source.1.max(1) as u64);
    let (tgt_w, tgt_h) = (target.0 as u64, target.1 as u64);

    // tgt_w / src_w > tgt_h / src_h, compared without floats
    if tgt_w * src_h > tgt_h * src_w {
        (tgt_w as u32, ((src_h * tgt_w / src_w) as u32).max(target.1))
    } else {
        (((src_w * tgt_h / src_h) as u32).max(target.0), tgt_h as u32)
    }
}

/// Top-left corner of a centered `target`-sized crop inside `scaled`.
pub fn center_crop_origin(scaled: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    (
        scaled.0.saturating_sub(target.0) / 2,
        scaled.1.saturating_sub(target.1) / 2,
    )
}

/// Output size for a contain resize: fits inside the box, never upscales.
pub fn contain_size(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = (source.0.max(1) as f64, source.1.max(1) as f64);
    let (tgt_w, tgt_h) = (target.0 as f64, target.1 as f64);
    let width_scale = tgt_w / src_w;
    let height_scale = tgt_h / src_h;

    if width_scale.min(height_scale) > 1.0 {
        (source.0, source.1)
    } else if width_scale < height_scale {
        (target.0, ((src_h * tgt_w / src_w + 0.5) as u32).max(1))
    } else {
        (((src_w * tgt_h / src_h + 0.5) as u32).max(1), target.1)
    }
}

/// Largest even size not exceeding `size` (H.264 needs even dimensions).
pub fn even_size(size: (u32, u32)) -> (u32, u32) {
    ((size.0 - size.0 % 2).max(2), (size.1 - size.1 % 2).max(2))
}

/// Fit `size` inside a square of `edge` (for analysis downscales).
pub fn fit_within_edge(size: (u32, u32), edge: u32) -> (u32, u32) {
    contain_size(size, (edge, edge))
}
