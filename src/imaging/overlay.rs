//! Name tag drawn over the bottom-left corner of NIME renditions.
//!
//! The text sits on a locally blurred, slightly darkened backdrop with a soft
//! drop shadow, so it stays legible on any content. Glyphs come from the font
//! installed with [`install_overlay_font`]; without one only the backdrop is
//! drawn, sized from an estimated text width.
//!
//! Font size is `height / 24`. Images too small for a 10 px font are returned
//! untouched. Names wider than the image lose characters from their middle
//! (the tail often carries an episode number), replaced by `…`.

use std::path::Path;
use std::sync::OnceLock;

use fontdue::layout::{CoordinateSystem, Layout, LayoutSettings, TextStyle};
use fontdue::{Font, FontSettings};
use image::{GrayImage, Luma, Rgb, RgbImage, imageops};

use super::{BackendError, ImageValue};
use crate::naming::NIME_PREFIX;

static OVERLAY_FONT: OnceLock<Font> = OnceLock::new();

const FONT_SCALE_DEN: u32 = 24;
const MIN_FONT_SIZE: u32 = 10;
const ELLIPSIS: char = '…';

/// Width of one character, relative to the font size, when no font is installed.
const ESTIMATED_ADVANCE: f32 = 0.6;
const ESTIMATED_LINE_HEIGHT: f32 = 1.2;

const MARGIN_PCT: f32 = 1.0;
const MASK_RADIUS_PCT: f32 = 0.08;
const BLUR_RADIUS_PCT: f32 = 0.10;
const MASK_GAMMA: f32 = 1.8;
/// Brightness kept under the fully masked backdrop.
const BACKDROP_DARKEN: f32 = 0.8;
const SHADOW_OFFSET_PCT: f32 = 0.06;
const SHADOW_DEPTH: f32 = 0.3;

/// Load the overlay font once per process. Returns `false` when a font was
/// already installed.
pub fn install_overlay_font(path: &Path) -> Result<bool, BackendError> {
    if OVERLAY_FONT.get().is_some() {
        return Ok(false);
    }
    let bytes = std::fs::read(path)?;
    let font = Font::from_bytes(bytes, FontSettings::default())
        .map_err(|e| BackendError::Unsupported(format!("font {}: {e}", path.display())))?;
    log::info!("Overlay font loaded from {}", path.display());
    Ok(OVERLAY_FONT.set(font).is_ok())
}

/// Draw `nime_name` (with or without its `<NIME>` prefix) over `image`.
pub fn overlay_nime_name(image: &ImageValue, nime_name: &str) -> ImageValue {
    overlay_with_font(image, nime_name, OVERLAY_FONT.get())
}

struct PlacedGlyph {
    x: i32,
    y: i32,
    width: usize,
    height: usize,
    coverage: Vec<u8>,
}

struct TextLayout {
    width: u32,
    height: u32,
    glyphs: Vec<PlacedGlyph>,
}

fn layout_text(font: Option<&Font>, text: &str, size: f32) -> TextLayout {
    let Some(font) = font else {
        let chars = text.chars().count() as f32;
        return TextLayout {
            width: (chars * size * ESTIMATED_ADVANCE).ceil() as u32,
            height: (size * ESTIMATED_LINE_HEIGHT).ceil() as u32,
            glyphs: Vec::new(),
        };
    };

    let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
    layout.reset(&LayoutSettings::default());
    layout.append(&[font], &TextStyle::new(text, size, 0));

    let mut width = 0.0f32;
    let mut glyphs = Vec::new();
    for glyph in layout.glyphs() {
        width = width.max(glyph.x + glyph.width as f32);
        if glyph.width == 0 || glyph.height == 0 {
            continue;
        }
        let (_, coverage) = font.rasterize_config(glyph.key);
        glyphs.push(PlacedGlyph {
            x: glyph.x.round() as i32,
            y: glyph.y.round() as i32,
            width: glyph.width,
            height: glyph.height,
            coverage,
        });
    }
    TextLayout {
        width: width.ceil() as u32,
        height: layout.height().ceil() as u32,
        glyphs,
    }
}

/// Lay out `name`, dropping characters from its middle until it fits `max_width`.
fn fit_text(font: Option<&Font>, name: &str, size: f32, max_width: u32) -> TextLayout {
    let chars: Vec<char> = name.chars().collect();
    let (head, tail) = chars.split_at(chars.len() / 2);
    let (mut head, mut tail) = (head.to_vec(), tail.to_vec());

    let mut layout = layout_text(font, name, size);
    while layout.width > max_width && !(head.is_empty() && tail.is_empty()) {
        head.pop();
        if !tail.is_empty() {
            tail.remove(0);
        }
        let text: String = head
            .iter()
            .chain(std::iter::once(&ELLIPSIS))
            .chain(tail.iter())
            .collect();
        layout = layout_text(font, &text, size);
    }
    layout
}

fn overlay_with_font(image: &ImageValue, nime_name: &str, font: Option<&Font>) -> ImageValue {
    let name = nime_name.strip_prefix(NIME_PREFIX).unwrap_or(nime_name);
    let (width, height) = image.dimensions();
    let font_px = height / FONT_SCALE_DEN;
    if name.is_empty() || font_px < MIN_FONT_SIZE {
        return image.clone();
    }
    let size = font_px as f32;
    let margin = (MARGIN_PCT * size).round() as u32;

    let text = fit_text(font, name, size, width.saturating_sub(margin));
    let text_w = text.width.min(width);
    let text_h = text.height.min(height);
    let text_top = height - text_h;

    let edit_top = text_top.saturating_sub(margin);
    let edit_w = (text_w + margin).min(width);
    let edit_h = height - edit_top;
    if edit_w == 0 || edit_h == 0 {
        return image.clone();
    }

    let mut rgb = image.rgb8().clone();
    draw_backdrop(&mut rgb, edit_top, edit_w, edit_h, text_top - edit_top, text_w, size);

    let shadow = (SHADOW_OFFSET_PCT * size).max(1.0).round() as i32;
    for glyph in &text.glyphs {
        let (x, y) = (glyph.x, text_top as i32 + glyph.y);
        blend_glyph(&mut rgb, glyph, x + shadow, y + shadow, |c, a| c * (1.0 - SHADOW_DEPTH * a));
    }
    for glyph in &text.glyphs {
        let (x, y) = (glyph.x, text_top as i32 + glyph.y);
        blend_glyph(&mut rgb, glyph, x, y, |c, a| c * (1.0 - a) + 255.0 * a);
    }
    ImageValue::from_rgb(rgb)
}

/// Blur and darken the box `(0, top, width, height)` under a soft mask
/// covering the text rows from `text_offset` down.
fn draw_backdrop(
    rgb: &mut RgbImage,
    top: u32,
    width: u32,
    height: u32,
    text_offset: u32,
    text_w: u32,
    size: f32,
) {
    let mut mask = GrayImage::new(width, height);
    for (x, y, pixel) in mask.enumerate_pixels_mut() {
        if x < text_w && y >= text_offset {
            *pixel = Luma([255]);
        }
    }
    let mask = imageops::blur(&mask, (MASK_RADIUS_PCT * size).max(1.0));
    let blurred = imageops::blur(
        &imageops::crop_imm(&*rgb, 0, top, width, height).to_image(),
        (BLUR_RADIUS_PCT * size).max(1.0),
    );

    for (x, y, Luma([m])) in mask.enumerate_pixels() {
        let m = (*m as f32 / 255.0).powf(1.0 / MASK_GAMMA);
        let darken = 1.0 - (1.0 - BACKDROP_DARKEN) * m;
        let Rgb(soft) = *blurred.get_pixel(x, y);
        let pixel = rgb.get_pixel_mut(x, top + y);
        let Rgb(sharp) = *pixel;
        let mut out = [0u8; 3];
        for c in 0..3 {
            let v = (soft[c] as f32 * m + sharp[c] as f32 * (1.0 - m)) * darken;
            out[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        *pixel = Rgb(out);
    }
}

fn blend_glyph(
    rgb: &mut RgbImage,
    glyph: &PlacedGlyph,
    left: i32,
    top: i32,
    blend: impl Fn(f32, f32) -> f32,
) {
    let (width, height) = rgb.dimensions();
    for gy in 0..glyph.height {
        for gx in 0..glyph.width {
            let a = glyph.coverage[gy * glyph.width + gx] as f32 / 255.0;
            let (x, y) = (left + gx as i32, top + gy as i32);
            if a == 0.0 || x < 0 || y < 0 || x as u32 >= width || y as u32 >= height {
                continue;
            }
            let pixel = rgb.get_pixel_mut(x as u32, y as u32);
            let Rgb(channels) = *pixel;
            *pixel = Rgb(channels.map(|c| blend(c as f32, a).round().clamp(0.0, 255.0) as u8));
        }
    }
}
