//! Draw detections onto page images.
//!
//! Each detection becomes a class-coloured rectangle with a filled label tab
//! reading `"<class> <confidence>"`. Labels sit above the box, or below it
//! when the box touches the top edge. Line thickness and label size scale
//! with the page raster so annotations look the same at any DPI.
//!
//! Text needs a font. [`AnnotationStyle::load`] tries the configured path,
//! then a handful of common system fonts; with none available the coloured
//! label tabs are still drawn, just without glyphs.

use crate::detector::{Detection, DetectionClass};
use crate::pipeline::merge::to_view_space;
use ab_glyph::{FontVec, PxScale};
use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Box colour per class.
#[inline]
pub const fn class_color(class: DetectionClass) -> Rgb<u8> {
    match class {
        DetectionClass::Signature => Rgb([220, 20, 20]),
        DetectionClass::Stamp => Rgb([20, 170, 40]),
        DetectionClass::QrCode => Rgb([30, 60, 230]),
    }
}

/// Font and sizing shared by every page of a request.
pub struct AnnotationStyle {
    font: Option<FontVec>,
}

impl fmt::Debug for AnnotationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationStyle")
            .field("font", &self.font.as_ref().map(|_| "<FontVec>"))
            .finish()
    }
}

impl AnnotationStyle {
    /// Style without text rendering.
    pub fn without_font() -> Self {
        Self { font: None }
    }

    /// Load `font_path` when given, else the first readable system font.
    pub fn load(font_path: Option<&Path>) -> Self {
        if let Some(path) = font_path {
            match read_font(path) {
                Some(font) => return Self { font: Some(font) },
                None => warn!(path = %path.display(), "label font unreadable, searching system fonts"),
            }
        }
        let font = SYSTEM_FONTS.iter().find_map(|p| read_font(Path::new(p)));
        if font.is_none() {
            debug!("no system font found; labels drawn without text");
        }
        Self { font }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }
}

fn read_font(path: &Path) -> Option<FontVec> {
    let bytes = std::fs::read(path).ok()?;
    FontVec::try_from_vec(bytes).ok()
}

/// Box outline thickness for a raster of the given width.
pub fn line_thickness(image_width: u32) -> u32 {
    (image_width / 200).max(2)
}

fn label_scale(image_width: u32) -> f32 {
    (image_width as f32 / 50.0).clamp(14.0, 48.0)
}

fn measure(style: &AnnotationStyle, scale: f32, text: &str) -> (u32, u32) {
    match &style.font {
        Some(font) => {
            let (w, h) = text_size(PxScale::from(scale), font, text);
            (w as u32, h as u32)
        }
        None => ((text.chars().count() as f32 * scale * 0.55) as u32, scale as u32),
    }
}

/// Draw a filled tab with `text` at `(x, y)`, clipped to the image.
fn draw_label(canvas: &mut RgbImage, style: &AnnotationStyle, x: i32, y: i32, text: &str, background: Rgb<u8>) {
    let scale = label_scale(canvas.width());
    let (tw, th) = measure(style, scale, text);
    let pad = (scale / 4.0) as u32;
    let (bg_w, bg_h) = (tw + 2 * pad, th + 2 * pad);
    if bg_w > 0 && bg_h > 0 {
        draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(bg_w, bg_h), background);
    }
    if let Some(font) = &style.font {
        draw_text_mut(
            canvas,
            TEXT_COLOR,
            x + pad as i32,
            y + pad as i32,
            PxScale::from(scale),
            font,
            text,
        );
    }
}

/// Label tab height for a raster of the given width.
fn label_height(style: &AnnotationStyle, image_width: u32) -> u32 {
    let scale = label_scale(image_width);
    measure(style, scale, "Ag").1 + 2 * (scale / 4.0) as u32
}

/// Return a copy of `image` with every detection drawn on it.
///
/// `detections` are in page space; `scale_to_page` converts them back to
/// this raster's pixels. An empty list returns an unmodified copy.
pub fn annotate_page(
    image: &RgbImage,
    detections: &[Detection],
    scale_to_page: f32,
    style: &AnnotationStyle,
) -> RgbImage {
    let mut canvas = image.clone();
    let (w, h) = canvas.dimensions();
    let thickness = line_thickness(w);
    let tab_h = label_height(style, w);

    for det in detections {
        let bbox = to_view_space(&det.bbox, (0, 0), scale_to_page).clamp_to(w as f32, h as f32);
        let x = bbox.x1.round() as u32;
        let y = bbox.y1.round() as u32;
        let bw = (bbox.width().round() as u32).min(w.saturating_sub(x));
        let bh = (bbox.height().round() as u32).min(h.saturating_sub(y));
        if bw == 0 || bh == 0 {
            continue;
        }

        let color = class_color(det.class);
        for t in 0..thickness {
            let inner_w = bw.saturating_sub(2 * t);
            let inner_h = bh.saturating_sub(2 * t);
            if inner_w > 0 && inner_h > 0 {
                let rect = Rect::at((x + t) as i32, (y + t) as i32).of_size(inner_w, inner_h);
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }
        }

        let label = format!("{} {:.2}", det.class, det.confidence);
        let label_y = if y >= tab_h { y - tab_h } else { (y + bh).min(h.saturating_sub(tab_h)) };
        draw_label(&mut canvas, style, x as i32, label_y as i32, &label, color);
    }
    canvas
}

/// Side-by-side original/enhanced image with a caption strip on top.
pub fn comparison_image(
    original: &RgbImage,
    enhanced: &RgbImage,
    page_index: usize,
    techniques: &[&str],
    style: &AnnotationStyle,
) -> RgbImage {
    let (w, h) = original.dimensions();
    let gap = (w / 50).max(4);
    let header = label_height(style, w) + 2 * gap;
    let mut canvas = RgbImage::from_pixel(2 * w + gap, h + header, Rgb([255, 255, 255]));

    imageops::replace(&mut canvas, original, 0, i64::from(header));
    imageops::replace(&mut canvas, enhanced, i64::from(w + gap), i64::from(header));

    let grey = Rgb([60, 60, 60]);
    draw_label(&mut canvas, style, gap as i32, gap as i32, &format!("Page {page_index}: original"), grey);
    let caption = if techniques.is_empty() {
        "enhanced: none".to_string()
    } else {
        format!("enhanced: {}", techniques.join(", "))
    };
    draw_label(&mut canvas, style, (w + 2 * gap) as i32, gap as i32, &caption, grey);
    canvas
}
