//! Optional image enhancement ahead of the second detection pass.
//!
//! Stages run in a fixed order, each only when toggled:
//!
//! 1. **CLAHE**: contrast-limited adaptive histogram equalisation on the
//!    luminance channel (clip 2.0, 8×8 tiles). Chroma is left untouched so
//!    coloured stamps keep their hue.
//! 2. **Denoise**: bilateral filter (diameter 5, σ_color 75, σ_space 75).
//!    Smooths scanner noise while keeping stroke edges.
//! 3. **Binarise**: Gaussian-weighted adaptive threshold (block 11, C 2),
//!    written back as three equal channels.
//!
//! When at least one stage ran, a 3×3 sharpening kernel is applied last.
//! The output always has the input's dimensions, so pixel coordinates on the
//! enhanced image are valid on the original.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::filter::{filter3x3, gaussian_blur_f32};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

pub const TECHNIQUE_CLAHE: &str = "CLAHE";
pub const TECHNIQUE_DENOISE: &str = "Bilateral Filter";
pub const TECHNIQUE_BINARIZE: &str = "Adaptive Threshold";
pub const TECHNIQUE_SHARPEN: &str = "Sharpening";

const CLAHE_CLIP_LIMIT: f32 = 2.0;
const CLAHE_TILES: u32 = 8;

const BILATERAL_DIAMETER: u32 = 5;
const BILATERAL_SIGMA_COLOR: f32 = 75.0;
const BILATERAL_SIGMA_SPACE: f32 = 75.0;

const ADAPTIVE_BLOCK: u32 = 11;
const ADAPTIVE_C: f32 = 2.0;

/// Which enhancement stages to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessOptions {
    pub clahe: bool,
    pub denoise: bool,
    pub binarize: bool,
}

impl PreprocessOptions {
    pub fn any(&self) -> bool {
        self.clahe || self.denoise || self.binarize
    }

    /// Names of the stages these options would apply, in application order.
    pub fn techniques(&self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(4);
        if self.clahe {
            names.push(TECHNIQUE_CLAHE);
        }
        if self.denoise {
            names.push(TECHNIQUE_DENOISE);
        }
        if self.binarize {
            names.push(TECHNIQUE_BINARIZE);
        }
        if !names.is_empty() {
            names.push(TECHNIQUE_SHARPEN);
        }
        names
    }
}

/// An enhanced page image and the stages that produced it.
#[derive(Debug, Clone)]
pub struct Enhanced {
    pub image: RgbImage,
    pub applied: Vec<&'static str>,
}

/// Apply the enabled stages. With every toggle off the input is returned
/// unchanged and `applied` is empty.
#[instrument(skip(image), fields(width = image.width(), height = image.height()))]
pub fn enhance(image: &RgbImage, options: PreprocessOptions) -> Enhanced {
    let mut current = image.clone();
    if options.clahe {
        current = clahe_luma(&current, CLAHE_CLIP_LIMIT, CLAHE_TILES);
    }
    if options.denoise {
        current = bilateral_filter(
            &current,
            BILATERAL_DIAMETER,
            BILATERAL_SIGMA_COLOR,
            BILATERAL_SIGMA_SPACE,
        );
    }
    if options.binarize {
        current = adaptive_threshold_gaussian(&current, ADAPTIVE_BLOCK, ADAPTIVE_C);
    }
    if options.any() {
        current = sharpen(&current);
    }

    let applied = options.techniques();
    debug!(?applied, "preprocessing complete");
    Enhanced {
        image: current,
        applied,
    }
}

// ── CLAHE ────────────────────────────────────────────────────────────────

#[inline]
fn to_ycbcr(p: &Rgb<u8>) -> (f32, f32, f32) {
    let [r, g, b] = p.0.map(f32::from);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    (y, cb, cr)
}

#[inline]
fn from_ycbcr(y: f32, cb: f32, cr: f32) -> Rgb<u8> {
    let r = y + 1.402 * (cr - 128.0);
    let g = y - 0.344_136 * (cb - 128.0) - 0.714_136 * (cr - 128.0);
    let b = y + 1.772 * (cb - 128.0);
    Rgb([clamp_u8(r), clamp_u8(g), clamp_u8(b)])
}

#[inline]
fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Equalise luminance tile by tile, clipping each tile histogram at
/// `clip_limit × mean bin height` and bilinearly blending neighbouring tile
/// mappings so tile borders do not show.
fn clahe_luma(image: &RgbImage, clip_limit: f32, tiles: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }
    let tiles_x = tiles.min(w).max(1);
    let tiles_y = tiles.min(h).max(1);
    let tile_w = w as f32 / tiles_x as f32;
    let tile_h = h as f32 / tiles_y as f32;

    let mut luma = GrayImage::new(w, h);
    for (x, y, p) in image.enumerate_pixels() {
        luma.put_pixel(x, y, Luma([clamp_u8(to_ycbcr(p).0)]));
    }

    let tile_of = |v: u32, size: f32, count: u32| ((v as f32 / size) as u32).min(count - 1);

    // Per-tile histograms.
    let mut hists = vec![[0u32; 256]; (tiles_x * tiles_y) as usize];
    for (x, y, p) in luma.enumerate_pixels() {
        let t = tile_of(y, tile_h, tiles_y) * tiles_x + tile_of(x, tile_w, tiles_x);
        hists[t as usize][p.0[0] as usize] += 1;
    }

    // Clip, redistribute, and turn each histogram into a lookup table.
    let luts: Vec<[u8; 256]> = hists
        .iter()
        .map(|hist| {
            let area: u32 = hist.iter().sum();
            if area == 0 {
                let mut identity = [0u8; 256];
                for (i, v) in identity.iter_mut().enumerate() {
                    *v = i as u8;
                }
                return identity;
            }
            let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
            let mut clipped = *hist;
            let mut excess = 0u32;
            for bin in clipped.iter_mut() {
                if *bin > limit {
                    excess += *bin - limit;
                    *bin = limit;
                }
            }
            let bonus = excess / 256;
            let residual = (excess % 256) as usize;
            for (i, bin) in clipped.iter_mut().enumerate() {
                *bin += bonus + u32::from(i < residual);
            }

            let scale = 255.0 / area as f32;
            let mut lut = [0u8; 256];
            let mut cdf = 0u32;
            for (i, bin) in clipped.iter().enumerate() {
                cdf += bin;
                lut[i] = clamp_u8(cdf as f32 * scale);
            }
            lut
        })
        .collect();

    let lut_at = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];
    // Fractional tile coordinate of a pixel centre, relative to tile centres.
    let locate = |v: u32, size: f32, count: u32| {
        let t = (v as f32 + 0.5) / size - 0.5;
        let t0 = t.floor().clamp(0.0, (count - 1) as f32) as u32;
        let t1 = (t0 + 1).min(count - 1);
        let a = (t - t0 as f32).clamp(0.0, 1.0);
        (t0, t1, a)
    };

    let mut out = RgbImage::new(w, h);
    for (x, y, p) in image.enumerate_pixels() {
        let (yv, cb, cr) = to_ycbcr(p);
        let level = clamp_u8(yv) as usize;
        let (x0, x1, ax) = locate(x, tile_w, tiles_x);
        let (y0, y1, ay) = locate(y, tile_h, tiles_y);

        let top = f32::from(lut_at(x0, y0)[level]) * (1.0 - ax) + f32::from(lut_at(x1, y0)[level]) * ax;
        let bottom = f32::from(lut_at(x0, y1)[level]) * (1.0 - ax) + f32::from(lut_at(x1, y1)[level]) * ax;
        let equalised = top * (1.0 - ay) + bottom * ay;
        out.put_pixel(x, y, from_ycbcr(equalised, cb, cr));
    }
    out
}

// ── Bilateral filter ─────────────────────────────────────────────────────

/// Bilateral filter over a circular window of the given diameter.
///
/// The colour weight is indexed by the summed absolute channel difference,
/// so it is precomputed once for all 766 possible values.
fn bilateral_filter(image: &RgbImage, diameter: u32, sigma_color: f32, sigma_space: f32) -> RgbImage {
    let (w, h) = image.dimensions();
    let radius = (diameter / 2) as i64;

    let color_coeff = -0.5 / (sigma_color * sigma_color);
    let color_weight: Vec<f32> = (0..=255 * 3)
        .map(|d| (d as f32 * d as f32 * color_coeff).exp())
        .collect();

    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let mut kernel: Vec<(i64, i64, f32)> = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = (dx * dx + dy * dy) as f32;
            if r2.sqrt() <= radius as f32 {
                kernel.push((dx, dy, (r2 * space_coeff).exp()));
            }
        }
    }

    let mut out = RgbImage::new(w, h);
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let center = image.get_pixel(x as u32, y as u32).0;
            let mut acc = [0f32; 3];
            let mut norm = 0f32;
            for &(dx, dy, ws) in &kernel {
                let nx = (x + dx).clamp(0, w as i64 - 1) as u32;
                let ny = (y + dy).clamp(0, h as i64 - 1) as u32;
                let n = image.get_pixel(nx, ny).0;
                let diff: usize = (0..3).map(|c| center[c].abs_diff(n[c]) as usize).sum();
                let weight = ws * color_weight[diff];
                for c in 0..3 {
                    acc[c] += weight * f32::from(n[c]);
                }
                norm += weight;
            }
            out.put_pixel(
                x as u32,
                y as u32,
                Rgb(acc.map(|v| clamp_u8(v / norm))),
            );
        }
    }
    out
}

// ── Adaptive threshold ───────────────────────────────────────────────────

/// Binary threshold against a Gaussian-weighted local mean minus `c`.
///
/// The Gaussian σ for a block size follows the usual
/// `0.3 × ((block − 1) × 0.5 − 1) + 0.8` rule.
fn adaptive_threshold_gaussian(image: &RgbImage, block: u32, c: f32) -> RgbImage {
    let gray = image::imageops::grayscale(image);
    let sigma = 0.3 * ((block as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let local_mean = gaussian_blur_f32(&gray, sigma);

    let mut out = RgbImage::new(gray.width(), gray.height());
    for (x, y, p) in gray.enumerate_pixels() {
        let mean = f32::from(local_mean.get_pixel(x, y).0[0]);
        let v = if f32::from(p.0[0]) > mean - c { 255 } else { 0 };
        out.put_pixel(x, y, Rgb([v, v, v]));
    }
    out
}

// ── Sharpening ───────────────────────────────────────────────────────────

const SHARPEN_KERNEL: [i32; 9] = [-1, -1, -1, -1, 9, -1, -1, -1, -1];

/// Per-channel 3×3 sharpening; borders are clamped to the edge pixel.
fn sharpen(image: &RgbImage) -> RgbImage {
    filter3x3::<_, i32, u8>(image, &SHARPEN_KERNEL)
}
