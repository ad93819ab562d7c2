//! Bottom-right corner crop for the second detection pass.
//!
//! QR codes on contracts and invoices are routinely printed small in the
//! bottom-right corner. At full-page scale they shrink below what the
//! detector's 640-pixel input can resolve; cropping the corner hands the
//! model the same region at roughly ten times the effective resolution.

use image::{imageops, RgbImage};
use thiserror::Error;

/// Default share of width and height taken by the crop.
pub const DEFAULT_CORNER_FRACTION: f32 = 0.10;

/// Crops smaller than this on either side are not worth a detector call.
pub const MIN_CORNER_PX: u32 = 16;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CornerError {
    #[error("corner fraction must be in (0, 1], got {0}")]
    InvalidFraction(f32),

    #[error("corner crop {width}x{height} px is below the {min} px minimum")]
    TooSmall { width: u32, height: u32, min: u32 },
}

/// A crop plus the pixel offset of its top-left corner in the source image.
#[derive(Debug, Clone)]
pub struct CornerCrop {
    pub image: RgbImage,
    pub offset_px: (u32, u32),
}

impl CornerCrop {
    /// True when the crop is the entire source image.
    pub fn is_full_image(&self) -> bool {
        self.offset_px == (0, 0)
    }
}

/// Take the bottom-right `fraction × fraction` region of `image`.
///
/// Crop size is `floor(width × fraction) × floor(height × fraction)`; the
/// offset is `(width − crop_width, height − crop_height)`.
pub fn extract_corner(image: &RgbImage, fraction: f32) -> Result<CornerCrop, CornerError> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(CornerError::InvalidFraction(fraction));
    }
    let (w, h) = image.dimensions();
    let cw = ((w as f32 * fraction) as u32).min(w);
    let ch = ((h as f32 * fraction) as u32).min(h);
    if cw < MIN_CORNER_PX || ch < MIN_CORNER_PX {
        return Err(CornerError::TooSmall {
            width: cw,
            height: ch,
            min: MIN_CORNER_PX,
        });
    }

    let (x0, y0) = (w - cw, h - ch);
    Ok(CornerCrop {
        image: imageops::crop_imm(image, x0, y0, cw, ch).to_image(),
        offset_px: (x0, y0),
    })
}
