//! Coordinate mapping and cross-pass merging.
//!
//! Detectors answer in the pixel space of whatever view they were shown. A
//! page's final detections live in page space (PDF points, origin top-left),
//! so every pass result is translated by its view's offset on the rendered
//! page and then scaled by `scale_to_page` before the passes are combined.

use crate::detector::{by_confidence_desc, BoundingBox, Detection, DetectionClass, SourcePass};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// How one rendered page relates to its page-space rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    /// Page points per rendered pixel.
    pub scale_to_page: f32,
    /// Page size in points.
    pub width_pt: f32,
    pub height_pt: f32,
}

/// Raw detections of one pass, still in the pass view's pixel space.
#[derive(Debug, Clone)]
pub struct PassOutput {
    pub pass: SourcePass,
    /// Top-left of the view on the full rendered page, in pixels.
    pub offset_px: (u32, u32),
    pub detections: Vec<Detection>,
}

impl PassOutput {
    pub fn new(pass: SourcePass, offset_px: (u32, u32), detections: Vec<Detection>) -> Self {
        Self {
            pass,
            offset_px,
            detections,
        }
    }
}

/// View pixels → page points.
pub fn to_page_space(bbox: &BoundingBox, offset_px: (u32, u32), scale_to_page: f32) -> BoundingBox {
    bbox.translate(offset_px.0 as f32, offset_px.1 as f32)
        .scale(scale_to_page)
}

/// Page points → view pixels. Inverse of [`to_page_space`].
pub fn to_view_space(bbox: &BoundingBox, offset_px: (u32, u32), scale_to_page: f32) -> BoundingBox {
    bbox.scale(1.0 / scale_to_page)
        .translate(-(offset_px.0 as f32), -(offset_px.1 as f32))
}

/// Map every pass into page space and combine them.
///
/// Boxes are clamped to the page and dropped when clamping leaves no area.
/// Within each class, a box overlapping an already kept one with IOU above
/// `iou_threshold` is discarded; the higher-confidence box wins. Output is
/// ordered by class, then descending confidence, then position, so merging
/// the same input twice gives the same list.
pub fn merge_passes(passes: &[PassOutput], geometry: &PageGeometry, iou_threshold: f32) -> Vec<Detection> {
    let mut by_class: BTreeMap<DetectionClass, Vec<Detection>> = BTreeMap::new();

    for output in passes {
        for det in &output.detections {
            let bbox = to_page_space(&det.bbox, output.offset_px, geometry.scale_to_page)
                .clamp_to(geometry.width_pt, geometry.height_pt);
            if bbox.area() <= 0.0 {
                continue;
            }
            by_class.entry(det.class).or_default().push(Detection {
                class: det.class,
                confidence: det.confidence,
                bbox,
                source_pass: output.pass,
            });
        }
    }

    let mut merged = Vec::new();
    for (_, mut candidates) in by_class {
        candidates.sort_by(|a, b| {
            by_confidence_desc(a, b).then_with(|| pass_rank(a.source_pass).cmp(&pass_rank(b.source_pass)))
        });
        let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if kept.iter().all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold) {
                kept.push(candidate);
            }
        }
        merged.extend(kept);
    }
    merged
}

/// Tie-break for equal confidence and position: prefer the full-page pass.
fn pass_rank(pass: SourcePass) -> u8 {
    match pass {
        SourcePass::Original => 0,
        SourcePass::Enhanced => 1,
        SourcePass::Corner => 2,
    }
}

/// Total order used by reports and tests: class, then descending
/// confidence, then position.
pub fn canonical_order(a: &Detection, b: &Detection) -> Ordering {
    a.class.cmp(&b.class).then_with(|| by_confidence_desc(a, b))
}
