//! Detector contract: the one seam between the pipeline and the model.
//!
//! The trained model is opaque. Everything the pipeline needs from it is the
//! single method [`Detector::detect`]: given an RGB image and the thresholds
//! in force, return boxes in that image's own pixel space. Swapping YOLO for
//! another architecture means writing one more `impl Detector`, nothing else.
//!
//! The geometry and class types used throughout the crate also live here,
//! together with [`non_max_suppression`], which both detector backends and
//! the cross-pass merger share.

#[cfg(feature = "onnx")]
pub mod onnx;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

// ── Classes ──────────────────────────────────────────────────────────────

/// The closed set of object classes the model was trained on.
///
/// Model class ids follow the training label order: 0 = signature,
/// 1 = stamp, 2 = qr_code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionClass {
    Signature,
    Stamp,
    QrCode,
}

impl DetectionClass {
    /// All classes in model id order.
    pub const ALL: [DetectionClass; 3] = [
        DetectionClass::Signature,
        DetectionClass::Stamp,
        DetectionClass::QrCode,
    ];

    /// Model class id.
    pub const fn id(self) -> usize {
        match self {
            DetectionClass::Signature => 0,
            DetectionClass::Stamp => 1,
            DetectionClass::QrCode => 2,
        }
    }

    /// Inverse of [`DetectionClass::id`]. `None` for ids outside the set.
    pub const fn from_id(id: usize) -> Option<Self> {
        match id {
            0 => Some(DetectionClass::Signature),
            1 => Some(DetectionClass::Stamp),
            2 => Some(DetectionClass::QrCode),
            _ => None,
        }
    }

    /// Stable snake_case name used in labels and reports.
    pub const fn name(self) -> &'static str {
        match self {
            DetectionClass::Signature => "signature",
            DetectionClass::Stamp => "stamp",
            DetectionClass::QrCode => "qr_code",
        }
    }
}

impl fmt::Display for DetectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which derived view of a page produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePass {
    /// Pass 1: the unmodified full page.
    Original,
    /// Pass 2 when the crop covers the whole enhanced page (`corner_fraction = 1.0`).
    Enhanced,
    /// Pass 2: the enhanced bottom-right corner crop.
    Corner,
}

impl fmt::Display for SourcePass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourcePass::Original => "original",
            SourcePass::Enhanced => "enhanced",
            SourcePass::Corner => "corner",
        })
    }
}

// ── Geometry ─────────────────────────────────────────────────────────────

/// Axis-aligned rectangle in corner form (`x1 <= x2`, `y1 <= y2`).
///
/// The coordinate space is whatever the producer used: view-local pixels
/// straight out of a detector, page points after mapping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Build a box from two corners, normalising their order.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Build a box from its top-left corner and size.
    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over union. Zero when either box is degenerate.
    #[inline]
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = ix * iy;
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Shift by `(dx, dy)`.
    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }

    /// Multiply every coordinate by `factor` (`factor > 0`).
    pub fn scale(&self, factor: f32) -> Self {
        Self {
            x1: self.x1 * factor,
            y1: self.y1 * factor,
            x2: self.x2 * factor,
            y2: self.y2 * factor,
        }
    }

    /// Clip to `[0, width] × [0, height]`.
    pub fn clamp_to(&self, width: f32, height: f32) -> Self {
        Self {
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
            x2: self.x2.clamp(0.0, width),
            y2: self.y2.clamp(0.0, height),
        }
    }

    /// True when the box lies inside `[0, width] × [0, height]`.
    pub fn is_within(&self, width: f32, height: f32) -> bool {
        self.x1 >= 0.0 && self.y1 >= 0.0 && self.x2 <= width && self.y2 <= height
    }
}

/// One recognised object instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: DetectionClass,
    /// Model confidence in `[0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub source_pass: SourcePass,
}

impl Detection {
    pub fn new(class: DetectionClass, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class,
            confidence,
            bbox,
            source_pass: SourcePass::Original,
        }
    }

    pub fn with_source(mut self, pass: SourcePass) -> Self {
        self.source_pass = pass;
        self
    }
}

// ── Contract ─────────────────────────────────────────────────────────────

/// Thresholds passed to every detector invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectParams {
    /// Candidates below this confidence are dropped before suppression.
    pub confidence_threshold: f32,
    /// Same-class candidates overlapping above this IOU are duplicates.
    pub iou_threshold: f32,
    /// Upper bound on returned detections (highest confidence kept).
    pub max_detections: usize,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            max_detections: 100,
        }
    }
}

/// Failure of one detector invocation.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Inference error: {0}")]
    Inference(String),

    /// The model produced a class id outside the closed class set.
    #[error("Model produced unknown class id {0}")]
    UnknownClass(usize),

    #[error("Inference timed out after {millis}ms")]
    Timeout { millis: u64 },
}

/// A pretrained object detector.
///
/// Implementations receive images in any size and must return boxes in that
/// image's pixel space, already filtered by `params.confidence_threshold`,
/// de-duplicated with `params.iou_threshold` and capped at
/// `params.max_detections`. [`finalize_detections`] does all three.
///
/// Implementations need not be reentrant: the pipeline gates every call
/// through a semaphore sized by `max_concurrent_inferences`.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &RgbImage, params: &DetectParams)
        -> Result<Vec<Detection>, DetectorError>;
}

// ── Shared post-processing ───────────────────────────────────────────────

/// Order by descending confidence, breaking ties by position so the result
/// does not depend on input order.
pub(crate) fn by_confidence_desc(a: &Detection, b: &Detection) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.bbox.y1.partial_cmp(&b.bbox.y1).unwrap_or(Ordering::Equal))
        .then_with(|| a.bbox.x1.partial_cmp(&b.bbox.x1).unwrap_or(Ordering::Equal))
        .then_with(|| a.bbox.y2.partial_cmp(&b.bbox.y2).unwrap_or(Ordering::Equal))
        .then_with(|| a.bbox.x2.partial_cmp(&b.bbox.x2).unwrap_or(Ordering::Equal))
}

/// Greedy per-class non-maximum suppression.
///
/// A candidate is discarded when it overlaps an already kept box of the same
/// class with IOU strictly above `iou_threshold`. Output is sorted by
/// descending confidence.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(by_confidence_desc);

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let duplicate = keep.iter().any(|kept| {
            kept.class == candidate.class && kept.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !duplicate {
            keep.push(candidate);
        }
    }
    keep
}

/// Confidence filter → NMS → cap, in that order.
pub fn finalize_detections(detections: Vec<Detection>, params: &DetectParams) -> Vec<Detection> {
    let candidates: Vec<Detection> = detections
        .into_iter()
        .filter(|d| d.confidence >= params.confidence_threshold)
        .collect();
    let mut kept = non_max_suppression(candidates, params.iou_threshold);
    kept.truncate(params.max_detections);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class: DetectionClass, conf: f32, x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection::new(class, conf, BoundingBox::from_xywh(x, y, w, h))
    }

    #[test]
    fn class_ids_round_trip() {
        for class in DetectionClass::ALL {
            assert_eq!(DetectionClass::from_id(class.id()), Some(class));
        }
        assert_eq!(DetectionClass::from_id(3), None);
        assert_eq!(DetectionClass::QrCode.to_string(), "qr_code");
    }

    #[test]
    fn class_serialises_snake_case() {
        let json = serde_json::to_string(&DetectionClass::QrCode).unwrap();
        assert_eq!(json, "\"qr_code\"");
    }

    #[test]
    fn iou_of_identical_overlapping_and_disjoint_boxes() {
        let a = BoundingBox::from_xywh(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);

        let b = BoundingBox::from_xywh(5.0, 0.0, 10.0, 10.0);
        // 50 / 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);

        let c = BoundingBox::from_xywh(20.0, 20.0, 5.0, 5.0);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn iou_of_degenerate_box_is_zero() {
        let a = BoundingBox::from_xywh(0.0, 0.0, 0.0, 0.0);
        assert_eq!(a.iou(&a), 0.0);
    }

    #[test]
    fn new_normalises_corner_order() {
        let b = BoundingBox::new(10.0, 8.0, 2.0, 4.0);
        assert_eq!(b, BoundingBox::new(2.0, 4.0, 10.0, 8.0));
        assert_eq!(b.width(), 8.0);
        assert_eq!(b.height(), 4.0);
    }

    #[test]
    fn clamp_keeps_box_inside() {
        let b = BoundingBox::new(-5.0, 10.0, 120.0, 300.0).clamp_to(100.0, 200.0);
        assert!(b.is_within(100.0, 200.0));
        assert_eq!(b, BoundingBox::new(0.0, 10.0, 100.0, 200.0));
    }

    #[test]
    fn nms_collapses_same_class_duplicates() {
        let kept = non_max_suppression(
            vec![
                det(DetectionClass::Stamp, 0.6, 0.0, 0.0, 10.0, 10.0),
                det(DetectionClass::Stamp, 0.9, 1.0, 1.0, 10.0, 10.0),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn nms_never_suppresses_across_classes() {
        let kept = non_max_suppression(
            vec![
                det(DetectionClass::Stamp, 0.6, 0.0, 0.0, 10.0, 10.0),
                det(DetectionClass::Signature, 0.9, 0.0, 0.0, 10.0, 10.0),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn nms_keeps_overlap_at_exact_threshold() {
        let a = det(DetectionClass::QrCode, 0.9, 0.0, 0.0, 10.0, 10.0);
        let b = det(DetectionClass::QrCode, 0.8, 5.0, 0.0, 10.0, 10.0);
        let iou = a.bbox.iou(&b.bbox);
        assert_eq!(non_max_suppression(vec![a, b], iou).len(), 2);
    }

    #[test]
    fn finalize_filters_then_caps_by_confidence() {
        let params = DetectParams {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            max_detections: 2,
        };
        let out = finalize_detections(
            vec![
                det(DetectionClass::Signature, 0.3, 0.0, 0.0, 5.0, 5.0),
                det(DetectionClass::Signature, 0.7, 100.0, 0.0, 5.0, 5.0),
                det(DetectionClass::Stamp, 0.95, 200.0, 0.0, 5.0, 5.0),
                det(DetectionClass::QrCode, 0.8, 300.0, 0.0, 5.0, 5.0),
            ],
            &params,
        );
        let confs: Vec<f32> = out.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.95, 0.8]);
    }
}
