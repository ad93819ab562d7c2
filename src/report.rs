//! Aggregate statistics and the JSON report.
//!
//! [`Report::from_document`] is a pure function of a processed
//! [`Document`]: the same document always yields the same report, with the
//! same annotation ids in the same order. Annotation ids run across the whole
//! document (`annotation_1`, `annotation_2`, …) in page order, then in each
//! page's canonical detection order.

use crate::detector::{DetectionClass, SourcePass};
use crate::document::{Document, PageSize};
use crate::output::DetectionStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-class counts. Only classes that were actually detected appear.
pub type ClassCounts = BTreeMap<DetectionClass, usize>;

fn round_to(value: f32, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (f64::from(value) * factor).round() / factor
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub total_pages: usize,
    pub total_detections: usize,
    pub detections_per_class: ClassCounts,
    pub page_stats: Vec<PageStats>,
    pub annotations: Vec<PageAnnotations>,
    pub model_classes: Vec<ModelClass>,
    pub preprocessing: PreprocessingSummary,
    pub thresholds: Thresholds,
    /// Stage timings; absent when the report was built from pages alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durations: Option<DetectionStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageStats {
    /// 1-based page number.
    pub page: usize,
    pub detections: usize,
    pub classes: ClassCounts,
    pub render_failed: bool,
    pub detector_failed: bool,
    pub pass2_skipped: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageAnnotations {
    pub page: usize,
    pub page_size: PageSize,
    pub annotations: Vec<Annotation>,
}

/// One detection in report form: top-left origin, page points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    pub category: DetectionClass,
    pub confidence: f64,
    pub bbox: AnnotationBox,
    pub area: f64,
    pub source_pass: SourcePass,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnotationBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelClass {
    pub id: usize,
    pub name: DetectionClass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingSummary {
    pub enabled: bool,
    pub two_pass_mode: bool,
    pub techniques: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub confidence: f32,
    pub iou: f32,
    pub max_detections: usize,
}

impl Report {
    /// Summarise a processed document.
    pub fn from_document(document: &Document) -> Self {
        let config = &document.config;
        let mut detections_per_class = ClassCounts::new();
        let mut page_stats = Vec::with_capacity(document.page_count());
        let mut annotations = Vec::with_capacity(document.page_count());
        let mut next_id = 1usize;

        for page in document.pages() {
            let mut classes = ClassCounts::new();
            let mut page_annotations = Vec::with_capacity(page.detections().len());

            for det in page.detections() {
                *classes.entry(det.class).or_insert(0) += 1;
                *detections_per_class.entry(det.class).or_insert(0) += 1;

                let (w, h) = (det.bbox.width(), det.bbox.height());
                page_annotations.push(Annotation {
                    id: format!("annotation_{next_id}"),
                    category: det.class,
                    confidence: round_to(det.confidence, 4),
                    bbox: AnnotationBox {
                        x: round_to(det.bbox.x1, 2),
                        y: round_to(det.bbox.y1, 2),
                        width: round_to(w, 2),
                        height: round_to(h, 2),
                    },
                    area: round_to(w * h, 3),
                    source_pass: det.source_pass,
                });
                next_id += 1;
            }

            page_stats.push(PageStats {
                page: page.index,
                detections: page.detections().len(),
                classes,
                render_failed: page.status.render_failed(),
                detector_failed: page.status.detector_failed(),
                pass2_skipped: page.status.pass2_skipped(),
                errors: page.status.errors().map(ToString::to_string).collect(),
            });
            annotations.push(PageAnnotations {
                page: page.index,
                page_size: page.page_size,
                annotations: page_annotations,
            });
        }

        let options = config.preprocess_options();
        Report {
            total_pages: document.page_count(),
            total_detections: document.total_detections(),
            detections_per_class,
            page_stats,
            annotations,
            model_classes: DetectionClass::ALL
                .iter()
                .map(|c| ModelClass { id: c.id(), name: *c })
                .collect(),
            preprocessing: PreprocessingSummary {
                enabled: options.any(),
                two_pass_mode: config.two_pass_mode(),
                techniques: options.techniques().into_iter().map(String::from).collect(),
            },
            thresholds: Thresholds {
                confidence: config.confidence_threshold,
                iou: config.iou_threshold,
                max_detections: config.max_detections,
            },
            durations: None,
        }
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
