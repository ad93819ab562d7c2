//! Result types returned by the top-level detection functions.

use crate::document::Document;
use crate::report::Report;
use serde::{Deserialize, Serialize};

/// Everything one request produced.
#[derive(Debug, Clone)]
pub struct DetectionOutput {
    /// Annotated PDF, one page per input page, same order.
    pub pdf: Vec<u8>,
    /// Side-by-side preprocessing comparison, when requested and preprocessing ran.
    pub preview_pdf: Option<Vec<u8>>,
    pub report: Report,
    pub document: Document,
    pub stats: DetectionStats,
}

/// Wall-clock timings of the main stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionStats {
    pub total_duration_ms: u64,
    pub render_duration_ms: u64,
    pub detection_duration_ms: u64,
    pub assembly_duration_ms: u64,
}
