//! Per-page two-pass state machine.
//!
//! ```text
//! NotStarted ──pass1──▶ Pass1Done ──pass2 ok──▶ Pass2Attempted ──merge──▶ Merged
//!                           │                                      ▲
//!                           └──skip / pass2 failed──▶ Pass2Skipped ┘
//! ```
//!
//! Every transition consumes the state, so a page cannot be merged twice or
//! merged before its second pass was either attempted or explicitly skipped.
//! A failed pass 1 still reaches `Pass1Done`, with an empty detection list
//! and the failure recorded. Pass 2 is restricted to QR codes: anything else
//! it returns is dropped before merging.

use crate::detector::{Detection, DetectionClass, DetectorError, SourcePass};
use crate::document::Pass2Outcome;
use crate::error::PageError;
use crate::pipeline::corner::CornerError;
use crate::pipeline::merge::{merge_passes, PageGeometry, PassOutput};
use thiserror::Error;

/// Why pass 2 did not contribute to a page.
#[derive(Debug, Clone, PartialEq)]
pub enum Pass2Skip {
    /// Preprocessing off for the request.
    Disabled,
    /// The corner crop was degenerate.
    Corner(CornerError),
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid page transition: {event} in state {state}")]
pub struct TransitionError {
    pub state: &'static str,
    pub event: &'static str,
}

/// Passes run so far and everything that went wrong along the way.
#[derive(Debug, Clone)]
pub struct PassLedger {
    page: usize,
    pass1: PassOutput,
    pass2: Option<PassOutput>,
    errors: Vec<PageError>,
    outcome: Pass2Outcome,
}

/// Result of the final transition.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedPage {
    pub detections: Vec<Detection>,
    pub errors: Vec<PageError>,
    pub pass2: Pass2Outcome,
}

#[derive(Debug, Clone)]
pub enum PageState {
    NotStarted { page: usize },
    Pass1Done(PassLedger),
    Pass2Attempted(PassLedger),
    Pass2Skipped(PassLedger),
    Merged(MergedPage),
}

impl PageState {
    pub fn new(page: usize) -> Self {
        PageState::NotStarted { page }
    }

    fn name(&self) -> &'static str {
        match self {
            PageState::NotStarted { .. } => "NotStarted",
            PageState::Pass1Done(_) => "Pass1Done",
            PageState::Pass2Attempted(_) => "Pass2Attempted",
            PageState::Pass2Skipped(_) => "Pass2Skipped",
            PageState::Merged(_) => "Merged",
        }
    }

    fn invalid(&self, event: &'static str) -> TransitionError {
        TransitionError {
            state: self.name(),
            event,
        }
    }

    /// `NotStarted → Pass1Done`.
    pub fn finish_pass1(self, result: Result<Vec<Detection>, DetectorError>) -> Result<Self, TransitionError> {
        let page = match self {
            PageState::NotStarted { page } => page,
            other => return Err(other.invalid("finish_pass1")),
        };
        let mut errors = Vec::new();
        let detections = match result {
            Ok(dets) => dets,
            Err(e) => {
                errors.push(PageError::Detector {
                    page,
                    pass: SourcePass::Original,
                    detail: e.to_string(),
                });
                Vec::new()
            }
        };
        Ok(PageState::Pass1Done(PassLedger {
            page,
            pass1: PassOutput::new(SourcePass::Original, (0, 0), tag(detections, SourcePass::Original)),
            pass2: None,
            errors,
            outcome: Pass2Outcome::NotRequested,
        }))
    }

    /// `Pass1Done → Pass2Skipped` without running the detector.
    pub fn skip_pass2(self, reason: Pass2Skip) -> Result<Self, TransitionError> {
        let mut ledger = match self {
            PageState::Pass1Done(ledger) => ledger,
            other => return Err(other.invalid("skip_pass2")),
        };
        ledger.outcome = match reason {
            Pass2Skip::Disabled => Pass2Outcome::NotRequested,
            Pass2Skip::Corner(e) => Pass2Outcome::Skipped { reason: e.to_string() },
        };
        Ok(PageState::Pass2Skipped(ledger))
    }

    /// `Pass1Done → Pass2Attempted` on success, `→ Pass2Skipped` on failure.
    ///
    /// Non-QR detections are discarded here, before any suppression.
    pub fn record_pass2(
        self,
        pass: SourcePass,
        offset_px: (u32, u32),
        result: Result<Vec<Detection>, DetectorError>,
    ) -> Result<Self, TransitionError> {
        let mut ledger = match self {
            PageState::Pass1Done(ledger) => ledger,
            other => return Err(other.invalid("record_pass2")),
        };
        match result {
            Ok(dets) => {
                let qr: Vec<Detection> = dets
                    .into_iter()
                    .filter(|d| d.class == DetectionClass::QrCode)
                    .collect();
                ledger.outcome = Pass2Outcome::Completed { detections: qr.len() };
                ledger.pass2 = Some(PassOutput::new(pass, offset_px, tag(qr, pass)));
                Ok(PageState::Pass2Attempted(ledger))
            }
            Err(e) => {
                let detail = e.to_string();
                ledger.errors.push(PageError::Detector {
                    page: ledger.page,
                    pass,
                    detail: detail.clone(),
                });
                ledger.outcome = Pass2Outcome::Skipped { reason: detail };
                Ok(PageState::Pass2Skipped(ledger))
            }
        }
    }

    /// `Pass2Attempted | Pass2Skipped → Merged`.
    pub fn merge(self, geometry: &PageGeometry, iou_threshold: f32) -> Result<Self, TransitionError> {
        let ledger = match self {
            PageState::Pass2Attempted(ledger) | PageState::Pass2Skipped(ledger) => ledger,
            other => return Err(other.invalid("merge")),
        };
        let mut passes = vec![ledger.pass1];
        passes.extend(ledger.pass2);
        Ok(PageState::Merged(MergedPage {
            detections: merge_passes(&passes, geometry, iou_threshold),
            errors: ledger.errors,
            pass2: ledger.outcome,
        }))
    }

    /// The merged result, once the page reached `Merged`.
    pub fn into_merged(self) -> Result<MergedPage, TransitionError> {
        match self {
            PageState::Merged(merged) => Ok(merged),
            other => Err(other.invalid("into_merged")),
        }
    }
}

fn tag(detections: Vec<Detection>, pass: SourcePass) -> Vec<Detection> {
    detections.into_iter().map(|d| d.with_source(pass)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::BoundingBox;

    const GEOMETRY: PageGeometry = PageGeometry {
        scale_to_page: 0.5,
        width_pt: 500.0,
        height_pt: 400.0,
    };

    fn det(class: DetectionClass, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection::new(class, 0.9, BoundingBox::new(x1, y1, x2, y2))
    }

    #[test]
    fn single_pass_flow() {
        let merged = PageState::new(1)
            .finish_pass1(Ok(vec![det(DetectionClass::Signature, 100.0, 100.0, 300.0, 160.0)]))
            .and_then(|s| s.skip_pass2(Pass2Skip::Disabled))
            .and_then(|s| s.merge(&GEOMETRY, 0.45))
            .and_then(PageState::into_merged)
            .unwrap();
        assert_eq!(merged.detections.len(), 1);
        assert_eq!(merged.pass2, Pass2Outcome::NotRequested);
        assert_eq!(merged.detections[0].bbox, BoundingBox::new(50.0, 50.0, 150.0, 80.0));
    }

    #[test]
    fn pass2_keeps_only_qr_codes_and_maps_offsets() {
        let merged = PageState::new(1)
            .finish_pass1(Ok(vec![]))
            .and_then(|s| {
                s.record_pass2(
                    SourcePass::Corner,
                    (900, 720),
                    Ok(vec![
                        det(DetectionClass::QrCode, 10.0, 10.0, 60.0, 60.0),
                        det(DetectionClass::Stamp, 0.0, 0.0, 40.0, 40.0),
                    ]),
                )
            })
            .and_then(|s| s.merge(&GEOMETRY, 0.45))
            .and_then(PageState::into_merged)
            .unwrap();
        assert_eq!(merged.detections.len(), 1);
        let qr = &merged.detections[0];
        assert_eq!(qr.class, DetectionClass::QrCode);
        assert_eq!(qr.source_pass, SourcePass::Corner);
        assert_eq!(qr.bbox, BoundingBox::new(455.0, 365.0, 480.0, 390.0));
        assert_eq!(merged.pass2, Pass2Outcome::Completed { detections: 1 });
    }

    #[test]
    fn failed_pass1_is_recorded_and_page_still_merges() {
        let merged = PageState::new(2)
            .finish_pass1(Err(DetectorError::Inference("boom".into())))
            .and_then(|s| s.skip_pass2(Pass2Skip::Disabled))
            .and_then(|s| s.merge(&GEOMETRY, 0.45))
            .and_then(PageState::into_merged)
            .unwrap();
        assert!(merged.detections.is_empty());
        assert_eq!(merged.errors.len(), 1);
        assert_eq!(merged.errors[0].page(), 2);
    }

    #[test]
    fn failed_pass2_keeps_pass1_results() {
        let merged = PageState::new(1)
            .finish_pass1(Ok(vec![det(DetectionClass::Stamp, 0.0, 0.0, 100.0, 100.0)]))
            .and_then(|s| s.record_pass2(SourcePass::Corner, (900, 720), Err(DetectorError::Timeout { millis: 10 })))
            .and_then(|s| s.merge(&GEOMETRY, 0.45))
            .and_then(PageState::into_merged)
            .unwrap();
        assert_eq!(merged.detections.len(), 1);
        assert!(matches!(merged.pass2, Pass2Outcome::Skipped { .. }));
        assert!(matches!(
            merged.errors[0],
            PageError::Detector {
                pass: SourcePass::Corner,
                ..
            }
        ));
    }

    #[test]
    fn degenerate_corner_is_a_skip_not_an_error() {
        let merged = PageState::new(1)
            .finish_pass1(Ok(vec![]))
            .and_then(|s| {
                s.skip_pass2(Pass2Skip::Corner(CornerError::TooSmall {
                    width: 3,
                    height: 3,
                    min: 16,
                }))
            })
            .and_then(|s| s.merge(&GEOMETRY, 0.45))
            .and_then(PageState::into_merged)
            .unwrap();
        assert!(merged.errors.is_empty());
        assert!(matches!(merged.pass2, Pass2Outcome::Skipped { .. }));
    }

    #[test]
    fn merging_before_pass2_is_resolved_is_rejected() {
        let err = PageState::new(1)
            .finish_pass1(Ok(vec![]))
            .and_then(|s| s.merge(&GEOMETRY, 0.45))
            .unwrap_err();
        assert_eq!(err.state, "Pass1Done");
        assert_eq!(err.event, "merge");
    }

    #[test]
    fn pass1_cannot_run_twice() {
        let err = PageState::new(1)
            .finish_pass1(Ok(vec![]))
            .and_then(|s| s.finish_pass1(Ok(vec![])))
            .unwrap_err();
        assert_eq!(err.event, "finish_pass1");
    }
}
