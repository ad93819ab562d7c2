//! Eager (full-document) detection entry points.
//!
//! ## Why eager vs. streaming?
//!
//! These functions wait for every page, then assemble the annotated PDF and
//! the report in one go. Use [`crate::stream::detect_stream`] to receive
//! pages as they finish instead.
//!
//! ## Layers
//!
//! ```text
//! detect_file ──▶ detect_document ──▶ render ──▶ analyze_pages ──▶ assemble
//! (path / URL)    (validated bytes)   (pdfium)   (no pdfium)       (pdfium)
//! ```
//!
//! [`analyze_pages`] is the pdfium-free core: it takes already rasterised
//! pages, so it can be driven from tests or from another renderer.

use crate::config::DetectionConfig;
use crate::detector::Detector;
use crate::document::{Document, DocumentMetadata, RenderedPage};
use crate::error::DetectError;
use crate::output::{DetectionOutput, DetectionStats};
use crate::pipeline::assemble::{assemble, AnnotatedPage};
use crate::pipeline::page::{process_page, PageContext, ProcessedPage};
use crate::pipeline::{input, render};
use crate::report::Report;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Detection results before the output PDF is assembled.
#[derive(Debug)]
pub struct AnalyzedDocument {
    pub document: Document,
    /// Annotated page images in page order.
    pub annotated: Vec<AnnotatedPage>,
    /// Comparison pages in page order, when a preview was requested and
    /// preprocessing ran.
    pub previews: Option<Vec<AnnotatedPage>>,
}

impl AnalyzedDocument {
    pub fn report(&self) -> Report {
        Report::from_document(&self.document)
    }
}

/// Where [`detect_to_files`] writes its outputs.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub pdf: PathBuf,
    pub report: Option<PathBuf>,
    pub preview: Option<PathBuf>,
}

/// Run `fut` under the request budget, if any.
pub(crate) async fn within_budget<T, F>(budget: Option<Duration>, fut: F) -> Result<T, DetectError>
where
    F: Future<Output = Result<T, DetectError>>,
{
    match budget {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| DetectError::Timeout {
                millis: limit.as_millis() as u64,
            })?,
        None => fut.await,
    }
}

/// Detect on pre-rasterised pages.
///
/// Pages are processed with `page_concurrency` in flight and returned in
/// page order. Page failures are recorded on the pages; only a blown
/// `timeout` or an internal fault is returned as `Err`.
pub async fn analyze_pages(
    pages: Vec<RenderedPage>,
    detector: Arc<dyn Detector>,
    config: &DetectionConfig,
) -> Result<AnalyzedDocument, DetectError> {
    within_budget(config.timeout, analyze(pages, detector, config)).await
}

async fn analyze(
    pages: Vec<RenderedPage>,
    detector: Arc<dyn Detector>,
    config: &DetectionConfig,
) -> Result<AnalyzedDocument, DetectError> {
    let total_pages = pages.len();
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(total_pages);
    }

    let ctx = Arc::new(PageContext::new(detector, config, total_pages));
    let mut processed: Vec<ProcessedPage> = stream::iter(pages)
        .map(|page| process_page(Arc::clone(&ctx), page))
        .buffer_unordered(config.page_concurrency.max(1))
        .try_collect()
        .await?;
    processed.sort_by_key(|p| p.page.index);

    let mut pages = Vec::with_capacity(processed.len());
    let mut annotated = Vec::with_capacity(processed.len());
    let mut previews = Vec::new();
    for p in processed {
        pages.push(p.page);
        annotated.push(p.annotated);
        previews.extend(p.preview);
    }
    let previews = (config.preview_preprocessing && config.preprocessing_enabled()).then_some(previews);

    let document = Document::new(config.clone(), pages);
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_complete(total_pages, document.total_detections());
    }
    Ok(AnalyzedDocument {
        document,
        annotated,
        previews,
    })
}

async fn assemble_blocking(pages: Vec<AnnotatedPage>) -> Result<Vec<u8>, DetectError> {
    tokio::task::spawn_blocking(move || assemble(&pages))
        .await
        .map_err(|e| DetectError::Internal(format!("Assembly task panicked: {e}")))?
}

/// Detect objects in an in-memory PDF.
///
/// # Returns
/// `Ok(DetectionOutput)` even when some pages failed; see
/// `report.page_stats[*].render_failed / detector_failed`.
///
/// # Errors
/// - [`DetectError::NotAPdf`] / [`DetectError::TooLarge`] for rejected input
/// - [`DetectError::DocumentRead`] when pdfium cannot open the document
/// - [`DetectError::Assembly`] when the output PDF cannot be built
/// - [`DetectError::Timeout`] when `config.timeout` elapses
pub async fn detect_document(
    document_bytes: Vec<u8>,
    detector: Arc<dyn Detector>,
    config: &DetectionConfig,
) -> Result<DetectionOutput, DetectError> {
    input::validate_pdf_bytes(&document_bytes, "<memory>")?;
    within_budget(config.timeout, run(Arc::new(document_bytes), detector, config)).await
}

async fn run(
    bytes: Arc<Vec<u8>>,
    detector: Arc<dyn Detector>,
    config: &DetectionConfig,
) -> Result<DetectionOutput, DetectError> {
    let total_start = Instant::now();

    // ── Step 1: Rasterise ────────────────────────────────────────────────
    let render_start = Instant::now();
    let rendered = render::render_document(bytes, config.dpi, config.max_rendered_pixels).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!("Rendered {} pages in {}ms", rendered.len(), render_duration_ms);

    // ── Step 2: Detect, merge, annotate ──────────────────────────────────
    let detect_start = Instant::now();
    let analyzed = analyze(rendered, detector, config).await?;
    let detection_duration_ms = detect_start.elapsed().as_millis() as u64;
    let mut report = analyzed.report();

    // ── Step 3: Assemble outputs ─────────────────────────────────────────
    let assembly_start = Instant::now();
    let AnalyzedDocument {
        document,
        annotated,
        previews,
    } = analyzed;
    let pdf = assemble_blocking(annotated).await?;
    let preview_pdf = match previews {
        Some(pages) => Some(assemble_blocking(pages).await?),
        None => None,
    };
    let assembly_duration_ms = assembly_start.elapsed().as_millis() as u64;

    let stats = DetectionStats {
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        render_duration_ms,
        detection_duration_ms,
        assembly_duration_ms,
    };
    report.durations = Some(stats.clone());
    info!(
        "Detection complete: {} detections on {} pages, {}ms total",
        report.total_detections, report.total_pages, stats.total_duration_ms
    );

    Ok(DetectionOutput {
        pdf,
        preview_pdf,
        report,
        document,
        stats,
    })
}

/// Detect objects in a PDF file or URL.
///
/// This is the primary entry point for the library.
pub async fn detect_file(
    input_str: impl AsRef<str>,
    detector: Arc<dyn Detector>,
    config: &DetectionConfig,
) -> Result<DetectionOutput, DetectError> {
    let input_str = input_str.as_ref();
    info!("Starting detection: {}", input_str);
    let bytes = input::resolve_input(input_str, config.download_timeout_secs).await?;
    detect_document(bytes, detector, config).await
}

/// Detect and write the annotated PDF (plus optional report and preview).
///
/// Uses atomic writes (temp file + rename) so a failed run never leaves a
/// truncated output behind.
pub async fn detect_to_files(
    input_str: impl AsRef<str>,
    outputs: &OutputPaths,
    detector: Arc<dyn Detector>,
    config: &DetectionConfig,
) -> Result<DetectionOutput, DetectError> {
    let output = detect_file(input_str, detector, config).await?;

    write_atomic(&outputs.pdf, &output.pdf).await?;
    if let Some(path) = &outputs.report {
        let json = output
            .report
            .to_json()
            .map_err(|e| DetectError::Internal(format!("Report serialisation failed: {e}")))?;
        write_atomic(path, json.as_bytes()).await?;
    }
    if let (Some(path), Some(preview)) = (&outputs.preview, &output.preview_pdf) {
        write_atomic(path, preview).await?;
    }
    Ok(output)
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), DetectError> {
    let write_failed = |source| DetectError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, contents).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
    debug!("Wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

/// Synchronous wrapper around [`detect_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn detect_sync(
    input_str: impl AsRef<str>,
    detector: Arc<dyn Detector>,
    config: &DetectionConfig,
) -> Result<DetectionOutput, DetectError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DetectError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(detect_file(input_str, detector, config))
}

/// Extract PDF metadata without running detection.
pub async fn inspect(input_str: impl AsRef<str>) -> Result<DocumentMetadata, DetectError> {
    let bytes = input::resolve_input(input_str.as_ref(), 120).await?;
    render::extract_metadata(Arc::new(bytes)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn budget_passes_through_fast_futures() {
        let v = within_budget(Some(Duration::from_secs(5)), async { Ok::<_, DetectError>(7) })
            .await
            .unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn budget_turns_slow_futures_into_timeout() {
        let err = within_budget(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, DetectError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DetectError::Timeout { millis: 10 }));
    }

    #[tokio::test]
    async fn atomic_write_creates_parents_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.pdf");
        write_atomic(&path, b"%PDF-1.7").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7");
        assert!(!dir.path().join("nested").join("out.pdf.tmp").exists());
    }

    #[tokio::test]
    async fn detect_document_rejects_non_pdf_before_rendering() {
        struct Never;
        impl Detector for Never {
            fn detect(
                &self,
                _: &image::RgbImage,
                _: &crate::detector::DetectParams,
            ) -> Result<Vec<crate::detector::Detection>, crate::detector::DetectorError> {
                unreachable!()
            }
        }
        let err = detect_document(b"GIF89a".to_vec(), Arc::new(Never), &DetectionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DetectError::NotAPdf { .. }));
    }
}
