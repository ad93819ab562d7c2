//! Streaming detection API: emit pages as they complete.
//!
//! ## Why stream?
//!
//! Large scans take a while per page. A stream lets callers show partial
//! results, drive progress bars or persist page records incrementally
//! instead of waiting for the whole document.
//!
//! Unlike [`crate::detect::detect_file`], which returns only after all
//! pages finish and the annotated PDF is assembled, [`detect_stream`] yields
//! each [`Page`] as soon as its passes are merged. Pages arrive in completion
//! order; sort by `index` if order matters. No output PDF is produced.

use crate::config::DetectionConfig;
use crate::detect::within_budget;
use crate::detector::Detector;
use crate::document::{Page, RenderedPage};
use crate::error::DetectError;
use crate::pipeline::page::{process_page, PageContext};
use crate::pipeline::{input, render};
use futures::future;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of processed pages.
///
/// Items are `Err` only for internal faults or an expired request budget;
/// page-level failures are recorded in each page's `status`. The stream ends
/// after the first `Err`.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<Page, DetectError>> + Send>>;

/// Request budget as an absolute deadline plus the configured limit.
#[derive(Clone, Copy)]
struct Deadline {
    at: Instant,
    limit: Duration,
}

impl Deadline {
    fn start(config: &DetectionConfig) -> Option<Self> {
        config.timeout.map(|limit| Self {
            at: Instant::now() + limit,
            limit,
        })
    }

    fn expired(&self) -> DetectError {
        DetectError::Timeout {
            millis: self.limit.as_millis() as u64,
        }
    }
}

/// Stream detection results for pre-rasterised pages.
///
/// `config.timeout` bounds the whole stream, measured from this call: once
/// it expires the stream yields one [`DetectError::Timeout`] and ends.
pub fn analyze_stream(
    pages: Vec<RenderedPage>,
    detector: Arc<dyn Detector>,
    config: &DetectionConfig,
) -> PageStream {
    page_stream(pages, detector, config, Deadline::start(config))
}

fn page_stream(
    pages: Vec<RenderedPage>,
    detector: Arc<dyn Detector>,
    config: &DetectionConfig,
    deadline: Option<Deadline>,
) -> PageStream {
    let ctx = Arc::new(PageContext::new(detector, config, pages.len()));
    let s = stream::iter(pages)
        .map(move |page| {
            let work = process_page(Arc::clone(&ctx), page);
            async move {
                match deadline {
                    Some(d) => timeout_at(d.at, work).await.map_err(|_| d.expired())?,
                    None => work.await,
                }
            }
        })
        .buffer_unordered(config.page_concurrency.max(1))
        .scan(false, |failed, result| {
            if *failed {
                return future::ready(None);
            }
            *failed = result.is_err();
            future::ready(Some(result.map(|processed| processed.page)))
        });
    Box::pin(s)
}

/// Detect objects in a PDF file or URL, streaming pages as they are ready.
///
/// # Returns
/// - `Ok(PageStream)` once the document is read and rasterised
/// - `Err(DetectError)` for fatal errors (file not found, not a PDF, …)
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdfdetect::{detect_stream, DetectionConfig, Detector};
/// use futures::StreamExt;
/// use std::sync::Arc;
///
/// # async fn run(detector: Arc<dyn Detector>) -> Result<(), Box<dyn std::error::Error>> {
/// let config = DetectionConfig::default();
/// let mut pages = detect_stream("contract.pdf", detector, &config).await?;
/// while let Some(page) = pages.next().await {
///     let page = page?;
///     println!("page {}: {} detections", page.index, page.detections().len());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn detect_stream(
    input_str: impl AsRef<str>,
    detector: Arc<dyn Detector>,
    config: &DetectionConfig,
) -> Result<PageStream, DetectError> {
    let input_str = input_str.as_ref();
    info!("Starting streaming detection: {}", input_str);
    let bytes = input::resolve_input(input_str, config.download_timeout_secs).await?;
    detect_stream_from_bytes(bytes, detector, config).await
}

/// In-memory equivalent of [`detect_stream`].
pub async fn detect_stream_from_bytes(
    document_bytes: Vec<u8>,
    detector: Arc<dyn Detector>,
    config: &DetectionConfig,
) -> Result<PageStream, DetectError> {
    let deadline = Deadline::start(config);
    input::validate_pdf_bytes(&document_bytes, "<memory>")?;
    let rendered = within_budget(
        config.timeout,
        render::render_document(Arc::new(document_bytes), config.dpi, config.max_rendered_pixels),
    )
    .await?;
    Ok(page_stream(rendered, detector, config, deadline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DetectParams, Detection, DetectorError};
    use image::RgbImage;

    struct Unused;

    impl Detector for Unused {
        fn detect(&self, _: &RgbImage, _: &DetectParams) -> Result<Vec<Detection>, DetectorError> {
            unreachable!("no pages to detect on")
        }
    }

    #[test]
    fn empty_input_is_an_empty_stream() {
        let stream = analyze_stream(Vec::new(), Arc::new(Unused), &DetectionConfig::default());
        let pages: Vec<_> = tokio_test::block_on(stream.collect());
        assert!(pages.is_empty());
    }
}
