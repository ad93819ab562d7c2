//! Drive one page through detection, merge and annotation.
//!
//! Every detector call goes through [`run_detector`]: a semaphore permit is
//! taken before the blocking task starts and released when it finishes, so
//! at most `max_concurrent_inferences` calls touch the model at once no
//! matter how many pages are in flight. CPU-heavy image work (enhancement,
//! drawing) also runs on the blocking pool.

use crate::config::DetectionConfig;
use crate::detector::{DetectParams, Detection, Detector, DetectorError, SourcePass};
use crate::document::{Page, PageSize, PageStatus, RasterPage, RenderedPage, ViewInfo};
use crate::error::DetectError;
use crate::pipeline::annotate::{annotate_page, comparison_image, AnnotationStyle};
use crate::pipeline::assemble::AnnotatedPage;
use crate::pipeline::corner::extract_corner;
use crate::pipeline::passes::{PageState, Pass2Skip, TransitionError};
use crate::pipeline::preprocess::{enhance, PreprocessOptions};
use crate::progress::ProgressCallback;
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

/// Shared, read-only state for every page of one request.
pub struct PageContext {
    detector: Arc<dyn Detector>,
    gate: Arc<Semaphore>,
    params: DetectParams,
    preprocess: PreprocessOptions,
    corner_fraction: f32,
    inference_timeout: Option<Duration>,
    preview: bool,
    style: Arc<AnnotationStyle>,
    progress: Option<ProgressCallback>,
    total_pages: usize,
}

impl PageContext {
    pub fn new(detector: Arc<dyn Detector>, config: &DetectionConfig, total_pages: usize) -> Self {
        Self {
            detector,
            gate: Arc::new(Semaphore::new(config.max_concurrent_inferences.max(1))),
            params: config.detect_params(),
            preprocess: config.preprocess_options(),
            corner_fraction: config.corner_fraction,
            inference_timeout: config.inference_timeout,
            preview: config.preview_preprocessing && config.preprocessing_enabled(),
            style: Arc::new(AnnotationStyle::load(config.label_font.as_deref())),
            progress: config.progress_callback.clone(),
            total_pages,
        }
    }
}

/// Everything one page contributes to the request's outputs.
#[derive(Debug)]
pub struct ProcessedPage {
    pub page: Page,
    pub annotated: AnnotatedPage,
    /// Set when `preview_preprocessing` is on and preprocessing ran.
    pub preview: Option<AnnotatedPage>,
}

fn internal(e: TransitionError) -> DetectError {
    DetectError::Internal(e.to_string())
}

async fn blocking<T, F>(what: &str, f: F) -> Result<T, DetectError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DetectError::Internal(format!("{what} task panicked: {e}")))
}

/// One gated detector invocation.
pub async fn run_detector(ctx: &PageContext, image: Arc<RgbImage>) -> Result<Vec<Detection>, DetectorError> {
    let permit = Arc::clone(&ctx.gate)
        .acquire_owned()
        .await
        .map_err(|_| DetectorError::Inference("inference gate closed".into()))?;
    let detector = Arc::clone(&ctx.detector);
    let params = ctx.params;

    let task = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        detector.detect(&image, &params)
    });
    let joined = match ctx.inference_timeout {
        Some(limit) => tokio::time::timeout(limit, task)
            .await
            .map_err(|_| DetectorError::Timeout {
                millis: limit.as_millis() as u64,
            })?,
        None => task.await,
    };
    joined.map_err(|e| DetectorError::Inference(format!("detector task panicked: {e}")))?
}

/// Process one rendered page (or carry its render failure through).
pub async fn process_page(ctx: Arc<PageContext>, rendered: RenderedPage) -> Result<ProcessedPage, DetectError> {
    let raster = match rendered {
        Ok(raster) => raster,
        Err(failure) => {
            if let Some(cb) = &ctx.progress {
                cb.on_page_error(failure.index, ctx.total_pages, &failure.error.to_string());
                cb.on_page_complete(failure.index, ctx.total_pages, 0);
            }
            let page = Page::render_failed(&failure);
            let blank = AnnotatedPage {
                index: page.index,
                page_size: page.page_size,
                image: None,
            };
            let preview = ctx.preview.then(|| blank.clone());
            return Ok(ProcessedPage {
                page,
                annotated: blank,
                preview,
            });
        }
    };
    process_raster(ctx, raster).await
}

async fn process_raster(ctx: Arc<PageContext>, raster: RasterPage) -> Result<ProcessedPage, DetectError> {
    let index = raster.index;
    let geometry = raster.geometry();
    let page_size = raster.page_size;
    let image = Arc::new(raster.image);
    let view = ViewInfo {
        width_px: image.width(),
        height_px: image.height(),
        scale_to_page: raster.scale_to_page,
    };
    if let Some(cb) = &ctx.progress {
        cb.on_page_start(index, ctx.total_pages);
    }

    // ── Pass 1: full page ────────────────────────────────────────────────
    let pass1 = run_detector(&ctx, Arc::clone(&image)).await;
    let state = PageState::new(index).finish_pass1(pass1).map_err(internal)?;

    // ── Pass 2: enhanced corner ──────────────────────────────────────────
    let (state, enhanced) = if ctx.preprocess.any() {
        let source = Arc::clone(&image);
        let options = ctx.preprocess;
        let enhanced = blocking("preprocess", move || enhance(&source, options)).await?;
        let state = match extract_corner(&enhanced.image, ctx.corner_fraction) {
            Ok(crop) => {
                let pass = if crop.is_full_image() {
                    SourcePass::Enhanced
                } else {
                    SourcePass::Corner
                };
                let offset = crop.offset_px;
                let result = run_detector(&ctx, Arc::new(crop.image)).await;
                state.record_pass2(pass, offset, result).map_err(internal)?
            }
            Err(e) => {
                warn!(page = index, "pass 2 skipped: {e}");
                state.skip_pass2(Pass2Skip::Corner(e)).map_err(internal)?
            }
        };
        (state, Some(enhanced))
    } else {
        (state.skip_pass2(Pass2Skip::Disabled).map_err(internal)?, None)
    };

    let merged = state
        .merge(&geometry, ctx.params.iou_threshold)
        .and_then(PageState::into_merged)
        .map_err(internal)?;

    for error in &merged.errors {
        warn!("{error}");
        if let Some(cb) = &ctx.progress {
            cb.on_page_error(index, ctx.total_pages, &error.to_string());
        }
    }

    // ── Annotation ───────────────────────────────────────────────────────
    let drawn = {
        let image = Arc::clone(&image);
        let detections = merged.detections.clone();
        let style = Arc::clone(&ctx.style);
        let scale = geometry.scale_to_page;
        blocking("annotate", move || annotate_page(&image, &detections, scale, &style)).await?
    };

    let preview = match (&enhanced, ctx.preview) {
        (Some(enhanced), true) => {
            let image = Arc::clone(&image);
            let enhanced_image = enhanced.image.clone();
            let techniques = enhanced.applied.clone();
            let style = Arc::clone(&ctx.style);
            let composed = blocking("preview", move || {
                comparison_image(&image, &enhanced_image, index, &techniques, &style)
            })
            .await?;
            Some(composed)
        }
        _ => None,
    };
    let preview = ctx.preview.then(|| AnnotatedPage {
        index,
        page_size: preview_page_size(page_size, preview.as_ref()),
        image: preview,
    });

    let enhanced_view = enhanced.as_ref().map(|_| view);
    let detection_count = merged.detections.len();
    let page = Page::new(
        index,
        page_size,
        Some(view),
        enhanced_view,
        merged.detections,
        PageStatus {
            render_error: None,
            detector_errors: merged.errors,
            pass2: merged.pass2,
        },
    );
    if let Some(cb) = &ctx.progress {
        cb.on_page_complete(index, ctx.total_pages, detection_count);
    }

    Ok(ProcessedPage {
        page,
        annotated: AnnotatedPage {
            index,
            page_size,
            image: Some(drawn),
        },
        preview,
    })
}

/// Comparison pages keep the source page's height and widen to the
/// composed image's aspect ratio.
fn preview_page_size(page_size: PageSize, image: Option<&RgbImage>) -> PageSize {
    match image {
        Some(img) if img.height() > 0 => PageSize {
            width: page_size.height * img.width() as f32 / img.height() as f32,
            height: page_size.height,
        },
        _ => page_size,
    }
}
