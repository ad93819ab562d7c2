//! End-to-end tests through pdfium.
//!
//! Fixture PDFs are built in-process (synthetic page images written with the
//! crate's own assembler), so no test files are needed, only a pdfium
//! library. The tests are gated behind the `E2E_ENABLED` environment variable
//! so they do not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=. cargo test --test e2e -- --nocapture

use edgequake_pdfdetect::pipeline::assemble::{assemble, AnnotatedPage};
use edgequake_pdfdetect::pipeline::render::{rasterize, render_document};
use edgequake_pdfdetect::{
    detect_document, detect_stream_from_bytes, detect_sync, detect_to_files, inspect, BoundingBox, DetectError,
    DetectParams, Detection, DetectionClass, DetectionConfig, Detector, DetectorError, OutputPaths, PageSize,
};
use futures::StreamExt;
use image::{Rgb, RgbImage};
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip this test unless E2E_ENABLED is set.
macro_rules! e2e_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    }};
}

/// A white page with a dark block in the bottom-right corner.
fn page_image(width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    for y in height - height / 20..height - 4 {
        for x in width - width / 20..width - 4 {
            img.put_pixel(x, y, Rgb([10, 10, 10]));
        }
    }
    img
}

/// `pages` Letter-sized pages as PDF bytes.
fn fixture_pdf(pages: usize) -> Vec<u8> {
    let pages: Vec<AnnotatedPage> = (1..=pages)
        .map(|index| AnnotatedPage {
            index,
            page_size: PageSize::LETTER,
            image: Some(page_image(612, 792)),
        })
        .collect();
    assemble(&pages).expect("fixture assembly should succeed")
}

/// One signature in the top-left tenth of whatever image it sees.
struct CornerSignature;

impl Detector for CornerSignature {
    fn detect(&self, image: &RgbImage, _: &DetectParams) -> Result<Vec<Detection>, DetectorError> {
        let (w, h) = (image.width() as f32, image.height() as f32);
        Ok(vec![Detection::new(
            DetectionClass::Signature,
            0.88,
            BoundingBox::new(w * 0.05, h * 0.05, w * 0.15, h * 0.10),
        )])
    }
}

// ── Rendering ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_render_scale_follows_dpi() {
    e2e_skip_unless_ready!();
    let pdf = fixture_pdf(1);

    let pages = render_document(Arc::new(pdf), 144, 2400).await.unwrap();
    let page = pages[0].as_ref().expect("page should render");
    assert_eq!(page.image.width(), 1224);
    assert_eq!(page.image.height(), 1584);
    assert!((page.scale_to_page - 0.5).abs() < 1e-4);
    assert_eq!(page.page_size, PageSize::LETTER);
}

#[tokio::test]
async fn test_render_respects_pixel_cap() {
    e2e_skip_unless_ready!();
    let pdf = fixture_pdf(1);

    let pages = render_document(Arc::new(pdf), 400, 1000).await.unwrap();
    let page = pages[0].as_ref().unwrap();
    assert!(page.image.width().max(page.image.height()) <= 1000);
    assert!((page.image.width() as f32 * page.scale_to_page - 612.0).abs() < 2.0);
}

#[test]
fn test_rasterize_out_of_range_page() {
    e2e_skip_unless_ready!();
    let pdf = fixture_pdf(2);

    let err = rasterize(&pdf, 3, 72, 2400).unwrap_err();
    assert!(matches!(err, DetectError::DocumentRead { .. }));
    assert!(rasterize(&pdf, 2, 72, 2400).is_ok());
}

#[tokio::test]
async fn test_garbage_after_magic_is_document_read_error() {
    e2e_skip_unless_ready!();
    let err = detect_document(
        b"%PDF-1.7\nthis is not a pdf".to_vec(),
        Arc::new(CornerSignature),
        &DetectionConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DetectError::DocumentRead { .. }), "got {err:?}");
}

// ── Inspect ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inspect_fixture() {
    e2e_skip_unless_ready!();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("three.pdf");
    std::fs::write(&path, fixture_pdf(3)).unwrap();

    let meta = inspect(path.to_str().unwrap()).await.expect("inspect() should succeed");
    assert_eq!(meta.page_count, 3);
    assert!(!meta.pdf_version.is_empty());
}

#[tokio::test]
async fn test_inspect_nonexistent() {
    let err = inspect("/definitely/not/here.pdf").await.unwrap_err();
    assert!(matches!(err, DetectError::FileNotFound { .. }));
}

// ── Full pipeline ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_detect_document_two_pages() {
    e2e_skip_unless_ready!();
    let pdf = fixture_pdf(2);

    let output = detect_document(pdf, Arc::new(CornerSignature), &DetectionConfig::default())
        .await
        .expect("detection should succeed");

    assert!(output.pdf.starts_with(b"%PDF"));
    assert!(output.preview_pdf.is_none());
    assert_eq!(output.report.total_pages, 2);
    assert_eq!(output.report.total_detections, 2);
    assert!(output.report.durations.is_some());

    // Signature sits at 5–15 % × 5–10 % of the page in points.
    let sig = &output.document.pages()[0].detections()[0];
    assert!((sig.bbox.x1 - 30.6).abs() < 1.0, "{:?}", sig.bbox);
    assert!((sig.bbox.y2 - 79.2).abs() < 1.0, "{:?}", sig.bbox);

    // The annotated document keeps page count and size.
    let meta_pages = render_document(Arc::new(output.pdf), 72, 2400).await.unwrap();
    assert_eq!(meta_pages.len(), 2);
    assert_eq!(meta_pages[1].as_ref().unwrap().page_size, PageSize::LETTER);
}

#[tokio::test]
async fn test_detect_to_files_writes_pdf_report_and_preview() {
    e2e_skip_unless_ready!();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scan.pdf");
    std::fs::write(&input, fixture_pdf(1)).unwrap();

    let outputs = OutputPaths {
        pdf: dir.path().join("out/scan.annotated.pdf"),
        report: Some(dir.path().join("out/scan.json")),
        preview: Some(dir.path().join("out/scan.preview.pdf")),
    };
    let config = DetectionConfig::builder()
        .use_clahe(true)
        .use_threshold(true)
        .preview_preprocessing(true)
        .build()
        .unwrap();

    let output = detect_to_files(input.to_str().unwrap(), &outputs, Arc::new(CornerSignature), &config)
        .await
        .expect("detect_to_files should succeed");

    assert!(std::fs::read(&outputs.pdf).unwrap().starts_with(b"%PDF"));
    assert!(std::fs::read(outputs.preview.as_ref().unwrap())
        .unwrap()
        .starts_with(b"%PDF"));
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(outputs.report.as_ref().unwrap()).unwrap()).unwrap();
    assert_eq!(json["total_pages"], 1);
    assert_eq!(json["preprocessing"]["two_pass_mode"], true);
    assert!(json["durations"]["total_duration_ms"].is_u64());
    assert!(output.preview_pdf.is_some());
}

#[tokio::test]
async fn test_stream_from_bytes() {
    e2e_skip_unless_ready!();
    let stream = detect_stream_from_bytes(fixture_pdf(3), Arc::new(CornerSignature), &DetectionConfig::default())
        .await
        .unwrap();
    let pages: Vec<_> = stream.collect().await;
    assert_eq!(pages.len(), 3);
    assert!(pages.iter().all(|p| p.as_ref().unwrap().detections().len() == 1));
}

#[test]
fn test_detect_sync() {
    e2e_skip_unless_ready!();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sync.pdf");
    std::fs::write(&input, fixture_pdf(1)).unwrap();

    let output = detect_sync(input.to_str().unwrap(), Arc::new(CornerSignature), &DetectionConfig::default())
        .expect("detect_sync should succeed");
    assert_eq!(output.report.total_pages, 1);
}
