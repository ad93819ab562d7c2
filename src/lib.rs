//! # edgequake-pdfdetect
//!
//! Locate signatures, stamps and QR codes in PDF documents.
//!
//! ## Why this crate?
//!
//! Scanned contracts, invoices and certificates carry their legally relevant
//! marks as pixels, not text: a signature, a company stamp, a QR code printed
//! in a corner. This crate rasterises every page, runs an object detector over
//! it, and returns an annotated copy of the PDF together with a JSON report of
//! what was found where, in PDF page coordinates.
//!
//! Small QR codes tend to hide in the bottom-right corner of a page. When any
//! preprocessing toggle is set, a second pass runs on an enhanced crop of that
//! corner and its QR findings are merged with the full-page pass.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL, validate %PDF
//!  ├─ 2. Render    rasterise pages via pdfium (spawn_blocking)
//!  ├─ 3. Detect    pass 1 on the page, pass 2 on the enhanced corner
//!  ├─ 4. Merge     map to page points, cross-pass duplicate suppression
//!  ├─ 5. Annotate  coloured boxes + labels on the original raster
//!  └─ 6. Output    annotated PDF + Report (JSON)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "onnx")]
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use edgequake_pdfdetect::{detect_file, DetectionConfig, OnnxDetector};
//! use std::sync::Arc;
//!
//! let detector = Arc::new(OnnxDetector::new("models/yolov8s.onnx", Default::default())?);
//! let config = DetectionConfig::builder().use_denoise(true).build()?;
//! let output = detect_file("contract.pdf", detector, &config).await?;
//! std::fs::write("contract.annotated.pdf", &output.pdf)?;
//! println!("{}", output.report.to_json()?);
//! # Ok(())
//! # }
//! ```
//!
//! Any type implementing [`Detector`] can stand in for the ONNX model.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | CLI-only deps (clap + anyhow + tracing-subscriber + indicatif) |
//! | `onnx`  | off     | [`OnnxDetector`] via ONNX Runtime; the `pdfdetect` binary needs `cli` + `onnx` |
//!
//! Library users bringing their own detector can drop both:
//! ```toml
//! edgequake-pdfdetect = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod detect;
pub mod detector;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DetectionConfig, DetectionConfigBuilder};
pub use detect::{
    analyze_pages, detect_document, detect_file, detect_sync, detect_to_files, inspect, AnalyzedDocument,
    OutputPaths,
};
#[cfg(feature = "onnx")]
pub use detector::onnx::{OnnxDetector, OnnxDetectorConfig};
pub use detector::{
    BoundingBox, DetectParams, Detection, DetectionClass, Detector, DetectorError, SourcePass,
};
pub use document::{Document, DocumentMetadata, Page, PageSize, PageStatus, RasterPage, RenderFailure, RenderedPage};
pub use error::{DetectError, PageError};
pub use output::{DetectionOutput, DetectionStats};
pub use progress::{DetectionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use report::Report;
pub use stream::{analyze_stream, detect_stream, detect_stream_from_bytes, PageStream};
