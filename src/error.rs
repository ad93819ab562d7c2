//! Error types for the edgequake-pdfdetect library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DetectError`]: **Fatal**: the request cannot produce a valid result
//!   (unreadable input, annotated document could not be assembled, request
//!   timed out). Returned as `Err(DetectError)` from the top-level `detect*`
//!   functions; no partial report is produced.
//!
//! * [`PageError`]: **Non-fatal**: one page failed to rasterise, or one
//!   detector pass failed on one page. Stored on the page itself
//!   ([`crate::document::PageStatus`]) and surfaced in the report, while the
//!   remaining pages are still processed.

use crate::detector::SourcePass;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdfdetect library.
///
/// Page-level failures use [`PageError`] and are recorded on the page rather
/// than propagated here.
#[derive(Debug, Error)]
pub enum DetectError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read, but they are not a PDF.
    #[error("Input '{source_name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { source_name: String, magic: [u8; 4] },

    /// The input exceeds the accepted upload size.
    #[error("Input '{source_name}' is {size} bytes; the limit is {limit} bytes")]
    TooLarge {
        source_name: String,
        size: u64,
        limit: u64,
    },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The byte stream is not a readable document, or a requested page index
    /// does not exist.
    #[error("Cannot read PDF document: {detail}")]
    DocumentRead { detail: String },

    /// The annotated output document could not be produced.
    #[error("Failed to assemble annotated PDF: {detail}")]
    Assembly { detail: String },

    // ── Request errors ────────────────────────────────────────────────────
    /// The request did not finish within the caller-specified budget.
    #[error("Detection timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium (or the directory containing it),\n\
or install pdfium as a system library.\n"
    )]
    PdfiumBindingFailed(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::document::PageStatus`]; the request continues.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageError {
    /// Page rasterisation failed; the page carries zero detections.
    #[error("Page {page}: rasterisation failed: {detail}")]
    PageRender { page: usize, detail: String },

    /// One detector pass failed or timed out on this page.
    #[error("Page {page}: {pass} pass failed: {detail}")]
    Detector {
        page: usize,
        pass: SourcePass,
        detail: String,
    },
}

impl PageError {
    /// 1-based page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::PageRender { page, .. } | PageError::Detector { page, .. } => *page,
        }
    }
}
