//! Progress-callback trait for per-page detection events.
//!
//! Inject an [`Arc<dyn DetectionProgressCallback>`] via
//! [`crate::config::DetectionConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through each page.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a progress bar, a job table or a broadcast
//! channel without the library knowing how the host application talks. The
//! trait is `Send + Sync` because pages are processed concurrently.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdfdetect::{DetectionConfig, DetectionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl DetectionProgressCallback for Counter {
//!     fn on_page_complete(&self, _page: usize, _total: usize, detections: usize) {
//!         self.0.fetch_add(detections, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = DetectionConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the detection pipeline as it processes each page.
///
/// All methods default to no-ops so callers only override what they need.
///
/// # Thread safety
///
/// `on_page_start`, `on_page_complete` and `on_page_error` may be called
/// concurrently from different tasks when `page_concurrency > 1`.
pub trait DetectionProgressCallback: Send + Sync {
    /// Called once after rasterisation, before any detector pass.
    fn on_document_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called before pass 1 runs on a page.
    ///
    /// # Arguments
    /// * `page_num`   : 1-indexed page number
    /// * `total_pages`: total pages in the document
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page has been merged and annotated.
    ///
    /// # Arguments
    /// * `detections`: number of merged detections on the page
    fn on_page_complete(&self, page_num: usize, total_pages: usize, detections: usize) {
        let _ = (page_num, total_pages, detections);
    }

    /// Called when a page recorded a render or detector failure.
    ///
    /// The page still completes (with whatever detections survived), so
    /// `on_page_complete` follows for the same page.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page has been attempted.
    fn on_document_complete(&self, total_pages: usize, total_detections: usize) {
        let _ = (total_pages, total_detections);
    }
}

/// No-op callback, used when none is configured.
pub struct NoopProgressCallback;

impl DetectionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DetectionConfig`].
pub type ProgressCallback = Arc<dyn DetectionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        starts: AtomicUsize,
        detections: AtomicUsize,
        errors: AtomicUsize,
        total: AtomicUsize,
    }

    impl DetectionProgressCallback for Tracking {
        fn on_document_start(&self, total_pages: usize) {
            self.total.store(total_pages, Ordering::SeqCst);
        }

        fn on_page_start(&self, _page_num: usize, _total_pages: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page_num: usize, _total_pages: usize, detections: usize) {
            self.detections.fetch_add(detections, Ordering::SeqCst);
        }

        fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_document_start(2);
        cb.on_page_start(1, 2);
        cb.on_page_complete(1, 2, 3);
        cb.on_page_error(2, 2, "render failed");
        cb.on_document_complete(2, 3);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = Tracking::default();
        tracker.on_document_start(2);
        tracker.on_page_start(1, 2);
        tracker.on_page_complete(1, 2, 2);
        tracker.on_page_start(2, 2);
        tracker.on_page_error(2, 2, "detector failed");
        tracker.on_page_complete(2, 2, 0);

        assert_eq!(tracker.total.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.detections.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_document_start(1);
        cb.on_page_complete(1, 1, 0);
    }
}
