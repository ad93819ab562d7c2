//! Configuration types for PDF object detection.
//!
//! Every knob of a request lives in [`DetectionConfig`], built via
//! [`DetectionConfigBuilder`]. One struct means a config can be shared across
//! page tasks, echoed into the report, and diffed between two runs.
//!
//! # Design choice: builder over constructor
//! Callers set only what they care about and rely on documented defaults for
//! the rest. Numeric knobs whose out-of-range values have an obvious nearest
//! valid value (DPI, concurrency) are clamped by the setter; thresholds are
//! validated in [`DetectionConfigBuilder::build`] and rejected, because
//! silently moving a confidence threshold changes results.

use crate::detector::DetectParams;
use crate::error::DetectError;
use crate::pipeline::corner::DEFAULT_CORNER_FRACTION;
use crate::pipeline::preprocess::PreprocessOptions;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Largest `max_detections` a request may ask for.
pub const MAX_DETECTIONS_LIMIT: usize = 1000;

/// Configuration for one detection request.
///
/// # Example
/// ```rust
/// use edgequake_pdfdetect::DetectionConfig;
///
/// let config = DetectionConfig::builder()
///     .confidence_threshold(0.4)
///     .use_denoise(true)
///     .build()
///     .unwrap();
/// assert!(config.two_pass_mode());
/// ```
#[derive(Clone)]
pub struct DetectionConfig {
    /// Minimum confidence for a candidate to be kept. Range: (0, 1). Default: 0.5.
    pub confidence_threshold: f32,

    /// Overlap above which same-class candidates are duplicates. Range: (0, 1). Default: 0.45.
    pub iou_threshold: f32,

    /// Cap on detections per detector invocation. Range: 1–1000. Default: 100.
    pub max_detections: usize,

    /// Contrast-limited adaptive histogram equalisation on luminance. Default: false.
    pub use_clahe: bool,

    /// Edge-preserving bilateral smoothing. Default: false.
    pub use_denoise: bool,

    /// Gaussian adaptive binarisation. Default: false.
    pub use_threshold: bool,

    /// Rasterisation density. Range: 72–400. Default: 144.
    ///
    /// 144 DPI is a 2× render of the page's point grid, enough for a
    /// 640-pixel detector input to still see pen strokes on A4.
    pub dpi: u32,

    /// Cap on either rendered dimension in pixels. Default: 2400.
    ///
    /// An A0 poster at 144 DPI would be a 4 700 × 6 700 raster; the cap keeps
    /// memory bounded and is reflected in each page's `scale_to_page`.
    pub max_rendered_pixels: u32,

    /// Fraction of width and height taken for the pass-2 corner crop. Range: (0, 1]. Default: 0.10.
    pub corner_fraction: f32,

    /// Pages processed concurrently. Default: 4.
    pub page_concurrency: usize,

    /// Detector invocations allowed in flight at once. Default: 1.
    ///
    /// Model backends are not assumed reentrant; raise this only for a
    /// detector that documents thread-safe inference.
    pub max_concurrent_inferences: usize,

    /// Whole-request budget, including rendering and assembly. Default: none.
    pub timeout: Option<Duration>,

    /// Budget for a single detector invocation. Default: none.
    pub inference_timeout: Option<Duration>,

    /// Also produce a side-by-side original/enhanced comparison PDF. Default: false.
    pub preview_preprocessing: bool,

    /// TrueType/OpenType font for box labels. Default: search system fonts.
    pub label_font: Option<PathBuf>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            max_detections: 100,
            use_clahe: false,
            use_denoise: false,
            use_threshold: false,
            dpi: 144,
            max_rendered_pixels: 2400,
            corner_fraction: DEFAULT_CORNER_FRACTION,
            page_concurrency: 4,
            max_concurrent_inferences: 1,
            timeout: None,
            inference_timeout: None,
            preview_preprocessing: false,
            label_font: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DetectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectionConfig")
            .field("confidence_threshold", &self.confidence_threshold)
            .field("iou_threshold", &self.iou_threshold)
            .field("max_detections", &self.max_detections)
            .field("use_clahe", &self.use_clahe)
            .field("use_denoise", &self.use_denoise)
            .field("use_threshold", &self.use_threshold)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("corner_fraction", &self.corner_fraction)
            .field("page_concurrency", &self.page_concurrency)
            .field("max_concurrent_inferences", &self.max_concurrent_inferences)
            .field("timeout", &self.timeout)
            .field("inference_timeout", &self.inference_timeout)
            .field("preview_preprocessing", &self.preview_preprocessing)
            .field("label_font", &self.label_font)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn DetectionProgressCallback>"),
            )
            .finish()
    }
}

impl DetectionConfig {
    /// Create a new builder for `DetectionConfig`.
    pub fn builder() -> DetectionConfigBuilder {
        DetectionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Preprocessing toggles as one value.
    pub fn preprocess_options(&self) -> PreprocessOptions {
        PreprocessOptions {
            clahe: self.use_clahe,
            denoise: self.use_denoise,
            binarize: self.use_threshold,
        }
    }

    /// True when any preprocessing toggle is on.
    pub fn preprocessing_enabled(&self) -> bool {
        self.preprocess_options().any()
    }

    /// Pass 2 runs exactly when preprocessing is enabled.
    pub fn two_pass_mode(&self) -> bool {
        self.preprocessing_enabled()
    }

    /// Thresholds handed to every detector invocation.
    pub fn detect_params(&self) -> DetectParams {
        DetectParams {
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
            max_detections: self.max_detections,
        }
    }
}

/// Builder for [`DetectionConfig`].
#[derive(Debug)]
pub struct DetectionConfigBuilder {
    config: DetectionConfig,
}

impl DetectionConfigBuilder {
    pub fn confidence_threshold(mut self, t: f32) -> Self {
        self.config.confidence_threshold = t;
        self
    }

    pub fn iou_threshold(mut self, t: f32) -> Self {
        self.config.iou_threshold = t;
        self
    }

    pub fn max_detections(mut self, n: usize) -> Self {
        self.config.max_detections = n;
        self
    }

    pub fn use_clahe(mut self, v: bool) -> Self {
        self.config.use_clahe = v;
        self
    }

    pub fn use_denoise(mut self, v: bool) -> Self {
        self.config.use_denoise = v;
        self
    }

    pub fn use_threshold(mut self, v: bool) -> Self {
        self.config.use_threshold = v;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn corner_fraction(mut self, fraction: f32) -> Self {
        self.config.corner_fraction = fraction;
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn max_concurrent_inferences(mut self, n: usize) -> Self {
        self.config.max_concurrent_inferences = n.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn timeout_secs(self, secs: u64) -> Self {
        self.timeout(Duration::from_secs(secs))
    }

    pub fn inference_timeout(mut self, timeout: Duration) -> Self {
        self.config.inference_timeout = Some(timeout);
        self
    }

    pub fn preview_preprocessing(mut self, v: bool) -> Self {
        self.config.preview_preprocessing = v;
        self
    }

    pub fn label_font(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.label_font = Some(path.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DetectionConfig, DetectError> {
        let c = &self.config;
        if !(c.confidence_threshold > 0.0 && c.confidence_threshold < 1.0) {
            return Err(DetectError::InvalidConfig(format!(
                "confidence_threshold must be in (0, 1), got {}",
                c.confidence_threshold
            )));
        }
        if !(c.iou_threshold > 0.0 && c.iou_threshold < 1.0) {
            return Err(DetectError::InvalidConfig(format!(
                "iou_threshold must be in (0, 1), got {}",
                c.iou_threshold
            )));
        }
        if c.max_detections == 0 || c.max_detections > MAX_DETECTIONS_LIMIT {
            return Err(DetectError::InvalidConfig(format!(
                "max_detections must be 1–{MAX_DETECTIONS_LIMIT}, got {}",
                c.max_detections
            )));
        }
        if !(c.corner_fraction > 0.0 && c.corner_fraction <= 1.0) {
            return Err(DetectError::InvalidConfig(format!(
                "corner_fraction must be in (0, 1], got {}",
                c.corner_fraction
            )));
        }
        if c.timeout.is_some_and(|t| t.is_zero()) {
            return Err(DetectError::InvalidConfig("timeout must be > 0".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_single_pass() {
        let config = DetectionConfig::builder().build().unwrap();
        assert_eq!(config.dpi, 144);
        assert_eq!(config.max_detections, 100);
        assert!(!config.preprocessing_enabled());
        assert!(!config.two_pass_mode());
    }

    #[test]
    fn any_toggle_enables_two_pass() {
        for (clahe, denoise, threshold) in [(true, false, false), (false, true, false), (false, false, true)] {
            let config = DetectionConfig::builder()
                .use_clahe(clahe)
                .use_denoise(denoise)
                .use_threshold(threshold)
                .build()
                .unwrap();
            assert!(config.two_pass_mode());
        }
    }

    #[test]
    fn dpi_is_clamped() {
        let config = DetectionConfig::builder().dpi(10).build().unwrap();
        assert_eq!(config.dpi, 72);
        let config = DetectionConfig::builder().dpi(9000).build().unwrap();
        assert_eq!(config.dpi, 400);
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        assert!(DetectionConfig::builder().confidence_threshold(0.0).build().is_err());
        assert!(DetectionConfig::builder().confidence_threshold(1.2).build().is_err());
        assert!(DetectionConfig::builder().iou_threshold(1.0).build().is_err());
        assert!(DetectionConfig::builder().confidence_threshold(f32::NAN).build().is_err());
    }

    #[test]
    fn rejects_max_detections_outside_limit() {
        assert!(DetectionConfig::builder().max_detections(0).build().is_err());
        assert!(DetectionConfig::builder().max_detections(1001).build().is_err());
        assert!(DetectionConfig::builder().max_detections(1000).build().is_ok());
    }

    #[test]
    fn rejects_bad_corner_fraction() {
        assert!(DetectionConfig::builder().corner_fraction(0.0).build().is_err());
        assert!(DetectionConfig::builder().corner_fraction(1.5).build().is_err());
        assert!(DetectionConfig::builder().corner_fraction(1.0).build().is_ok());
    }

    #[test]
    fn detect_params_mirror_thresholds() {
        let config = DetectionConfig::builder()
            .confidence_threshold(0.3)
            .iou_threshold(0.6)
            .max_detections(7)
            .build()
            .unwrap();
        let params = config.detect_params();
        assert_eq!(params.confidence_threshold, 0.3);
        assert_eq!(params.iou_threshold, 0.6);
        assert_eq!(params.max_detections, 7);
    }

    #[test]
    fn debug_lists_every_setting_but_hides_the_callback() {
        struct Silent;
        impl crate::progress::DetectionProgressCallback for Silent {}

        let config = DetectionConfig::builder()
            .inference_timeout(Duration::from_millis(750))
            .label_font("/fonts/DejaVuSans.ttf")
            .download_timeout_secs(45)
            .progress_callback(std::sync::Arc::new(Silent))
            .build()
            .unwrap();
        let text = format!("{config:?}");

        assert!(text.contains("inference_timeout: Some(750ms)"), "got: {text}");
        assert!(text.contains("label_font: Some(\"/fonts/DejaVuSans.ttf\")"), "got: {text}");
        assert!(text.contains("download_timeout_secs: 45"), "got: {text}");
        assert!(text.contains("timeout: None"), "got: {text}");
        assert!(text.contains("<dyn DetectionProgressCallback>"), "got: {text}");
    }
}
