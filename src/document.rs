//! Page and document model.
//!
//! A [`RasterPage`] is what rendering hands to detection; a [`Page`] is what
//! detection hands to reporting. Once a `Page` is built its detection list is
//! fixed: callers read it through [`Page::detections`].

use crate::config::DetectionConfig;
use crate::detector::Detection;
use crate::error::PageError;
use crate::pipeline::merge::PageGeometry;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Page size in PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    /// US Letter; the size used when a page's own size cannot be read.
    pub const LETTER: PageSize = PageSize {
        width: 612.0,
        height: 792.0,
    };
}

/// One rasterised page, ready for detection.
#[derive(Debug, Clone)]
pub struct RasterPage {
    /// 1-based position in the source document.
    pub index: usize,
    pub image: RgbImage,
    /// Page points per pixel of `image`.
    pub scale_to_page: f32,
    pub page_size: PageSize,
}

impl RasterPage {
    /// `scale_to_page` is derived from the page width and the raster width.
    pub fn new(index: usize, image: RgbImage, page_size: PageSize) -> Self {
        let scale_to_page = if image.width() > 0 {
            page_size.width / image.width() as f32
        } else {
            1.0
        };
        Self {
            index,
            image,
            scale_to_page,
            page_size,
        }
    }

    pub fn geometry(&self) -> PageGeometry {
        PageGeometry {
            scale_to_page: self.scale_to_page,
            width_pt: self.page_size.width,
            height_pt: self.page_size.height,
        }
    }
}

/// A page that could not be rasterised.
#[derive(Debug, Clone)]
pub struct RenderFailure {
    pub index: usize,
    /// Known when pdfium could read the page box but not render it.
    pub page_size: Option<PageSize>,
    pub error: PageError,
}

/// Output of the rendering stage for one page.
pub type RenderedPage = Result<RasterPage, RenderFailure>;

/// Dimensions of one derived view of a page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewInfo {
    pub width_px: u32,
    pub height_px: u32,
    pub scale_to_page: f32,
}

/// What happened to the second pass on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Pass2Outcome {
    /// Preprocessing was off for the request.
    NotRequested,
    /// Pass 2 ran; `detections` is the number of QR candidates it returned.
    Completed { detections: usize },
    /// Pass 2 was requested but did not produce results.
    Skipped { reason: String },
}

/// Per-page failure record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageStatus {
    pub render_error: Option<PageError>,
    pub detector_errors: Vec<PageError>,
    pub pass2: Pass2Outcome,
}

impl PageStatus {
    pub fn ok(pass2: Pass2Outcome) -> Self {
        Self {
            render_error: None,
            detector_errors: Vec::new(),
            pass2,
        }
    }

    pub fn render_failed(&self) -> bool {
        self.render_error.is_some()
    }

    pub fn detector_failed(&self) -> bool {
        !self.detector_errors.is_empty()
    }

    pub fn pass2_skipped(&self) -> bool {
        matches!(self.pass2, Pass2Outcome::Skipped { .. })
    }

    /// All recorded errors, render error first.
    pub fn errors(&self) -> impl Iterator<Item = &PageError> {
        self.render_error.iter().chain(self.detector_errors.iter())
    }
}

/// One processed page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based position in the source document.
    pub index: usize,
    pub page_size: PageSize,
    /// Absent when rendering failed.
    pub original: Option<ViewInfo>,
    /// Present when preprocessing ran on this page.
    pub enhanced: Option<ViewInfo>,
    detections: Vec<Detection>,
    pub status: PageStatus,
}

impl Page {
    pub fn new(
        index: usize,
        page_size: PageSize,
        original: Option<ViewInfo>,
        enhanced: Option<ViewInfo>,
        detections: Vec<Detection>,
        status: PageStatus,
    ) -> Self {
        Self {
            index,
            page_size,
            original,
            enhanced,
            detections,
            status,
        }
    }

    /// A page that failed to render: zero detections, failure recorded.
    pub fn render_failed(failure: &RenderFailure) -> Self {
        Self {
            index: failure.index,
            page_size: failure.page_size.unwrap_or(PageSize::LETTER),
            original: None,
            enhanced: None,
            detections: Vec::new(),
            status: PageStatus {
                render_error: Some(failure.error.clone()),
                detector_errors: Vec::new(),
                pass2: Pass2Outcome::NotRequested,
            },
        }
    }

    /// Merged detections in page space.
    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }
}

/// A processed document: every page in source order plus the configuration
/// that produced them.
#[derive(Debug, Clone)]
pub struct Document {
    pub config: DetectionConfig,
    pages: Vec<Page>,
}

impl Document {
    /// Pages may arrive in any order; they are stored sorted by index.
    pub fn new(config: DetectionConfig, mut pages: Vec<Page>) -> Self {
        pages.sort_by_key(|p| p.index);
        Self { config, pages }
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn total_detections(&self) -> usize {
        self.pages.iter().map(|p| p.detections.len()).sum()
    }
}

/// Metadata extracted from a PDF without running detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}
