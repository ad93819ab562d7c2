//! PDF rasterisation via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and keeps
//! internal state that must not be touched from async worker threads.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so the
//! runtime keeps scheduling detector tasks while pages render.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Page sizes vary wildly: an A0 poster at 144 DPI is a 4 700 × 6 700 raster.
//! `max_rendered_pixels` caps the longest edge regardless of physical size.
//! The effective scale is what ends up in each page's `scale_to_page`, so
//! detection coordinates stay correct whichever limit applied.

use crate::document::{DocumentMetadata, PageSize, RasterPage, RenderFailure, RenderedPage};
use crate::error::{DetectError, PageError};
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Environment variable naming a pdfium shared library, or its directory.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Bind to pdfium: `PDFIUM_LIB_PATH` first, then the working directory,
/// then the system library search path.
pub fn bind_pdfium() -> Result<Pdfium, DetectError> {
    let bindings = match std::env::var_os(PDFIUM_LIB_PATH_ENV) {
        Some(value) => {
            let path = PathBuf::from(value);
            let library = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            Pdfium::bind_to_library(&library)
        }
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| DetectError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

/// Pixels per point for a page, honouring both `dpi` and the longest-edge cap.
pub fn render_scale(width_pt: f32, height_pt: f32, dpi: u32, max_rendered_pixels: u32) -> f32 {
    let scale = dpi as f32 / 72.0;
    let longest = width_pt.max(height_pt) * scale;
    if longest > max_rendered_pixels as f32 && longest > 0.0 {
        scale * max_rendered_pixels as f32 / longest
    } else {
        scale
    }
}

fn page_size_of(page: &PdfPage) -> PageSize {
    PageSize {
        width: page.width().value,
        height: page.height().value,
    }
}

fn open_document<'a>(pdfium: &'a Pdfium, bytes: &'a [u8]) -> Result<PdfDocument<'a>, DetectError> {
    pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| DetectError::DocumentRead {
            detail: format!("{e:?}"),
        })
}

fn render_one(
    page: &PdfPage,
    index: usize,
    dpi: u32,
    max_rendered_pixels: u32,
) -> Result<RasterPage, RenderFailure> {
    let page_size = page_size_of(page);
    let scale = render_scale(page_size.width, page_size.height, dpi, max_rendered_pixels);
    let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| RenderFailure {
            index,
            page_size: Some(page_size),
            error: PageError::PageRender {
                page: index,
                detail: format!("{e:?}"),
            },
        })?;
    let image = bitmap.as_image().to_rgb8();
    debug!(
        page = index,
        width = image.width(),
        height = image.height(),
        "rendered page"
    );
    Ok(RasterPage::new(index, image, page_size))
}

/// Rasterise one page (1-based `page_number`) of an in-memory PDF.
///
/// Blocking; call from `spawn_blocking` inside async code.
pub fn rasterize(
    document_bytes: &[u8],
    page_number: usize,
    dpi: u32,
    max_rendered_pixels: u32,
) -> Result<RasterPage, DetectError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, document_bytes)?;
    let pages = document.pages();
    let total = pages.len() as usize;
    if page_number == 0 || page_number > total {
        return Err(DetectError::DocumentRead {
            detail: format!("page {page_number} out of range (document has {total} pages)"),
        });
    }
    let page = pages
        .get((page_number - 1) as PdfPageIndex)
        .map_err(|e| DetectError::DocumentRead {
            detail: format!("{e:?}"),
        })?;
    render_one(&page, page_number, dpi, max_rendered_pixels).map_err(|f| DetectError::DocumentRead {
        detail: f.error.to_string(),
    })
}

/// Rasterise every page of a document.
///
/// An unreadable document is fatal; a page that fails to render becomes a
/// [`RenderFailure`] in its slot and the remaining pages still render.
pub async fn render_document(
    document_bytes: Arc<Vec<u8>>,
    dpi: u32,
    max_rendered_pixels: u32,
) -> Result<Vec<RenderedPage>, DetectError> {
    tokio::task::spawn_blocking(move || render_document_blocking(&document_bytes, dpi, max_rendered_pixels))
        .await
        .map_err(|e| DetectError::Internal(format!("Render task panicked: {e}")))?
}

fn render_document_blocking(
    bytes: &[u8],
    dpi: u32,
    max_rendered_pixels: u32,
) -> Result<Vec<RenderedPage>, DetectError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, bytes)?;
    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let rendered: Vec<RenderedPage> = pages
        .iter()
        .enumerate()
        .map(|(i, page)| {
            let result = render_one(&page, i + 1, dpi, max_rendered_pixels);
            if let Err(failure) = &result {
                warn!("{}", failure.error);
            }
            result
        })
        .collect();
    Ok(rendered)
}

/// Extract document metadata without rendering pages.
pub async fn extract_metadata(document_bytes: Arc<Vec<u8>>) -> Result<DocumentMetadata, DetectError> {
    tokio::task::spawn_blocking(move || extract_metadata_blocking(&document_bytes))
        .await
        .map_err(|e| DetectError::Internal(format!("Metadata task panicked: {e}")))?
}

fn extract_metadata_blocking(bytes: &[u8]) -> Result<DocumentMetadata, DetectError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, bytes)?;
    let metadata = document.metadata();

    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata
            .get(tag)
            .map(|t| t.value().to_string())
            .filter(|v| !v.is_empty())
    };

    Ok(DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        page_count: document.pages().len() as usize,
        pdf_version: format!("{:?}", document.version()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_at_144_dpi_is_twice_the_point_grid() {
        let scale = render_scale(612.0, 792.0, 144, 4000);
        assert!((scale - 2.0).abs() < 1e-6);
    }

    #[test]
    fn pixel_cap_limits_longest_edge() {
        let scale = render_scale(612.0, 792.0, 144, 1000);
        assert!((792.0 * scale - 1000.0).abs() < 0.01);
    }

    #[test]
    fn scale_to_page_is_inverse_of_render_scale() {
        let scale = render_scale(612.0, 792.0, 144, 4000);
        let raster = RasterPage::new(
            1,
            image::RgbImage::new((612.0 * scale) as u32, (792.0 * scale) as u32),
            PageSize {
                width: 612.0,
                height: 792.0,
            },
        );
        assert!((raster.scale_to_page * scale - 1.0).abs() < 1e-3);
    }
}
