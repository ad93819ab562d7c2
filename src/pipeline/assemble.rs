//! Build the output PDF from annotated page images.
//!
//! Each output page has its source page's size in points and carries exactly
//! one image object scaled to fill it, so a viewer shows the annotated raster
//! at the original physical size. Pages that failed to render become blank
//! pages of the same size, keeping output page N aligned with input page N.

use crate::document::PageSize;
use crate::error::DetectError;
use crate::pipeline::render::bind_pdfium;
use image::{DynamicImage, RgbImage};
use pdfium_render::prelude::*;
use tracing::debug;

/// One page of the output document.
#[derive(Debug, Clone)]
pub struct AnnotatedPage {
    pub index: usize,
    pub page_size: PageSize,
    /// `None` for pages that could not be rendered.
    pub image: Option<RgbImage>,
}

fn assembly_error(e: PdfiumError) -> DetectError {
    DetectError::Assembly {
        detail: format!("{e:?}"),
    }
}

/// Serialise `pages`, in the given order, into a new PDF.
///
/// Blocking; call from `spawn_blocking` inside async code.
pub fn assemble(pages: &[AnnotatedPage]) -> Result<Vec<u8>, DetectError> {
    let pdfium = bind_pdfium()?;
    let mut document = pdfium.create_new_pdf().map_err(assembly_error)?;

    for annotated in pages {
        let width = PdfPoints::new(annotated.page_size.width);
        let height = PdfPoints::new(annotated.page_size.height);
        let mut page = document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::Custom(width, height))
            .map_err(assembly_error)?;

        if let Some(image) = &annotated.image {
            let dynamic = DynamicImage::ImageRgb8(image.clone());
            page.objects_mut()
                .create_image_object(PdfPoints::ZERO, PdfPoints::ZERO, &dynamic, Some(width), Some(height))
                .map_err(assembly_error)?;
        }
        debug!(page = annotated.index, "assembled page");
    }

    document.save_to_bytes().map_err(assembly_error)
}
