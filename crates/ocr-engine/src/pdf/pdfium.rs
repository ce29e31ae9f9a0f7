use super::{PdfPages, PdfSource, RENDER_DPI};
use crate::{OcrError, Result};
use pdfium_render::prelude::*;
use std::path::Path;

const PDF_POINTS_PER_INCH: f32 = 72.0;

/// [`PdfSource`] backed by a system-installed pdfium library.
///
/// Pdfium is bound and the document opened once per [`with_document`](PdfSource::with_document)
/// call, so the source holds no library state and can be shared freely between threads.
#[derive(Debug, Clone, Copy)]
pub struct PdfiumSource {
    dpi: u32,
}

impl PdfiumSource {
    pub fn new() -> Self {
        Self { dpi: RENDER_DPI }
    }

    pub fn with_dpi(dpi: u32) -> Self {
        Self { dpi: dpi.max(1) }
    }

    /// True when pdfium can be loaded on this host.
    pub fn is_available() -> bool {
        Pdfium::bind_to_system_library().is_ok()
    }
}

impl Default for PdfiumSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfSource for PdfiumSource {
    fn with_document(&self, pdf: &Path, visit: &mut dyn FnMut(&dyn PdfPages) -> Result<()>) -> Result<()> {
        let bindings = Pdfium::bind_to_system_library()
            .map_err(|e| OcrError::pdf(format!("Failed to initialize Pdfium: {}", e)))?;
        let pdfium = Pdfium::new(bindings);

        let document = pdfium.load_pdf_from_file(pdf, None).map_err(|e| {
            OcrError::pdf(format!("Failed to open PDF {}: {}", pdf.display(), e))
        })?;

        visit(&PdfiumPages {
            document: &document,
            scale: self.dpi as f32 / PDF_POINTS_PER_INCH,
        })
    }
}

struct PdfiumPages<'a, 'lib> {
    document: &'a PdfDocument<'lib>,
    scale: f32,
}

impl<'lib> PdfiumPages<'_, 'lib> {
    fn page(&self, page: usize) -> Result<PdfPage<'lib>> {
        let index = u16::try_from(page).map_err(|_| OcrError::pdf(format!("Page index {} out of range", page)))?;
        self.document
            .pages()
            .get(index)
            .map_err(|_| OcrError::pdf(format!("Page {} not found", page + 1)))
    }
}

impl PdfPages for PdfiumPages<'_, '_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn page_text(&self, page: usize) -> Result<String> {
        let page_ref = self.page(page)?;
        let text = page_ref
            .text()
            .map_err(|e| OcrError::pdf(format!("Page text extraction failed: {}", e)))?;
        Ok(text.all())
    }

    fn render_page_png(&self, page: usize, dest: &Path) -> Result<()> {
        let page_ref = self.page(page)?;

        let config = PdfRenderConfig::new()
            .set_target_width(((page_ref.width().value * self.scale) as i32).max(1))
            .set_target_height(((page_ref.height().value * self.scale) as i32).max(1))
            .rotate_if_landscape(PdfPageRenderRotation::None, false);

        let bitmap = page_ref
            .render_with_config(&config)
            .map_err(|e| OcrError::pdf(format!("Failed to render page {}: {}", page + 1, e)))?;

        bitmap
            .as_image()
            .save_with_format(dest, image::ImageFormat::Png)
            .map_err(|e| OcrError::pdf_with_source(format!("Failed to write {}", dest.display()), e))
    }
}
