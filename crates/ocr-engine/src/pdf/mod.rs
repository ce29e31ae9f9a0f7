//! PDF page access used by [`OcrEngine::extract_from_pdf`](crate::OcrEngine::extract_from_pdf).
//!
//! The engine needs three things from a PDF: how many pages it has, any text
//! layer a page already carries, and a raster of pages that don't. [`PdfSource`]
//! opens a document and [`PdfPages`] answers those questions, so the OCR
//! fallback logic doesn't depend on a particular PDF library.

#[cfg(feature = "pdf")]
mod pdfium;

#[cfg(feature = "pdf")]
pub use pdfium::PdfiumSource;

use crate::Result;
use std::path::Path;

/// Pages whose trimmed native text is shorter than this are OCRed instead.
pub const MIN_NATIVE_TEXT_CHARS: usize = 50;

/// Resolution used when rasterizing a page for OCR.
pub const RENDER_DPI: u32 = 300;

/// Pages of one open PDF document.
pub trait PdfPages {
    fn page_count(&self) -> usize;

    /// Text layer of a zero-based page; empty for scanned pages.
    fn page_text(&self, page: usize) -> Result<String>;

    /// Rasterize a zero-based page and write it to `dest` as PNG.
    fn render_page_png(&self, page: usize, dest: &Path) -> Result<()>;
}

pub trait PdfSource: Send + Sync {
    /// Open `pdf` once and hand its pages to `visit`.
    ///
    /// The document stays open until `visit` returns, so every page of one
    /// extraction shares a single open.
    fn with_document(&self, pdf: &Path, visit: &mut dyn FnMut(&dyn PdfPages) -> Result<()>) -> Result<()>;
}

/// True when a page's native text is long enough to skip OCR.
pub fn has_usable_text(text: &str) -> bool {
    text.trim().chars().count() >= MIN_NATIVE_TEXT_CHARS
}
