use super::OcrEngine;
use crate::config::OcrOptions;
use crate::pdf::{PdfPages, has_usable_text};
use crate::{OcrError, Result};
use std::fmt::Write as _;
use std::path::Path;
use tempfile::TempPath;

/// Rasterized page written next to the PDF; removed on drop.
///
/// Names are `temp_page_{page}_{pid}_{random}.png`, reserved on disk at
/// creation so concurrent calls never share a file.
struct TempPageImage {
    path: Option<TempPath>,
}

impl TempPageImage {
    fn new(pdf: &Path, page: usize) -> Result<Self> {
        let dir = match pdf.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file = tempfile::Builder::new()
            .prefix(&format!("temp_page_{}_{}_", page, std::process::id()))
            .suffix(".png")
            .tempfile_in(dir)
            .map_err(|e| OcrError::pdf_with_source(format!("Failed to create page image in {}", dir.display()), e))?;
        Ok(Self {
            path: Some(file.into_temp_path()),
        })
    }

    fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }
}

impl Drop for TempPageImage {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        let removed_path = path.to_path_buf();
        if let Err(e) = path.close()
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %removed_path.display(), error = %e, "Failed to remove temporary page image");
        }
    }
}

impl OcrEngine {
    /// Extract text from a PDF, OCRing only the pages without a usable text layer.
    ///
    /// Pages whose native text has fewer than
    /// [`MIN_NATIVE_TEXT_CHARS`](crate::pdf::MIN_NATIVE_TEXT_CHARS) characters are
    /// rendered to PNG and run through [`extract_text`](Self::extract_text) with
    /// `language` as the only language.
    ///
    /// # Errors
    ///
    /// - `OcrError::Validation` if the PDF doesn't exist
    /// - `OcrError::Pdf` if no PDF source is configured or reading a page fails
    /// - any error from OCRing a page
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display(), language = %language))]
    pub fn extract_from_pdf(&self, path: impl AsRef<Path>, language: &str) -> Result<String> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(OcrError::validation(format!("PDF file not found: {}", path.display())));
        }

        let source = self.inner.pdf_source.as_deref().ok_or_else(|| {
            OcrError::pdf("PDF support is not available; build with the `pdf` feature or supply a PdfSource")
        })?;

        let options = OcrOptions::with_language(language);
        let mut out = String::new();
        let mut page_count = 0usize;
        let mut ocr_pages = 0usize;

        source.with_document(path, &mut |pages: &dyn PdfPages| {
            page_count = pages.page_count();
            for page in 0..page_count {
                let native = pages.page_text(page)?;
                let text = if has_usable_text(&native) {
                    native
                } else {
                    ocr_pages += 1;
                    self.ocr_page(pages, path, page, &options)?
                };
                let _ = write!(out, "\n--- Page {} ---\n{}\n", page + 1, text);
            }
            Ok(())
        })?;

        tracing::info!(page_count, ocr_pages, "PDF extraction complete");
        Ok(out.trim().to_string())
    }

    fn ocr_page(&self, pages: &dyn PdfPages, pdf: &Path, page: usize, options: &OcrOptions) -> Result<String> {
        let image = TempPageImage::new(pdf, page)?;
        pages.render_page_png(page, image.path())?;
        tracing::debug!(page = page + 1, path = %image.path().display(), "Running OCR on rendered page");
        Ok(self.extract_text(image.path(), Some(options))?.text)
    }
}
