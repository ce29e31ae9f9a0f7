use super::OcrEngine;
use crate::types::{ExtractionResult, OutputFormat};
use crate::Result;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct SavedResult<'a> {
    text: &'a str,
    confidence: Option<f64>,
    backend: Option<&'a str>,
    duration: Option<f64>,
    word_count: usize,
    character_count: usize,
    image_path: Option<&'a Path>,
}

impl OcrEngine {
    /// Write `result` to `path`, creating parent directories as needed.
    pub fn save_result(&self, result: &ExtractionResult, path: impl AsRef<Path>, format: OutputFormat) -> Result<()> {
        save_result(result, path.as_ref(), format)
    }
}

pub(crate) fn save_result(result: &ExtractionResult, path: &Path, format: OutputFormat) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let content = match format {
        OutputFormat::Txt => result.text.clone(),
        OutputFormat::Json => render_json(result)?,
        OutputFormat::Markdown => render_markdown(result),
    };

    std::fs::write(path, content)?;
    tracing::debug!(path = %path.display(), %format, "Saved OCR result");
    Ok(())
}

fn render_json(result: &ExtractionResult) -> Result<String> {
    let saved = SavedResult {
        text: &result.text,
        confidence: result.confidence,
        backend: result.backend.as_deref(),
        duration: result.duration.map(|d| d.as_secs_f64()),
        word_count: result.word_count,
        character_count: result.character_count,
        image_path: result.image_path.as_deref(),
    };
    Ok(serde_json::to_string_pretty(&saved)?)
}

fn render_markdown(result: &ExtractionResult) -> String {
    let source = result
        .image_path
        .as_ref()
        .map_or_else(|| "Unknown".to_string(), |p| p.display().to_string());

    let mut md = String::from("# OCR Result\n\n");
    md.push_str(&format!("**Source:** {}\n\n", source));
    if let Some(confidence) = result.confidence {
        md.push_str(&format!("**Confidence:** {:.1}%\n\n", confidence));
    }
    if let Some(backend) = &result.backend {
        md.push_str(&format!("**Backend:** {}\n\n", backend));
    }
    md.push_str(&format!("**Word Count:** {}\n\n", result.word_count));
    md.push_str(&format!("**Character Count:** {}\n\n", result.character_count));
    md.push_str("---\n\n");
    md.push_str(&result.text);
    md
}
