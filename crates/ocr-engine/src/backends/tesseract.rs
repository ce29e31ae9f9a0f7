//! Tesseract backend, driven through the `tesseract` command-line tool.
//!
//! Output is requested as TSV so one invocation yields both the recognized
//! words and their confidences.

use super::{BackendOutput, OcrBackend};
use crate::config::ResolvedOptions;
use crate::preprocess::ProcessedImage;
use crate::{OcrError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// TSV row level for individual words.
const TSV_WORD_LEVEL: u32 = 5;
/// Columns in a complete TSV row (`level` through `text`).
const TSV_MIN_FIELDS: usize = 12;

const TSV_BLOCK: usize = 2;
const TSV_PARAGRAPH: usize = 3;
const TSV_LINE: usize = 4;
const TSV_CONF: usize = 10;
const TSV_TEXT: usize = 11;

pub struct TesseractBackend {
    binary: PathBuf,
}

impl TesseractBackend {
    pub fn new() -> Self {
        Self::with_binary("tesseract")
    }

    /// Use a specific `tesseract` executable instead of the one on `PATH`.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    fn run(&self, image_path: &Path, options: &ResolvedOptions) -> Result<String> {
        let languages = tesseract_languages(&options.languages);

        let output = Command::new(&self.binary)
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &languages])
            .args(options.tesseract_config.split_whitespace())
            .arg("tsv")
            .output();

        match output {
            Ok(output) if output.status.success() => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(OcrError::backend(format!("tesseract failed: {}", stderr.trim())))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OcrError::backend(
                "tesseract not found (install tesseract-ocr)",
            )),
            Err(e) => Err(OcrError::backend_with_source("Failed to run tesseract", e)),
        }
    }
}

impl Default for TesseractBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrBackend for TesseractBackend {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn label(&self) -> &str {
        "Tesseract OCR"
    }

    fn priority(&self) -> u32 {
        1
    }

    fn probe(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn extract(&self, image: &ProcessedImage, options: &ResolvedOptions) -> Result<BackendOutput> {
        let tsv = match image {
            ProcessedImage::Path(path) => self.run(path, options)?,
            ProcessedImage::Image(img) => {
                let temp = tempfile::Builder::new()
                    .prefix("ocr-input-")
                    .suffix(".png")
                    .tempfile()?;
                img.save_with_format(temp.path(), image::ImageFormat::Png)?;
                self.run(temp.path(), options)?
            }
        };

        let parsed = parse_tsv(&tsv);
        tracing::debug!(
            words = parsed.confidences.len(),
            chars = parsed.text.len(),
            "Tesseract extraction complete"
        );

        Ok(BackendOutput {
            text: parsed.text,
            token_confidences: Some(parsed.confidences),
        })
    }
}

/// Map a short language name to Tesseract's three-letter code.
/// Unknown values pass through unchanged.
pub fn map_language(language: &str) -> &str {
    match language {
        "en" | "english" => "eng",
        "fr" => "fra",
        "de" => "deu",
        "es" => "spa",
        other => other,
    }
}

/// Tesseract `-l` argument for an ordered language list.
pub fn tesseract_languages(languages: &[String]) -> String {
    languages
        .iter()
        .map(|l| map_language(l))
        .collect::<Vec<_>>()
        .join("+")
}

/// Text and per-word confidences recovered from Tesseract TSV output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TsvText {
    pub text: String,
    pub confidences: Vec<f64>,
}

/// Rebuild text from TSV word rows, one output line per Tesseract line.
///
/// Paragraph and block changes insert a blank line. The header row and
/// non-word rows are skipped.
pub fn parse_tsv(tsv: &str) -> TsvText {
    let mut lines: Vec<String> = Vec::new();
    let mut confidences = Vec::new();
    let mut current: Option<(&str, &str, &str)> = None;

    for row in tsv.lines().skip(1) {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < TSV_MIN_FIELDS {
            continue;
        }
        if fields[0].trim().parse::<u32>().ok() != Some(TSV_WORD_LEVEL) {
            continue;
        }

        let word = fields[TSV_TEXT].trim();
        if word.is_empty() {
            continue;
        }

        if let Ok(conf) = fields[TSV_CONF].trim().parse::<f64>() {
            confidences.push(conf);
        }

        let key = (fields[TSV_BLOCK], fields[TSV_PARAGRAPH], fields[TSV_LINE]);
        match current {
            Some(prev) if prev == key => {
                if let Some(line) = lines.last_mut() {
                    line.push(' ');
                    line.push_str(word);
                }
            }
            Some(prev) => {
                if prev.0 != key.0 || prev.1 != key.1 {
                    lines.push(String::new());
                }
                lines.push(word.to_string());
            }
            None => lines.push(word.to_string()),
        }
        current = Some(key);
    }

    TsvText {
        text: lines.join("\n").trim().to_string(),
        confidences,
    }
}
