//! Result records returned by the engine.

use crate::{OcrError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// `source` value for results served from the result cache.
pub const CACHE_SOURCE: &str = "cache";

/// Outcome of one extraction.
///
/// Single-item APIs only return successful records; batch APIs also produce
/// failed ones (see [`ExtractionResult::failed`]) so one bad file doesn't abort
/// the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub text: String,

    /// Mean token confidence on a 0-100 scale. `None` for cache hits and
    /// backends that don't report confidence.
    pub confidence: Option<f64>,

    pub backend: Option<String>,

    /// Backend wall time, serialized as fractional seconds
    #[serde(with = "duration_secs")]
    pub duration: Option<Duration>,

    pub word_count: usize,

    pub character_count: usize,

    /// `"cache"` or the name of the backend that produced the text
    pub source: String,

    pub image_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub success: bool,

    /// True when the text came from a backend other than the first candidate
    #[serde(default)]
    pub used_fallback: bool,
}

impl ExtractionResult {
    /// Successful result with word and character counts derived from `text`.
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            word_count: count_words(&text),
            character_count: text.chars().count(),
            text,
            confidence: None,
            backend: None,
            duration: None,
            source: source.into(),
            image_path: None,
            error: None,
            success: true,
            used_fallback: false,
        }
    }

    /// Result served from the cache: no backend, confidence or duration.
    pub fn from_cache(text: impl Into<String>, image_path: &Path) -> Self {
        Self {
            image_path: Some(image_path.to_path_buf()),
            ..Self::new(text, CACHE_SOURCE)
        }
    }

    /// Record for an item that failed inside a batch.
    pub fn failed(image_path: impl Into<PathBuf>, error: &OcrError) -> Self {
        Self {
            text: String::new(),
            confidence: None,
            backend: None,
            duration: None,
            word_count: 0,
            character_count: 0,
            source: String::new(),
            image_path: Some(image_path.into()),
            error: Some(error.to_string()),
            success: false,
            used_fallback: false,
        }
    }

    pub fn is_cached(&self) -> bool {
        self.source == CACHE_SOURCE
    }
}

/// Whitespace-separated token count.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Mean of the strictly positive confidences, or 0 when none are positive.
pub fn mean_confidence(confidences: &[f64]) -> f64 {
    let positive: Vec<f64> = confidences.iter().copied().filter(|c| *c > 0.0).collect();
    if positive.is_empty() {
        0.0
    } else {
        positive.iter().sum::<f64>() / positive.len() as f64
    }
}

/// File format accepted by [`OcrEngine::save_result`](crate::OcrEngine::save_result).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Txt,
    Json,
    Markdown,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Txt => "txt",
            OutputFormat::Json => "json",
            OutputFormat::Markdown => "md",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Txt => "txt",
            OutputFormat::Json => "json",
            OutputFormat::Markdown => "markdown",
        };
        f.write_str(name)
    }
}

impl FromStr for OutputFormat {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(OutputFormat::Txt),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(OcrError::validation(format!("Unsupported output format: {}", other))),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(deserializer)?;
        Ok(secs
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64))
    }
}
