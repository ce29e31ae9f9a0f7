//! Neural OCR backend using `ocrs` models executed by `rten`.
//!
//! Loading the detection and recognition models is the expensive step, so each
//! worker thread builds its engine once and keeps it in a [`ThreadReaders`].
//! The probe only checks that both model files are on disk.
//!
//! `ocrs` and `rten` are very slow in unoptimized builds; the workspace
//! profile compiles them at `opt-level = 2` even in dev.

use super::{BackendOutput, OcrBackend, ThreadReaders};
use crate::config::ResolvedOptions;
use crate::preprocess::ProcessedImage;
use crate::{OcrError, Result};
use ocrs::{ImageSource, OcrEngineParams};
use rten::Model;
use std::borrow::Cow;
use std::path::{Path, PathBuf};

pub const DETECTION_MODEL_FILE: &str = "text-detection.rten";
pub const RECOGNITION_MODEL_FILE: &str = "text-recognition.rten";

/// `$XDG_CACHE_HOME/ocrs`, else `~/.cache/ocrs`, else `./ocrs-models`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Some(cache) = dirs::cache_dir() {
        cache.join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

pub struct NeuralBackend {
    model_dir: PathBuf,
    readers: ThreadReaders<ocrs::OcrEngine>,
}

impl NeuralBackend {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            readers: ThreadReaders::new(),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Engines currently cached across live threads.
    pub fn loaded_readers(&self) -> usize {
        self.readers.len()
    }

    fn load_engine(&self) -> Result<ocrs::OcrEngine> {
        let detection_path = self.model_dir.join(DETECTION_MODEL_FILE);
        let recognition_path = self.model_dir.join(RECOGNITION_MODEL_FILE);

        tracing::info!(model_dir = %self.model_dir.display(), "Loading neural OCR models");

        let detection_model = Model::load_file(&detection_path).map_err(|e| {
            OcrError::backend(format!(
                "Failed to load detection model from {}: {}",
                detection_path.display(),
                e
            ))
        })?;
        let recognition_model = Model::load_file(&recognition_path).map_err(|e| {
            OcrError::backend(format!(
                "Failed to load recognition model from {}: {}",
                recognition_path.display(),
                e
            ))
        })?;

        ocrs::OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|e| OcrError::backend(format!("Failed to initialise OCR engine: {}", e)))
    }
}

impl OcrBackend for NeuralBackend {
    fn name(&self) -> &str {
        "neural"
    }

    fn label(&self) -> &str {
        "Neural OCR (ocrs)"
    }

    fn priority(&self) -> u32 {
        2
    }

    fn probe(&self) -> bool {
        self.model_dir.join(DETECTION_MODEL_FILE).is_file() && self.model_dir.join(RECOGNITION_MODEL_FILE).is_file()
    }

    fn extract(&self, image: &ProcessedImage, _options: &ResolvedOptions) -> Result<BackendOutput> {
        let engine = self.readers.get_or_try_init(|| self.load_engine())?;

        let image = match image {
            ProcessedImage::Path(path) => Cow::Owned(image::open(path)?),
            ProcessedImage::Image(img) => Cow::Borrowed(img),
        };

        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();

        let source = ImageSource::from_bytes(rgb.as_raw(), (width, height)).map_err(|e| {
            OcrError::backend(format!("Failed to create image source ({}x{}): {}", width, height, e))
        })?;
        let input = engine
            .prepare_input(source)
            .map_err(|e| OcrError::backend(format!("OCR preprocessing failed: {}", e)))?;
        let text = engine
            .get_text(&input)
            .map_err(|e| OcrError::backend(format!("OCR text recognition failed: {}", e)))?;

        tracing::debug!(width, height, lines = text.lines().count(), "Neural extraction complete");

        Ok(BackendOutput {
            text: text.trim().to_string(),
            token_confidences: None,
        })
    }

    fn cleanup(&self) {
        self.readers.clear();
    }
}
