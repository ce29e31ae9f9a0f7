//! Shared fixtures for integration tests: stub backends and generated images.

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ocr_engine::backends::{BackendOutput, OcrBackend};
use ocr_engine::config::ResolvedOptions;
use ocr_engine::preprocess::{PassthroughPreprocessor, ProcessedImage};
use ocr_engine::{OcrEngine, OcrEngineBuilder, OcrError, PoolManager, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Backend returning fixed text and recording calls and peak concurrency.
pub struct StubBackend {
    name: String,
    priority: u32,
    available: bool,
    failing: bool,
    text: String,
    confidences: Option<Vec<f64>>,
    delay: Duration,
    calls: AtomicUsize,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl StubBackend {
    pub fn new(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            priority: 10,
            available: true,
            failing: false,
            text: text.to_string(),
            confidences: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Every `extract` call returns a backend error.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_confidences(mut self, confidences: Vec<f64>) -> Self {
        self.confidences = Some(confidences);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl OcrBackend for StubBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn label(&self) -> &str {
        "Stub"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn probe(&self) -> bool {
        self.available
    }

    fn extract(&self, _image: &ProcessedImage, _options: &ResolvedOptions) -> Result<BackendOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        if self.failing {
            return Err(OcrError::backend(format!("{} crashed", self.name)));
        }
        Ok(BackendOutput {
            text: self.text.clone(),
            token_confidences: self.confidences.clone(),
        })
    }
}

/// Builder preset with a stub backend, passthrough preprocessing and an
/// isolated cache directory under `dir`.
pub fn engine_builder(dir: &Path, backend: &Arc<StubBackend>) -> OcrEngineBuilder {
    OcrEngine::builder()
        .backends(vec![Arc::clone(backend) as Arc<dyn OcrBackend>])
        .preprocessor(Arc::new(PassthroughPreprocessor))
        .pool_manager(Arc::new(PoolManager::with_thread_budget(8)))
        .cache_dir(dir.join("cache"))
}

pub fn stub_engine(dir: &Path, backend: &Arc<StubBackend>) -> OcrEngine {
    engine_builder(dir, backend).build().expect("engine should build")
}

/// Write a small, distinct image so each file gets its own cache key.
pub fn write_image(dir: &Path, name: &str, seed: u8) -> PathBuf {
    let path = dir.join(name);
    let img = RgbImage::from_fn(48, 32, |x, y| {
        let v = (x as u8).wrapping_mul(5).wrapping_add(y as u8).wrapping_add(seed);
        Rgb([v, 255 - v, seed])
    });
    let format = ImageFormat::from_path(&path).expect("known image extension");
    DynamicImage::ImageRgb8(img)
        .save_with_format(&path, format)
        .expect("write test image");
    path
}

pub fn write_images(dir: &Path, count: usize, ext: &str) -> Vec<PathBuf> {
    (0..count)
        .map(|i| write_image(dir, &format!("page_{}.{}", i, ext), i as u8))
        .collect()
}
