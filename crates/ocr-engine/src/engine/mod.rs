//! The OCR engine: validation, caching, backend dispatch and result assembly.
//!
//! [`OcrEngine`] is cheap to share: its state lives behind an `Arc` so batch
//! workers can run single-item extractions on pool threads.
//!
//! # Example
//!
//! ```rust,no_run
//! use ocr_engine::{EngineConfig, OcrEngine};
//!
//! # fn main() -> ocr_engine::Result<()> {
//! let engine = OcrEngine::new(EngineConfig::default())?;
//! let result = engine.extract_text("scan.png", None)?;
//! println!("{} ({} words)", result.text, result.word_count);
//! # Ok(())
//! # }
//! ```

mod batch;
mod output;
mod pdf;

pub use batch::{BATCH_POOL, BatchStream, CancellationToken, STREAMING_POOL};

use crate::backends::{BackendDescriptor, BackendRegistry, OcrBackend, default_backends};
use crate::cache::{CacheStats, ResultCache, compute_key};
use crate::config::{EngineConfig, OcrOptions, ResolvedOptions};
use crate::pdf::PdfSource;
use crate::pool::PoolManager;
use crate::preprocess::{DefaultPreprocessor, ImagePreprocessor, ProcessedImage};
use crate::types::{ExtractionResult, mean_confidence};
use crate::{OcrError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Extensions accepted by [`OcrEngine::extract_text`], compared case-insensitively.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tiff", "tif", "bmp", "gif", "webp"];

/// Multi-backend OCR engine.
pub struct OcrEngine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    config: EngineConfig,
    manager: Arc<PoolManager>,
    registry: BackendRegistry,
    preprocessor: Arc<dyn ImagePreprocessor>,
    cache: ResultCache,
    pdf_source: Option<Arc<dyn PdfSource>>,
    cleaned_up: AtomicBool,
}

/// Builder for [`OcrEngine`] with injectable collaborators.
pub struct OcrEngineBuilder {
    config: EngineConfig,
    manager: Option<Arc<PoolManager>>,
    backends: Option<Vec<Arc<dyn OcrBackend>>>,
    extra_backends: Vec<Arc<dyn OcrBackend>>,
    preprocessor: Option<Arc<dyn ImagePreprocessor>>,
    pdf_source: Option<Arc<dyn PdfSource>>,
}

impl OcrEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            manager: None,
            backends: None,
            extra_backends: Vec::new(),
            preprocessor: None,
            pdf_source: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a pool manager with other components. Defaults to a new host-sized manager.
    pub fn pool_manager(mut self, manager: Arc<PoolManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Replace the built-in backend set.
    pub fn backends(mut self, backends: Vec<Arc<dyn OcrBackend>>) -> Self {
        self.backends = Some(backends);
        self
    }

    /// Register an additional backend alongside the others.
    pub fn backend(mut self, backend: Arc<dyn OcrBackend>) -> Self {
        self.extra_backends.push(backend);
        self
    }

    pub fn preprocessor(mut self, preprocessor: Arc<dyn ImagePreprocessor>) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    pub fn pdf_source(mut self, source: Arc<dyn PdfSource>) -> Self {
        self.pdf_source = Some(source);
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    /// Validate the configuration, open the cache and probe backends.
    pub fn build(self) -> Result<OcrEngine> {
        self.config.validate()?;

        let mut backends = match self.backends {
            Some(backends) => backends,
            None => default_backends(&self.config),
        };
        backends.extend(self.extra_backends);
        let registry = BackendRegistry::probe(backends)?;

        let cache = ResultCache::new(
            self.config.cache_dir.clone(),
            Duration::from_secs(self.config.cache_ttl_secs),
        )?;

        let manager = self.manager.unwrap_or_else(|| Arc::new(PoolManager::new()));
        let preprocessor = self
            .preprocessor
            .unwrap_or_else(|| Arc::new(DefaultPreprocessor) as Arc<dyn ImagePreprocessor>);
        let pdf_source = self.pdf_source.or_else(default_pdf_source);

        tracing::info!(
            backends = ?registry.available_backends(),
            cache_dir = %cache.cache_dir().display(),
            "OCR engine initialized"
        );

        Ok(OcrEngine {
            inner: Arc::new(EngineInner {
                config: self.config,
                manager,
                registry,
                preprocessor,
                cache,
                pdf_source,
                cleaned_up: AtomicBool::new(false),
            }),
        })
    }
}

impl Default for OcrEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "pdf")]
fn default_pdf_source() -> Option<Arc<dyn PdfSource>> {
    Some(Arc::new(crate::pdf::PdfiumSource::new()))
}

#[cfg(not(feature = "pdf"))]
fn default_pdf_source() -> Option<Arc<dyn PdfSource>> {
    None
}

impl OcrEngine {
    pub fn builder() -> OcrEngineBuilder {
        OcrEngineBuilder::new()
    }

    /// Engine with the built-in backends and a dedicated pool manager.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn pool_manager(&self) -> &Arc<PoolManager> {
        &self.inner.manager
    }

    /// Extract text from one image.
    ///
    /// # Errors
    ///
    /// - `OcrError::Validation` for a missing, oversized or unsupported file
    /// - `OcrError::Backend` when no suitable backend is available or it fails
    /// - `OcrError::ImageProcessing` when preprocessing fails
    ///
    /// With fallback enabled (see [`FallbackConfig`](crate::config::FallbackConfig)),
    /// a failing or low-quality backend is followed by the other available
    /// backends; the call only fails when every candidate errors.
    ///
    /// Cache failures are logged and never returned.
    pub fn extract_text(&self, path: impl AsRef<Path>, options: Option<&OcrOptions>) -> Result<ExtractionResult> {
        self.inner.extract_text(path.as_ref(), options)
    }

    pub fn available_backends(&self) -> Vec<String> {
        self.inner.registry.available_backends()
    }

    pub fn preferred_backend(&self) -> Result<String> {
        self.inner.registry.preferred_backend()
    }

    /// True when at least one backend is usable.
    pub fn is_available(&self) -> bool {
        !self.inner.registry.available_backends().is_empty()
    }

    /// Probe results and request counters for every registered backend.
    pub fn backend_descriptors(&self) -> Vec<BackendDescriptor> {
        self.inner.registry.descriptors()
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        self.inner.cache.stats()
    }

    pub fn clear_cache(&self) -> Result<usize> {
        self.inner.cache.clear()
    }

    pub fn cache_dir(&self) -> &Path {
        self.inner.cache.cache_dir()
    }

    /// Release every backend's thread-local readers and clear the result cache.
    ///
    /// Safe to call repeatedly; later calls find nothing left to release.
    pub fn cleanup(&self) {
        self.inner.registry.cleanup();
        match self.inner.cache.clear() {
            Ok(removed) => tracing::debug!(removed, "Engine cleanup cleared cache"),
            Err(e) => tracing::warn!(error = %e, "Error clearing cache during cleanup"),
        }
        self.inner.cleaned_up.store(true, Ordering::Release);
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if !*self.cleaned_up.get_mut() {
            self.registry.cleanup();
        }
    }
}

impl std::fmt::Debug for OcrEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrEngine")
            .field("backends", &self.inner.registry)
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}

impl EngineInner {
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub(crate) fn extract_text(&self, path: &Path, options: Option<&OcrOptions>) -> Result<ExtractionResult> {
        let path = validate_image_path(path, self.config.max_file_size)?;
        let resolved = self.config.resolve(options);

        let cache_key = if resolved.use_cache {
            self.cache_key(&path, &resolved)
        } else {
            None
        };

        if let Some(key) = &cache_key
            && let Some(text) = self.cache.load(key)
        {
            return Ok(ExtractionResult::from_cache(text, &path));
        }

        let candidates = self.registry.candidates(&resolved.backend, resolved.fallback)?;

        let image = self
            .preprocessor
            .preprocess(&path, &resolved.preprocessing)
            .map_err(|e| OcrError::image_processing_with_source("Image preprocessing failed", e))?;

        let attempt = self.dispatch(&candidates, &image, &resolved)?;
        let name = attempt.backend.name();

        if let Some(key) = &cache_key
            && let Err(e) = self.cache.save(key, &attempt.text)
        {
            tracing::warn!(error = %e, "Failed to cache OCR result");
        }

        tracing::debug!(
            backend = %name,
            duration_ms = attempt.duration.as_millis() as u64,
            chars = attempt.text.len(),
            used_fallback = attempt.used_fallback,
            "Extraction complete"
        );

        let mut result = ExtractionResult::new(attempt.text, name);
        result.confidence = attempt.confidence;
        result.backend = Some(name.to_string());
        result.duration = Some(attempt.duration);
        result.image_path = Some(path);
        result.used_fallback = attempt.used_fallback;
        Ok(result)
    }

    /// Run `candidates` in order until one passes the fallback quality gate.
    ///
    /// A single candidate is returned as-is. When several succeed but none
    /// passes the gate, the first success wins.
    fn dispatch(
        &self,
        candidates: &[Arc<dyn OcrBackend>],
        image: &ProcessedImage,
        resolved: &ResolvedOptions,
    ) -> Result<Attempt> {
        let single = candidates.len() == 1;
        let mut first_success: Option<Attempt> = None;
        let mut last_error: Option<OcrError> = None;

        for (index, backend) in candidates.iter().enumerate() {
            let started = Instant::now();
            match backend.extract(image, resolved) {
                Ok(output) => {
                    let duration = started.elapsed();
                    self.registry.record(backend.name(), true, duration);

                    let attempt = Attempt {
                        backend: Arc::clone(backend),
                        text: output.text.trim().to_string(),
                        confidence: output.token_confidences.as_deref().map(mean_confidence),
                        duration,
                        used_fallback: index > 0,
                    };
                    if single || self.config.fallback.accepts(&attempt.text, attempt.confidence) {
                        return Ok(attempt);
                    }

                    tracing::info!(
                        backend = %backend.name(),
                        confidence = ?attempt.confidence,
                        "OCR result below quality gate, trying next backend"
                    );
                    if first_success.is_none() {
                        first_success = Some(attempt);
                    }
                }
                Err(e) => {
                    self.registry.record(backend.name(), false, Duration::ZERO);
                    let err = match e {
                        e @ OcrError::Backend { .. } => e,
                        other => OcrError::backend_with_source(format!("{} OCR failed", backend.name()), other),
                    };
                    if single {
                        return Err(err);
                    }
                    tracing::warn!(backend = %backend.name(), error = %err, "OCR backend failed, trying next backend");
                    last_error = Some(err);
                }
            }
        }

        if let Some(attempt) = first_success {
            return Ok(attempt);
        }
        Err(match last_error {
            Some(e) => OcrError::backend_with_source("All OCR backends failed", e),
            None => OcrError::backend("No OCR backends available"),
        })
    }

    fn cache_key(&self, path: &Path, resolved: &ResolvedOptions) -> Option<String> {
        match compute_key(path, resolved) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to compute cache key, skipping cache");
                None
            }
        }
    }
}

struct Attempt {
    backend: Arc<dyn OcrBackend>,
    text: String,
    confidence: Option<f64>,
    duration: Duration,
    used_fallback: bool,
}

/// Check that `path` is an existing, size-bounded image file with a supported
/// extension. Returns the canonical path.
pub fn validate_image_path(path: &Path, max_file_size: u64) -> Result<PathBuf> {
    if !path.exists() {
        return Err(OcrError::validation(format!("Image file not found: {}", path.display())));
    }
    if !path.is_file() {
        return Err(OcrError::validation(format!("Path is not a file: {}", path.display())));
    }

    let canonical = path
        .canonicalize()
        .map_err(|e| OcrError::validation_with_source(format!("Invalid or unsafe path: {}", path.display()), e))?;

    let size = std::fs::metadata(&canonical)?.len();
    if size > max_file_size {
        return Err(OcrError::validation(format!(
            "File too large: {:.1}MB exceeds limit of {:.1}MB",
            size as f64 / 1024.0 / 1024.0,
            max_file_size as f64 / 1024.0 / 1024.0
        )));
    }

    let extension = canonical
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(OcrError::validation(format!(
            "Unsupported image format: {}",
            if extension.is_empty() { "<none>".to_string() } else { format!(".{}", extension) }
        )));
    }

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::BackendOutput;
    use crate::preprocess::{PassthroughPreprocessor, ProcessedImage};
    use std::sync::atomic::AtomicUsize;
    use tempfile::{TempDir, tempdir};

    struct CountingBackend {
        calls: Arc<AtomicUsize>,
        cleanups: Arc<AtomicUsize>,
        confidences: Option<Vec<f64>>,
    }

    impl OcrBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }
        fn label(&self) -> &str {
            "Counting"
        }
        fn priority(&self) -> u32 {
            1
        }
        fn probe(&self) -> bool {
            true
        }
        fn extract(&self, image: &ProcessedImage, _options: &ResolvedOptions) -> Result<BackendOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = match image {
                ProcessedImage::Path(p) => p.file_name().map(|n| n.to_string_lossy().into_owned()),
                ProcessedImage::Image(_) => None,
            };
            Ok(BackendOutput {
                text: format!("  text from {}  ", name.unwrap_or_default()),
                token_confidences: self.confidences.clone(),
            })
        }
        fn cleanup(&self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        dir: TempDir,
        engine: OcrEngine,
        calls: Arc<AtomicUsize>,
        cleanups: Arc<AtomicUsize>,
    }

    fn fixture(confidences: Option<Vec<f64>>) -> Fixture {
        let dir = tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let cleanups = Arc::new(AtomicUsize::new(0));
        let engine = OcrEngine::builder()
            .backends(vec![Arc::new(CountingBackend {
                calls: Arc::clone(&calls),
                cleanups: Arc::clone(&cleanups),
                confidences,
            }) as Arc<dyn OcrBackend>])
            .preprocessor(Arc::new(PassthroughPreprocessor))
            .pool_manager(Arc::new(PoolManager::with_thread_budget(4)))
            .cache_dir(dir.path().join("cache"))
            .build()
            .unwrap();
        Fixture {
            dir,
            engine,
            calls,
            cleanups,
        }
    }

    fn image_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("fake image bytes for {}", name)).unwrap();
        path
    }

    #[test]
    fn test_validate_missing_file() {
        let err = validate_image_path(Path::new("/nonexistent/scan.png"), 1024).unwrap_err();
        assert!(matches!(err, OcrError::Validation { .. }));
        assert!(err.to_string().contains("Image file not found"));
    }

    #[test]
    fn test_validate_directory() {
        let dir = tempdir().unwrap();
        let err = validate_image_path(dir.path(), 1024).unwrap_err();
        assert!(err.to_string().contains("not a file"));
    }

    #[test]
    fn test_validate_size_limit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.png");
        std::fs::write(&path, vec![0_u8; 2048]).unwrap();

        assert!(validate_image_path(&path, 2048).is_ok());
        let err = validate_image_path(&path, 2047).unwrap_err();
        assert!(err.to_string().contains("File too large"));
    }

    #[test]
    fn test_validate_extension_case_insensitive() {
        let dir = tempdir().unwrap();
        for name in ["a.JPG", "b.Png", "c.tif", "d.WEBP"] {
            let path = image_file(dir.path(), name);
            assert!(validate_image_path(&path, 1024).is_ok(), "{} should be accepted", name);
        }

        let pdf = image_file(dir.path(), "doc.pdf");
        let err = validate_image_path(&pdf, 1024).unwrap_err();
        assert!(err.to_string().contains("Unsupported image format: .pdf"));

        let bare = image_file(dir.path(), "noext");
        assert!(validate_image_path(&bare, 1024).is_err());
    }

    #[test]
    fn test_extract_text_assembles_result() {
        let f = fixture(Some(vec![90.0, 0.0, 70.0, -1.0]));
        let path = image_file(f.dir.path(), "page.png");

        let result = f.engine.extract_text(&path, None).unwrap();
        assert_eq!(result.text, "text from page.png");
        assert_eq!(result.source, "counting");
        assert_eq!(result.backend.as_deref(), Some("counting"));
        assert_eq!(result.confidence, Some(80.0));
        assert!(result.duration.is_some());
        assert_eq!(result.word_count, 3);
        assert_eq!(result.character_count, 18);
        assert_eq!(result.image_path, Some(path.canonicalize().unwrap()));
        assert!(result.success);
    }

    #[test]
    fn test_cache_hit_skips_backend() {
        let f = fixture(Some(vec![95.0]));
        let path = image_file(f.dir.path(), "page.png");

        let first = f.engine.extract_text(&path, None).unwrap();
        let second = f.engine.extract_text(&path, None).unwrap();

        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.source, "cache");
        assert_eq!(second.text, first.text);
        assert!(second.confidence.is_none());
        assert!(second.duration.is_none());
        assert!(second.backend.is_none());
    }

    #[test]
    fn test_use_cache_false_bypasses_cache() {
        let f = fixture(None);
        let path = image_file(f.dir.path(), "page.png");
        let no_cache = OcrOptions {
            use_cache: Some(false),
            ..Default::default()
        };

        f.engine.extract_text(&path, Some(&no_cache)).unwrap();
        f.engine.extract_text(&path, Some(&no_cache)).unwrap();
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.engine.cache_stats().unwrap().file_count, 0);
    }

    #[test]
    fn test_different_options_miss_cache() {
        let f = fixture(None);
        let path = image_file(f.dir.path(), "page.png");

        f.engine.extract_text(&path, None).unwrap();
        f.engine
            .extract_text(&path, Some(&OcrOptions::with_language("de")))
            .unwrap();
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backend_without_confidence() {
        let f = fixture(None);
        let path = image_file(f.dir.path(), "page.png");
        assert!(f.engine.extract_text(&path, None).unwrap().confidence.is_none());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let f = fixture(None);
        let path = image_file(f.dir.path(), "page.png");
        let options = OcrOptions {
            backend: Some("cloud".to_string()),
            ..Default::default()
        };
        let err = f.engine.extract_text(&path, Some(&options)).unwrap_err();
        assert!(matches!(err, OcrError::Backend { .. }));
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_path_never_reaches_backend() {
        let f = fixture(None);
        assert!(f.engine.extract_text(f.dir.path().join("missing.png"), None).is_err());
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cleanup_is_idempotent_and_clears_cache() {
        let f = fixture(None);
        let path = image_file(f.dir.path(), "page.png");
        f.engine.extract_text(&path, None).unwrap();
        assert_eq!(f.engine.cache_stats().unwrap().file_count, 1);

        f.engine.cleanup();
        f.engine.cleanup();
        assert_eq!(f.engine.cache_stats().unwrap().file_count, 0);
    }

    #[test]
    fn test_readers_released_when_last_handle_drops() {
        let Fixture {
            dir: _dir,
            engine,
            cleanups,
            ..
        } = fixture(None);
        let stream = engine.extract_batch_streaming::<&Path>(&[], None, None, None);

        drop(engine);
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);
        drop(stream);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_after_cleanup_releases_nothing_more() {
        let Fixture {
            dir: _dir,
            engine,
            cleanups,
            ..
        } = fixture(None);
        engine.cleanup();
        drop(engine);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_result_records_backend_stats() {
        let f = fixture(None);
        let path = image_file(f.dir.path(), "page.png");
        f.engine.extract_text(&path, None).unwrap();
        f.engine.extract_text(&path, None).unwrap();

        let descriptors = f.engine.backend_descriptors();
        assert_eq!(descriptors[0].stats.total_requests, 1);
        assert_eq!(descriptors[0].stats.successful_requests, 1);
    }

    #[test]
    fn test_no_backends_available() {
        let dir = tempdir().unwrap();
        let engine = OcrEngine::builder()
            .backends(Vec::new())
            .cache_dir(dir.path())
            .build()
            .unwrap();
        assert!(!engine.is_available());
        assert!(engine.preferred_backend().is_err());
    }
}
