//! OCR backends and the probe-once registry that selects between them.
//!
//! A backend turns a preprocessed image into text. Backends are probed once
//! when the registry is built; the result is frozen for the registry's lifetime.
//! Auto-selection picks the available backend with the lowest priority number.
//! The registry also keeps per-backend request counters and can list fallback
//! candidates in priority order.

mod tesseract;
mod thread_readers;

#[cfg(feature = "neural")]
mod neural;

#[cfg(feature = "neural")]
pub use neural::{DETECTION_MODEL_FILE, NeuralBackend, RECOGNITION_MODEL_FILE, default_model_dir};
pub use tesseract::{TesseractBackend, TsvText, map_language, parse_tsv, tesseract_languages};
pub use thread_readers::ThreadReaders;

use crate::config::{EngineConfig, ResolvedOptions};
use crate::preprocess::ProcessedImage;
use crate::{OcrError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Raw backend output, before the engine computes aggregate confidence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendOutput {
    pub text: String,
    /// Per-token confidences on a 0-100 scale, if the backend reports them
    pub token_confidences: Option<Vec<f64>>,
}

/// Trait for OCR backends.
///
/// # Thread Safety
///
/// Backends are shared across worker threads and must be `Send + Sync`.
/// Per-thread state (such as a loaded model) belongs in a [`ThreadReaders`].
///
/// # Example
///
/// ```rust
/// use ocr_engine::backends::{BackendOutput, OcrBackend};
/// use ocr_engine::config::ResolvedOptions;
/// use ocr_engine::preprocess::ProcessedImage;
/// use ocr_engine::Result;
///
/// struct FixedText;
///
/// impl OcrBackend for FixedText {
///     fn name(&self) -> &str { "fixed" }
///     fn label(&self) -> &str { "Fixed text" }
///     fn priority(&self) -> u32 { 10 }
///     fn probe(&self) -> bool { true }
///     fn extract(&self, _image: &ProcessedImage, _options: &ResolvedOptions) -> Result<BackendOutput> {
///         Ok(BackendOutput { text: "hello".to_string(), token_confidences: Some(vec![90.0]) })
///     }
/// }
/// ```
pub trait OcrBackend: Send + Sync {
    /// Unique name used for explicit selection and as the result `source`.
    fn name(&self) -> &str;

    fn label(&self) -> &str;

    /// Lower is preferred during auto-selection.
    fn priority(&self) -> u32;

    /// Cheap runtime presence check. Must not load models.
    fn probe(&self) -> bool;

    /// Run OCR on `image`.
    ///
    /// # Errors
    ///
    /// Any error is reported to the caller as `OcrError::Backend`.
    fn extract(&self, image: &ProcessedImage, options: &ResolvedOptions) -> Result<BackendOutput>;

    /// Release cached per-thread state. Must be idempotent.
    fn cleanup(&self) {}
}

/// Request counters for one backend. Durations only cover successful calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackendStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_duration_secs: f64,
    pub avg_duration_secs: f64,
}

impl BackendStats {
    fn record(&mut self, success: bool, duration: Duration) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
            self.total_duration_secs += duration.as_secs_f64();
            self.avg_duration_secs = self.total_duration_secs / self.successful_requests as f64;
        } else {
            self.failed_requests += 1;
        }
    }
}

/// What the probe learned about one backend, plus its request counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendDescriptor {
    pub name: String,
    pub label: String,
    pub priority: u32,
    pub available: bool,
    pub stats: BackendStats,
}

struct RegisteredBackend {
    descriptor: BackendDescriptor,
    backend: Arc<dyn OcrBackend>,
    stats: Mutex<BackendStats>,
}

/// Backends ordered by priority, with their frozen availability.
pub struct BackendRegistry {
    entries: Vec<RegisteredBackend>,
}

impl BackendRegistry {
    /// Probe every backend and freeze the results.
    ///
    /// A probe that panics marks only that backend unavailable.
    ///
    /// # Errors
    ///
    /// Returns `OcrError::Validation` for an empty, whitespace-containing or
    /// duplicate backend name.
    pub fn probe(backends: Vec<Arc<dyn OcrBackend>>) -> Result<Self> {
        let mut entries: Vec<RegisteredBackend> = Vec::with_capacity(backends.len());

        for backend in backends {
            let name = backend.name().to_string();
            validate_backend_name(&name)?;
            if entries.iter().any(|e| e.descriptor.name == name) {
                return Err(OcrError::validation(format!("Backend '{}' registered twice", name)));
            }

            let available = match panic::catch_unwind(AssertUnwindSafe(|| backend.probe())) {
                Ok(available) => available,
                Err(payload) => {
                    let err = OcrError::from_panic(payload);
                    tracing::warn!(backend = %name, error = %err, "Backend probe panicked");
                    false
                }
            };

            if available {
                tracing::info!(backend = %name, "OCR backend available");
            } else {
                tracing::debug!(backend = %name, "OCR backend not available");
            }

            entries.push(RegisteredBackend {
                descriptor: BackendDescriptor {
                    name,
                    label: backend.label().to_string(),
                    priority: backend.priority(),
                    available,
                    stats: BackendStats::default(),
                },
                backend,
                stats: Mutex::new(BackendStats::default()),
            });
        }

        entries.sort_by_key(|e| e.descriptor.priority);
        Ok(Self { entries })
    }

    /// Names of available backends, preferred first.
    pub fn available_backends(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.descriptor.available)
            .map(|e| e.descriptor.name.clone())
            .collect()
    }

    /// Name of the available backend with the lowest priority number.
    pub fn preferred_backend(&self) -> Result<String> {
        self.entries
            .iter()
            .find(|e| e.descriptor.available)
            .map(|e| e.descriptor.name.clone())
            .ok_or_else(|| OcrError::backend("No OCR backends available"))
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.descriptor.name == name && e.descriptor.available)
    }

    /// The registered backend called `name`, whether or not it is available.
    pub fn get(&self, name: &str) -> Option<Arc<dyn OcrBackend>> {
        self.entries
            .iter()
            .find(|e| e.descriptor.name == name)
            .map(|e| Arc::clone(&e.backend))
    }

    /// Resolve a selector (`auto` or a name) to an available backend.
    pub fn resolve(&self, selector: &str) -> Result<Arc<dyn OcrBackend>> {
        let name = if selector == crate::config::AUTO_BACKEND {
            self.preferred_backend()?
        } else {
            selector.to_string()
        };

        match self.entries.iter().find(|e| e.descriptor.name == name) {
            Some(entry) if entry.descriptor.available => Ok(Arc::clone(&entry.backend)),
            Some(_) => Err(OcrError::backend(format!("OCR backend '{}' is not available", name))),
            None => Err(OcrError::backend(format!("Unknown OCR backend '{}'", name))),
        }
    }

    /// Backends to try for `selector`, in order.
    ///
    /// Without fallback this is just the resolved backend. With fallback, the
    /// resolved backend comes first, followed by every other available backend
    /// by priority. A registered but unavailable selection is skipped in favour
    /// of the others; an unknown name is still an error.
    pub fn candidates(&self, selector: &str, fallback: bool) -> Result<Vec<Arc<dyn OcrBackend>>> {
        if !fallback {
            return Ok(vec![self.resolve(selector)?]);
        }

        let primary = match self.resolve(selector) {
            Ok(backend) => Some(backend),
            Err(e) if selector == crate::config::AUTO_BACKEND || self.get(selector).is_none() => return Err(e),
            Err(e) => {
                tracing::warn!(backend = %selector, error = %e, "Selected backend unavailable, falling back");
                None
            }
        };

        let primary_name = primary.as_ref().map(|b| b.name().to_string());
        let mut candidates: Vec<Arc<dyn OcrBackend>> = primary.into_iter().collect();
        candidates.extend(
            self.entries
                .iter()
                .filter(|e| e.descriptor.available && Some(&e.descriptor.name) != primary_name.as_ref())
                .map(|e| Arc::clone(&e.backend)),
        );

        if candidates.is_empty() {
            return Err(OcrError::backend("No OCR backends available"));
        }
        Ok(candidates)
    }

    /// Count one request against `name`. Unknown names are ignored.
    pub fn record(&self, name: &str, success: bool, duration: Duration) {
        if let Some(entry) = self.entries.iter().find(|e| e.descriptor.name == name) {
            entry.stats.lock().record(success, duration);
        }
    }

    pub fn stats(&self, name: &str) -> Option<BackendStats> {
        self.entries
            .iter()
            .find(|e| e.descriptor.name == name)
            .map(|e| e.stats.lock().clone())
    }

    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.entries
            .iter()
            .map(|e| BackendDescriptor {
                stats: e.stats.lock().clone(),
                ..e.descriptor.clone()
            })
            .collect()
    }

    /// Call [`OcrBackend::cleanup`] on every backend.
    pub fn cleanup(&self) {
        for entry in &self.entries {
            entry.backend.cleanup();
        }
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.descriptor))
            .finish()
    }
}

fn validate_backend_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(OcrError::validation("Backend name cannot be empty"));
    }
    if name.contains(char::is_whitespace) {
        return Err(OcrError::validation(format!(
            "Backend name '{}' cannot contain whitespace",
            name
        )));
    }
    Ok(())
}

/// The built-in backends: Tesseract, plus the neural backend when compiled in.
pub fn default_backends(config: &EngineConfig) -> Vec<Arc<dyn OcrBackend>> {
    #[cfg_attr(not(feature = "neural"), allow(unused_mut))]
    let mut backends: Vec<Arc<dyn OcrBackend>> = vec![Arc::new(TesseractBackend::new())];

    #[cfg(feature = "neural")]
    backends.push(Arc::new(NeuralBackend::new(
        config.model_dir.clone().unwrap_or_else(default_model_dir),
    )));

    #[cfg(not(feature = "neural"))]
    let _ = config;

    backends
}
