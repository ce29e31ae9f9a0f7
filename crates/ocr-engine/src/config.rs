//! Engine configuration loading and per-call option merging.
//!
//! [`EngineConfig`] holds the engine-wide defaults and can be loaded from TOML or
//! JSON files, or discovered as `ocr-engine.toml` in the current directory or
//! any parent. [`OcrOptions`] is the per-call override set; it is shallowly
//! merged over the defaults into a [`ResolvedOptions`] for each extraction.
//!
//! # Example
//!
//! ```rust
//! use ocr_engine::config::{EngineConfig, OcrOptions};
//!
//! let config = EngineConfig::default();
//! let overrides = OcrOptions {
//!     backend: Some("tesseract".to_string()),
//!     ..Default::default()
//! };
//! let resolved = config.resolve(Some(&overrides));
//! assert_eq!(resolved.backend, "tesseract");
//! assert_eq!(resolved.languages, vec!["en".to_string()]);
//! ```

use crate::{OcrError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name searched for by [`EngineConfig::discover`].
pub const CONFIG_FILE_NAME: &str = "ocr-engine.toml";

/// Backend selector meaning "pick the preferred available backend".
pub const AUTO_BACKEND: &str = "auto";

/// Binarization strategy applied by the default preprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMethod {
    #[default]
    Adaptive,
    Otsu,
    None,
}

/// Options handed to the image preprocessing collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    #[serde(default = "default_true")]
    pub enhance_contrast: bool,

    #[serde(default = "default_true")]
    pub denoise: bool,

    /// Longest edge in pixels; larger images are downscaled (0 = never resize)
    #[serde(default = "default_resize_max")]
    pub resize_max: u32,

    #[serde(default)]
    pub threshold_method: ThresholdMethod,
}

/// Multi-backend fallback settings.
///
/// With `enabled` set, a backend that errors or returns text below the quality
/// gate is followed by the remaining available backends in priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Results with a known mean confidence below this (0-100) try the next backend
    #[serde(default = "default_fallback_min_confidence")]
    pub min_confidence: f64,

    /// Results with fewer trimmed characters than this try the next backend
    #[serde(default = "default_fallback_min_text_chars")]
    pub min_text_chars: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_confidence: default_fallback_min_confidence(),
            min_text_chars: default_fallback_min_text_chars(),
        }
    }
}

impl FallbackConfig {
    /// True when a backend result is good enough to stop falling back.
    ///
    /// A `None` confidence (backend reports none) only has to pass the length check.
    pub fn accepts(&self, text: &str, confidence: Option<f64>) -> bool {
        text.trim().chars().count() >= self.min_text_chars && confidence.is_none_or(|c| c >= self.min_confidence)
    }
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            enhance_contrast: true,
            denoise: true,
            resize_max: default_resize_max(),
            threshold_method: ThresholdMethod::Adaptive,
        }
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `auto` or a backend name (`tesseract`, `neural`, ...)
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Ordered language list, short codes (`en`) or Tesseract codes (`eng`)
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    #[serde(default = "default_true")]
    pub use_cache: bool,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Maximum accepted input size in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Minimum token confidence (0-100) kept by backends that filter tokens
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: u8,

    #[serde(default = "default_tesseract_config")]
    pub tesseract_config: String,

    #[serde(default)]
    pub preprocessing: PreprocessingConfig,

    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Cache directory (None = `~/.quick_document_convertor/ocr_cache`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Directory holding the neural backend's model files (None = `~/.cache/ocrs`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            languages: default_languages(),
            use_cache: true,
            cache_ttl_secs: default_cache_ttl_secs(),
            max_file_size: default_max_file_size(),
            max_workers: default_max_workers(),
            batch_size: default_batch_size(),
            confidence_threshold: default_confidence_threshold(),
            tesseract_config: default_tesseract_config(),
            preprocessing: PreprocessingConfig::default(),
            fallback: FallbackConfig::default(),
            cache_dir: None,
            model_dir: None,
        }
    }
}

/// Per-call overrides. Unset fields fall back to the engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_cache: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tesseract_config: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preprocessing: Option<PreprocessingConfig>,

    /// Turn backend fallback on or off for this call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<bool>,
}

impl OcrOptions {
    /// Options selecting a single language, as used for rasterized PDF pages.
    pub fn with_language(language: impl Into<String>) -> Self {
        Self {
            languages: Some(vec![language.into()]),
            ..Default::default()
        }
    }
}

/// Options for one extraction after merging overrides over the defaults.
///
/// Its canonical JSON form is part of the result cache key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedOptions {
    pub backend: String,
    pub languages: Vec<String>,
    pub use_cache: bool,
    pub confidence_threshold: u8,
    pub tesseract_config: String,
    pub preprocessing: PreprocessingConfig,
    pub fallback: bool,
}

impl EngineConfig {
    /// Shallow-merge `overrides` over this configuration.
    pub fn resolve(&self, overrides: Option<&OcrOptions>) -> ResolvedOptions {
        let mut resolved = ResolvedOptions {
            backend: self.backend.clone(),
            languages: self.languages.clone(),
            use_cache: self.use_cache,
            confidence_threshold: self.confidence_threshold,
            tesseract_config: self.tesseract_config.clone(),
            preprocessing: self.preprocessing.clone(),
            fallback: self.fallback.enabled,
        };

        if let Some(o) = overrides {
            if let Some(backend) = &o.backend {
                resolved.backend = backend.clone();
            }
            if let Some(languages) = &o.languages {
                resolved.languages = languages.clone();
            }
            if let Some(use_cache) = o.use_cache {
                resolved.use_cache = use_cache;
            }
            if let Some(threshold) = o.confidence_threshold {
                resolved.confidence_threshold = threshold;
            }
            if let Some(tesseract_config) = &o.tesseract_config {
                resolved.tesseract_config = tesseract_config.clone();
            }
            if let Some(preprocessing) = &o.preprocessing {
                resolved.preprocessing = preprocessing.clone();
            }
            if let Some(fallback) = o.fallback {
                resolved.fallback = fallback;
            }
        }

        resolved
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `OcrError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.backend.trim().is_empty() {
            return Err(OcrError::config("backend must not be empty"));
        }
        if self.languages.is_empty() {
            return Err(OcrError::config("languages must contain at least one entry"));
        }
        if self.max_workers == 0 {
            return Err(OcrError::config("max_workers must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(OcrError::config("batch_size must be at least 1"));
        }
        if self.confidence_threshold > 100 {
            return Err(OcrError::config(format!(
                "confidence_threshold must be within 0-100, got {}",
                self.confidence_threshold
            )));
        }
        if self.max_file_size == 0 {
            return Err(OcrError::config("max_file_size must be greater than zero"));
        }
        if !(0.0..=100.0).contains(&self.fallback.min_confidence) {
            return Err(OcrError::config(format!(
                "fallback.min_confidence must be within 0-100, got {}",
                self.fallback.min_confidence
            )));
        }
        Ok(())
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `OcrError::Config` if the file can't be read, isn't valid TOML, or
    /// fails [`validate`](Self::validate).
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OcrError::config_with_source(format!("Failed to read config file {}", path.display()), e)
        })?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| OcrError::config(format!("Invalid TOML in {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OcrError::config_with_source(format!("Failed to read config file {}", path.display()), e)
        })?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| OcrError::config(format!("Invalid JSON in {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Search for `ocr-engine.toml` in the current directory and its parents.
    ///
    /// # Returns
    ///
    /// - `Some(config)` if found
    /// - `None` if no config file found
    pub fn discover() -> Result<Option<Self>> {
        let mut current = std::env::current_dir()?;

        loop {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                return Ok(Some(Self::from_toml_file(candidate)?));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }
}

fn default_true() -> bool {
    true
}

fn default_backend() -> String {
    AUTO_BACKEND.to_string()
}

fn default_languages() -> Vec<String> {
    vec!["en".to_string()]
}

fn default_cache_ttl_secs() -> u64 {
    86_400
}

fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}

fn default_max_workers() -> usize {
    2
}

fn default_batch_size() -> usize {
    10
}

fn default_confidence_threshold() -> u8 {
    30
}

fn default_tesseract_config() -> String {
    "--oem 3 --psm 6".to_string()
}

fn default_resize_max() -> u32 {
    2048
}

fn default_fallback_min_confidence() -> f64 {
    70.0
}

fn default_fallback_min_text_chars() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.backend, "auto");
        assert_eq!(config.languages, vec!["en"]);
        assert!(config.use_cache);
        assert_eq!(config.cache_ttl_secs, 86_400);
        assert_eq!(config.max_file_size, 52_428_800);
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.confidence_threshold, 30);
        assert_eq!(config.tesseract_config, "--oem 3 --psm 6");
        assert_eq!(config.preprocessing.resize_max, 2048);
        assert_eq!(config.preprocessing.threshold_method, ThresholdMethod::Adaptive);
        assert!(!config.fallback.enabled);
        assert_eq!(config.fallback.min_confidence, 70.0);
        assert_eq!(config.fallback.min_text_chars, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_without_overrides_matches_defaults() {
        let config = EngineConfig::default();
        let resolved = config.resolve(None);
        assert_eq!(resolved.backend, config.backend);
        assert_eq!(resolved.languages, config.languages);
        assert_eq!(resolved.use_cache, config.use_cache);
        assert_eq!(resolved.preprocessing, config.preprocessing);
    }

    #[test]
    fn test_resolve_is_shallow() {
        let config = EngineConfig::default();
        let overrides = OcrOptions {
            preprocessing: Some(PreprocessingConfig {
                denoise: false,
                ..Default::default()
            }),
            use_cache: Some(false),
            ..Default::default()
        };

        let resolved = config.resolve(Some(&overrides));
        assert!(!resolved.use_cache);
        assert!(!resolved.preprocessing.denoise);
        assert!(resolved.preprocessing.enhance_contrast);
        assert_eq!(resolved.tesseract_config, "--oem 3 --psm 6");
    }

    #[test]
    fn test_with_language() {
        let options = OcrOptions::with_language("deu");
        let resolved = EngineConfig::default().resolve(Some(&options));
        assert_eq!(resolved.languages, vec!["deu"]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = EngineConfig {
            max_workers: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(OcrError::Config { .. })));

        let config = EngineConfig {
            confidence_threshold: 101,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            languages: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            fallback: FallbackConfig {
                min_confidence: 120.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fallback_override_per_call() {
        let config = EngineConfig {
            fallback: FallbackConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.resolve(None).fallback);

        let off = OcrOptions {
            fallback: Some(false),
            ..Default::default()
        };
        assert!(!config.resolve(Some(&off)).fallback);
    }

    #[test]
    fn test_fallback_quality_gate() {
        let gate = FallbackConfig::default();
        assert!(gate.accepts("hello world", Some(70.0)));
        assert!(!gate.accepts("hello world", Some(69.9)));
        assert!(!gate.accepts("  hi  ", Some(99.0)));
        assert!(gate.accepts("no confidence reported", None));
        assert!(!gate.accepts("", None));
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        fs::write(
            &config_path,
            r#"
backend = "tesseract"
languages = ["en", "de"]
cache_ttl_secs = 60
max_workers = 4

[preprocessing]
denoise = false
threshold_method = "otsu"

[fallback]
enabled = true
        "#,
        )
        .unwrap();

        let config = EngineConfig::from_toml_file(&config_path).unwrap();
        assert_eq!(config.backend, "tesseract");
        assert_eq!(config.languages, vec!["en", "de"]);
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.max_workers, 4);
        assert!(!config.preprocessing.denoise);
        assert!(config.preprocessing.enhance_contrast);
        assert_eq!(config.preprocessing.threshold_method, ThresholdMethod::Otsu);
        assert!(config.fallback.enabled);
        assert_eq!(config.fallback.min_confidence, 70.0);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_from_toml_file_invalid() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "backend = [").unwrap();

        let err = EngineConfig::from_toml_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_file_missing() {
        let dir = tempdir().unwrap();
        let err = EngineConfig::from_toml_file(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, OcrError::Config { .. }));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("ocr.json");
        fs::write(&config_path, r#"{"use_cache": false, "confidence_threshold": 55}"#).unwrap();

        let config = EngineConfig::from_json_file(&config_path).unwrap();
        assert!(!config.use_cache);
        assert_eq!(config.confidence_threshold, 55);
        assert_eq!(config.backend, "auto");
    }

    #[test]
    #[serial]
    fn test_discover_config_in_parent() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "batch_size = 3\n").unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&nested).unwrap();
        let discovered = EngineConfig::discover();
        std::env::set_current_dir(original_dir).unwrap();

        let config = discovered.unwrap().expect("config should be discovered");
        assert_eq!(config.batch_size, 3);
    }

    #[test]
    fn test_resolved_options_json_has_sorted_keys() {
        let resolved = EngineConfig::default().resolve(None);
        let value = serde_json::to_value(&resolved).unwrap();
        let json = serde_json::to_string(&value).unwrap();
        let backend_pos = json.find("\"backend\"").unwrap();
        let use_cache_pos = json.find("\"use_cache\"").unwrap();
        let languages_pos = json.find("\"languages\"").unwrap();
        assert!(backend_pos < languages_pos);
        assert!(languages_pos < use_cache_pos);
    }
}
