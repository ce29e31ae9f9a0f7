//! Error types for the OCR core.
//!
//! Every fallible operation returns [`OcrError`]. Variants map onto the failure
//! classes callers are expected to react to differently:
//!
//! - `Validation` - bad caller input (missing file, oversized file, unsupported
//!   extension, unsafe path). Never retried.
//! - `ImageProcessing` - the preprocessing collaborator failed. No fallback path.
//! - `Backend` - no backend available, the requested one is unavailable, or the
//!   backend call itself failed.
//! - `Cache` - cache I/O. The engine logs and swallows these; a cache failure
//!   never turns a successful extraction into a failed one.
//!
//! Batch and streaming APIs convert per-item errors into result records instead
//! of returning them.
//!
//! # Example
//!
//! ```rust
//! use ocr_engine::{OcrError, Result};
//!
//! fn check_size(size: u64, limit: u64) -> Result<()> {
//!     if size > limit {
//!         return Err(OcrError::validation(format!(
//!             "File too large: {} bytes exceeds limit of {} bytes",
//!             size, limit
//!         )));
//!     }
//!     Ok(())
//! }
//! # assert!(check_size(10, 5).is_err());
//! ```
use thiserror::Error;

/// Result type alias using `OcrError`.
pub type Result<T> = std::result::Result<T, OcrError>;

/// Main error type for OCR core operations.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Image processing error: {message}")]
    ImageProcessing {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("OCR backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("PDF error: {message}")]
    Pdf {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for OcrError {
    fn from(err: serde_json::Error) -> Self {
        OcrError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<image::ImageError> for OcrError {
    fn from(err: image::ImageError) -> Self {
        OcrError::ImageProcessing {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $variant:ident) => {
        pastey::paste! {
            #[doc = "Create a " $variant " error"]
            pub fn $name<S: Into<String>>(message: S) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            #[doc = "Create a " $variant " error with source"]
            pub fn [<$name _with_source>]<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
                message: S,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        }
    };
}

impl OcrError {
    error_constructor!(validation, Validation);
    error_constructor!(image_processing, ImageProcessing);
    error_constructor!(backend, Backend);
    error_constructor!(cache, Cache);
    error_constructor!(pdf, Pdf);
    error_constructor!(config, Config);
    error_constructor!(serialization, Serialization);

    /// Build a `TaskPanicked` error from a caught panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        OcrError::TaskPanicked(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: OcrError = io_err.into();
        assert!(matches!(err, OcrError::Io(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_validation_error() {
        let err = OcrError::validation("Image file not found: /tmp/x.png");
        assert_eq!(err.to_string(), "Validation error: Image file not found: /tmp/x.png");
    }

    #[test]
    fn test_validation_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad path");
        let err = OcrError::validation_with_source("Invalid or unsafe path", source);
        assert_eq!(err.to_string(), "Validation error: Invalid or unsafe path");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_backend_error() {
        let err = OcrError::backend("No OCR backends available");
        assert_eq!(err.to_string(), "OCR backend error: No OCR backends available");
    }

    #[test]
    fn test_image_processing_error_with_source() {
        let source = std::io::Error::other("decode failed");
        let err = OcrError::image_processing_with_source("Image preprocessing failed", source);
        assert_eq!(err.to_string(), "Image processing error: Image preprocessing failed");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_cache_error() {
        let err = OcrError::cache("Failed to rename cache file");
        assert_eq!(err.to_string(), "Cache error: Failed to rename cache file");
    }

    #[test]
    fn test_pdf_and_config_errors() {
        assert_eq!(OcrError::pdf("page 3 not found").to_string(), "PDF error: page 3 not found");
        assert_eq!(
            OcrError::config("Invalid TOML").to_string(),
            "Configuration error: Invalid TOML"
        );
    }

    #[test]
    fn test_from_panic_str_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let err = OcrError::from_panic(payload);
        assert_eq!(err.to_string(), "Task panicked: boom");
    }

    #[test]
    fn test_from_panic_string_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        assert!(matches!(OcrError::from_panic(payload), OcrError::TaskPanicked(m) if m == "owned boom"));
    }

    #[test]
    fn test_from_panic_unknown_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(42_u32);
        assert_eq!(OcrError::from_panic(payload).to_string(), "Task panicked: unknown panic payload");
    }

    #[test]
    fn test_serde_json_error_from() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: OcrError = json_err.into();
        assert!(matches!(err, OcrError::Serialization { .. }));
    }
}
