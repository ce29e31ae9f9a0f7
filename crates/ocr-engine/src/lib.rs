//! OCR Engine - Concurrent OCR Processing Core
//!
//! Turns image files (and scanned PDF pages) into text through pluggable OCR
//! backends, with a resource-aware worker pool manager, a content-addressed
//! on-disk result cache, and batch/streaming extraction with backpressure.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ocr_engine::{EngineConfig, OcrEngine, OcrOptions};
//!
//! # fn main() -> ocr_engine::Result<()> {
//! let engine = OcrEngine::new(EngineConfig::default())?;
//!
//! let result = engine.extract_text("scan.png", Some(&OcrOptions::with_language("de")))?;
//! println!("{} via {:?}", result.text, result.backend);
//!
//! for item in engine.extract_batch_streaming(&["a.png", "b.jpg"], None, Some(2), Some(10)) {
//!     println!("{:?}: success={}", item.image_path, item.success);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Pool** (`pool`): named rayon pools under a global thread budget, with
//!   blocking admission control
//! - **Backends** (`backends`): Tesseract CLI and an optional neural backend
//!   behind the [`OcrBackend`](backends::OcrBackend) trait
//! - **Cache** (`cache`): SHA-256 keyed text files with TTL expiry
//! - **Engine** (`engine`): validation, dispatch, batch and streaming APIs
//!
//! # Features
//!
//! - `neural` - pure-Rust neural OCR via `ocrs`
//! - `pdf` - PDF text layer and page rendering via pdfium

#![deny(unsafe_code)]

pub mod backends;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod pdf;
pub mod pool;
pub mod preprocess;
pub mod types;

pub use backends::{BackendDescriptor, BackendStats, OcrBackend};
pub use cache::CacheStats;
pub use config::{EngineConfig, OcrOptions};
pub use engine::{BatchStream, CancellationToken, OcrEngine, OcrEngineBuilder};
pub use error::{OcrError, Result};
pub use pool::PoolManager;
pub use types::{ExtractionResult, OutputFormat};
