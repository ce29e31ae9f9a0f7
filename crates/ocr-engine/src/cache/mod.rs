//! Content-addressed, TTL-bound disk cache for extracted text.
//!
//! A cache key is the SHA-256 digest of the first kilobyte of the input file and
//! the canonical JSON form of the resolved options. Each entry is a single
//! `{key}.txt` file whose mtime drives expiry; expired entries are removed
//! lazily on the next read.
//!
//! Writes go to a uniquely named temp file in the same directory and are renamed
//! into place, so readers never observe a partially written entry.

use crate::{OcrError, Result};
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of leading content bytes hashed into the key.
pub const KEY_CONTENT_BYTES: usize = 1024;

const ENTRY_EXTENSION: &str = "txt";
const TEMP_MARKER: &str = ".txt.tmp.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub file_count: usize,
    pub total_bytes: u64,
}

impl CacheStats {
    pub fn size_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn total_size_mb(&self) -> f64 {
        self.total_bytes as f64 / 1024.0 / 1024.0
    }
}

/// Disk-backed result cache. Every operation is serialized by one lock per instance.
pub struct ResultCache {
    cache_dir: PathBuf,
    ttl: Duration,
    lock: ReentrantMutex<()>,
}

impl ResultCache {
    /// Open (creating if needed) a cache rooted at `cache_dir`.
    ///
    /// With `None`, uses `~/.quick_document_convertor/ocr_cache`. If the chosen
    /// directory can't be created, falls back to `{temp_dir}/ocr_cache`.
    pub fn new(cache_dir: Option<PathBuf>, ttl: Duration) -> Result<Self> {
        let preferred = cache_dir.unwrap_or_else(default_cache_dir);

        let cache_dir = match fs::create_dir_all(&preferred) {
            Ok(()) => preferred,
            Err(e) => {
                let fallback = std::env::temp_dir().join("ocr_cache");
                tracing::warn!(
                    preferred = %preferred.display(),
                    fallback = %fallback.display(),
                    error = %e,
                    "Cache directory not creatable, using temp directory"
                );
                fs::create_dir_all(&fallback).map_err(|e| {
                    OcrError::cache_with_source(
                        format!("Failed to create cache directory {}", fallback.display()),
                        e,
                    )
                })?;
                fallback
            }
        };

        tracing::debug!(cache_dir = %cache_dir.display(), ttl_secs = ttl.as_secs(), "Result cache ready");

        Ok(Self {
            cache_dir,
            ttl,
            lock: ReentrantMutex::new(()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.{}", key, ENTRY_EXTENSION))
    }

    /// Return the cached text for `key`, or `None` if absent, expired or empty.
    ///
    /// An expired entry is deleted. An empty entry stays on disk but counts as a
    /// miss, so blank OCR output is retried. Read errors are logged and treated
    /// as a miss.
    pub fn load(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock();
        let path = self.entry_path(key);

        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to stat cache entry");
                return None;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or_default();

        if age >= self.ttl {
            tracing::debug!(key = %key, age_secs = age.as_secs(), "Cache entry expired");
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(key = %key, error = %e, "Failed to remove expired cache entry");
            }
            return None;
        }

        match fs::read_to_string(&path) {
            Ok(text) if text.is_empty() => {
                tracing::debug!(key = %key, "Cached result is empty, treating as miss");
                None
            }
            Ok(text) => {
                tracing::debug!(key = %key, "Cache hit");
                Some(text)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read cache entry");
                None
            }
        }
    }

    /// Store `text` under `key`, replacing any previous entry atomically.
    pub fn save(&self, key: &str, text: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let path = self.entry_path(key);

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let temp_name = format!(
            "{}{}{}.{:?}.{}",
            key,
            TEMP_MARKER,
            std::process::id(),
            std::thread::current().id(),
            nanos
        );
        let temp_path = self.cache_dir.join(temp_name);

        fs::write(&temp_path, text.as_bytes())
            .map_err(|e| OcrError::cache_with_source("Failed to write temp cache file", e))?;

        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            OcrError::cache_with_source("Failed to rename cache file", e)
        })?;

        tracing::debug!(key = %key, bytes = text.len(), "Cached result");
        Ok(())
    }

    /// Remove every entry and leftover temp file. Returns the number of files removed.
    pub fn clear(&self) -> Result<usize> {
        let _guard = self.lock.lock();
        if !self.cache_dir.exists() {
            return Ok(0);
        }

        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| OcrError::cache_with_source("Failed to read cache directory", e))?;

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if is_cache_file(&path) || is_temp_file(&path) {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove cache file"),
                }
            }
        }

        tracing::info!(removed, "Cache cleared");
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let _guard = self.lock.lock();
        if !self.cache_dir.exists() {
            return Ok(CacheStats::default());
        }

        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| OcrError::cache_with_source("Failed to read cache directory", e))?;

        let mut stats = CacheStats::default();
        for entry in entries.flatten() {
            if is_cache_file(&entry.path()) {
                stats.file_count += 1;
                if let Ok(metadata) = entry.metadata() {
                    stats.total_bytes += metadata.len();
                }
            }
        }

        Ok(stats)
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("cache_dir", &self.cache_dir)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// `~/.quick_document_convertor/ocr_cache`, or `{temp_dir}/ocr_cache` without a home directory.
pub fn default_cache_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".quick_document_convertor").join("ocr_cache"),
        None => std::env::temp_dir().join("ocr_cache"),
    }
}

/// Derive the cache key for `path` under `options`.
///
/// Only the first [`KEY_CONTENT_BYTES`] bytes of the file take part, so two
/// files sharing that prefix and options collide.
pub fn compute_key<O: Serialize>(path: &Path, options: &O) -> Result<String> {
    let mut prefix = Vec::with_capacity(KEY_CONTENT_BYTES);
    fs::File::open(path)?
        .take(KEY_CONTENT_BYTES as u64)
        .read_to_end(&mut prefix)?;

    let options_json = canonical_json(options)?;

    let mut hasher = Sha256::new();
    hasher.update(&prefix);
    hasher.update(options_json.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Serialize `value` as JSON with object keys sorted at every level.
pub fn canonical_json<O: Serialize>(value: &O) -> Result<String> {
    let value = sort_keys(serde_json::to_value(value)?);
    Ok(serde_json::to_string(&value)?)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

fn is_cache_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains(TEMP_MARKER))
}
