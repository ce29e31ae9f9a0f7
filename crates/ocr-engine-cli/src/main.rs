//! ocr-engine - command-line front end for the OCR engine.
//!
//! Configuration comes from `--config`, or `ocr-engine.toml` discovered in the
//! current directory or a parent, or the built-in defaults.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ocr_engine::{EngineConfig, ExtractionResult, OcrEngine, OcrOptions, OutputFormat};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ocr-engine")]
#[command(about = "Extract text from images and scanned PDFs")]
#[command(version)]
struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Result cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract text from a single image
    Extract {
        image: PathBuf,

        #[command(flatten)]
        ocr: OcrArgs,

        /// Write the result here instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format: txt, json or markdown
        #[arg(short, long, default_value = "txt")]
        format: OutputFormat,
    },

    /// Extract text from many images in parallel
    Batch {
        #[arg(required = true)]
        images: Vec<PathBuf>,

        #[command(flatten)]
        ocr: OcrArgs,

        /// Worker threads (default: config max_workers)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Process lazily in chunks of this size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Stream results chunk by chunk instead of one batch
        #[arg(long)]
        stream: bool,

        /// Print each result as a JSON line
        #[arg(long)]
        json: bool,
    },

    /// Extract text from a PDF, OCRing pages without a text layer
    Pdf {
        pdf: PathBuf,

        /// Language used for OCRed pages
        #[arg(short, long, default_value = "en")]
        lang: String,
    },

    /// List OCR backends and their availability
    Backends,

    /// Inspect or clear the result cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show cache file count and size
    Stats,
    /// Delete every cached result
    Clear,
}

#[derive(clap::Args)]
struct OcrArgs {
    /// Backend name, or "auto"
    #[arg(short, long)]
    backend: Option<String>,

    /// OCR language (repeatable)
    #[arg(short, long = "lang")]
    languages: Vec<String>,

    /// Bypass the result cache
    #[arg(long)]
    no_cache: bool,

    /// Try the other available backends when the selected one fails or scores low
    #[arg(long)]
    fallback: bool,
}

impl OcrArgs {
    fn to_options(&self) -> Option<OcrOptions> {
        let options = OcrOptions {
            backend: self.backend.clone(),
            languages: (!self.languages.is_empty()).then(|| self.languages.clone()),
            use_cache: self.no_cache.then_some(false),
            fallback: self.fallback.then_some(true),
            ..Default::default()
        };
        (options != OcrOptions::default()).then_some(options)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "ocr_engine=debug,info" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(cli.config.as_deref(), cli.cache_dir)?;
    let engine = OcrEngine::new(config).context("Failed to initialize OCR engine")?;

    let outcome = run(&engine, cli.command);
    engine.pool_manager().shutdown_all(true, None);
    outcome
}

fn load_config(path: Option<&Path>, cache_dir: Option<PathBuf>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => match path.extension().and_then(|e| e.to_str()) {
            Some("json") => EngineConfig::from_json_file(path)?,
            _ => EngineConfig::from_toml_file(path)?,
        },
        None => EngineConfig::discover()?.unwrap_or_default(),
    };
    if cache_dir.is_some() {
        config.cache_dir = cache_dir;
    }
    Ok(config)
}

fn run(engine: &OcrEngine, command: Commands) -> Result<()> {
    match command {
        Commands::Extract {
            image,
            ocr,
            output,
            format,
        } => {
            let result = engine.extract_text(&image, ocr.to_options().as_ref())?;
            match output {
                Some(path) => {
                    engine.save_result(&result, &path, format)?;
                    eprintln!("Saved result to {}", path.display());
                }
                None if format == OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                None => println!("{}", result.text),
            }
        }

        Commands::Batch {
            images,
            ocr,
            workers,
            batch_size,
            stream,
            json,
        } => {
            let options = ocr.to_options();
            let mut failed = 0usize;
            let mut report = |result: ExtractionResult| -> Result<()> {
                if !result.success {
                    failed += 1;
                }
                print_batch_item(&result, json)
            };

            if stream || batch_size.is_some() {
                for result in engine.extract_batch_streaming(&images, options.as_ref(), workers, batch_size) {
                    report(result)?;
                }
            } else {
                for result in engine.extract_batch(&images, options.as_ref(), workers) {
                    report(result)?;
                }
            }

            if failed > 0 {
                bail!("{} of {} images failed", failed, images.len());
            }
        }

        Commands::Pdf { pdf, lang } => {
            println!("{}", engine.extract_from_pdf(&pdf, &lang)?);
        }

        Commands::Backends => {
            for backend in engine.backend_descriptors() {
                println!(
                    "{:<12} {:<24} priority={} available={} requests={} failed={}",
                    backend.name,
                    backend.label,
                    backend.priority,
                    backend.available,
                    backend.stats.total_requests,
                    backend.stats.failed_requests
                );
            }
            match engine.preferred_backend() {
                Ok(name) => println!("preferred: {}", name),
                Err(_) => println!("preferred: none"),
            }
        }

        Commands::Cache { command } => match command {
            CacheCommands::Stats => {
                let stats = engine.cache_stats()?;
                println!("directory: {}", engine.cache_dir().display());
                println!("files:     {}", stats.file_count);
                println!("size:      {:.2} MB", stats.total_size_mb());
            }
            CacheCommands::Clear => {
                let removed = engine.clear_cache()?;
                println!("Removed {} cached results", removed);
            }
        },
    }

    Ok(())
}

fn print_batch_item(result: &ExtractionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(result)?);
        return Ok(());
    }

    let path = result
        .image_path
        .as_ref()
        .map_or_else(|| "<unknown>".to_string(), |p| p.display().to_string());
    match &result.error {
        Some(error) => println!("{}: FAILED: {}", path, error),
        None => println!("{}: {} words ({})", path, result.word_count, result.source),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_extract_with_options() {
        let cli = Cli::try_parse_from([
            "ocr-engine", "extract", "scan.png", "--lang", "en", "--lang", "de", "--no-cache", "-f", "markdown",
        ])
        .unwrap();

        let Commands::Extract { image, ocr, format, .. } = cli.command else {
            panic!("expected extract");
        };
        assert_eq!(image, PathBuf::from("scan.png"));
        assert_eq!(format, OutputFormat::Markdown);

        let options = ocr.to_options().unwrap();
        assert_eq!(options.languages, Some(vec!["en".to_string(), "de".to_string()]));
        assert_eq!(options.use_cache, Some(false));
        assert!(options.backend.is_none());
        assert!(options.fallback.is_none());
    }

    #[test]
    fn test_parse_fallback_flag() {
        let cli = Cli::try_parse_from(["ocr-engine", "batch", "a.png", "--fallback"]).unwrap();
        let Commands::Batch { ocr, .. } = cli.command else {
            panic!("expected batch");
        };
        assert_eq!(ocr.to_options().unwrap().fallback, Some(true));
    }

    #[test]
    fn test_no_overrides_yield_none() {
        let cli = Cli::try_parse_from(["ocr-engine", "batch", "a.png", "b.png"]).unwrap();
        let Commands::Batch { images, ocr, .. } = cli.command else {
            panic!("expected batch");
        };
        assert_eq!(images.len(), 2);
        assert!(ocr.to_options().is_none());
    }

    #[test]
    fn test_batch_requires_images() {
        assert!(Cli::try_parse_from(["ocr-engine", "batch"]).is_err());
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(Cli::try_parse_from(["ocr-engine", "extract", "a.png", "-f", "docx"]).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ocr-engine.toml");
        std::fs::write(&path, "backend = \"tesseract\"\nmax_workers = 3\n").unwrap();

        let config = load_config(Some(&path), Some(dir.path().join("cache"))).unwrap();
        assert_eq!(config.backend, "tesseract");
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.cache_dir, Some(dir.path().join("cache")));
    }
}
