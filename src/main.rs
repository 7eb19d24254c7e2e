//! DeepRead OCR - OCR orchestration for scanned documents
//!
//! Main entry point for the OCR service and its model maintenance commands.
//!
//! # Overview
//!
//! `serve` (the default) reads one JSON request per line from stdin and writes one JSON
//! response per line to stdout. It initializes:
//! - Logging infrastructure (daily file rotation + stderr console)
//! - Tokio async runtime (background scans, inference worker subprocesses)
//! - Configuration loading ([`ConfigManager`])
//! - The model resolver, recognition engine and [`OcrPipeline`]
//!
//! # Requests
//!
//! ```text
//! {"id": 1, "method": "open_document", "path": "scan.pdf"}
//! {"id": 2, "method": "ocr_page", "page": 1}
//! {"id": 3, "method": "start_ocr_document"}
//! {"id": 4, "method": "get_ocr_progress"}
//! {"id": 5, "method": "set_ocr_mode", "enabled": false}
//! {"id": 6, "method": "close_document"}
//! ```
//!
//! # Model maintenance
//!
//! - `resolve`: print the detector/recognizer pair that would be bound
//! - `manifest`: write `MODEL_MANIFEST.json` for a model root
//! - `verify`: check a model root against its manifest

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use deepread_ocr::metrics::Metrics;
use deepread_ocr::models::OcrSettings;
use deepread_ocr::services::{
    installed_models, CommandRecognizer, ModelManifest, ModelResolver, RecognitionEngine,
};
use deepread_ocr::{APP_NAME, ConfigManager, OcrApi, OcrPipeline, VERSION};
use std::sync::Arc;
use tokio::io::BufReader;

/// DeepRead OCR - recognition backend for the document viewer
#[derive(Parser, Debug)]
#[command(name = "deepread-ocr", version)]
#[command(about = "OCR orchestration for scanned documents")]
struct Args {
    /// Directory holding ocr_settings.yaml
    #[arg(long, default_value = "config")]
    config_dir: Utf8PathBuf,

    /// Log at debug level regardless of settings
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve JSON-lines requests on stdin/stdout
    Serve,

    /// Resolve and print the model pair
    Resolve,

    /// Write MODEL_MANIFEST.json for a model root
    Manifest {
        /// Model root (defaults to the configured root)
        root: Option<Utf8PathBuf>,
    },

    /// Verify a model root against its MODEL_MANIFEST.json
    Verify {
        /// Model root (defaults to the configured root)
        root: Option<Utf8PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_manager = ConfigManager::new(&args.config_dir)?;
    let mut settings = config_manager.load_settings()?;
    settings.debug_mode |= args.debug;

    let _guard = deepread_ocr::logging::setup_logging_with_console(
        &settings.log_dir,
        APP_NAME,
        settings.debug_mode,
        true,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("deepread-ocr-worker")
        .build()?;

    let result = runtime.block_on(async {
        match args.command.unwrap_or(Command::Serve) {
            Command::Serve => serve(&settings).await,
            Command::Resolve => resolve(&settings).await,
            Command::Manifest { root } => write_manifest(&model_root(root, &settings)?),
            Command::Verify { root } => verify_manifest(&model_root(root, &settings)?),
        }
    });

    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    tracing::info!("Shutdown complete");

    result.inspect_err(|e| tracing::error!("{:#}", e))
}

/// Answer requests until stdin closes.
async fn serve(settings: &OcrSettings) -> Result<()> {
    let resolver = Arc::new(ModelResolver::from_settings(settings));
    let recognizer = Arc::new(CommandRecognizer::from_settings(settings));
    let engine = Arc::new(RecognitionEngine::new(resolver, recognizer));
    let metrics = Arc::new(Metrics::new());
    let pipeline = Arc::new(OcrPipeline::new(
        engine,
        metrics.clone(),
        settings.recognition_dpi,
    ));
    let api = Arc::new(OcrApi::new(pipeline.clone(), settings.effective_render_dir()));

    tracing::info!(
        "Serving requests (dpi={}, render_dir={})",
        settings.recognition_dpi,
        settings.effective_render_dir()
    );

    deepread_ocr::api::serve(
        api,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;

    pipeline.close_document().await;
    metrics.log_summary();
    Ok(())
}

async fn resolve(settings: &OcrSettings) -> Result<()> {
    let resolver = ModelResolver::from_settings(settings);
    let pair = resolver.resolve().await?;

    println!("root:       {}", pair.root);
    println!("detector:   {} ({})", pair.detector.name, pair.detector.dir);
    println!("recognizer: {} ({})", pair.recognizer.name, pair.recognizer.dir);
    Ok(())
}

/// `root` when given, else the explicit model dir, else the first search root.
fn model_root(root: Option<Utf8PathBuf>, settings: &OcrSettings) -> Result<Utf8PathBuf> {
    if let Some(root) = root {
        return Ok(root);
    }

    ModelResolver::from_settings(settings)
        .roots()
        .roots()
        .first()
        .cloned()
        .context("No model root configured and no default root available")
}

fn write_manifest(root: &Utf8Path) -> Result<()> {
    let models: Vec<(String, Utf8PathBuf)> = installed_models(root)
        .into_iter()
        .map(|artifact| (artifact.name, artifact.dir))
        .collect();
    if models.is_empty() {
        bail!("No complete models under {}", root);
    }

    let manifest = ModelManifest::generate(root, &models)?;
    let path = manifest.save(root)?;
    println!("Wrote {} ({} models)", path, manifest.models.len());
    Ok(())
}

fn verify_manifest(root: &Utf8Path) -> Result<()> {
    let Some(manifest) = ModelManifest::load(root)? else {
        bail!("No model manifest in {}", root);
    };

    let problems = manifest.verify(root)?;
    for problem in &problems {
        println!("{}", problem);
    }
    if !problems.is_empty() {
        bail!("{} problem(s) found in {}", problems.len(), root);
    }

    println!("{} models verified", manifest.models.len());
    Ok(())
}
