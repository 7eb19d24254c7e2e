// DeepRead OCR - OCR orchestration for scanned documents
//
// This is the library crate containing model resolution, page recognition, coordinate
// normalization and the background document scan. The binary crate (main.rs) exposes it
// over a JSON-lines channel plus model maintenance commands.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use api::OcrApi;
pub use config::ConfigManager;
pub use error::OcrError;
pub use metrics::Metrics;
pub use models::{NormalizedLine, OcrSettings, PageResult, ScanState, ScanStatus};
pub use pipeline::OcrPipeline;
pub use state::{ScanEvent, ScanStateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
