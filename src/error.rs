use crate::models::ModelRole;
use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors surfaced by the OCR subsystem.
///
/// Every variant maps to a stable [`kind`](OcrError::kind) string reported across the
/// request/response boundary next to the human-readable message.
#[derive(Error, Debug)]
pub enum OcrError {
    /// No complete, consistent detector/recognizer pair under the governing root(s).
    #[error("no usable {missing} model found under {searched}: {detail}")]
    ModelResolution {
        missing: ModelRole,
        searched: String,
        detail: String,
    },

    /// A runtime capability is unusable even after the availability probe.
    #[error("`{capability}` is missing runtime dependencies: {}", format_missing(.missing))]
    EngineDependency {
        capability: String,
        missing: Vec<String>,
    },

    /// Loaded artifact identity still disagrees after one forced re-resolution.
    #[error("model identity mismatch persists after re-resolution: requested {requested}, artifact declares {declared}")]
    EngineModelMismatch { requested: String, declared: String },

    #[error("recognition failed: {0}")]
    EngineRuntime(String),

    #[error("failed to render page {page}: {detail}")]
    Render { page: u32, detail: String },

    #[error("no document is open")]
    NoDocument,

    #[error("page {page} is out of range (document has {page_count} pages)")]
    InvalidPage { page: u32, page_count: u32 },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn format_missing(missing: &[String]) -> String {
    if missing.is_empty() {
        "unknown packages".to_string()
    } else {
        missing.join(", ")
    }
}

impl OcrError {
    /// Stable snake_case identifier of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            OcrError::ModelResolution { .. } => "model_resolution",
            OcrError::EngineDependency { .. } => "engine_dependency",
            OcrError::EngineModelMismatch { .. } => "engine_model_mismatch",
            OcrError::EngineRuntime(_) => "engine_runtime",
            OcrError::Render { .. } => "render",
            OcrError::NoDocument => "no_document",
            OcrError::InvalidPage { .. } => "invalid_page",
            OcrError::Io { .. } => "io",
        }
    }

    /// Errors confined to a single page; everything else blocks every OCR attempt.
    pub fn is_page_level(&self) -> bool {
        matches!(
            self,
            OcrError::EngineRuntime(_) | OcrError::Render { .. } | OcrError::InvalidPage { .. }
        )
    }

    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        OcrError::Io {
            path: path.into(),
            source,
        }
    }
}
