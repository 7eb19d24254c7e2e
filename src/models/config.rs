use crate::models::PairCandidate;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Resolution used for OCR rasterization unless configured otherwise.
pub const DEFAULT_RECOGNITION_DPI: u32 = 150;

/// Accepted range for `recognition_dpi`.
pub const DPI_RANGE: std::ops::RangeInclusive<u32> = 36..=1200;

/// OCR settings loaded from `ocr_settings.yaml` with `DEEPREAD_OCR_*` overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Explicit model root. When set, no other root is ever consulted.
    pub model_dir: Option<Utf8PathBuf>,

    /// Default search path used when `model_dir` is unset. Empty means
    /// `$PADDLE_PDX_CACHE_HOME` then `~/.paddlex`.
    pub search_roots: Vec<Utf8PathBuf>,

    /// Detector/recognizer pairs to bind, most preferred first.
    pub preferred_pairs: Vec<PairCandidate>,

    /// Rasterization resolution for recognition.
    pub recognition_dpi: u32,

    /// argv of the external inference worker.
    pub recognizer_command: Vec<String>,

    /// Per-invocation timeout for the inference worker.
    pub recognizer_timeout_secs: u64,

    /// Scratch directory for rendered pages. Defaults to `<tmp>/deepread-ocr`.
    pub render_dir: Option<Utf8PathBuf>,

    pub log_dir: Utf8PathBuf,

    pub debug_mode: bool,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            model_dir: None,
            search_roots: Vec::new(),
            preferred_pairs: PairCandidate::defaults(),
            recognition_dpi: DEFAULT_RECOGNITION_DPI,
            recognizer_command: vec![
                "python".to_string(),
                "-m".to_string(),
                "deepread_ocr_worker".to_string(),
            ],
            recognizer_timeout_secs: 300,
            render_dir: None,
            log_dir: Utf8PathBuf::from("logs"),
            debug_mode: false,
        }
    }
}

impl OcrSettings {
    /// Check values that would otherwise fail deep inside the pipeline.
    pub fn validate(&self) -> Result<(), String> {
        if !DPI_RANGE.contains(&self.recognition_dpi) {
            return Err(format!(
                "recognition_dpi {} outside {}..={}",
                self.recognition_dpi,
                DPI_RANGE.start(),
                DPI_RANGE.end()
            ));
        }
        if self.recognizer_command.is_empty() {
            return Err("recognizer_command must not be empty".to_string());
        }
        if self.preferred_pairs.is_empty() {
            return Err("preferred_pairs must list at least one pair".to_string());
        }
        if let Some(bad) = self.preferred_pairs.iter().find(|c| !c.is_consistent()) {
            return Err(format!(
                "preferred pair {} + {} is not a consistent detector/recognizer pair",
                bad.detector, bad.recognizer
            ));
        }
        Ok(())
    }

    /// Scratch directory for rendered pages.
    pub fn effective_render_dir(&self) -> Utf8PathBuf {
        self.render_dir.clone().unwrap_or_else(|| {
            Utf8PathBuf::try_from(std::env::temp_dir())
                .unwrap_or_else(|_| Utf8PathBuf::from("."))
                .join("deepread-ocr")
        })
    }
}
