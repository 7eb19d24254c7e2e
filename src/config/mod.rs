use crate::models::OcrSettings;
use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::fs;

/// Settings file inside the configuration directory.
pub const SETTINGS_FILE: &str = "ocr_settings.yaml";

/// Prefix of environment overrides (`DEEPREAD_OCR_MODEL_DIR`, `DEEPREAD_OCR_RECOGNITION_DPI`, ...).
pub const ENV_PREFIX: &str = "DEEPREAD_OCR";

/// Configuration manager for loading and saving OCR settings.
///
/// Settings are layered: built-in defaults, then `ocr_settings.yaml`, then
/// `DEEPREAD_OCR_*` environment variables.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    settings_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager, creating `config_dir` if needed.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            settings_path: config_dir.join(SETTINGS_FILE),
            config_dir,
        })
    }

    /// Load settings from the file and the process environment.
    pub fn load_settings(&self) -> Result<OcrSettings> {
        self.load_settings_from(None)
    }

    /// Load settings, reading environment overrides from `env` instead of the process
    /// environment when given.
    pub fn load_settings_from(&self, env: Option<config::Map<String, String>>) -> Result<OcrSettings> {
        if !self.settings_path.exists() {
            tracing::warn!(
                "Settings file not found at {}, using defaults",
                self.settings_path
            );
        }

        let defaults = Config::try_from(&OcrSettings::default())
            .context("Failed to build default settings")?;

        let environment = Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("search_roots")
            .with_list_parse_key("recognizer_command")
            .source(env);

        let settings: OcrSettings = Config::builder()
            .add_source(defaults)
            .add_source(
                File::new(self.settings_path.as_str(), FileFormat::Yaml).required(false),
            )
            .add_source(environment)
            .build()
            .with_context(|| format!("Failed to load settings: {}", self.settings_path))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))?;

        settings
            .validate()
            .map_err(|e| anyhow!(e))
            .with_context(|| format!("Invalid settings in {}", self.settings_path))?;

        tracing::info!(
            "Loaded OCR settings: model_dir={:?}, dpi={}, pairs={}",
            settings.model_dir,
            settings.recognition_dpi,
            settings.preferred_pairs.len()
        );
        Ok(settings)
    }

    /// Save settings to `ocr_settings.yaml`.
    pub fn save_settings(&self, settings: &OcrSettings) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(settings).context("Failed to serialize settings to YAML")?;

        fs::write(&self.settings_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(())
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }
}
