use crate::models::{ModelPair, OcrSettings};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Deserialize;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Capability name reported by the inference runtime for the OCR pipeline.
pub const OCR_CAPABILITY: &str = "OCR";

/// One line as emitted by the inference capability, before validation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawLine {
    pub text: String,
    pub confidence: f32,
    /// Vertices in render pixels, top-left origin.
    pub polygon: Vec<[f64; 2]>,
}

/// Result of the lightweight "is this capability usable" probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Usable,
    /// Packages the capability still lacks. May be empty when the probe could not tell.
    Missing(Vec<String>),
}

/// Failures reported by the inference capability.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    /// Dependency verification for `capability` refused to load.
    #[error("`{capability}` failed its dependency check")]
    DependencyCheck { capability: String },

    /// The loaded artifact is not the model that was requested, or its files are gone.
    #[error("{}", describe_mismatch(.requested, .declared, .artifact))]
    ModelMismatch {
        requested: Option<String>,
        declared: Option<String>,
        /// Artifact file named by the runtime, when it reported one.
        artifact: Option<Utf8PathBuf>,
    },

    #[error("{0}")]
    Runtime(String),
}

fn describe_mismatch(
    requested: &Option<String>,
    declared: &Option<String>,
    artifact: &Option<Utf8PathBuf>,
) -> String {
    match (requested, declared, artifact) {
        (Some(requested), Some(declared), _) => {
            format!("model name mismatch: requested {}, artifact declares {}", requested, declared)
        }
        (_, _, Some(artifact)) => format!("model artifact unreadable: {}", artifact),
        _ => "model name mismatch".to_string(),
    }
}

/// The detection/recognition inference capability.
///
/// Implementations load a [`ModelPair`] by its declared identities and run
/// detection plus recognition over one rendered page image.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Load both members of `pair`. With `verify_dependencies` false the capability skips
    /// its own dependency metadata check.
    async fn load(&self, pair: &ModelPair, verify_dependencies: bool) -> Result<(), CapabilityError>;

    /// Recognize every text line in `image`, in reading order.
    async fn predict(&self, pair: &ModelPair, image: &Utf8Path) -> Result<Vec<RawLine>, CapabilityError>;

    /// Check whether `capability` is actually usable in this environment.
    async fn probe(&self, capability: &str) -> ProbeOutcome;
}

#[derive(Debug, Deserialize)]
struct PredictOutput {
    #[serde(default)]
    lines: Vec<RawLine>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    missing: Vec<String>,
}

/// Runs an external inference worker as a subprocess per operation.
///
/// The worker receives a subcommand (`check`, `predict` or `probe`) plus model flags, prints
/// JSON on stdout and reports failures on stderr with a non-zero exit. Stderr is classified
/// with precompiled patterns:
///
/// - `dependency_pattern`: `` `OCR` requires additional dependencies ``
/// - `mismatch_pattern`: `model name mismatch`, names picked up by `mismatch_names_pattern`
///   (`expected 'A' ... got 'B'`)
/// - `missing_file_pattern`: `Cannot open file <path>`
pub struct CommandRecognizer {
    program: String,
    base_args: Vec<String>,
    timeout: Duration,

    dependency_pattern: Regex,
    mismatch_pattern: Regex,
    mismatch_names_pattern: Regex,
    missing_file_pattern: Regex,

    /// Set once a load succeeded with verification disabled; later invocations keep it off.
    skip_dependency_check: AtomicBool,
}

impl CommandRecognizer {
    pub fn new(argv: &[String], timeout: Duration) -> Self {
        let (program, base_args) = match argv.split_first() {
            Some((program, rest)) => (program.clone(), rest.to_vec()),
            None => (String::new(), Vec::new()),
        };

        Self {
            program,
            base_args,
            timeout,
            dependency_pattern: Regex::new(r"`([^`]+)` requires additional dependencies")
                .expect("Invalid dependency regex"),
            mismatch_pattern: Regex::new(r"(?i)model name mismatch").expect("Invalid mismatch regex"),
            mismatch_names_pattern: Regex::new(
                r#"(?i)expected\s*[:=]?\s*['"]?([\w.\-]+)['"]?.*?(?:got|actual|declared)\s*[:=]?\s*['"]?([\w.\-]+)['"]?"#,
            )
            .expect("Invalid mismatch names regex"),
            missing_file_pattern: Regex::new(r"Cannot open file\s+([^\s,]+)")
                .expect("Invalid missing file regex"),
            skip_dependency_check: AtomicBool::new(false),
        }
    }

    pub fn from_settings(settings: &OcrSettings) -> Self {
        Self::new(
            &settings.recognizer_command,
            Duration::from_secs(settings.recognizer_timeout_secs),
        )
    }

    /// Map worker stderr to a capability error.
    pub fn classify(&self, stderr: &str) -> CapabilityError {
        if let Some(caps) = self.dependency_pattern.captures(stderr) {
            return CapabilityError::DependencyCheck {
                capability: caps[1].to_string(),
            };
        }

        if self.mismatch_pattern.is_match(stderr) {
            let names = self.mismatch_names_pattern.captures(stderr);
            return CapabilityError::ModelMismatch {
                requested: names.as_ref().map(|c| c[1].to_string()),
                declared: names.as_ref().map(|c| c[2].to_string()),
                artifact: self.missing_artifact(stderr),
            };
        }

        if let Some(artifact) = self.missing_artifact(stderr) {
            return CapabilityError::ModelMismatch {
                requested: None,
                declared: None,
                artifact: Some(artifact),
            };
        }

        let detail = stderr.trim();
        CapabilityError::Runtime(if detail.is_empty() {
            "inference worker failed without diagnostics".to_string()
        } else {
            detail.lines().last().unwrap_or(detail).to_string()
        })
    }

    fn missing_artifact(&self, stderr: &str) -> Option<Utf8PathBuf> {
        self.missing_file_pattern
            .captures(stderr)
            .map(|caps| Utf8PathBuf::from(caps[1].trim_end_matches(['.', ','])))
    }

    fn model_args(&self, pair: &ModelPair) -> Vec<String> {
        let mut args = vec![
            "--det-name".to_string(),
            pair.detector.name.clone(),
            "--det-dir".to_string(),
            pair.detector.dir.to_string(),
            "--rec-name".to_string(),
            pair.recognizer.name.clone(),
            "--rec-dir".to_string(),
            pair.recognizer.dir.to_string(),
        ];
        if self.skip_dependency_check.load(Ordering::Acquire) {
            args.push("--skip-dependency-check".to_string());
        }
        args
    }

    /// Run the worker with `args`; stdout on success, classified stderr otherwise.
    async fn run(&self, args: Vec<String>) -> Result<String, CapabilityError> {
        let subcommand = args.first().cloned().unwrap_or_default();
        tracing::debug!("Running inference worker: {} {}", self.program, subcommand);
        let start = Instant::now();

        let child = Command::new(&self.program)
            .args(&self.base_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CapabilityError::Runtime(format!(
                    "failed to spawn inference worker `{}`: {}",
                    self.program, e
                ))
            })?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                tracing::warn!("Inference worker timed out after {:?}", self.timeout);
                CapabilityError::Runtime(format!("inference worker timed out after {:?}", self.timeout))
            })?
            .map_err(|e| CapabilityError::Runtime(format!("inference worker I/O error: {}", e)))?;

        tracing::debug!(
            "Inference worker `{}` finished in {:.2}s with {}",
            subcommand,
            start.elapsed().as_secs_f32(),
            output.status
        );

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(self.classify(&String::from_utf8_lossy(&output.stderr)))
        }
    }
}

#[async_trait]
impl Recognizer for CommandRecognizer {
    async fn load(&self, pair: &ModelPair, verify_dependencies: bool) -> Result<(), CapabilityError> {
        if !verify_dependencies {
            self.skip_dependency_check.store(true, Ordering::Release);
        }
        let mut args = vec!["check".to_string()];
        args.extend(self.model_args(pair));
        self.run(args).await?;
        tracing::info!("Inference worker loaded {}", pair);
        Ok(())
    }

    async fn predict(&self, pair: &ModelPair, image: &Utf8Path) -> Result<Vec<RawLine>, CapabilityError> {
        let mut args = vec!["predict".to_string()];
        args.extend(self.model_args(pair));
        args.push("--image".to_string());
        args.push(image.to_string());

        let stdout = self.run(args).await?;
        let output: PredictOutput = serde_json::from_str(stdout.trim()).map_err(|e| {
            CapabilityError::Runtime(format!("malformed prediction output: {}", e))
        })?;
        Ok(output.lines)
    }

    async fn probe(&self, capability: &str) -> ProbeOutcome {
        let args = vec![
            "probe".to_string(),
            "--capability".to_string(),
            capability.to_string(),
        ];

        match self.run(args).await {
            Ok(stdout) => match serde_json::from_str::<ProbeOutput>(stdout.trim()) {
                Ok(out) if out.missing.is_empty() => ProbeOutcome::Usable,
                Ok(out) => ProbeOutcome::Missing(out.missing),
                Err(e) => {
                    tracing::warn!("Unreadable probe output for `{}`: {}", capability, e);
                    ProbeOutcome::Missing(Vec::new())
                }
            },
            Err(e) => {
                tracing::warn!("Dependency probe for `{}` failed: {}", capability, e);
                ProbeOutcome::Missing(Vec::new())
            }
        }
    }
}
