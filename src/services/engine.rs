use crate::error::OcrError;
use crate::models::{Line, ModelPair, Point};
use crate::services::recognizer::{CapabilityError, ProbeOutcome, Recognizer};
use crate::services::resolver::{ModelResolver, StaleArtifacts};
use camino::Utf8Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Why loading a pair failed.
enum LoadFailure {
    /// Identity fault; eligible for one forced re-resolution.
    Mismatch {
        requested: Option<String>,
        declared: Option<String>,
        artifact: Option<camino::Utf8PathBuf>,
    },
    Fatal(OcrError),
}

/// Detector and recognizer behind one `image -> lines` operation.
///
/// The first [`process`](Self::process) binds a pair from the resolver and loads it. Two
/// load faults are recovered exactly once:
///
/// - a failed dependency check triggers one capability probe; a usable capability is loaded
///   again with verification disabled, otherwise [`OcrError::EngineDependency`] names the
///   missing packages
/// - an identity mismatch forces one re-resolution with stale artifacts evicted; a second
///   mismatch is [`OcrError::EngineModelMismatch`]
///
/// Everything else surfaces as [`OcrError::EngineRuntime`] without touching the resolver.
pub struct RecognitionEngine {
    resolver: Arc<ModelResolver>,
    recognizer: Arc<dyn Recognizer>,
    loaded: Mutex<Option<ModelPair>>,
}

impl RecognitionEngine {
    pub fn new(resolver: Arc<ModelResolver>, recognizer: Arc<dyn Recognizer>) -> Self {
        Self {
            resolver,
            recognizer,
            loaded: Mutex::new(None),
        }
    }

    pub fn resolver(&self) -> &Arc<ModelResolver> {
        &self.resolver
    }

    /// The pair currently loaded into the capability, if any.
    pub async fn loaded_pair(&self) -> Option<ModelPair> {
        self.loaded.lock().await.clone()
    }

    /// Recognize every line in `image`.
    pub async fn process(&self, image: &Utf8Path) -> Result<Vec<Line>, OcrError> {
        let pair = self.ensure_loaded().await?;

        let raw = match self.recognizer.predict(&pair, image).await {
            Ok(raw) => raw,
            Err(CapabilityError::ModelMismatch {
                requested,
                declared,
                ..
            }) => {
                // the pair is unusable; the next call resolves and loads afresh
                self.loaded.lock().await.take();
                return Err(mismatch_error(requested, declared, &pair));
            }
            Err(CapabilityError::DependencyCheck { capability }) => {
                return Err(self.dependency_error(capability).await);
            }
            Err(CapabilityError::Runtime(detail)) => return Err(OcrError::EngineRuntime(detail)),
        };

        let total = raw.len();
        let lines: Vec<Line> = raw
            .into_iter()
            .filter_map(|raw| {
                let polygon = raw.polygon.into_iter().map(Point::from).collect();
                match Line::new(raw.text, raw.confidence, polygon) {
                    Ok(line) => Some(line),
                    Err(e) => {
                        tracing::warn!("Dropping recognizer line from {}: {}", image, e);
                        None
                    }
                }
            })
            .collect();

        tracing::debug!("Recognized {} of {} lines in {}", lines.len(), total, image);
        Ok(lines)
    }

    /// Bind and load a pair, applying the bounded recovery policy.
    pub async fn ensure_loaded(&self) -> Result<ModelPair, OcrError> {
        let mut loaded = self.loaded.lock().await;
        if let Some(pair) = loaded.as_ref() {
            return Ok(pair.clone());
        }

        let pair = self.resolver.resolve().await?;
        let pair = match self.load(&pair).await {
            Ok(()) => pair,
            Err(LoadFailure::Fatal(e)) => return Err(e),
            Err(LoadFailure::Mismatch {
                requested,
                declared,
                artifact,
            }) => {
                tracing::warn!(
                    "Model identity fault loading {} (requested {:?}, declared {:?}); re-resolving",
                    pair,
                    requested,
                    declared
                );
                let evict = stale_artifacts(&pair, requested.as_deref(), artifact);
                let fresh = self.resolver.recover(&pair, &evict).await?;

                match self.load(&fresh).await {
                    Ok(()) => fresh,
                    Err(LoadFailure::Fatal(e)) => return Err(e),
                    Err(LoadFailure::Mismatch {
                        requested,
                        declared,
                        ..
                    }) => return Err(mismatch_error(requested, declared, &fresh)),
                }
            }
        };

        *loaded = Some(pair.clone());
        Ok(pair)
    }

    async fn load(&self, pair: &ModelPair) -> Result<(), LoadFailure> {
        let first = match self.recognizer.load(pair, true).await {
            Err(CapabilityError::DependencyCheck { capability }) => {
                match self.recognizer.probe(&capability).await {
                    ProbeOutcome::Usable => {
                        tracing::warn!(
                            "`{}` dependency check failed but the capability is usable; loading without verification",
                            capability
                        );
                        self.recognizer.load(pair, false).await
                    }
                    ProbeOutcome::Missing(missing) => {
                        return Err(LoadFailure::Fatal(OcrError::EngineDependency {
                            capability,
                            missing,
                        }));
                    }
                }
            }
            other => other,
        };

        match first {
            Ok(()) => Ok(()),
            Err(CapabilityError::ModelMismatch {
                requested,
                declared,
                artifact,
            }) => Err(LoadFailure::Mismatch {
                requested,
                declared,
                artifact,
            }),
            Err(CapabilityError::DependencyCheck { capability }) => {
                // still refusing with verification off; no second probe
                Err(LoadFailure::Fatal(OcrError::EngineDependency {
                    capability,
                    missing: Vec::new(),
                }))
            }
            Err(CapabilityError::Runtime(detail)) => {
                Err(LoadFailure::Fatal(OcrError::EngineRuntime(detail)))
            }
        }
    }

    async fn dependency_error(&self, capability: String) -> OcrError {
        match self.recognizer.probe(&capability).await {
            ProbeOutcome::Missing(missing) => OcrError::EngineDependency {
                capability,
                missing,
            },
            ProbeOutcome::Usable => OcrError::EngineRuntime(format!(
                "`{}` rejected its dependencies during recognition",
                capability
            )),
        }
    }
}

/// Artifacts to evict before re-resolving after an identity fault.
fn stale_artifacts(
    pair: &ModelPair,
    requested: Option<&str>,
    artifact: Option<camino::Utf8PathBuf>,
) -> StaleArtifacts {
    let mut evict = StaleArtifacts::default();

    if let Some(role) = requested.and_then(|name| pair.role_of(name)) {
        evict.paths.push(pair.artifact(role).dir.clone());
    }
    if let Some(artifact) = artifact {
        evict.paths.push(artifact);
    }

    evict
}

fn mismatch_error(requested: Option<String>, declared: Option<String>, pair: &ModelPair) -> OcrError {
    OcrError::EngineModelMismatch {
        requested: requested.unwrap_or_else(|| format!("{} + {}", pair.detector.name, pair.recognizer.name)),
        declared: declared.unwrap_or_else(|| "an unreadable artifact".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelArtifact;
    use camino::Utf8PathBuf;

    fn pair() -> ModelPair {
        ModelPair {
            root: Utf8PathBuf::from("/models"),
            detector: ModelArtifact {
                name: "PP-OCRv5_server_det".to_string(),
                dir: Utf8PathBuf::from("/models/official_models/PP-OCRv5_server_det"),
            },
            recognizer: ModelArtifact {
                name: "PP-OCRv5_server_rec".to_string(),
                dir: Utf8PathBuf::from("/models/official_models/PP-OCRv5_server_rec"),
            },
            generation: 0,
        }
    }

    #[test]
    fn test_stale_artifacts_targets_mismatched_member() {
        let evict = stale_artifacts(&pair(), Some("PP-OCRv5_server_rec"), None);
        assert_eq!(
            evict.paths,
            vec![Utf8PathBuf::from("/models/official_models/PP-OCRv5_server_rec")]
        );
    }

    #[test]
    fn test_stale_artifacts_includes_reported_file() {
        let file = Utf8PathBuf::from("/models/official_models/PP-OCRv5_server_det/inference.json");
        let evict = stale_artifacts(&pair(), None, Some(file.clone()));
        assert_eq!(evict.paths, vec![file]);
    }

    #[test]
    fn test_stale_artifacts_unknown_identity() {
        assert!(stale_artifacts(&pair(), Some("other_det"), None).is_empty());
    }

    #[test]
    fn test_mismatch_error_defaults() {
        let err = mismatch_error(None, None, &pair());
        assert!(err.to_string().contains("PP-OCRv5_server_det + PP-OCRv5_server_rec"));
        assert_eq!(err.kind(), "engine_model_mismatch");
    }
}
