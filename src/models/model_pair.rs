use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Subdirectory of a model root holding one directory per model artifact.
pub const OFFICIAL_MODELS_DIR: &str = "official_models";

/// Which half of a detection/recognition pair a model fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Detector,
    Recognizer,
}

impl ModelRole {
    /// Identity suffix a model of this role must carry (`PP-OCRv5_server_det`).
    pub fn suffix(&self) -> &'static str {
        match self {
            ModelRole::Detector => "_det",
            ModelRole::Recognizer => "_rec",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRole::Detector => write!(f, "detector"),
            ModelRole::Recognizer => write!(f, "recognizer"),
        }
    }
}

/// A detector/recognizer identity pair the resolver may bind, in preference order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairCandidate {
    pub detector: String,
    pub recognizer: String,
}

impl PairCandidate {
    pub fn new(detector: impl Into<String>, recognizer: impl Into<String>) -> Self {
        Self {
            detector: detector.into(),
            recognizer: recognizer.into(),
        }
    }

    /// The identity requested for `role`.
    pub fn name_for(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Detector => &self.detector,
            ModelRole::Recognizer => &self.recognizer,
        }
    }

    /// Both identities carry the right role suffix and come from the same model
    /// family (`PP-OCRv5` for `PP-OCRv5_server_det`). Variants may differ.
    pub fn is_consistent(&self) -> bool {
        match (
            family_of(&self.detector, ModelRole::Detector),
            family_of(&self.recognizer, ModelRole::Recognizer),
        ) {
            (Some(det), Some(rec)) => det == rec,
            _ => false,
        }
    }

    /// Default preference: server pair first, then the mobile pair.
    pub fn defaults() -> Vec<PairCandidate> {
        vec![
            PairCandidate::new("PP-OCRv5_server_det", "PP-OCRv5_server_rec"),
            PairCandidate::new("PP-OCRv5_mobile_det", "PP-OCRv5_mobile_rec"),
        ]
    }
}

/// Identity with the role suffix and the trailing variant segment removed.
fn family_of(name: &str, role: ModelRole) -> Option<&str> {
    let stem = name.strip_suffix(role.suffix())?;
    let family = match stem.rsplit_once('_') {
        Some((family, _variant)) => family,
        None => stem,
    };
    Some(family).filter(|family| !family.is_empty())
}

/// One resolved model artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Identity declared by the artifact's own descriptor.
    pub name: String,
    /// Directory holding the artifact files.
    pub dir: Utf8PathBuf,
}

/// A detector and recognizer resolved together from a single model root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPair {
    pub root: Utf8PathBuf,
    pub detector: ModelArtifact,
    pub recognizer: ModelArtifact,
    /// Resolution generation; bumped by every forced re-resolution.
    pub generation: u64,
}

impl ModelPair {
    pub fn artifact(&self, role: ModelRole) -> &ModelArtifact {
        match role {
            ModelRole::Detector => &self.detector,
            ModelRole::Recognizer => &self.recognizer,
        }
    }

    /// The role whose identity is `name`, if either member carries it.
    pub fn role_of(&self, name: &str) -> Option<ModelRole> {
        if self.detector.name == name {
            Some(ModelRole::Detector)
        } else if self.recognizer.name == name {
            Some(ModelRole::Recognizer)
        } else {
            None
        }
    }

    /// True when both member directories live under this pair's root.
    pub fn is_single_rooted(&self) -> bool {
        let models = self.root.join(OFFICIAL_MODELS_DIR);
        self.detector.dir.starts_with(&models) && self.recognizer.dir.starts_with(&models)
    }
}

impl fmt::Display for ModelPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} + {} (root {}, generation {})",
            self.detector.name, self.recognizer.name, self.root, self.generation
        )
    }
}

/// Where model artifacts may come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelRoots {
    /// An explicitly configured root; nothing else is ever consulted.
    Explicit(Utf8PathBuf),
    /// Default search path, tried in order.
    Search(Vec<Utf8PathBuf>),
}

impl ModelRoots {
    pub fn roots(&self) -> &[Utf8PathBuf] {
        match self {
            ModelRoots::Explicit(root) => std::slice::from_ref(root),
            ModelRoots::Search(roots) => roots,
        }
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, ModelRoots::Explicit(_))
    }

    /// Whether `path` lies in the `official_models` directory of a governing root.
    pub fn governs(&self, path: &Utf8Path) -> bool {
        self.roots()
            .iter()
            .any(|root| path.starts_with(root.join(OFFICIAL_MODELS_DIR)))
    }
}
