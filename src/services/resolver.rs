//! Model artifact resolution.
//!
//! A model root contains `official_models/<dir>/` entries. An entry is usable when it holds
//! the inference graph (`inference.json`) and a descriptor (`inference.yml`) whose
//! `Global.model_name` declares the artifact's identity. Directory names are never trusted as
//! identity: copies, renames and partial re-downloads routinely leave them stale.
//!
//! The resolver binds one [`ModelPair`] per process and only re-resolves through
//! [`ModelResolver::recover`], which evicts known-stale artifacts first.

use crate::error::OcrError;
use crate::models::{
    ModelArtifact, ModelPair, ModelRole, ModelRoots, OFFICIAL_MODELS_DIR, OcrSettings,
    PairCandidate,
};
use crate::services::manifest::ModelManifest;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use serde::Deserialize;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Inference graph; its absence marks an interrupted download.
pub const GRAPH_FILE: &str = "inference.json";

/// Packaged descriptor carrying the declared model identity.
pub const DESCRIPTOR_FILE: &str = "inference.yml";

/// Environment variable naming the framework-managed model cache.
pub const CACHE_HOME_ENV: &str = "PADDLE_PDX_CACHE_HOME";

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(rename = "Global")]
    global: DescriptorGlobal,
}

#[derive(Debug, Deserialize)]
struct DescriptorGlobal {
    #[serde(default)]
    model_name: String,
}

/// Identity declared by the descriptor in `dir`, if readable and non-empty.
pub fn read_declared_name(dir: &Utf8Path) -> Option<String> {
    let path = dir.join(DESCRIPTOR_FILE);
    let content = fs::read_to_string(&path).ok()?;
    match serde_yaml_ng::from_str::<Descriptor>(&content) {
        Ok(descriptor) => {
            let name = descriptor.global.model_name.trim().to_string();
            (!name.is_empty()).then_some(name)
        }
        Err(e) => {
            tracing::warn!("Unreadable model descriptor {}: {}", path, e);
            None
        }
    }
}

/// Default search path: `$PADDLE_PDX_CACHE_HOME`, then `~/.paddlex`, without duplicates.
pub fn default_search_roots() -> Vec<Utf8PathBuf> {
    let mut roots = IndexSet::new();

    if let Ok(cache_home) = std::env::var(CACHE_HOME_ENV) {
        if !cache_home.trim().is_empty() {
            roots.insert(Utf8PathBuf::from(cache_home));
        }
    }

    if let Some(base) = directories::BaseDirs::new() {
        if let Ok(home) = Utf8PathBuf::try_from(base.home_dir().to_path_buf()) {
            roots.insert(home.join(".paddlex"));
        }
    }

    roots.into_iter().collect()
}

/// Artifacts to delete before a forced re-resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaleArtifacts {
    /// Model directories, or files inside them.
    pub paths: Vec<Utf8PathBuf>,
}

impl StaleArtifacts {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Debug, Default)]
struct ResolverState {
    current: Option<ModelPair>,
    generation: u64,
    swept: bool,
}

/// Binds a detector/recognizer pair from a single model root.
///
/// All resolution goes through one async lock, so a recovery in flight is observed by
/// every concurrent caller instead of being repeated.
#[derive(Debug)]
pub struct ModelResolver {
    roots: ModelRoots,
    candidates: Vec<PairCandidate>,
    state: Mutex<ResolverState>,
    recoveries: AtomicUsize,
}

impl ModelResolver {
    pub fn new(roots: ModelRoots, candidates: Vec<PairCandidate>) -> Self {
        Self {
            roots,
            candidates,
            state: Mutex::new(ResolverState::default()),
            recoveries: AtomicUsize::new(0),
        }
    }

    /// Explicit root when `model_dir` is set, otherwise the configured or default search path.
    pub fn from_settings(settings: &OcrSettings) -> Self {
        let roots = match &settings.model_dir {
            Some(dir) => ModelRoots::Explicit(dir.clone()),
            None if settings.search_roots.is_empty() => ModelRoots::Search(default_search_roots()),
            None => ModelRoots::Search(settings.search_roots.clone()),
        };
        Self::new(roots, settings.preferred_pairs.clone())
    }

    pub fn roots(&self) -> &ModelRoots {
        &self.roots
    }

    /// Number of forced re-resolutions that actually ran.
    pub fn recoveries(&self) -> usize {
        self.recoveries.load(Ordering::Acquire)
    }

    /// The bound pair, resolving it on first use.
    pub async fn resolve(&self) -> Result<ModelPair, OcrError> {
        let mut state = self.state.lock().await;
        self.resolve_locked(&mut state)
    }

    /// The bound pair without triggering resolution.
    pub async fn current(&self) -> Option<ModelPair> {
        self.state.lock().await.current.clone()
    }

    /// Forced re-resolution after `stale` proved unusable.
    ///
    /// Evicts `evict` (only inside governing roots), sweeps incomplete entries and resolves
    /// again exactly once. A caller whose `stale` pair was already replaced by a concurrent
    /// recovery gets the replacement without a second eviction.
    pub async fn recover(
        &self,
        stale: &ModelPair,
        evict: &StaleArtifacts,
    ) -> Result<ModelPair, OcrError> {
        let mut state = self.state.lock().await;

        if state.generation != stale.generation {
            tracing::debug!(
                "Pair generation {} already superseded by {}, reusing",
                stale.generation,
                state.generation
            );
            return self.resolve_locked(&mut state);
        }

        let attempt = self.recoveries.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::warn!("Forcing model re-resolution (recovery #{}) after {}", attempt, stale);

        for path in &evict.paths {
            self.evict_path(path);
        }
        self.sweep_incomplete();

        state.generation += 1;
        state.current = None;
        state.swept = true;
        self.resolve_locked(&mut state)
    }

    fn resolve_locked(&self, state: &mut ResolverState) -> Result<ModelPair, OcrError> {
        if let Some(pair) = &state.current {
            return Ok(pair.clone());
        }
        if !state.swept {
            self.sweep_incomplete();
            state.swept = true;
        }

        let pair = self.scan(state.generation)?;
        tracing::info!("Bound OCR model pair: {}", pair);
        state.current = Some(pair.clone());
        Ok(pair)
    }

    /// Delete `official_models` entries lacking the inference graph.
    pub fn sweep_incomplete(&self) -> Vec<Utf8PathBuf> {
        let mut removed = Vec::new();

        for root in self.roots.roots() {
            for dir in model_dirs(root) {
                if dir.join(GRAPH_FILE).exists() {
                    continue;
                }
                match fs::remove_dir_all(&dir) {
                    Ok(()) => {
                        tracing::warn!("Removed incomplete model cache entry {}", dir);
                        removed.push(dir);
                    }
                    Err(e) => tracing::warn!("Failed to remove incomplete model dir {}: {}", dir, e),
                }
            }
        }

        removed
    }

    /// Delete the model directory containing `path`, if a governing root owns it.
    ///
    /// Paths outside every governing root fall back to eviction by the model directory
    /// name they mention, so a diagnostic naming another machine's cache still cleans
    /// the local copy.
    fn evict_path(&self, path: &Utf8Path) -> bool {
        if path.components().any(|c| c == Utf8Component::ParentDir) {
            tracing::warn!("Refusing to evict path with parent components: {}", path);
            return false;
        }

        if self.roots.governs(path) {
            for root in self.roots.roots() {
                let models = root.join(OFFICIAL_MODELS_DIR);
                let Some(entry) = path
                    .strip_prefix(&models)
                    .ok()
                    .and_then(|rest| rest.components().next())
                else {
                    continue;
                };
                return remove_model_dir(&models.join(entry.as_str()));
            }
        }

        match model_dir_name_in(path.as_str()) {
            Some(name) => self.evict_named(&name),
            None => {
                tracing::warn!("Not evicting {}: outside every governing model root", path);
                false
            }
        }
    }

    /// Delete every governed model directory named `name` or declaring identity `name`.
    fn evict_named(&self, name: &str) -> bool {
        let mut removed = false;
        for root in self.roots.roots() {
            for dir in model_dirs(root) {
                let dir_matches = dir.file_name() == Some(name);
                if dir_matches || read_declared_name(&dir).as_deref() == Some(name) {
                    removed |= remove_model_dir(&dir);
                }
            }
        }
        removed
    }

    fn scan(&self, generation: u64) -> Result<ModelPair, OcrError> {
        let mut any_detector = false;

        for root in self.roots.roots() {
            if !root.join(OFFICIAL_MODELS_DIR).is_dir() {
                tracing::debug!("Model root {} has no {}", root, OFFICIAL_MODELS_DIR);
                continue;
            }

            let inventory = inventory(root);

            for candidate in &self.candidates {
                if !candidate.is_consistent() {
                    tracing::warn!(
                        "Skipping inconsistent pair {} + {}",
                        candidate.detector,
                        candidate.recognizer
                    );
                    continue;
                }

                let detector = inventory.iter().find(|a| a.name == candidate.detector);
                let recognizer = inventory.iter().find(|a| a.name == candidate.recognizer);
                any_detector |= detector.is_some();

                if let (Some(detector), Some(recognizer)) = (detector, recognizer) {
                    return Ok(ModelPair {
                        root: root.clone(),
                        detector: detector.clone(),
                        recognizer: recognizer.clone(),
                        generation,
                    });
                }
            }
        }

        let missing = if any_detector {
            ModelRole::Recognizer
        } else {
            ModelRole::Detector
        };
        let wanted: Vec<&str> = self.candidates.iter().map(|c| c.name_for(missing)).collect();
        let searched = self
            .roots
            .roots()
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        Err(OcrError::ModelResolution {
            missing,
            searched: if searched.is_empty() {
                "<no model roots>".to_string()
            } else {
                searched
            },
            detail: format!(
                "looked for {} in {}/ (a {} and its paired model must share one root)",
                wanted.join(" or "),
                OFFICIAL_MODELS_DIR,
                missing
            ),
        })
    }
}

/// Complete model directories under `root` with their declared identities, ignoring any
/// manifest. Used to (re)generate `MODEL_MANIFEST.json`.
pub fn installed_models(root: &Utf8Path) -> Vec<ModelArtifact> {
    model_dirs(root)
        .into_iter()
        .filter(|dir| dir.join(GRAPH_FILE).is_file())
        .filter_map(|dir| read_declared_name(&dir).map(|name| ModelArtifact { name, dir }))
        .collect()
}

/// Immediate subdirectories of `root/official_models`.
fn model_dirs(root: &Utf8Path) -> Vec<Utf8PathBuf> {
    let models = root.join(OFFICIAL_MODELS_DIR);
    let Ok(entries) = models.read_dir_utf8() else {
        return Vec::new();
    };
    let mut dirs: Vec<Utf8PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.into_path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// Complete, self-described artifacts under `root`.
fn inventory(root: &Utf8Path) -> Vec<ModelArtifact> {
    let manifest = match ModelManifest::load(root) {
        Ok(manifest) => manifest,
        Err(e) => {
            tracing::warn!("Ignoring unreadable model manifest in {}: {}", root, e);
            None
        }
    };

    model_dirs(root)
        .into_iter()
        .filter(|dir| dir.join(GRAPH_FILE).is_file())
        .filter_map(|dir| {
            let Some(name) = read_declared_name(&dir) else {
                tracing::debug!("Skipping {}: no declared model name", dir);
                return None;
            };
            if dir.file_name() != Some(name.as_str()) {
                tracing::debug!("{} declares identity {}", dir, name);
            }
            if let Some(manifest) = &manifest {
                if !manifest.sizes_match(&name, &dir) {
                    tracing::warn!("Skipping {}: files disagree with {}", dir, root);
                    return None;
                }
            }
            Some(ModelArtifact { name, dir })
        })
        .collect()
}

fn remove_model_dir(dir: &Utf8Path) -> bool {
    if !dir.exists() {
        return false;
    }
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            tracing::warn!("Evicted stale model artifact {}", dir);
            true
        }
        Err(e) => {
            tracing::warn!("Failed to evict {}: {}", dir, e);
            false
        }
    }
}

/// Directory name following `official_models` in a path written with either separator.
fn model_dir_name_in(path: &str) -> Option<String> {
    let mut segments = path.split(['/', '\\']).filter(|s| !s.is_empty());
    segments.find(|s| *s == OFFICIAL_MODELS_DIR)?;
    segments
        .next()
        .filter(|s| *s != "." && *s != "..")
        .map(str::to_string)
}
