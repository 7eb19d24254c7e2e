//! `MODEL_MANIFEST.json`: a per-root record of every packaged model file.
//!
//! Written when models are prefetched for packaging, and consulted by the resolver to spot
//! partially copied or truncated artifacts without hashing them on every start.

use crate::error::OcrError;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::time::SystemTime;

pub const MANIFEST_FILE: &str = "MODEL_MANIFEST.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    /// Unix seconds at generation time.
    pub generated_at: u64,
    pub models: Vec<ManifestModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestModel {
    pub name: String,
    /// Model directory relative to the root, `/`-separated.
    pub path: String,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Path relative to the model directory, `/`-separated.
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// One disagreement between a root and its manifest.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestProblem {
    MissingFile { model: String, path: String },
    SizeMismatch { model: String, path: String, expected: u64, actual: u64 },
    HashMismatch { model: String, path: String },
}

impl std::fmt::Display for ManifestProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestProblem::MissingFile { model, path } => write!(f, "{}: {} is missing", model, path),
            ManifestProblem::SizeMismatch { model, path, expected, actual } => write!(
                f,
                "{}: {} is {} bytes, expected {}",
                model, path, actual, expected
            ),
            ManifestProblem::HashMismatch { model, path } => {
                write!(f, "{}: {} has a different SHA-256", model, path)
            }
        }
    }
}

impl ModelManifest {
    /// Load `root/MODEL_MANIFEST.json`, `Ok(None)` when the root has none.
    pub fn load(root: &Utf8Path) -> Result<Option<Self>, OcrError> {
        let path = root.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| OcrError::io(&path, e))?;
        let manifest = serde_json::from_str(&content).map_err(|e| {
            OcrError::io(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        Ok(Some(manifest))
    }

    /// Hash every file of the given model directories (relative to `root`).
    pub fn generate(root: &Utf8Path, models: &[(String, Utf8PathBuf)]) -> Result<Self, OcrError> {
        let mut entries = Vec::with_capacity(models.len());

        for (name, dir) in models {
            let relative = dir.strip_prefix(root).unwrap_or(dir);
            let mut files = Vec::new();
            collect_files(dir, dir, &mut files)?;
            files.sort_by(|a, b| a.path.cmp(&b.path));

            tracing::debug!("Manifest entry {}: {} files", name, files.len());
            entries.push(ManifestModel {
                name: name.clone(),
                path: relative.as_str().replace('\\', "/"),
                files,
            });
        }

        let generated_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Ok(Self {
            generated_at,
            models: entries,
        })
    }

    pub fn save(&self, root: &Utf8Path) -> Result<Utf8PathBuf, OcrError> {
        let path = root.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            OcrError::io(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        fs::write(&path, json).map_err(|e| OcrError::io(&path, e))?;
        tracing::info!("Model manifest written to {}", path);
        Ok(path)
    }

    pub fn model(&self, name: &str) -> Option<&ManifestModel> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Cheap check of one model directory: every listed file exists with the listed size.
    /// Models the manifest does not list pass.
    pub fn sizes_match(&self, name: &str, dir: &Utf8Path) -> bool {
        let Some(model) = self.model(name) else {
            return true;
        };
        model.files.iter().all(|file| {
            fs::metadata(dir.join(&file.path))
                .map(|meta| meta.len() == file.size)
                .unwrap_or(false)
        })
    }

    /// Full verification of every listed file, including SHA-256.
    pub fn verify(&self, root: &Utf8Path) -> Result<Vec<ManifestProblem>, OcrError> {
        let mut problems = Vec::new();

        for model in &self.models {
            let dir = root.join(&model.path);
            for file in &model.files {
                let path = dir.join(&file.path);
                let Ok(meta) = fs::metadata(&path) else {
                    problems.push(ManifestProblem::MissingFile {
                        model: model.name.clone(),
                        path: file.path.clone(),
                    });
                    continue;
                };
                if meta.len() != file.size {
                    problems.push(ManifestProblem::SizeMismatch {
                        model: model.name.clone(),
                        path: file.path.clone(),
                        expected: file.size,
                        actual: meta.len(),
                    });
                    continue;
                }
                if sha256_of(&path)? != file.sha256 {
                    problems.push(ManifestProblem::HashMismatch {
                        model: model.name.clone(),
                        path: file.path.clone(),
                    });
                }
            }
        }

        Ok(problems)
    }
}

fn collect_files(
    base: &Utf8Path,
    dir: &Utf8Path,
    out: &mut Vec<ManifestFile>,
) -> Result<(), OcrError> {
    let entries = dir.read_dir_utf8().map_err(|e| OcrError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| OcrError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(base, path, out)?;
        } else if path.is_file() {
            let size = fs::metadata(path).map_err(|e| OcrError::io(path, e))?.len();
            let relative = path.strip_prefix(base).unwrap_or(path);
            out.push(ManifestFile {
                path: relative.as_str().replace('\\', "/"),
                size,
                sha256: sha256_of(path)?,
            });
        }
    }
    Ok(())
}

/// Streaming SHA-256 of a file, lowercase hex.
pub fn sha256_of(path: &Utf8Path) -> Result<String, OcrError> {
    let mut file = fs::File::open(path).map_err(|e| OcrError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| OcrError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root_with_model() -> (TempDir, Utf8PathBuf, Utf8PathBuf) {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let dir = root.join("official_models/PP-OCRv5_mobile_det");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("inference.json"), "{}").unwrap();
        fs::write(dir.join("inference.yml"), "Global:\n  model_name: PP-OCRv5_mobile_det\n").unwrap();
        (temp, root, dir)
    }

    #[test]
    fn test_generate_save_load() {
        let (_temp, root, dir) = root_with_model();
        let manifest =
            ModelManifest::generate(&root, &[("PP-OCRv5_mobile_det".to_string(), dir)]).unwrap();
        manifest.save(&root).unwrap();

        let loaded = ModelManifest::load(&root).unwrap().unwrap();
        assert_eq!(loaded, manifest);

        let model = loaded.model("PP-OCRv5_mobile_det").unwrap();
        assert_eq!(model.path, "official_models/PP-OCRv5_mobile_det");
        assert_eq!(model.files.len(), 2);
        assert_eq!(model.files[0].path, "inference.json");
        assert_eq!(model.files[0].size, 2);
    }

    #[test]
    fn test_load_missing_manifest() {
        let (_temp, root, _dir) = root_with_model();
        assert!(ModelManifest::load(&root).unwrap().is_none());
    }

    #[test]
    fn test_truncated_file_detected() {
        let (_temp, root, dir) = root_with_model();
        let manifest =
            ModelManifest::generate(&root, &[("PP-OCRv5_mobile_det".to_string(), dir.clone())])
                .unwrap();
        assert!(manifest.sizes_match("PP-OCRv5_mobile_det", &dir));

        fs::write(dir.join("inference.json"), "").unwrap();
        assert!(!manifest.sizes_match("PP-OCRv5_mobile_det", &dir));

        let problems = manifest.verify(&root).unwrap();
        assert!(matches!(problems[0], ManifestProblem::SizeMismatch { expected: 2, actual: 0, .. }));
    }

    #[test]
    fn test_same_size_corruption_needs_full_verify() {
        let (_temp, root, dir) = root_with_model();
        let manifest =
            ModelManifest::generate(&root, &[("PP-OCRv5_mobile_det".to_string(), dir.clone())])
                .unwrap();

        fs::write(dir.join("inference.json"), "[]").unwrap();
        assert!(manifest.sizes_match("PP-OCRv5_mobile_det", &dir));
        let problems = manifest.verify(&root).unwrap();
        assert!(matches!(problems[0], ManifestProblem::HashMismatch { .. }));
    }

    #[test]
    fn test_unlisted_model_passes() {
        let (_temp, root, dir) = root_with_model();
        let manifest = ModelManifest::generate(&root, &[]).unwrap();
        assert!(manifest.sizes_match("PP-OCRv5_mobile_det", &dir));
    }
}
