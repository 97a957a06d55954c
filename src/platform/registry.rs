//! Filesystem model registry.
//!
//! Layout: `<root>/<model name>/<version>/` holds a `model.json` metadata
//! file and a copy of the artifact under `artifact/`. Versions start at 1 and
//! increase per name. A version directory becomes visible only once it is
//! complete: it is assembled in a hidden staging directory and renamed into
//! place.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{ArtifactMetadata, ModelId, PlatformError};

pub const METADATA_FILE_NAME: &str = "model.json";
/// Subdirectory of a version directory holding the artifact copy.
pub const ARTIFACT_DIR_NAME: &str = "artifact";
const STAGING_PREFIX: &str = ".staging-";

/// Metadata stored next to each registered artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
    pub version: u32,
    /// File name of the artifact inside the version's `artifact/` directory.
    pub artifact_file: String,
    /// Hex SHA-256 digest of the artifact bytes.
    pub sha256: String,
    /// RFC 3339 UTC timestamp.
    pub registered_at: String,
    pub run_id: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub properties: BTreeMap<String, f64>,
}

impl RegisteredModel {
    pub fn id(&self) -> ModelId {
        ModelId {
            name: self.name.clone(),
            version: self.version,
        }
    }
}

/// Versioned model store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsModelRegistry {
    root: PathBuf,
}

impl FsModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `artifact` into the next version slot for `metadata.model_name`.
    pub fn register(
        &self,
        artifact: &Path,
        metadata: &ArtifactMetadata,
    ) -> Result<RegisteredModel, PlatformError> {
        validate_model_name(&metadata.model_name)?;
        if !artifact.is_file() {
            return Err(PlatformError::ArtifactMissing(artifact.to_path_buf()));
        }
        let artifact_file = artifact
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| PlatformError::ArtifactMissing(artifact.to_path_buf()))?
            .to_string();

        let name_dir = self.root.join(&metadata.model_name);
        fs::create_dir_all(&name_dir).map_err(|source| io_error(&name_dir, source))?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&name_dir)
            .map_err(|source| io_error(&name_dir, source))?;
        let staged_artifacts = staging.path().join(ARTIFACT_DIR_NAME);
        fs::create_dir(&staged_artifacts).map_err(|source| io_error(&staged_artifacts, source))?;
        let staged = staged_artifacts.join(&artifact_file);
        fs::copy(artifact, &staged).map_err(|source| io_error(&staged, source))?;

        let version = self
            .allocated_versions(&metadata.model_name)?
            .last()
            .copied()
            .unwrap_or(0)
            + 1;
        let entry = RegisteredModel {
            name: metadata.model_name.clone(),
            version,
            artifact_file,
            sha256: sha256_file(&staged)?,
            registered_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
            run_id: metadata.run_id.clone(),
            tags: metadata.tags.clone(),
            properties: metadata.properties.clone(),
        };
        write_metadata(&staging.path().join(METADATA_FILE_NAME), &entry)?;

        let dir = self.version_dir(&metadata.model_name, version);
        // On failure `staging` is still owned and removes itself on drop.
        fs::rename(staging.path(), &dir).map_err(|source| io_error(&dir, source))?;
        let _ = staging.keep();
        tracing::info!(
            model = %entry.id(),
            sha256 = %entry.sha256,
            "registered model artifact"
        );
        Ok(entry)
    }

    /// All registered versions of `name`, oldest first.
    pub fn list(&self, name: &str) -> Result<Vec<RegisteredModel>, PlatformError> {
        validate_model_name(name)?;
        self.versions(name)?
            .into_iter()
            .map(|version| self.read_metadata(name, version))
            .collect()
    }

    pub fn get(&self, id: &ModelId) -> Result<RegisteredModel, PlatformError> {
        validate_model_name(&id.name)?;
        let path = self.version_dir(&id.name, id.version).join(METADATA_FILE_NAME);
        if !path.is_file() {
            return Err(PlatformError::UnknownModel(id.clone()));
        }
        self.read_metadata(&id.name, id.version)
    }

    /// Path of the stored artifact for a registered version.
    pub fn artifact_path(&self, id: &ModelId) -> Result<PathBuf, PlatformError> {
        let entry = self.get(id)?;
        Ok(self
            .version_dir(&id.name, id.version)
            .join(ARTIFACT_DIR_NAME)
            .join(entry.artifact_file))
    }

    fn version_dir(&self, name: &str, version: u32) -> PathBuf {
        self.root.join(name).join(version.to_string())
    }

    /// Complete versions of `name`: numbered directories holding metadata.
    fn versions(&self, name: &str) -> Result<Vec<u32>, PlatformError> {
        Ok(self
            .allocated_versions(name)?
            .into_iter()
            .filter(|version| {
                self.version_dir(name, *version)
                    .join(METADATA_FILE_NAME)
                    .is_file()
            })
            .collect())
    }

    /// Every numbered directory under `name`, complete or not, ascending.
    fn allocated_versions(&self, name: &str) -> Result<Vec<u32>, PlatformError> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut versions: Vec<u32> = fs::read_dir(&dir)
            .map_err(|source| io_error(&dir, source))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    fn read_metadata(&self, name: &str, version: u32) -> Result<RegisteredModel, PlatformError> {
        let path = self.version_dir(name, version).join(METADATA_FILE_NAME);
        let bytes = fs::read(&path).map_err(|source| io_error(&path, source))?;
        serde_json::from_slice(&bytes).map_err(|source| PlatformError::Metadata { path, source })
    }
}

fn validate_model_name(name: &str) -> Result<(), PlatformError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PlatformError::InvalidModelName(name.to_string()))
    }
}

fn write_metadata(path: &Path, entry: &RegisteredModel) -> Result<(), PlatformError> {
    let bytes = serde_json::to_vec_pretty(entry).map_err(|source| PlatformError::Metadata {
        path: path.to_path_buf(),
        source,
    })?;
    let mut file = File::create(path).map_err(|source| io_error(path, source))?;
    file.write_all(&bytes)
        .and_then(|_| file.sync_all())
        .map_err(|source| io_error(path, source))
}

fn sha256_file(path: &Path) -> Result<String, PlatformError> {
    let mut file = File::open(path).map_err(|source| io_error(path, source))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).map_err(|source| io_error(path, source))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn io_error(path: &Path, source: std::io::Error) -> PlatformError {
    PlatformError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::gbdt::{GbdtModel, GbdtOptions, MODEL_FORMAT_VERSION, Node, Tree};
    use tempfile::tempdir;

    fn artifact(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("steelplate_model.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn versions_increase_per_name() {
        let dir = tempdir().unwrap();
        let registry = FsModelRegistry::new(dir.path().join("registry"));
        let path = artifact(dir.path(), "{}");

        let first = registry.register(&path, &ArtifactMetadata::new("steelplate")).unwrap();
        let second = registry.register(&path, &ArtifactMetadata::new("steelplate")).unwrap();
        let other = registry.register(&path, &ArtifactMetadata::new("other")).unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(other.version, 1);
        let listed: Vec<u32> = registry
            .list("steelplate")
            .unwrap()
            .iter()
            .map(|m| m.version)
            .collect();
        assert_eq!(listed, [1, 2]);
    }

    #[test]
    fn stores_digest_and_properties() {
        let dir = tempdir().unwrap();
        let registry = FsModelRegistry::new(dir.path().join("registry"));
        let path = artifact(dir.path(), "abc");
        let mut metadata = ArtifactMetadata::new("steelplate").with_tag("stage", "dev");
        metadata.properties.insert("Accuracy".into(), 0.75);

        let entry = registry.register(&path, &metadata).unwrap();
        let loaded = registry.get(&entry.id()).unwrap();

        assert_eq!(
            loaded.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(loaded.properties.get("Accuracy"), Some(&0.75));
        assert_eq!(loaded.tags.get("stage").map(String::as_str), Some("dev"));
        assert_eq!(
            fs::read_to_string(registry.artifact_path(&entry.id()).unwrap()).unwrap(),
            "abc"
        );
    }

    #[test]
    fn rejects_bad_names_and_missing_artifacts() {
        let dir = tempdir().unwrap();
        let registry = FsModelRegistry::new(dir.path());
        let path = artifact(dir.path(), "{}");
        assert!(matches!(
            registry.register(&path, &ArtifactMetadata::new("../escape")),
            Err(PlatformError::InvalidModelName(_))
        ));
        assert!(matches!(
            registry.register(&dir.path().join("absent.json"), &ArtifactMetadata::new("m")),
            Err(PlatformError::ArtifactMissing(_))
        ));
        assert!(matches!(
            registry.get(&ModelId {
                name: "m".into(),
                version: 1
            }),
            Err(PlatformError::UnknownModel(_))
        ));
    }

    #[test]
    fn artifact_named_like_metadata_survives_registration() {
        let dir = tempdir().unwrap();
        let registry = FsModelRegistry::new(dir.path().join("registry"));
        let model = GbdtModel {
            model_version: MODEL_FORMAT_VERSION,
            feature_names: vec!["thickness".into()],
            options: GbdtOptions::default(),
            base_margin: 0.0,
            trees: vec![Tree {
                nodes: vec![Node::Leaf { value: 0.25 }],
            }],
        };
        let path = dir.path().join(METADATA_FILE_NAME);
        model.save_json(&path).unwrap();

        let entry = registry.register(&path, &ArtifactMetadata::new("steelplate")).unwrap();

        let stored = registry.artifact_path(&entry.id()).unwrap();
        assert_eq!(GbdtModel::load_json(&stored).unwrap(), model);
        assert_eq!(sha256_file(&stored).unwrap(), entry.sha256);
        assert_eq!(registry.get(&entry.id()).unwrap(), entry);
    }

    #[test]
    fn incomplete_version_directories_are_skipped() {
        let dir = tempdir().unwrap();
        let registry = FsModelRegistry::new(dir.path().join("registry"));
        let path = artifact(dir.path(), "{}");
        registry.register(&path, &ArtifactMetadata::new("steelplate")).unwrap();
        fs::create_dir_all(registry.root().join("steelplate").join("2")).unwrap();
        fs::create_dir_all(registry.root().join("steelplate").join(".staging-left")).unwrap();

        let listed: Vec<u32> = registry
            .list("steelplate")
            .unwrap()
            .iter()
            .map(|m| m.version)
            .collect();
        assert_eq!(listed, [1]);

        let next = registry.register(&path, &ArtifactMetadata::new("steelplate")).unwrap();
        assert_eq!(next.version, 3);
        let listed: Vec<u32> = registry
            .list("steelplate")
            .unwrap()
            .iter()
            .map(|m| m.version)
            .collect();
        assert_eq!(listed, [1, 3]);
    }

    #[test]
    fn successful_registration_leaves_no_staging_directory() {
        let dir = tempdir().unwrap();
        let registry = FsModelRegistry::new(dir.path().join("registry"));
        let path = artifact(dir.path(), "{}");
        registry.register(&path, &ArtifactMetadata::new("steelplate")).unwrap();

        let names: Vec<String> = fs::read_dir(registry.root().join("steelplate"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["1"]);
    }
}
