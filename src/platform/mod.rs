//! Boundary to the platform that hosts training runs.
//!
//! The procedure in [`crate::pipeline`] never talks to a platform itself.
//! A platform resolves dataset bindings, runs submitted jobs, reports their
//! terminal status and keeps a versioned registry of model artifacts.
//! [`LocalPlatform`] does all of this in-process on the local filesystem.

mod local;
mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ml::metrics::MetricsRecord;
use crate::pipeline::RunRequest;

pub use local::LocalPlatform;
pub use registry::{ARTIFACT_DIR_NAME, FsModelRegistry, METADATA_FILE_NAME, RegisteredModel};

/// Job submission, status polling and artifact registration.
pub trait Platform {
    /// Submit a training job and return a handle to the run.
    fn submit(&mut self, job: &JobSpec) -> Result<RunHandle, PlatformError>;
    /// Block until the run reaches a terminal status.
    fn await_completion(&mut self, run: &RunHandle) -> Result<RunStatus, PlatformError>;
    /// Register a model artifact under a new version of `metadata.model_name`.
    fn register_artifact(
        &mut self,
        path: &Path,
        metadata: &ArtifactMetadata,
    ) -> Result<ModelId, PlatformError>;
}

/// Named dataset binding, resolved by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub name: String,
}

impl DatasetRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A training job: which dataset to train on and how.
///
/// The platform chooses the run's working directory, so
/// `request.working_dir` is replaced on submission.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub experiment: String,
    pub dataset: DatasetRef,
    pub request: RunRequest,
}

/// Identifies a submitted run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: String,
    pub experiment: String,
}

/// Terminal status of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed(String),
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => f.write_str("completed"),
            RunStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Metadata attached to a registered artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub model_name: String,
    /// Run that produced the artifact, if any.
    pub run_id: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub properties: BTreeMap<String, f64>,
}

impl ArtifactMetadata {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    pub fn with_run(mut self, run: &RunHandle) -> Self {
        self.run_id = Some(run.run_id.clone());
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    /// Attach the three holdout metrics as properties.
    pub fn with_metrics(mut self, metrics: &MetricsRecord) -> Self {
        for (name, value) in metrics.entries() {
            self.properties.insert(name.to_string(), value);
        }
        self
    }
}

/// A registered model version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId {
    pub name: String,
    pub version: u32,
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Errors raised by platform operations.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("no dataset bound to name {0}")]
    UnknownDataset(String),
    #[error("unknown run {0}")]
    UnknownRun(String),
    #[error("run {run_id} did not complete ({status}); refusing to register its artifact")]
    RunNotCompleted { run_id: String, status: RunStatus },
    #[error("invalid model name {0:?}")]
    InvalidModelName(String),
    #[error("model {0} is not registered")]
    UnknownModel(ModelId),
    #[error("artifact not found: {0}")]
    ArtifactMissing(PathBuf),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid registry metadata at {path}: {source}")]
    Metadata {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to format registration time: {0}")]
    Timestamp(#[from] time::error::Format),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_carries_metrics_as_properties() {
        let metrics = MetricsRecord {
            accuracy: 0.9,
            f1_weighted: 0.8,
            auc: 0.7,
        };
        let metadata = ArtifactMetadata::new("steelplate")
            .with_metrics(&metrics)
            .with_tag("framework", "gbdt");
        assert_eq!(metadata.properties.get("Accuracy"), Some(&0.9));
        assert_eq!(metadata.properties.get("F1 score"), Some(&0.8));
        assert_eq!(metadata.properties.get("AUC"), Some(&0.7));
        assert_eq!(metadata.tags.get("framework").map(String::as_str), Some("gbdt"));
    }

    #[test]
    fn model_id_displays_name_and_version() {
        let id = ModelId {
            name: "steelplate".into(),
            version: 3,
        };
        assert_eq!(id.to_string(), "steelplate:3");
    }
}
