use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::train::GbdtOptions;

/// Artifact format version written by [`GbdtModel::save_json`].
pub const MODEL_FORMAT_VERSION: i64 = 1;

/// Errors writing or reading a model artifact.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode model: {0}")]
    Encode(serde_json::Error),
    #[error("failed to write model artifact {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read model artifact {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode model artifact {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid model artifact: {0}")]
    Invalid(String),
}

/// Tree node. Node `0` is the root; children always sit after their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// Rows with `feature <= threshold` go to `left`.
    Split {
        feature: u32,
        threshold: f32,
        left: u32,
        right: u32,
    },
    /// Leaf weight, already scaled by the learning rate.
    Leaf { value: f32 },
}

/// Regression tree over the raw margin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Leaf value reached by a feature row.
    ///
    /// Features missing from a short row read as 0.0.
    pub fn predict(&self, features: ArrayView1<'_, f32>) -> f32 {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = features.get(*feature as usize).copied().unwrap_or(0.0);
                    idx = if value <= *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => {
                    1 + walk(nodes, *left as usize).max(walk(nodes, *right as usize))
                }
            }
        }
        walk(&self.nodes, 0)
    }

    fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { value } => {
                    if !value.is_finite() {
                        return Err(format!("node {idx} has a non-finite leaf value"));
                    }
                }
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature as usize >= n_features {
                        return Err(format!(
                            "node {idx} splits on feature {feature} but the model has {n_features}"
                        ));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {idx} has a non-finite threshold"));
                    }
                    for child in [*left as usize, *right as usize] {
                        if child <= idx || child >= self.nodes.len() {
                            return Err(format!("node {idx} points at invalid child {child}"));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Gradient-boosted tree binary classifier with a logistic link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtModel {
    /// Artifact format version.
    pub model_version: i64,
    /// Feature column names, in the order rows must be supplied.
    pub feature_names: Vec<String>,
    /// Hyperparameters the model was trained with.
    pub options: GbdtOptions,
    /// Starting margin, `logit(base_score)`.
    pub base_margin: f32,
    pub trees: Vec<Tree>,
}

impl GbdtModel {
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Validate structural invariants of the model.
    pub fn validate(&self) -> Result<(), String> {
        if self.model_version != MODEL_FORMAT_VERSION {
            return Err(format!(
                "Unsupported model_version {} (expected {MODEL_FORMAT_VERSION})",
                self.model_version
            ));
        }
        if self.feature_names.is_empty() {
            return Err("Model has no features".to_string());
        }
        if !self.base_margin.is_finite() {
            return Err("base_margin must be finite".to_string());
        }
        for (tree_idx, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features())
                .map_err(|err| format!("Tree {tree_idx}: {err}"))?;
        }
        Ok(())
    }

    /// Raw margin (log-odds of the healthy class) for a feature row.
    pub fn predict_margin(&self, features: ArrayView1<'_, f32>) -> f32 {
        let mut margin = self.base_margin;
        for tree in &self.trees {
            margin += tree.predict(features);
        }
        margin
    }

    /// Probability of the healthy class for a feature row.
    pub fn predict_proba(&self, features: ArrayView1<'_, f32>) -> f32 {
        sigmoid(self.predict_margin(features))
    }

    /// Hard label for a feature row: 1 when the probability exceeds 0.5, exact ties go to 0.
    pub fn predict_label(&self, features: ArrayView1<'_, f32>) -> u8 {
        round_probability(self.predict_proba(features))
    }

    /// Probabilities for every row of a feature matrix.
    pub fn predict_proba_batch(&self, x: ArrayView2<'_, f32>) -> Vec<f32> {
        x.rows().into_iter().map(|row| self.predict_proba(row)).collect()
    }

    /// Write the model as JSON, replacing `path` atomically.
    ///
    /// The bytes go to a temporary file next to `path` which is flushed,
    /// synced and closed before being renamed into place, so a failure never
    /// leaves a partial artifact behind.
    pub fn save_json(&self, path: &Path) -> Result<(), SerializationError> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|source| SerializationError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        let bytes = serde_json::to_vec_pretty(self).map_err(SerializationError::Encode)?;
        let write_error = |source: std::io::Error| SerializationError::Write {
            path: path.to_path_buf(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_error)?;
        tmp.write_all(&bytes).map_err(write_error)?;
        tmp.flush().map_err(write_error)?;
        tmp.as_file().sync_all().map_err(write_error)?;
        tmp.persist(path).map_err(|err| write_error(err.error))?;
        Ok(())
    }

    /// Load and validate a model from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self, SerializationError> {
        let bytes = fs::read(path).map_err(|source| SerializationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let model: Self =
            serde_json::from_slice(&bytes).map_err(|source| SerializationError::Decode {
                path: path.to_path_buf(),
                source,
            })?;
        model.validate().map_err(SerializationError::Invalid)?;
        Ok(model)
    }
}

/// Logistic function.
pub fn sigmoid(margin: f32) -> f32 {
    1.0 / (1.0 + (-margin).exp())
}

/// Round a probability to a hard `{0, 1}` label, sending exact ties to `0`.
pub fn round_probability(p: f32) -> u8 {
    if p > 0.5 { 1 } else { 0 }
}
