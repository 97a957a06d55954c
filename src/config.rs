//! `steelplate.toml` loading and saving.
//!
//! Every section is optional; missing keys fall back to the defaults of the
//! training procedure and out-of-range values are normalized on load.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::{DEFAULT_SPLIT_SEED, DEFAULT_TEST_FRACTION};
use crate::ml::gbdt::GbdtOptions;
use crate::pipeline::{DEFAULT_ARTIFACT_NAME, DEFAULT_ID_COLUMN, DEFAULT_LABEL_COLUMN, RunRequest};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "steelplate.toml";

/// Errors that may occur while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to create the config directory.
    #[error("Unable to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to read a config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to write a config file.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse TOML config.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Refused to replace an existing config file.
    #[error("Config already exists at {0}")]
    AlreadyExists(PathBuf),
    /// Failed to serialize config to TOML.
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
}

/// `[dataset]`: which columns play which role and how the data is split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetSection {
    pub id_column: String,
    pub label_column: String,
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for DatasetSection {
    fn default() -> Self {
        Self {
            id_column: DEFAULT_ID_COLUMN.to_string(),
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            test_fraction: DEFAULT_TEST_FRACTION,
            seed: DEFAULT_SPLIT_SEED,
        }
    }
}

/// `[output]`: where the run writes its artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub working_dir: PathBuf,
    pub artifact_name: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            artifact_name: DEFAULT_ARTIFACT_NAME.to_string(),
        }
    }
}

/// Full contents of `steelplate.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub dataset: DatasetSection,
    pub model: GbdtOptions,
    pub output: OutputSection,
}

impl AppConfig {
    /// Replace out-of-range or empty values with defaults.
    pub fn normalized(self) -> Self {
        let dataset_defaults = DatasetSection::default();
        let output_defaults = OutputSection::default();
        let non_empty = |value: String, default: String| {
            if value.trim().is_empty() {
                default
            } else {
                value.trim().to_string()
            }
        };
        let test_fraction = if self.dataset.test_fraction > 0.0 && self.dataset.test_fraction < 1.0
        {
            self.dataset.test_fraction
        } else {
            dataset_defaults.test_fraction
        };
        let artifact_name = if is_plain_file_name(&self.output.artifact_name) {
            self.output.artifact_name
        } else {
            output_defaults.artifact_name
        };
        Self {
            dataset: DatasetSection {
                id_column: non_empty(self.dataset.id_column, dataset_defaults.id_column),
                label_column: non_empty(self.dataset.label_column, dataset_defaults.label_column),
                test_fraction,
                seed: self.dataset.seed,
            },
            model: self.model.normalized(),
            output: OutputSection {
                working_dir: if self.output.working_dir.as_os_str().is_empty() {
                    output_defaults.working_dir
                } else {
                    self.output.working_dir
                },
                artifact_name,
            },
        }
    }

    /// Build the request the training procedure consumes.
    pub fn run_request(&self) -> RunRequest {
        RunRequest {
            working_dir: self.output.working_dir.clone(),
            artifact_name: self.output.artifact_name.clone(),
            id_column: self.dataset.id_column.clone(),
            label_column: self.dataset.label_column.clone(),
            test_fraction: self.dataset.test_fraction,
            seed: self.dataset.seed,
            model: self.model.clone(),
        }
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && trimmed == name
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
}

/// Load and normalize a config file.
pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: AppConfig = toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(config.normalized())
}

/// Load configuration from `path`, returning defaults if it does not exist.
pub fn load_or_default(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    load(path)
}

/// Write the config as TOML, replacing `path` atomically.
pub fn save(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    let data = toml::to_string_pretty(config).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|source| ConfigError::CreateDir {
        path: dir.clone(),
        source,
    })?;
    let write_error = |source: std::io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_error)?;
    tmp.write_all(data.as_bytes()).map_err(write_error)?;
    tmp.as_file().sync_all().map_err(write_error)?;
    tmp.persist(path).map_err(|err| write_error(err.error))?;
    Ok(())
}

/// Write a default config to `path` unless one already exists there.
///
/// With `overwrite` an existing file is replaced.
pub fn write_default(path: &Path, overwrite: bool) -> Result<AppConfig, ConfigError> {
    if path.exists() && !overwrite {
        return Err(ConfigError::AlreadyExists(path.to_path_buf()));
    }
    let config = AppConfig::default();
    save(&config, path)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn saves_and_loads_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg").join(CONFIG_FILE_NAME);
        let config = AppConfig {
            dataset: DatasetSection {
                seed: 42,
                ..DatasetSection::default()
            },
            model: GbdtOptions {
                n_estimators: 12,
                ..GbdtOptions::default()
            },
            ..AppConfig::default()
        };
        save(&config, &path).unwrap();
        assert_eq!(load(&path).unwrap(), config);
    }

    #[test]
    fn default_config_is_written_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let written = write_default(&path, false).unwrap();
        assert_eq!(load(&path).unwrap(), written);

        std::fs::write(&path, "[model]\nmax_depth = 3\n").unwrap();
        assert!(matches!(
            write_default(&path, false),
            Err(ConfigError::AlreadyExists(_))
        ));
        assert_eq!(load(&path).unwrap().model.max_depth, 3);

        write_default(&path, true).unwrap();
        assert_eq!(load(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = load_or_default(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.run_request(), RunRequest::default());
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[model]\nmax_depth = 3\n\n[output]\nworking_dir = \"runs\"\n")
            .unwrap();
        let config = load(&path).unwrap();
        assert_eq!(config.model.max_depth, 3);
        assert_eq!(config.model.n_estimators, 100);
        assert_eq!(config.dataset.label_column, "Healthy");
        assert_eq!(
            config.run_request().artifact_path(),
            PathBuf::from("runs/outputs/steelplate_model.json")
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[dataset]\nlabel = \"Healthy\"\n").unwrap();
        assert!(matches!(load(&path), Err(ConfigError::ParseToml { .. })));
    }

    #[test]
    fn out_of_range_values_are_normalized() {
        let config = AppConfig {
            dataset: DatasetSection {
                test_fraction: 1.5,
                label_column: "  ".into(),
                ..DatasetSection::default()
            },
            output: OutputSection {
                artifact_name: "../escape.json".into(),
                ..OutputSection::default()
            },
            model: GbdtOptions {
                n_estimators: 0,
                ..GbdtOptions::default()
            },
        }
        .normalized();
        assert_eq!(config.dataset.test_fraction, DEFAULT_TEST_FRACTION);
        assert_eq!(config.dataset.label_column, "Healthy");
        assert_eq!(config.output.artifact_name, DEFAULT_ARTIFACT_NAME);
        assert_eq!(config.model.n_estimators, 100);
    }
}
