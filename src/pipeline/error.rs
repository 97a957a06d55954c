use thiserror::Error;

use crate::dataset::{CellError, DataLoadError, FeatureError, SchemaError, SplitError};
use crate::ml::gbdt::{GbdtError, SerializationError};
use crate::ml::metrics::MetricError;
use crate::tracking::TrackingError;

/// Training or evaluation could not produce a model and its metrics.
#[derive(Debug, Error)]
pub enum FitError {
    #[error("malformed dataset cell: {0}")]
    Cell(#[from] CellError),
    #[error("train/test split failed: {0}")]
    Split(#[from] SplitError),
    #[error("classifier training failed: {0}")]
    Train(#[from] GbdtError),
    #[error("metric undefined: {0}")]
    Metric(#[from] MetricError),
}

/// Terminal failure of a training run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("data load failed: {0}")]
    DataLoad(#[from] DataLoadError),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("fit failed: {0}")]
    Fit(#[from] FitError),
    #[error("serialization failed: {0}")]
    Serialization(#[from] SerializationError),
    #[error("run tracking failed: {0}")]
    Tracking(#[from] TrackingError),
}

impl From<FeatureError> for RunError {
    fn from(err: FeatureError) -> Self {
        match err {
            FeatureError::Schema(err) => RunError::Schema(err),
            FeatureError::Cell(err) => RunError::Fit(FitError::Cell(err)),
        }
    }
}

impl From<SplitError> for RunError {
    fn from(err: SplitError) -> Self {
        RunError::Fit(err.into())
    }
}

impl From<GbdtError> for RunError {
    fn from(err: GbdtError) -> Self {
        RunError::Fit(err.into())
    }
}

impl From<MetricError> for RunError {
    fn from(err: MetricError) -> Self {
        RunError::Fit(err.into())
    }
}
