//! Run tracking: where metrics go and how a run reports its outcome.
//!
//! The training procedure only talks to the two traits below. Concrete
//! sinks are [`MemoryRun`] (in-process recorder) and [`RunLog`] (JSON-lines
//! file that also echoes every event to `tracing`).

mod memory;
mod run_log;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryRun;
pub use run_log::{RunEvent, RunLog};

/// Receives named scalar metrics.
pub trait MetricSink {
    fn log_metric(&mut self, name: &str, value: f64) -> Result<(), TrackingError>;

    /// Record a group of metrics, in order.
    ///
    /// The default forwards to [`MetricSink::log_metric`] one by one, so a
    /// failure part way through leaves the earlier metrics recorded. Sinks
    /// that can record the group as a unit override it.
    fn log_metrics(&mut self, metrics: &[(&str, f64)]) -> Result<(), TrackingError> {
        for (name, value) in metrics {
            self.log_metric(name, *value)?;
        }
        Ok(())
    }
}

/// Receives the single terminal signal of a run.
pub trait RunTracker {
    /// Mark the run as successfully completed.
    fn complete(&mut self) -> Result<(), TrackingError>;
    /// Mark the run as failed with a human-readable reason.
    fn fail(&mut self, reason: &str) -> Result<(), TrackingError>;
}

/// Lifecycle state of a tracked run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Failed(String),
}

impl RunState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, RunState::Running)
    }
}

/// Errors raised by metric sinks and run trackers.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("run already finished as {0:?}")]
    AlreadyFinished(RunState),
    #[error("cannot log metric {0} after the run finished")]
    MetricAfterFinish(String),
    #[error("run log io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode run event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid run log line {line} in {path}: {source}")]
    Decode {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_state_serializes_with_reason() {
        let failed = serde_json::to_string(&RunState::Failed("disk full".into())).unwrap();
        assert_eq!(failed, r#"{"state":"failed","reason":"disk full"}"#);
        let done = serde_json::to_string(&RunState::Completed).unwrap();
        assert_eq!(done, r#"{"state":"completed"}"#);
        assert!(RunState::Completed.is_finished());
        assert!(!RunState::Running.is_finished());
    }
}
