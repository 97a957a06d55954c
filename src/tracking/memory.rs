use super::{MetricSink, RunState, RunTracker, TrackingError};

/// In-memory run recorder.
///
/// Keeps metrics in emission order and rejects a second terminal signal or
/// metrics logged after the run finished.
#[derive(Debug, Clone)]
pub struct MemoryRun {
    metrics: Vec<(String, f64)>,
    state: RunState,
}

impl Default for MemoryRun {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRun {
    pub fn new() -> Self {
        Self {
            metrics: Vec::new(),
            state: RunState::Running,
        }
    }

    /// Metrics in the order they were logged.
    pub fn metrics(&self) -> &[(String, f64)] {
        &self.metrics
    }

    /// Latest value logged under `name`.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .rev()
            .find(|(metric, _)| metric == name)
            .map(|(_, value)| *value)
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    fn finish(&mut self, state: RunState) -> Result<(), TrackingError> {
        if self.state.is_finished() {
            return Err(TrackingError::AlreadyFinished(self.state.clone()));
        }
        self.state = state;
        Ok(())
    }
}

impl MetricSink for MemoryRun {
    fn log_metric(&mut self, name: &str, value: f64) -> Result<(), TrackingError> {
        if self.state.is_finished() {
            return Err(TrackingError::MetricAfterFinish(name.to_string()));
        }
        self.metrics.push((name.to_string(), value));
        Ok(())
    }

    fn log_metrics(&mut self, metrics: &[(&str, f64)]) -> Result<(), TrackingError> {
        if let Some((name, _)) = metrics.first().filter(|_| self.state.is_finished()) {
            return Err(TrackingError::MetricAfterFinish(name.to_string()));
        }
        self.metrics
            .extend(metrics.iter().map(|(name, value)| (name.to_string(), *value)));
        Ok(())
    }
}

impl RunTracker for MemoryRun {
    fn complete(&mut self) -> Result<(), TrackingError> {
        self.finish(RunState::Completed)
    }

    fn fail(&mut self, reason: &str) -> Result<(), TrackingError> {
        self.finish(RunState::Failed(reason.to_string()))
    }
}
