use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::{
    ArtifactMetadata, FsModelRegistry, JobSpec, ModelId, Platform, PlatformError, RunHandle,
    RunStatus,
};
use crate::pipeline::{RunOutcome, run_tracked_from_path};
use crate::tracking::{MemoryRun, RunState};

/// In-process platform backed by a directory.
///
/// Runs execute synchronously inside [`Platform::submit`], each in its own
/// working directory `<root>/runs/<run id>`. Registered models live under
/// `<root>/registry`.
pub struct LocalPlatform {
    root: PathBuf,
    datasets: BTreeMap<String, PathBuf>,
    runs: HashMap<String, LocalRun>,
    registry: FsModelRegistry,
}

struct LocalRun {
    workdir: PathBuf,
    tracker: MemoryRun,
    outcome: Option<RunOutcome>,
}

impl LocalPlatform {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let registry = FsModelRegistry::new(root.join("registry"));
        Self {
            root,
            datasets: BTreeMap::new(),
            runs: HashMap::new(),
            registry,
        }
    }

    /// Bind a dataset name to a file; rebinding replaces the previous path.
    pub fn bind_dataset(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.datasets.insert(name.into(), path.into());
    }

    pub fn registry(&self) -> &FsModelRegistry {
        &self.registry
    }

    /// Metrics logged by a run, in emission order.
    pub fn run_metrics(&self, run: &RunHandle) -> Result<&[(String, f64)], PlatformError> {
        Ok(self.local_run(run)?.tracker.metrics())
    }

    /// Result of a completed run; `None` when the run failed.
    pub fn run_outcome(&self, run: &RunHandle) -> Result<Option<&RunOutcome>, PlatformError> {
        Ok(self.local_run(run)?.outcome.as_ref())
    }

    pub fn run_workdir(&self, run: &RunHandle) -> Result<&Path, PlatformError> {
        Ok(&self.local_run(run)?.workdir)
    }

    fn local_run(&self, run: &RunHandle) -> Result<&LocalRun, PlatformError> {
        self.runs
            .get(&run.run_id)
            .ok_or_else(|| PlatformError::UnknownRun(run.run_id.clone()))
    }

    fn status_of(&self, run_id: &str) -> Result<RunStatus, PlatformError> {
        let run = self
            .runs
            .get(run_id)
            .ok_or_else(|| PlatformError::UnknownRun(run_id.to_string()))?;
        match run.tracker.state() {
            RunState::Completed => Ok(RunStatus::Completed),
            RunState::Failed(reason) => Ok(RunStatus::Failed(reason.clone())),
            RunState::Running => Ok(RunStatus::Failed("run never finished".to_string())),
        }
    }
}

impl Platform for LocalPlatform {
    fn submit(&mut self, job: &JobSpec) -> Result<RunHandle, PlatformError> {
        let dataset = self
            .datasets
            .get(&job.dataset.name)
            .ok_or_else(|| PlatformError::UnknownDataset(job.dataset.name.clone()))?
            .clone();
        let run_id = Uuid::new_v4().to_string();
        let workdir = self.root.join("runs").join(&run_id);
        let mut request = job.request.clone();
        request.working_dir = workdir.clone();

        tracing::info!(
            run_id = %run_id,
            experiment = %job.experiment,
            dataset = %job.dataset.name,
            "submitted run"
        );
        let mut tracker = MemoryRun::new();
        let outcome = match run_tracked_from_path(&dataset, &request, &mut tracker) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                tracing::warn!(run_id = %run_id, error = %err, "run failed");
                None
            }
        };
        self.runs.insert(
            run_id.clone(),
            LocalRun {
                workdir,
                tracker,
                outcome,
            },
        );
        Ok(RunHandle {
            run_id,
            experiment: job.experiment.clone(),
        })
    }

    fn await_completion(&mut self, run: &RunHandle) -> Result<RunStatus, PlatformError> {
        self.status_of(&run.run_id)
    }

    fn register_artifact(
        &mut self,
        path: &Path,
        metadata: &ArtifactMetadata,
    ) -> Result<ModelId, PlatformError> {
        if let Some(run_id) = &metadata.run_id {
            let status = self.status_of(run_id)?;
            if !status.is_completed() {
                return Err(PlatformError::RunNotCompleted {
                    run_id: run_id.clone(),
                    status,
                });
            }
        }
        Ok(self.registry.register(path, metadata)?.id())
    }
}
