//! The training-and-evaluation procedure.
//!
//! One linear pass: derive features, split, fit, predict the holdout,
//! compute metrics, emit them, write the model artifact and report the
//! outcome. Failures at any step are reported to the run tracker exactly
//! once and nothing after the failing step runs.

mod error;
#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, warn};

use crate::dataset::{
    DEFAULT_SPLIT_SEED, DEFAULT_TEST_FRACTION, Table, derive_features, load_table,
    train_test_split,
};
use crate::ml::gbdt::{GbdtOptions, round_probability, train_gbdt};
use crate::ml::metrics::MetricsRecord;
use crate::tracking::{MetricSink, RunTracker};

pub use error::{FitError, RunError};

/// Directory under the working directory that receives the model artifact.
pub const OUTPUTS_DIR: &str = "outputs";
pub const DEFAULT_ARTIFACT_NAME: &str = "steelplate_model.json";
pub const DEFAULT_ID_COLUMN: &str = "id";
pub const DEFAULT_LABEL_COLUMN: &str = "Healthy";

/// Everything a run needs besides the data and the tracking collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub working_dir: PathBuf,
    pub artifact_name: String,
    pub id_column: String,
    pub label_column: String,
    pub test_fraction: f64,
    pub seed: u64,
    pub model: GbdtOptions,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            artifact_name: DEFAULT_ARTIFACT_NAME.to_string(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            test_fraction: DEFAULT_TEST_FRACTION,
            seed: DEFAULT_SPLIT_SEED,
            model: GbdtOptions::default(),
        }
    }
}

impl RunRequest {
    pub fn outputs_dir(&self) -> PathBuf {
        self.working_dir.join(OUTPUTS_DIR)
    }

    /// `<working_dir>/outputs/<artifact_name>`.
    pub fn artifact_path(&self) -> PathBuf {
        self.outputs_dir().join(&self.artifact_name)
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub metrics: MetricsRecord,
    pub artifact_path: PathBuf,
    pub train_rows: usize,
    pub test_rows: usize,
    /// Source row indices of the holdout, in evaluation order.
    pub test_indices: Vec<usize>,
    /// Positive-class probabilities on the holdout.
    pub holdout_probabilities: Vec<f32>,
    /// Rounded holdout predictions used for the metrics.
    pub holdout_predictions: Vec<u8>,
}

/// Run the procedure on an already loaded table.
///
/// The three metrics reach `sink` through one [`MetricSink::log_metrics`]
/// call, only after all of them are computed. Whether a sink error part way
/// through that call leaves earlier metrics recorded depends on the sink;
/// [`MemoryRun`](crate::tracking::MemoryRun) and
/// [`RunLog`](crate::tracking::RunLog) record the group as a unit.
pub fn run(
    table: &Table,
    request: &RunRequest,
    sink: &mut dyn MetricSink,
    tracker: &mut dyn RunTracker,
) -> Result<RunOutcome, RunError> {
    let result = execute(table, request, sink);
    finish(result, tracker)
}

/// Load the dataset at `path` and run the procedure on it.
///
/// A load failure is reported to `tracker` like any other failure.
pub fn run_from_path(
    path: &Path,
    request: &RunRequest,
    sink: &mut dyn MetricSink,
    tracker: &mut dyn RunTracker,
) -> Result<RunOutcome, RunError> {
    let result = load(path).and_then(|table| execute(&table, request, sink));
    finish(result, tracker)
}

/// Like [`run`], for a single collaborator that is both sink and tracker.
pub fn run_tracked<T: MetricSink + RunTracker>(
    table: &Table,
    request: &RunRequest,
    run: &mut T,
) -> Result<RunOutcome, RunError> {
    let result = execute(table, request, &mut *run);
    finish(result, run)
}

/// Like [`run_from_path`], for a single collaborator that is both sink and
/// tracker.
pub fn run_tracked_from_path<T: MetricSink + RunTracker>(
    path: &Path,
    request: &RunRequest,
    run: &mut T,
) -> Result<RunOutcome, RunError> {
    let result = load(path).and_then(|table| execute(&table, request, &mut *run));
    finish(result, run)
}

fn load(path: &Path) -> Result<Table, RunError> {
    let started = Instant::now();
    let table = load_table(path)?;
    info!(
        dataset = %path.display(),
        rows = table.len(),
        columns = table.columns().len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "loaded dataset"
    );
    Ok(table)
}

fn execute(
    table: &Table,
    request: &RunRequest,
    sink: &mut dyn MetricSink,
) -> Result<RunOutcome, RunError> {
    let started = Instant::now();
    let features = derive_features(table, &request.id_column, &request.label_column)?;
    let [unhealthy, healthy] = features.class_counts();
    info!(
        rows = features.n_rows(),
        features = features.n_features(),
        healthy,
        unhealthy,
        "derived features"
    );

    let split = train_test_split(&features, request.test_fraction, request.seed)?;
    info!(
        train_rows = split.train.n_rows(),
        test_rows = split.test.n_rows(),
        seed = request.seed,
        "split dataset"
    );

    let fit_started = Instant::now();
    let model = train_gbdt(
        split.train.x.view(),
        split.train.y.view(),
        &split.train.feature_names,
        &request.model,
    )?;
    info!(
        trees = model.trees.len(),
        elapsed_ms = fit_started.elapsed().as_millis() as u64,
        "fitted classifier"
    );

    let holdout_probabilities = model.predict_proba_batch(split.test.x.view());
    let holdout_predictions: Vec<u8> = holdout_probabilities
        .iter()
        .map(|&p| round_probability(p))
        .collect();
    let truth = split.test.y.to_vec();
    let metrics = MetricsRecord::from_hard_predictions(&truth, &holdout_predictions)?;

    sink.log_metrics(&metrics.entries())?;

    let artifact_path = request.artifact_path();
    model.save_json(&artifact_path)?;
    info!(
        artifact = %artifact_path.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "saved model"
    );

    Ok(RunOutcome {
        metrics,
        artifact_path,
        train_rows: split.train.n_rows(),
        test_rows: split.test.n_rows(),
        test_indices: split.test_indices,
        holdout_probabilities,
        holdout_predictions,
    })
}

fn finish(
    result: Result<RunOutcome, RunError>,
    tracker: &mut dyn RunTracker,
) -> Result<RunOutcome, RunError> {
    match result {
        Ok(outcome) => {
            tracker.complete()?;
            info!(
                accuracy = outcome.metrics.accuracy,
                f1_score = outcome.metrics.f1_weighted,
                auc = outcome.metrics.auc,
                "run completed"
            );
            Ok(outcome)
        }
        Err(err) => {
            let reason = err.to_string();
            warn!(error = %reason, "run failed");
            if let Err(track_err) = tracker.fail(&reason) {
                warn!(error = %track_err, "could not report run failure");
            }
            Err(err)
        }
    }
}
