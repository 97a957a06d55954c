use super::*;
use crate::dataset::{Features, SchemaError};
use crate::ml::gbdt::GbdtModel;
use crate::tracking::{MemoryRun, RunState};
use ndarray::{Array1, Array2};
use tempfile::tempdir;

fn plate_label(idx: usize) -> u8 {
    u8::from((idx * 7) % 23 >= 9)
}

fn synthetic_table(rows: usize) -> Table {
    let columns = ["id", "thickness", "hardness", "Healthy"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    let rows = (0..rows)
        .map(|idx| {
            vec![
                format!("plate-{idx}"),
                ((idx * 7) % 23).to_string(),
                format!("{:.2}", ((idx * 13) % 31) as f32 / 3.0),
                plate_label(idx).to_string(),
            ]
        })
        .collect();
    Table::new(columns, rows).unwrap()
}

fn request_in(dir: &Path) -> RunRequest {
    RunRequest {
        working_dir: dir.to_path_buf(),
        model: GbdtOptions {
            n_estimators: 20,
            ..GbdtOptions::default()
        },
        ..RunRequest::default()
    }
}

#[test]
fn successful_run_logs_three_metrics_then_completes() {
    let dir = tempdir().unwrap();
    let request = request_in(dir.path());
    let mut run = MemoryRun::new();

    let outcome = run_tracked(&synthetic_table(100), &request, &mut run).unwrap();

    let names: Vec<&str> = run.metrics().iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, ["Accuracy", "F1 score", "AUC"]);
    assert_eq!(run.state(), &RunState::Completed);
    assert_eq!(outcome.train_rows, 70);
    assert_eq!(outcome.test_rows, 30);
    assert_eq!(
        outcome.artifact_path,
        dir.path().join("outputs").join(DEFAULT_ARTIFACT_NAME)
    );
    assert!(outcome.artifact_path.is_file());
    for (_, value) in outcome.metrics.entries() {
        assert!((0.0..=1.0).contains(&value));
    }
}

#[test]
fn accuracy_is_fraction_of_matching_holdout_rows() {
    let dir = tempdir().unwrap();
    let mut run = MemoryRun::new();
    let outcome = run_tracked(&synthetic_table(100), &request_in(dir.path()), &mut run).unwrap();

    let correct = outcome
        .test_indices
        .iter()
        .zip(&outcome.holdout_predictions)
        .filter(|&(&row, &predicted)| plate_label(row) == predicted)
        .count();
    let expected = correct as f64 / outcome.test_rows as f64;
    assert_eq!(outcome.metrics.accuracy, expected);
    assert_eq!(run.metric("Accuracy"), Some(expected));
}

#[test]
fn missing_label_column_fails_before_any_side_effect() {
    let dir = tempdir().unwrap();
    let table = Table::new(
        vec!["id".into(), "thickness".into()],
        vec![vec!["a".into(), "1".into()], vec!["b".into(), "2".into()]],
    )
    .unwrap();
    let mut run = MemoryRun::new();

    let err = run_tracked(&table, &request_in(dir.path()), &mut run).unwrap_err();

    assert!(matches!(
        err,
        RunError::Schema(SchemaError::MissingColumn { ref column, .. }) if column == "Healthy"
    ));
    assert!(run.metrics().is_empty());
    assert!(matches!(run.state(), RunState::Failed(_)));
    assert!(!dir.path().join("outputs").exists());
}

#[test]
fn malformed_feature_is_a_fit_error() {
    let dir = tempdir().unwrap();
    let table = Table::new(
        vec!["id".into(), "thickness".into(), "Healthy".into()],
        vec![
            vec!["a".into(), "1.5".into(), "1".into()],
            vec!["b".into(), "thick".into(), "0".into()],
        ],
    )
    .unwrap();
    let mut run = MemoryRun::new();
    let err = run_tracked(&table, &request_in(dir.path()), &mut run).unwrap_err();
    assert!(matches!(err, RunError::Fit(FitError::Cell(_))));
    assert!(run.metrics().is_empty());
}

#[test]
fn single_class_holdout_fails_without_emitting_metrics() {
    let rows = 20;
    let probe = Features {
        feature_names: vec!["probe".into()],
        x: Array2::zeros((rows, 1)),
        y: Array1::zeros(rows),
    };
    let split = train_test_split(&probe, DEFAULT_TEST_FRACTION, DEFAULT_SPLIT_SEED).unwrap();
    let mut labels = vec![0u8; rows];
    for &idx in &split.test_indices {
        labels[idx] = 1;
    }
    for (pos, &idx) in split.train_indices.iter().enumerate() {
        labels[idx] = (pos % 2) as u8;
    }
    let table = Table::new(
        vec!["id".into(), "thickness".into(), "Healthy".into()],
        (0..rows)
            .map(|idx| vec![idx.to_string(), idx.to_string(), labels[idx].to_string()])
            .collect(),
    )
    .unwrap();

    let dir = tempdir().unwrap();
    let mut run = MemoryRun::new();
    let err = run_tracked(&table, &request_in(dir.path()), &mut run).unwrap_err();

    assert!(matches!(err, RunError::Fit(FitError::Metric(_))));
    assert!(run.metrics().is_empty());
    assert!(matches!(run.state(), RunState::Failed(_)));
    assert!(!request_in(dir.path()).artifact_path().exists());
}

#[test]
fn serialization_failure_reports_failed_not_completed() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("outputs"), b"not a directory").unwrap();
    let mut run = MemoryRun::new();

    let err = run_tracked(&synthetic_table(60), &request_in(dir.path()), &mut run).unwrap_err();

    assert!(matches!(err, RunError::Serialization(_)));
    assert!(matches!(run.state(), RunState::Failed(reason) if reason.contains("serialization")));
}

#[test]
fn saved_model_reproduces_holdout_predictions() {
    let dir = tempdir().unwrap();
    let table = synthetic_table(80);
    let request = request_in(dir.path());
    let mut run = MemoryRun::new();
    let outcome = run_tracked(&table, &request, &mut run).unwrap();

    let features = derive_features(&table, "id", "Healthy").unwrap();
    let split = train_test_split(&features, request.test_fraction, request.seed).unwrap();
    let model = GbdtModel::load_json(&outcome.artifact_path).unwrap();
    let reloaded = model.predict_proba_batch(split.test.x.view());
    assert_eq!(reloaded, outcome.holdout_probabilities);
}

#[test]
fn separate_sink_and_tracker_receive_their_calls() {
    let dir = tempdir().unwrap();
    let mut sink = MemoryRun::new();
    let mut tracker = MemoryRun::new();
    run(&synthetic_table(50), &request_in(dir.path()), &mut sink, &mut tracker).unwrap();
    assert_eq!(sink.metrics().len(), 3);
    assert_eq!(sink.state(), &RunState::Running);
    assert!(tracker.metrics().is_empty());
    assert_eq!(tracker.state(), &RunState::Completed);
}

#[test]
fn missing_dataset_file_is_reported_as_failure() {
    let dir = tempdir().unwrap();
    let mut run = MemoryRun::new();
    let err = run_tracked_from_path(
        &dir.path().join("absent.csv"),
        &request_in(dir.path()),
        &mut run,
    )
    .unwrap_err();
    assert!(matches!(err, RunError::DataLoad(_)));
    assert!(matches!(run.state(), RunState::Failed(_)));
}

#[test]
fn rejected_metrics_fail_the_run_without_partial_emission() {
    let dir = tempdir().unwrap();
    let mut sink = MemoryRun::new();
    sink.complete().unwrap();
    let mut tracker = MemoryRun::new();
    let err = run(&synthetic_table(50), &request_in(dir.path()), &mut sink, &mut tracker)
        .unwrap_err();
    assert!(matches!(err, RunError::Tracking(_)));
    assert!(sink.metrics().is_empty());
    assert!(matches!(tracker.state(), RunState::Failed(_)));
    assert!(!request_in(dir.path()).artifact_path().exists());
}
