//! Developer utility to evaluate a saved model on the holdout of a dataset.

use std::path::{Path, PathBuf};

use steelplate::config::{self, CONFIG_FILE_NAME};
use steelplate::dataset::{derive_features, load_table, train_test_split};
use steelplate::ml::gbdt::{GbdtModel, round_probability};
use steelplate::ml::metrics::{ConfusionMatrix, MetricsRecord, precision_recall_by_class};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

#[derive(Debug, Clone)]
struct CliOptions {
    model_path: PathBuf,
    dataset_path: PathBuf,
    config_path: Option<PathBuf>,
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    let app_config = match &options.config_path {
        Some(path) => config::load(path),
        None => config::load_or_default(Path::new(CONFIG_FILE_NAME)),
    }
    .map_err(|err| err.to_string())?;
    let request = app_config.run_request();

    let model = GbdtModel::load_json(&options.model_path).map_err(|err| err.to_string())?;
    let table = load_table(&options.dataset_path).map_err(|err| err.to_string())?;
    let features = derive_features(&table, &request.id_column, &request.label_column)
        .map_err(|err| err.to_string())?;
    if features.feature_names != model.feature_names {
        return Err(format!(
            "Dataset features {:?} do not match model features {:?}",
            features.feature_names, model.feature_names
        ));
    }
    let split = train_test_split(&features, request.test_fraction, request.seed)
        .map_err(|err| err.to_string())?;

    let predicted: Vec<u8> = model
        .predict_proba_batch(split.test.x.view())
        .into_iter()
        .map(round_probability)
        .collect();
    let truth = split.test.y.to_vec();
    let cm = ConfusionMatrix::from_binary(&truth, &predicted).map_err(|err| err.to_string())?;

    println!(
        "holdout: {} rows (seed {}, fraction {})",
        truth.len(),
        request.seed,
        request.test_fraction
    );
    match MetricsRecord::from_hard_predictions(&truth, &predicted) {
        Ok(metrics) => {
            for (name, value) in metrics.entries() {
                println!("{name}: {value:.4}");
            }
        }
        Err(err) => println!("metrics unavailable: {err}"),
    }
    for (idx, stats) in precision_recall_by_class(&cm).iter().enumerate() {
        println!(
            "class {idx} {:<10}  precision={:.3}  recall={:.3}  f1={:.3}  support={}",
            if idx == 1 { "healthy" } else { "unhealthy" },
            stats.precision,
            stats.recall,
            stats.f1,
            stats.support
        );
    }
    println!("confusion matrix (rows=true, cols=pred):");
    for truth in 0..cm.n_classes {
        let mut row = String::new();
        for pred in 0..cm.n_classes {
            row.push_str(&format!("{:6}", cm.get(truth, pred)));
        }
        println!("{row}");
    }
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut model_path: Option<PathBuf> = None;
    let mut dataset_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--model" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--model requires a value".to_string())?;
                model_path = Some(PathBuf::from(value));
            }
            "--dataset" => {
                idx += 1;
                let value =
                    args.get(idx).ok_or_else(|| "--dataset requires a value".to_string())?;
                dataset_path = Some(PathBuf::from(value));
            }
            "--config" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--config requires a value".to_string())?;
                config_path = Some(PathBuf::from(value));
            }
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }

    let model_path = model_path.ok_or_else(|| "--model is required".to_string())?;
    let dataset_path = dataset_path.ok_or_else(|| "--dataset is required".to_string())?;
    Ok(CliOptions {
        model_path,
        dataset_path,
        config_path,
    })
}

fn help_text() -> String {
    [
        "steelplate-eval",
        "",
        "Usage:",
        "  steelplate-eval --model <model.json> --dataset <file> [--config <toml>]",
        "",
        "Re-derives the training split from the config (seed, holdout fraction, columns)",
        "and reports metrics, per-class stats and the confusion matrix on the holdout.",
    ]
    .join("\n")
}
