//! Command-line entry point: train locally or submit through the local platform.

use std::path::{Path, PathBuf};

use steelplate::config::{self, AppConfig, CONFIG_FILE_NAME};
use steelplate::logging;
use steelplate::pipeline::{RunOutcome, run_tracked_from_path};
use steelplate::platform::{ArtifactMetadata, DatasetRef, JobSpec, LocalPlatform, Platform};
use steelplate::tracking::RunLog;

const DEFAULT_BINDING: &str = "steelplate";
const DEFAULT_MODEL_NAME: &str = "steelplate";
const DEFAULT_EXPERIMENT: &str = "steelplate-training";

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let command = parse_args(std::env::args().skip(1).collect())?;
    match command {
        Command::Train(options) => train(options),
        Command::Submit(options) => submit(options),
        Command::InitConfig(options) => init_config(options),
    }
}

#[derive(Debug, Clone)]
enum Command {
    Train(TrainOptions),
    Submit(SubmitOptions),
    InitConfig(InitConfigOptions),
}

#[derive(Debug, Clone)]
struct TrainOptions {
    dataset: PathBuf,
    config: Option<PathBuf>,
    workdir: Option<PathBuf>,
    artifact: Option<String>,
}

#[derive(Debug, Clone)]
struct SubmitOptions {
    dataset: PathBuf,
    binding: String,
    config: Option<PathBuf>,
    workdir: Option<PathBuf>,
    model_name: String,
    experiment: String,
}

#[derive(Debug, Clone)]
struct InitConfigOptions {
    path: PathBuf,
    force: bool,
}

fn train(options: TrainOptions) -> Result<(), String> {
    let mut app_config = load_config(options.config.as_deref())?;
    if let Some(workdir) = options.workdir {
        app_config.output.working_dir = workdir;
    }
    if let Some(artifact) = options.artifact {
        app_config.output.artifact_name = artifact;
    }
    let app_config = app_config.normalized();
    let request = app_config.run_request();
    let log_dir = request.working_dir.join("logs");
    init_logging(&log_dir);

    let mut run_log = RunLog::create(&log_dir.join("run.jsonl")).map_err(|err| err.to_string())?;
    let outcome = run_tracked_from_path(&options.dataset, &request, &mut run_log)
        .map_err(|err| err.to_string())?;
    print_outcome(&outcome);
    println!("run log: {}", run_log.path().display());
    Ok(())
}

fn submit(options: SubmitOptions) -> Result<(), String> {
    let app_config = load_config(options.config.as_deref())?;
    let root = options
        .workdir
        .unwrap_or_else(|| app_config.output.working_dir.clone());
    init_logging(&root.join("logs"));

    let mut platform = LocalPlatform::new(&root);
    platform.bind_dataset(options.binding.clone(), options.dataset);
    let job = JobSpec {
        experiment: options.experiment,
        dataset: DatasetRef::new(options.binding.clone()),
        request: app_config.run_request(),
    };
    let handle = platform.submit(&job).map_err(|err| err.to_string())?;
    let status = platform
        .await_completion(&handle)
        .map_err(|err| err.to_string())?;
    println!("run {}: {status}", handle.run_id);
    if !status.is_completed() {
        return Err(format!("Run {} did not complete: {status}", handle.run_id));
    }

    let outcome = platform
        .run_outcome(&handle)
        .map_err(|err| err.to_string())?
        .cloned()
        .ok_or_else(|| format!("Run {} has no outcome", handle.run_id))?;
    print_outcome(&outcome);
    let metadata = ArtifactMetadata::new(options.model_name)
        .with_run(&handle)
        .with_metrics(&outcome.metrics)
        .with_tag("dataset", &options.binding)
        .with_tag("experiment", &handle.experiment);
    let model_id = platform
        .register_artifact(&outcome.artifact_path, &metadata)
        .map_err(|err| err.to_string())?;
    println!("registered model: {model_id}");
    Ok(())
}

fn init_config(options: InitConfigOptions) -> Result<(), String> {
    config::write_default(&options.path, options.force).map_err(|err| err.to_string())?;
    println!("wrote {}", options.path.display());
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AppConfig, String> {
    match path {
        Some(path) => config::load(path),
        None => config::load_or_default(Path::new(CONFIG_FILE_NAME)),
    }
    .map_err(|err| err.to_string())
}

fn init_logging(log_dir: &Path) {
    if let Err(err) = logging::init(log_dir) {
        eprintln!("File logging disabled: {err}");
        if let Err(err) = logging::init_stdout() {
            eprintln!("Logging disabled: {err}");
        }
    }
}

fn print_outcome(outcome: &RunOutcome) {
    println!(
        "split: {} train / {} holdout",
        outcome.train_rows, outcome.test_rows
    );
    for (name, value) in outcome.metrics.entries() {
        println!("{name}: {value:.4}");
    }
    println!("model: {}", outcome.artifact_path.display());
}

fn parse_args(args: Vec<String>) -> Result<Command, String> {
    let Some((command, rest)) = args.split_first() else {
        return Err(help_text());
    };
    let mut dataset: Option<PathBuf> = None;
    let mut config: Option<PathBuf> = None;
    let mut workdir: Option<PathBuf> = None;
    let mut artifact: Option<String> = None;
    let mut binding = DEFAULT_BINDING.to_string();
    let mut model_name = DEFAULT_MODEL_NAME.to_string();
    let mut experiment = DEFAULT_EXPERIMENT.to_string();
    let is_submit = match command.as_str() {
        "train" => false,
        "submit" => true,
        "init-config" => return parse_init_config(rest),
        "-h" | "--help" => return Err(help_text()),
        unknown => return Err(format!("Unknown command: {unknown}\n\n{}", help_text())),
    };

    let mut idx = 0usize;
    while idx < rest.len() {
        let flag = rest[idx].as_str();
        let mut value = || {
            idx += 1;
            rest.get(idx)
                .cloned()
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        match flag {
            "-h" | "--help" => return Err(help_text()),
            "--dataset" => dataset = Some(PathBuf::from(value()?)),
            "--config" => config = Some(PathBuf::from(value()?)),
            "--workdir" => workdir = Some(PathBuf::from(value()?)),
            "--artifact" if !is_submit => artifact = Some(value()?),
            "--name" if is_submit => binding = value()?,
            "--model-name" if is_submit => model_name = value()?,
            "--experiment" if is_submit => experiment = value()?,
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }

    let dataset = dataset.ok_or_else(|| format!("--dataset is required\n\n{}", help_text()))?;
    if is_submit {
        Ok(Command::Submit(SubmitOptions {
            dataset,
            binding,
            config,
            workdir,
            model_name,
            experiment,
        }))
    } else {
        Ok(Command::Train(TrainOptions {
            dataset,
            config,
            workdir,
            artifact,
        }))
    }
}

fn parse_init_config(args: &[String]) -> Result<Command, String> {
    let mut path = PathBuf::from(CONFIG_FILE_NAME);
    let mut force = false;
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--config" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--config requires a value".to_string())?;
                path = PathBuf::from(value);
            }
            "--force" => force = true,
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(Command::InitConfig(InitConfigOptions { path, force }))
}

fn help_text() -> String {
    [
        "steelplate",
        "",
        "Trains the steel-plate health classifier and reports Accuracy, F1 score and AUC.",
        "",
        "Usage:",
        "  steelplate train --dataset <file> [--config <toml>] [--workdir <dir>] [--artifact <name>]",
        "  steelplate submit --dataset <file> [--name <binding>] [--config <toml>] [--workdir <dir>]",
        "                    [--model-name <name>] [--experiment <name>]",
        "  steelplate init-config [--config <toml>] [--force]",
        "",
        "Options:",
        "  --dataset <file>     Labeled dataset, .csv or .jsonl (required).",
        "  --config <toml>      Config file (default: ./steelplate.toml if present).",
        "  --workdir <dir>      Working directory; the model goes to <dir>/outputs/.",
        "  --artifact <name>    Model file name (default: steelplate_model.json).",
        "  --name <binding>     Dataset binding name (default: steelplate).",
        "  --model-name <name>  Registry model name (default: steelplate).",
        "  --experiment <name>  Experiment name (default: steelplate-training).",
        "  --force              init-config: replace an existing config file.",
    ]
    .join("\n")
}

