//! Library exports for the command-line tools, benchmarks and tests.
/// `steelplate.toml` configuration.
pub mod config;
/// Dataset loading, feature derivation and splitting.
pub mod dataset;
/// Tracing subscriber setup.
pub mod logging;
/// Boosted-tree classifier and evaluation metrics.
pub mod ml;
/// The training-and-evaluation procedure.
pub mod pipeline;
/// Job submission and model registry boundary.
pub mod platform;
/// Metric sinks and run trackers.
pub mod tracking;
