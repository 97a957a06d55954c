use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::{GbdtModel, MODEL_FORMAT_VERSION, Node, Tree, sigmoid};

/// Minimum loss reduction a split must reach after `gamma` is subtracted.
const SPLIT_EPS: f64 = 1e-6;
const MIN_HESSIAN: f64 = 1e-16;

/// Boosting hyperparameters.
///
/// Defaults follow the XGBoost library defaults for binary classification
/// so that "default hyperparameters" means the same thing here as there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GbdtOptions {
    /// Number of boosting rounds (trees). Default: 100.
    pub n_estimators: usize,
    /// Shrinkage applied to every leaf weight. Default: 0.3.
    pub learning_rate: f32,
    /// Maximum tree depth; a depth of 1 grows stumps. Default: 6.
    pub max_depth: usize,
    /// Minimum hessian sum required in each child. Default: 1.0.
    pub min_child_weight: f32,
    /// L2 regularization on leaf weights. Default: 1.0.
    pub reg_lambda: f32,
    /// Minimum loss reduction to make a split. Default: 0.0.
    pub gamma: f32,
    /// Initial probability of the positive class. Default: 0.5.
    pub base_score: f32,
    /// Number of equal-width bins per feature for split search. Default: 256.
    pub max_bins: usize,
}

impl Default for GbdtOptions {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            gamma: 0.0,
            base_score: 0.5,
            max_bins: 256,
        }
    }
}

impl GbdtOptions {
    /// Check every option is inside its valid range.
    pub fn validate(&self) -> Result<(), GbdtError> {
        let invalid = |msg: String| Err(GbdtError::InvalidOption(msg));
        if self.n_estimators == 0 {
            return invalid("n_estimators must be at least 1".to_string());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if self.max_depth == 0 {
            return invalid("max_depth must be at least 1".to_string());
        }
        for (name, value) in [
            ("min_child_weight", self.min_child_weight),
            ("reg_lambda", self.reg_lambda),
            ("gamma", self.gamma),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("{name} must be non-negative, got {value}"));
            }
        }
        if !(self.base_score > 0.0 && self.base_score < 1.0) {
            return invalid(format!("base_score must lie in (0, 1), got {}", self.base_score));
        }
        if !(2..=256).contains(&self.max_bins) {
            return invalid(format!("max_bins must lie in 2..=256, got {}", self.max_bins));
        }
        Ok(())
    }

    /// Replace out-of-range values with their defaults.
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        let non_negative = |value: f32, default: f32| {
            if value.is_finite() && value >= 0.0 {
                value
            } else {
                default
            }
        };
        Self {
            n_estimators: if self.n_estimators == 0 {
                defaults.n_estimators
            } else {
                self.n_estimators
            },
            learning_rate: if self.learning_rate.is_finite() && self.learning_rate > 0.0 {
                self.learning_rate
            } else {
                defaults.learning_rate
            },
            max_depth: if self.max_depth == 0 {
                defaults.max_depth
            } else {
                self.max_depth
            },
            min_child_weight: non_negative(self.min_child_weight, defaults.min_child_weight),
            reg_lambda: non_negative(self.reg_lambda, defaults.reg_lambda),
            gamma: non_negative(self.gamma, defaults.gamma),
            base_score: if self.base_score > 0.0 && self.base_score < 1.0 {
                self.base_score
            } else {
                defaults.base_score
            },
            max_bins: self.max_bins.clamp(2, 256),
        }
    }
}

/// Reasons boosting cannot start.
#[derive(Debug, Error, PartialEq)]
pub enum GbdtError {
    #[error("training set is empty")]
    EmptyDataset,
    #[error("training set has {rows} feature rows but {labels} labels")]
    LengthMismatch { rows: usize, labels: usize },
    #[error("training set has {columns} feature columns but {names} feature names")]
    FeatureNameMismatch { columns: usize, names: usize },
    #[error("training set has no feature columns")]
    NoFeatures,
    #[error("training labels hold only class {0}; need both 0 and 1")]
    SingleClass(u8),
    #[error("label {value} at row {row} is not 0 or 1")]
    InvalidLabel { row: usize, value: u8 },
    #[error("feature {feature} at row {row} is not finite")]
    NonFiniteFeature { row: usize, feature: usize },
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

/// Train a binary gradient-boosted tree classifier with the logistic loss.
///
/// Trees grow depth-wise. Each candidate split is scored with the usual
/// second-order gain over per-feature histograms, and leaves carry
/// `-G / (H + lambda)` scaled by the learning rate. Ties between candidate
/// splits keep the lowest feature index, then the lowest bin, so training is
/// deterministic for a given input.
pub fn train_gbdt(
    x: ArrayView2<'_, f32>,
    y: ArrayView1<'_, u8>,
    feature_names: &[String],
    options: &GbdtOptions,
) -> Result<GbdtModel, GbdtError> {
    options.validate()?;
    check_inputs(x, y, feature_names)?;

    let n = x.nrows();
    let binned = Binned::new(x, options.max_bins);
    let base_margin = logit(options.base_score);
    let mut margins = vec![base_margin; n];
    let mut grad = vec![0f64; n];
    let mut hess = vec![0f64; n];
    let mut trees = Vec::with_capacity(options.n_estimators);

    for round in 0..options.n_estimators {
        for i in 0..n {
            let p = f64::from(sigmoid(margins[i]));
            grad[i] = p - f64::from(y[i]);
            hess[i] = (p * (1.0 - p)).max(MIN_HESSIAN);
        }
        let tree = TreeBuilder {
            binned: &binned,
            grad: &grad,
            hess: &hess,
            options,
            nodes: Vec::new(),
        }
        .build();
        for (i, margin) in margins.iter_mut().enumerate() {
            *margin += tree.predict(x.row(i));
        }
        if tree.nodes.len() == 1 {
            tracing::debug!(round, "boosting round produced a single leaf");
        }
        trees.push(tree);
    }

    Ok(GbdtModel {
        model_version: MODEL_FORMAT_VERSION,
        feature_names: feature_names.to_vec(),
        options: options.clone(),
        base_margin,
        trees,
    })
}

fn check_inputs(
    x: ArrayView2<'_, f32>,
    y: ArrayView1<'_, u8>,
    feature_names: &[String],
) -> Result<(), GbdtError> {
    if x.nrows() != y.len() {
        return Err(GbdtError::LengthMismatch {
            rows: x.nrows(),
            labels: y.len(),
        });
    }
    if x.nrows() == 0 {
        return Err(GbdtError::EmptyDataset);
    }
    if x.ncols() == 0 {
        return Err(GbdtError::NoFeatures);
    }
    if x.ncols() != feature_names.len() {
        return Err(GbdtError::FeatureNameMismatch {
            columns: x.ncols(),
            names: feature_names.len(),
        });
    }
    let mut seen = [false; 2];
    for (row, &label) in y.iter().enumerate() {
        if label > 1 {
            return Err(GbdtError::InvalidLabel { row, value: label });
        }
        seen[usize::from(label)] = true;
    }
    if !(seen[0] && seen[1]) {
        return Err(GbdtError::SingleClass(u8::from(seen[1])));
    }
    for ((row, feature), value) in x.indexed_iter() {
        if !value.is_finite() {
            return Err(GbdtError::NonFiniteFeature { row, feature });
        }
    }
    Ok(())
}

fn logit(p: f32) -> f32 {
    (p / (1.0 - p)).ln()
}

/// Feature values mapped to equal-width bins between each column's min and max.
struct Binned {
    n_rows: usize,
    n_bins: usize,
    /// Feature-major bin codes: `codes[feature * n_rows + row]`.
    codes: Vec<u8>,
    /// `n_bins - 1` ascending bin edges per feature. A value lands in the
    /// first bin whose upper edge is `>= value`, so `code <= b` is exactly
    /// `value <= edges[b]`.
    edges: Vec<Vec<f32>>,
}

impl Binned {
    fn new(x: ArrayView2<'_, f32>, bins: usize) -> Self {
        let n_rows = x.nrows();
        let n_bins = bins.clamp(2, 256);
        let mut codes = Vec::with_capacity(n_rows * x.ncols());
        let mut edges = Vec::with_capacity(x.ncols());
        for column in x.columns() {
            let (min, max) = min_max(column);
            let feature_edges: Vec<f32> = (1..n_bins)
                .map(|b| min + (b as f32 / n_bins as f32) * (max - min))
                .collect();
            for &value in column {
                codes.push(feature_edges.partition_point(|&edge| edge < value) as u8);
            }
            edges.push(feature_edges);
        }
        Self {
            n_rows,
            n_bins,
            codes,
            edges,
        }
    }

    fn code(&self, feature: usize, row: usize) -> usize {
        usize::from(self.codes[feature * self.n_rows + row])
    }
}

fn min_max(column: ArrayView1<'_, f32>) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in column {
        min = min.min(v);
        max = max.max(v);
    }
    if min == max {
        max = min + 1.0;
    }
    (min, max)
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    gain: f64,
    feature: usize,
    bin: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct BinStats {
    grad: f64,
    hess: f64,
    count: u32,
}

struct TreeBuilder<'a> {
    binned: &'a Binned,
    grad: &'a [f64],
    hess: &'a [f64],
    options: &'a GbdtOptions,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn build(mut self) -> Tree {
        let rows: Vec<usize> = (0..self.binned.n_rows).collect();
        self.grow(rows, 0);
        Tree { nodes: self.nodes }
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> u32 {
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value: 0.0 });

        let (g, h) = rows.iter().fold((0f64, 0f64), |(g, h), &i| {
            (g + self.grad[i], h + self.hess[i])
        });
        let split = if depth < self.options.max_depth {
            self.best_split(&rows, g, h)
        } else {
            None
        };

        let node = match split {
            Some(split) => {
                let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                    .iter()
                    .partition(|&&i| self.binned.code(split.feature, i) <= split.bin);
                let left = self.grow(left_rows, depth + 1);
                let right = self.grow(right_rows, depth + 1);
                Node::Split {
                    feature: split.feature as u32,
                    threshold: self.binned.edges[split.feature][split.bin],
                    left,
                    right,
                }
            }
            None => Node::Leaf {
                value: self.leaf_value(g, h),
            },
        };
        self.nodes[idx] = node;
        idx as u32
    }

    fn leaf_value(&self, g: f64, h: f64) -> f32 {
        let denom = h + f64::from(self.options.reg_lambda);
        if denom <= 0.0 {
            return 0.0;
        }
        (-g / denom * f64::from(self.options.learning_rate)) as f32
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        let denom = h + f64::from(self.options.reg_lambda);
        if denom <= 0.0 { 0.0 } else { g * g / denom }
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let min_child = f64::from(self.options.min_child_weight);
        let gamma = f64::from(self.options.gamma);
        let parent_score = self.score(g, h);
        let total = rows.len() as u32;
        let mut best: Option<SplitCandidate> = None;
        let mut hist = vec![BinStats::default(); self.binned.n_bins];

        for feature in 0..self.binned.edges.len() {
            hist.iter_mut().for_each(|bin| *bin = BinStats::default());
            for &i in rows {
                let bin = &mut hist[self.binned.code(feature, i)];
                bin.grad += self.grad[i];
                bin.hess += self.hess[i];
                bin.count += 1;
            }

            let mut left = BinStats::default();
            for (bin, stats) in hist.iter().enumerate().take(self.binned.n_bins - 1) {
                left.grad += stats.grad;
                left.hess += stats.hess;
                left.count += stats.count;
                let right_count = total - left.count;
                if left.count == 0 || right_count == 0 {
                    continue;
                }
                let right_grad = g - left.grad;
                let right_hess = h - left.hess;
                if left.hess < min_child || right_hess < min_child {
                    continue;
                }
                let gain = 0.5
                    * (self.score(left.grad, left.hess) + self.score(right_grad, right_hess)
                        - parent_score)
                    - gamma;
                if gain <= SPLIT_EPS {
                    continue;
                }
                if best.is_none_or(|current| gain > current.gain) {
                    best = Some(SplitCandidate { gain, feature, bin });
                }
            }
        }
        best
    }
}
