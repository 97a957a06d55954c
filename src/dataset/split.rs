//! Seeded, non-stratified train/holdout partitioning.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

use super::features::Features;

/// Holdout fraction used by the training procedure.
pub const DEFAULT_TEST_FRACTION: f64 = 0.30;
/// Shuffle seed used by the training procedure.
pub const DEFAULT_SPLIT_SEED: u64 = 0;

#[derive(Debug, Error, PartialEq)]
pub enum SplitError {
    #[error("test fraction must lie strictly between 0 and 1, got {0}")]
    InvalidFraction(f64),
    #[error("cannot split {rows} rows with a holdout of {holdout}: one side would be empty")]
    TooFewRows { rows: usize, holdout: usize },
}

/// Disjoint training and holdout subsets plus the source row indices of each.
#[derive(Debug, Clone)]
pub struct Split {
    pub train: Features,
    pub test: Features,
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
}

/// Number of holdout rows for `n_rows` at `test_fraction`.
///
/// Rounds up, ignoring floating-point noise so that `0.3 * 100` gives 30.
pub fn holdout_size(n_rows: usize, test_fraction: f64) -> usize {
    let raw = test_fraction * n_rows as f64;
    let nearest = raw.round();
    if (raw - nearest).abs() < 1e-9 {
        nearest as usize
    } else {
        raw.ceil() as usize
    }
}

/// Partition features into training and holdout subsets.
///
/// Row indices are shuffled with a `StdRng` seeded from `seed`; the first
/// [`holdout_size`] shuffled indices form the holdout and the rest the
/// training set. The same input and seed always produce the same partition.
pub fn train_test_split(
    features: &Features,
    test_fraction: f64,
    seed: u64,
) -> Result<Split, SplitError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(SplitError::InvalidFraction(test_fraction));
    }
    let rows = features.n_rows();
    let holdout = holdout_size(rows, test_fraction);
    if holdout == 0 || holdout >= rows {
        return Err(SplitError::TooFewRows { rows, holdout });
    }

    let mut order: Vec<usize> = (0..rows).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let train_indices = order.split_off(holdout);
    let test_indices = order;

    Ok(Split {
        train: features.select(&train_indices),
        test: features.select(&test_indices),
        train_indices,
        test_indices,
    })
}
