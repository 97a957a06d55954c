//! Machine learning building blocks: the boosted-tree classifier and its
//! evaluation metrics.

pub mod gbdt;
pub mod metrics;
