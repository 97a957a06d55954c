//! Deterministic gradient-boosted decision-tree binary classifier.
//!
//! A small XGBoost-style booster: logistic loss, second-order leaf weights,
//! depth-wise trees with histogram split search, and a JSON artifact that
//! reloads into a model producing bit-identical predictions.

mod model;
mod train;

pub use model::{
    GbdtModel, MODEL_FORMAT_VERSION, Node, SerializationError, Tree, round_probability, sigmoid,
};
pub use train::{GbdtError, GbdtOptions, train_gbdt};
