//! Tabular dataset handling: loading, feature derivation and splitting.

pub mod features;
pub mod loader;
pub mod split;

pub use features::{CellError, ColumnRole, FeatureError, Features, SchemaError, derive_features};
pub use loader::{DataLoadError, Table, load_table};
pub use split::{DEFAULT_SPLIT_SEED, DEFAULT_TEST_FRACTION, Split, SplitError, train_test_split};
