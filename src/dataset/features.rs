//! Feature matrix and label vector derivation from a loaded table.

use ndarray::{Array1, Array2, Axis};
use thiserror::Error;

use super::loader::Table;

/// Role a column plays when deriving features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Identifier,
    Label,
}

impl std::fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnRole::Identifier => f.write_str("identifier"),
            ColumnRole::Label => f.write_str("label"),
        }
    }
}

/// The table does not have the shape the procedure expects.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("missing {role} column: {column}")]
    MissingColumn { column: String, role: ColumnRole },
    #[error("identifier and label both name column {0}")]
    SameColumn(String),
    #[error("no feature columns left after dropping {id_column} and {label_column}")]
    NoFeatures {
        id_column: String,
        label_column: String,
    },
}

/// A cell could not be interpreted as a feature value or a binary label.
#[derive(Debug, Error, PartialEq)]
pub enum CellError {
    #[error("row {row}, column {column}: {value:?} is not a finite number")]
    MalformedFeature {
        row: usize,
        column: String,
        value: String,
    },
    #[error("row {row}: label {value:?} is not 0 or 1")]
    MalformedLabel { row: usize, value: String },
}

/// Errors from [`derive_features`].
#[derive(Debug, Error, PartialEq)]
pub enum FeatureError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Cell(#[from] CellError),
}

/// Feature matrix `x` with its aligned binary label vector `y`.
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    /// Names of the feature columns, in matrix column order.
    pub feature_names: Vec<String>,
    /// Row-major `[n_rows, n_features]` matrix.
    pub x: Array2<f32>,
    /// Labels aligned with the rows of `x` (`1` healthy, `0` unhealthy).
    pub y: Array1<u8>,
}

impl Features {
    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    /// Copy the given rows, in the given order, into a new feature set.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            feature_names: self.feature_names.clone(),
            x: self.x.select(Axis(0), indices),
            y: self.y.select(Axis(0), indices),
        }
    }

    /// Row counts per class as `[unhealthy, healthy]`.
    pub fn class_counts(&self) -> [usize; 2] {
        let mut counts = [0usize; 2];
        for &label in &self.y {
            counts[usize::from(label.min(1))] += 1;
        }
        counts
    }
}

/// Split a table into features and labels.
///
/// Column presence is checked before any cell is parsed, so a table missing
/// the label column always fails with [`SchemaError`].
pub fn derive_features(
    table: &Table,
    id_column: &str,
    label_column: &str,
) -> Result<Features, FeatureError> {
    if id_column == label_column {
        return Err(SchemaError::SameColumn(id_column.to_string()).into());
    }
    let id_idx = table
        .column_index(id_column)
        .ok_or_else(|| SchemaError::MissingColumn {
            column: id_column.to_string(),
            role: ColumnRole::Identifier,
        })?;
    let label_idx = table
        .column_index(label_column)
        .ok_or_else(|| SchemaError::MissingColumn {
            column: label_column.to_string(),
            role: ColumnRole::Label,
        })?;

    let feature_columns: Vec<usize> = (0..table.columns().len())
        .filter(|&idx| idx != id_idx && idx != label_idx)
        .collect();
    if feature_columns.is_empty() {
        return Err(SchemaError::NoFeatures {
            id_column: id_column.to_string(),
            label_column: label_column.to_string(),
        }
        .into());
    }
    let feature_names: Vec<String> = feature_columns
        .iter()
        .map(|&idx| table.columns()[idx].clone())
        .collect();

    let n_rows = table.len();
    let mut x = Array2::<f32>::zeros((n_rows, feature_columns.len()));
    let mut labels = Vec::with_capacity(n_rows);
    for (row_idx, (row, mut out)) in table.rows().iter().zip(x.rows_mut()).enumerate() {
        let row_no = row_idx + 1;
        for (slot, &col) in out.iter_mut().zip(&feature_columns) {
            *slot = parse_feature(&row[col], row_no, &table.columns()[col])?;
        }
        labels.push(parse_label(&row[label_idx], row_no)?);
    }

    Ok(Features {
        feature_names,
        x,
        y: Array1::from(labels),
    })
}

fn parse_feature(cell: &str, row: usize, column: &str) -> Result<f32, CellError> {
    let malformed = || CellError::MalformedFeature {
        row,
        column: column.to_string(),
        value: cell.to_string(),
    };
    let value: f32 = cell.trim().parse().map_err(|_| malformed())?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(malformed())
    }
}

fn parse_label(cell: &str, row: usize) -> Result<u8, CellError> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" => Ok(1),
        "0" | "0.0" | "false" => Ok(0),
        _ => Err(CellError::MalformedLabel {
            row,
            value: cell.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: &[&[&str]]) -> Table {
        Table::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn drops_identifier_and_label_columns() {
        let t = table(
            &["X_Minimum", "id", "Healthy", "Y_Minimum"],
            &[&["42", "a", "1", "7.5"], &["3", "b", "0", "-1"]],
        );
        let features = derive_features(&t, "id", "Healthy").unwrap();
        assert_eq!(features.feature_names, vec!["X_Minimum", "Y_Minimum"]);
        assert_eq!(features.x.row(0).to_vec(), vec![42.0, 7.5]);
        assert_eq!(features.x.row(1).to_vec(), vec![3.0, -1.0]);
        assert_eq!(features.y.to_vec(), vec![1, 0]);
        assert_eq!(features.class_counts(), [1, 1]);
    }

    #[test]
    fn missing_label_is_a_schema_error_even_with_bad_cells() {
        let t = table(&["id", "f"], &[&["a", "not-a-number"]]);
        let err = derive_features(&t, "id", "Healthy").unwrap_err();
        assert_eq!(
            err,
            FeatureError::Schema(SchemaError::MissingColumn {
                column: "Healthy".into(),
                role: ColumnRole::Label,
            })
        );
    }

    #[test]
    fn missing_identifier_is_reported() {
        let t = table(&["f", "Healthy"], &[&["1", "1"]]);
        assert!(matches!(
            derive_features(&t, "id", "Healthy"),
            Err(FeatureError::Schema(SchemaError::MissingColumn {
                role: ColumnRole::Identifier,
                ..
            }))
        ));
    }

    #[test]
    fn no_features_left_is_a_schema_error() {
        let t = table(&["id", "Healthy"], &[&["a", "1"]]);
        assert!(matches!(
            derive_features(&t, "id", "Healthy"),
            Err(FeatureError::Schema(SchemaError::NoFeatures { .. }))
        ));
    }

    #[test]
    fn malformed_cells_name_row_and_column() {
        let t = table(&["id", "f", "Healthy"], &[&["a", "1", "1"], &["b", "NaN", "0"]]);
        assert_eq!(
            derive_features(&t, "id", "Healthy").unwrap_err(),
            FeatureError::Cell(CellError::MalformedFeature {
                row: 2,
                column: "f".into(),
                value: "NaN".into(),
            })
        );

        let t = table(&["id", "f", "Healthy"], &[&["a", "1", "2"]]);
        assert!(matches!(
            derive_features(&t, "id", "Healthy"),
            Err(FeatureError::Cell(CellError::MalformedLabel { row: 1, .. }))
        ));
    }

    #[test]
    fn select_keeps_rows_aligned() {
        let t = table(
            &["id", "f", "Healthy"],
            &[&["a", "1", "1"], &["b", "2", "0"], &["c", "3", "1"]],
        );
        let features = derive_features(&t, "id", "Healthy").unwrap();
        let picked = features.select(&[2, 0]);
        assert_eq!(picked.x.column(0).to_vec(), vec![3.0, 1.0]);
        assert_eq!(picked.y.to_vec(), vec![1, 1]);
    }
}
