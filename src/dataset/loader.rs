//! Tabular dataset loading for CSV and JSON-lines exports.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while materializing a dataset into a [`Table`].
#[derive(Debug, Error)]
pub enum DataLoadError {
    #[error("dataset not found: {0}")]
    NotFound(PathBuf),
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("csv error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("invalid JSON on line {line} of {path}: {source}")]
    Json {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
    #[error("line {line} of {path}: column {column} holds a nested value")]
    NestedValue {
        path: PathBuf,
        line: usize,
        column: String,
    },
    #[error("unsupported dataset format: {0} (expected .csv, .jsonl or .ndjson)")]
    UnsupportedFormat(PathBuf),
    #[error("dataset has no header")]
    NoHeader,
    #[error("dataset has no rows")]
    Empty,
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),
    #[error("row {row} has {found} cells but the header has {expected}")]
    Ragged {
        row: usize,
        found: usize,
        expected: usize,
    },
}

/// In-memory tabular dataset with named columns and raw string cells.
///
/// Cells are kept unparsed; typing happens when features are derived so a
/// schema problem is reported before any value is interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Build a table, checking column names are unique and rows are rectangular.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, DataLoadError> {
        if columns.is_empty() {
            return Err(DataLoadError::NoHeader);
        }
        let mut seen = BTreeSet::new();
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(DataLoadError::DuplicateColumn(column.clone()));
            }
        }
        if rows.is_empty() {
            return Err(DataLoadError::Empty);
        }
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DataLoadError::Ragged {
                    row: idx + 1,
                    found: row.len(),
                    expected: columns.len(),
                });
            }
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Position of a column by exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Load a dataset file, choosing the parser from the file extension.
pub fn load_table(path: &Path) -> Result<Table, DataLoadError> {
    if !path.is_file() {
        return Err(DataLoadError::NotFound(path.to_path_buf()));
    }
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("csv") => load_csv(path),
        Some("jsonl") | Some("ndjson") => load_jsonl(path),
        _ => Err(DataLoadError::UnsupportedFormat(path.to_path_buf())),
    }
}

fn load_csv(path: &Path) -> Result<Table, DataLoadError> {
    let csv_error = |source: csv::Error| DataLoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_error)?;
    let columns: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();
    if columns.iter().all(|column| column.is_empty()) {
        return Err(DataLoadError::NoHeader);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Table::new(columns, rows)
}

fn load_jsonl(path: &Path) -> Result<Table, DataLoadError> {
    let file = File::open(path).map_err(|source| DataLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);
    let mut columns: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|source| DataLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Map<String, Value> =
            serde_json::from_str(&line).map_err(|source| DataLoadError::Json {
                path: path.to_path_buf(),
                line: line_no,
                source,
            })?;
        let columns = columns.get_or_insert_with(|| record.keys().cloned().collect());
        if record.len() != columns.len() || columns.iter().any(|key| !record.contains_key(key)) {
            return Err(DataLoadError::Ragged {
                row: rows.len() + 1,
                found: record.len(),
                expected: columns.len(),
            });
        }
        let mut row = Vec::with_capacity(columns.len());
        for column in columns.iter() {
            let cell = match &record[column] {
                Value::String(text) => text.trim().to_string(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                Value::Null => String::new(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(DataLoadError::NestedValue {
                        path: path.to_path_buf(),
                        line: line_no,
                        column: column.clone(),
                    });
                }
            };
            row.push(cell);
        }
        rows.push(row);
    }

    let columns = columns.ok_or(DataLoadError::Empty)?;
    Table::new(columns, rows)
}
