use thiserror::Error;

use crate::mode::ColumnMode;

/// Errors raised by column mutators and the loader
#[derive(Error, Debug)]
pub enum ColumnError {
    #[error("row {row} out of range (row count: {row_count})")]
    RowOutOfRange { row: usize, row_count: usize },

    #[error("interval [{start}, {end}] out of range (row count: {row_count})")]
    IntervalOutOfRange {
        start: usize,
        end: usize,
        row_count: usize,
    },

    #[error("column holds {actual:?} values, operation needs {expected:?}")]
    ModeMismatch {
        expected: ColumnMode,
        actual: ColumnMode,
    },

    #[error("cyclic formula: {0}")]
    FormulaCycle(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("formula parse error: {0}")]
    FormulaParse(String),

    #[error("column is being destroyed")]
    Destroyed,

    #[error("malformed column file: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = ColumnError> = std::result::Result<T, E>;
