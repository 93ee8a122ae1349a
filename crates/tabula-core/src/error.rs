//! Error types for the Tabula grid model.

use thiserror::Error;

use tabula_engine::engine::Axis;

/// Errors returned by store and structural operations.
///
/// Evaluation problems are never reported here; they become cell values.
#[derive(Error, Debug)]
pub enum TabulaError {
    #[error("{axis} index {index} outside grid bound {bound}")]
    OutOfRange { axis: Axis, index: i64, bound: usize },

    #[error("Attribute record {index} does not exist ({len} records)")]
    RecordOutOfRange { index: usize, len: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl TabulaError {
    pub(crate) fn out_of_range(axis: Axis, index: impl TryInto<i64>, bound: usize) -> Self {
        TabulaError::OutOfRange {
            axis,
            index: index.try_into().unwrap_or(i64::MAX),
            bound,
        }
    }
}

pub type Result<T> = std::result::Result<T, TabulaError>;
