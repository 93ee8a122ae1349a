//! Spreadsheet evaluation engine API.
//!
//! - [`Key`], [`Shape`], [`Axis`], [`Index`] - Coordinates and grid extents
//! - [`Selection`], [`Block`] - Regions used by attribute records
//! - [`CellValue`], [`EvalError`] - Results of evaluating a cell
//! - [`Evaluator`], [`RhaiEvaluator`] - Pluggable evaluation of cell code
//! - [`Deadline`] - Evaluation timeout shared with native builtins
//! - [`format_dynamic`] - Format values for display

mod deadline;
mod eval;
mod format;
mod key;
mod selection;
mod source;
mod value;

pub use deadline::{CHECK_INTERVAL, Deadline, DeadlineGuard};
pub use eval::{
    Environment, Evaluator, GridAccess, GridHandle, MacroOutput, Namespace, RESERVED_NAMES,
    RhaiEvaluator, SharedNamespace,
};
pub use format::{format_dynamic, format_number, truncate_display};
pub use key::{Axis, Index, Key, Shape};
pub use selection::{Block, Selection, shift_index};
pub use source::{Statement, classify, is_identifier};
pub use value::{CellValue, EvalError, EvalErrorKind, EvalResult};

pub use rhai::{AST, Dynamic};
