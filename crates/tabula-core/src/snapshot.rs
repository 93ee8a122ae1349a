//! Persisted grid state.

use serde::{Deserialize, Serialize};
use tabula_engine::engine::{Key, Shape};

use crate::attributes::AttributeRecord;

/// Everything a saved grid holds. Evaluated results are never included.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub shape: Shape,
    pub cells: Vec<(Key, String)>,
    pub attributes: Vec<AttributeRecord>,
    /// `((row, sheet), height)`
    pub row_heights: Vec<((usize, usize), f64)>,
    /// `((col, sheet), width)`
    pub col_widths: Vec<((usize, usize), f64)>,
    pub macros: String,
}
