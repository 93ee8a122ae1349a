//! Cell coordinates, grid shapes and per-axis indexing.
//!
//! Every layer of the model addresses cells with a [`Key`]: a
//! `(row, col, sheet)` triple of zero-based indices. The extent of a grid is a
//! [`Shape`] of the same arity, and structural edits name the dimension they
//! act on with an [`Axis`].
//!
//! # Examples
//!
//! ```ignore
//! let key = Key::new(2, 1, 0);
//! assert_eq!(key.get(Axis::Column), 1);
//! assert!(Shape::new(10, 10, 1).contains(key));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// A reference to a cell by row, column and sheet indices (0-indexed).
#[derive(
    Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct Key {
    pub row: usize,
    pub col: usize,
    pub sheet: usize,
}

impl Key {
    pub const fn new(row: usize, col: usize, sheet: usize) -> Key {
        Key { row, col, sheet }
    }

    /// Component of the key along `axis`.
    pub fn get(&self, axis: Axis) -> usize {
        match axis {
            Axis::Row => self.row,
            Axis::Column => self.col,
            Axis::Sheet => self.sheet,
        }
    }

    /// Copy of the key with the component along `axis` replaced.
    pub fn with(&self, axis: Axis, value: usize) -> Key {
        let mut key = *self;
        match axis {
            Axis::Row => key.row = value,
            Axis::Column => key.col = value,
            Axis::Sheet => key.sheet = value,
        }
        key
    }

    /// Ordering used when scanning the grid: sheet, then column, then row.
    pub fn scan_order(&self) -> (usize, usize, usize) {
        (self.sheet, self.col, self.row)
    }
}

impl From<(usize, usize, usize)> for Key {
    fn from((row, col, sheet): (usize, usize, usize)) -> Self {
        Key::new(row, col, sheet)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.row, self.col, self.sheet)
    }
}

/// The three dimensions of a grid.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Axis {
    Row,
    Column,
    Sheet,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Row, Axis::Column, Axis::Sheet];

    /// Map a numeric axis (0 = row, 1 = column, 2 = sheet) to an [`Axis`].
    pub fn from_index(index: i64) -> Option<Axis> {
        match index {
            0 => Some(Axis::Row),
            1 => Some(Axis::Column),
            2 => Some(Axis::Sheet),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Axis::Row => 0,
            Axis::Column => 1,
            Axis::Sheet => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::Row => "row",
            Axis::Column => "column",
            Axis::Sheet => "sheet",
        };
        f.write_str(name)
    }
}

/// Extent of a grid: number of rows, columns and sheets.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
    pub sheets: usize,
}

impl Shape {
    pub const fn new(rows: usize, cols: usize, sheets: usize) -> Shape {
        Shape { rows, cols, sheets }
    }

    pub fn get(&self, axis: Axis) -> usize {
        match axis {
            Axis::Row => self.rows,
            Axis::Column => self.cols,
            Axis::Sheet => self.sheets,
        }
    }

    pub fn with(&self, axis: Axis, value: usize) -> Shape {
        let mut shape = *self;
        match axis {
            Axis::Row => shape.rows = value,
            Axis::Column => shape.cols = value,
            Axis::Sheet => shape.sheets = value,
        }
        shape
    }

    /// Whether `key` lies inside the grid.
    pub fn contains(&self, key: Key) -> bool {
        key.row < self.rows && key.col < self.cols && key.sheet < self.sheets
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((rows, cols, sheets): (usize, usize, usize)) -> Self {
        Shape::new(rows, cols, sheets)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.rows, self.cols, self.sheets)
    }
}

/// One component of a (possibly ranged) coordinate.
///
/// Positions may be negative, counting back from the end of the axis. Ranges
/// follow slice semantics: `stop` is exclusive and a missing bound means the
/// edge of the axis in the direction of `step`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Index {
    At(i64),
    Range {
        start: Option<i64>,
        stop: Option<i64>,
        step: i64,
    },
}

impl Index {
    /// Every position along the axis.
    pub const fn all() -> Index {
        Index::Range {
            start: None,
            stop: None,
            step: 1,
        }
    }

    pub const fn range(start: i64, stop: i64) -> Index {
        Index::Range {
            start: Some(start),
            stop: Some(stop),
            step: 1,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Index::Range { .. })
    }

    /// Resolve a single position against an axis of length `len`.
    pub fn resolve(position: i64, len: usize) -> Option<usize> {
        let len = i64::try_from(len).ok()?;
        let resolved = if position < 0 { position + len } else { position };
        if (0..len).contains(&resolved) {
            usize::try_from(resolved).ok()
        } else {
            None
        }
    }

    /// All positions selected along an axis of length `len`.
    ///
    /// A single out-of-range position selects nothing. A zero step selects
    /// nothing as well; callers that care reject it up front.
    pub fn positions(&self, len: usize) -> Vec<usize> {
        match *self {
            Index::At(position) => Index::resolve(position, len).into_iter().collect(),
            Index::Range { start, stop, step } => slice_positions(start, stop, step, len),
        }
    }
}

impl From<usize> for Index {
    fn from(position: usize) -> Self {
        Index::At(i64::try_from(position).unwrap_or(i64::MAX))
    }
}

impl From<std::ops::Range<usize>> for Index {
    fn from(range: std::ops::Range<usize>) -> Self {
        Index::Range {
            start: i64::try_from(range.start).ok(),
            stop: i64::try_from(range.end).ok(),
            step: 1,
        }
    }
}

impl From<std::ops::RangeFull> for Index {
    fn from(_: std::ops::RangeFull) -> Self {
        Index::all()
    }
}

fn slice_positions(start: Option<i64>, stop: Option<i64>, step: i64, len: usize) -> Vec<usize> {
    if step == 0 {
        return Vec::new();
    }
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let clamp = |value: i64, low: i64, high: i64| value.max(low).min(high);
    let normalize = |value: i64| if value < 0 { value + len } else { value };

    let mut positions = Vec::new();
    if step > 0 {
        let begin = start.map_or(0, |s| clamp(normalize(s), 0, len));
        let end = stop.map_or(len, |s| clamp(normalize(s), 0, len));
        let mut next = Some(begin);
        while let Some(i) = next
            && i < end
        {
            positions.push(i as usize);
            next = i.checked_add(step);
        }
    } else {
        let begin = start.map_or(len - 1, |s| clamp(normalize(s), -1, len - 1));
        let end = stop.map_or(-1, |s| clamp(normalize(s), -1, len - 1));
        let mut next = Some(begin);
        while let Some(i) = next
            && i > end
        {
            positions.push(i as usize);
            next = i.checked_add(step);
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_axis_access() {
        let key = Key::new(4, 5, 6);
        assert_eq!(key.get(Axis::Row), 4);
        assert_eq!(key.get(Axis::Column), 5);
        assert_eq!(key.get(Axis::Sheet), 6);
        assert_eq!(key.with(Axis::Column, 9), Key::new(4, 9, 6));
    }

    #[test]
    fn test_axis_from_index_rejects_unknown() {
        assert_eq!(Axis::from_index(1), Some(Axis::Column));
        assert_eq!(Axis::from_index(3), None);
        assert_eq!(Axis::from_index(-1), None);
    }

    #[test]
    fn test_resolve_negative_positions() {
        assert_eq!(Index::resolve(-1, 10), Some(9));
        assert_eq!(Index::resolve(-10, 10), Some(0));
        assert_eq!(Index::resolve(-11, 10), None);
        assert_eq!(Index::resolve(10, 10), None);
    }

    #[test]
    fn test_range_positions_follow_slice_rules() {
        assert_eq!(Index::range(2, 5).positions(10), vec![2, 3, 4]);
        assert_eq!(Index::all().positions(3), vec![0, 1, 2]);
        assert_eq!(Index::range(-2, 100).positions(5), vec![3, 4]);
        let every_other = Index::Range {
            start: None,
            stop: None,
            step: 2,
        };
        assert_eq!(every_other.positions(5), vec![0, 2, 4]);
        let backwards = Index::Range {
            start: None,
            stop: None,
            step: -1,
        };
        assert_eq!(backwards.positions(3), vec![2, 1, 0]);
    }

    #[test]
    fn test_extreme_steps_stop_at_first_position() {
        let up = Index::Range {
            start: Some(5),
            stop: None,
            step: i64::MAX,
        };
        assert_eq!(up.positions(10), vec![5]);
        let down = Index::Range {
            start: Some(5),
            stop: None,
            step: i64::MIN,
        };
        assert_eq!(down.positions(10), vec![5]);
    }

    #[test]
    fn test_zero_step_selects_nothing() {
        let stalled = Index::Range {
            start: None,
            stop: None,
            step: 0,
        };
        assert!(stalled.positions(5).is_empty());
    }

    #[test]
    fn test_scan_order_puts_row_fastest() {
        let mut keys = vec![Key::new(0, 1, 0), Key::new(1, 0, 0), Key::new(0, 0, 1)];
        keys.sort_by_key(Key::scan_order);
        assert_eq!(
            keys,
            vec![Key::new(1, 0, 0), Key::new(0, 1, 0), Key::new(0, 0, 1)]
        );
    }
}
