//! Sliceable cell array with structural edits.
//!
//! [`DataArray`] owns the cell sources, the attribute overlay, the row and
//! column size maps, the grid shape and the macro text. Rows and columns are
//! bounded by the shape: cells pushed past the last row or column by an
//! insertion are dropped. Sheets are not: inserting sheets grows the shape
//! and deleting them shrinks it.

use tabula_engine::engine::{Axis, Index, Key, Selection, Shape, shift_index};
use tracing::{debug, warn};

use crate::attributes::{AttributeDiff, AttributeRecord, Attributes, CellAttributes};
use crate::config::EngineConfig;
use crate::error::{Result, TabulaError};
use crate::journal::{Journal, Operation, null_journal};
use crate::snapshot::Snapshot;
use crate::store::KeyedStore;

type SizeMap = KeyedStore<(usize, usize), f64>;

fn record_cell(key: Key, before: Option<String>, after: Option<String>) -> Operation {
    Operation::Cell { key, before, after }
}

fn record_row_height(key: (usize, usize), before: Option<f64>, after: Option<f64>) -> Operation {
    Operation::RowHeight { key, before, after }
}

fn record_col_width(key: (usize, usize), before: Option<f64>, after: Option<f64>) -> Operation {
    Operation::ColWidth { key, before, after }
}

/// Result of [`DataArray::slice`].
///
/// A coordinate without ranges gives a single cell. Every ranged axis adds
/// one level of nesting, outermost axis first.
pub enum Slice<'a> {
    Cell(Option<String>),
    Cells(CellIter<'a>),
}

impl Slice<'_> {
    /// Flatten into cell contents in iteration order.
    pub fn flatten(self) -> Vec<Option<String>> {
        match self {
            Slice::Cell(cell) => vec![cell],
            Slice::Cells(iter) => iter.flat_map(Slice::flatten).collect(),
        }
    }
}

#[derive(Clone, Debug)]
enum Positions {
    One(usize),
    Many(Vec<usize>),
}

/// Lazy iterator over the outermost ranged axis of a slice.
pub struct CellIter<'a> {
    array: &'a DataArray,
    axes: [Positions; 3],
    axis: usize,
    next: usize,
}

impl<'a> Iterator for CellIter<'a> {
    type Item = Slice<'a>;

    fn next(&mut self) -> Option<Slice<'a>> {
        let Positions::Many(positions) = &self.axes[self.axis] else {
            return None;
        };
        let position = *positions.get(self.next)?;
        self.next += 1;
        let mut axes = self.axes.clone();
        axes[self.axis] = Positions::One(position);
        Some(self.array.slice_of(axes))
    }
}

/// Cell sources, attributes and sizes of a multi-sheet grid.
pub struct DataArray {
    shape: Shape,
    cells: KeyedStore<Key, String>,
    attributes: CellAttributes,
    /// Keyed by `(row, sheet)`
    row_heights: SizeMap,
    /// Keyed by `(col, sheet)`
    col_widths: SizeMap,
    macros: String,
    journal: Journal,
}

impl DataArray {
    pub fn new(shape: Shape) -> Self {
        Self::with_journal(shape, &EngineConfig::default(), null_journal())
    }

    pub fn with_journal(shape: Shape, config: &EngineConfig, journal: Journal) -> Self {
        let mut array = DataArray {
            shape,
            cells: KeyedStore::new(record_cell),
            attributes: CellAttributes::new(),
            row_heights: KeyedStore::with_default(record_row_height, config.default_row_height),
            col_widths: KeyedStore::with_default(record_col_width, config.default_col_width),
            macros: String::new(),
            journal: null_journal(),
        };
        array.set_journal(journal);
        array
    }

    /// Route every later mutation to `journal`.
    pub fn set_journal(&mut self, journal: Journal) {
        self.cells.set_journal(journal.clone());
        self.attributes.set_journal(journal.clone());
        self.row_heights.set_journal(journal.clone());
        self.col_widths.set_journal(journal.clone());
        self.journal = journal;
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    fn check_key(&self, key: Key) -> Result<()> {
        for axis in Axis::ALL {
            let bound = self.shape.get(axis);
            if key.get(axis) >= bound {
                return Err(TabulaError::out_of_range(axis, key.get(axis), bound));
            }
        }
        Ok(())
    }

    /// Source text of one cell. Never-written cells are `None`.
    pub fn get(&self, key: Key) -> Result<Option<String>> {
        self.check_key(key)?;
        Ok(self.cells.get(&key))
    }

    fn resolve(&self, index: [Index; 3]) -> Result<[Positions; 3]> {
        let mut axes = [
            Positions::One(0),
            Positions::One(0),
            Positions::One(0),
        ];
        for (axis, index) in Axis::ALL.into_iter().zip(index) {
            let len = self.shape.get(axis);
            axes[axis.index()] = match index {
                Index::At(position) => Positions::One(
                    Index::resolve(position, len)
                        .ok_or_else(|| TabulaError::out_of_range(axis, position, len))?,
                ),
                Index::Range { step: 0, .. } => {
                    return Err(TabulaError::InvalidArgument(
                        "slice step cannot be zero".to_string(),
                    ));
                }
                range => Positions::Many(range.positions(len)),
            };
        }
        Ok(axes)
    }

    fn slice_of(&self, axes: [Positions; 3]) -> Slice<'_> {
        match axes.iter().position(|p| matches!(p, Positions::Many(_))) {
            Some(axis) => Slice::Cells(CellIter {
                array: self,
                axes,
                axis,
                next: 0,
            }),
            None => {
                let [row, col, sheet] = axes.map(|p| match p {
                    Positions::One(i) => i,
                    Positions::Many(_) => 0,
                });
                Slice::Cell(self.cells.get(&Key::new(row, col, sheet)))
            }
        }
    }

    /// Read a coordinate that may mix single positions and ranges.
    ///
    /// Negative positions count from the end of the axis. A single position
    /// outside the grid is an error; ranges are clipped to it.
    pub fn slice(&self, index: [Index; 3]) -> Result<Slice<'_>> {
        let axes = self.resolve(index)?;
        Ok(self.slice_of(axes))
    }

    fn write_cell(&mut self, key: Key, text: &str) {
        if text.is_empty() {
            self.cells.remove(&key);
            return;
        }
        if let Some(anchor) = self.attributes.merging_cell(key)
            && anchor != key
        {
            warn!(%key, %anchor, "skipping write to merged cell");
            return;
        }
        self.cells.set(key, text.to_string());
    }

    /// Write the source of one cell. Empty text removes the cell.
    ///
    /// Non-empty writes to a cell merged into another anchor are skipped.
    pub fn set(&mut self, key: Key, text: &str) -> Result<()> {
        self.check_key(key)?;
        self.write_cell(key, text);
        Ok(())
    }

    /// Write `text` to every cell the coordinate selects.
    pub fn set_indexed(&mut self, index: [Index; 3], text: &str) -> Result<()> {
        let axes = self.resolve(index)?;
        let [rows, cols, sheets] = axes.map(|p| match p {
            Positions::One(i) => vec![i],
            Positions::Many(list) => list,
        });
        for &sheet in &sheets {
            for &row in &rows {
                for &col in &cols {
                    self.write_cell(Key::new(row, col, sheet), text);
                }
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: Key) -> Option<String> {
        self.cells.remove(&key)
    }

    /// Sorted coordinates of all stored cells.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys = self.cells.keys();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Map an integer axis number to an [`Axis`].
    pub fn parse_axis(axis: i64) -> Result<Axis> {
        Axis::from_index(axis).ok_or_else(|| {
            TabulaError::InvalidArgument(format!("Axis must be in [0, 1, 2], got {}", axis))
        })
    }

    fn check_count(count: i64) -> Result<isize> {
        if count < 0 {
            return Err(TabulaError::InvalidArgument(format!(
                "Count must be non-negative, got {}",
                count
            )));
        }
        isize::try_from(count)
            .map_err(|_| TabulaError::InvalidArgument(format!("Count {} is too large", count)))
    }

    fn check_sheet_filter(&self, sheet: Option<usize>) -> Result<()> {
        match sheet {
            Some(s) if s >= self.shape.sheets => {
                Err(TabulaError::out_of_range(Axis::Sheet, s, self.shape.sheets))
            }
            _ => Ok(()),
        }
    }

    /// Insert `count` empty rows, columns or sheets before `point`.
    ///
    /// `point` may be negative and is then counted from the end of the axis.
    /// For rows and columns `sheet` limits the edit to one sheet; cells pushed
    /// past the last row or column are dropped. Sheet insertion grows the
    /// shape.
    pub fn insert(&mut self, point: i64, count: i64, axis: Axis, sheet: Option<usize>) -> Result<()> {
        let count = Self::check_count(count)?;
        let len = self.shape.get(axis);
        let point = resolve_point(point, len, true)
            .ok_or_else(|| TabulaError::out_of_range(axis, point, len))?;
        self.check_sheet_filter(sheet)?;
        if count == 0 {
            return Ok(());
        }

        debug!(%axis, point, count, ?sheet, "insert");
        if axis == Axis::Sheet {
            self.set_shape(self.shape.with(Axis::Sheet, len + count.unsigned_abs()));
        }
        self.shift(point, count, axis, sheet);
        Ok(())
    }

    /// Delete `count` rows, columns or sheets starting at `point`.
    ///
    /// Deleting the whole axis is refused. Sheet deletion shrinks the shape.
    pub fn delete(&mut self, point: i64, count: i64, axis: Axis, sheet: Option<usize>) -> Result<()> {
        let count = Self::check_count(count)?;
        let len = self.shape.get(axis);
        if count.unsigned_abs() >= len {
            return Err(TabulaError::InvalidArgument(format!(
                "Last {} must not be deleted.",
                axis
            )));
        }
        let point = resolve_point(point, len, false)
            .ok_or_else(|| TabulaError::out_of_range(axis, point, len))?;
        self.check_sheet_filter(sheet)?;
        if count == 0 {
            return Ok(());
        }

        debug!(%axis, point, count, ?sheet, "delete");
        self.shift(point, -count, axis, sheet);
        if axis == Axis::Sheet {
            let removed = count.unsigned_abs().min(len - point);
            self.set_shape(self.shape.with(Axis::Sheet, len - removed));
        }
        Ok(())
    }

    fn shift(&mut self, point: usize, count: isize, axis: Axis, sheet: Option<usize>) {
        self.shift_cells(point, count, axis, sheet);
        match axis {
            Axis::Row => shift_sizes(&self.row_heights, point, count, axis, sheet, self.shape.rows),
            Axis::Column => {
                shift_sizes(&self.col_widths, point, count, axis, sheet, self.shape.cols)
            }
            Axis::Sheet => {
                shift_sizes(&self.row_heights, point, count, axis, None, 0);
                shift_sizes(&self.col_widths, point, count, axis, None, 0);
            }
        }
        self.attributes.shift(point, count, axis, sheet, self.shape);
    }

    fn shift_cells(&mut self, point: usize, count: isize, axis: Axis, sheet: Option<usize>) {
        let bound = self.shape.get(axis);
        let mut moved: Vec<(Key, String)> = self
            .cells
            .entries()
            .into_iter()
            .filter(|(key, _)| {
                key.get(axis) >= point
                    && (axis == Axis::Sheet || sheet.is_none_or(|s| s == key.sheet))
            })
            .collect();
        moved.sort_by_key(|(key, _)| *key);

        for (key, _) in &moved {
            self.cells.remove(key);
        }
        let mut dropped = 0usize;
        for (key, text) in moved {
            match shift_index(key.get(axis), point, count) {
                Some(i) if axis == Axis::Sheet || i < bound => {
                    self.cells.set(key.with(axis, i), text);
                }
                Some(_) => dropped += 1,
                None => {}
            }
        }
        if dropped > 0 {
            warn!(dropped, %axis, "cells shifted out of the grid were dropped");
        }
    }

    /// Change the grid shape, removing every cell outside the new bounds.
    pub fn resize(&mut self, shape: Shape) -> Result<()> {
        if shape.rows == 0 || shape.cols == 0 || shape.sheets == 0 {
            return Err(TabulaError::InvalidArgument(format!(
                "Shape must be at least 1 along every axis, got {}",
                shape
            )));
        }
        if shape == self.shape {
            return Ok(());
        }

        debug!(from = %self.shape, to = %shape, "resize");
        for key in self.keys() {
            if !shape.contains(key) {
                self.cells.remove(&key);
            }
        }
        for (sizes, bound) in [(&self.row_heights, shape.rows), (&self.col_widths, shape.cols)] {
            let mut outside: Vec<(usize, usize)> = sizes
                .keys()
                .into_iter()
                .filter(|&(index, sheet)| index >= bound || sheet >= shape.sheets)
                .collect();
            outside.sort();
            for key in outside {
                sizes.remove(&key);
            }
        }
        self.set_shape(shape);
        self.attributes.clamp_merges(shape);
        Ok(())
    }

    fn set_shape(&mut self, shape: Shape) {
        let before = std::mem::replace(&mut self.shape, shape);
        self.journal.record(Operation::Shape {
            before,
            after: shape,
        });
    }

    pub fn row_height(&self, row: usize, sheet: usize) -> f64 {
        self.row_heights.get_or_default(&(row, sheet))
    }

    pub fn col_width(&self, col: usize, sheet: usize) -> f64 {
        self.col_widths.get_or_default(&(col, sheet))
    }

    /// Set a row height. `None` restores the default.
    pub fn set_row_height(&mut self, row: usize, sheet: usize, height: Option<f64>) -> Result<()> {
        self.check_key(Key::new(row, 0, sheet))?;
        set_size(&self.row_heights, (row, sheet), height);
        Ok(())
    }

    /// Set a column width. `None` restores the default.
    pub fn set_col_width(&mut self, col: usize, sheet: usize, width: Option<f64>) -> Result<()> {
        self.check_key(Key::new(0, col, sheet))?;
        set_size(&self.col_widths, (col, sheet), width);
        Ok(())
    }

    /// Largest filled row and column, on one sheet or on all of them.
    ///
    /// The two maxima are taken independently. An empty grid gives `(0, 0)`.
    pub fn last_filled_cell(&self, sheet: Option<usize>) -> (usize, usize) {
        self.cells
            .keys()
            .into_iter()
            .filter(|key| sheet.is_none_or(|s| s == key.sheet))
            .fold((0, 0), |(row, col), key| (row.max(key.row), col.max(key.col)))
    }

    pub fn macros(&self) -> &str {
        &self.macros
    }

    pub fn set_macros(&mut self, macros: impl Into<String>) {
        let after = macros.into();
        let before = std::mem::replace(&mut self.macros, after.clone());
        if before != after {
            self.journal.record(Operation::Macros { before, after });
        }
    }

    pub fn attributes(&self) -> &CellAttributes {
        &self.attributes
    }

    pub fn cell_attributes_at(&self, key: Key) -> Attributes {
        self.attributes.effective(key)
    }

    pub fn append_attribute(&mut self, selection: Selection, sheet: usize, diff: AttributeDiff) {
        self.attributes
            .append(AttributeRecord::new(selection, sheet, diff));
    }

    pub fn overwrite_attribute(
        &mut self,
        index: usize,
        record: AttributeRecord,
    ) -> Result<AttributeRecord> {
        self.attributes.overwrite(index, record)
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut cells = self.cells.entries();
        cells.sort_by_key(|(key, _)| *key);
        let mut row_heights = self.row_heights.entries();
        row_heights.sort_by_key(|(key, _)| *key);
        let mut col_widths = self.col_widths.entries();
        col_widths.sort_by_key(|(key, _)| *key);
        Snapshot {
            shape: self.shape,
            cells,
            attributes: self.attributes.records().to_vec(),
            row_heights,
            col_widths,
            macros: self.macros.clone(),
        }
    }

    /// Replace the whole state with `snapshot`. Nothing is recorded.
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.shape = snapshot.shape;
        self.cells.replace_all(snapshot.cells);
        self.attributes.replace_all(snapshot.attributes);
        self.row_heights.replace_all(snapshot.row_heights);
        self.col_widths.replace_all(snapshot.col_widths);
        self.macros = snapshot.macros;
    }

    /// Perform one recorded primitive. Used to replay undo and redo.
    pub fn apply(&mut self, op: &Operation) -> Result<()> {
        match op {
            Operation::Cell { key, after, .. } => {
                match after {
                    Some(text) => self.cells.set(*key, text.clone()),
                    None => self.cells.remove(key),
                };
            }
            Operation::RowHeight { key, after, .. } => set_size(&self.row_heights, *key, *after),
            Operation::ColWidth { key, after, .. } => set_size(&self.col_widths, *key, *after),
            Operation::Attributes {
                index,
                before,
                after,
            } => match (before, after) {
                (None, Some(record)) => self.attributes.insert_at(*index, record.clone()),
                (Some(_), Some(record)) => {
                    self.attributes.overwrite(*index, record.clone())?;
                }
                (Some(_), None) => {
                    self.attributes.remove(*index)?;
                }
                (None, None) => {}
            },
            Operation::Shape { after, .. } => self.set_shape(*after),
            Operation::Macros { after, .. } => self.set_macros(after.clone()),
        }
        Ok(())
    }
}

/// Resolve an insertion or deletion point against an axis of length `len`.
///
/// Insertion accepts `[-len, len]`, deletion `(-len, len]`.
fn resolve_point(point: i64, len: usize, inclusive_start: bool) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let in_range = if inclusive_start {
        (-len..=len).contains(&point)
    } else {
        -len < point && point <= len
    };
    if !in_range {
        return None;
    }
    usize::try_from(if point < 0 { point + len } else { point }).ok()
}

fn set_size(sizes: &SizeMap, key: (usize, usize), size: Option<f64>) {
    match size {
        Some(size) => {
            sizes.set(key, size);
        }
        None => {
            sizes.remove(&key);
        }
    }
}

/// Shift size-map entries. Row and column shifts move the index and drop
/// entries past `bound`; sheet shifts move the sheet.
fn shift_sizes(
    sizes: &SizeMap,
    point: usize,
    count: isize,
    axis: Axis,
    sheet: Option<usize>,
    bound: usize,
) {
    let on_sheets = axis == Axis::Sheet;
    let mut moved: Vec<((usize, usize), f64)> = sizes
        .entries()
        .into_iter()
        .filter(|&((index, s), _)| {
            if on_sheets {
                s >= point
            } else {
                index >= point && sheet.is_none_or(|f| f == s)
            }
        })
        .collect();
    moved.sort_by_key(|(key, _)| *key);

    for (key, _) in &moved {
        sizes.remove(key);
    }
    for ((index, s), size) in moved {
        if on_sheets {
            if let Some(s) = shift_index(s, point, count) {
                sizes.set((index, s), size);
            }
        } else if let Some(index) = shift_index(index, point, count).filter(|&i| i < bound) {
            sizes.set((index, s), size);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;
    use crate::attributes::{AttributeValue, MERGE_AREA, diff};
    use tabula_engine::engine::Block;

    fn array() -> DataArray {
        DataArray::new(Shape::new(10, 5, 3))
    }

    #[test]
    fn test_unwritten_cells_are_empty() {
        let array = array();
        assert_eq!(array.get(Key::new(9, 4, 2)).unwrap(), None);
        assert!(array.is_empty());
    }

    #[test]
    fn test_out_of_range_get() {
        let array = array();
        let err = array.get(Key::new(10, 0, 0)).unwrap_err();
        assert!(matches!(
            err,
            TabulaError::OutOfRange {
                axis: Axis::Row,
                index: 10,
                bound: 10
            }
        ));
        assert!(array.get(Key::new(0, 0, 3)).is_err());
    }

    #[test]
    fn test_set_get_and_clear() {
        let mut array = array();
        let key = Key::new(1, 2, 0);
        array.set(key, "1 + 1").unwrap();
        assert_eq!(array.get(key).unwrap().as_deref(), Some("1 + 1"));
        array.set(key, "").unwrap();
        assert_eq!(array.get(key).unwrap(), None);
        assert!(array.keys().is_empty());
    }

    #[test]
    fn test_slice_single_cell_and_negative_index() {
        let mut array = array();
        array.set(Key::new(9, 4, 2), "last").unwrap();
        let Slice::Cell(cell) = array.slice([Index::At(-1), Index::At(-1), Index::At(-1)]).unwrap()
        else {
            panic!("expected a single cell");
        };
        assert_eq!(cell.as_deref(), Some("last"));
        assert!(array.slice([Index::At(10), Index::At(0), Index::At(0)]).is_err());
    }

    #[test]
    fn test_slice_nests_per_ranged_axis() {
        let mut array = array();
        array.set(Key::new(0, 0, 0), "a").unwrap();
        array.set(Key::new(1, 1, 0), "b").unwrap();

        let Slice::Cells(rows) = array.slice([Index::range(0, 2), Index::range(0, 2), Index::At(0)]).unwrap()
        else {
            panic!("expected nested cells");
        };
        let grid: Vec<Vec<Option<String>>> = rows
            .map(|row| match row {
                Slice::Cells(cols) => cols.flat_map(Slice::flatten).collect(),
                Slice::Cell(_) => panic!("expected a row"),
            })
            .collect();
        assert_eq!(
            grid,
            vec![
                vec![Some("a".to_string()), None],
                vec![None, Some("b".to_string())],
            ]
        );
    }

    #[test]
    fn test_slice_is_restartable_by_slicing_again() {
        let mut array = array();
        array.set(Key::new(3, 0, 0), "x").unwrap();
        let index = [Index::all(), Index::At(0), Index::At(0)];
        let first = array.slice(index).unwrap().flatten();
        let second = array.slice(index).unwrap().flatten();
        assert_eq!(first.len(), 10);
        assert_eq!(first, second);
        assert!(
            array
                .slice([Index::Range { start: None, stop: None, step: 0 }, Index::At(0), Index::At(0)])
                .is_err()
        );
    }

    #[test]
    fn test_set_indexed_writes_product() {
        let mut array = array();
        array
            .set_indexed([Index::range(0, 2), Index::range(1, 3), Index::At(1)], "v")
            .unwrap();
        assert_eq!(
            array.keys(),
            vec![
                Key::new(0, 1, 1),
                Key::new(0, 2, 1),
                Key::new(1, 1, 1),
                Key::new(1, 2, 1),
            ]
        );
        array
            .set_indexed([Index::At(0), Index::all(), Index::At(1)], "")
            .unwrap();
        assert_eq!(array.len(), 2);
    }

    #[test]
    fn test_merged_cells_reject_writes() {
        let mut array = array();
        array.append_attribute(
            Selection::block(0, 0, 1, 1),
            0,
            diff([(MERGE_AREA, Block::new(0, 0, 1, 1).into())]),
        );
        array.set(Key::new(1, 1, 0), "hidden").unwrap();
        assert_eq!(array.get(Key::new(1, 1, 0)).unwrap(), None);
        array.set(Key::new(0, 0, 0), "anchor").unwrap();
        assert_eq!(array.get(Key::new(0, 0, 0)).unwrap().as_deref(), Some("anchor"));
    }

    #[test]
    fn test_insert_rows_drops_overflow() {
        let mut array = array();
        array.set(Key::new(0, 0, 0), "stay").unwrap();
        array.set(Key::new(5, 0, 0), "move").unwrap();
        array.set(Key::new(8, 0, 0), "gone").unwrap();
        array.set(Key::new(5, 0, 1), "other sheet").unwrap();

        array.insert(2, 3, Axis::Row, Some(0)).unwrap();
        assert_eq!(array.get(Key::new(0, 0, 0)).unwrap().as_deref(), Some("stay"));
        assert_eq!(array.get(Key::new(8, 0, 0)).unwrap().as_deref(), Some("move"));
        assert_eq!(array.get(Key::new(5, 0, 1)).unwrap().as_deref(), Some("other sheet"));
        assert_eq!(array.len(), 3);
        assert_eq!(array.shape(), Shape::new(10, 5, 3));
    }

    #[test]
    fn test_insert_at_point_moves_that_index() {
        let mut array = array();
        array.set(Key::new(2, 0, 0), "at").unwrap();
        array.insert(2, 1, Axis::Row, None).unwrap();
        assert_eq!(array.get(Key::new(3, 0, 0)).unwrap().as_deref(), Some("at"));
    }

    #[test]
    fn test_insert_sheets_grows_shape() {
        let mut array = array();
        array.set(Key::new(0, 0, 2), "last sheet").unwrap();
        array.set_col_width(1, 2, Some(120.0)).unwrap();
        array.insert(1, 2, Axis::Sheet, None).unwrap();
        assert_eq!(array.shape(), Shape::new(10, 5, 5));
        assert_eq!(array.get(Key::new(0, 0, 4)).unwrap().as_deref(), Some("last sheet"));
        assert_eq!(array.col_width(1, 4), 120.0);
        assert_eq!(array.col_width(1, 2), 75.0);
    }

    #[test]
    fn test_delete_rows_and_sheets() {
        let mut array = array();
        array.set(Key::new(1, 0, 0), "deleted").unwrap();
        array.set(Key::new(4, 0, 0), "shifted").unwrap();
        array.set(Key::new(0, 0, 2), "sheet two").unwrap();

        array.delete(1, 2, Axis::Row, None).unwrap();
        assert_eq!(array.get(Key::new(2, 0, 0)).unwrap().as_deref(), Some("shifted"));
        assert_eq!(array.len(), 2);

        array.delete(0, 2, Axis::Sheet, None).unwrap();
        assert_eq!(array.shape().sheets, 1);
        assert_eq!(array.get(Key::new(0, 0, 0)).unwrap().as_deref(), Some("sheet two"));
        assert_eq!(array.len(), 1);
    }

    #[test]
    fn test_structural_edit_validation() {
        let mut array = array();
        array.set(Key::new(0, 0, 0), "keep").unwrap();
        assert!(matches!(
            array.delete(0, 10, Axis::Row, None),
            Err(TabulaError::InvalidArgument(_))
        ));
        assert!(matches!(
            array.delete(0, -1, Axis::Row, None),
            Err(TabulaError::InvalidArgument(_))
        ));
        assert!(matches!(
            array.insert(11, 1, Axis::Row, None),
            Err(TabulaError::OutOfRange { .. })
        ));
        assert!(matches!(
            array.insert(-11, 1, Axis::Row, None),
            Err(TabulaError::OutOfRange { .. })
        ));
        assert!(matches!(
            DataArray::parse_axis(3),
            Err(TabulaError::InvalidArgument(_))
        ));
        assert_eq!(DataArray::parse_axis(1).unwrap(), Axis::Column);
        assert_eq!(array.get(Key::new(0, 0, 0)).unwrap().as_deref(), Some("keep"));
    }

    #[test]
    fn test_negative_insertion_point() {
        let mut array = array();
        array.set(Key::new(0, 4, 0), "last col").unwrap();
        array.insert(-1, 1, Axis::Column, None).unwrap();
        assert_eq!(array.get(Key::new(0, 4, 0)).unwrap(), None);
        assert!(array.is_empty());
    }

    #[test]
    fn test_structural_edits_move_sizes_and_attributes() {
        let mut array = array();
        array.set_row_height(3, 0, Some(40.0)).unwrap();
        array.append_attribute(Selection::rows([3]), 0, diff([("bgcolor", AttributeValue::Color(0xFF0000))]));

        array.insert(0, 2, Axis::Row, None).unwrap();
        assert_eq!(array.row_height(5, 0), 40.0);
        assert_eq!(array.row_height(3, 0), 26.0);
        assert_eq!(
            array.cell_attributes_at(Key::new(5, 2, 0)).get("bgcolor"),
            Some(&AttributeValue::Color(0xFF0000))
        );

        array.delete(0, 2, Axis::Row, None).unwrap();
        assert_eq!(array.row_height(3, 0), 40.0);
        assert_eq!(array.attributes().records()[0].selection, Selection::rows([3]));
    }

    #[test]
    fn test_resize_clamps_merge_areas() {
        let mut array = array();
        array.append_attribute(
            Selection::block(6, 0, 9, 1),
            0,
            diff([(MERGE_AREA, Block::new(6, 0, 9, 1).into())]),
        );
        array.resize(Shape::new(8, 5, 3)).unwrap();
        assert_eq!(
            array.attributes().records()[0].diff.get(MERGE_AREA),
            Some(&AttributeValue::MergeArea(Block::new(6, 0, 7, 1)))
        );
        array.resize(Shape::new(5, 5, 3)).unwrap();
        assert_eq!(array.attributes().records()[0].diff.get(MERGE_AREA), None);
        assert!(array.resize(Shape::new(0, 5, 3)).is_err());
    }

    #[test]
    fn test_last_filled_cell() {
        let mut array = array();
        assert_eq!(array.last_filled_cell(None), (0, 0));
        array.set(Key::new(7, 1, 0), "a").unwrap();
        array.set(Key::new(2, 3, 1), "b").unwrap();
        assert_eq!(array.last_filled_cell(None), (7, 3));
        assert_eq!(array.last_filled_cell(Some(1)), (2, 3));
        assert_eq!(array.last_filled_cell(Some(2)), (0, 0));
    }

    #[test]
    fn test_snapshot_restore() {
        let mut array = array();
        array.set(Key::new(1, 1, 1), "x = 3").unwrap();
        array.set_col_width(2, 0, Some(10.0)).unwrap();
        array.append_attribute(Selection::cell(1, 1), 1, diff([("locked", true.into())]));
        array.set_macros("fn double(x) { x * 2 }");
        let snapshot = array.snapshot();

        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: Snapshot = serde_json::from_str(&json).unwrap();

        let mut copy = DataArray::new(Shape::new(1, 1, 1));
        copy.restore(decoded);
        assert_eq!(copy.snapshot(), snapshot);
        assert_eq!(copy.shape(), Shape::new(10, 5, 3));
        assert_eq!(copy.col_width(2, 0), 10.0);
        assert_eq!(copy.macros(), "fn double(x) { x * 2 }");
    }

    fn cell_map(array: &DataArray) -> BTreeMap<Key, String> {
        array.snapshot().cells.into_iter().collect()
    }

    proptest! {
        #[test]
        fn insert_then_delete_is_identity(
            cells in prop::collection::btree_map((0usize..10, 0usize..10, 0usize..2), "[a-z0-9]{1,4}", 0..20),
            heights in prop::collection::btree_map((0usize..10, 0usize..2), 1.0f64..100.0, 0..5),
            block in (0usize..10, 0usize..10, 0usize..10, 0usize..10),
            point in 0i64..10,
            count in 1i64..5,
            axis in 0i64..3,
        ) {
            let axis = DataArray::parse_axis(axis).unwrap();
            let mut array = DataArray::new(Shape::new(30, 30, 2));
            for (&(r, c, s), text) in &cells {
                array.set(Key::new(r, c, s), text).unwrap();
            }
            for (&(r, s), &h) in &heights {
                array.set_row_height(r, s, Some(h)).unwrap();
            }
            array.append_attribute(
                Selection::block(block.0, block.1, block.2, block.3),
                0,
                diff([("underline", true.into())]),
            );
            let before = array.snapshot();

            let point = point.min(i64::try_from(array.shape().get(axis)).unwrap());
            array.insert(point, count, axis, None).unwrap();
            array.delete(point, count, axis, None).unwrap();

            prop_assert_eq!(array.snapshot(), before);
        }

        #[test]
        fn resize_only_drops_outside_cells(
            cells in prop::collection::btree_map((0usize..20, 0usize..20, 0usize..3), "[a-z]{1,3}", 0..40),
            rows in 1usize..20,
            cols in 1usize..20,
            sheets in 1usize..3,
        ) {
            let mut array = DataArray::new(Shape::new(20, 20, 3));
            for (&(r, c, s), text) in &cells {
                array.set(Key::new(r, c, s), text).unwrap();
            }
            let shape = Shape::new(rows, cols, sheets);
            array.resize(shape).unwrap();

            let expected: BTreeMap<Key, String> = cells
                .iter()
                .map(|(&(r, c, s), text)| (Key::new(r, c, s), text.clone()))
                .filter(|(key, _)| shape.contains(*key))
                .collect();
            prop_assert_eq!(cell_map(&array), expected);
        }
    }
}
