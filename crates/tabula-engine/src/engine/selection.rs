//! Region descriptors for attribute records.
//!
//! A [`Selection`] is a union of rectangular blocks, full rows, full columns
//! and single cells on one sheet. Structural edits move selections with
//! [`Selection::shift`].

use serde::{Deserialize, Serialize};

use super::key::{Axis, Shape};

/// Inclusive rectangle of cells. Also used for merge areas, where
/// `(top, left)` is the anchor cell.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub top: usize,
    pub left: usize,
    pub bottom: usize,
    pub right: usize,
}

impl Block {
    /// Build a block from two corners in any order.
    pub fn new(top: usize, left: usize, bottom: usize, right: usize) -> Block {
        Block {
            top: top.min(bottom),
            left: left.min(right),
            bottom: top.max(bottom),
            right: left.max(right),
        }
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        (self.top..=self.bottom).contains(&row) && (self.left..=self.right).contains(&col)
    }

    pub fn anchor(&self) -> (usize, usize) {
        (self.top, self.left)
    }

    /// Move the block for an insertion (`count > 0`) or deletion
    /// (`count < 0`) at `point` along `axis`.
    ///
    /// Returns `None` when a deletion swallows the whole block. Sheet shifts
    /// leave blocks untouched.
    pub fn shifted(&self, point: usize, count: isize, axis: Axis) -> Option<Block> {
        let (low, high) = match axis {
            Axis::Row => (self.top, self.bottom),
            Axis::Column => (self.left, self.right),
            Axis::Sheet => return Some(*self),
        };
        let (low, high) = shift_span(low, high, point, count)?;
        let mut block = *self;
        match axis {
            Axis::Row => {
                block.top = low;
                block.bottom = high;
            }
            _ => {
                block.left = low;
                block.right = high;
            }
        }
        Some(block)
    }

    /// Clamp the block to the grid. Blocks entirely outside are dropped.
    pub fn clamped(&self, shape: Shape) -> Option<Block> {
        if shape.rows == 0 || shape.cols == 0 || self.top >= shape.rows || self.left >= shape.cols
        {
            return None;
        }
        Some(Block {
            top: self.top,
            left: self.left,
            bottom: self.bottom.min(shape.rows - 1),
            right: self.right.min(shape.cols - 1),
        })
    }
}

/// New position of a single index, or `None` if it was deleted.
pub fn shift_index(index: usize, point: usize, count: isize) -> Option<usize> {
    if index < point {
        return Some(index);
    }
    if count >= 0 {
        return index.checked_add(count.unsigned_abs());
    }
    let removed = count.unsigned_abs();
    if index < point.saturating_add(removed) {
        None
    } else {
        Some(index - removed)
    }
}

fn shift_span(low: usize, high: usize, point: usize, count: isize) -> Option<(usize, usize)> {
    if count >= 0 {
        let high = shift_index(high, point, count)?;
        let low = shift_index(low, point, count)?;
        return Some((low, high));
    }
    let end = point.saturating_add(count.unsigned_abs());
    if low >= point && high < end {
        return None;
    }
    let new_low = shift_index(low, point, count).unwrap_or(point);
    let new_high = match shift_index(high, point, count) {
        Some(high) => high,
        // low < point here, so point >= 1
        None => point - 1,
    };
    Some((new_low, new_high))
}

/// Union of blocks, full rows, full columns and single cells.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub blocks: Vec<Block>,
    pub rows: Vec<usize>,
    pub columns: Vec<usize>,
    pub cells: Vec<(usize, usize)>,
}

impl Selection {
    pub fn cell(row: usize, col: usize) -> Selection {
        Selection {
            cells: vec![(row, col)],
            ..Selection::default()
        }
    }

    pub fn block(top: usize, left: usize, bottom: usize, right: usize) -> Selection {
        Selection {
            blocks: vec![Block::new(top, left, bottom, right)],
            ..Selection::default()
        }
    }

    pub fn rows(rows: impl IntoIterator<Item = usize>) -> Selection {
        Selection {
            rows: rows.into_iter().collect(),
            ..Selection::default()
        }
    }

    pub fn columns(columns: impl IntoIterator<Item = usize>) -> Selection {
        Selection {
            columns: columns.into_iter().collect(),
            ..Selection::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.rows.is_empty() && self.columns.is_empty() && self.cells.is_empty()
    }

    /// Whether `(row, col)` lies inside the selection.
    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.rows.contains(&row)
            || self.columns.contains(&col)
            || self.cells.contains(&(row, col))
            || self.blocks.iter().any(|b| b.contains(row, col))
    }

    /// Smallest block covering the selection, with full rows and columns
    /// extending to the edges of `shape`.
    pub fn bounding_box(&self, shape: Shape) -> Option<Block> {
        let last_row = shape.rows.saturating_sub(1);
        let last_col = shape.cols.saturating_sub(1);

        let mut spans: Vec<Block> = self.blocks.clone();
        spans.extend(self.rows.iter().map(|&r| Block::new(r, 0, r, last_col)));
        spans.extend(self.columns.iter().map(|&c| Block::new(0, c, last_row, c)));
        spans.extend(self.cells.iter().map(|&(r, c)| Block::new(r, c, r, c)));

        spans.into_iter().reduce(|acc, b| Block {
            top: acc.top.min(b.top),
            left: acc.left.min(b.left),
            bottom: acc.bottom.max(b.bottom),
            right: acc.right.max(b.right),
        })
    }

    /// Shift for a structural edit at `point` along `axis`.
    ///
    /// Indices at or beyond `point` move by `count`. A negative `count`
    /// deletes `-count` indices starting at `point`: members inside that range
    /// are removed and blocks overlapping it shrink. Sheet edits do not touch
    /// selections.
    pub fn shift(&mut self, point: usize, count: isize, axis: Axis) {
        if count == 0 || axis == Axis::Sheet {
            return;
        }
        self.blocks = self
            .blocks
            .iter()
            .filter_map(|b| b.shifted(point, count, axis))
            .collect();
        self.cells = self
            .cells
            .iter()
            .filter_map(|&(row, col)| match axis {
                Axis::Row => shift_index(row, point, count).map(|row| (row, col)),
                _ => shift_index(col, point, count).map(|col| (row, col)),
            })
            .collect();
        let lines = match axis {
            Axis::Row => &mut self.rows,
            _ => &mut self.columns,
        };
        *lines = lines
            .iter()
            .filter_map(|&i| shift_index(i, point, count))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_all_region_kinds() {
        let selection = Selection {
            blocks: vec![Block::new(1, 1, 2, 2)],
            rows: vec![5],
            columns: vec![7],
            cells: vec![(9, 0)],
        };
        assert!(selection.contains(2, 1));
        assert!(selection.contains(5, 40));
        assert!(selection.contains(300, 7));
        assert!(selection.contains(9, 0));
        assert!(!selection.contains(0, 0));
        assert!(!selection.contains(3, 3));
    }

    #[test]
    fn test_block_corners_are_normalized() {
        let block = Block::new(4, 5, 1, 2);
        assert_eq!(block.anchor(), (1, 2));
        assert_eq!((block.bottom, block.right), (4, 5));
    }

    #[test]
    fn test_bounding_box_spans_full_rows() {
        let mut selection = Selection::cell(3, 4);
        selection.rows.push(6);
        let bbox = selection.bounding_box(Shape::new(10, 8, 1)).unwrap();
        assert_eq!(bbox, Block::new(3, 0, 6, 7));
        assert!(Selection::default().bounding_box(Shape::new(10, 8, 1)).is_none());
    }

    #[test]
    fn test_insert_moves_indices_at_or_beyond_point() {
        let mut selection = Selection::block(2, 0, 4, 1);
        selection.cells.push((1, 1));
        selection.rows.push(2);
        selection.shift(2, 3, Axis::Row);
        assert_eq!(selection.blocks, vec![Block::new(5, 0, 7, 1)]);
        assert_eq!(selection.cells, vec![(1, 1)]);
        assert_eq!(selection.rows, vec![5]);
    }

    #[test]
    fn test_insert_inside_block_grows_it() {
        let mut selection = Selection::block(0, 1, 0, 4);
        selection.shift(2, 2, Axis::Column);
        assert_eq!(selection.blocks, vec![Block::new(0, 1, 0, 6)]);
    }

    #[test]
    fn test_delete_removes_and_shrinks() {
        let mut selection = Selection::block(1, 0, 5, 0);
        selection.cells.push((3, 2));
        selection.rows.extend([2, 8]);
        selection.shift(2, -3, Axis::Row);
        assert_eq!(selection.blocks, vec![Block::new(1, 0, 2, 0)]);
        assert!(selection.cells.is_empty());
        assert_eq!(selection.rows, vec![5]);
    }

    #[test]
    fn test_delete_swallowing_block_drops_it() {
        let mut selection = Selection::block(2, 2, 3, 3);
        selection.shift(1, -4, Axis::Column);
        assert!(selection.is_empty());
    }

    #[test]
    fn test_sheet_shift_is_noop() {
        let mut selection = Selection::block(2, 2, 3, 3);
        selection.shift(0, 2, Axis::Sheet);
        assert_eq!(selection, Selection::block(2, 2, 3, 3));
    }

    #[test]
    fn test_insert_then_delete_restores_selection() {
        let original = Selection {
            blocks: vec![Block::new(1, 2, 6, 3)],
            rows: vec![0, 4],
            columns: vec![1],
            cells: vec![(7, 7)],
        };
        let mut selection = original.clone();
        selection.shift(3, 2, Axis::Row);
        selection.shift(3, -2, Axis::Row);
        assert_eq!(selection, original);
    }

    #[test]
    fn test_clamped_merge_area() {
        let shape = Shape::new(5, 5, 1);
        assert_eq!(
            Block::new(3, 3, 9, 4).clamped(shape),
            Some(Block::new(3, 3, 4, 4))
        );
        assert_eq!(Block::new(5, 0, 6, 1).clamped(shape), None);
    }
}
