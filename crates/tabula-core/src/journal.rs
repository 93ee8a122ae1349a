//! Undo journal.
//!
//! Every mutation of the grid model is reported to an [`UndoLog`] as one
//! [`Operation`] holding the state before and after the change. Applying an
//! operation's [`inverse`](Operation::inverse) reverts it. The log itself is
//! owned by the embedding application; [`History`] is a ready-made in-memory
//! implementation with grouped undo and redo.

use std::sync::{Arc, Mutex, PoisonError};

use tabula_engine::engine::{Key, Shape};
use tracing::debug;

use crate::array::DataArray;
use crate::attributes::AttributeRecord;
use crate::error::{Result, TabulaError};

/// A reversible primitive mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    Cell {
        key: Key,
        before: Option<String>,
        after: Option<String>,
    },
    /// Keyed by `(row, sheet)`.
    RowHeight {
        key: (usize, usize),
        before: Option<f64>,
        after: Option<f64>,
    },
    /// Keyed by `(col, sheet)`.
    ColWidth {
        key: (usize, usize),
        before: Option<f64>,
        after: Option<f64>,
    },
    /// `before == None` inserts a record at `index`, `after == None` removes
    /// it, otherwise the record is replaced.
    Attributes {
        index: usize,
        before: Option<AttributeRecord>,
        after: Option<AttributeRecord>,
    },
    Shape {
        before: Shape,
        after: Shape,
    },
    Macros {
        before: String,
        after: String,
    },
}

impl Operation {
    pub fn inverse(&self) -> Operation {
        match self.clone() {
            Operation::Cell { key, before, after } => Operation::Cell {
                key,
                before: after,
                after: before,
            },
            Operation::RowHeight { key, before, after } => Operation::RowHeight {
                key,
                before: after,
                after: before,
            },
            Operation::ColWidth { key, before, after } => Operation::ColWidth {
                key,
                before: after,
                after: before,
            },
            Operation::Attributes {
                index,
                before,
                after,
            } => Operation::Attributes {
                index,
                before: after,
                after: before,
            },
            Operation::Shape { before, after } => Operation::Shape {
                before: after,
                after: before,
            },
            Operation::Macros { before, after } => Operation::Macros {
                before: after,
                after: before,
            },
        }
    }
}

/// Receiver of recorded operations.
pub trait UndoLog: Send + Sync {
    fn record(&self, op: Operation);
}

pub type Journal = Arc<dyn UndoLog>;

/// Log that forgets everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLog;

impl UndoLog for NullLog {
    fn record(&self, _op: Operation) {}
}

pub fn null_journal() -> Journal {
    Arc::new(NullLog)
}

#[derive(Default)]
struct HistoryState {
    pending: Vec<Operation>,
    undo: Vec<Vec<Operation>>,
    redo: Vec<Vec<Operation>>,
    replaying: bool,
}

/// In-memory undo log.
///
/// Operations recorded between two [`commit`](History::commit) calls form
/// one undo step.
pub struct History {
    state: Mutex<HistoryState>,
    max_depth: usize,
}

impl History {
    pub fn new(max_depth: usize) -> Self {
        History {
            state: Mutex::new(HistoryState::default()),
            max_depth: max_depth.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HistoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the current step. Returns false when nothing was recorded.
    pub fn commit(&self) -> bool {
        let mut state = self.lock();
        if state.pending.is_empty() {
            return false;
        }
        let group = std::mem::take(&mut state.pending);
        state.undo.push(group);
        state.redo.clear();
        if state.undo.len() > self.max_depth {
            state.undo.remove(0);
        }
        true
    }

    pub fn can_undo(&self) -> bool {
        let state = self.lock();
        !state.undo.is_empty() || !state.pending.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.lock().redo.is_empty()
    }

    /// Revert the most recent step on `array`.
    pub fn undo(&self, array: &mut DataArray) -> Result<()> {
        self.commit();
        let group = {
            let mut state = self.lock();
            let group = state.undo.pop().ok_or(TabulaError::NothingToUndo)?;
            state.replaying = true;
            group
        };
        debug!(operations = group.len(), "undo");
        let outcome = group
            .iter()
            .rev()
            .try_for_each(|op| array.apply(&op.inverse()));
        let mut state = self.lock();
        state.replaying = false;
        state.redo.push(group);
        outcome
    }

    /// Re-apply the most recently undone step.
    pub fn redo(&self, array: &mut DataArray) -> Result<()> {
        let group = {
            let mut state = self.lock();
            let group = state.redo.pop().ok_or(TabulaError::NothingToRedo)?;
            state.replaying = true;
            group
        };
        debug!(operations = group.len(), "redo");
        let outcome = group.iter().try_for_each(|op| array.apply(op));
        let mut state = self.lock();
        state.replaying = false;
        state.undo.push(group);
        outcome
    }
}

impl UndoLog for History {
    fn record(&self, op: Operation) {
        let mut state = self.lock();
        if !state.replaying {
            state.pending.push(op);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Log that keeps every operation, for inspecting what a call recorded.
    #[derive(Default)]
    pub(crate) struct VecLog(pub Mutex<Vec<Operation>>);

    impl UndoLog for VecLog {
        fn record(&self, op: Operation) {
            self.0.lock().unwrap().push(op);
        }
    }

    fn history_array() -> (Arc<History>, DataArray) {
        let history = Arc::new(History::new(10));
        let journal: Journal = history.clone();
        let array = DataArray::with_journal(Shape::new(10, 10, 2), &Default::default(), journal);
        (history, array)
    }

    #[test]
    fn test_inverse_swaps_states() {
        let op = Operation::Cell {
            key: Key::new(1, 2, 0),
            before: None,
            after: Some("1".to_string()),
        };
        let inverse = op.inverse();
        assert_eq!(
            inverse,
            Operation::Cell {
                key: Key::new(1, 2, 0),
                before: Some("1".to_string()),
                after: None,
            }
        );
        assert_eq!(inverse.inverse(), op);
    }

    #[test]
    fn test_undo_and_redo_cell_edit() {
        let (history, mut array) = history_array();
        array.set(Key::new(0, 0, 0), "1").unwrap();
        history.commit();
        array.set(Key::new(0, 0, 0), "2").unwrap();
        history.commit();

        history.undo(&mut array).unwrap();
        assert_eq!(array.get(Key::new(0, 0, 0)).unwrap().as_deref(), Some("1"));
        history.undo(&mut array).unwrap();
        assert_eq!(array.get(Key::new(0, 0, 0)).unwrap(), None);
        assert!(matches!(
            history.undo(&mut array),
            Err(TabulaError::NothingToUndo)
        ));

        history.redo(&mut array).unwrap();
        history.redo(&mut array).unwrap();
        assert_eq!(array.get(Key::new(0, 0, 0)).unwrap().as_deref(), Some("2"));
        assert!(matches!(
            history.redo(&mut array),
            Err(TabulaError::NothingToRedo)
        ));
    }

    #[test]
    fn test_undo_structural_edit_as_one_step() {
        let (history, mut array) = history_array();
        array.set(Key::new(2, 0, 0), "a").unwrap();
        array.set(Key::new(9, 0, 0), "b").unwrap();
        history.commit();

        array.insert(1, 3, tabula_engine::engine::Axis::Row, None).unwrap();
        history.commit();
        assert_eq!(array.get(Key::new(5, 0, 0)).unwrap().as_deref(), Some("a"));
        assert_eq!(array.get(Key::new(9, 0, 0)).unwrap(), None);

        history.undo(&mut array).unwrap();
        assert_eq!(array.get(Key::new(2, 0, 0)).unwrap().as_deref(), Some("a"));
        assert_eq!(array.get(Key::new(9, 0, 0)).unwrap().as_deref(), Some("b"));
        assert_eq!(array.get(Key::new(5, 0, 0)).unwrap(), None);
    }

    #[test]
    fn test_new_edit_clears_redo() {
        let (history, mut array) = history_array();
        array.set(Key::new(0, 0, 0), "1").unwrap();
        history.commit();
        history.undo(&mut array).unwrap();
        assert!(history.can_redo());
        array.set(Key::new(1, 1, 0), "x").unwrap();
        history.commit();
        assert!(!history.can_redo());
    }

    #[test]
    fn test_depth_is_bounded() {
        let history = Arc::new(History::new(2));
        let journal: Journal = history.clone();
        let mut array = DataArray::with_journal(Shape::new(5, 5, 1), &Default::default(), journal);
        for i in 0..4 {
            array.set(Key::new(i, 0, 0), "v").unwrap();
            history.commit();
        }
        history.undo(&mut array).unwrap();
        history.undo(&mut array).unwrap();
        assert!(history.undo(&mut array).is_err());
        assert_eq!(array.get(Key::new(1, 0, 0)).unwrap().as_deref(), Some("v"));
    }
}
