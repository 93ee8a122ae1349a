//! Evaluated cell array.
//!
//! [`CodeArray`] wraps a [`DataArray`] and turns cell sources into values.
//! Results are memoized per cell; any write that can change what a cell
//! means clears the whole memo, since assignments in one cell can change
//! every other cell. Cells marked frozen keep their first result in a
//! separate cache that survives those clears.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use dashmap::DashMap;
use tabula_engine::engine::{
    AST, Axis, CellValue, Dynamic, Environment, EvalError, Evaluator, GridAccess, GridHandle,
    Index, Key, MacroOutput, RhaiEvaluator, Selection, Shape, SharedNamespace, truncate_display,
};
use tracing::{debug, trace};

use crate::array::DataArray;
use crate::attributes::{AttributeDiff, AttributeRecord, Attributes};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::journal::{History, Journal, null_journal};
use crate::snapshot::Snapshot;

/// Cross-cell reads nested deeper than this fail.
const MAX_NESTING: usize = 64;

pub const SAFE_MODE_MESSAGE: &str = "Safe mode activated. Code not executed.";

struct Model {
    me: Weak<Model>,
    data: RwLock<DataArray>,
    results: DashMap<Key, CellValue>,
    frozen: DashMap<Key, CellValue>,
    namespace: SharedNamespace,
    evaluator: Box<dyn Evaluator>,
    safe_mode: AtomicBool,
    /// Cells currently being evaluated, outermost first
    in_flight: Mutex<Vec<Key>>,
    config: EngineConfig,
}

struct InFlight<'a> {
    stack: &'a Mutex<Vec<Key>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
    }
}

impl Model {
    fn data(&self) -> RwLockReadGuard<'_, DataArray> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn data_mut(&self) -> RwLockWriteGuard<'_, DataArray> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn revision(&self) -> u64 {
        self.namespace
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .revision()
    }

    fn environment(&self, key: Key) -> Environment {
        let grid: Weak<dyn GridAccess> = self.me.clone();
        Environment {
            key,
            grid: GridHandle::new(grid, key.sheet),
            namespace: Arc::clone(&self.namespace),
        }
    }

    fn clear_results(&self) {
        if !self.results.is_empty() {
            debug!(cached = self.results.len(), "clearing result cache");
            self.results.clear();
        }
    }

    fn clear_frozen(&self) {
        if !self.frozen.is_empty() {
            debug!(cached = self.frozen.len(), "clearing frozen cache");
            self.frozen.clear();
        }
    }

    fn enter(&self, key: Key) -> InFlight<'_> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key);
        InFlight {
            stack: &self.in_flight,
        }
    }

    /// Evaluate `source` as the cell at `key` without touching the memo.
    fn evaluate(&self, key: Key, source: &str) -> CellValue {
        let revision = self.revision();
        let value = {
            let _in_flight = self.enter(key);
            CellValue::from(self.evaluator.evaluate(source, &self.environment(key)))
        };
        if self.revision() != revision {
            trace!(%key, "namespace changed");
            self.clear_results();
        }
        value
    }

    fn read(&self, key: Key) -> Result<Option<CellValue>> {
        let (code, frozen) = {
            let data = self.data();
            let code = data.get(key)?;
            (code, data.cell_attributes_at(key).is_frozen())
        };
        if self.safe_mode.load(Ordering::Relaxed) {
            return Ok(code.map(|code| CellValue::Value(Dynamic::from(code))));
        }

        let cache = if frozen { &self.frozen } else { &self.results };
        if let Some(hit) = cache.get(&key).map(|v| v.value().clone()) {
            return Ok(Some(hit));
        }
        let Some(code) = code else {
            return Ok(None);
        };
        let value = self.evaluate(key, &code);
        cache.insert(key, value.clone());
        Ok(Some(value))
    }
}

impl GridAccess for Model {
    fn value(&self, key: Key) -> std::result::Result<Option<CellValue>, EvalError> {
        {
            let stack = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if stack.contains(&key) {
                return Err(EvalError::circular(format!("Circular reference to cell {}", key)));
            }
            if stack.len() >= MAX_NESTING {
                return Err(EvalError::runtime(format!(
                    "Cell references nested deeper than {} levels",
                    MAX_NESTING
                )));
            }
        }
        self.read(key).map_err(|e| EvalError::runtime(e.to_string()))
    }

    fn code(&self, key: Key) -> Option<String> {
        self.data().get(key).ok().flatten()
    }

    fn shape(&self) -> Shape {
        self.data().shape()
    }
}

/// Grid of cell code with lazy, memoized evaluation.
///
/// Each instance owns its namespace; two arrays never see each other's
/// names.
pub struct CodeArray {
    model: Arc<Model>,
}

impl CodeArray {
    pub fn new(shape: Shape) -> Self {
        Self::with_config(shape, EngineConfig::default())
    }

    pub fn with_config(shape: Shape, config: EngineConfig) -> Self {
        Self::with_journal(shape, config, null_journal())
    }

    pub fn with_journal(shape: Shape, config: EngineConfig, journal: Journal) -> Self {
        let evaluator = Box::new(RhaiEvaluator::new(config.timeout()));
        Self::with_evaluator(shape, config, journal, evaluator)
    }

    /// Build an array that evaluates cells with `evaluator`.
    pub fn with_evaluator(
        shape: Shape,
        config: EngineConfig,
        journal: Journal,
        evaluator: Box<dyn Evaluator>,
    ) -> Self {
        let data = DataArray::with_journal(shape, &config, journal);
        let model = Arc::new_cyclic(|me| Model {
            me: me.clone(),
            data: RwLock::new(data),
            results: DashMap::new(),
            frozen: DashMap::new(),
            namespace: SharedNamespace::default(),
            evaluator,
            safe_mode: AtomicBool::new(false),
            in_flight: Mutex::new(Vec::new()),
            config,
        });
        CodeArray { model }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.model.config
    }

    /// Run `f` with read access to the underlying cell sources.
    ///
    /// The data lock is held while `f` runs, so `f` must not call back into
    /// this array's mutators, which would deadlock.
    pub fn with_data<R>(&self, f: impl FnOnce(&DataArray) -> R) -> R {
        f(&self.model.data())
    }

    pub fn shape(&self) -> Shape {
        self.model.data().shape()
    }

    pub fn get(&self, key: Key) -> Result<Option<String>> {
        self.model.data().get(key)
    }

    pub fn keys(&self) -> Vec<Key> {
        self.model.data().keys()
    }

    /// Write cell source.
    ///
    /// The memo is kept only when the write cannot change anything: the same
    /// text over a memoized cell, or an empty write over a cell without a memo.
    pub fn set(&self, key: Key, text: &str) -> Result<()> {
        let unchanged = {
            let data = self.model.data();
            let current = data.get(key)?;
            let memoized = self.model.results.contains_key(&key);
            (memoized && current.as_deref() == Some(text)) || (text.is_empty() && !memoized)
        };
        self.model.data_mut().set(key, text)?;
        if !unchanged {
            self.model.clear_results();
        }
        Ok(())
    }

    pub fn set_indexed(&self, index: [Index; 3], text: &str) -> Result<()> {
        self.model.data_mut().set_indexed(index, text)?;
        self.model.clear_results();
        Ok(())
    }

    pub fn remove(&self, key: Key) -> Option<String> {
        let removed = self.model.data_mut().remove(key);
        if removed.is_some() {
            self.model.clear_results();
        }
        removed
    }

    pub fn insert(&self, point: i64, count: i64, axis: Axis, sheet: Option<usize>) -> Result<()> {
        self.model.data_mut().insert(point, count, axis, sheet)?;
        self.model.clear_results();
        Ok(())
    }

    pub fn delete(&self, point: i64, count: i64, axis: Axis, sheet: Option<usize>) -> Result<()> {
        self.model.data_mut().delete(point, count, axis, sheet)?;
        self.model.clear_results();
        Ok(())
    }

    pub fn resize(&self, shape: Shape) -> Result<()> {
        self.model.data_mut().resize(shape)?;
        self.model.clear_results();
        Ok(())
    }

    pub fn row_height(&self, row: usize, sheet: usize) -> f64 {
        self.model.data().row_height(row, sheet)
    }

    pub fn col_width(&self, col: usize, sheet: usize) -> f64 {
        self.model.data().col_width(col, sheet)
    }

    pub fn set_row_height(&self, row: usize, sheet: usize, height: Option<f64>) -> Result<()> {
        self.model.data_mut().set_row_height(row, sheet, height)
    }

    pub fn set_col_width(&self, col: usize, sheet: usize, width: Option<f64>) -> Result<()> {
        self.model.data_mut().set_col_width(col, sheet, width)
    }

    pub fn last_filled_cell(&self, sheet: Option<usize>) -> (usize, usize) {
        self.model.data().last_filled_cell(sheet)
    }

    pub fn cell_attributes_at(&self, key: Key) -> Attributes {
        self.model.data().cell_attributes_at(key)
    }

    pub fn append_attribute(&self, selection: Selection, sheet: usize, diff: AttributeDiff) {
        self.model
            .data_mut()
            .append_attribute(selection, sheet, diff);
    }

    pub fn overwrite_attribute(
        &self,
        index: usize,
        record: AttributeRecord,
    ) -> Result<AttributeRecord> {
        self.model.data_mut().overwrite_attribute(index, record)
    }

    /// Current value of a cell, evaluating it if needed.
    ///
    /// Empty cells are `None`. In safe mode the source text is returned as a
    /// string value instead.
    pub fn read(&self, key: Key) -> Result<Option<CellValue>> {
        self.model.read(key)
    }

    /// Rendered value of a cell for display, cut to `max_result_length`.
    pub fn display(&self, key: Key) -> Result<Option<String>> {
        let max = self.model.config.max_result_length;
        Ok(self
            .read(key)?
            .map(|value| truncate_display(&value.render(), max)))
    }

    /// Evaluate `source` as if it were the code of the cell at `key`.
    ///
    /// Nothing is memoized, but assignments still bind their names.
    pub fn evaluate(&self, key: Key, source: &str) -> CellValue {
        self.model.evaluate(key, source)
    }

    pub fn macros(&self) -> String {
        self.model.data().macros().to_string()
    }

    pub fn set_macros(&self, macros: impl Into<String>) {
        self.model.data_mut().set_macros(macros);
    }

    /// Replace the macro text with the contents of `path`.
    pub fn load_macros(&self, path: &Path) -> Result<()> {
        let macros = std::fs::read_to_string(path)?;
        self.set_macros(macros);
        Ok(())
    }

    /// Run the stored macros against this array's namespace.
    ///
    /// Afterwards every cell is re-evaluated on its next read, frozen cells
    /// included.
    pub fn execute_macros(&self) -> MacroOutput {
        if self.safe_mode() {
            return MacroOutput {
                stdout: String::new(),
                stderr: SAFE_MODE_MESSAGE.to_string(),
            };
        }
        let macros = self.macros();
        debug!(bytes = macros.len(), "executing macros");
        let env = self.model.environment(Key::new(0, 0, 0));
        let output = self.model.evaluator.execute(&macros, &env);
        self.model.clear_results();
        self.model.clear_frozen();
        output
    }

    pub fn safe_mode(&self) -> bool {
        self.model.safe_mode.load(Ordering::Relaxed)
    }

    pub fn set_safe_mode(&self, safe_mode: bool) {
        self.model.safe_mode.store(safe_mode, Ordering::Relaxed);
    }

    /// Drop every name bound by assignments and macros.
    pub fn clear_globals(&self) {
        self.model
            .namespace
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.model.clear_results();
    }

    /// Names currently bound in the namespace, sorted.
    pub fn globals(&self) -> Vec<String> {
        self.model
            .namespace
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .names()
            .map(str::to_string)
            .collect()
    }

    pub fn global(&self, name: &str) -> Option<Dynamic> {
        self.model
            .namespace
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Script functions defined by the last macro run.
    pub fn functions(&self) -> Option<AST> {
        self.model
            .namespace
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .functions()
            .cloned()
    }

    pub fn undo(&self, history: &History) -> Result<()> {
        let outcome = history.undo(&mut self.model.data_mut());
        self.model.clear_results();
        self.model.clear_frozen();
        outcome
    }

    pub fn redo(&self, history: &History) -> Result<()> {
        let outcome = history.redo(&mut self.model.data_mut());
        self.model.clear_results();
        self.model.clear_frozen();
        outcome
    }

    pub fn snapshot(&self) -> Snapshot {
        self.model.data().snapshot()
    }

    /// Load `snapshot`, dropping all cached results.
    pub fn restore(&self, snapshot: Snapshot) {
        self.model.data_mut().restore(snapshot);
        self.model.clear_results();
        self.model.clear_frozen();
    }
}
