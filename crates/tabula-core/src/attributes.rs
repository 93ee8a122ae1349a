//! Cell attribute overlay.
//!
//! Formatting and behaviour flags are stored as an ordered list of
//! [`AttributeRecord`]s. Each record applies a partial [`AttributeDiff`] to
//! every cell its selection covers on one sheet; later records win. The
//! effective attributes of a cell are the defaults with every matching diff
//! folded over them in list order.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tabula_engine::engine::{Axis, Block, Key, Selection, Shape, shift_index};
use tracing::debug;

use crate::error::{Result, TabulaError};
use crate::journal::{Journal, Operation, null_journal};

pub const MERGE_AREA: &str = "merge_area";
pub const FROZEN: &str = "frozen";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Packed `0xRRGGBB`
    Color(u32),
    MergeArea(Block),
    None,
}

impl AttributeValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<Block> {
        match self {
            AttributeValue::MergeArea(block) => Some(*block),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        AttributeValue::Int(n)
    }
}

impl From<f64> for AttributeValue {
    fn from(n: f64) -> Self {
        AttributeValue::Float(n)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

impl From<Block> for AttributeValue {
    fn from(block: Block) -> Self {
        AttributeValue::MergeArea(block)
    }
}

/// Partial attribute map, keyed by attribute name.
pub type AttributeDiff = BTreeMap<String, AttributeValue>;

/// Build a diff from `(name, value)` pairs.
pub fn diff<const N: usize>(pairs: [(&str, AttributeValue); N]) -> AttributeDiff {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Fully resolved attributes of one cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Attributes {
    values: AttributeDiff,
}

impl Default for Attributes {
    fn default() -> Self {
        use AttributeValue::*;
        let values = diff([
            ("borderwidth_bottom", Int(1)),
            ("borderwidth_right", Int(1)),
            ("bordercolor_bottom", Color(0x80_80_80)),
            ("bordercolor_right", Color(0x80_80_80)),
            ("bgcolor", Color(0xFF_FF_FF)),
            ("textfont", Text("Sans Serif".to_string())),
            ("pointsize", Int(10)),
            ("fontweight", Text("normal".to_string())),
            ("fontstyle", Text("normal".to_string())),
            ("textcolor", Color(0x00_00_00)),
            ("underline", Bool(false)),
            ("strikethrough", Bool(false)),
            ("locked", Bool(false)),
            ("angle", Float(0.0)),
            ("column_width", Int(75)),
            ("row_height", Int(26)),
            ("vertical_align", Text("top".to_string())),
            ("justification", Text("left".to_string())),
            (FROZEN, Bool(false)),
            (MERGE_AREA, None),
            ("markup", Bool(false)),
            ("button_cell", Bool(false)),
            ("panel_cell", Bool(false)),
        ]);
        Attributes { values }
    }
}

impl Attributes {
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_frozen(&self) -> bool {
        self.get(FROZEN).and_then(AttributeValue::as_bool).unwrap_or(false)
    }

    pub fn merge_area(&self) -> Option<Block> {
        self.get(MERGE_AREA).and_then(AttributeValue::as_block)
    }

    fn apply(&mut self, diff: &AttributeDiff) {
        self.values
            .extend(diff.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// One overlay entry: `diff` applies to `selection` on `sheet`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub selection: Selection,
    pub sheet: usize,
    pub diff: AttributeDiff,
}

impl AttributeRecord {
    pub fn new(selection: Selection, sheet: usize, diff: AttributeDiff) -> Self {
        AttributeRecord {
            selection,
            sheet,
            diff,
        }
    }
}

#[derive(Default)]
struct AttributeCache {
    version: u64,
    cells: HashMap<Key, Attributes>,
    /// Record indices grouped by sheet
    sheets: HashMap<usize, Vec<usize>>,
    indexed: usize,
}

/// Ordered, append-only list of attribute records.
pub struct CellAttributes {
    records: Vec<AttributeRecord>,
    version: u64,
    cache: Mutex<AttributeCache>,
    journal: Journal,
}

impl Default for CellAttributes {
    fn default() -> Self {
        CellAttributes {
            records: Vec::new(),
            version: 0,
            cache: Mutex::new(AttributeCache::default()),
            journal: null_journal(),
        }
    }
}

impl CellAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_journal(&mut self, journal: Journal) {
        self.journal = journal;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AttributeRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[AttributeRecord] {
        &self.records
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn append(&mut self, record: AttributeRecord) {
        let index = self.records.len();
        self.insert_at(index, record);
    }

    /// Replace the record at `index`.
    pub fn overwrite(&mut self, index: usize, record: AttributeRecord) -> Result<AttributeRecord> {
        self.check_index(index)?;
        Ok(self.replace_at(index, record))
    }

    pub(crate) fn insert_at(&mut self, index: usize, record: AttributeRecord) {
        let index = index.min(self.records.len());
        self.records.insert(index, record.clone());
        self.touch();
        self.journal.record(Operation::Attributes {
            index,
            before: None,
            after: Some(record),
        });
    }

    pub(crate) fn remove(&mut self, index: usize) -> Result<AttributeRecord> {
        self.check_index(index)?;
        Ok(self.remove_at(index))
    }

    fn check_index(&self, index: usize) -> Result<()> {
        let len = self.records.len();
        if index >= len {
            return Err(TabulaError::RecordOutOfRange { index, len });
        }
        Ok(())
    }

    /// `index` must be in range.
    fn replace_at(&mut self, index: usize, record: AttributeRecord) -> AttributeRecord {
        let before = std::mem::replace(&mut self.records[index], record.clone());
        self.touch();
        self.journal.record(Operation::Attributes {
            index,
            before: Some(before.clone()),
            after: Some(record),
        });
        before
    }

    /// `index` must be in range.
    fn remove_at(&mut self, index: usize) -> AttributeRecord {
        let record = self.records.remove(index);
        self.touch();
        self.journal.record(Operation::Attributes {
            index,
            before: Some(record.clone()),
            after: None,
        });
        record
    }

    /// Swap in new records without touching the journal.
    pub(crate) fn replace_all(&mut self, records: Vec<AttributeRecord>) {
        self.records = records;
        self.touch();
    }

    fn touch(&mut self) {
        self.version += 1;
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, AttributeCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Effective attributes of the cell at `key`.
    pub fn effective(&self, key: Key) -> Attributes {
        let mut cache = self.lock_cache();
        if cache.version != self.version {
            cache.cells.clear();
        }
        if let Some(hit) = cache.cells.get(&key) {
            return hit.clone();
        }
        if cache.version != self.version || cache.indexed != self.records.len() {
            self.rebuild(&mut cache);
        }

        let mut attributes = Attributes::default();
        if let Some(indices) = cache.sheets.get(&key.sheet) {
            for &i in indices {
                let record = &self.records[i];
                if record.selection.contains(key.row, key.col) {
                    attributes.apply(&record.diff);
                }
            }
        }
        cache.cells.insert(key, attributes.clone());
        attributes
    }

    fn rebuild(&self, cache: &mut AttributeCache) {
        cache.sheets.clear();
        for (i, record) in self.records.iter().enumerate() {
            cache.sheets.entry(record.sheet).or_default().push(i);
        }
        cache.indexed = self.records.len();
        cache.version = self.version;
    }

    /// Anchor of the merge area covering `key`, if any.
    ///
    /// The anchor cell itself reports its own key.
    pub fn merging_cell(&self, key: Key) -> Option<Key> {
        self.effective(key)
            .merge_area()
            .map(|area| Key::new(area.top, area.left, key.sheet))
    }

    /// Move records for a structural edit of `count` indices at `point`.
    ///
    /// A negative `count` is a deletion. Row and column edits shift the
    /// selections and merge areas of records on `sheet` (or on every sheet
    /// when `None`); merge areas that leave `shape` are clamped or dropped.
    /// Sheet edits renumber records and, on deletion, remove those on the
    /// deleted sheets.
    pub fn shift(
        &mut self,
        point: usize,
        count: isize,
        axis: Axis,
        sheet: Option<usize>,
        shape: Shape,
    ) {
        if count == 0 {
            return;
        }
        if axis == Axis::Sheet {
            self.shift_sheets(point, count);
            return;
        }

        let updates: Vec<(usize, AttributeRecord)> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, record)| sheet.is_none_or(|s| s == record.sheet))
            .filter_map(|(i, record)| {
                let mut shifted = record.clone();
                shifted.selection.shift(point, count, axis);
                if let Some(area) = record.diff.get(MERGE_AREA).and_then(AttributeValue::as_block)
                {
                    match area.shifted(point, count, axis).and_then(|a| a.clamped(shape)) {
                        Some(area) => {
                            shifted.diff.insert(MERGE_AREA.to_string(), area.into());
                        }
                        None => {
                            shifted.diff.remove(MERGE_AREA);
                        }
                    }
                }
                (shifted != *record).then_some((i, shifted))
            })
            .collect();

        debug!(records = updates.len(), %axis, point, count, "shifting attribute records");
        for (i, record) in updates {
            self.replace_at(i, record);
        }
    }

    fn shift_sheets(&mut self, point: usize, count: isize) {
        for i in (0..self.records.len()).rev() {
            let record = &self.records[i];
            match shift_index(record.sheet, point, count) {
                None => {
                    self.remove_at(i);
                }
                Some(new_sheet) if new_sheet != record.sheet => {
                    let mut moved = record.clone();
                    moved.sheet = new_sheet;
                    self.replace_at(i, moved);
                }
                Some(_) => {}
            }
        }
    }

    /// Clamp every merge area to `shape`, dropping those entirely outside.
    pub(crate) fn clamp_merges(&mut self, shape: Shape) {
        let updates: Vec<(usize, AttributeRecord)> = self
            .records
            .iter()
            .enumerate()
            .filter_map(|(i, record)| {
                let area = record.diff.get(MERGE_AREA)?.as_block()?;
                let clamped = area.clamped(shape);
                if clamped == Some(area) {
                    return None;
                }
                let mut record = record.clone();
                match clamped {
                    Some(area) => record.diff.insert(MERGE_AREA.to_string(), area.into()),
                    None => record.diff.remove(MERGE_AREA),
                };
                Some((i, record))
            })
            .collect();
        for (i, record) in updates {
            self.replace_at(i, record);
        }
    }
}
