//! tabula-core - layered grid model: keyed store, attribute overlay, sliced
//! array and evaluated code array.

pub mod array;
pub mod attributes;
pub mod code;
pub mod config;
pub mod error;
pub mod journal;
pub mod search;
pub mod snapshot;
pub mod store;

pub use array::{CellIter, DataArray, Slice};
pub use attributes::{AttributeDiff, AttributeRecord, AttributeValue, Attributes, CellAttributes};
pub use code::CodeArray;
pub use config::EngineConfig;
pub use error::{Result, TabulaError};
pub use journal::{History, Journal, NullLog, Operation, UndoLog};
pub use search::{Direction, SearchFlags, string_match};
pub use snapshot::Snapshot;
pub use store::KeyedStore;

pub use tabula_engine::engine::{Axis, CellValue, Index, Key, Selection, Shape};
