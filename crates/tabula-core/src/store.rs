//! Sparse keyed storage with undo recording.

use std::hash::Hash;

use dashmap::DashMap;

use crate::journal::{Journal, Operation, null_journal};

/// Values that have an "empty" form. Writing an empty value removes the key.
pub trait EmptyValue {
    fn is_empty_value(&self) -> bool;
}

impl EmptyValue for String {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl EmptyValue for f64 {
    fn is_empty_value(&self) -> bool {
        self.is_nan()
    }
}

/// Turns one mutation into the operation recorded on the journal.
pub type Recorder<K, V> = fn(K, Option<V>, Option<V>) -> Operation;

/// Sparse map from coordinates to values.
///
/// Absent keys read as `None`, or as the store's default through
/// [`get_or_default`](KeyedStore::get_or_default).
pub struct KeyedStore<K, V> {
    entries: DashMap<K, V>,
    /// Returned for absent keys by `get_or_default`
    default: Option<V>,
    journal: Journal,
    recorder: Recorder<K, V>,
}

impl<K, V> KeyedStore<K, V>
where
    K: Eq + Hash + Copy,
    V: Clone + Default + EmptyValue,
{
    pub fn new(recorder: Recorder<K, V>) -> Self {
        KeyedStore {
            entries: DashMap::new(),
            default: None,
            journal: null_journal(),
            recorder,
        }
    }

    pub fn with_default(recorder: Recorder<K, V>, default: V) -> Self {
        KeyedStore {
            default: Some(default),
            ..KeyedStore::new(recorder)
        }
    }

    pub fn set_journal(&mut self, journal: Journal) {
        self.journal = journal;
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    pub fn get_or_default(&self, key: &K) -> V {
        self.get(key)
            .or_else(|| self.default.clone())
            .unwrap_or_default()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Store `value` under `key` and return the previous value.
    ///
    /// An empty value removes the key instead.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        if value.is_empty_value() {
            return self.remove(&key);
        }
        let before = self.entries.insert(key, value.clone());
        self.journal
            .record((self.recorder)(key, before.clone(), Some(value)));
        before
    }

    /// Remove `key`. Absent keys are left alone and nothing is recorded.
    pub fn remove(&self, key: &K) -> Option<V> {
        let (key, before) = self.entries.remove(key)?;
        self.journal
            .record((self.recorder)(key, Some(before.clone()), None));
        Some(before)
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    pub fn entries(&self) -> Vec<(K, V)> {
        self.entries
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Swap in new contents without touching the journal.
    pub(crate) fn replace_all(&self, entries: impl IntoIterator<Item = (K, V)>) {
        self.entries.clear();
        for (key, value) in entries {
            if !value.is_empty_value() {
                self.entries.insert(key, value);
            }
        }
    }
}
