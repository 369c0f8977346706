//! Sub-cache capability traits.
//!
//! A sub-cache is one named table. Both engines implement the same
//! contract, but their consistency guarantees differ and are NOT unified:
//!
//! - dbm: one writer at a time per table file (exclusive `flock`); readers
//!   take no lock and may observe the state before a concurrent write
//!   commits. Keys iterate in hash order.
//! - LMDB: ACID, single writer and snapshot-isolated readers. Keys iterate
//!   in B-tree (byte-wise sorted) order.
//!
//! Callers that need ACID guarantees must select the LMDB backend.

use ldapcache_core::CacheResult;
use serde::Serialize;
use std::collections::BTreeMap;

/// Shape of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Layout {
    /// One scalar per key instead of a list.
    pub single_value: bool,
    /// Built as value -> [keys] instead of key -> [values].
    pub reverse: bool,
}

impl Layout {
    pub const SINGLE: Layout = Layout {
        single_value: true,
        reverse: false,
    };
    pub const MULTI: Layout = Layout {
        single_value: false,
        reverse: false,
    };
    pub const REVERSE: Layout = Layout {
        single_value: false,
        reverse: true,
    };

    /// Reverse tables are always multi-valued.
    pub fn new(single_value: bool, reverse: bool) -> Self {
        Self {
            single_value: single_value && !reverse,
            reverse,
        }
    }

    pub fn is_multi(&self) -> bool {
        !self.single_value
    }
}

/// Value stored under one key.
///
/// Single-valued tables yield `Single`, absent keys included (`None`).
/// Multi-valued and reverse tables yield `Multi`, absent keys as an empty
/// list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CacheValue {
    Single(Option<String>),
    Multi(Vec<String>),
}

impl CacheValue {
    /// The value a missing key reads as under `layout`.
    pub fn empty(layout: Layout) -> Self {
        if layout.single_value {
            CacheValue::Single(None)
        } else {
            CacheValue::Multi(Vec::new())
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CacheValue::Single(value) => value.is_none(),
            CacheValue::Multi(values) => values.is_empty(),
        }
    }

    pub fn as_single(&self) -> Option<&str> {
        match self {
            CacheValue::Single(value) => value.as_deref(),
            CacheValue::Multi(values) => values.first().map(String::as_str),
        }
    }

    /// All values as a list, whatever the layout.
    pub fn into_values(self) -> Vec<String> {
        match self {
            CacheValue::Single(value) => value.into_iter().collect(),
            CacheValue::Multi(values) => values,
        }
    }
}

/// Read access that may span many lookups (one LMDB read transaction, or
/// one dbm snapshot).
pub trait CacheReader {
    fn get(&self, key: &str) -> CacheResult<CacheValue>;

    /// All keys in engine order.
    fn keys(&self) -> CacheResult<Vec<String>>;
}

/// Scoped write access to one table.
///
/// The engine lock or transaction is held until the handle is dropped.
/// Changes become visible on [`CacheWriter::commit`]; dropping the handle
/// without committing discards them.
pub trait CacheWriter {
    /// Read through the pending changes of this handle.
    fn get(&self, key: &str) -> CacheResult<CacheValue>;

    /// Set the association for `key`.
    ///
    /// - forward single-valued: stores `values[0]`; empty `values` deletes.
    /// - forward multi-valued: replaces the stored list with `values`.
    /// - reverse: adds `key` to the entry of every value in `values`. Does
    ///   not remove `key` from entries not listed; delete those first.
    fn save(&mut self, key: &str, values: &[String]) -> CacheResult<()>;

    /// Remove the association for `key`.
    ///
    /// - forward: drops the entry for `key`, ignoring `values`.
    /// - reverse: removes `key` from the entry of every value in `values`,
    ///   dropping entries that become empty. Missing members are ignored.
    fn delete(&mut self, key: &str, values: &[String]) -> CacheResult<()>;

    fn commit(self: Box<Self>) -> CacheResult<()>;
}

/// One named table of the cache.
pub trait SubCache: Send + Sync {
    fn name(&self) -> &str;

    fn layout(&self) -> Layout;

    fn reader(&self) -> CacheResult<Box<dyn CacheReader + '_>>;

    fn writer(&self) -> CacheResult<Box<dyn CacheWriter + '_>>;

    /// Full table contents.
    fn load(&self) -> CacheResult<BTreeMap<String, CacheValue>>;

    /// Destroy and recreate the table.
    fn clear(&self) -> CacheResult<()>;

    /// Engine maintenance.
    fn cleanup(&self) -> CacheResult<()>;

    fn get(&self, key: &str) -> CacheResult<CacheValue> {
        self.reader()?.get(key)
    }

    fn keys(&self) -> CacheResult<Vec<String>> {
        self.reader()?.keys()
    }

    fn save(&self, key: &str, values: &[String]) -> CacheResult<()> {
        let mut writer = self.writer()?;
        writer.save(key, values)?;
        writer.commit()
    }

    fn delete(&self, key: &str, values: &[String]) -> CacheResult<()> {
        let mut writer = self.writer()?;
        writer.delete(key, values)?;
        writer.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_new_forces_multi_for_reverse() {
        assert_eq!(Layout::new(true, true), Layout::REVERSE);
        assert_eq!(Layout::new(true, false), Layout::SINGLE);
        assert!(Layout::MULTI.is_multi());
    }

    #[test]
    fn test_cache_value_empty() {
        assert_eq!(CacheValue::empty(Layout::SINGLE), CacheValue::Single(None));
        assert_eq!(CacheValue::empty(Layout::REVERSE), CacheValue::Multi(vec![]));
        assert!(CacheValue::empty(Layout::MULTI).is_empty());
    }

    #[test]
    fn test_cache_value_json() {
        let single = serde_json::to_string(&CacheValue::Single(Some("Smith".into()))).expect("json");
        assert_eq!(single, "\"Smith\"");
        let missing = serde_json::to_string(&CacheValue::Single(None)).expect("json");
        assert_eq!(missing, "null");
        let multi = serde_json::to_string(&CacheValue::Multi(vec!["a".into()])).expect("json");
        assert_eq!(multi, "[\"a\"]");
    }

    #[test]
    fn test_into_values() {
        assert_eq!(CacheValue::Single(Some("x".into())).into_values(), vec!["x"]);
        assert!(CacheValue::Single(None).into_values().is_empty());
    }
}
