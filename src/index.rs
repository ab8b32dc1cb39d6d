// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Auxiliary index sub-blocks over a tuple store.
//!
//! Grounded on `storage/IndexSubBlock.hpp`'s black-box contract
//! (`supportsAdHocAdd`/`supportsAdHocRemove`/`addEntry`/`removeEntry`/
//! `getMatchesForPredicate`/`rebuild`), with one concrete implementation —
//! an equality-only hash index, since the one [`crate::layout::IndexKind`]
//! this engine describes is [`crate::layout::IndexKind::EqualityHash`].

use crate::catalog::AttributeId;
use crate::predicate::Predicate;
use crate::tuple_store::Tssb;
use crate::value::Value;
use crate::TupleId;
use rustc_hash::FxHashMap;

/// Result of an index probe: the matching tuple ids, and whether the result
/// is only a superset of the true matches (callers must re-check the
/// predicate against the tuple store for any matches reported this way).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexSearchResult {
    /// Candidate tuple ids.
    pub ids: Vec<TupleId>,
    /// Whether `ids` may contain false positives that must be re-checked.
    pub is_superset: bool,
}

impl IndexSearchResult {
    fn exact(ids: Vec<TupleId>) -> Self {
        Self {
            ids,
            is_superset: false,
        }
    }
}

/// Black-box contract every index sub-block kind implements.
pub trait IndexSubBlock: Send + Sync {
    /// Whether [`IndexSubBlock::add_entry`] is usable; if not, `rebuild()`
    /// is the only way to add entries.
    fn supports_ad_hoc_add(&self) -> bool;

    /// Whether [`IndexSubBlock::remove_entry`] is usable.
    fn supports_ad_hoc_remove(&self) -> bool;

    /// Adds `tuple_id` to the index. Returns `false` if there was no space.
    ///
    /// # Panics
    ///
    /// May panic if [`IndexSubBlock::supports_ad_hoc_add`] is `false`.
    fn add_entry(&mut self, tuple_id: TupleId, tssb: &Tssb) -> bool;

    /// Removes `tuple_id` from the index.
    ///
    /// # Panics
    ///
    /// Panics if [`IndexSubBlock::supports_ad_hoc_remove`] is `false` — per
    /// the source contract, calling this when unsupported is a caller error.
    fn remove_entry(&mut self, tuple_id: TupleId);

    /// Finds tuples that may match `predicate`.
    fn get_matches_for_predicate(&self, predicate: &Predicate) -> IndexSearchResult;

    /// Rebuilds the index from scratch over every tuple currently live in
    /// `tssb`. Returns `false` if there was not enough room to index them
    /// all — the caller must then evict/grow the block.
    fn rebuild(&mut self, tssb: &Tssb) -> bool;
}

/// An in-memory equality-only hash index over a single attribute.
pub struct EqualityHashIndex {
    attribute: AttributeId,
    capacity: usize,
    entries: FxHashMap<HashKey, Vec<TupleId>>,
    len: usize,
}

/// A hashable projection of [`Value`] (floats are compared bit-for-bit,
/// matching this index's all-or-nothing equality semantics).
#[derive(Clone, PartialEq, Eq, Hash)]
enum HashKey {
    Int(i64),
    Double(u64),
    Char(Vec<u8>),
}

impl HashKey {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(Self::Int(*i)),
            Value::Double(d) => Some(Self::Double(d.to_bits())),
            Value::Char(b) => Some(Self::Char(b.clone())),
            Value::Null => None,
        }
    }
}

impl EqualityHashIndex {
    /// Builds an empty index over `attribute`, sized to hold roughly
    /// `capacity` distinct entries before `rebuild`/`add_entry` start
    /// reporting no-space.
    #[must_use]
    pub fn new(attribute: AttributeId, capacity: usize) -> Self {
        Self {
            attribute,
            capacity,
            entries: FxHashMap::default(),
            len: 0,
        }
    }

    fn key_for(&self, tuple_id: TupleId, tssb: &Tssb) -> Option<HashKey> {
        use crate::tuple_store::TupleStorageSubBlock;
        HashKey::from_value(&tssb.get_attribute_value(tuple_id, self.attribute))
    }
}

impl IndexSubBlock for EqualityHashIndex {
    fn supports_ad_hoc_add(&self) -> bool {
        true
    }

    fn supports_ad_hoc_remove(&self) -> bool {
        true
    }

    fn add_entry(&mut self, tuple_id: TupleId, tssb: &Tssb) -> bool {
        if self.len >= self.capacity {
            return false;
        }
        let Some(key) = self.key_for(tuple_id, tssb) else {
            return true; // NULLs are never indexed, not a failure.
        };
        self.entries.entry(key).or_default().push(tuple_id);
        self.len += 1;
        true
    }

    fn remove_entry(&mut self, tuple_id: TupleId) {
        self.entries.retain(|_, ids| {
            let before = ids.len();
            ids.retain(|&id| id != tuple_id);
            self.len -= before - ids.len();
            !ids.is_empty()
        });
    }

    fn get_matches_for_predicate(&self, predicate: &Predicate) -> IndexSearchResult {
        use crate::predicate::ComparisonOp;

        match predicate.as_attribute_literal(self.attribute) {
            Some((ComparisonOp::Eq, literal)) => {
                let Some(key) = HashKey::from_value(literal) else {
                    return IndexSearchResult::exact(Vec::new());
                };
                IndexSearchResult::exact(self.entries.get(&key).cloned().unwrap_or_default())
            }
            Some((ComparisonOp::Ne, literal)) => {
                let Some(key) = HashKey::from_value(literal) else {
                    return IndexSearchResult {
                        ids: Vec::new(),
                        is_superset: true,
                    };
                };
                let mut ids: Vec<TupleId> = self
                    .entries
                    .iter()
                    .filter(|(k, _)| **k != key)
                    .flat_map(|(_, v)| v.iter().copied())
                    .collect();
                ids.sort_unstable();
                IndexSearchResult::exact(ids)
            }
            // A hash index cannot answer range predicates at all; report a
            // superset of "every indexed tuple" and let the caller re-check.
            _ => {
                let mut ids: Vec<TupleId> =
                    self.entries.values().flat_map(|v| v.iter().copied()).collect();
                ids.sort_unstable();
                IndexSearchResult {
                    ids,
                    is_superset: true,
                }
            }
        }
    }

    fn rebuild(&mut self, tssb: &Tssb) -> bool {
        use crate::tuple_store::TupleStorageSubBlock;

        self.entries.clear();
        self.len = 0;
        let max_id = tssb.max_tuple_id();
        let mut id = 0;
        while id <= max_id {
            if tssb.has_tuple(id) && !self.add_entry(id, tssb) {
                return false;
            }
            id += 1;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Attribute, Relation};
    use crate::layout::{Layout, TssbKind};
    use crate::predicate::{ComparisonOp, Predicate};
    use crate::tuple::Tuple;
    use crate::tuple_store::{ConversionPolicy, RowStore, Tssb, TupleStorageSubBlock};
    use crate::value::ValueType;

    fn relation() -> Relation {
        Relation::new("t", vec![Attribute::new(0, "a", ValueType::Int, false)])
    }

    fn populated_tssb(relation: &Relation) -> Tssb {
        let layout = Layout::new(relation, TssbKind::RowStore, vec![], None, 1);
        let mut store: Tssb = RowStore::new(relation.clone(), vec![0u8; 1024 * 1024], &layout)
            .unwrap()
            .into();
        for v in [1_i64, 2, 3, 2] {
            store
                .insert(&Tuple::new(vec![Value::Int(v)]), ConversionPolicy::Exact)
                .unwrap();
        }
        store
    }

    #[test]
    fn rebuild_then_equality_lookup() {
        let r = relation();
        let tssb = populated_tssb(&r);
        let mut index = EqualityHashIndex::new(0, 16);
        assert!(index.rebuild(&tssb));

        let result = index.get_matches_for_predicate(&Predicate::compare(
            0,
            ComparisonOp::Eq,
            Value::Int(2),
        ));
        assert!(!result.is_superset);
        let mut ids = result.ids;
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn range_predicate_reports_superset() {
        let r = relation();
        let tssb = populated_tssb(&r);
        let mut index = EqualityHashIndex::new(0, 16);
        index.rebuild(&tssb);

        let result = index.get_matches_for_predicate(&Predicate::compare(
            0,
            ComparisonOp::Lt,
            Value::Int(3),
        ));
        assert!(result.is_superset);
    }

    #[test]
    fn remove_then_lookup_misses() {
        let r = relation();
        let tssb = populated_tssb(&r);
        let mut index = EqualityHashIndex::new(0, 16);
        index.rebuild(&tssb);
        index.remove_entry(0);

        let result = index.get_matches_for_predicate(&Predicate::compare(
            0,
            ComparisonOp::Eq,
            Value::Int(1),
        ));
        assert!(result.ids.is_empty());
    }
}
