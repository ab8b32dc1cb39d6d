// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The bloom-filter sub-block: an acknowledged placeholder.
//!
//! Grounded on `storage/BloomFilterSubBlock.hpp`'s `DefaultBloomFilterSubBlock`,
//! whose `getMatchesForPredicate` literally flips a coin
//! (`rand() % RAND_MAX % 2`). Per spec §9's design note, that behavior
//! "cannot be correct," so this sub-block keeps the layout/sizing contract
//! (one region, sized per [`crate::layout::Layout::bloom_estimate`]) but
//! answers every probe as "maybe" rather than a random guess: it never rules
//! a tuple out, so it can never produce a wrong answer, only a wasted scan.
//! Designing a real filter on compressed codes is left as a follow-up (see
//! `DESIGN.md`).

use crate::catalog::AttributeId;
use crate::index::IndexSearchResult;
use crate::predicate::Predicate;
use crate::tuple_store::Tssb;
use crate::{Error, Result, TupleId};

/// Placeholder bloom-filter sub-block over a single attribute's region.
pub struct BloomFilterSubBlock {
    attribute: AttributeId,
    region_len: usize,
}

impl BloomFilterSubBlock {
    /// Claims a region for the filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegionTooSmall`] if `region_len` is 0 — a filter
    /// needs at least some space to declare it owns, even though this
    /// placeholder does not use it to store anything meaningful.
    pub fn new(attribute: AttributeId, region_len: usize) -> Result<Self> {
        if region_len == 0 {
            return Err(Error::RegionTooSmall(
                "bloom filter region must be non-empty".to_string(),
            ));
        }
        Ok(Self {
            attribute,
            region_len,
        })
    }

    /// The attribute this filter was built over.
    #[must_use]
    pub fn attribute(&self) -> AttributeId {
        self.attribute
    }

    /// The byte size of this filter's claimed region.
    #[must_use]
    pub fn region_len(&self) -> usize {
        self.region_len
    }

    /// No-op: this placeholder never narrows a probe, so there is nothing
    /// useful to record per insert.
    pub fn add_entry(&mut self, _tuple_id: TupleId, _tssb: &Tssb) {}

    /// Always reports every live tuple as a candidate (`is_superset: true`).
    /// Callers must re-check the predicate against the tuple store.
    #[must_use]
    pub fn get_matches_for_predicate(&self, _predicate: &Predicate, tssb: &Tssb) -> IndexSearchResult {
        use crate::tuple_store::TupleStorageSubBlock;
        let max_id = tssb.max_tuple_id();
        let mut ids = Vec::new();
        let mut id = 0;
        while id <= max_id {
            if tssb.has_tuple(id) {
                ids.push(id);
            }
            id += 1;
        }
        IndexSearchResult {
            ids,
            is_superset: true,
        }
    }

    /// Always succeeds: there is no real structure to rebuild.
    pub fn rebuild(&mut self, _tssb: &Tssb) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Attribute, Relation};
    use crate::layout::{Layout, TssbKind};
    use crate::tuple::Tuple;
    use crate::tuple_store::{ConversionPolicy, RowStore, TupleStorageSubBlock};
    use crate::value::{Value, ValueType};

    #[test]
    fn placeholder_never_narrows_results() {
        let r = Relation::new("t", vec![Attribute::new(0, "a", ValueType::Int, false)]);
        let layout = Layout::new(&r, TssbKind::RowStore, vec![], None, 1);
        let mut tssb: Tssb = RowStore::new(r, vec![0u8; 1024 * 1024], &layout).unwrap().into();
        tssb.insert(&Tuple::new(vec![Value::Int(1)]), ConversionPolicy::Exact).unwrap();
        tssb.insert(&Tuple::new(vec![Value::Int(2)]), ConversionPolicy::Exact).unwrap();

        let filter = BloomFilterSubBlock::new(0, 64).unwrap();
        let result = filter.get_matches_for_predicate(&Predicate::compare(0, crate::predicate::ComparisonOp::Eq, Value::Int(999)), &tssb);
        assert!(result.is_superset);
        assert_eq!(result.ids, vec![0, 1]);
    }

    #[test]
    fn zero_length_region_is_rejected() {
        assert!(BloomFilterSubBlock::new(0, 0).is_err());
    }
}
