// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The block: a slab-allocated region holding one tuple store, zero or more
//! indexes, and an optional bloom filter for a single relation.
//!
//! Grounded on `storage/StorageBlock.{hpp,cpp}`'s `insertTuple`/
//! `insertTupleInBatch`/`rebuild`/`getMatchesForPredicate` orchestration
//! across sub-blocks. Per spec §3, the tuple-store and index regions are
//! opaque to the block — owned entirely by the [`Tssb`] and
//! [`IndexSubBlock`] instances built over them — so only the [`Header`]
//! needs to survive a reopen bit-exact; sub-block content is rebuilt fresh
//! and brought back to full consistency by [`Block::rebuild`].

use crate::bloom::BloomFilterSubBlock;
use crate::catalog::Relation;
use crate::header::{read_header, write_header, Header};
use crate::index::{EqualityHashIndex, IndexSearchResult, IndexSubBlock};
use crate::layout::{IndexKind, Layout, TssbKind};
use crate::predicate::Predicate;
use crate::tuple::Tuple;
use crate::tuple_store::{
    ColumnStore, CompressedColumnStore, CompressedRowStore, ConversionPolicy, RowStore, Tssb,
    TupleStorageSubBlock,
};
use crate::value::Value;
use crate::{AttributeId, Error, Result, TupleId};

struct IndexEntry {
    kind: IndexKind,
    sub: Box<dyn IndexSubBlock>,
}

/// A single in-memory block: one tuple store, its indexes, and an optional
/// bloom filter, all built to the sizes a [`Header`] finalized for a given
/// [`Layout`].
pub struct Block {
    relation: Relation,
    header: Header,
    tssb: Tssb,
    indexes: Vec<IndexEntry>,
    bloom: Option<BloomFilterSubBlock>,
    dirty: bool,
}

/// Report of a successful ad hoc [`Block::insert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertReport {
    /// The id assigned to the newly inserted tuple.
    pub tuple_id: TupleId,
    /// Whether every index had to be rebuilt because the tuple store
    /// mutated other tuples' ids.
    pub indexes_rebuilt: bool,
}

fn build_tssb(relation: &Relation, kind: &TssbKind, size: usize, sample: &[Tuple]) -> Result<Tssb> {
    let memory = vec![0u8; size];
    Ok(match kind {
        TssbKind::RowStore => {
            RowStore::new(relation.clone(), memory, &placeholder_layout(relation, kind))?.into()
        }
        TssbKind::SortColumn { sort_attribute } => ColumnStore::new(
            relation.clone(),
            *sort_attribute,
            memory,
            &placeholder_layout(relation, kind),
        )?
        .into(),
        TssbKind::CompressedRowStore {
            compressed_attributes,
        } => CompressedRowStore::new(
            relation.clone(),
            compressed_attributes.clone(),
            memory,
            &placeholder_layout(relation, kind),
            sample,
        )?
        .into(),
        TssbKind::CompressedSortColumn {
            sort_attribute,
            compressed_attributes,
        } => CompressedColumnStore::new(
            relation.clone(),
            *sort_attribute,
            compressed_attributes.clone(),
            memory,
            &placeholder_layout(relation, kind),
            sample,
        )?
        .into(),
    })
}

/// The tuple storage constructors only consult `_layout` for its already-
/// validated `tssb_kind`/relation pairing (their own error paths are purely
/// a function of `memory.len()`), so a minimal single-purpose layout with
/// one slot is enough to satisfy their signatures without re-deriving the
/// block's real, already-finalized layout here.
fn placeholder_layout(relation: &Relation, kind: &TssbKind) -> Layout {
    Layout::new(relation, kind.clone(), vec![], None, 1)
}

fn build_index(kind: &IndexKind, size: usize) -> Box<dyn IndexSubBlock> {
    match kind {
        IndexKind::EqualityHash { attribute } => {
            let capacity = (size / 24).max(1);
            Box::new(EqualityHashIndex::new(*attribute, capacity))
        }
    }
}

impl Block {
    /// Builds a fresh, empty block for `relation` under `layout`.
    ///
    /// # Errors
    ///
    /// Returns an error if any declared sub-block cannot be constructed over
    /// the region [`Header::finalize`] assigned it (too small to hold even
    /// its own fixed metadata).
    pub fn new(relation: Relation, layout: Layout) -> Result<Self> {
        let header = Header::finalize(&layout, &relation);
        Self::from_header(relation, layout, header, &[])
    }

    fn from_header(
        relation: Relation,
        layout: Layout,
        header: Header,
        sample: &[Tuple],
    ) -> Result<Self> {
        let tssb = build_tssb(
            &relation,
            &header.tssb_kind,
            header.tuple_store_size as usize,
            sample,
        )?;

        let mut indexes = Vec::with_capacity(layout.indexes().len());
        for (kind, &size) in header.index_kinds.iter().zip(header.index_sizes.iter()) {
            indexes.push(IndexEntry {
                kind: kind.clone(),
                sub: build_index(kind, size as usize),
            });
        }

        let bloom = match (&header.bloom, header.bloom_filter_size) {
            (Some(b), Some(size)) => Some(BloomFilterSubBlock::new(b.attribute, size as usize)?),
            _ => None,
        };

        Ok(Self {
            relation,
            header,
            tssb,
            indexes,
            bloom,
            dirty: false,
        })
    }

    /// Reopens a block from a persisted header image (see [`Header`]'s wire
    /// format). Sub-block *content* is not reconstructed from the image —
    /// only [`Header`] round-trips bit-exact (spec §3 declares the tuple
    /// store and index regions opaque to the block) — so every sub-block
    /// starts fresh and empty, while the header's per-index consistency
    /// flags are preserved verbatim. Callers that need the reopened block's
    /// contents back must reload tuples and call [`Block::rebuild`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedBlock`] if the image fails to decode or no
    /// longer describes a valid layout for `relation`.
    pub fn reopen(relation: Relation, layout: Layout, header_image: &[u8]) -> Result<Self> {
        let (header, _consumed) =
            read_header(header_image).map_err(|e| Error::MalformedBlock(e.to_string()))?;
        if !header.is_valid_for(&relation) {
            return Err(Error::MalformedBlock(
                "header no longer valid for relation".to_string(),
            ));
        }
        let consistent = header.index_consistent.clone();
        let mut block = Self::from_header(relation, layout, header, &[])?;
        block.header.index_consistent = consistent;
        Ok(block)
    }

    /// Serializes this block's header, the only part of a block's image
    /// that survives a reopen bit-exact (see [`Block::reopen`]).
    #[must_use]
    pub fn header_image(&self) -> Vec<u8> {
        let mut image = vec![0u8; self.header.serialized_len()];
        write_header(&mut image, &self.header);
        image
    }

    /// The number of live tuples in this block's tuple store.
    #[must_use]
    pub fn num_tuples(&self) -> usize {
        self.tssb.num_tuples()
    }

    /// Whether this block has been mutated (by insert or delete) since the
    /// last [`Block::rebuild`].
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether every index is currently consistent with the tuple store.
    #[must_use]
    pub fn all_indexes_consistent(&self) -> bool {
        self.header.index_consistent.iter().all(|&c| c)
    }

    /// Whether ad hoc insertion is both supported and cheap: the tuple
    /// store supports ad hoc insert efficiently and every index supports ad
    /// hoc add.
    #[must_use]
    pub fn ad_hoc_insert_efficient(&self) -> bool {
        self.tssb.supports_ad_hoc_insert()
            && self.tssb.ad_hoc_insert_is_efficient()
            && self.indexes.iter().all(|e| e.sub.supports_ad_hoc_add())
    }

    fn rebuild_indexes(&mut self) -> bool {
        let mut all_ok = true;
        for (i, entry) in self.indexes.iter_mut().enumerate() {
            let ok = entry.sub.rebuild(&self.tssb);
            self.header.index_consistent[i] = ok;
            all_ok &= ok;
        }
        if let Some(bloom) = &mut self.bloom {
            bloom.rebuild(&self.tssb);
        }
        all_ok
    }

    /// Inserts `tuple` ad hoc: the tuple store applies it immediately, and
    /// every index is kept consistent without a full rebuild when possible
    /// (spec §4.4 insert algorithm).
    ///
    /// If the tuple store had to renumber other tuples to make room (a
    /// sort-ordered store inserting mid-sequence), every index is rebuilt
    /// in place. If instead one index runs out of room while the others
    /// already accepted the new tuple, the insert is rolled back (the
    /// tuple deleted again, any indexes that already added it unwound) and
    /// [`Error::IndexSpaceExhausted`] is reported — a soft, retry-in-
    /// another-block failure, distinct from the tuple store itself being
    /// full.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::TupleTooLarge`] / [`Error::BlockFull`] from the
    /// tuple store, or returns [`Error::IndexSpaceExhausted`] if an index
    /// ran out of room (see above).
    pub fn insert(&mut self, tuple: &Tuple, policy: ConversionPolicy) -> Result<InsertReport> {
        let outcome = self.tssb.insert(tuple, policy)?;

        if outcome.ids_mutated {
            if !self.rebuild_indexes() {
                self.tssb.delete(outcome.tuple_id);
                self.rebuild_indexes();
                return Err(Error::IndexSpaceExhausted);
            }
            self.dirty = true;
            return Ok(InsertReport {
                tuple_id: outcome.tuple_id,
                indexes_rebuilt: true,
            });
        }

        let mut added = Vec::with_capacity(self.indexes.len());
        for (i, entry) in self.indexes.iter_mut().enumerate() {
            if entry.sub.add_entry(outcome.tuple_id, &self.tssb) {
                added.push(i);
            } else {
                for &j in &added {
                    if self.indexes[j].sub.supports_ad_hoc_remove() {
                        self.indexes[j].sub.remove_entry(outcome.tuple_id);
                    } else {
                        self.header.index_consistent[j] = false;
                    }
                }
                self.tssb.delete(outcome.tuple_id);
                self.rebuild_indexes();
                return Err(Error::IndexSpaceExhausted);
            }
        }
        if let Some(bloom) = &mut self.bloom {
            bloom.add_entry(outcome.tuple_id, &self.tssb);
        }

        self.dirty = true;
        Ok(InsertReport {
            tuple_id: outcome.tuple_id,
            indexes_rebuilt: false,
        })
    }

    /// Inserts `tuple` for bulk loading: the tuple store appends without
    /// necessarily maintaining its invariants, and every index is marked
    /// inconsistent. Callers must call [`Block::rebuild`] before relying on
    /// index-backed or sort-order-dependent matching again.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::TupleTooLarge`] / [`Error::BlockFull`] from the
    /// tuple store.
    pub fn insert_in_batch(&mut self, tuple: &Tuple, policy: ConversionPolicy) -> Result<TupleId> {
        let outcome = self.tssb.insert_in_batch(tuple, policy)?;
        for consistent in &mut self.header.index_consistent {
            *consistent = false;
        }
        self.dirty = true;
        Ok(outcome.tuple_id)
    }

    /// Restores full consistency: re-sorts/re-packs the tuple store (via
    /// [`TupleStorageSubBlock::rebuild`]) and rebuilds every index over the
    /// result. Returns `false` if any index ran out of room — the block is
    /// then overfull for its current layout and the caller should evict or
    /// resize it.
    pub fn rebuild(&mut self) -> bool {
        self.tssb.rebuild();
        let ok = self.rebuild_indexes();
        self.dirty = false;
        ok
    }

    fn projected_tuple(&self, tuple_id: TupleId) -> Tuple {
        let values: Vec<Value> = self
            .relation
            .attributes()
            .iter()
            .map(|a| self.tssb.get_attribute_value(tuple_id, a.id()))
            .collect();
        Tuple::new(values)
    }

    /// Finds the tuple ids matching `predicate`, preferring a consistent
    /// index over `predicate`'s attribute (re-checking the predicate
    /// against the tuple store if the index can only report a superset),
    /// and falling back to the tuple store's own matching (which has its
    /// own fast paths for sort/compression structure) when no usable index
    /// exists.
    #[must_use]
    pub fn matches(&self, predicate: &Predicate) -> Vec<TupleId> {
        for (i, entry) in self.indexes.iter().enumerate() {
            if !self.header.index_consistent[i] {
                continue;
            }
            let IndexKind::EqualityHash { attribute } = &entry.kind;
            if predicate.as_attribute_literal(*attribute).is_none() {
                continue;
            }
            let IndexSearchResult { ids, is_superset } =
                entry.sub.get_matches_for_predicate(predicate);
            if !is_superset {
                return ids;
            }
            return ids
                .into_iter()
                .filter(|&id| predicate.evaluate(&self.projected_tuple(id)))
                .collect();
        }
        self.tssb.get_matches_for_predicate(predicate)
    }

    /// Projects `tuple_id` down to `attrs`, in the order given.
    #[must_use]
    pub fn project(&self, tuple_id: TupleId, attrs: &[AttributeId]) -> Tuple {
        Tuple::new(
            attrs
                .iter()
                .map(|&a| self.tssb.get_attribute_value(tuple_id, a))
                .collect(),
        )
    }

    /// This block's relation.
    #[must_use]
    pub fn relation(&self) -> &Relation {
        &self.relation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Attribute;
    use crate::layout::{BloomDescriptor, IndexKind};
    use crate::predicate::ComparisonOp;
    use crate::value::ValueType;

    fn relation() -> Relation {
        Relation::new(
            "t",
            vec![
                Attribute::new(0, "id", ValueType::Int, false),
                Attribute::new(1, "v", ValueType::Int, false),
            ],
        )
    }

    #[test]
    fn ad_hoc_insert_then_scan_by_index() {
        let r = relation();
        let layout = Layout::new(
            &r,
            TssbKind::RowStore,
            vec![IndexKind::EqualityHash { attribute: 0 }],
            None,
            2,
        );
        let mut block = Block::new(r, layout).unwrap();
        for i in 0..20 {
            block
                .insert(
                    &Tuple::new(vec![Value::Int(i), Value::Int(i * 2)]),
                    ConversionPolicy::Exact,
                )
                .unwrap();
        }
        assert!(block.all_indexes_consistent());
        let hits = block.matches(&Predicate::compare(0, ComparisonOp::Eq, Value::Int(7)));
        assert_eq!(hits.len(), 1);
        assert_eq!(block.project(hits[0], &[1]).value(0), &Value::Int(14));
    }

    #[test]
    fn batch_insert_marks_indexes_inconsistent_until_rebuild() {
        let r = relation();
        let layout = Layout::new(
            &r,
            TssbKind::RowStore,
            vec![IndexKind::EqualityHash { attribute: 0 }],
            None,
            2,
        );
        let mut block = Block::new(r, layout).unwrap();
        block
            .insert_in_batch(&Tuple::new(vec![Value::Int(1), Value::Int(2)]), ConversionPolicy::Exact)
            .unwrap();
        assert!(!block.all_indexes_consistent());
        assert!(block.rebuild());
        assert!(block.all_indexes_consistent());
    }

    #[test]
    fn reopen_preserves_persisted_index_consistency() {
        let r = relation();
        let layout = Layout::new(
            &r,
            TssbKind::RowStore,
            vec![IndexKind::EqualityHash { attribute: 0 }],
            None,
            2,
        );
        let mut block = Block::new(r.clone(), layout.clone()).unwrap();
        block
            .insert_in_batch(&Tuple::new(vec![Value::Int(1), Value::Int(2)]), ConversionPolicy::Exact)
            .unwrap();
        assert!(!block.all_indexes_consistent());

        let image = block.header_image();
        let reopened = Block::reopen(r, layout, &image).unwrap();
        assert!(!reopened.all_indexes_consistent());
        assert_eq!(reopened.num_tuples(), 0);
    }

    #[test]
    fn bloom_descriptor_produces_a_bloom_subblock() {
        let r = relation();
        let layout = Layout::new(
            &r,
            TssbKind::RowStore,
            vec![],
            Some(BloomDescriptor { attribute: 0 }),
            1,
        );
        let block = Block::new(r, layout).unwrap();
        assert!(block.bloom.is_some());
    }
}
