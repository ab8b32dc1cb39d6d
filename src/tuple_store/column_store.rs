// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Column store kept sorted on a designated attribute.
//!
//! Grounded on `storage/CompressedColumnStoreTupleStorageSubBlock.{hpp,cpp}`
//! stripped of compression: attributes are stored in separate fixed-stride
//! stripes, tuples are kept in ascending order of the sort attribute, and
//! range/equality predicates on that attribute resolve via binary search
//! instead of a full scan.

use super::{decode_fixed, encode_fixed, ConversionPolicy, InsertResult, TupleStorageSubBlock};
use crate::binary_search::partition_point;
use crate::catalog::{AttributeId, Relation};
use crate::layout::Layout;
use crate::predicate::{ComparisonOp, Predicate};
use crate::tuple::Tuple;
use crate::value::Value;
use crate::{Error, Result, TupleId};

const COUNT_HEADER_LEN: usize = 4;

/// A column store kept sorted on `sort_attribute`.
pub struct ColumnStore {
    relation: Relation,
    sort_attribute: AttributeId,
    memory: Vec<u8>,
    stripe_offsets: Vec<usize>,
    capacity: usize,
}

impl ColumnStore {
    /// Builds a sorted column store over `memory`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegionTooSmall`] if `memory` cannot hold the header
    /// plus one tuple across every stripe.
    pub fn new(relation: Relation, sort_attribute: AttributeId, memory: Vec<u8>, _layout: &Layout) -> Result<Self> {
        let widths: Vec<usize> = relation
            .attributes()
            .iter()
            .map(|a| {
                a.fixed_byte_length()
                    .expect("ColumnStore requires a fixed, non-nullable layout (checked by Layout::new)")
            })
            .collect();
        let total_width: usize = widths.iter().sum::<usize>().max(1);
        if memory.len() < COUNT_HEADER_LEN + total_width {
            return Err(Error::RegionTooSmall(format!(
                "column store needs at least {} bytes, got {}",
                COUNT_HEADER_LEN + total_width,
                memory.len()
            )));
        }
        let capacity = (memory.len() - COUNT_HEADER_LEN) / total_width;

        let mut stripe_offsets = Vec::with_capacity(widths.len());
        let mut offset = COUNT_HEADER_LEN;
        for w in &widths {
            stripe_offsets.push(offset);
            offset += w * capacity;
        }

        Ok(Self {
            relation,
            sort_attribute,
            memory,
            stripe_offsets,
            capacity,
        })
    }

    fn num_tuples_raw(&self) -> usize {
        u32::from_be_bytes(self.memory[0..4].try_into().expect("4 bytes")) as usize
    }

    fn set_num_tuples(&mut self, n: usize) {
        let n = u32::try_from(n).expect("tuple count fits u32");
        self.memory[0..4].copy_from_slice(&n.to_be_bytes());
    }

    fn width(&self, attr: AttributeId) -> usize {
        self.relation
            .attribute(attr)
            .fixed_byte_length()
            .expect("ColumnStore requires a fixed, non-nullable layout (checked by Layout::new)")
    }

    fn cell(&self, attr: AttributeId, tuple_id: TupleId) -> (usize, usize) {
        let w = self.width(attr);
        let base = self.stripe_offsets[attr as usize] + tuple_id as usize * w;
        (base, w)
    }

    fn sort_value(&self, tuple_id: TupleId) -> Value {
        self.get_attribute_value(tuple_id, self.sort_attribute)
    }

    fn lower_bound(&self, value: &Value) -> usize {
        let n = self.num_tuples_raw();
        partition_point(n, |i| self.sort_value(i as TupleId).compare(value) == std::cmp::Ordering::Less)
    }

    fn upper_bound(&self, value: &Value) -> usize {
        let n = self.num_tuples_raw();
        partition_point(n, |i| self.sort_value(i as TupleId).compare(value) != std::cmp::Ordering::Greater)
    }

    fn shift_right_from(&mut self, pos: usize) {
        let n = self.num_tuples_raw();
        for attr in self.relation.attributes() {
            let w = self.width(attr.id());
            let base = self.stripe_offsets[attr.id() as usize];
            let src = base + pos * w;
            let len = (n - pos) * w;
            self.memory.copy_within(src..src + len, src + w);
        }
    }

    fn shift_left_from(&mut self, pos: usize) {
        let n = self.num_tuples_raw();
        for attr in self.relation.attributes() {
            let w = self.width(attr.id());
            let base = self.stripe_offsets[attr.id() as usize];
            let src = base + (pos + 1) * w;
            let len = (n - pos - 1) * w;
            self.memory.copy_within(src..src + len, src - w);
        }
    }

    fn write_tuple_at(&mut self, pos: usize, tuple: &Tuple, policy: ConversionPolicy) {
        for attr in self.relation.attributes() {
            let (offset, width) = self.cell(attr.id(), pos as TupleId);
            let converted = tuple
                .value(attr.id())
                .convert(attr.value_type(), policy)
                .expect("conversion validated by caller");
            encode_fixed(&converted, attr.value_type(), &mut self.memory[offset..offset + width]);
        }
    }

    fn tuple_fits(&self, tuple: &Tuple, policy: ConversionPolicy) -> Result<()> {
        for attr in self.relation.attributes() {
            if tuple.value(attr.id()).convert(attr.value_type(), policy).is_none() {
                return Err(Error::TupleTooLarge);
            }
        }
        Ok(())
    }
}

impl TupleStorageSubBlock for ColumnStore {
    fn is_empty(&self) -> bool {
        self.num_tuples_raw() == 0
    }

    fn is_packed(&self) -> bool {
        true
    }

    fn max_tuple_id(&self) -> TupleId {
        self.num_tuples_raw() as TupleId - 1
    }

    fn num_tuples(&self) -> usize {
        self.num_tuples_raw()
    }

    fn has_tuple(&self, tuple_id: TupleId) -> bool {
        tuple_id >= 0 && (tuple_id as usize) < self.num_tuples_raw()
    }

    fn supports_ad_hoc_insert(&self) -> bool {
        true
    }

    fn ad_hoc_insert_is_efficient(&self) -> bool {
        // Insertion requires an O(n) shift to keep sort order; not the cheap
        // append a row store gets.
        false
    }

    fn insert(&mut self, tuple: &Tuple, policy: ConversionPolicy) -> Result<InsertResult> {
        self.tuple_fits(tuple, policy)?;
        let n = self.num_tuples_raw();
        if n >= self.capacity {
            return Err(Error::BlockFull);
        }
        let sort_value = tuple
            .value(self.sort_attribute)
            .convert(self.relation.attribute(self.sort_attribute).value_type(), policy)
            .expect("validated above");
        let pos = self.upper_bound(&sort_value);
        if pos < n {
            self.shift_right_from(pos);
        }
        self.write_tuple_at(pos, tuple, policy);
        self.set_num_tuples(n + 1);
        Ok(InsertResult {
            tuple_id: pos as TupleId,
            ids_mutated: pos < n,
        })
    }

    fn insert_in_batch(&mut self, tuple: &Tuple, policy: ConversionPolicy) -> Result<InsertResult> {
        self.tuple_fits(tuple, policy)?;
        let n = self.num_tuples_raw();
        if n >= self.capacity {
            return Err(Error::BlockFull);
        }
        // Append unsorted; rebuild() restores order before fast-path reads.
        self.write_tuple_at(n, tuple, policy);
        self.set_num_tuples(n + 1);
        Ok(InsertResult {
            tuple_id: n as TupleId,
            ids_mutated: false,
        })
    }

    fn delete(&mut self, tuple_id: TupleId) -> bool {
        let n = self.num_tuples_raw();
        assert!(self.has_tuple(tuple_id), "delete of unknown tuple id");
        let last = n - 1;
        if (tuple_id as usize) != last {
            self.shift_left_from(tuple_id as usize);
        }
        self.set_num_tuples(last);
        (tuple_id as usize) != last
    }

    fn get_attribute_value(&self, tuple_id: TupleId, attr: AttributeId) -> Value {
        let (offset, width) = self.cell(attr, tuple_id);
        decode_fixed(&self.memory[offset..offset + width], self.relation.attribute(attr).value_type())
    }

    fn get_matches_for_predicate(&self, predicate: &Predicate) -> Vec<TupleId> {
        if let Some((op, literal)) = predicate.as_attribute_literal(self.sort_attribute) {
            let n = self.num_tuples_raw();
            let range = match op {
                ComparisonOp::Eq => self.lower_bound(literal)..self.upper_bound(literal),
                ComparisonOp::Lt => 0..self.lower_bound(literal),
                ComparisonOp::Le => 0..self.upper_bound(literal),
                ComparisonOp::Gt => self.upper_bound(literal)..n,
                ComparisonOp::Ge => self.lower_bound(literal)..n,
                ComparisonOp::Ne => {
                    let (lo, hi) = (self.lower_bound(literal), self.upper_bound(literal));
                    return (0..lo).chain(hi..n).map(|i| i as TupleId).collect();
                }
            };
            return range.map(|i| i as TupleId).collect();
        }

        let mut out = Vec::new();
        for tid in 0..self.num_tuples_raw() as TupleId {
            let values: Vec<Value> = self
                .relation
                .attributes()
                .iter()
                .map(|a| self.get_attribute_value(tid, a.id()))
                .collect();
            if predicate.evaluate(&Tuple::new(values)) {
                out.push(tid);
            }
        }
        out
    }

    fn rebuild(&mut self) {
        let n = self.num_tuples_raw();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            self.sort_value(a as TupleId).compare(&self.sort_value(b as TupleId))
        });

        for attr in self.relation.attributes() {
            let w = self.width(attr.id());
            let base = self.stripe_offsets[attr.id() as usize];
            let original: Vec<u8> = self.memory[base..base + n * w].to_vec();
            for (new_pos, &old_pos) in order.iter().enumerate() {
                let src = old_pos * w;
                let dst = new_pos * w;
                self.memory[base + dst..base + dst + w].copy_from_slice(&original[src..src + w]);
            }
        }
    }

    fn is_compressed(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Attribute;
    use crate::layout::TssbKind;
    use crate::value::ValueType;

    fn relation() -> Relation {
        Relation::new(
            "t",
            vec![
                Attribute::new(0, "sort", ValueType::Int, false),
                Attribute::new(1, "payload", ValueType::Int, false),
            ],
        )
    }

    fn store(relation: &Relation) -> ColumnStore {
        let layout = Layout::new(relation, TssbKind::SortColumn { sort_attribute: 0 }, vec![], None, 1);
        ColumnStore::new(relation.clone(), 0, vec![0u8; 1024 * 1024], &layout).unwrap()
    }

    #[test]
    fn inserts_stay_sorted() {
        let r = relation();
        let mut s = store(&r);
        for v in [5, 1, 3] {
            s.insert(&Tuple::new(vec![Value::Int(v), Value::Int(v * 10)]), ConversionPolicy::Exact).unwrap();
        }
        let values: Vec<i64> = (0..3)
            .map(|i| match s.get_attribute_value(i, 0) {
                Value::Int(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, vec![1, 3, 5]);
    }

    #[test]
    fn range_predicate_uses_binary_search() {
        let r = relation();
        let mut s = store(&r);
        for v in [1, 2, 3, 4, 5] {
            s.insert(&Tuple::new(vec![Value::Int(v), Value::Int(0)]), ConversionPolicy::Exact).unwrap();
        }
        let matches = s.get_matches_for_predicate(&Predicate::compare(0, ComparisonOp::Ge, Value::Int(3)));
        assert_eq!(matches, vec![2, 3, 4]);
    }

    #[test]
    fn batch_insert_then_rebuild_restores_order() {
        let r = relation();
        let mut s = store(&r);
        for v in [5, 1, 3] {
            s.insert_in_batch(&Tuple::new(vec![Value::Int(v), Value::Int(0)]), ConversionPolicy::Exact).unwrap();
        }
        s.rebuild();
        let values: Vec<i64> = (0..3)
            .map(|i| match s.get_attribute_value(i, 0) {
                Value::Int(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, vec![1, 3, 5]);
    }
}
