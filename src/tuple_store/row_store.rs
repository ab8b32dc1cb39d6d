// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Fixed-stride, densely-packed row store.
//!
//! Grounded on `storage/PackedRowStoreTupleStorageSubBlock.{hpp,cpp}`: every
//! tuple occupies the same number of bytes (the relation's fixed stride),
//! tuples are stored contiguously from the front of the region, and a
//! 4-byte tuple count at the front of the region is the only metadata.

use super::{decode_fixed, encode_fixed, ConversionPolicy, InsertResult, TupleStorageSubBlock};
use crate::catalog::{AttributeId, Relation};
use crate::layout::Layout;
use crate::predicate::Predicate;
use crate::tuple::Tuple;
use crate::value::Value;
use crate::{Error, Result, TupleId};

const COUNT_HEADER_LEN: usize = 4;

/// A packed row store: tuples laid out back-to-back at a fixed stride.
pub struct RowStore {
    relation: Relation,
    memory: Vec<u8>,
    stride: usize,
    capacity: usize,
}

impl RowStore {
    /// Builds a row store over `memory`, a region this store owns outright.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegionTooSmall`] if `memory` cannot even hold the
    /// tuple count header plus one tuple.
    pub fn new(relation: Relation, memory: Vec<u8>, _layout: &Layout) -> Result<Self> {
        let stride = relation.fixed_byte_length().expect(
            "RowStore requires a relation with a fixed, non-nullable layout (checked by Layout::new)",
        );
        if memory.len() < COUNT_HEADER_LEN + stride {
            return Err(Error::RegionTooSmall(format!(
                "row store needs at least {} bytes, got {}",
                COUNT_HEADER_LEN + stride,
                memory.len()
            )));
        }
        let capacity = (memory.len() - COUNT_HEADER_LEN) / stride;
        Ok(Self {
            relation,
            memory,
            stride,
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

    fn tuple_offset(&self, tuple_id: TupleId) -> usize {
        COUNT_HEADER_LEN + tuple_id as usize * self.stride
    }

    fn attribute_offset(&self, attr: AttributeId) -> (usize, usize) {
        let mut offset = 0;
        for a in &self.relation.attributes()[..attr as usize] {
            offset += a.fixed_byte_length().expect("fixed width");
        }
        let width = self
            .relation
            .attribute(attr)
            .fixed_byte_length()
            .expect("fixed width");
        (offset, width)
    }

    fn write_tuple(&mut self, tuple_id: TupleId, tuple: &Tuple, policy: ConversionPolicy) {
        let base = self.tuple_offset(tuple_id);
        for attr in self.relation.attributes() {
            let (offset, width) = self.attribute_offset(attr.id());
            let converted = tuple
                .value(attr.id())
                .convert(attr.value_type(), policy)
                .expect("conversion validated by caller");
            encode_fixed(&converted, attr.value_type(), &mut self.memory[base + offset..base + offset + width]);
        }
    }

    fn tuple_fits(&self, tuple: &Tuple, policy: ConversionPolicy) -> Result<()> {
        for attr in self.relation.attributes() {
            if tuple
                .value(attr.id())
                .convert(attr.value_type(), policy)
                .is_none()
            {
                return Err(Error::TupleTooLarge);
            }
        }
        Ok(())
    }
}

impl TupleStorageSubBlock for RowStore {
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
        true
    }

    fn insert(&mut self, tuple: &Tuple, policy: ConversionPolicy) -> Result<InsertResult> {
        self.tuple_fits(tuple, policy)?;
        let n = self.num_tuples_raw();
        if n >= self.capacity {
            return Err(Error::BlockFull);
        }
        self.write_tuple(n as TupleId, tuple, policy);
        self.set_num_tuples(n + 1);
        Ok(InsertResult {
            tuple_id: n as TupleId,
            ids_mutated: false,
        })
    }

    fn insert_in_batch(&mut self, tuple: &Tuple, policy: ConversionPolicy) -> Result<InsertResult> {
        self.insert(tuple, policy)
    }

    fn delete(&mut self, tuple_id: TupleId) -> bool {
        let n = self.num_tuples_raw();
        assert!(self.has_tuple(tuple_id), "delete of unknown tuple id");
        let last = n - 1;
        if (tuple_id as usize) != last {
            let dst_start = self.tuple_offset(tuple_id);
            let src_start = self.tuple_offset(last as TupleId);
            self.memory.copy_within(src_start..src_start + self.stride, dst_start);
        }
        self.set_num_tuples(last);
        (tuple_id as usize) != last
    }

    fn get_attribute_value(&self, tuple_id: TupleId, attr: AttributeId) -> Value {
        let base = self.tuple_offset(tuple_id);
        let (offset, width) = self.attribute_offset(attr);
        decode_fixed(&self.memory[base + offset..base + offset + width], self.relation.attribute(attr).value_type())
    }

    fn get_matches_for_predicate(&self, predicate: &Predicate) -> Vec<TupleId> {
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

    fn rebuild(&mut self) {}

    fn is_compressed(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Attribute;
    use crate::layout::TssbKind;
    use crate::predicate::ComparisonOp;
    use crate::value::ValueType;

    fn relation() -> Relation {
        Relation::new(
            "t",
            vec![
                Attribute::new(0, "a", ValueType::Int, false),
                Attribute::new(1, "b", ValueType::Int, false),
            ],
        )
    }

    fn store(relation: &Relation) -> RowStore {
        let layout = Layout::new(relation, TssbKind::RowStore, vec![], None, 1);
        RowStore::new(relation.clone(), vec![0u8; 1024 * 1024], &layout).unwrap()
    }

    #[test]
    fn insert_then_read_back() {
        let r = relation();
        let mut s = store(&r);
        let res = s
            .insert(&Tuple::new(vec![Value::Int(1), Value::Int(2)]), ConversionPolicy::Exact)
            .unwrap();
        assert_eq!(res.tuple_id, 0);
        assert!(!res.ids_mutated);
        assert_eq!(s.get_attribute_value(0, 1), Value::Int(2));
    }

    #[test]
    fn delete_last_does_not_mutate_ids() {
        let r = relation();
        let mut s = store(&r);
        s.insert(&Tuple::new(vec![Value::Int(1), Value::Int(2)]), ConversionPolicy::Exact).unwrap();
        s.insert(&Tuple::new(vec![Value::Int(3), Value::Int(4)]), ConversionPolicy::Exact).unwrap();
        let mutated = s.delete(1);
        assert!(!mutated);
        assert_eq!(s.num_tuples(), 1);
    }

    #[test]
    fn delete_non_last_mutates_ids() {
        let r = relation();
        let mut s = store(&r);
        s.insert(&Tuple::new(vec![Value::Int(1), Value::Int(2)]), ConversionPolicy::Exact).unwrap();
        s.insert(&Tuple::new(vec![Value::Int(3), Value::Int(4)]), ConversionPolicy::Exact).unwrap();
        let mutated = s.delete(0);
        assert!(mutated);
        assert_eq!(s.get_attribute_value(0, 0), Value::Int(3));
    }

    #[test]
    fn full_store_reports_block_full() {
        let r = Relation::new("t", vec![Attribute::new(0, "a", ValueType::Int, false)]);
        let layout = Layout::new(&r, TssbKind::RowStore, vec![], None, 1);
        let mut s = RowStore::new(r, vec![0u8; 4 + 8], &layout).unwrap();
        s.insert(&Tuple::new(vec![Value::Int(1)]), ConversionPolicy::Exact).unwrap();
        let err = s
            .insert(&Tuple::new(vec![Value::Int(2)]), ConversionPolicy::Exact)
            .unwrap_err();
        assert!(matches!(err, Error::BlockFull));
    }

    #[test]
    fn predicate_scan_filters() {
        let r = relation();
        let mut s = store(&r);
        s.insert(&Tuple::new(vec![Value::Int(1), Value::Int(2)]), ConversionPolicy::Exact).unwrap();
        s.insert(&Tuple::new(vec![Value::Int(5), Value::Int(6)]), ConversionPolicy::Exact).unwrap();
        let matches = s.get_matches_for_predicate(&Predicate::compare(0, ComparisonOp::Gt, Value::Int(3)));
        assert_eq!(matches, vec![1]);
    }
}
