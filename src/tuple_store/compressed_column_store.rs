// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Column store kept sorted on a designated attribute, with selected
//! attributes dictionary-coded or truncated.
//!
//! Grounded on `storage/CompressedColumnStoreTupleStorageSubBlock.{hpp,cpp}`:
//! each attribute lives in its own stripe, as in [`super::ColumnStore`], but
//! compressed stripes store fixed-width codes instead of natural values.
//! Because both coding schemes preserve value order, the sort stripe's codes
//! stay monotonic, so range/equality predicates on the sort attribute keep
//! the binary-search fast path even when that attribute is itself
//! compressed — this is the sort-column analogue of the source system's
//! `getEqualCodes`/`getLessCodes` comparator-on-codes trick.

use super::compressed_row_store::build_codings;
use super::compression::{Coding, CodeQuery};
use super::{ConversionPolicy, InsertResult, TupleStorageSubBlock};
use crate::binary_search::partition_point;
use crate::catalog::{AttributeId, Relation};
use crate::layout::Layout;
use crate::predicate::{ComparisonOp, Predicate};
use crate::tuple::Tuple;
use crate::value::Value;
use crate::{Error, Result, TupleId};

const COUNT_HEADER_LEN: usize = 4;

/// A column store kept sorted on `sort_attribute`, with selected attributes
/// compressed.
pub struct CompressedColumnStore {
    relation: Relation,
    sort_attribute: AttributeId,
    compressed_attributes: Vec<AttributeId>,
    codings: Vec<Coding>,
    memory: Vec<u8>,
    stripe_offsets: Vec<usize>,
    capacity: usize,
}

impl CompressedColumnStore {
    /// Builds a compressed, sorted column store over `memory`. See
    /// [`super::CompressedRowStore::new`] for the `initial_sample` contract.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegionTooSmall`] if `memory` cannot hold the header
    /// plus one tuple across every stripe.
    pub fn new(
        relation: Relation,
        sort_attribute: AttributeId,
        compressed_attributes: Vec<AttributeId>,
        memory: Vec<u8>,
        _layout: &Layout,
        initial_sample: &[Tuple],
    ) -> Result<Self> {
        let codings = build_codings(&relation, &compressed_attributes, initial_sample);
        let total_width: usize = stripe_widths(&relation, &codings).iter().sum::<usize>().max(1);

        if memory.len() < COUNT_HEADER_LEN + total_width {
            return Err(Error::RegionTooSmall(format!(
                "compressed column store needs at least {} bytes, got {}",
                COUNT_HEADER_LEN + total_width,
                memory.len()
            )));
        }
        let capacity = (memory.len() - COUNT_HEADER_LEN) / total_width;
        let stripe_offsets = stripe_offsets(&relation, &codings, capacity);

        Ok(Self {
            relation,
            sort_attribute,
            compressed_attributes,
            codings,
            memory,
            stripe_offsets,
            capacity,
        })
    }

    fn is_compressed_attr(&self, attr: AttributeId) -> bool {
        self.compressed_attributes.contains(&attr)
            && !matches!(self.codings[attr as usize], Coding::None { .. })
    }

    fn width(&self, attr: AttributeId) -> usize {
        if self.is_compressed_attr(attr) {
            self.codings[attr as usize].code_width()
        } else {
            self.relation.attribute(attr).fixed_byte_length().expect("fixed width")
        }
    }

    fn num_tuples_raw(&self) -> usize {
        u32::from_be_bytes(self.memory[0..4].try_into().expect("4 bytes")) as usize
    }

    fn set_num_tuples(&mut self, n: usize) {
        let n = u32::try_from(n).expect("tuple count fits u32");
        self.memory[0..4].copy_from_slice(&n.to_be_bytes());
    }

    fn cell(&self, attr: AttributeId, tuple_id: TupleId) -> (usize, usize) {
        let w = self.width(attr);
        (self.stripe_offsets[attr as usize] + tuple_id as usize * w, w)
    }

    fn sort_value(&self, tuple_id: TupleId) -> Value {
        self.get_attribute_value(tuple_id, self.sort_attribute)
    }

    fn sort_code(&self, tuple_id: TupleId) -> Option<u64> {
        if self.is_compressed_attr(self.sort_attribute) {
            let (offset, width) = self.cell(self.sort_attribute, tuple_id);
            Some(self.codings[self.sort_attribute as usize].read_code(&self.memory[offset..offset + width]))
        } else {
            None
        }
    }

    fn lower_bound(&self, value: &Value) -> usize {
        let n = self.num_tuples_raw();
        if let Some(coding) = self.sort_coding() {
            let target = coding.lower_bound_code(value);
            return partition_point(n, |i| self.sort_code(i as TupleId).unwrap() < target) ;
        }
        partition_point(n, |i| self.sort_value(i as TupleId).compare(value) == std::cmp::Ordering::Less)
    }

    fn upper_bound(&self, value: &Value) -> usize {
        let n = self.num_tuples_raw();
        if let Some(coding) = self.sort_coding() {
            let target = coding.upper_bound_code(value);
            return partition_point(n, |i| self.sort_code(i as TupleId).unwrap() < target);
        }
        partition_point(n, |i| self.sort_value(i as TupleId).compare(value) != std::cmp::Ordering::Greater)
    }

    fn sort_coding(&self) -> Option<&Coding> {
        if self.is_compressed_attr(self.sort_attribute) {
            Some(&self.codings[self.sort_attribute as usize])
        } else {
            None
        }
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
                .expect("validated by caller");
            if self.is_compressed_attr(attr.id()) {
                let code = self.codings[attr.id() as usize].encode(&converted);
                self.codings[attr.id() as usize].write_code(code, &mut self.memory[offset..offset + width]);
            } else {
                super::encode_fixed(&converted, attr.value_type(), &mut self.memory[offset..offset + width]);
            }
        }
    }

    fn tuple_fits(&self, tuple: &Tuple, policy: ConversionPolicy) -> Result<()> {
        for attr in self.relation.attributes() {
            let Some(converted) = tuple.value(attr.id()).convert(attr.value_type(), policy) else {
                return Err(Error::TupleTooLarge);
            };
            if self.is_compressed_attr(attr.id()) && !self.codings[attr.id() as usize].contains(&converted) {
                return Err(Error::BlockFull);
            }
        }
        Ok(())
    }
}

fn stripe_widths(relation: &Relation, codings: &[Coding]) -> Vec<usize> {
    relation
        .attributes()
        .iter()
        .zip(codings)
        .map(|(attr, coding)| {
            if matches!(coding, Coding::None { .. }) {
                attr.fixed_byte_length().expect("fixed width")
            } else {
                coding.code_width()
            }
        })
        .collect()
}

fn stripe_offsets(relation: &Relation, codings: &[Coding], capacity: usize) -> Vec<usize> {
    let widths = stripe_widths(relation, codings);
    let mut offsets = Vec::with_capacity(widths.len());
    let mut offset = COUNT_HEADER_LEN;
    for w in &widths {
        offsets.push(offset);
        offset += w * capacity;
    }
    offsets
}

impl TupleStorageSubBlock for CompressedColumnStore {
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
        if self.is_compressed_attr(attr) {
            let code = self.codings[attr as usize].read_code(&self.memory[offset..offset + width]);
            self.codings[attr as usize].decode(code)
        } else {
            super::decode_fixed(&self.memory[offset..offset + width], self.relation.attribute(attr).value_type())
        }
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

        for attr in &self.compressed_attributes {
            if *attr == self.sort_attribute {
                continue;
            }
            if let Some((op, literal)) = predicate.as_attribute_literal(*attr) {
                let coding = &self.codings[*attr as usize];
                if matches!(coding, Coding::None { .. }) {
                    continue;
                }
                let query = coding.translate(op, literal);
                let mut out = Vec::new();
                for tid in 0..self.num_tuples_raw() as TupleId {
                    let (offset, width) = self.cell(*attr, tid);
                    let code = coding.read_code(&self.memory[offset..offset + width]);
                    if code_matches(&query, code) {
                        out.push(tid);
                    }
                }
                return out;
            }
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
        order.sort_by(|&a, &b| self.sort_value(a as TupleId).compare(&self.sort_value(b as TupleId)));

        let samples: Vec<Tuple> = order
            .iter()
            .map(|&old_pos| {
                Tuple::new(
                    self.relation
                        .attributes()
                        .iter()
                        .map(|a| self.get_attribute_value(old_pos as TupleId, a.id()))
                        .collect(),
                )
            })
            .collect();

        self.codings = build_codings(&self.relation, &self.compressed_attributes, &samples);
        let total_width: usize = stripe_widths(&self.relation, &self.codings).iter().sum::<usize>().max(1);
        self.capacity = (self.memory.len() - COUNT_HEADER_LEN) / total_width;
        self.stripe_offsets = stripe_offsets(&self.relation, &self.codings, self.capacity);

        for (new_pos, tuple) in samples.iter().enumerate() {
            self.write_tuple_at(new_pos, tuple, ConversionPolicy::Exact);
        }
    }

    fn is_compressed(&self) -> bool {
        !self.compressed_attributes.is_empty()
    }
}

fn code_matches(query: &CodeQuery, code: u64) -> bool {
    match *query {
        CodeQuery::All => true,
        CodeQuery::None => false,
        CodeQuery::Range { lo, hi } => code >= lo && code < hi,
        CodeQuery::NotEqual { excluded } => code != excluded,
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

    fn sample() -> Vec<Tuple> {
        (0..20).map(|v| Tuple::new(vec![Value::Int(v), Value::Int(v * 3)])).collect()
    }

    #[test]
    fn sorted_order_survives_compression() {
        let r = relation();
        let layout = Layout::new(
            &r,
            TssbKind::CompressedSortColumn { sort_attribute: 0, compressed_attributes: vec![0] },
            vec![],
            None,
            1,
        );
        let mut s = CompressedColumnStore::new(r, 0, vec![0], vec![0u8; 4 + 16 * 1000], &layout, &[]).unwrap();
        for v in [5, 1, 9, 3] {
            s.insert(&Tuple::new(vec![Value::Int(v), Value::Int(0)]), ConversionPolicy::Exact).unwrap();
        }
        let values: Vec<i64> = (0..4)
            .map(|i| match s.get_attribute_value(i, 0) {
                Value::Int(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, vec![1, 3, 5, 9]);
    }

    #[test]
    fn binary_search_fast_path_after_rebuild_with_compressed_sort_column() {
        let r = relation();
        let layout = Layout::new(
            &r,
            TssbKind::CompressedSortColumn { sort_attribute: 0, compressed_attributes: vec![0] },
            vec![],
            None,
            1,
        );
        let mut s = CompressedColumnStore::new(r, 0, vec![0], vec![0u8; 4 + 16 * 1000], &layout, &sample()).unwrap();
        for t in sample() {
            s.insert(&t, ConversionPolicy::Exact).unwrap();
        }
        let matches = s.get_matches_for_predicate(&Predicate::compare(0, ComparisonOp::Ge, Value::Int(18)));
        assert_eq!(matches, vec![18, 19]);
    }
}
