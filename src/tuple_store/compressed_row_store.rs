// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Row store with selected attributes dictionary-coded or truncated.
//!
//! Grounded on `storage/CompressedPackedRowStoreTupleStorageSubBlock.cpp`:
//! rows are packed back-to-back like [`super::RowStore`], but each
//! compressed attribute occupies only its code width rather than its
//! natural width. Per spec (and per the source system's dictionary-building
//! workflow, which is a bulk operation, not an ad hoc one), a compressed
//! attribute's domain — and therefore its code width — is fixed between
//! [`TupleStorageSubBlock::rebuild`] calls; an ad hoc insert of a value
//! outside the current domain reports `BlockFull` rather than growing the
//! dictionary in place.

use super::compression::{build, Coding, CodeQuery};
use super::{ConversionPolicy, InsertResult, TupleStorageSubBlock};
use crate::catalog::{AttributeId, Relation};
use crate::layout::Layout;
use crate::predicate::Predicate;
use crate::tuple::Tuple;
use crate::value::Value;
use crate::{Error, Result, TupleId};

const COUNT_HEADER_LEN: usize = 4;

/// A row store with selected attributes compressed.
pub struct CompressedRowStore {
    relation: Relation,
    compressed_attributes: Vec<AttributeId>,
    codings: Vec<Coding>,
    memory: Vec<u8>,
    offsets: Vec<usize>,
    stride: usize,
    capacity: usize,
}

impl CompressedRowStore {
    /// Builds a compressed row store over `memory`, seeding each compressed
    /// attribute's coding from `initial_sample` (pass an empty slice for a
    /// freshly created, not-yet-loaded block — every attribute then starts
    /// uncoded until the first [`TupleStorageSubBlock::rebuild`]).
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegionTooSmall`] if `memory` cannot hold the header
    /// plus one tuple at the resulting stride.
    pub fn new(
        relation: Relation,
        compressed_attributes: Vec<AttributeId>,
        memory: Vec<u8>,
        _layout: &Layout,
        initial_sample: &[Tuple],
    ) -> Result<Self> {
        let codings = build_codings(&relation, &compressed_attributes, initial_sample);
        let (offsets, stride) = layout_row(&relation, &codings);

        if memory.len() < COUNT_HEADER_LEN + stride {
            return Err(Error::RegionTooSmall(format!(
                "compressed row store needs at least {} bytes, got {}",
                COUNT_HEADER_LEN + stride,
                memory.len()
            )));
        }
        let capacity = (memory.len() - COUNT_HEADER_LEN) / stride;

        Ok(Self {
            relation,
            compressed_attributes,
            codings,
            memory,
            offsets,
            stride,
            capacity,
        })
    }

    fn is_compressed_attr(&self, attr: AttributeId) -> bool {
        self.compressed_attributes.contains(&attr)
            && !matches!(self.codings[attr as usize], Coding::None { .. })
    }

    fn num_tuples_raw(&self) -> usize {
        u32::from_be_bytes(self.memory[0..4].try_into().expect("4 bytes")) as usize
    }

    fn set_num_tuples(&mut self, n: usize) {
        let n = u32::try_from(n).expect("tuple count fits u32");
        self.memory[0..4].copy_from_slice(&n.to_be_bytes());
    }

    fn tuple_base(&self, tuple_id: TupleId) -> usize {
        COUNT_HEADER_LEN + tuple_id as usize * self.stride
    }

    fn cell(&self, attr: AttributeId, tuple_id: TupleId) -> (usize, usize) {
        let width = if self.is_compressed_attr(attr) {
            self.codings[attr as usize].code_width()
        } else {
            self.relation.attribute(attr).fixed_byte_length().expect("fixed width")
        };
        (self.tuple_base(tuple_id) + self.offsets[attr as usize], width)
    }

    fn write_tuple(&mut self, tuple_id: TupleId, tuple: &Tuple, policy: ConversionPolicy) {
        for attr in self.relation.attributes() {
            let (offset, width) = self.cell(attr.id(), tuple_id);
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

pub(super) fn build_codings(relation: &Relation, compressed_attributes: &[AttributeId], sample: &[Tuple]) -> Vec<Coding> {
    relation
        .attributes()
        .iter()
        .map(|attr| {
            if !compressed_attributes.contains(&attr.id()) || sample.is_empty() {
                Coding::None {
                    width: attr.fixed_byte_length().expect("fixed width"),
                }
            } else {
                let values: Vec<Value> = sample.iter().map(|t| t.value(attr.id()).clone()).collect();
                build(&values)
            }
        })
        .collect()
}

fn layout_row(relation: &Relation, codings: &[Coding]) -> (Vec<usize>, usize) {
    let mut offsets = Vec::with_capacity(codings.len());
    let mut offset = 0;
    for (attr, coding) in relation.attributes().iter().zip(codings) {
        offsets.push(offset);
        offset += if matches!(coding, Coding::None { .. }) {
            attr.fixed_byte_length().expect("fixed width")
        } else {
            coding.code_width()
        };
    }
    (offsets, offset.max(1))
}

impl TupleStorageSubBlock for CompressedRowStore {
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
            let dst = self.tuple_base(tuple_id);
            let src = self.tuple_base(last as TupleId);
            self.memory.copy_within(src..src + self.stride, dst);
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
        for attr in &self.compressed_attributes {
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
        let samples: Vec<Tuple> = (0..n as TupleId)
            .map(|tid| {
                Tuple::new(
                    self.relation
                        .attributes()
                        .iter()
                        .map(|a| self.get_attribute_value(tid, a.id()))
                        .collect(),
                )
            })
            .collect();

        self.codings = build_codings(&self.relation, &self.compressed_attributes, &samples);
        let (offsets, stride) = layout_row(&self.relation, &self.codings);
        self.offsets = offsets;
        self.stride = stride;
        self.capacity = (self.memory.len() - COUNT_HEADER_LEN) / stride;

        for (tid, tuple) in samples.iter().enumerate() {
            self.write_tuple(tid as TupleId, tuple, ConversionPolicy::Exact);
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
    use crate::predicate::ComparisonOp;
    use crate::value::ValueType;

    fn relation() -> Relation {
        Relation::new(
            "t",
            vec![
                Attribute::new(0, "code", ValueType::Int, false),
                Attribute::new(1, "payload", ValueType::Int, false),
            ],
        )
    }

    fn sample() -> Vec<Tuple> {
        (0..20)
            .map(|v| Tuple::new(vec![Value::Int(v), Value::Int(v * 2)]))
            .collect()
    }

    #[test]
    fn rebuild_shrinks_stride_and_grows_capacity() {
        let r = relation();
        let layout = Layout::new(
            &r,
            TssbKind::CompressedRowStore { compressed_attributes: vec![0] },
            vec![],
            None,
            1,
        );
        let mut s = CompressedRowStore::new(r, vec![0], vec![0u8; 4 + 16 * 1000], &layout, &[]).unwrap();
        for t in sample() {
            s.insert(&t, ConversionPolicy::Exact).unwrap();
        }
        let stride_before = s.stride;
        s.rebuild();
        assert!(s.stride < stride_before);
        assert_eq!(s.num_tuples(), 20);
        assert_eq!(s.get_attribute_value(5, 0), Value::Int(5));
    }

    #[test]
    fn equality_on_compressed_attribute_after_rebuild() {
        let r = relation();
        let layout = Layout::new(
            &r,
            TssbKind::CompressedRowStore { compressed_attributes: vec![0] },
            vec![],
            None,
            1,
        );
        let mut s = CompressedRowStore::new(r, vec![0], vec![0u8; 4 + 16 * 1000], &layout, &[]).unwrap();
        for t in sample() {
            s.insert(&t, ConversionPolicy::Exact).unwrap();
        }
        s.rebuild();
        let matches = s.get_matches_for_predicate(&Predicate::compare(0, ComparisonOp::Eq, Value::Int(7)));
        assert_eq!(matches, vec![7]);
    }

    #[test]
    fn out_of_domain_ad_hoc_insert_reports_block_full() {
        let r = relation();
        let layout = Layout::new(
            &r,
            TssbKind::CompressedRowStore { compressed_attributes: vec![0] },
            vec![],
            None,
            1,
        );
        let mut s = CompressedRowStore::new(r, vec![0], vec![0u8; 4 + 16 * 1000], &layout, &sample()).unwrap();
        let err = s
            .insert(&Tuple::new(vec![Value::Int(999), Value::Int(0)]), ConversionPolicy::Exact)
            .unwrap_err();
        assert!(matches!(err, Error::BlockFull));
    }
}
