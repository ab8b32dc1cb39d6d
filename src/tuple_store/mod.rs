// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tuple storage sub-blocks: the four concrete layouts a block can
//! instantiate over its tuple-store region.
//!
//! Grounded on `storage/TupleStorageSubBlock.hpp`'s common contract. The
//! four concrete kinds — [`RowStore`], [`ColumnStore`], [`CompressedRowStore`]
//! and [`CompressedColumnStore`] — are dispatched through the [`Tssb`] enum
//! rather than a trait object, following the `enum_dispatch` pattern the
//! teacher crate uses for its own closed sets of sub-block kinds.

pub mod column_store;
pub mod compressed_column_store;
pub mod compressed_row_store;
pub mod compression;
pub mod row_store;

pub use column_store::ColumnStore;
pub use compressed_column_store::CompressedColumnStore;
pub use compressed_row_store::CompressedRowStore;
pub use row_store::RowStore;

pub use crate::value::ConversionPolicy;

use crate::catalog::AttributeId;
use crate::predicate::Predicate;
use crate::tuple::Tuple;
use crate::value::Value;
use crate::{Result, TupleId};
use enum_dispatch::enum_dispatch;

/// Outcome of a successful single-tuple insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertResult {
    /// The id assigned to the newly-inserted tuple.
    pub tuple_id: TupleId,
    /// Whether inserting this tuple changed the ids of any *other* tuples
    /// already in the store (e.g. a sort-ordered store shifting suffix
    /// tuples to make room). Indexes built over this store must rebuild
    /// when this is `true`.
    pub ids_mutated: bool,
}

/// The common contract every tuple storage sub-block kind implements.
#[enum_dispatch]
pub trait TupleStorageSubBlock {
    /// Whether this store currently holds zero tuples.
    fn is_empty(&self) -> bool;

    /// Whether tuple ids are packed (dense, no holes) in `0..=max_tuple_id`.
    /// All four concrete kinds in this engine are packed.
    fn is_packed(&self) -> bool;

    /// The highest tuple id currently in use, or `-1` if empty.
    fn max_tuple_id(&self) -> TupleId;

    /// The number of live tuples.
    fn num_tuples(&self) -> usize;

    /// Whether `tuple_id` currently names a live tuple.
    fn has_tuple(&self, tuple_id: TupleId) -> bool;

    /// Whether this store supports inserting via [`TupleStorageSubBlock::insert`]
    /// without first calling [`TupleStorageSubBlock::rebuild`].
    fn supports_ad_hoc_insert(&self) -> bool;

    /// Whether ad hoc insertion is cheap (O(1)/O(log n)) as opposed to
    /// merely possible (e.g. requiring an O(n) shift).
    fn ad_hoc_insert_is_efficient(&self) -> bool;

    /// Inserts `tuple`, maintaining every invariant (sortedness, dictionary
    /// membership) immediately.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TupleTooLarge`] if `tuple` could never fit
    /// regardless of how empty the store is, or [`crate::Error::BlockFull`]
    /// if the store is simply out of room right now.
    fn insert(&mut self, tuple: &Tuple, policy: ConversionPolicy) -> Result<InsertResult>;

    /// Inserts `tuple` for bulk loading: appends without necessarily
    /// maintaining sortedness/compression invariants. Callers must call
    /// [`TupleStorageSubBlock::rebuild`] before relying on those invariants
    /// or on fast-path predicate matching again.
    ///
    /// # Errors
    ///
    /// Same as [`TupleStorageSubBlock::insert`].
    fn insert_in_batch(&mut self, tuple: &Tuple, policy: ConversionPolicy) -> Result<InsertResult>;

    /// Deletes `tuple_id`. Returns whether other tuples' ids were mutated
    /// (see [`InsertResult::ids_mutated`]).
    fn delete(&mut self, tuple_id: TupleId) -> bool;

    /// Reads the value of `attr` for `tuple_id`.
    fn get_attribute_value(&self, tuple_id: TupleId, attr: AttributeId) -> Value;

    /// Finds the tuples matching `predicate`, using a fast path when the
    /// predicate's shape matches this store's sort/compression structure
    /// and falling back to a full scan otherwise.
    fn get_matches_for_predicate(&self, predicate: &Predicate) -> Vec<TupleId>;

    /// Restores every invariant a prior [`TupleStorageSubBlock::insert_in_batch`]
    /// call may have deferred (re-sorts, recomputes compression dictionaries).
    fn rebuild(&mut self);

    /// Whether this store holds any compressed attributes.
    fn is_compressed(&self) -> bool;
}

/// A tuple storage sub-block of one of the four kinds this engine supports.
#[enum_dispatch(TupleStorageSubBlock)]
pub enum Tssb {
    /// See [`RowStore`].
    RowStore(RowStore),
    /// See [`ColumnStore`].
    ColumnStore(ColumnStore),
    /// See [`CompressedRowStore`].
    CompressedRowStore(CompressedRowStore),
    /// See [`CompressedColumnStore`].
    CompressedColumnStore(CompressedColumnStore),
}

/// Writes `value`, converted/padded to `ty`'s fixed byte width, into `out`.
///
/// # Panics
///
/// Panics if `value` does not already match `ty`'s fixed width — callers are
/// expected to have converted via [`Value::convert`] first.
pub(crate) fn encode_fixed(value: &Value, ty: crate::value::ValueType, out: &mut [u8]) {
    let width = ty.fixed_byte_length().expect("fixed-width type");
    assert_eq!(out.len(), width, "destination slice must match type width");
    match value {
        Value::Int(i) => out.copy_from_slice(&i.to_be_bytes()),
        Value::Double(d) => out.copy_from_slice(&d.to_be_bytes()),
        Value::Char(bytes) => {
            assert_eq!(bytes.len(), width, "char value must already be padded");
            out.copy_from_slice(bytes);
        }
        Value::Null => panic!("NULL cannot be encoded into a fixed-width non-nullable column"),
    }
}

/// Reads a value of type `ty` back out of `bytes` (the inverse of
/// [`encode_fixed`]).
pub(crate) fn decode_fixed(bytes: &[u8], ty: crate::value::ValueType) -> Value {
    match ty {
        crate::value::ValueType::Int => {
            Value::Int(i64::from_be_bytes(bytes.try_into().expect("8 bytes")))
        }
        crate::value::ValueType::Double => {
            Value::Double(f64::from_be_bytes(bytes.try_into().expect("8 bytes")))
        }
        crate::value::ValueType::Char { .. } | crate::value::ValueType::VarChar { .. } => {
            Value::Char(bytes.to_vec())
        }
    }
}
