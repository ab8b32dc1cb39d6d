// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Attribute value types and the runtime values that inhabit them.
//!
//! Grounded on the source system's `IntType`/`FloatType`/`DoubleType` plus a
//! fixed-length char type (`types/IntType.hpp`, `types/DoubleType.hpp`), and
//! its three-level type-conversion policy (`types/AllowedTypeConversion.hpp`).

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::Ordering;
use std::io::{Read, Write};

/// The type of an attribute: fixed or variable byte length, and whatever is
/// needed to compute byte lengths and comparisons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 8-byte signed integer.
    Int,
    /// 8-byte IEEE-754 double.
    Double,
    /// Fixed-length character string of `len` bytes, space-padded.
    Char {
        /// Fixed width in bytes.
        len: u16,
    },
    /// Variable-length character string with a byte cap.
    VarChar {
        /// Maximum width in bytes.
        max_len: u16,
    },
}

impl ValueType {
    /// The fixed on-disk byte width of this type, or `None` if variable.
    #[must_use]
    pub fn fixed_byte_length(self) -> Option<usize> {
        match self {
            Self::Int => Some(8),
            Self::Double => Some(8),
            Self::Char { len } => Some(len as usize),
            Self::VarChar { .. } => None,
        }
    }

    /// The maximum byte length a value of this type can occupy.
    #[must_use]
    pub fn max_byte_length(self) -> usize {
        match self {
            Self::Int | Self::Double => 8,
            Self::Char { len } => len as usize,
            Self::VarChar { max_len } => max_len as usize,
        }
    }

    /// Whether values of this type have a total order (required for sort
    /// columns and range/equality predicates).
    #[must_use]
    pub fn is_comparable(self) -> bool {
        true
    }

    fn tag(self) -> u8 {
        match self {
            Self::Int => 0,
            Self::Double => 1,
            Self::Char { .. } => 2,
            Self::VarChar { .. } => 3,
        }
    }
}

impl Encode for ValueType {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u8(self.tag())?;
        match *self {
            Self::Int | Self::Double => {}
            Self::Char { len } | Self::VarChar { max_len: len } => {
                writer.write_u16::<BigEndian>(len)?;
            }
        }
        Ok(())
    }
}

impl Decode for ValueType {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        Ok(match tag {
            0 => Self::Int,
            1 => Self::Double,
            2 => Self::Char {
                len: reader.read_u16::<BigEndian>()?,
            },
            3 => Self::VarChar {
                max_len: reader.read_u16::<BigEndian>()?,
            },
            other => return Err(DecodeError::InvalidTag(other)),
        })
    }
}

/// How aggressively a value may be coerced to fit an attribute's declared
/// type on insert. Mirrors the source system's `AllowedTypeConversion`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversionPolicy {
    /// The value's type must already equal the attribute's type.
    Exact,
    /// Lossless widening is permitted (`Int -> Double`).
    SafeWidening,
    /// Any coercible conversion is permitted, including lossy narrowing.
    Unsafe,
}

/// A runtime attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Signed 64-bit integer.
    Int(i64),
    /// IEEE-754 double.
    Double(f64),
    /// Character data (not necessarily padded to the attribute's fixed
    /// width; storage sub-blocks pad/truncate as needed).
    Char(Vec<u8>),
    /// SQL NULL.
    Null,
}

impl Value {
    /// The byte length this value occupies in its natural representation.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Int(_) | Self::Double(_) => 8,
            Self::Char(bytes) => bytes.len(),
            Self::Null => 0,
        }
    }

    /// Converts `self` to match `target`, applying `policy`. Returns `None`
    /// if the conversion is not permitted.
    #[must_use]
    pub fn convert(&self, target: ValueType, policy: ConversionPolicy) -> Option<Value> {
        if matches!(self, Self::Null) {
            return Some(Self::Null);
        }
        match (self, target) {
            (Self::Int(_), ValueType::Int) | (Self::Double(_), ValueType::Double) => {
                Some(self.clone())
            }
            (Self::Char(b), ValueType::Char { len }) if policy != ConversionPolicy::Exact => {
                Some(pad_or_truncate(b, len as usize, policy))
            }
            (Self::Char(b), ValueType::Char { len }) if b.len() == len as usize => {
                Some(self.clone())
            }
            (Self::Char(b), ValueType::VarChar { max_len })
                if b.len() <= max_len as usize =>
            {
                Some(self.clone())
            }
            (Self::Int(i), ValueType::Double) if policy != ConversionPolicy::Exact => {
                Some(Self::Double(*i as f64))
            }
            (Self::Double(d), ValueType::Int) if policy == ConversionPolicy::Unsafe => {
                Some(Self::Int(*d as i64))
            }
            _ => None,
        }
    }

    /// Total-order comparison between two values of the *same* kind.
    ///
    /// # Panics
    ///
    /// Panics if `self` and `other` are not the same variant — callers are
    /// expected to have already validated type compatibility (e.g. via the
    /// catalog), matching the source system's debug-only type assertions.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Double(a), Self::Double(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Self::Char(a), Self::Char(b)) => a.cmp(b),
            (Self::Null, Self::Null) => Ordering::Equal,
            _ => panic!("compare() called on incomparable value kinds"),
        }
    }
}

fn pad_or_truncate(bytes: &[u8], len: usize, _policy: ConversionPolicy) -> Value {
    let mut v = bytes.to_vec();
    v.resize(len, b' ');
    v.truncate(len);
    Value::Char(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_round_trip() {
        for ty in [
            ValueType::Int,
            ValueType::Double,
            ValueType::Char { len: 20 },
            ValueType::VarChar { max_len: 255 },
        ] {
            let bytes = ty.encode_into_vec();
            let decoded = ValueType::decode_from(&mut std::io::Cursor::new(bytes)).unwrap();
            assert_eq!(ty, decoded);
        }
    }

    #[test]
    fn widening_conversion() {
        let v = Value::Int(42);
        assert_eq!(
            v.convert(ValueType::Double, ConversionPolicy::SafeWidening),
            Some(Value::Double(42.0))
        );
        assert_eq!(v.convert(ValueType::Double, ConversionPolicy::Exact), None);
    }

    #[test]
    fn char_padding() {
        let v = Value::Char(b"hi".to_vec());
        let converted = v
            .convert(ValueType::Char { len: 5 }, ConversionPolicy::SafeWidening)
            .unwrap();
        assert_eq!(converted, Value::Char(b"hi   ".to_vec()));
    }

    #[test]
    fn total_order_on_ints() {
        assert_eq!(Value::Int(1).compare(&Value::Int(2)), Ordering::Less);
    }
}
