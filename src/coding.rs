// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Self-describing binary encoding for block headers and layout descriptions.
//!
//! Fields are written in a fixed order with explicit tag bytes for the
//! variant/optional pieces (tuple-store kind, index kinds, the bloom-filter
//! descriptor), so that new tag numbers can be introduced without
//! invalidating previously-serialized block headers.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Error during serialization.
#[derive(Debug)]
pub enum EncodeError {
    /// I/O error writing to the destination.
    Io(std::io::Error),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "encode I/O error: {e}"),
        }
    }
}

impl std::error::Error for EncodeError {}

impl From<std::io::Error> for EncodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Error during deserialization.
#[derive(Debug)]
pub enum DecodeError {
    /// I/O error reading from the source.
    Io(std::io::Error),

    /// The header did not match the expected magic bytes.
    InvalidMagic,

    /// A tag byte did not correspond to any known variant.
    InvalidTag(u8),

    /// A string field contained invalid UTF-8.
    InvalidUtf8,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "decode I/O error: {e}"),
            Self::InvalidMagic => write!(f, "invalid magic bytes"),
            Self::InvalidTag(t) => write!(f, "invalid tag byte: {t}"),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 in string field"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Magic bytes stamped at the start of every serialized block header.
pub const MAGIC_BYTES: [u8; 4] = *b"SXPL";

/// Trait for types that can be serialized into the block header wire format.
pub trait Encode {
    /// Serializes `self` into `writer`.
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError>;

    /// Serializes `self` into a freshly-allocated vector.
    fn encode_into_vec(&self) -> Vec<u8> {
        let mut v = Vec::new();
        self.encode_into(&mut v).expect("writing to a Vec cannot fail");
        v
    }
}

/// Trait for types that can be deserialized from the block header wire
/// format.
pub trait Decode: Sized {
    /// Deserializes a value of `Self` from `reader`.
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError>;
}

/// Writes a length-prefixed byte string (`u32` big-endian length + bytes).
pub fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<(), EncodeError> {
    writer.write_u32::<BigEndian>(
        u32::try_from(bytes.len()).expect("field length fits in u32"),
    )?;
    writer.write_all(bytes)?;
    Ok(())
}

/// Reads a length-prefixed byte string written by [`write_bytes`].
pub fn read_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>, DecodeError> {
    let len = reader.read_u32::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Writes a `u32` count followed by each element via `write_elem`.
pub fn write_vec<W: Write, T, F>(
    writer: &mut W,
    items: &[T],
    mut write_elem: F,
) -> Result<(), EncodeError>
where
    F: FnMut(&mut W, &T) -> Result<(), EncodeError>,
{
    writer.write_u32::<BigEndian>(
        u32::try_from(items.len()).expect("item count fits in u32"),
    )?;
    for item in items {
        write_elem(writer, item)?;
    }
    Ok(())
}

/// Reads a `u32` count followed by that many elements via `read_elem`.
pub fn read_vec<R: Read, T, F>(reader: &mut R, mut read_elem: F) -> Result<Vec<T>, DecodeError>
where
    F: FnMut(&mut R) -> Result<T, DecodeError>,
{
    let count = reader.read_u32::<BigEndian>()? as usize;
    let mut items = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        items.push(read_elem(reader)?);
    }
    Ok(items)
}
