// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The serialized block header: layout description plus finalized sizes and
//! per-index consistency flags.
//!
//! Grounded on `storage/StorageBlockLayout.cpp`'s `finalize()`/`copyHeaderTo()`
//! and `storage/StorageBlock.hpp`'s `block_header_` member. Implements the
//! wire format from spec §6: 4 magic bytes, a 4-byte length prefix, then the
//! encoded header payload.

use crate::allocator::SLOT;
use crate::catalog::Relation;
use crate::coding::{read_vec, write_vec, Decode, DecodeError, Encode, EncodeError, MAGIC_BYTES};
use crate::layout::{BloomDescriptor, IndexKind, Layout, TssbKind};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// The header stamped at the front of every block's memory region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Tuple-store kind.
    pub tssb_kind: TssbKind,
    /// Index kinds, in declaration order.
    pub index_kinds: Vec<IndexKind>,
    /// Optional bloom-filter descriptor.
    pub bloom: Option<BloomDescriptor>,
    /// Number of slots this block occupies.
    pub num_slots: u32,
    /// Byte size of the tuple-store region.
    pub tuple_store_size: u32,
    /// Byte size of each index region, parallel to `index_kinds`.
    pub index_sizes: Vec<u32>,
    /// Whether each index is currently consistent, parallel to `index_kinds`.
    pub index_consistent: Vec<bool>,
    /// Byte size of the bloom-filter region, if present.
    pub bloom_filter_size: Option<u32>,
}

impl Header {
    /// Builds and finalizes a header for `layout` applied to `relation`,
    /// distributing the block's available bytes across sub-blocks in
    /// proportion to their per-tuple byte estimates (spec §4.3).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TupleTooLarge`]-shaped failure via
    /// `Err(HeaderTooLarge)` is not modeled separately; instead this
    /// function panics if the header itself cannot fit in the region, since
    /// that only happens with a pathological layout (huge numbers of
    /// indexes/compressed attributes) that the caller should have rejected
    /// earlier. Region-too-small for a *sub-block's own metadata* is instead
    /// detected at sub-block construction time (spec §4.4).
    #[must_use]
    pub fn finalize(layout: &Layout, relation: &Relation) -> Self {
        let region_bytes = layout.num_slots() * SLOT;

        // Step 1+2: build a zero-sized header to measure its own length.
        let mut header = Self {
            tssb_kind: layout.tssb_kind().clone(),
            index_kinds: layout.indexes().to_vec(),
            bloom: layout.bloom().cloned(),
            num_slots: u32::try_from(layout.num_slots()).expect("num_slots fits u32"),
            tuple_store_size: 0,
            index_sizes: vec![0; layout.indexes().len()],
            index_consistent: vec![true; layout.indexes().len()],
            bloom_filter_size: layout.bloom().map(|_| 0),
        };

        let header_len = header.encode_into_vec().len() + 8;
        assert!(
            header_len <= region_bytes,
            "header does not fit in block region"
        );

        // Step 3: per-sub-block byte estimates.
        let tuple_store_estimate = layout.tuple_store_estimate(relation);
        let index_estimates: Vec<usize> = layout
            .indexes()
            .iter()
            .map(Layout::index_estimate)
            .collect();
        let bloom_estimate = layout.bloom().map(|_| Layout::bloom_estimate());

        let mut total_estimate = tuple_store_estimate;
        total_estimate += index_estimates.iter().sum::<usize>();
        if let Some(e) = bloom_estimate {
            total_estimate += e;
        }

        // Step 4: distribute remaining bytes proportionally, remainder to
        // the tuple store.
        let remaining = region_bytes.saturating_sub(header_len);
        let mut distributed = 0usize;

        let index_sizes: Vec<u32> = index_estimates
            .iter()
            .map(|&e| {
                let size = remaining * e / total_estimate;
                distributed += size;
                u32::try_from(size).expect("index size fits u32")
            })
            .collect();

        let bloom_filter_size = bloom_estimate.map(|e| {
            let size = remaining * e / total_estimate;
            distributed += size;
            u32::try_from(size).expect("bloom size fits u32")
        });

        let tuple_store_size =
            u32::try_from(remaining.saturating_sub(distributed)).expect("tuple store size fits u32");

        header.index_sizes = index_sizes;
        header.bloom_filter_size = bloom_filter_size;
        header.tuple_store_size = tuple_store_size;
        header
    }

    /// The total serialized length of this header, including the 4 magic
    /// bytes and the 4-byte length prefix.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        8 + self.encode_into_vec().len()
    }

    /// Validates this header's layout description against `relation`,
    /// rejecting blocks whose declared kinds are no longer valid (e.g. the
    /// relation's schema changed since the block was written).
    #[must_use]
    pub fn is_valid_for(&self, relation: &Relation) -> bool {
        self.tssb_kind.is_valid_for(relation)
            && self.index_kinds.iter().all(|k| k.is_valid_for(relation))
            && self.index_sizes.len() == self.index_kinds.len()
            && self.index_consistent.len() == self.index_kinds.len()
    }
}

impl Encode for Header {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.tssb_kind.encode_into(writer)?;
        write_vec(writer, &self.index_kinds, |w, k| k.encode_into(w))?;

        match &self.bloom {
            Some(b) => {
                writer.write_u8(1)?;
                writer.write_u32::<BigEndian>(b.attribute)?;
            }
            None => writer.write_u8(0)?,
        }

        writer.write_u32::<BigEndian>(self.num_slots)?;
        writer.write_u32::<BigEndian>(self.tuple_store_size)?;

        write_vec(writer, &self.index_sizes, |w, s| {
            w.write_u32::<BigEndian>(*s)?;
            Ok(())
        })?;
        write_vec(writer, &self.index_consistent, |w, c| {
            w.write_u8(u8::from(*c))?;
            Ok(())
        })?;

        match self.bloom_filter_size {
            Some(s) => {
                writer.write_u8(1)?;
                writer.write_u32::<BigEndian>(s)?;
            }
            None => writer.write_u8(0)?,
        }
        Ok(())
    }
}

impl Decode for Header {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tssb_kind = TssbKind::decode_from(reader)?;
        let index_kinds = read_vec(reader, IndexKind::decode_from)?;

        let bloom = match reader.read_u8()? {
            0 => None,
            1 => Some(BloomDescriptor {
                attribute: reader.read_u32::<BigEndian>()?,
            }),
            other => return Err(DecodeError::InvalidTag(other)),
        };

        let num_slots = reader.read_u32::<BigEndian>()?;
        let tuple_store_size = reader.read_u32::<BigEndian>()?;
        let index_sizes = read_vec(reader, |r| Ok(r.read_u32::<BigEndian>()?))?;
        let index_consistent = read_vec(reader, |r| Ok(r.read_u8()? != 0))?;

        let bloom_filter_size = match reader.read_u8()? {
            0 => None,
            1 => Some(reader.read_u32::<BigEndian>()?),
            other => return Err(DecodeError::InvalidTag(other)),
        };

        Ok(Self {
            tssb_kind,
            index_kinds,
            bloom,
            num_slots,
            tuple_store_size,
            index_sizes,
            index_consistent,
            bloom_filter_size,
        })
    }
}

/// Writes `header` to the front of `memory`, stamped with [`MAGIC_BYTES`] and
/// prefixed with its byte length (little-endian, per the on-wire format).
///
/// # Panics
///
/// Panics if `memory` is too small to hold the serialized header.
pub fn write_header(memory: &mut [u8], header: &Header) {
    let body = header.encode_into_vec();
    let len = u32::try_from(body.len()).expect("header body fits u32");
    assert!(memory.len() >= 8 + body.len(), "region too small for header");
    memory[0..4].copy_from_slice(&MAGIC_BYTES);
    memory[4..8].copy_from_slice(&len.to_le_bytes());
    memory[8..8 + body.len()].copy_from_slice(&body);
}

/// Reads a header from the front of `memory`.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidMagic`] if the region doesn't start with
/// [`MAGIC_BYTES`], or another [`DecodeError`] if the length prefix claims
/// more bytes than `memory` holds, or if the payload fails to parse.
/// Malformed headers are a fatal condition per spec §7 — callers reopening a
/// block should treat any `Err` here as "abort", not retry.
pub fn read_header(memory: &[u8]) -> Result<(Header, usize), DecodeError> {
    if memory.len() < 8 {
        return Err(DecodeError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "region smaller than header magic and length prefix",
        )));
    }
    if memory[0..4] != MAGIC_BYTES {
        return Err(DecodeError::InvalidMagic);
    }
    let len = u32::from_le_bytes([memory[4], memory[5], memory[6], memory[7]]) as usize;
    if memory.len() < 8 + len {
        return Err(DecodeError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "region smaller than declared header length",
        )));
    }
    let mut cursor = std::io::Cursor::new(&memory[8..8 + len]);
    let header = Header::decode_from(&mut cursor)?;
    Ok((header, 8 + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Attribute;
    use crate::layout::Layout;
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

    #[test]
    fn header_round_trips_through_memory() {
        let r = relation();
        let layout = Layout::new(&r, TssbKind::RowStore, vec![], None, 1);
        let header = Header::finalize(&layout, &r);

        let mut mem = vec![0u8; 1024 * 1024];
        write_header(&mut mem, &header);
        let (decoded, consumed) = read_header(&mem).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(consumed, header.serialized_len());
    }

    #[test]
    fn finalize_distributes_remaining_bytes_to_tuple_store_when_no_subblocks() {
        let r = relation();
        let layout = Layout::new(&r, TssbKind::RowStore, vec![], None, 1);
        let header = Header::finalize(&layout, &r);
        let region_bytes = SLOT;
        assert_eq!(
            header.tuple_store_size as usize,
            region_bytes - header.serialized_len()
        );
    }

    #[test]
    fn reopen_with_truncated_region_is_malformed() {
        let r = relation();
        let layout = Layout::new(&r, TssbKind::RowStore, vec![], None, 1);
        let header = Header::finalize(&layout, &r);

        let mut full = vec![0u8; header.serialized_len()];
        write_header(&mut full, &header);

        let truncated = &full[..full.len() - 1];
        assert!(read_header(truncated).is_err());
    }
}
