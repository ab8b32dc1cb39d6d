// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The block manager: assigns block identifiers and owns the slab allocator.
//!
//! Grounded on `storage/StorageManager.{hpp,cpp}`'s
//! `createBlock`/`getBlockMutable`/`deleteBlock`. Not thread-safe by itself
//! (spec §4.2 explicit); callers serialise access — the parallel scan
//! executor (§4.7) only calls [`BlockManager::get`], a shared read.

use crate::allocator::{SlabAllocator, SLOT};
use crate::block::Block;
use crate::catalog::Relation;
use crate::layout::Layout;
use crate::Result;
use std::collections::HashMap;

/// Globally unique, monotonically increasing block identifier.
pub type BlockId = u64;

struct Entry {
    block: Block,
    slot_start: usize,
    num_slots: usize,
}

/// Owns the slab allocator and the id → block map for a single relation's
/// worth of blocks.
pub struct BlockManager {
    allocator: SlabAllocator,
    blocks: HashMap<BlockId, Entry>,
    next_id: BlockId,
}

impl BlockManager {
    /// Builds an empty block manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allocator: SlabAllocator::new(),
            blocks: HashMap::new(),
            next_id: 0,
        }
    }

    /// Creates a new block for `relation` under `layout`, claiming
    /// `layout.num_slots()` contiguous slots from the allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if any sub-block named by `layout` cannot be
    /// constructed over its assigned region (see [`Block::new`]).
    pub fn create(&mut self, relation: Relation, layout: Layout) -> Result<BlockId> {
        let num_slots = layout.num_slots();
        let slot_start = self.allocator.acquire(num_slots);
        let block = match Block::new(relation, layout) {
            Ok(block) => block,
            Err(e) => {
                self.allocator.release(slot_start, num_slots);
                return Err(e);
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        log::debug!("block {id} created ({num_slots} slot(s) at {slot_start})");
        self.blocks.insert(
            id,
            Entry {
                block,
                slot_start,
                num_slots,
            },
        );
        Ok(id)
    }

    /// Looks up a block by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` names no block this manager owns — accessing an
    /// unknown block id is a programmer error (fatal, per spec §7).
    #[must_use]
    pub fn get(&self, id: BlockId) -> &Block {
        &self.blocks.get(&id).unwrap_or_else(|| panic!("no such block {id}")).block
    }

    /// Mutably looks up a block by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` names no block this manager owns.
    pub fn get_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self
            .blocks
            .get_mut(&id)
            .unwrap_or_else(|| panic!("no such block {id}"))
            .block
    }

    /// Every block id currently live in this manager.
    #[must_use]
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.keys().copied().collect()
    }

    /// Destroys the block, releasing its slot range back to the allocator.
    ///
    /// # Panics
    ///
    /// Panics if `id` names no block this manager owns.
    pub fn evict(&mut self, id: BlockId) {
        let entry = self
            .blocks
            .remove(&id)
            .unwrap_or_else(|| panic!("no such block {id}"));
        self.allocator.release(entry.slot_start, entry.num_slots);
        log::debug!("block {id} evicted");
    }

    /// The byte size in use by blocks managed here (slot count times
    /// [`SLOT`]), ignoring [`CHUNK`] padding the allocator may still hold.
    #[must_use]
    pub fn bytes_in_use(&self) -> usize {
        self.blocks.values().map(|e| e.num_slots * SLOT).sum()
    }
}

impl Default for BlockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Attribute, Relation};
    use crate::layout::TssbKind;
    use crate::value::ValueType;

    fn relation() -> Relation {
        Relation::new("t", vec![Attribute::new(0, "a", ValueType::Int, false)])
    }

    #[test]
    fn create_then_get_then_evict() {
        let mut mgr = BlockManager::new();
        let r = relation();
        let layout = Layout::new(&r, TssbKind::RowStore, vec![], None, 1);
        let id = mgr.create(r, layout).unwrap();
        assert!(mgr.get(id).num_tuples() == 0);
        mgr.evict(id);
        assert!(mgr.block_ids().is_empty());
    }

    #[test]
    fn ids_are_monotonic() {
        let mut mgr = BlockManager::new();
        let r = relation();
        let a = mgr.create(r.clone(), Layout::new(&r, TssbKind::RowStore, vec![], None, 1)).unwrap();
        let b = mgr.create(r.clone(), Layout::new(&r, TssbKind::RowStore, vec![], None, 1)).unwrap();
        assert!(b > a);
    }
}
