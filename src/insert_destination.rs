// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Insert destinations: how a bulk load or a selection query's output
//! chooses which block to write the next tuple into.
//!
//! Grounded on `storage/InsertDestination.{hpp,cpp}`'s `AlwaysCreateBlock`/
//! `BlockPoolInsertDestination` pair. Both concrete policies here guard
//! their block-pool state with a single [`std::sync::Mutex`] (spec §5: no
//! `parking_lot`), so either can be shared across the parallel scan
//! executor's selection workers via an `Arc`.

use crate::block_manager::{BlockId, BlockManager};
use crate::catalog::Relation;
use crate::layout::Layout;
use std::sync::Mutex;

/// How an [`InsertDestination`] obtains and reclaims blocks to write into.
pub trait InsertDestination: Send + Sync {
    /// Returns a block id ready to receive the next tuple. May create a new
    /// block in `manager` if the policy has none ready.
    ///
    /// # Panics
    ///
    /// Panics if block creation fails — an insert destination that cannot
    /// allocate a block for its own relation/layout is a configuration bug.
    fn get_block_for_insert(&self, manager: &Mutex<BlockManager>) -> BlockId;

    /// Returns `id` once a worker is done writing to it for now.
    /// `full` signals the block has no more room, so a pooled policy should
    /// not hand it out again.
    fn return_block(&self, id: BlockId, full: bool);

    /// Every block id this destination has handed out, in no particular
    /// order — the set a caller should scan once loading/selection is done.
    fn touched_blocks(&self) -> Vec<BlockId>;
}

struct Shared {
    relation: Relation,
    layout_template: Layout,
}

impl Shared {
    fn create_block(&self, manager: &Mutex<BlockManager>) -> BlockId {
        manager
            .lock()
            .expect("block manager mutex poisoned")
            .create(self.relation.clone(), self.layout_template.clone())
            .expect("insert destination failed to allocate a new block")
    }
}

/// Always hands out a brand-new block per request, never reusing one.
/// Matches the source system's `AlwaysCreateBlock` policy: simplest
/// possible, at the cost of leaving partially-filled blocks behind.
pub struct AlwaysNewDestination {
    shared: Shared,
    touched: Mutex<Vec<BlockId>>,
}

impl AlwaysNewDestination {
    /// Builds a destination that creates a fresh block of `layout_template`
    /// for `relation` every time one is requested.
    #[must_use]
    pub fn new(relation: Relation, layout_template: Layout) -> Self {
        Self {
            shared: Shared {
                relation,
                layout_template,
            },
            touched: Mutex::new(Vec::new()),
        }
    }
}

impl InsertDestination for AlwaysNewDestination {
    fn get_block_for_insert(&self, manager: &Mutex<BlockManager>) -> BlockId {
        let id = self.shared.create_block(manager);
        self.touched.lock().expect("mutex poisoned").push(id);
        id
    }

    fn return_block(&self, _id: BlockId, _full: bool) {}

    fn touched_blocks(&self) -> Vec<BlockId> {
        self.touched.lock().expect("mutex poisoned").clone()
    }
}

/// Hands out blocks from a pool, recycling any returned non-full block
/// before creating a new one. Matches the source system's
/// `BlockPoolInsertDestination`.
pub struct PooledDestination {
    shared: Shared,
    available: Mutex<Vec<BlockId>>,
    done: Mutex<Vec<BlockId>>,
}

impl PooledDestination {
    /// Builds an empty pool; blocks are created lazily on first request
    /// unless seeded via [`PooledDestination::seed`].
    #[must_use]
    pub fn new(relation: Relation, layout_template: Layout) -> Self {
        Self {
            shared: Shared {
                relation,
                layout_template,
            },
            available: Mutex::new(Vec::new()),
            done: Mutex::new(Vec::new()),
        }
    }

    /// Seeds the pool with pre-existing blocks (e.g. ones left
    /// partially-filled by a previous load) so they are reused before any
    /// new block is created.
    pub fn seed(&self, ids: impl IntoIterator<Item = BlockId>) {
        self.available.lock().expect("mutex poisoned").extend(ids);
    }
}

impl InsertDestination for PooledDestination {
    fn get_block_for_insert(&self, manager: &Mutex<BlockManager>) -> BlockId {
        if let Some(id) = self.available.lock().expect("mutex poisoned").pop() {
            return id;
        }
        self.shared.create_block(manager)
    }

    fn return_block(&self, id: BlockId, full: bool) {
        if full {
            self.done.lock().expect("mutex poisoned").push(id);
        } else {
            self.available.lock().expect("mutex poisoned").push(id);
        }
    }

    fn touched_blocks(&self) -> Vec<BlockId> {
        let mut ids = self.done.lock().expect("mutex poisoned").clone();
        ids.extend(self.available.lock().expect("mutex poisoned").iter().copied());
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Attribute;
    use crate::layout::TssbKind;
    use crate::value::ValueType;

    fn relation() -> Relation {
        Relation::new("t", vec![Attribute::new(0, "a", ValueType::Int, false)])
    }

    #[test]
    fn always_new_never_reuses() {
        let r = relation();
        let layout = Layout::new(&r, TssbKind::RowStore, vec![], None, 1);
        let manager = Mutex::new(BlockManager::new());
        let dest = AlwaysNewDestination::new(r, layout);

        let a = dest.get_block_for_insert(&manager);
        dest.return_block(a, false);
        let b = dest.get_block_for_insert(&manager);
        assert_ne!(a, b);
        assert_eq!(dest.touched_blocks().len(), 2);
    }

    #[test]
    fn pooled_reuses_non_full_returns() {
        let r = relation();
        let layout = Layout::new(&r, TssbKind::RowStore, vec![], None, 1);
        let manager = Mutex::new(BlockManager::new());
        let dest = PooledDestination::new(r, layout);

        let a = dest.get_block_for_insert(&manager);
        dest.return_block(a, false);
        let b = dest.get_block_for_insert(&manager);
        assert_eq!(a, b);

        dest.return_block(b, true);
        let c = dest.get_block_for_insert(&manager);
        assert_ne!(b, c);
    }
}
