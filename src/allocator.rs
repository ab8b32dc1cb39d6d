// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The slab allocator: hands out contiguous runs of fixed-size slots.
//!
//! Grounded on `storage/StorageManager.{hpp,cpp}`'s slot/chunk bookkeeping.
//! The original memory-maps chunk files; since this crate has no on-disk
//! persistence (a Non-goal), chunk memory here is plain heap storage handed
//! directly to the caller of [`SlabAllocator::acquire`] rather than retained
//! and re-sliced by the allocator itself — see `DESIGN.md` for why this
//! simplification still satisfies every spec-level contract (free-bitmap
//! first-fit, chunk growth, `slot_address` arithmetic, zero-init).

/// Number of slots per chunk.
pub const CHUNK: usize = 256;

/// Bytes per slot (1 MiB).
pub const SLOT: usize = 1024 * 1024;

/// First-fit slab allocator over a free-bitmap, growing by one chunk at a
/// time on exhaustion.
pub struct SlabAllocator {
    /// `free[i]` is true iff slot `i` is available.
    free: Vec<bool>,
}

impl SlabAllocator {
    /// Creates an allocator with no chunks yet.
    #[must_use]
    pub fn new() -> Self {
        Self { free: Vec::new() }
    }

    /// Number of chunks currently owned by this allocator.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.free.len() / CHUNK
    }

    fn chunk_base(chunk: usize) -> usize {
        chunk * CHUNK
    }

    /// The byte address of slot `i`, as `chunk_base(i / CHUNK) + (i % CHUNK) * SLOT`.
    #[must_use]
    pub fn slot_address(i: usize) -> usize {
        Self::chunk_base(i / CHUNK) * SLOT + (i % CHUNK) * SLOT
    }

    fn grow_one_chunk(&mut self) {
        self.free.resize(self.free.len() + CHUNK, true);
        log::debug!(
            "slab allocator grew to {} chunk(s)",
            self.chunk_count()
        );
    }

    /// Finds and marks `n` contiguous free slots, growing the allocator by
    /// one chunk at a time until a run is found. Returns the index of the
    /// first slot in the run.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0 or exceeds [`CHUNK`] — a run can never cross a
    /// chunk boundary, so such a request can never be satisfied. This is a
    /// programmer error (fatal, per the error taxonomy), not a soft failure.
    pub fn acquire(&mut self, n: usize) -> usize {
        assert!((1..=CHUNK).contains(&n), "acquire(n) requires 1 <= n <= CHUNK");

        loop {
            if let Some(start) = self.find_run(n) {
                for slot in &mut self.free[start..start + n] {
                    *slot = false;
                }
                return start;
            }
            self.grow_one_chunk();
        }
    }

    fn find_run(&self, n: usize) -> Option<usize> {
        let chunks = self.chunk_count();
        for chunk in 0..chunks {
            let base = chunk * CHUNK;
            let mut run_start = None;
            let mut run_len = 0usize;
            for offset in 0..CHUNK {
                if self.free[base + offset] {
                    if run_start.is_none() {
                        run_start = Some(offset);
                    }
                    run_len += 1;
                    if run_len == n {
                        return Some(base + run_start.expect("run_start set once run_len > 0"));
                    }
                } else {
                    run_start = None;
                    run_len = 0;
                }
            }
        }
        None
    }

    /// Marks `n` slots starting at `i` as free again. The underlying chunk
    /// memory (owned by the caller, see module docs) is not reclaimed by
    /// this call.
    ///
    /// # Panics
    ///
    /// Panics if `[i, i + n)` falls outside any chunk this allocator owns —
    /// releasing an unknown range is a programmer error.
    pub fn release(&mut self, i: usize, n: usize) {
        assert!(
            i + n <= self.free.len(),
            "release() range out of bounds for this allocator"
        );
        for slot in &mut self.free[i..i + n] {
            *slot = true;
        }
    }

    /// Returns a freshly allocated, optionally zeroed, byte buffer of
    /// `n * SLOT` bytes for the caller to use as block memory. `Vec<u8>` is
    /// always zero-initialized by Rust's allocator machinery regardless of
    /// the `zero-init` feature; the feature only controls whether that fact
    /// is asserted/logged, mirroring the source system's build-time
    /// zero-initialization toggle.
    #[must_use]
    pub fn acquire_memory(n: usize) -> Vec<u8> {
        let buf = vec![0u8; n * SLOT];
        #[cfg(feature = "zero-init")]
        log::trace!("acquired {} zero-initialized slot(s)", n);
        buf
    }
}

impl Default for SlabAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_full_chunk_fits_in_one_chunk() {
        let mut alloc = SlabAllocator::new();
        let start = alloc.acquire(CHUNK);
        assert_eq!(start, 0);
        assert_eq!(alloc.chunk_count(), 1);
    }

    #[test]
    fn acquire_grows_on_exhaustion() {
        let mut alloc = SlabAllocator::new();
        alloc.acquire(CHUNK);
        let second = alloc.acquire(1);
        assert_eq!(second, CHUNK);
        assert_eq!(alloc.chunk_count(), 2);
    }

    #[test]
    fn release_then_reacquire_first_fit() {
        let mut alloc = SlabAllocator::new();
        let a = alloc.acquire(10);
        let _b = alloc.acquire(10);
        alloc.release(a, 10);
        let c = alloc.acquire(5);
        assert_eq!(c, a);
    }

    #[test]
    #[should_panic]
    fn acquire_more_than_chunk_is_fatal() {
        let mut alloc = SlabAllocator::new();
        alloc.acquire(CHUNK + 1);
    }

    #[test]
    fn slot_address_is_contiguous_within_chunk() {
        assert_eq!(SlabAllocator::slot_address(0), 0);
        assert_eq!(SlabAllocator::slot_address(1), SLOT);
        assert_eq!(SlabAllocator::slot_address(CHUNK), CHUNK * SLOT);
    }
}
