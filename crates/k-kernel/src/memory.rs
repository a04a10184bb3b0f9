// SPDX-License-Identifier: Apache-2.0
// Copyright 2025-2026 Kestrel Embedded Systems

//! Kernel heap
//!
//! A single statically-sized arena serving the kernel's own small dynamic
//! allocations (timers, partitions, setup-time objects). It is completely
//! separate from task stacks and is not on any per-tick path.
//!
//! The arena is an array of machine words and block headers are embedded in
//! it: every block starts with a four-word header carrying a FREE/USED tag
//! word, the word indices of its physical neighbors, and (meaningful for
//! free blocks) the next entry of the address-sorted free list. Block sizes
//! are derived from the neighbor links, so free and used blocks tile the
//! arena by construction and the tiling is cheap to audit.
//!
//! Allocation is first-fit over the free list; a block is split unless the
//! remainder could not hold a header plus one word. Freeing coalesces with
//! whichever physical neighbors are free (0, 1 or 2 merges), so no two
//! adjacent free blocks ever exist.
//!
//! All navigation is index arithmetic over the arena array - there is no
//! pointer arithmetic and no unsafe code in this module. Inconsistent
//! neighbor links are structural corruption and halt via the fault path;
//! a merely bogus `free` address is rejected with `InvalidPointer` and
//! mutates nothing.

use k_common::{Error, Result};

use crate::arch;
use crate::config::HEAP_WORDS;
use crate::panic::structural_fault;

/// Bytes per arena word
pub const WORD_BYTES: usize = core::mem::size_of::<usize>();

/// Block header size in words: tag, prev, next, next-free
const HDR_WORDS: usize = 4;

/// Smallest block worth splitting off: a header plus one payload word
const MIN_BLOCK_WORDS: usize = HDR_WORDS + 1;

/// "No block" sentinel for link words
const NO_BLOCK: usize = usize::MAX;

/// Tag word of a free block
const TAG_FREE: usize = 0x4B46_5245; // "KFRE"

/// Tag word of a used block
const TAG_USED: usize = 0x4B55_5345; // "KUSE"

/// Header word offsets
const OFF_TAG: usize = 0;
const OFF_PREV: usize = 1;
const OFF_NEXT: usize = 2;
const OFF_NEXT_FREE: usize = 3;

/// Address of a live allocation, as handed out by [`KernelHeap::alloc`]
///
/// Internally this is the arena word index of the payload (the word after
/// the block header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapAddr(usize);

impl HeapAddr {
    /// Construct from a raw payload word index (diagnostics and tests)
    #[must_use]
    pub const fn from_raw(word_index: usize) -> Self {
        Self(word_index)
    }

    /// The payload word index inside the arena
    #[must_use]
    pub const fn word_index(&self) -> usize {
        self.0
    }
}

/// Heap usage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Words currently in free blocks (headers included)
    pub free_words: usize,
    /// Smallest `free_words` ever observed (high-water mark)
    pub min_free_words: usize,
    /// Number of free blocks
    pub free_blocks: usize,
    /// Payload capacity of the largest free block, in words
    pub largest_free_payload: usize,
    /// Successful allocations
    pub allocations: u32,
    /// Successful frees
    pub frees: u32,
}

/// Cursor over a block header inside the arena
///
/// A `Block` is only ever constructed for an index the checking helpers
/// have validated, which keeps the index arithmetic in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block(usize);

/// The kernel heap arena
pub struct KernelHeap {
    arena: [usize; HEAP_WORDS],
    free_head: usize,
    free_words: usize,
    min_free_words: usize,
    allocations: u32,
    frees: u32,
    initialized: bool,
}

impl KernelHeap {
    /// Create an uninitialized heap; the first allocation initializes it
    #[must_use]
    pub const fn new() -> Self {
        Self {
            arena: [0; HEAP_WORDS],
            free_head: NO_BLOCK,
            free_words: 0,
            min_free_words: 0,
            allocations: 0,
            frees: 0,
            initialized: false,
        }
    }

    // ------------------------------------------------------------------
    // Checked header access
    // ------------------------------------------------------------------

    fn block_at(&self, word: usize) -> Option<Block> {
        if word + HDR_WORDS <= HEAP_WORDS {
            Some(Block(word))
        } else {
            None
        }
    }

    fn tag(&self, b: Block) -> usize {
        self.arena[b.0 + OFF_TAG]
    }

    fn set_tag(&mut self, b: Block, tag: usize) {
        self.arena[b.0 + OFF_TAG] = tag;
    }

    fn link(&self, b: Block, off: usize) -> Option<Block> {
        let raw = self.arena[b.0 + off];
        if raw == NO_BLOCK {
            None
        } else if raw < HEAP_WORDS {
            Some(Block(raw))
        } else {
            structural_fault("heap block link points outside the arena");
        }
    }

    fn set_link(&mut self, b: Block, off: usize, to: Option<Block>) {
        self.arena[b.0 + off] = match to {
            Some(t) => t.0,
            None => NO_BLOCK,
        };
    }

    fn prev(&self, b: Block) -> Option<Block> {
        self.link(b, OFF_PREV)
    }

    fn next(&self, b: Block) -> Option<Block> {
        self.link(b, OFF_NEXT)
    }

    fn next_free(&self, b: Block) -> Option<Block> {
        self.link(b, OFF_NEXT_FREE)
    }

    /// Block size in words, header included, derived from the neighbor link
    fn size_words(&self, b: Block) -> usize {
        match self.next(b) {
            Some(n) => n.0 - b.0,
            None => HEAP_WORDS - b.0,
        }
    }

    fn free_head_block(&self) -> Option<Block> {
        if self.free_head == NO_BLOCK {
            None
        } else {
            Some(Block(self.free_head))
        }
    }

    fn set_free_head(&mut self, to: Option<Block>) {
        self.free_head = match to {
            Some(t) => t.0,
            None => NO_BLOCK,
        };
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Set up the arena as one spanning free block
    fn init(&mut self) {
        let first = Block(0);
        self.set_tag(first, TAG_FREE);
        self.set_link(first, OFF_PREV, None);
        self.set_link(first, OFF_NEXT, None);
        self.set_link(first, OFF_NEXT_FREE, None);
        self.set_free_head(Some(first));
        self.free_words = HEAP_WORDS;
        self.min_free_words = HEAP_WORDS;
        self.initialized = true;
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocate `bytes` bytes, first-fit
    ///
    /// # Errors
    /// `InvalidParameter` for a zero-sized request, `OutOfMemory` when no
    /// free block is large enough.
    pub fn alloc(&mut self, bytes: usize) -> Result<HeapAddr> {
        if !self.initialized {
            self.init();
        }
        if bytes == 0 {
            return Err(Error::InvalidParameter);
        }
        let Some(payload_words) = bytes.checked_add(WORD_BYTES - 1).map(|b| b / WORD_BYTES) else {
            return Err(Error::OutOfMemory);
        };
        let want = payload_words + HDR_WORDS;

        // First fit over the address-sorted free list
        let mut pred: Option<Block> = None;
        let mut cur = self.free_head_block();
        while let Some(b) = cur {
            if self.size_words(b) >= want {
                break;
            }
            pred = Some(b);
            cur = self.next_free(b);
        }
        let Some(found) = cur else {
            return Err(Error::OutOfMemory);
        };

        let size = self.size_words(found);
        let after = self.next_free(found);
        let taken = if size - want >= MIN_BLOCK_WORDS {
            // Split: the remainder becomes a new free block directly behind
            // the allocation, taking the allocation's place in the free list
            let rest = Block(found.0 + want);
            let old_next = self.next(found);
            self.set_tag(rest, TAG_FREE);
            self.set_link(rest, OFF_PREV, Some(found));
            self.set_link(rest, OFF_NEXT, old_next);
            self.set_link(rest, OFF_NEXT_FREE, after);
            if let Some(n) = old_next {
                self.set_link(n, OFF_PREV, Some(rest));
            }
            self.set_link(found, OFF_NEXT, Some(rest));
            match pred {
                Some(p) => self.set_link(p, OFF_NEXT_FREE, Some(rest)),
                None => self.set_free_head(Some(rest)),
            }
            want
        } else {
            // Remainder too small to stand alone: hand out the whole block
            match pred {
                Some(p) => self.set_link(p, OFF_NEXT_FREE, after),
                None => self.set_free_head(after),
            }
            size
        };

        self.set_tag(found, TAG_USED);
        self.set_link(found, OFF_NEXT_FREE, None);
        self.free_words -= taken;
        if self.free_words < self.min_free_words {
            self.min_free_words = self.free_words;
        }
        self.allocations += 1;
        self.debug_audit();
        Ok(HeapAddr(found.0 + HDR_WORDS))
    }

    // ------------------------------------------------------------------
    // Free
    // ------------------------------------------------------------------

    /// Return an allocation to the free list, coalescing with free neighbors
    ///
    /// # Errors
    /// `InvalidPointer` if `addr` is outside the arena or is not the start
    /// of a live allocation; the heap is untouched in that case.
    pub fn free(&mut self, addr: HeapAddr) -> Result<()> {
        if !self.initialized || addr.0 < HDR_WORDS {
            return Err(Error::InvalidPointer);
        }
        let Some(b) = self.block_at(addr.0 - HDR_WORDS) else {
            return Err(Error::InvalidPointer);
        };
        if self.tag(b) != TAG_USED {
            return Err(Error::InvalidPointer);
        }

        // Neighbor links must agree before we trust them for merging
        let left = self.prev(b);
        let right = self.next(b);
        if let Some(l) = left {
            if self.next(l) != Some(b) {
                structural_fault("heap block left neighbor does not link back");
            }
        }
        if let Some(r) = right {
            if self.prev(r) != Some(b) {
                structural_fault("heap block right neighbor does not link back");
            }
        }

        self.free_words += self.size_words(b);
        self.frees += 1;
        self.set_tag(b, TAG_FREE);

        // Predecessor position in the address-sorted free list
        let mut pred: Option<Block> = None;
        let mut scan = self.free_head_block();
        while let Some(s) = scan {
            if s.0 > b.0 {
                break;
            }
            pred = Some(s);
            scan = self.next_free(s);
        }
        let following = scan;

        let left_free = left.map(|l| self.tag(l) == TAG_FREE).unwrap_or(false);
        let right_free = right.map(|r| self.tag(r) == TAG_FREE).unwrap_or(false);

        // Merge with the left neighbor, or link the block into the free list
        let merged = if left_free {
            let l = left.unwrap_or_else(|| structural_fault("heap merge lost its left neighbor"));
            debug_assert_eq!(Some(l), pred);
            self.set_link(l, OFF_NEXT, right);
            if let Some(r) = right {
                self.set_link(r, OFF_PREV, Some(l));
            }
            self.scrub_header(b);
            l
        } else {
            self.set_link(b, OFF_NEXT_FREE, following);
            match pred {
                Some(p) => self.set_link(p, OFF_NEXT_FREE, Some(b)),
                None => self.set_free_head(Some(b)),
            }
            b
        };

        // Then with the right neighbor
        if right_free {
            let r = right.unwrap_or_else(|| structural_fault("heap merge lost its right neighbor"));
            debug_assert_eq!(Some(r), if left_free { following } else { self.next_free(merged) });
            let beyond = self.next(r);
            self.set_link(merged, OFF_NEXT, beyond);
            if let Some(y) = beyond {
                self.set_link(y, OFF_PREV, Some(merged));
            }
            let r_next_free = self.next_free(r);
            self.set_link(merged, OFF_NEXT_FREE, r_next_free);
            self.scrub_header(r);
        }

        self.debug_audit();
        Ok(())
    }

    /// Wipe a header absorbed by a merge so no stale tag survives inside
    /// free space
    fn scrub_header(&mut self, b: Block) {
        for off in 0..HDR_WORDS {
            self.arena[b.0 + off] = 0;
        }
    }

    // ------------------------------------------------------------------
    // Auditing and introspection
    // ------------------------------------------------------------------

    /// Verify the tiling invariant
    ///
    /// Walks the physical chain and the free list and checks: blocks tile
    /// the arena exactly, every neighbor link is mutual, no two adjacent
    /// blocks are both free, and the free list is address-sorted and
    /// matches the set of free-tagged blocks.
    pub fn check_tiling(&self) -> core::result::Result<(), &'static str> {
        if !self.initialized {
            return Ok(());
        }
        let mut covered = 0usize;
        let mut free_seen = 0usize;
        let mut prev: Option<Block> = None;
        let mut prev_was_free = false;
        let mut cur = Some(Block(0));
        while let Some(b) = cur {
            let tag = self.tag(b);
            if tag != TAG_FREE && tag != TAG_USED {
                return Err("block tag is neither free nor used");
            }
            if self.prev(b) != prev {
                return Err("physical prev link is not mutual");
            }
            let is_free = tag == TAG_FREE;
            if is_free && prev_was_free {
                return Err("two adjacent free blocks (missed coalesce)");
            }
            if is_free {
                free_seen += 1;
            }
            covered += self.size_words(b);
            let next = self.next(b);
            if let Some(n) = next {
                if n.0 <= b.0 {
                    return Err("physical next link does not advance");
                }
            }
            prev = Some(b);
            prev_was_free = is_free;
            cur = next;
        }
        if covered != HEAP_WORDS {
            return Err("blocks do not tile the arena");
        }

        let mut list_count = 0usize;
        let mut last = 0usize;
        let mut cur = self.free_head_block();
        while let Some(b) = cur {
            if self.tag(b) != TAG_FREE {
                return Err("free list entry is not tagged free");
            }
            if list_count > 0 && b.0 <= last {
                return Err("free list is not address-sorted");
            }
            last = b.0;
            list_count += 1;
            if list_count > HEAP_WORDS / MIN_BLOCK_WORDS + 1 {
                return Err("free list does not terminate");
            }
            cur = self.next_free(b);
        }
        if list_count != free_seen {
            return Err("free list disagrees with free-tagged blocks");
        }
        Ok(())
    }

    #[cfg(debug_assertions)]
    fn debug_audit(&self) {
        if let Err(msg) = self.check_tiling() {
            structural_fault(msg);
        }
    }

    #[cfg(not(debug_assertions))]
    fn debug_audit(&self) {}

    /// Borrow the payload words of a live allocation
    ///
    /// # Errors
    /// `InvalidPointer` if `addr` is not a live allocation.
    pub fn payload(&self, addr: HeapAddr) -> Result<&[usize]> {
        let b = self.live_block(addr)?;
        Ok(&self.arena[addr.0..b.0 + self.size_words(b)])
    }

    /// Mutably borrow the payload words of a live allocation
    ///
    /// # Errors
    /// `InvalidPointer` if `addr` is not a live allocation.
    pub fn payload_mut(&mut self, addr: HeapAddr) -> Result<&mut [usize]> {
        let b = self.live_block(addr)?;
        let end = b.0 + self.size_words(b);
        Ok(&mut self.arena[addr.0..end])
    }

    fn live_block(&self, addr: HeapAddr) -> Result<Block> {
        if !self.initialized || addr.0 < HDR_WORDS {
            return Err(Error::InvalidPointer);
        }
        let b = self
            .block_at(addr.0 - HDR_WORDS)
            .ok_or(Error::InvalidPointer)?;
        if self.tag(b) != TAG_USED {
            return Err(Error::InvalidPointer);
        }
        Ok(b)
    }

    /// Current usage counters
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut free_blocks = 0;
        let mut largest = 0;
        let mut cur = self.free_head_block();
        while let Some(b) = cur {
            free_blocks += 1;
            let payload = self.size_words(b) - HDR_WORDS;
            if payload > largest {
                largest = payload;
            }
            cur = self.next_free(b);
        }
        HeapStats {
            free_words: self.free_words,
            min_free_words: self.min_free_words,
            free_blocks,
            largest_free_payload: largest,
            allocations: self.allocations,
            frees: self.frees,
        }
    }

    /// Words currently free (headers included)
    #[must_use]
    pub fn free_words(&self) -> usize {
        self.free_words
    }
}

impl Default for KernelHeap {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Global heap instance
// ============================================================================

static mut HEAP: KernelHeap = KernelHeap::new();

/// Run a closure against the global heap inside a critical section
///
/// Heap operations never yield and complete in bounded time, so a plain
/// interrupt-masked section is sufficient; the scheduler is not involved.
fn with_heap<R>(f: impl FnOnce(&mut KernelHeap) -> R) -> R {
    let saved = arch::disable_interrupts_save();
    // SAFETY: Interrupts are masked for the duration of the closure, so on
    // the single supported core nothing can observe the heap mid-update.
    let result = unsafe { f(&mut *core::ptr::addr_of_mut!(HEAP)) };
    arch::restore_interrupts(saved);
    result
}

/// Allocate `bytes` bytes from the kernel heap
#[must_use]
pub fn kalloc(bytes: usize) -> Option<HeapAddr> {
    with_heap(|heap| heap.alloc(bytes)).ok()
}

/// Free a kernel heap allocation
///
/// # Errors
/// `InvalidPointer` if `addr` is not a live allocation.
pub fn kfree(addr: HeapAddr) -> Result<()> {
    with_heap(|heap| heap.free(addr))
}

/// Snapshot the global heap counters
#[must_use]
pub fn heap_stats() -> HeapStats {
    with_heap(|heap| heap.stats())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> KernelHeap {
        let mut h = KernelHeap::new();
        // Force initialization so shapes are comparable
        let probe = h.alloc(1).unwrap();
        h.free(probe).unwrap();
        h
    }

    #[test]
    fn test_alloc_and_free_restore_free_words() {
        let mut h = heap();
        let before = h.free_words();

        let a = h.alloc(10 * WORD_BYTES).unwrap();
        assert!(h.free_words() < before);
        h.free(a).unwrap();
        assert_eq!(h.free_words(), before);
        assert_eq!(h.stats().free_blocks, 1);
    }

    #[test]
    fn test_alloc_free_round_trip_restores_shape() {
        let mut h = heap();
        let shape_before = h.stats();

        let a = h.alloc(24).unwrap();
        h.free(a).unwrap();

        let shape_after = h.stats();
        assert_eq!(shape_before.free_words, shape_after.free_words);
        assert_eq!(shape_before.free_blocks, shape_after.free_blocks);
        assert_eq!(
            shape_before.largest_free_payload,
            shape_after.largest_free_payload
        );
    }

    #[test]
    fn test_distinct_allocations_do_not_overlap() {
        let mut h = heap();
        let a = h.alloc(8 * WORD_BYTES).unwrap();
        let b = h.alloc(8 * WORD_BYTES).unwrap();
        let c = h.alloc(8 * WORD_BYTES).unwrap();

        let span = 8 + HDR_WORDS;
        assert!(b.word_index() >= a.word_index() + span);
        assert!(c.word_index() >= b.word_index() + span);
        h.check_tiling().unwrap();
    }

    #[test]
    fn test_free_middle_then_left_coalesces_into_one_block() {
        let mut h = heap();
        let a = h.alloc(8 * WORD_BYTES).unwrap();
        let b = h.alloc(8 * WORD_BYTES).unwrap();
        let c = h.alloc(8 * WORD_BYTES).unwrap();

        // Freeing the middle leaves an isolated hole plus the trailing space
        h.free(b).unwrap();
        assert_eq!(h.stats().free_blocks, 2);

        // Freeing the left neighbor must merge into that hole, not sit
        // beside it
        h.free(a).unwrap();
        assert_eq!(h.stats().free_blocks, 2);

        // The merged hole spans both allocations plus the absorbed header:
        // a request of exactly that payload fits only if the merge
        // happened, and first-fit then returns a's own address
        let merged_payload = 2 * 8 + HDR_WORDS;
        let refill = h.alloc(merged_payload * WORD_BYTES).unwrap();
        assert_eq!(refill.word_index(), a.word_index());

        h.free(refill).unwrap();
        h.free(c).unwrap();
        assert_eq!(h.stats().free_blocks, 1);
        assert_eq!(h.free_words(), HEAP_WORDS);
    }

    #[test]
    fn test_both_side_merge() {
        let mut h = heap();
        let a = h.alloc(6 * WORD_BYTES).unwrap();
        let b = h.alloc(6 * WORD_BYTES).unwrap();
        let c = h.alloc(6 * WORD_BYTES).unwrap();
        let _guard = h.alloc(6 * WORD_BYTES).unwrap();

        h.free(a).unwrap();
        h.free(c).unwrap();
        assert_eq!(h.stats().free_blocks, 3); // a-hole, c-hole, trailing space

        // b's free merges left into a and right into c: three holes
        // become one plus the trailing block
        h.free(b).unwrap();
        assert_eq!(h.stats().free_blocks, 2);
        h.check_tiling().unwrap();
    }

    #[test]
    fn test_whole_block_consumed_when_remainder_too_small() {
        let mut h = heap();
        let a = h.alloc(4 * WORD_BYTES).unwrap();
        let _b = h.alloc(4 * WORD_BYTES).unwrap();
        h.free(a).unwrap();
        let free_before = h.free_words();

        // The freed hole is 4 + HDR words. A 3-word request would leave a
        // 1-word remainder, below the minimum block size, so the whole hole
        // must be handed out instead of split.
        let hole_words = 4 + HDR_WORDS;
        let c = h.alloc(3 * WORD_BYTES).unwrap();
        assert_eq!(c.word_index(), a.word_index());
        assert_eq!(h.free_words(), free_before - hole_words);
        h.check_tiling().unwrap();
    }

    #[test]
    fn test_free_rejects_bad_addresses_without_damage() {
        let mut h = heap();
        let a = h.alloc(16).unwrap();
        let before = h.stats();

        assert_eq!(h.free(HeapAddr::from_raw(0)), Err(Error::InvalidPointer));
        assert_eq!(
            h.free(HeapAddr::from_raw(HEAP_WORDS + 10)),
            Err(Error::InvalidPointer)
        );
        // Interior of a live allocation is not an allocation start
        assert_eq!(
            h.free(HeapAddr::from_raw(a.word_index() + 1)),
            Err(Error::InvalidPointer)
        );

        assert_eq!(h.stats(), before);
        h.free(a).unwrap();
    }

    #[test]
    fn test_double_free_is_rejected() {
        let mut h = heap();
        let a = h.alloc(32).unwrap();
        h.free(a).unwrap();
        assert_eq!(h.free(a), Err(Error::InvalidPointer));
    }

    #[test]
    fn test_zero_sized_alloc_is_rejected() {
        let mut h = heap();
        assert_eq!(h.alloc(0), Err(Error::InvalidParameter));
    }

    #[test]
    fn test_exhaustion_returns_out_of_memory() {
        let mut h = heap();
        assert_eq!(
            h.alloc(2 * HEAP_WORDS * WORD_BYTES),
            Err(Error::OutOfMemory)
        );
        // Drain with bounded allocations until full
        let mut count = 0;
        while h.alloc(16 * WORD_BYTES).is_ok() {
            count += 1;
            assert!(count < HEAP_WORDS); // must terminate
        }
        assert!(count > 0);
    }

    #[test]
    fn test_first_fit_reuses_earliest_hole() {
        let mut h = heap();
        let a = h.alloc(8 * WORD_BYTES).unwrap();
        let _b = h.alloc(8 * WORD_BYTES).unwrap();
        let c = h.alloc(8 * WORD_BYTES).unwrap();
        let _d = h.alloc(8 * WORD_BYTES).unwrap();

        h.free(a).unwrap();
        h.free(c).unwrap();

        // Both holes fit; first-fit must take the earlier one
        let e = h.alloc(8 * WORD_BYTES).unwrap();
        assert_eq!(e.word_index(), a.word_index());
    }

    #[test]
    fn test_high_water_mark_only_falls() {
        let mut h = heap();
        let a = h.alloc(64 * WORD_BYTES).unwrap();
        let low = h.stats().min_free_words;
        h.free(a).unwrap();
        assert_eq!(h.stats().min_free_words, low);
        assert!(h.free_words() > low);
    }

    #[test]
    fn test_payload_is_private_to_its_block() {
        let mut h = heap();
        let a = h.alloc(4 * WORD_BYTES).unwrap();
        let b = h.alloc(4 * WORD_BYTES).unwrap();

        for w in h.payload_mut(a).unwrap() {
            *w = 0xAAAA_AAAA;
        }
        for w in h.payload_mut(b).unwrap() {
            *w = 0xBBBB_BBBB;
        }

        assert!(h.payload(a).unwrap().iter().all(|w| *w == 0xAAAA_AAAA));
        assert!(h.payload(b).unwrap().iter().all(|w| *w == 0xBBBB_BBBB));
        h.check_tiling().unwrap();

        h.free(a).unwrap();
        assert_eq!(h.payload(a), Err(Error::InvalidPointer));
        h.free(b).unwrap();
    }

    #[test]
    fn test_alternating_alloc_free_keeps_tiling() {
        let mut h = heap();
        let mut live: heapless::Vec<HeapAddr, 32> = heapless::Vec::new();
        for round in 0..6usize {
            for i in 0..8usize {
                let size = (1 + (round + i) % 7) * WORD_BYTES;
                if let Ok(addr) = h.alloc(size) {
                    live.push(addr).unwrap();
                }
            }
            // Free every other allocation
            let mut idx = 0;
            live.retain(|addr| {
                idx += 1;
                if idx % 2 == 0 {
                    h.free(*addr).unwrap();
                    false
                } else {
                    true
                }
            });
            h.check_tiling().unwrap();
        }
        for addr in live {
            h.free(addr).unwrap();
        }
        assert_eq!(h.free_words(), HEAP_WORDS);
        assert_eq!(h.stats().free_blocks, 1);
    }
}
