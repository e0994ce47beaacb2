//! # Heap Allocator
//!
//! First-fit allocator over a single contiguous arena. Task stacks and
//! general task allocations both come from here.
//!
//! ## Block Model
//!
//! The arena is tiled by blocks. Each block is charged `BLOCK_HEADER_SIZE`
//! bytes of bookkeeping in front of its usable region, so for every layout
//!
//! ```text
//! Σ (usable size + BLOCK_HEADER_SIZE) == arena size
//! ```
//!
//! Block descriptors live in a fixed pool and are referenced by index. The
//! pool has one descriptor for every block the arena can possibly hold, so
//! a fitting request is always split. A descriptor sits on three lists at
//! once:
//!
//! - the **free list** (FREE blocks only, ascending start address),
//! - the **use list** (OCCUPIED blocks, most recent first),
//! - the **physical list** (every block, ascending address), used to find
//!   the neighbours to coalesce with on deallocation.
//!
//! A block is only on one of the free/use lists at a time, so both share the
//! same `prev`/`next` links.
//!
//! Descriptor 0 always describes the first physical block: a block is only
//! ever retired when it is absorbed into its physical predecessor, and the
//! first block has none.

use core::ops::{Index, IndexMut};

use crate::config::{BLOCK_HEADER_SIZE, HEAP_ALIGN, MAX_BLOCKS, MIN_BLOCK_SIZE};
use crate::error::{KernelError, Result};
use crate::task::TaskId;

/// Index of a block descriptor in the pool. `u16` keeps the four links of
/// a descriptor small enough for a full-size pool to fit in SRAM.
pub type BlockIdx = u16;

const FIRST_BLOCK: BlockIdx = 0;

const _: () = assert!(MAX_BLOCKS <= BlockIdx::MAX as usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Free,
    Occupied,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    /// Descriptor slot is in use.
    live: bool,
    owner: Option<TaskId>,
    /// Address of the first usable byte.
    start: usize,
    /// Usable bytes, a multiple of `HEAP_ALIGN`.
    size: usize,
    status: BlockStatus,
    /// Free-list or use-list links.
    prev: Option<BlockIdx>,
    next: Option<BlockIdx>,
    /// Physical-order links.
    prev_phys: Option<BlockIdx>,
    next_phys: Option<BlockIdx>,
}

impl Block {
    const UNUSED: Block = Block {
        live: false,
        owner: None,
        start: 0,
        size: 0,
        status: BlockStatus::Free,
        prev: None,
        next: None,
        prev_phys: None,
        next_phys: None,
    };
}

/// The descriptor pool.
struct Pool([Block; MAX_BLOCKS]);

impl Pool {
    const fn new() -> Self {
        Self([Block::UNUSED; MAX_BLOCKS])
    }

    fn clear(&mut self) {
        self.0.fill(Block::UNUSED);
    }
}

impl Index<BlockIdx> for Pool {
    type Output = Block;

    #[inline]
    fn index(&self, idx: BlockIdx) -> &Block {
        &self.0[usize::from(idx)]
    }
}

impl IndexMut<BlockIdx> for Pool {
    #[inline]
    fn index_mut(&mut self, idx: BlockIdx) -> &mut Block {
        &mut self.0[usize::from(idx)]
    }
}

/// Read-only view of a block, handed out by the list iterators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub owner: Option<TaskId>,
    pub start: usize,
    pub size: usize,
    pub status: BlockStatus,
}

impl BlockInfo {
    /// Arena bytes covered by this block, bookkeeping included.
    #[inline]
    pub const fn footprint(&self) -> usize {
        self.size + BLOCK_HEADER_SIZE
    }
}

#[derive(Clone, Copy)]
enum List {
    Free,
    Used,
}

#[derive(Clone, Copy)]
enum Link {
    List,
    Physical,
}

/// Round `size` up to the allocator granularity.
#[inline]
pub const fn align_up(size: usize) -> usize {
    (size + HEAP_ALIGN - 1) & !(HEAP_ALIGN - 1)
}

pub struct Heap {
    blocks: Pool,
    free_head: Option<BlockIdx>,
    use_head: Option<BlockIdx>,
    base: usize,
    size: usize,
    initialized: bool,
}

impl Heap {
    pub const fn new() -> Self {
        Self {
            blocks: Pool::new(),
            free_head: None,
            use_head: None,
            base: 0,
            size: 0,
            initialized: false,
        }
    }

    /// Take ownership of the arena `[base, base + size)` as one FREE block.
    pub fn init(&mut self, base: usize, size: usize) -> Result<()> {
        if self.initialized {
            return Err(KernelError::AlreadyInitialized);
        }
        if size < BLOCK_HEADER_SIZE + MIN_BLOCK_SIZE {
            return Err(KernelError::InvalidRequest);
        }
        debug_assert_eq!(base % HEAP_ALIGN, 0);

        // Trailing bytes that cannot form a whole aligned unit stay unused
        let size = size & !(HEAP_ALIGN - 1);
        if size / (BLOCK_HEADER_SIZE + MIN_BLOCK_SIZE) > MAX_BLOCKS {
            return Err(KernelError::InvalidRequest);
        }

        self.blocks.clear();
        self.blocks[FIRST_BLOCK] = Block {
            live: true,
            start: base + BLOCK_HEADER_SIZE,
            size: size - BLOCK_HEADER_SIZE,
            ..Block::UNUSED
        };
        self.free_head = Some(FIRST_BLOCK);
        self.use_head = None;
        self.base = base;
        self.size = size;
        self.initialized = true;

        log::info!(
            "heap: {} bytes at {:#010x}, {} descriptors",
            size,
            base,
            MAX_BLOCKS
        );
        Ok(())
    }

    /// Forget the arena and every block in it.
    pub fn reset(&mut self) {
        self.blocks.clear();
        self.free_head = None;
        self.use_head = None;
        self.base = 0;
        self.size = 0;
        self.initialized = false;
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Arena size in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Allocate `size` bytes on behalf of `owner` and return the address of
    /// the usable region.
    pub fn allocate(&mut self, size: usize, owner: TaskId) -> Result<usize> {
        if !self.initialized {
            return Err(KernelError::HeapUninitialized);
        }
        if size == 0 {
            return Err(KernelError::InvalidRequest);
        }
        if size > self.size - BLOCK_HEADER_SIZE {
            return Err(KernelError::OutOfMemory);
        }
        let aligned = align_up(size);

        let mut cursor = self.free_head;
        while let Some(idx) = cursor {
            if self.blocks[idx].size >= aligned {
                self.carve(idx, aligned, owner)?;
                self.push_front(List::Used, idx);
                return Ok(self.blocks[idx].start);
            }
            cursor = self.blocks[idx].next;
        }

        Err(KernelError::OutOfMemory)
    }

    /// Turn the free block `idx` into an occupied block of exactly `aligned`
    /// usable bytes, splitting off the remainder when it is worth keeping.
    /// Leaves `idx` detached from both the free and the use list.
    fn carve(&mut self, idx: BlockIdx, aligned: usize, owner: TaskId) -> Result<()> {
        let split_size = aligned + BLOCK_HEADER_SIZE;
        let block = self.blocks[idx];

        if block.size < split_size + MIN_BLOCK_SIZE {
            self.blocks[idx].owner = Some(owner);
            self.blocks[idx].status = BlockStatus::Occupied;
            self.unlink(List::Free, idx);
            return Ok(());
        }

        let tail = Block {
            live: true,
            owner: None,
            start: block.start + split_size,
            size: block.size - split_size,
            status: BlockStatus::Free,
            prev: block.prev,
            next: block.next,
            prev_phys: Some(idx),
            next_phys: block.next_phys,
        };
        let Some(tail_idx) = self.claim_descriptor(tail) else {
            // Unreachable while the pool covers the arena
            log::error!("heap: descriptor pool exhausted");
            return Err(KernelError::OutOfMemory);
        };

        // The tail takes over the carved block's place in the free list
        if let Some(n) = block.next {
            self.blocks[n].prev = Some(tail_idx);
        }
        if let Some(p) = block.prev {
            self.blocks[p].next = Some(tail_idx);
        }
        if self.free_head == Some(idx) {
            self.free_head = Some(tail_idx);
        }

        if let Some(n) = block.next_phys {
            self.blocks[n].prev_phys = Some(tail_idx);
        }
        self.blocks[idx] = Block {
            owner: Some(owner),
            size: aligned,
            status: BlockStatus::Occupied,
            prev: None,
            next: None,
            next_phys: Some(tail_idx),
            ..block
        };
        Ok(())
    }

    /// Return the block starting at `addr` to the free pool. Only the task
    /// that allocated the block may free it.
    pub fn deallocate(&mut self, addr: usize, owner: TaskId) -> Result<()> {
        if !self.initialized {
            return Err(KernelError::HeapUninitialized);
        }
        if addr == 0 {
            return Err(KernelError::InvalidRequest);
        }

        let mut found = None;
        let mut foreign = false;
        let mut cursor = self.use_head;
        while let Some(idx) = cursor {
            let block = &self.blocks[idx];
            if block.status == BlockStatus::Occupied && block.start == addr {
                if block.owner == Some(owner) {
                    found = Some(idx);
                    break;
                }
                foreign = true;
            }
            cursor = block.next;
        }

        let Some(idx) = found else {
            log::warn!("heap: task {} cannot free {:#010x}", owner, addr);
            return Err(if foreign {
                KernelError::NotOwner
            } else {
                KernelError::InvalidRequest
            });
        };

        self.unlink(List::Used, idx);
        self.blocks[idx].status = BlockStatus::Free;
        self.blocks[idx].owner = None;
        self.coalesce(idx);
        Ok(())
    }

    /// Merge the freshly freed block `idx` with its FREE physical neighbours
    /// and put the result on the free list.
    fn coalesce(&mut self, idx: BlockIdx) {
        let prev = self.blocks[idx].prev_phys;
        let next = self.blocks[idx].next_phys;
        let merge_prev = prev.filter(|&p| self.blocks[p].status == BlockStatus::Free);
        let merge_next = next.filter(|&n| self.blocks[n].status == BlockStatus::Free);

        if merge_prev.is_none() && merge_next.is_none() {
            self.insert_free_sorted(idx);
            return;
        }

        let mut current = idx;

        if let Some(p) = merge_prev {
            // The predecessor is already on the free list and keeps its links
            self.absorb_physical(p, current);
            self.blocks[current] = Block::UNUSED;
            current = p;
        }

        if let Some(n) = merge_next {
            self.absorb_physical(current, n);

            let after = self.blocks[n].next;
            self.blocks[current].next = after;
            if let Some(a) = after {
                self.blocks[a].prev = Some(current);
            }
            if merge_prev.is_none() {
                let before = self.blocks[n].prev;
                self.blocks[current].prev = before;
                if let Some(b) = before {
                    self.blocks[b].next = Some(current);
                }
                if self.free_head == Some(n) {
                    self.free_head = Some(current);
                }
            }
            self.blocks[n] = Block::UNUSED;
        }
    }

    /// Grow `keep` over its physical successor `gone`, unhooking `gone` from
    /// the physical list. Free/use links and the descriptor itself are left
    /// for the caller to retire.
    fn absorb_physical(&mut self, keep: BlockIdx, gone: BlockIdx) {
        let gone_block = self.blocks[gone];
        self.blocks[keep].size += gone_block.size + BLOCK_HEADER_SIZE;
        self.blocks[keep].next_phys = gone_block.next_phys;
        if let Some(after) = gone_block.next_phys {
            self.blocks[after].prev_phys = Some(keep);
        }
    }

    /// Link `idx` into the free list at its address-ordered position.
    fn insert_free_sorted(&mut self, idx: BlockIdx) {
        let start = self.blocks[idx].start;

        let Some(head) = self.free_head else {
            self.blocks[idx].prev = None;
            self.blocks[idx].next = None;
            self.free_head = Some(idx);
            return;
        };

        if start < self.blocks[head].start {
            self.blocks[idx].prev = None;
            self.blocks[idx].next = Some(head);
            self.blocks[head].prev = Some(idx);
            self.free_head = Some(idx);
            return;
        }

        let mut at = head;
        while let Some(n) = self.blocks[at].next {
            if self.blocks[n].start >= start {
                break;
            }
            at = n;
        }

        let after = self.blocks[at].next;
        self.blocks[idx].prev = Some(at);
        self.blocks[idx].next = after;
        if let Some(a) = after {
            self.blocks[a].prev = Some(idx);
        }
        self.blocks[at].next = Some(idx);
    }

    /// Number of free blocks whose footprint (usable size plus bookkeeping)
    /// is strictly smaller than `size`.
    pub fn count_below(&self, size: usize) -> usize {
        self.free_blocks().filter(|b| b.footprint() < size).count()
    }

    /// Usable size of the largest free block.
    pub fn largest_free(&self) -> Option<usize> {
        self.free_blocks().map(|b| b.size).max()
    }

    /// Look up the occupied block whose usable region starts at `addr`.
    pub fn find(&self, addr: usize) -> Option<BlockInfo> {
        self.used_blocks().find(|b| b.start == addr)
    }

    pub fn free_blocks(&self) -> Blocks<'_> {
        self.iter(self.free_head, Link::List)
    }

    pub fn used_blocks(&self) -> Blocks<'_> {
        self.iter(self.use_head, Link::List)
    }

    /// Every block in address order.
    pub fn physical_blocks(&self) -> Blocks<'_> {
        let first = if self.initialized { Some(FIRST_BLOCK) } else { None };
        self.iter(first, Link::Physical)
    }

    fn iter(&self, cursor: Option<BlockIdx>, link: Link) -> Blocks<'_> {
        Blocks {
            heap: self,
            cursor,
            link,
        }
    }

    // -----------------------------------------------------------------------
    // Descriptor pool and list plumbing
    // -----------------------------------------------------------------------

    fn claim_descriptor(&mut self, block: Block) -> Option<BlockIdx> {
        let idx = self.blocks.0.iter().position(|b| !b.live)? as BlockIdx;
        self.blocks[idx] = block;
        Some(idx)
    }

    fn head_mut(&mut self, list: List) -> &mut Option<BlockIdx> {
        match list {
            List::Free => &mut self.free_head,
            List::Used => &mut self.use_head,
        }
    }

    fn unlink(&mut self, list: List, idx: BlockIdx) {
        let Block { prev, next, .. } = self.blocks[idx];
        if let Some(p) = prev {
            self.blocks[p].next = next;
        }
        if let Some(n) = next {
            self.blocks[n].prev = prev;
        }
        let head = self.head_mut(list);
        if *head == Some(idx) {
            *head = next;
        }
        self.blocks[idx].prev = None;
        self.blocks[idx].next = None;
    }

    fn push_front(&mut self, list: List, idx: BlockIdx) {
        let head = *self.head_mut(list);
        self.blocks[idx].prev = None;
        self.blocks[idx].next = head;
        if let Some(h) = head {
            self.blocks[h].prev = Some(idx);
        }
        *self.head_mut(list) = Some(idx);
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over one of the allocator's lists.
pub struct Blocks<'a> {
    heap: &'a Heap,
    cursor: Option<BlockIdx>,
    link: Link,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let idx = self.cursor?;
        let block = &self.heap.blocks[idx];
        self.cursor = match self.link {
            Link::List => block.next,
            Link::Physical => block.next_phys,
        };
        Some(BlockInfo {
            owner: block.owner,
            start: block.start,
            size: block.size,
            status: block.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HEAP_SIZE;
    use proptest::prelude::*;

    const BASE: usize = 0x2000_0000;
    const ARENA: usize = 0x1000;
    const H: usize = BLOCK_HEADER_SIZE;

    fn heap() -> Heap {
        let mut heap = Heap::new();
        heap.init(BASE, ARENA).unwrap();
        heap
    }

    /// Blocks tile the arena, the lists agree with the block states, and no
    /// two FREE blocks are left physically adjacent.
    fn assert_consistent(heap: &Heap) {
        let blocks: Vec<_> = heap.physical_blocks().collect();
        let mut expected_start = heap.base() + H;
        let mut total = 0;
        for pair in blocks.windows(2) {
            assert!(
                !(pair[0].status == BlockStatus::Free && pair[1].status == BlockStatus::Free),
                "adjacent free blocks left uncoalesced"
            );
        }
        for b in &blocks {
            assert_eq!(b.start, expected_start, "gap or overlap in arena");
            assert_eq!(b.size % HEAP_ALIGN, 0);
            expected_start += b.size + H;
            total += b.footprint();
        }
        assert_eq!(total, heap.capacity());

        let free: Vec<_> = heap.free_blocks().collect();
        assert!(free.windows(2).all(|w| w[0].start < w[1].start));
        assert!(free.iter().all(|b| b.status == BlockStatus::Free && b.owner.is_none()));
        assert_eq!(
            free.len(),
            blocks.iter().filter(|b| b.status == BlockStatus::Free).count()
        );

        let used: Vec<_> = heap.used_blocks().collect();
        assert!(used.iter().all(|b| b.status == BlockStatus::Occupied && b.owner.is_some()));
        assert_eq!(free.len() + used.len(), blocks.len());
    }

    #[test]
    fn test_init_creates_single_free_block() {
        let heap = heap();
        let free: Vec<_> = heap.free_blocks().collect();
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].start, BASE + H);
        assert_eq!(free[0].size, ARENA - H);
        assert_eq!(heap.used_blocks().count(), 0);
    }

    #[test]
    fn test_second_init_is_rejected() {
        let mut heap = heap();
        assert_eq!(heap.init(BASE, ARENA), Err(KernelError::AlreadyInitialized));
    }

    #[test]
    fn test_allocate_before_init_fails() {
        let mut heap = Heap::new();
        assert_eq!(heap.allocate(8, 1), Err(KernelError::HeapUninitialized));
        assert_eq!(heap.deallocate(BASE, 1), Err(KernelError::HeapUninitialized));
    }

    #[test]
    fn test_small_allocation_rounds_to_four_bytes() {
        let mut heap = heap();
        let addr = heap.allocate(10, 1).unwrap();
        assert_eq!(addr, BASE + H);

        let block = heap.find(addr).unwrap();
        assert_eq!(block.size, 12);
        assert_eq!(block.owner, Some(1));

        // What remains of the arena is one free block right behind it
        let largest = heap.free_blocks().next().unwrap();
        assert_eq!(largest.footprint(), ARENA - H - 12);
        assert_eq!(heap.largest_free(), Some(ARENA - 2 * H - 12));
        assert_consistent(&heap);
    }

    #[test]
    fn test_rejects_zero_and_oversized_requests() {
        let mut heap = heap();
        assert_eq!(heap.allocate(0, 1), Err(KernelError::InvalidRequest));
        assert_eq!(heap.allocate(ARENA - H + 1, 1), Err(KernelError::OutOfMemory));
        assert_consistent(&heap);
    }

    #[test]
    fn test_exact_fit_consumes_whole_arena() {
        let mut heap = heap();
        let addr = heap.allocate(ARENA - H, 1).unwrap();
        assert_eq!(heap.free_blocks().count(), 0);
        assert_eq!(heap.allocate(4, 1), Err(KernelError::OutOfMemory));

        heap.deallocate(addr, 1).unwrap();
        assert_eq!(heap.largest_free(), Some(ARENA - H));
        assert_consistent(&heap);
    }

    #[test]
    fn test_remainder_too_small_to_split_is_handed_out() {
        let mut heap = heap();
        // Leaves exactly one header's worth, no room for a minimum block
        let addr = heap.allocate(ARENA - 2 * H - 2, 1).unwrap();
        assert_eq!(heap.find(addr).unwrap().size, ARENA - H);
        assert_eq!(heap.free_blocks().count(), 0);
        assert_consistent(&heap);
    }

    #[test]
    fn test_first_fit_reuses_lowest_hole() {
        let mut heap = heap();
        let a = heap.allocate(64, 1).unwrap();
        let _b = heap.allocate(64, 1).unwrap();
        let c = heap.allocate(64, 1).unwrap();
        let _d = heap.allocate(64, 1).unwrap();
        heap.deallocate(c, 1).unwrap();
        heap.deallocate(a, 1).unwrap();

        assert_eq!(heap.allocate(32, 2).unwrap(), a);
        assert_consistent(&heap);
    }

    #[test]
    fn test_free_b_then_c_then_a_merges_everything() {
        let mut heap = heap();
        let a = heap.allocate(40, 1).unwrap();
        let b = heap.allocate(40, 1).unwrap();
        let c = heap.allocate(40, 1).unwrap();
        // Guard block keeps C away from the free tail
        let guard = heap.allocate(40, 1).unwrap();

        heap.deallocate(b, 1).unwrap();
        heap.deallocate(c, 1).unwrap();
        let free: Vec<_> = heap.free_blocks().collect();
        assert_eq!(free[0].start, b);
        assert_eq!(free[0].footprint(), 2 * (40 + H));
        assert_eq!(heap.find(a).unwrap().status, BlockStatus::Occupied);

        heap.deallocate(a, 1).unwrap();
        let free: Vec<_> = heap.free_blocks().collect();
        assert_eq!(free[0].start, a);
        assert_eq!(free[0].footprint(), 3 * (40 + H));
        assert_eq!(heap.find(guard).unwrap().status, BlockStatus::Occupied);
        assert_consistent(&heap);
    }

    #[test]
    fn test_coalescing_is_order_independent() {
        let layout = |first_a: bool| {
            let mut heap = heap();
            let a = heap.allocate(24, 1).unwrap();
            let b = heap.allocate(24, 1).unwrap();
            let _guard = heap.allocate(24, 1).unwrap();
            if first_a {
                heap.deallocate(a, 1).unwrap();
                heap.deallocate(b, 1).unwrap();
            } else {
                heap.deallocate(b, 1).unwrap();
                heap.deallocate(a, 1).unwrap();
            }
            assert_consistent(&heap);
            heap.free_blocks().collect::<Vec<_>>()
        };
        assert_eq!(layout(true), layout(false));
    }

    #[test]
    fn test_foreign_free_is_rejected_without_change() {
        let mut heap = heap();
        let addr = heap.allocate(16, 3).unwrap();
        let before: Vec<_> = heap.physical_blocks().collect();

        assert_eq!(heap.deallocate(addr, 4), Err(KernelError::NotOwner));
        assert_eq!(heap.physical_blocks().collect::<Vec<_>>(), before);
        assert_eq!(heap.find(addr).unwrap().owner, Some(3));

        heap.deallocate(addr, 3).unwrap();
        assert_consistent(&heap);
    }

    #[test]
    fn test_unknown_and_null_handles_are_rejected() {
        let mut heap = heap();
        let addr = heap.allocate(16, 1).unwrap();
        assert_eq!(heap.deallocate(0, 1), Err(KernelError::InvalidRequest));
        assert_eq!(heap.deallocate(addr + 4, 1), Err(KernelError::InvalidRequest));
        heap.deallocate(addr, 1).unwrap();
        // Double free
        assert_eq!(heap.deallocate(addr, 1), Err(KernelError::InvalidRequest));
        assert_consistent(&heap);
    }

    #[test]
    fn test_free_block_inserted_in_address_order() {
        let mut heap = heap();
        let blocks: Vec<_> = (0..6).map(|_| heap.allocate(16, 1).unwrap()).collect();
        heap.deallocate(blocks[3], 1).unwrap();
        heap.deallocate(blocks[1], 1).unwrap();
        heap.deallocate(blocks[5], 1).unwrap();

        let starts: Vec<_> = heap.free_blocks().map(|b| b.start).collect();
        assert_eq!(starts[0], blocks[1]);
        assert_eq!(starts[1], blocks[3]);
        // blocks[5] merged into the trailing free region
        assert_eq!(starts[2], blocks[5]);
        assert_eq!(starts.len(), 3);
        assert_consistent(&heap);
    }

    #[test]
    fn test_count_below_measures_fragmentation() {
        let mut heap = heap();
        let blocks: Vec<_> = (0..5).map(|_| heap.allocate(32, 1).unwrap()).collect();
        heap.deallocate(blocks[0], 1).unwrap();
        heap.deallocate(blocks[2], 1).unwrap();

        // Two 32-byte holes (footprint 32 + H) and one large tail
        assert_eq!(heap.count_below(32 + H), 0);
        assert_eq!(heap.count_below(32 + H + 1), 2);
        assert_eq!(heap.count_below(ARENA), 3);
    }

    #[test]
    fn test_small_allocations_split_until_the_arena_is_full() {
        let mut heap = Heap::new();
        heap.init(BASE, HEAP_SIZE).unwrap();
        let mut handles = Vec::new();
        while let Ok(addr) = heap.allocate(4, 1) {
            handles.push(addr);
        }

        // Every request was split off except the last, which took the
        // 12-byte remainder that could not hold another block
        assert_eq!(handles.len(), HEAP_SIZE / (H + MIN_BLOCK_SIZE));
        assert_eq!(handles.len(), MAX_BLOCKS);
        assert_eq!(heap.used_blocks().filter(|b| b.size == 4).count(), MAX_BLOCKS - 1);
        assert_eq!(heap.find(handles[MAX_BLOCKS - 1]).unwrap().size, 12);
        assert_eq!(heap.free_blocks().count(), 0);
        assert_consistent(&heap);

        for addr in handles {
            heap.deallocate(addr, 1).unwrap();
        }
        assert_eq!(heap.largest_free(), Some(HEAP_SIZE - H));
        assert_consistent(&heap);
    }

    #[test]
    fn test_init_rejects_arena_larger_than_descriptor_pool() {
        let mut heap = Heap::new();
        let too_big = (MAX_BLOCKS + 1) * (H + MIN_BLOCK_SIZE);
        assert_eq!(heap.init(BASE, too_big), Err(KernelError::InvalidRequest));
        assert!(!heap.is_initialized());
        heap.init(BASE, HEAP_SIZE).unwrap();
    }

    #[test]
    fn test_reset_forgets_the_arena() {
        let mut heap = heap();
        heap.allocate(64, 1).unwrap();
        heap.reset();
        assert!(!heap.is_initialized());
        assert_eq!(heap.physical_blocks().count(), 0);
        assert_eq!(heap.allocate(4, 1), Err(KernelError::HeapUninitialized));
        heap.init(BASE, ARENA).unwrap();
        assert_eq!(heap.largest_free(), Some(ARENA - H));
        assert_consistent(&heap);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Alloc(usize, TaskId),
        Free(usize),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1usize..300, 1usize..4).prop_map(|(size, owner)| Op::Alloc(size, owner)),
            any::<usize>().prop_map(Op::Free),
        ]
    }

    proptest! {
        #[test]
        fn test_blocks_always_tile_the_arena(ops in proptest::collection::vec(arb_op(), 1..80)) {
            let mut heap = heap();
            let mut live: Vec<(usize, TaskId)> = Vec::new();
            for op in ops {
                match op {
                    Op::Alloc(size, owner) => {
                        if let Ok(addr) = heap.allocate(size, owner) {
                            prop_assert!(heap.find(addr).unwrap().size >= size);
                            live.push((addr, owner));
                        }
                    }
                    Op::Free(pick) if !live.is_empty() => {
                        let (addr, owner) = live.swap_remove(pick % live.len());
                        prop_assert!(heap.deallocate(addr, owner).is_ok());
                    }
                    Op::Free(_) => {}
                }
                assert_consistent(&heap);
            }
            for (addr, owner) in live {
                prop_assert!(heap.deallocate(addr, owner).is_ok());
            }
            prop_assert_eq!(heap.free_blocks().count(), 1);
            prop_assert_eq!(heap.largest_free(), Some(ARENA - H));
        }

        #[test]
        fn test_foreign_owner_never_frees(size in 1usize..200, owner in 1usize..8, other in 1usize..8) {
            prop_assume!(owner != other);
            let mut heap = heap();
            let addr = heap.allocate(size, owner).unwrap();
            prop_assert_eq!(heap.deallocate(addr, other), Err(KernelError::NotOwner));
            prop_assert_eq!(heap.find(addr).map(|b| b.owner), Some(Some(owner)));
        }
    }
}
