//! Arena pools backing the trie.
//!
//! Everything a trie owns lives in one of three pools: nodes, per-node entry
//! arrays and per-node child arrays. Pools hand out 32-bit handles instead of
//! references, so growing a pool (which may move its storage) never
//! invalidates anything, and a whole trie is torn down by clearing its pools.
//!
//! - [`BlockPool`] stores fixed-size items in blocks of [`BLOCK_SIZE`].
//! - [`ArrayPool`] stores variable-length arrays in power-of-two size classes.
//!
//! Both keep a free list for individual release, but bulk [`clear`] is the
//! expected way to give memory back.
//!
//! [`clear`]: BlockPool::clear

use crate::error::{Error, Result};

/// log2 of the number of items per block.
pub const BLOCK_BITS: u32 = 10;

/// Items per block in a [`BlockPool`].
pub const BLOCK_SIZE: usize = 1 << BLOCK_BITS;

const OFFSET_MASK: u32 = (1 << BLOCK_BITS) - 1;

/// Number of blocks addressable before the handle space runs out. The last
/// slot of the last block would collide with [`Handle::NULL`].
const MAX_BLOCKS: usize = (u32::MAX >> BLOCK_BITS) as usize;

// =============================================================================
// Handle
// =============================================================================

/// A 32-bit reference to an item in a [`BlockPool`].
///
/// Layout: `[block:22][offset:10]`. `u32::MAX` is the null handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Handle(u32);

impl Handle {
    pub const NULL: Handle = Handle(u32::MAX);

    #[inline]
    fn new(block: usize, offset: usize) -> Self {
        debug_assert!(block < MAX_BLOCKS);
        debug_assert!(offset < BLOCK_SIZE);
        Handle(((block as u32) << BLOCK_BITS) | offset as u32)
    }

    /// Handle of the `index`-th item ever allocated from a fresh pool.
    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        Self::new(index >> BLOCK_BITS, index & OFFSET_MASK as usize)
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    pub fn block(self) -> usize {
        (self.0 >> BLOCK_BITS) as usize
    }

    #[inline]
    pub fn offset(self) -> usize {
        (self.0 & OFFSET_MASK) as usize
    }
}

impl Default for Handle {
    fn default() -> Self {
        Handle::NULL
    }
}

// =============================================================================
// BlockPool
// =============================================================================

/// Block-allocated pool of default-constructed items.
#[derive(Clone)]
pub struct BlockPool<T> {
    blocks: Vec<Box<[T]>>,
    /// Items handed out from the last block.
    used_in_last: usize,
    free: Vec<Handle>,
    live: usize,
    name: &'static str,
}

impl<T: Default> BlockPool<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            blocks: Vec::new(),
            used_in_last: 0,
            free: Vec::new(),
            live: 0,
            name,
        }
    }

    /// Create a pool whose first `n` items are already allocated.
    ///
    /// The reserved items have handles `from_index(0..n)`.
    pub(crate) fn with_reserved(name: &'static str, n: usize) -> Self {
        debug_assert!(n < MAX_BLOCKS);
        let mut pool = Self::new(name);
        while pool.live < n {
            if pool.blocks.is_empty() || pool.used_in_last == BLOCK_SIZE {
                pool.push_block();
            }
            let take = (n - pool.live).min(BLOCK_SIZE - pool.used_in_last);
            pool.used_in_last += take;
            pool.live += take;
        }
        pool
    }

    fn push_block(&mut self) {
        self.blocks
            .push((0..BLOCK_SIZE).map(|_| T::default()).collect());
        self.used_in_last = 0;
    }

    /// Allocate a default-constructed item.
    pub fn alloc(&mut self) -> Result<Handle> {
        if let Some(h) = self.free.pop() {
            self.blocks[h.block()][h.offset()] = T::default();
            self.live += 1;
            return Ok(h);
        }

        if self.blocks.is_empty() || self.used_in_last == BLOCK_SIZE {
            if self.blocks.len() >= MAX_BLOCKS {
                return Err(Error::PoolExhausted(self.name));
            }
            self.push_block();
        }

        let h = Handle::new(self.blocks.len() - 1, self.used_in_last);
        self.used_in_last += 1;
        self.live += 1;
        Ok(h)
    }

    /// Return an item to the free list. Its contents are reset on reuse.
    pub fn release(&mut self, h: Handle) {
        debug_assert!(!h.is_null());
        self.free.push(h);
        self.live -= 1;
    }

    #[inline]
    pub fn get(&self, h: Handle) -> &T {
        &self.blocks[h.block()][h.offset()]
    }

    #[inline]
    pub fn get_mut(&mut self, h: Handle) -> &mut T {
        &mut self.blocks[h.block()][h.offset()]
    }

    /// Number of items currently allocated.
    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    /// Drop every block at once.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.free.clear();
        self.used_in_last = 0;
        self.live = 0;
    }

    pub fn memory_usage(&self) -> usize {
        self.blocks.len() * BLOCK_SIZE * std::mem::size_of::<T>()
            + self.free.capacity() * std::mem::size_of::<Handle>()
    }
}

// =============================================================================
// ArrayPool
// =============================================================================

const CLASS_BITS: u32 = 5;
const SLOT_BITS: u32 = 32 - CLASS_BITS;
const SLOT_MASK: u32 = (1 << SLOT_BITS) - 1;

/// Largest size class (arrays of up to `2^MAX_CLASS` items). Class 31 is
/// reserved for [`ArrayRef::NULL`].
const MAX_CLASS: u32 = 30;

/// A reference to an array in an [`ArrayPool`].
///
/// Layout: `[class:5][slot:27]`, where the array capacity is `2^class`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct ArrayRef(u32);

impl ArrayRef {
    pub const NULL: ArrayRef = ArrayRef(u32::MAX);

    #[inline]
    fn new(class: u32, slot: u32) -> Self {
        debug_assert!(class <= MAX_CLASS);
        debug_assert!(slot <= SLOT_MASK);
        ArrayRef((class << SLOT_BITS) | slot)
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    fn class(self) -> usize {
        (self.0 >> SLOT_BITS) as usize
    }

    #[inline]
    fn slot(self) -> usize {
        (self.0 & SLOT_MASK) as usize
    }

    /// Number of items the referenced array can hold.
    #[inline]
    pub fn capacity(self) -> usize {
        if self.is_null() {
            0
        } else {
            1 << self.class()
        }
    }
}

impl Default for ArrayRef {
    fn default() -> Self {
        ArrayRef::NULL
    }
}

#[derive(Clone, Default)]
struct SizeClass<T> {
    slab: Vec<T>,
    free: Vec<u32>,
}

/// Pool of variable-length arrays in power-of-two size classes.
///
/// Each class is one contiguous slab; an array is a slot in its class's slab.
#[derive(Clone)]
pub struct ArrayPool<T> {
    classes: Vec<SizeClass<T>>,
    name: &'static str,
}

#[inline]
fn class_for(cap: usize) -> u32 {
    cap.max(1).next_power_of_two().trailing_zeros()
}

impl<T: Copy + Default> ArrayPool<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            classes: Vec::new(),
            name,
        }
    }

    /// Allocate an array holding at least `cap` default items.
    pub fn alloc(&mut self, cap: usize) -> Result<ArrayRef> {
        let class = class_for(cap);
        if class > MAX_CLASS {
            return Err(Error::PoolExhausted(self.name));
        }
        let class_idx = class as usize;
        if self.classes.len() <= class_idx {
            self.classes.resize_with(class_idx + 1, || SizeClass {
                slab: Vec::new(),
                free: Vec::new(),
            });
        }

        let size = 1usize << class;
        let sc = &mut self.classes[class_idx];
        if let Some(slot) = sc.free.pop() {
            let start = slot as usize * size;
            sc.slab[start..start + size].fill(T::default());
            return Ok(ArrayRef::new(class, slot));
        }

        let slot = sc.slab.len() / size;
        if slot > SLOT_MASK as usize {
            return Err(Error::PoolExhausted(self.name));
        }
        sc.slab.resize(sc.slab.len() + size, T::default());
        Ok(ArrayRef::new(class, slot as u32))
    }

    /// Move the first `len` items of `r` into an array of capacity at least
    /// `min_cap`, releasing `r`. A null `r` just allocates.
    pub fn grow(&mut self, r: ArrayRef, len: usize, min_cap: usize) -> Result<ArrayRef> {
        debug_assert!(len <= r.capacity());
        let new = self.alloc(min_cap.max(r.capacity() * 2))?;
        if r.is_null() {
            return Ok(new);
        }

        let (old_class, new_class) = (r.class(), new.class());
        debug_assert!(old_class < new_class);
        let old_start = r.slot() << old_class;
        let new_start = new.slot() << new_class;
        let (lo, hi) = self.classes.split_at_mut(new_class);
        hi[0].slab[new_start..new_start + len]
            .copy_from_slice(&lo[old_class].slab[old_start..old_start + len]);

        self.release(r);
        Ok(new)
    }

    /// Return an array to its class's free list. Null refs are ignored.
    pub fn release(&mut self, r: ArrayRef) {
        if r.is_null() {
            return;
        }
        self.classes[r.class()].free.push(r.slot() as u32);
    }

    #[inline]
    pub fn slice(&self, r: ArrayRef, len: usize) -> &[T] {
        if r.is_null() {
            debug_assert_eq!(len, 0);
            return &[];
        }
        debug_assert!(len <= r.capacity());
        let start = r.slot() << r.class();
        &self.classes[r.class()].slab[start..start + len]
    }

    #[inline]
    pub fn slice_mut(&mut self, r: ArrayRef, len: usize) -> &mut [T] {
        if r.is_null() {
            debug_assert_eq!(len, 0);
            return &mut [];
        }
        debug_assert!(len <= r.capacity());
        let start = r.slot() << r.class();
        &mut self.classes[r.class()].slab[start..start + len]
    }

    /// Number of arrays currently allocated.
    pub fn live(&self) -> usize {
        self.classes
            .iter()
            .enumerate()
            .map(|(class, sc)| (sc.slab.len() >> class) - sc.free.len())
            .sum()
    }

    pub fn clear(&mut self) {
        self.classes.clear();
    }

    pub fn memory_usage(&self) -> usize {
        self.classes
            .iter()
            .map(|sc| {
                sc.slab.capacity() * std::mem::size_of::<T>()
                    + sc.free.capacity() * std::mem::size_of::<u32>()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default, Debug, PartialEq)]
    struct Item {
        a: u64,
        b: u32,
    }

    #[test]
    fn test_handle_layout() {
        let h = Handle::new(3, 17);
        assert_eq!(h.block(), 3);
        assert_eq!(h.offset(), 17);
        assert_eq!(Handle::from_index(3 * BLOCK_SIZE + 17), h);
        assert!(Handle::NULL.is_null());
        assert!(!h.is_null());
    }

    #[test]
    fn test_block_pool_alloc_spans_blocks() {
        let mut pool: BlockPool<Item> = BlockPool::new("test");
        let handles: Vec<Handle> = (0..BLOCK_SIZE * 2 + 5)
            .map(|_| pool.alloc().unwrap())
            .collect();
        assert_eq!(pool.live(), BLOCK_SIZE * 2 + 5);
        assert_eq!(handles[BLOCK_SIZE].block(), 1);
        assert_eq!(handles[BLOCK_SIZE].offset(), 0);

        for (i, &h) in handles.iter().enumerate() {
            pool.get_mut(h).a = i as u64;
        }
        for (i, &h) in handles.iter().enumerate() {
            assert_eq!(pool.get(h).a, i as u64);
        }
    }

    #[test]
    fn test_block_pool_reuse_is_default() {
        let mut pool: BlockPool<Item> = BlockPool::new("test");
        let h = pool.alloc().unwrap();
        *pool.get_mut(h) = Item { a: 7, b: 9 };
        pool.release(h);
        assert_eq!(pool.live(), 0);

        let h2 = pool.alloc().unwrap();
        assert_eq!(h2, h);
        assert_eq!(pool.get(h2), &Item::default());
    }

    #[test]
    fn test_block_pool_reserved() {
        let mut pool: BlockPool<Item> = BlockPool::with_reserved("test", BLOCK_SIZE + 3);
        assert_eq!(pool.live(), BLOCK_SIZE + 3);
        let next = pool.alloc().unwrap();
        assert_eq!(next, Handle::from_index(BLOCK_SIZE + 3));

        pool.clear();
        assert_eq!(pool.live(), 0);
        assert_eq!(pool.memory_usage(), 0);
    }

    #[test]
    fn test_array_pool_classes() {
        let mut pool: ArrayPool<u32> = ArrayPool::new("test");
        let a = pool.alloc(3).unwrap();
        assert_eq!(a.capacity(), 4);
        let b = pool.alloc(1).unwrap();
        assert_eq!(b.capacity(), 1);
        let c = pool.alloc(0).unwrap();
        assert_eq!(c.capacity(), 1);
        assert_eq!(pool.live(), 3);

        pool.slice_mut(a, 4).copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(pool.slice(a, 4), &[1, 2, 3, 4]);
        assert_eq!(pool.slice(ArrayRef::NULL, 0), &[] as &[u32]);
    }

    #[test]
    fn test_array_pool_grow_preserves_prefix() {
        let mut pool: ArrayPool<u32> = ArrayPool::new("test");
        let mut r = ArrayRef::NULL;
        let mut len = 0usize;
        for i in 0..100u32 {
            if len == r.capacity() {
                r = pool.grow(r, len, len + 1).unwrap();
            }
            pool.slice_mut(r, len + 1)[len] = i;
            len += 1;
        }
        assert_eq!(r.capacity(), 128);
        let expected: Vec<u32> = (0..100).collect();
        assert_eq!(pool.slice(r, len), expected.as_slice());
        // Only the final array is live; every smaller class went to a free list.
        assert_eq!(pool.live(), 1);
    }

    #[test]
    fn test_array_pool_release_then_reuse_is_default() {
        let mut pool: ArrayPool<u64> = ArrayPool::new("test");
        let r = pool.alloc(8).unwrap();
        pool.slice_mut(r, 8).fill(42);
        pool.release(r);
        let r2 = pool.alloc(5).unwrap();
        assert_eq!(r2, r);
        assert!(pool.slice(r2, 8).iter().all(|&x| x == 0));
    }

    #[test]
    fn test_array_pool_oversized_class_is_exhausted() {
        let mut pool: ArrayPool<u8> = ArrayPool::new("bytes");
        assert!(matches!(pool.alloc((1 << MAX_CLASS) + 1), Err(Error::PoolExhausted("bytes"))));
        assert!(pool.classes.is_empty(), "a rejected request must not grow the pool");
    }

    #[test]
    fn test_array_pool_slot_space_is_exhausted() {
        // Zero-sized items make a full slab free to build.
        let mut pool: ArrayPool<()> = ArrayPool::new("units");
        pool.classes.push(SizeClass {
            slab: vec![(); SLOT_MASK as usize],
            free: Vec::new(),
        });
        let last = pool.alloc(1).unwrap();
        assert_eq!(last.slot(), SLOT_MASK as usize);
        assert!(matches!(pool.alloc(1), Err(Error::PoolExhausted("units"))));

        pool.release(last);
        assert!(pool.alloc(1).is_ok(), "a released slot is reusable");
    }
}
