//! Arena-backed trie over sequences of 30-bit keys.
//!
//! The top level is a table of `2^root_hash_bits` root nodes selected by the
//! low bits of a key's first element, which keeps the entry point's sorted
//! arrays short when the first level is very wide (a language model's
//! unigrams). Below that, every level is a [`Node`]: a sorted entry array with
//! binary-search lookup.
//!
//! Each node also carries an *internal value* addressed by the key prefix that
//! leads to it. Prefix length 0 addresses the trie's own root value (stored on
//! root bucket 0).
//!
//! ## Example
//!
//! ```rust
//! use lmtrie::Trie;
//!
//! let mut trie: Trie<f32, f32> = Trie::new();
//! trie.insert(&[3, 1], -0.5).unwrap();
//! trie.insert(&[3], -1.0).unwrap();
//!
//! let hit = trie.find(&[3, 1]);
//! assert!(hit.found);
//! assert_eq!(hit.value, -0.5);
//!
//! let miss = trie.find(&[3, 2]);
//! assert!(!miss.found);
//! assert_eq!(miss.depth, 1);
//! assert_eq!(miss.value, -1.0);
//! ```

use std::ops::{AddAssign, RangeInclusive};

use smallvec::SmallVec;

use crate::arena::{ArrayPool, BlockPool, Handle};
use crate::datum::{check_key, Datum};
use crate::error::{Error, Result};
use crate::node::Node;

mod binary;
mod iter;

pub use binary::{IdentityMapper, KeyMapper, PlainValue, VecMapper};
pub use iter::{Entries, EntryRef, Iter};

/// Largest supported `root_hash_bits`.
pub const MAX_ROOT_HASH_BITS: u8 = 20;

/// Result of [`Trie::find`].
///
/// `value` and `depth` describe the deepest prefix of the query that is stored
/// as a leaf (`depth == 0` and a default value when there is none). When
/// `found` is true that prefix is the whole query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Find<L> {
    pub found: bool,
    pub value: L,
    pub depth: usize,
}

/// One-slot-per-depth memo of the last path walked by an insertion.
///
/// `steps[i] = (key[i], child)` where `child` is the node reached after
/// consuming `key[..=i]`. Sorted n-gram files share long prefixes between
/// consecutive lines, so most descents hit here instead of binary searching.
#[derive(Clone, Default)]
struct PathCache {
    steps: SmallVec<[(u32, Handle); 8]>,
}

impl PathCache {
    #[inline]
    fn get(&self, depth: usize, key: u32) -> Option<Handle> {
        match self.steps.get(depth) {
            Some(&(k, h)) if k == key => Some(h),
            _ => None,
        }
    }

    #[inline]
    fn record(&mut self, depth: usize, key: u32, child: Handle) {
        self.steps.truncate(depth);
        self.steps.push((key, child));
    }

    #[inline]
    fn invalidate(&mut self) {
        self.steps.clear();
    }
}

/// A trie mapping key sequences to leaf values `L`, with one internal value
/// `I` per node.
///
/// Values are plain `Copy` data; tearing the trie down never runs per-entry
/// destructors.
#[derive(Clone)]
pub struct Trie<L, I> {
    root_hash_bits: u8,
    /// Root buckets are the first `1 << root_hash_bits` nodes of `nodes`.
    num_roots: usize,
    nodes: BlockPool<Node<I>>,
    entries: ArrayPool<Datum<L>>,
    children: ArrayPool<Handle>,
    cache: PathCache,
    /// Number of leaves.
    count: usize,
}

impl<L: Copy + Default, I: Copy + Default> Trie<L, I> {
    /// A trie with a single root bucket.
    pub fn new() -> Self {
        Self::build(0)
    }

    /// A trie with `2^bits` root buckets.
    pub fn with_root_hash_bits(bits: u8) -> Result<Self> {
        if bits > MAX_ROOT_HASH_BITS {
            return Err(Error::config(format!(
                "root_hash_bits must be at most {MAX_ROOT_HASH_BITS}, got {bits}"
            )));
        }
        Ok(Self::build(bits))
    }

    fn build(bits: u8) -> Self {
        let num_roots = 1usize << bits;
        Self {
            root_hash_bits: bits,
            num_roots,
            nodes: BlockPool::with_reserved("node", num_roots),
            entries: ArrayPool::new("entry array"),
            children: ArrayPool::new("child array"),
            cache: PathCache::default(),
            count: 0,
        }
    }

    #[inline]
    pub fn root_hash_bits(&self) -> u8 {
        self.root_hash_bits
    }

    /// Number of leaves.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of nodes below the root buckets.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.live() - self.num_roots
    }

    pub fn memory_usage(&self) -> usize {
        self.nodes.memory_usage() + self.entries.memory_usage() + self.children.memory_usage()
    }

    /// Drop every node, entry and internal value at once.
    pub fn clear(&mut self) {
        *self = Self::build(self.root_hash_bits);
    }

    #[inline]
    fn bucket(&self, first: u32) -> usize {
        (first as usize) & (self.num_roots - 1)
    }

    #[inline]
    fn root_for(&self, first: u32) -> Handle {
        Handle::from_index(self.bucket(first))
    }

    #[inline]
    fn root_handle(bucket: usize) -> Handle {
        Handle::from_index(bucket)
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Child of `key` in `node`, creating the entry and the child as needed.
    fn child_or_create(&mut self, node: Handle, key: u32) -> Result<Handle> {
        let pos = self
            .nodes
            .get_mut(node)
            .insert(&mut self.entries, &mut self.children, key)?;
        if let Some(child) = self.nodes.get(node).child(&self.children, pos) {
            return Ok(child);
        }
        let child = self.nodes.alloc()?;
        self.nodes
            .get_mut(node)
            .create_children(&mut self.entries, &mut self.children, pos, child)?;
        Ok(child)
    }

    /// Walk `prefix` from the root bucket of `first`, creating missing nodes,
    /// and return the node reached.
    fn descend_create(&mut self, first: u32, prefix: &[u32]) -> Result<Handle> {
        let mut node = self.root_for(first);
        for (depth, &k) in prefix.iter().enumerate() {
            if let Some(child) = self.cache.get(depth, k) {
                node = child;
                continue;
            }
            let child = self.child_or_create(node, k)?;
            self.cache.record(depth, k, child);
            node = child;
        }
        Ok(node)
    }

    /// Node and position of the entry for `prefix ++ [last]`, created if
    /// absent. `first` is the key's first element.
    fn entry_create(&mut self, first: u32, prefix: &[u32], last: u32) -> Result<(Handle, usize)> {
        let node = self.descend_create(first, prefix)?;
        let pos = self
            .nodes
            .get_mut(node)
            .insert(&mut self.entries, &mut self.children, last)?;
        Ok((node, pos))
    }

    /// Insert `value` at `key`, returning the previous value if there was one.
    pub fn insert(&mut self, key: &[u32], value: L) -> Result<Option<L>> {
        debug_assert!(!key.is_empty(), "empty key");
        let Some((&last, prefix)) = key.split_last() else {
            return Err(Error::EmptyKey);
        };
        check_key(key)?;
        let (node, pos) = self.entry_create(key[0], prefix, last)?;
        let d = self.nodes.get(node).entry_mut(&mut self.entries, pos);
        let old = d.is_leaf().then(|| d.value());
        d.set_leaf(value);
        if old.is_none() {
            self.count += 1;
        }
        Ok(old)
    }

    /// Value at `key`, inserting a default leaf when absent. The flag is true
    /// when the key was already present.
    pub fn find_or_insert(&mut self, key: &[u32]) -> Result<(&mut L, bool)> {
        debug_assert!(!key.is_empty(), "empty key");
        let Some((&last, prefix)) = key.split_last() else {
            return Err(Error::EmptyKey);
        };
        check_key(key)?;
        let (node, pos) = self.entry_create(key[0], prefix, last)?;
        let node = *self.nodes.get(node);
        let present = node.entries(&self.entries)[pos].is_leaf();
        if !present {
            node.set_leaf_value(&mut self.entries, pos, L::default());
            self.count += 1;
        }
        Ok((node.entry_mut(&mut self.entries, pos).value_mut(), present))
    }

    /// Set the internal value of the node addressed by `key` (the root value
    /// when `key` is empty), creating the path as needed.
    pub fn set_internal_node_value(&mut self, key: &[u32], value: I) -> Result<()> {
        let node = match key.first() {
            None => Self::root_handle(0),
            Some(&first) => {
                check_key(key)?;
                self.descend_create(first, key)?
            }
        };
        self.nodes.get_mut(node).set_internal(value);
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Visit every entry on the path of `key`, with its depth (1-based).
    /// Stops at the first missing element.
    #[inline]
    fn walk(&self, key: &[u32], mut visit: impl FnMut(usize, &Datum<L>)) {
        let Some(&first) = key.first() else { return };
        let mut node = self.nodes.get(self.root_for(first));
        for (i, &k) in key.iter().enumerate() {
            let Ok(pos) = node.find(&self.entries, k) else { return };
            visit(i + 1, &node.entries(&self.entries)[pos]);
            if i + 1 == key.len() {
                return;
            }
            match node.child(&self.children, pos) {
                Some(child) => node = self.nodes.get(child),
                None => return,
            }
        }
    }

    /// Visit every node addressed by a prefix of `key` of length up to
    /// `max_len`, starting with the root value (length 0).
    #[inline]
    fn walk_nodes(&self, key: &[u32], max_len: usize, mut visit: impl FnMut(usize, &Node<I>)) {
        visit(0, self.nodes.get(Self::root_handle(0)));
        let Some(&first) = key.first() else { return };
        let mut node = self.nodes.get(self.root_for(first));
        for (i, &k) in key.iter().take(max_len).enumerate() {
            let Ok(pos) = node.find(&self.entries, k) else { return };
            let Some(child) = node.child(&self.children, pos) else { return };
            node = self.nodes.get(child);
            visit(i + 1, node);
        }
    }

    /// Look up `key`, also reporting its deepest stored leaf prefix.
    pub fn find(&self, key: &[u32]) -> Find<L> {
        debug_assert!(!key.is_empty(), "empty key");
        let mut res = Find {
            found: false,
            value: L::default(),
            depth: 0,
        };
        self.walk(key, |depth, d| {
            if d.is_leaf() {
                res.value = d.value();
                res.depth = depth;
            }
        });
        res.found = res.depth == key.len() && !key.is_empty();
        res
    }

    /// Leaf value at `key`, if stored.
    pub fn get(&self, key: &[u32]) -> Option<L> {
        let hit = self.find(key);
        hit.found.then_some(hit.value)
    }

    #[inline]
    pub fn contains_key(&self, key: &[u32]) -> bool {
        self.find(key).found
    }

    pub fn get_internal_node_value(&self, key: &[u32]) -> Option<I> {
        let mut out = None;
        self.walk_nodes(key, key.len(), |len, node| {
            if len == key.len() {
                out = Some(node.internal());
            }
        });
        out
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Depth-first visit of every leaf with its full key.
    pub fn traverse(&self, mut visitor: impl FnMut(&[u32], &L)) {
        let mut path = Vec::new();
        for bucket in 0..self.num_roots {
            self.traverse_node(Self::root_handle(bucket), &mut path, &mut visitor);
        }
    }

    fn traverse_node(&self, h: Handle, path: &mut Vec<u32>, visitor: &mut impl FnMut(&[u32], &L)) {
        let node = self.nodes.get(h);
        for (pos, d) in node.entries(&self.entries).iter().enumerate() {
            path.push(d.key());
            if d.is_leaf() {
                visitor(path, d.value_ref());
            }
            if let Some(child) = node.child(&self.children, pos) {
                self.traverse_node(child, path, visitor);
            }
            path.pop();
        }
    }

    /// Depth-first visit of every node below the roots, with the key that
    /// addresses it and its internal value.
    pub fn traverse_internal(&self, mut visitor: impl FnMut(&[u32], &I)) {
        fn rec<L: Copy + Default, I: Copy + Default>(
            t: &Trie<L, I>,
            h: Handle,
            path: &mut Vec<u32>,
            visitor: &mut impl FnMut(&[u32], &I),
        ) {
            let node = t.nodes.get(h);
            for (pos, d) in node.entries(&t.entries).iter().enumerate() {
                if let Some(child) = node.child(&t.children, pos) {
                    path.push(d.key());
                    visitor(path, &t.nodes.get(child).internal());
                    rec(t, child, path, visitor);
                    path.pop();
                }
            }
        }

        let mut path = Vec::new();
        for bucket in 0..self.num_roots {
            rec(self, Self::root_handle(bucket), &mut path, &mut visitor);
        }
    }

    /// All `(key, value)` leaves, bucket-major then key-ascending, prefixes
    /// before their extensions.
    pub fn iter(&self) -> Iter<'_, L, I> {
        Iter::new(self)
    }

    /// Entries of the root buckets, skipping empty buckets.
    pub fn root_entries(&self) -> Entries<'_, L, I> {
        Entries::roots(self)
    }
}

impl<L: Copy + Default + AddAssign, I: Copy + Default> Trie<L, I> {
    /// Sum of the leaf values stored at the prefixes of `key` whose length is
    /// in `depths`, or `None` if there are none.
    pub fn sum(&self, key: &[u32], depths: RangeInclusive<usize>) -> Option<L> {
        let (lo, hi) = (*depths.start(), *depths.end());
        debug_assert!(lo <= hi || hi == 0, "inverted depth range");
        let mut acc: Option<L> = None;
        self.walk(&key[..hi.min(key.len())], |depth, d| {
            if depth >= lo && d.is_leaf() {
                match acc.as_mut() {
                    Some(a) => *a += d.value(),
                    None => acc = Some(d.value()),
                }
            }
        });
        acc
    }
}

impl<L: Copy + Default, I: Copy + Default + AddAssign> Trie<L, I> {
    /// Sum of the internal values addressed by the prefixes of `key` whose
    /// length is in `[min_len, max_len]`. Missing prefixes contribute nothing.
    pub fn sum_internal_node_values(&self, key: &[u32], min_len: usize, max_len: usize) -> I {
        let mut acc = I::default();
        self.walk_nodes(key, max_len.min(key.len()), |len, node| {
            if len >= min_len {
                acc += node.internal();
            }
        });
        acc
    }
}

impl<L: Copy + Default, I: Copy + Default> Default for Trie<L, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Copy + Default + std::fmt::Debug, I: Copy + Default> std::fmt::Debug for Trie<L, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}


#[cfg(test)]
mod proptests;
