//! One level of the trie.
//!
//! A node is a sorted array of [`Datum`]s, an optional parallel array of child
//! handles and one internal value. Both arrays live in [`ArrayPool`]s owned by
//! the trie; the node itself only holds their refs and lengths.
//!
//! The child array is sparse at its tail: it is only backed up to the last
//! entry with `has_children`, so leaf-heavy nodes (the common case for the
//! deepest n-gram order) carry no child storage at all.

use crate::arena::{ArrayPool, ArrayRef, Handle};
use crate::datum::Datum;
use crate::error::Result;

#[derive(Clone, Copy, Debug, Default)]
pub struct Node<I> {
    entries: ArrayRef,
    len: u32,
    children: ArrayRef,
    children_len: u32,
    internal: I,
}

impl<I: Copy + Default> Node<I> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn internal(&self) -> I {
        self.internal
    }

    #[inline]
    pub fn set_internal(&mut self, value: I) {
        self.internal = value;
    }

    #[inline]
    pub fn entries<'a, L: Copy + Default>(&self, pool: &'a ArrayPool<Datum<L>>) -> &'a [Datum<L>] {
        pool.slice(self.entries, self.len())
    }

    #[inline]
    pub fn entry_mut<'a, L: Copy + Default>(
        &self,
        pool: &'a mut ArrayPool<Datum<L>>,
        pos: usize,
    ) -> &'a mut Datum<L> {
        &mut pool.slice_mut(self.entries, self.len())[pos]
    }

    /// Binary search for `key`: `Ok(pos)` if present, `Err(insert_pos)` if not.
    #[inline]
    pub fn find<L: Copy + Default>(
        &self,
        pool: &ArrayPool<Datum<L>>,
        key: u32,
    ) -> std::result::Result<usize, usize> {
        self.entries(pool).binary_search_by_key(&key, |d| d.key())
    }

    /// Child node of the entry at `pos`, if it has one.
    #[inline]
    pub fn child(&self, pool: &ArrayPool<Handle>, pos: usize) -> Option<Handle> {
        if pos >= self.children_len as usize {
            return None;
        }
        let h = pool.slice(self.children, self.children_len as usize)[pos];
        (!h.is_null()).then_some(h)
    }

    /// Find `key`, inserting a flagless entry in order if it is absent.
    pub fn insert<L: Copy + Default>(
        &mut self,
        entries: &mut ArrayPool<Datum<L>>,
        children: &mut ArrayPool<Handle>,
        key: u32,
    ) -> Result<usize> {
        let pos = match self.find(entries, key) {
            Ok(pos) => return Ok(pos),
            Err(pos) => pos,
        };

        let len = self.len();
        if len == self.entries.capacity() {
            self.entries = entries.grow(self.entries, len, len + 1)?;
        }
        let slots = entries.slice_mut(self.entries, len + 1);
        slots.copy_within(pos..len, pos + 1);
        slots[pos] = Datum::new(key);
        self.len += 1;

        // Keep the child array aligned when the new entry lands inside it.
        let clen = self.children_len as usize;
        if pos < clen {
            if clen == self.children.capacity() {
                self.children = children.grow(self.children, clen, clen + 1)?;
            }
            let slots = children.slice_mut(self.children, clen + 1);
            slots.copy_within(pos..clen, pos + 1);
            slots[pos] = Handle::NULL;
            self.children_len += 1;
        }

        Ok(pos)
    }

    #[inline]
    pub fn set_leaf_value<L: Copy + Default>(
        &self,
        entries: &mut ArrayPool<Datum<L>>,
        pos: usize,
        value: L,
    ) {
        self.entry_mut(entries, pos).set_leaf(value);
    }

    /// Attach `child` to the entry at `pos`, backing the child array up to it.
    pub fn create_children<L: Copy + Default>(
        &mut self,
        entries: &mut ArrayPool<Datum<L>>,
        children: &mut ArrayPool<Handle>,
        pos: usize,
        child: Handle,
    ) -> Result<()> {
        debug_assert!(pos < self.len());
        let clen = self.children_len as usize;
        if pos >= clen {
            if pos >= self.children.capacity() {
                self.children = children.grow(self.children, clen, pos + 1)?;
            }
            // Fresh pool slots are already null; grown ones were copied only
            // up to `clen`, so fill the gap explicitly.
            children.slice_mut(self.children, pos + 1)[clen..].fill(Handle::NULL);
            self.children_len = pos as u32 + 1;
        }
        children.slice_mut(self.children, self.children_len as usize)[pos] = child;
        self.entry_mut(entries, pos).set_has_children();
        Ok(())
    }

    /// Build a node from entries already sorted by key. `items[i].1` is the
    /// child of `items[i].0`, or null.
    pub fn from_items<L: Copy + Default>(
        internal: I,
        items: &[(Datum<L>, Handle)],
        entries: &mut ArrayPool<Datum<L>>,
        children: &mut ArrayPool<Handle>,
    ) -> Result<Self> {
        debug_assert!(items.windows(2).all(|w| w[0].0.key() < w[1].0.key()));
        let mut node = Node {
            internal,
            ..Node::default()
        };
        if items.is_empty() {
            return Ok(node);
        }

        node.entries = entries.alloc(items.len())?;
        node.len = items.len() as u32;
        for (slot, (d, _)) in entries
            .slice_mut(node.entries, items.len())
            .iter_mut()
            .zip(items)
        {
            *slot = *d;
        }

        if let Some(last) = items.iter().rposition(|(_, h)| !h.is_null()) {
            let clen = last + 1;
            node.children = children.alloc(clen)?;
            node.children_len = clen as u32;
            for (slot, (_, h)) in children
                .slice_mut(node.children, clen)
                .iter_mut()
                .zip(items)
            {
                *slot = *h;
            }
        }
        Ok(node)
    }

    /// Entries paired with their child handles (null when childless).
    pub fn items<L: Copy + Default>(
        &self,
        entries: &ArrayPool<Datum<L>>,
        children: &ArrayPool<Handle>,
    ) -> Vec<(Datum<L>, Handle)> {
        self.entries(entries)
            .iter()
            .enumerate()
            .map(|(pos, d)| (*d, self.child(children, pos).unwrap_or(Handle::NULL)))
            .collect()
    }

    /// Give the node's arrays back to their pools and empty it.
    pub fn release_arrays<L: Copy + Default>(
        &mut self,
        entries: &mut ArrayPool<Datum<L>>,
        children: &mut ArrayPool<Handle>,
    ) {
        entries.release(self.entries);
        children.release(self.children);
        *self = Node {
            internal: self.internal,
            ..Node::default()
        };
    }
}
