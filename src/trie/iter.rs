use std::ops::Range;

use crate::arena::Handle;
use crate::datum::Datum;

use super::Trie;

/// Cursor over the entries of one node, or over all root buckets.
///
/// Root-level iteration moves from bucket to bucket and never yields anything
/// for an empty bucket. Exhaustion (`None`) plays the role of the end marker.
pub struct Entries<'a, L, I> {
    trie: &'a Trie<L, I>,
    node: Option<Handle>,
    pos: usize,
    /// Root buckets still to visit after `node`.
    buckets: Range<usize>,
}

/// One entry seen through [`Entries`].
pub struct EntryRef<'a, L, I> {
    trie: &'a Trie<L, I>,
    datum: &'a Datum<L>,
    child: Option<Handle>,
}

impl<'a, L: Copy + Default, I: Copy + Default> Entries<'a, L, I> {
    pub(super) fn roots(trie: &'a Trie<L, I>) -> Self {
        Self {
            trie,
            node: None,
            pos: 0,
            buckets: 0..trie.num_roots,
        }
    }

    fn children(trie: &'a Trie<L, I>, node: Option<Handle>) -> Self {
        Self {
            trie,
            node,
            pos: 0,
            buckets: 0..0,
        }
    }
}

impl<'a, L: Copy + Default, I: Copy + Default> Iterator for Entries<'a, L, I> {
    type Item = EntryRef<'a, L, I>;

    fn next(&mut self) -> Option<Self::Item> {
        let trie = self.trie;
        loop {
            let h = match self.node {
                Some(h) => h,
                None => {
                    let bucket = self.buckets.next()?;
                    self.pos = 0;
                    *self.node.insert(Trie::<L, I>::root_handle(bucket))
                }
            };

            let node = trie.nodes.get(h);
            let entries = node.entries(&trie.entries);
            if self.pos < entries.len() {
                let pos = self.pos;
                self.pos += 1;
                return Some(EntryRef {
                    trie,
                    datum: &entries[pos],
                    child: node.child(&trie.children, pos),
                });
            }
            self.node = None;
            if self.buckets.is_empty() {
                return None;
            }
        }
    }
}

impl<'a, L: Copy + Default, I: Copy + Default> EntryRef<'a, L, I> {
    #[inline]
    pub fn key(&self) -> u32 {
        self.datum.key()
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.datum.is_leaf()
    }

    /// The leaf value, if this entry is a leaf.
    #[inline]
    pub fn value(&self) -> Option<&'a L> {
        let datum: &'a Datum<L> = self.datum;
        datum.is_leaf().then(|| datum.value_ref())
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        self.child.is_some()
    }

    /// Internal value of this entry's child node, if it has one.
    pub fn internal(&self) -> Option<I> {
        self.child.map(|h| self.trie.nodes.get(h).internal())
    }

    /// Begin iterating this entry's children (empty if it has none).
    pub fn children(&self) -> Entries<'a, L, I> {
        Entries::children(self.trie, self.child)
    }
}

/// Iterator over every `(key, value)` leaf of a [`Trie`].
pub struct Iter<'a, L, I> {
    trie: &'a Trie<L, I>,
    next_bucket: usize,
    /// `(node, next position)` per level being walked.
    stack: Vec<(Handle, usize)>,
    path: Vec<u32>,
}

impl<'a, L: Copy + Default, I: Copy + Default> Iter<'a, L, I> {
    pub(super) fn new(trie: &'a Trie<L, I>) -> Self {
        Self {
            trie,
            next_bucket: 0,
            stack: Vec::new(),
            path: Vec::new(),
        }
    }
}

impl<'a, L: Copy + Default, I: Copy + Default> Iterator for Iter<'a, L, I> {
    type Item = (Vec<u32>, &'a L);

    fn next(&mut self) -> Option<Self::Item> {
        let trie = self.trie;
        loop {
            let Some(&(h, at)) = self.stack.last() else {
                if self.next_bucket >= trie.num_roots {
                    return None;
                }
                self.stack
                    .push((Trie::<L, I>::root_handle(self.next_bucket), 0));
                self.next_bucket += 1;
                continue;
            };

            let node = trie.nodes.get(h);
            let entries = node.entries(&trie.entries);
            if at >= entries.len() {
                self.stack.pop();
                continue;
            }
            if let Some(top) = self.stack.last_mut() {
                top.1 += 1;
            }

            let d = &entries[at];
            self.path.truncate(self.stack.len() - 1);
            self.path.push(d.key());
            if let Some(child) = node.child(&trie.children, at) {
                self.stack.push((child, 0));
            }
            if d.is_leaf() {
                return Some((self.path.clone(), d.value_ref()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::Trie;

    #[test]
    fn test_root_entries_skip_empty_buckets() {
        let mut t: Trie<u32, u32> = Trie::with_root_hash_bits(3).unwrap();
        // Only buckets 1 and 6 are used.
        t.insert(&[9], 1).unwrap();
        t.insert(&[1, 2], 2).unwrap();
        t.insert(&[6], 3).unwrap();

        let keys: Vec<u32> = t.root_entries().map(|e| e.key()).collect();
        assert_eq!(keys, vec![1, 9, 6]);
    }

    #[test]
    fn test_entry_ref_protocol() {
        let mut t: Trie<u32, u32> = Trie::new();
        t.insert(&[1], 10).unwrap();
        t.insert(&[1, 2], 12).unwrap();
        t.insert(&[1, 3, 4], 134).unwrap();
        t.set_internal_node_value(&[1], 5).unwrap();
        t.insert(&[2], 20).unwrap();

        let mut roots = t.root_entries();
        let one = roots.next().unwrap();
        assert_eq!(one.key(), 1);
        assert!(one.is_leaf());
        assert_eq!(one.value(), Some(&10));
        assert!(one.has_children());
        assert_eq!(one.internal(), Some(5));

        let kids: Vec<(u32, bool, bool)> = one
            .children()
            .map(|e| (e.key(), e.is_leaf(), e.has_children()))
            .collect();
        assert_eq!(kids, vec![(2, true, false), (3, false, true)]);

        let three = one.children().nth(1).unwrap();
        assert_eq!(three.value(), None);
        let deep: Vec<u32> = three.children().map(|e| *e.value().unwrap()).collect();
        assert_eq!(deep, vec![134]);

        let two = roots.next().unwrap();
        assert_eq!(two.key(), 2);
        assert!(!two.has_children());
        assert_eq!(two.children().count(), 0);
        assert!(roots.next().is_none());
        assert!(roots.next().is_none());
    }

    #[test]
    fn test_iter_empty_trie() {
        let t: Trie<u32, u32> = Trie::with_root_hash_bits(2).unwrap();
        assert_eq!(t.iter().count(), 0);
        assert_eq!(t.root_entries().count(), 0);
    }
}
