//! Binary (de)serialization of a [`Trie`].
//!
//! ## Format
//!
//! All integers little-endian.
//!
//! ```text
//! magic: "PTRI" (4B)
//! version: u32
//! root_hash_bits: u32
//! leaf value size: u32, internal value size: u32
//! 2^root_hash_bits x node
//!
//! node:  internal: I, count: u32, count x entry
//! entry: packed: u32 (key | leaf bit | children bit)
//!        value: L                     (if leaf)
//!        len: u64, child: node        (if children; len = child byte length)
//! ```
//!
//! The child length prefix lets a filtered load skip a discarded subtree
//! without decoding it.

use std::io::Write;

use tracing::{debug, warn};

use crate::arena::Handle;
use crate::datum::{Datum, MAX_KEY, NO_KEY};
use crate::error::{Error, Result};
use crate::node::Node;

use super::Trie;

const MAGIC: [u8; 4] = *b"PTRI";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 20;

/// Deepest key accepted from a file.
const MAX_DEPTH: usize = 1024;

/// Values with a fixed-size byte encoding, eligible for bulk serialization.
///
/// Being `Copy`, implementors never need destructors, which is what lets a
/// deserialized trie be released in bulk.
pub trait PlainValue: Copy + Default + PartialEq {
    const SIZE: usize;

    fn write_le(&self, out: &mut Vec<u8>);

    /// Decode from exactly `SIZE` bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! plain_value {
    ($($t:ty),*) => {
        $(
            impl PlainValue for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                #[inline]
                fn write_le(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_le_bytes(buf)
                }
            }
        )*
    };
}

plain_value!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl PlainValue for () {
    const SIZE: usize = 0;

    fn write_le(&self, _out: &mut Vec<u8>) {}

    fn read_le(_bytes: &[u8]) -> Self {}
}

/// Rewrites keys while loading, e.g. from a model's private vocabulary
/// numbering to the caller's.
pub trait KeyMapper {
    /// The new key, or [`NO_KEY`] to drop the entry and its subtree.
    fn map(&self, key: u32) -> u32;

    /// True if `map` never changes a key; skips re-sorting and re-bucketing.
    fn is_identity(&self) -> bool;
}

/// Keeps every key as is.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityMapper;

impl KeyMapper for IdentityMapper {
    #[inline]
    fn map(&self, key: u32) -> u32 {
        key
    }

    fn is_identity(&self) -> bool {
        true
    }
}

/// Table-driven mapper: `table[old] = new`. Keys outside the table map to
/// [`NO_KEY`].
#[derive(Clone, Debug)]
pub struct VecMapper {
    table: Vec<u32>,
    identity: bool,
}

impl VecMapper {
    pub fn new(table: Vec<u32>) -> Self {
        let identity = table.iter().enumerate().all(|(i, &k)| k as usize == i);
        Self { table, identity }
    }
}

impl KeyMapper for VecMapper {
    #[inline]
    fn map(&self, key: u32) -> u32 {
        self.table.get(key as usize).copied().unwrap_or(NO_KEY)
    }

    fn is_identity(&self) -> bool {
        self.identity
    }
}

/// Bounds-checked cursor over a byte slice.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                Error::format(format!(
                    "trie blob truncated at byte {} (need {n} more)",
                    self.pos
                ))
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::read_le(self.take(4)?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::read_le(self.take(8)?))
    }

    fn value<T: PlainValue>(&mut self) -> Result<T> {
        Ok(T::read_le(self.take(T::SIZE)?))
    }
}

impl<L: PlainValue, I: PlainValue> Trie<L, I> {
    /// Serialize the whole trie into a byte buffer.
    pub fn to_binary_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.memory_usage() / 2);
        out.extend_from_slice(&MAGIC);
        VERSION.write_le(&mut out);
        u32::from(self.root_hash_bits).write_le(&mut out);
        (L::SIZE as u32).write_le(&mut out);
        (I::SIZE as u32).write_le(&mut out);
        for bucket in 0..self.num_roots {
            self.encode_node(Self::root_handle(bucket), &mut out);
        }
        out
    }

    /// Serialize the whole trie to `w`, returning the number of bytes written.
    pub fn write_binary<W: Write>(&self, w: &mut W) -> Result<usize> {
        let bytes = self.to_binary_bytes();
        w.write_all(&bytes)?;
        Ok(bytes.len())
    }

    fn encode_node(&self, h: Handle, out: &mut Vec<u8>) {
        let node = self.nodes.get(h);
        node.internal().write_le(out);
        (node.len() as u32).write_le(out);
        for (pos, d) in node.entries(&self.entries).iter().enumerate() {
            d.packed().write_le(out);
            if d.is_leaf() {
                d.value().write_le(out);
            }
            if let Some(child) = node.child(&self.children, pos) {
                let at = out.len();
                out.extend_from_slice(&[0u8; 8]);
                self.encode_node(child, out);
                let len = (out.len() - at - 8) as u64;
                out[at..at + 8].copy_from_slice(&len.to_le_bytes());
            }
        }
    }

    /// Load a serialized trie, replacing the current contents. Returns the
    /// number of bytes consumed.
    pub fn read_binary(&mut self, data: &[u8]) -> Result<usize> {
        self.read_binary_with(data, |_: &[u32]| true, &IdentityMapper)
    }

    /// Load a serialized trie through a filter and a key mapper.
    ///
    /// `filter` sees the mapped key path up to and including the entry being
    /// decoded; returning false discards the entry and everything below it
    /// without materializing any of it. Entries whose key maps to [`NO_KEY`]
    /// are discarded as well.
    ///
    /// The trie adopts the file's `root_hash_bits`. With a non-identity mapper
    /// every node is re-sorted and the root buckets are rebuilt afterwards
    /// ([`fix_root_buckets`](Self::fix_root_buckets)).
    pub fn read_binary_with<F, M>(&mut self, data: &[u8], mut filter: F, mapper: &M) -> Result<usize>
    where
        F: FnMut(&[u32]) -> bool,
        M: KeyMapper + ?Sized,
    {
        let mut r = Reader { data, pos: 0 };
        if r.take(4)? != MAGIC {
            return Err(Error::format("trie blob: invalid magic"));
        }
        let version = r.u32()?;
        if version != VERSION {
            return Err(Error::format(format!("trie blob: unsupported version {version}")));
        }
        let bits = r.u32()?;
        let bits = u8::try_from(bits)
            .ok()
            .filter(|&b| b <= super::MAX_ROOT_HASH_BITS)
            .ok_or_else(|| Error::format(format!("trie blob: bad root_hash_bits {bits}")))?;
        let (leaf_size, internal_size) = (r.u32()? as usize, r.u32()? as usize);
        if leaf_size != L::SIZE || internal_size != I::SIZE {
            return Err(Error::format(format!(
                "trie blob: value sizes {leaf_size}/{internal_size}, expected {}/{}",
                L::SIZE,
                I::SIZE
            )));
        }

        *self = Self::build(bits);
        let mut path = Vec::new();
        for bucket in 0..self.num_roots {
            let node = self.decode_node(&mut r, &mut path, &mut filter, mapper)?;
            *self.nodes.get_mut(Self::root_handle(bucket)) = node;
        }

        if !mapper.is_identity() {
            self.fix_root_buckets()?;
        }
        self.cache.invalidate();
        debug!(
            bytes = r.pos,
            leaves = self.count,
            nodes = self.node_count(),
            "decoded trie blob"
        );
        Ok(r.pos)
    }

    fn decode_node<F, M>(
        &mut self,
        r: &mut Reader<'_>,
        path: &mut Vec<u32>,
        filter: &mut F,
        mapper: &M,
    ) -> Result<Node<I>>
    where
        F: FnMut(&[u32]) -> bool,
        M: KeyMapper + ?Sized,
    {
        if path.len() > MAX_DEPTH {
            return Err(Error::format(format!("trie blob nested deeper than {MAX_DEPTH}")));
        }
        let internal: I = r.value()?;
        let count = r.u32()? as usize;
        let mut items: Vec<(Datum<L>, Handle)> = Vec::with_capacity(count.min(1 << 16));

        for _ in 0..count {
            let raw = Datum::<L>::from_packed(r.u32()?, L::default());
            if raw.key() > MAX_KEY {
                return Err(Error::format(format!("trie blob: invalid key {}", raw.key())));
            }
            let value: L = if raw.is_leaf() { r.value()? } else { L::default() };
            let child_len = if raw.has_children() {
                Some(r.u64()? as usize)
            } else {
                None
            };

            let key = mapper.map(raw.key());
            path.push(key);
            if key > MAX_KEY || !filter(path) {
                if let Some(len) = child_len {
                    r.take(len)?;
                }
                path.pop();
                continue;
            }

            let mut datum = Datum::new(key);
            if raw.is_leaf() {
                datum.set_leaf(value);
            }
            let mut child = Handle::NULL;
            if let Some(len) = child_len {
                let end = r.pos.saturating_add(len);
                let mut node = self.decode_node(r, path, filter, mapper)?;
                if r.pos != end {
                    return Err(Error::format(format!(
                        "trie blob: child record at byte {} has wrong length",
                        end - len
                    )));
                }
                if node.is_empty() && node.internal() == I::default() {
                    node.release_arrays(&mut self.entries, &mut self.children);
                } else {
                    child = self.nodes.alloc()?;
                    *self.nodes.get_mut(child) = node;
                    datum.set_has_children();
                }
            }
            path.pop();

            if !datum.is_leaf() && child.is_null() {
                continue;
            }
            if datum.is_leaf() {
                self.count += 1;
            }
            items.push((datum, child));
        }

        if !mapper.is_identity() {
            items.sort_by_key(|(d, _)| d.key());
            self.dedup_items(&mut items);
        } else if items.windows(2).any(|w| w[0].0.key() >= w[1].0.key()) {
            return Err(Error::format("trie blob: node entries out of order"));
        }
        Node::from_items(internal, &items, &mut self.entries, &mut self.children)
    }
}

impl<L: Copy + Default, I: Copy + Default> Trie<L, I> {
    /// Drop all but the first of any run of equal keys in sorted `items`.
    fn dedup_items(&mut self, items: &mut Vec<(Datum<L>, Handle)>) {
        let before = items.len();
        let mut kept: Vec<(Datum<L>, Handle)> = Vec::with_capacity(items.len());
        for (d, h) in items.drain(..) {
            if kept.last().is_some_and(|(k, _)| k.key() == d.key()) {
                if d.is_leaf() {
                    self.count -= 1;
                }
                if !h.is_null() {
                    self.release_subtree(h);
                }
                continue;
            }
            kept.push((d, h));
        }
        if kept.len() != before {
            warn!(
                dropped = before - kept.len(),
                "key mapper merged distinct keys; keeping the first of each"
            );
        }
        *items = kept;
    }

    /// Return a node and everything below it to the pools.
    fn release_subtree(&mut self, h: Handle) {
        let mut node = *self.nodes.get(h);
        for pos in 0..node.len() {
            if let Some(child) = node.child(&self.children, pos) {
                self.release_subtree(child);
            }
        }
        self.count -= node
            .entries(&self.entries)
            .iter()
            .filter(|d| d.is_leaf())
            .count();
        node.release_arrays(&mut self.entries, &mut self.children);
        self.nodes.release(h);
    }

    /// Rebuild every root bucket from scratch so each first-level entry sits
    /// in the bucket its (possibly rewritten) key hashes to.
    ///
    /// Needed after any pass that changes first-level keys in place, such as
    /// a load through a non-identity [`KeyMapper`].
    pub fn fix_root_buckets(&mut self) -> Result<()> {
        let mut all: Vec<(Datum<L>, Handle)> = Vec::new();
        for bucket in 0..self.num_roots {
            let h = Self::root_handle(bucket);
            let mut node = *self.nodes.get(h);
            all.extend(node.items(&self.entries, &self.children));
            node.release_arrays(&mut self.entries, &mut self.children);
            *self.nodes.get_mut(h) = node;
        }

        // Stable: among equal keys the earliest bucket wins.
        all.sort_by_key(|(d, _)| (self.bucket(d.key()), d.key()));
        let mut start = 0;
        while start < all.len() {
            let bucket = self.bucket(all[start].0.key());
            let end = start
                + all[start..]
                    .iter()
                    .take_while(|(d, _)| self.bucket(d.key()) == bucket)
                    .count();
            let mut items = all[start..end].to_vec();
            // Keys from different source buckets may have been mapped together.
            self.dedup_items(&mut items);

            let h = Self::root_handle(bucket);
            let internal = self.nodes.get(h).internal();
            *self.nodes.get_mut(h) =
                Node::from_items(internal, &items, &mut self.entries, &mut self.children)?;
            start = end;
        }

        self.cache.invalidate();
        Ok(())
    }
}
