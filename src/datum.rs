//! Bit-packed trie entries.
//!
//! Layout of the packed word:
//! - Bits 0..30: key
//! - Bit 30: leaf flag (the entry carries a value)
//! - Bit 31: children flag (the entry has a child node)

use crate::error::{Error, Result};

/// Width of a key element in bits.
pub const KEY_BITS: u32 = 30;

/// Reserved key marking an empty slot or an unmappable token.
pub const NO_KEY: u32 = (1 << KEY_BITS) - 1;

/// Largest storable key element.
pub const MAX_KEY: u32 = NO_KEY - 1;

const KEY_MASK: u32 = NO_KEY;
const LEAF_BIT: u32 = 1 << 30;
const CHILDREN_BIT: u32 = 1 << 31;

/// Check that every element of `key` fits in the key space.
pub fn check_key(key: &[u32]) -> Result<()> {
    match key.iter().find(|&&k| k > MAX_KEY) {
        Some(&k) => Err(Error::KeyOutOfRange(k)),
        None => Ok(()),
    }
}

/// One key/flags/value record of a trie node.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Datum<L> {
    packed: u32,
    value: L,
}

impl<L: Default> Default for Datum<L> {
    fn default() -> Self {
        Self {
            packed: NO_KEY,
            value: L::default(),
        }
    }
}

impl<L: Copy + Default> Datum<L> {
    /// A fresh entry with neither flag set.
    #[inline]
    pub fn new(key: u32) -> Self {
        debug_assert!(key <= MAX_KEY, "key {key} out of range");
        Self {
            packed: key & KEY_MASK,
            value: L::default(),
        }
    }

    #[inline]
    pub(crate) fn from_packed(packed: u32, value: L) -> Self {
        Self { packed, value }
    }

    #[inline]
    pub fn key(&self) -> u32 {
        self.packed & KEY_MASK
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.packed & LEAF_BIT != 0
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        self.packed & CHILDREN_BIT != 0
    }

    /// The leaf value. Meaningless (default) unless `is_leaf`.
    #[inline]
    pub fn value(&self) -> L {
        self.value
    }

    #[inline]
    pub fn value_ref(&self) -> &L {
        &self.value
    }

    #[inline]
    pub fn value_mut(&mut self) -> &mut L {
        &mut self.value
    }

    #[inline]
    pub(crate) fn packed(&self) -> u32 {
        self.packed
    }

    #[inline]
    pub fn set_leaf(&mut self, value: L) {
        self.packed |= LEAF_BIT;
        self.value = value;
    }

    #[inline]
    pub(crate) fn set_has_children(&mut self) {
        self.packed |= CHILDREN_BIT;
    }
}
