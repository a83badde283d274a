//! # lmtrie
//!
//! Compact arena-backed n-gram trie and back-off language model store.
//!
//! The [`Trie`] maps sequences of 30-bit keys to leaf values and keeps one
//! internal value per node. Storage lives in handle-addressed pools, entries
//! are bit-packed and each node is a sorted array searched by bisection, so a
//! model with hundreds of millions of n-grams stays a few flat allocations.
//!
//! On top of it, [`lm`] loads ARPA and BinLM models (plain or gzipped) and
//! answers back-off queries in a single trie walk.
//!
//! ## Example
//!
//! ```rust
//! use lmtrie::Trie;
//!
//! let mut trie: Trie<f32, f32> = Trie::with_root_hash_bits(4).unwrap();
//! trie.insert(&[7, 3], -0.5).unwrap();
//! trie.insert(&[7], -1.25).unwrap();
//! trie.set_internal_node_value(&[7], -0.1).unwrap();
//!
//! assert_eq!(trie.get(&[7, 3]), Some(-0.5));
//! assert_eq!(trie.find(&[7, 9]).depth, 1);
//! assert_eq!(trie.sum(&[7, 3], 1..=2), Some(-1.75));
//! assert_eq!(trie.get_internal_node_value(&[7]), Some(-0.1));
//!
//! let bytes = trie.to_binary_bytes();
//! let mut copy: Trie<f32, f32> = Trie::new();
//! copy.read_binary(&bytes).unwrap();
//! assert_eq!(copy.get(&[7]), Some(-1.25));
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

pub mod arena;
pub mod config;
pub mod datum;
pub mod error;
pub mod lm;
pub mod node;
pub mod stream;
pub mod trie;
pub mod vocab;

pub use config::LmOptions;
pub use datum::{MAX_KEY, NO_KEY};
pub use error::{Error, Result};
pub use lm::{create, LanguageModel, MixLm, Model, TrieLm};
pub use trie::{Find, IdentityMapper, KeyMapper, PlainValue, Trie, VecMapper};
pub use vocab::{Vocab, UNK_TOKEN};
