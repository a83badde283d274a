//! Error types for trie and language model operations.

use std::io;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed model file (text or binary).
    #[error("format error: {0}")]
    Format(String),

    /// A key element does not fit in the 30-bit key space.
    #[error("key element {0} exceeds the maximum key {max}", max = crate::datum::MAX_KEY)]
    KeyOutOfRange(u32),

    /// Leaf operations need at least one key element.
    #[error("empty key")]
    EmptyKey,

    /// The named pool ran out of addressable handles.
    #[error("{0} pool exhausted its handle space")]
    PoolExhausted(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Create a format error
    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    /// Create a format error that points at a line of a text file.
    pub fn format_at(line: usize, msg: impl std::fmt::Display) -> Self {
        Error::Format(format!("line {line}: {msg}"))
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
