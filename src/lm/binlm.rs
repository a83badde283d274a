//! BinLM: the binary language model container.
//!
//! ```text
//! Portage BinLM file, format v1.0
//! Order = <uint>
//! Vocab size = <uint>
//! <one token per line>
//! <blank line>
//! <trie blob>
//! <newline>
//! End of Portage BinLM file.  Internal node count=<uint>
//! ```
//!
//! Trie keys in the blob index the file's own vocabulary listing. On load the
//! listing is translated to the caller's vocabulary through a
//! [`VecMapper`], so one file can be shared by decoders with different word
//! numberings.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::LmOptions;
use crate::datum::NO_KEY;
use crate::error::{Error, Result};
use crate::stream;
use crate::trie::{KeyMapper, Trie, VecMapper};
use crate::vocab::Vocab;

use super::TrieLm;

pub const MAGIC_LINE: &str = "Portage BinLM file, format v1.0";
const ORDER_PREFIX: &str = "Order = ";
const VOCAB_PREFIX: &str = "Vocab size = ";
const TRAILER_PREFIX: &str = "End of Portage BinLM file.  Internal node count=";

/// True if `head` starts with the BinLM header line.
pub fn is_binlm(head: &[u8]) -> bool {
    head.starts_with(MAGIC_LINE.as_bytes())
}

/// Save `lm`, whose keys index `vocab`, to `path`.
pub fn save(lm: &TrieLm, vocab: &Vocab, path: &Path) -> Result<()> {
    let mut w = stream::open_write(path)?;
    write(lm, vocab, &mut w)?;
    w.finish()?;
    debug!(path = %path.display(), "wrote BinLM file");
    Ok(())
}

pub fn write<W: Write>(lm: &TrieLm, vocab: &Vocab, w: &mut W) -> Result<()> {
    writeln!(w, "{MAGIC_LINE}")?;
    writeln!(w, "{ORDER_PREFIX}{}", lm.order())?;
    writeln!(w, "{VOCAB_PREFIX}{}", vocab.size())?;
    for (_, token) in vocab.iter() {
        if token.is_empty() || token.contains(['\n', '\r']) {
            return Err(Error::format(format!(
                "token {token:?} cannot be stored in a BinLM vocabulary listing"
            )));
        }
        writeln!(w, "{token}")?;
    }
    writeln!(w)?;
    lm.trie().write_binary(w)?;
    writeln!(w)?;
    writeln!(w, "{TRAILER_PREFIX}{}", lm.trie().node_count())?;
    Ok(())
}

pub fn load(path: &Path, vocab: &mut Vocab, opts: &LmOptions) -> Result<TrieLm> {
    let bytes = stream::read_all(path)?;
    read(&bytes, vocab, opts)
}

/// Cursor over the text parts of the container.
struct Header<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Header<'a> {
    fn line(&mut self) -> Result<&'a str> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| Error::format("BinLM: unterminated header line"))?;
        self.pos += len + 1;
        std::str::from_utf8(&rest[..len])
            .map_err(|_| Error::format("BinLM: header line is not UTF-8"))
    }

    fn field(&mut self, prefix: &str) -> Result<usize> {
        let line = self.line()?;
        line.strip_prefix(prefix)
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| Error::format(format!("BinLM: expected `{prefix}<uint>`, got {line:?}")))
    }
}

/// Decode a BinLM image, applying `limit_order` and `limit_vocab` while the
/// trie is deserialized.
pub fn read(data: &[u8], vocab: &mut Vocab, opts: &LmOptions) -> Result<TrieLm> {
    opts.validate()?;
    let mut h = Header { data, pos: 0 };
    if h.line()? != MAGIC_LINE {
        return Err(Error::format("BinLM: bad magic line"));
    }
    let file_order = h.field(ORDER_PREFIX)?;
    if file_order == 0 {
        return Err(Error::format("BinLM: order must be at least 1"));
    }
    let vocab_size = h.field(VOCAB_PREFIX)?;

    // Every listed token takes at least two bytes, so a corrupt size cannot
    // force a huge allocation.
    let cap = vocab_size.min(data.len() / 2);
    let mut table = Vec::with_capacity(cap);
    let mut listed: HashSet<&str> = HashSet::with_capacity(cap);
    let mut repeated: Option<&str> = None;
    let mut repeats = 0usize;
    for i in 0..vocab_size {
        let token = h.line()?;
        if token.is_empty() {
            return Err(Error::format(format!(
                "BinLM: vocabulary listing ends after {i} of {vocab_size} tokens"
            )));
        }
        if !listed.insert(token) {
            repeats += 1;
            repeated.get_or_insert(token);
        }
        let mapped = if opts.limit_vocab {
            vocab.get(token).unwrap_or(NO_KEY)
        } else {
            vocab.add(token)
        };
        table.push(mapped);
    }
    if let Some(first) = repeated {
        warn!(repeats, first, "BinLM vocabulary listing repeats tokens; their n-grams are merged");
    }
    if !h.line()?.is_empty() {
        return Err(Error::format(format!(
            "BinLM: vocabulary listing longer than the declared {vocab_size} tokens"
        )));
    }

    let order = opts.effective_order(file_order);
    let mapper = VecMapper::new(table);
    let vocab_limited = opts.limit_vocab && mapper_drops_keys(&mapper, vocab_size);
    let mut trie: Trie<f32, f32> = Trie::new();
    let consumed = trie.read_binary_with(
        &data[h.pos..],
        |path: &[u32]| path.len() <= order,
        &mapper,
    )?;
    h.pos += consumed;

    if !h.line()?.is_empty() {
        return Err(Error::format("BinLM: missing newline after the trie blob"));
    }
    let stored_nodes = h
        .line()
        .ok()
        .and_then(|l| l.strip_prefix(TRAILER_PREFIX))
        .and_then(|n| n.trim().parse::<usize>().ok())
        .ok_or_else(|| Error::format("BinLM: corrupt trailer"))?;
    if order == file_order && !vocab_limited && stored_nodes != trie.node_count() {
        warn!(
            stored = stored_nodes,
            loaded = trie.node_count(),
            "BinLM internal node count does not match the trailer"
        );
    }
    debug!(order, file_order, ngrams = trie.len(), nodes = trie.node_count(), "decoded BinLM model");

    Ok(TrieLm::from_trie(trie, order, vocab, opts))
}

fn mapper_drops_keys(mapper: &VecMapper, size: usize) -> bool {
    (0..size as u32).any(|k| mapper.map(k) == NO_KEY)
}
