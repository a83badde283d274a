//! ARPA text format.
//!
//! ```text
//! \data\
//! ngram 1=<count>
//! ngram 2=<count>
//!
//! \1-grams:
//! <log10 prob> <TAB> <word> [<TAB> <log10 back-off>]
//!
//! \2-grams:
//! <log10 prob> <TAB> <word> <word> [<TAB> <log10 back-off>]
//!
//! \end\
//! ```

use std::io::{BufRead, Write};
use std::path::Path;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::config::LmOptions;
use crate::error::{Error, Result};
use crate::stream;
use crate::trie::Trie;
use crate::vocab::Vocab;

use super::TrieLm;

/// Load an ARPA file (gzipped if the name ends in `.gz`).
pub fn load(path: &Path, vocab: &mut Vocab, opts: &LmOptions) -> Result<TrieLm> {
    read(stream::open_read(path)?, vocab, opts)
}

/// Line source that tracks the line number and reuses one buffer.
struct Lines<R> {
    reader: R,
    buf: String,
    line_no: usize,
}

impl<R: BufRead> Lines<R> {
    /// Next line number and line without its terminator, or `None` at end
    /// of input.
    fn next_line(&mut self) -> Result<Option<(usize, &str)>> {
        self.buf.clear();
        if self.reader.read_line(&mut self.buf)? == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        Ok(Some((self.line_no, self.buf.trim_end_matches(['\n', '\r']))))
    }

    fn err(&self, msg: impl std::fmt::Display) -> Error {
        Error::format_at(self.line_no, msg)
    }
}

/// Section marker `\N-grams:`.
fn section_order(line: &str) -> Option<usize> {
    line.strip_prefix('\\')?
        .strip_suffix("-grams:")?
        .parse()
        .ok()
}

/// Build a model from ARPA text.
///
/// With `limit_vocab`, lines containing a word unknown to `vocab` are
/// skipped; otherwise new words are added to it. Sections above
/// `limit_order` are skipped.
pub fn read<R: BufRead>(reader: R, vocab: &mut Vocab, opts: &LmOptions) -> Result<TrieLm> {
    opts.validate()?;
    let mut lines = Lines {
        reader,
        buf: String::new(),
        line_no: 0,
    };

    // Anything before \data\ is commentary.
    loop {
        match lines.next_line()? {
            Some((_, l)) if l.trim() == "\\data\\" => break,
            Some(_) => {}
            None => return Err(lines.err("missing \\data\\ header")),
        }
    }

    let mut declared: Vec<usize> = Vec::new();
    let first_section = loop {
        let Some((no, l)) = lines.next_line()? else {
            return Err(lines.err("unexpected end of file in \\data\\ header"));
        };
        let l = l.trim();
        if l.is_empty() {
            continue;
        }
        if let Some(n) = section_order(l) {
            break n;
        }
        let Some((n, count)) = l
            .strip_prefix("ngram ")
            .and_then(|rest| rest.split_once('='))
        else {
            return Err(Error::format_at(no, format!("expected `ngram N=count`, got {l:?}")));
        };
        let n: usize = n
            .trim()
            .parse()
            .map_err(|_| Error::format_at(no, format!("bad n-gram order {n:?}")))?;
        let count: usize = count
            .trim()
            .parse()
            .map_err(|_| Error::format_at(no, format!("bad n-gram count {count:?}")))?;
        if n != declared.len() + 1 {
            return Err(Error::format_at(no, format!("n-gram orders out of sequence at order {n}")));
        }
        declared.push(count);
    };
    if declared.is_empty() {
        return Err(lines.err("\\data\\ header declares no n-grams"));
    }

    let file_order = declared.len();
    let order = opts.effective_order(file_order);
    let mut trie: Trie<f32, f32> = Trie::with_root_hash_bits(opts.root_hash_bits)?;
    let mut seen = vec![0usize; file_order];
    let mut oov_skipped = 0usize;
    let mut warned_tab = false;
    let mut key: SmallVec<[u32; 8]> = SmallVec::new();

    let mut section = Some(first_section);
    while let Some(n) = section.take() {
        if n == 0 || n > file_order {
            return Err(lines.err(format!(
                "{n}-gram section in a model of declared order {file_order}"
            )));
        }
        let keep = n <= order;

        loop {
            let Some((no, l)) = lines.next_line()? else {
                return Err(lines.err("missing \\end\\ marker"));
            };
            let trimmed = l.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == "\\end\\" {
                break;
            }
            if trimmed.starts_with('\\') {
                match section_order(trimmed) {
                    Some(next) => {
                        section = Some(next);
                        break;
                    }
                    None => return Err(Error::format_at(no, format!("unexpected marker {trimmed:?}"))),
                }
            }

            seen[n - 1] += 1;
            if !keep {
                continue;
            }
            if !warned_tab && !l.contains('\t') {
                warn!(line = no, "n-gram line without tab separators; splitting on spaces");
                warned_tab = true;
            }

            let (prob, words, backoff) = split_ngram_line(l, n, no)?;

            key.clear();
            let mut known = true;
            for &w in words.iter().rev() {
                let idx = if opts.limit_vocab { vocab.get(w) } else { Some(vocab.add(w)) };
                match idx {
                    Some(i) => key.push(i),
                    None => {
                        known = false;
                        break;
                    }
                }
            }
            if !known {
                oov_skipped += 1;
                continue;
            }

            trie.insert(&key, prob)?;
            if let Some(bo) = backoff.filter(|&bo| bo != 0.0 && n < order) {
                trie.set_internal_node_value(&key, bo)?;
            }
        }
    }

    for (i, (&want, &got)) in declared.iter().zip(&seen).enumerate() {
        if want != got {
            warn!(order = i + 1, declared = want, found = got, "n-gram count does not match the \\data\\ header");
        }
    }
    if oov_skipped > 0 {
        warn!(skipped = oov_skipped, "skipped n-grams containing out-of-vocabulary words");
    }
    debug!(order, file_order, ngrams = trie.len(), "parsed ARPA model");

    Ok(TrieLm::from_trie(trie, order, vocab, opts))
}

/// Split a `prob<TAB>w1 .. wn[<TAB>backoff]` line. Lines without tabs fall
/// back to whitespace splitting, where the back-off is the `n+1`-th field.
fn split_ngram_line(l: &str, n: usize, no: usize) -> Result<(f32, SmallVec<[&str; 8]>, Option<f32>)> {
    let (prob, words, backoff) = if l.contains('\t') {
        let mut fields = l.trim_end_matches(['\r', '\n']).split('\t');
        let prob = parse_score(fields.next(), no)?;
        let words: SmallVec<[&str; 8]> = fields.next().unwrap_or("").split_whitespace().collect();
        let backoff = match fields.next().map(str::trim) {
            Some(bo) if !bo.is_empty() => Some(parse_score(Some(bo), no)?),
            _ => None,
        };
        if fields.next().is_some_and(|f| !f.trim().is_empty()) {
            return Err(Error::format_at(no, "too many tab-separated fields"));
        }
        (prob, words, backoff)
    } else {
        let mut fields = l.split_whitespace();
        let prob = parse_score(fields.next(), no)?;
        let mut words: SmallVec<[&str; 8]> = fields.collect();
        let backoff = if words.len() == n + 1 {
            parse_score(words.pop(), no).map(Some)?
        } else {
            None
        };
        (prob, words, backoff)
    };
    if words.len() != n {
        return Err(Error::format_at(
            no,
            format!("expected {n} words in a {n}-gram line, got {}", words.len()),
        ));
    }
    Ok((prob, words, backoff))
}

fn parse_score(field: Option<&str>, line_no: usize) -> Result<f32> {
    let field = field
        .map(str::trim)
        .ok_or_else(|| Error::format_at(line_no, "missing probability"))?;
    field
        .parse()
        .map_err(|_| Error::format_at(line_no, format!("bad score {field:?}")))
}

/// Write `lm` as ARPA text. N-grams of each order come out in trie order.
pub fn write<W: Write>(lm: &TrieLm, vocab: &Vocab, w: &mut W) -> Result<()> {
    let counts = lm.ngram_counts();
    writeln!(w, "\\data\\")?;
    for (i, c) in counts.iter().enumerate() {
        writeln!(w, "ngram {}={}", i + 1, c)?;
    }

    let mut by_order: Vec<Vec<(Vec<u32>, f32)>> = vec![Vec::new(); lm.order()];
    lm.trie().traverse(|key, &prob| {
        if let Some(bucket) = by_order.get_mut(key.len() - 1) {
            bucket.push((key.to_vec(), prob));
        }
    });

    for (i, ngrams) in by_order.iter().enumerate() {
        let n = i + 1;
        writeln!(w, "\n\\{n}-grams:")?;
        for (key, prob) in ngrams {
            write!(w, "{prob}\t")?;
            for (j, &k) in key.iter().rev().enumerate() {
                if j > 0 {
                    w.write_all(b" ")?;
                }
                w.write_all(TrieLm::token(vocab, k)?.as_bytes())?;
            }
            let bo = if n < lm.order() {
                lm.trie().get_internal_node_value(key).filter(|&bo| bo != 0.0)
            } else {
                None
            };
            match bo {
                Some(bo) => writeln!(w, "\t{bo}")?,
                None => writeln!(w)?,
            }
        }
    }
    writeln!(w, "\n\\end\\")?;
    Ok(())
}
