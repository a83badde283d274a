//! Back-off n-gram language models over the trie.
//!
//! N-grams are stored *reversed*: the key of `w1 w2 w3` is `[w3, w2, w1]`, so
//! a query for a word in context walks from the word outwards through its most
//! recent context words. Leaf values are log10 probabilities; the internal
//! value of the node addressed by a reversed n-gram is that n-gram's back-off
//! weight.
//!
//! ```rust
//! use lmtrie::{lm, LanguageModel, LmOptions, Vocab};
//!
//! let arpa = "\\data\\\nngram 1=2\nngram 2=1\n\n\
//!             \\1-grams:\n-1.0\ta\n-2.0\tb\n\n\
//!             \\2-grams:\n-0.5\ta b\n\n\\end\\\n";
//! let mut vocab = Vocab::new();
//! let model = lm::arpa::read(arpa.as_bytes(), &mut vocab, &LmOptions::default()).unwrap();
//!
//! let (a, b) = (vocab.index("a"), vocab.index("b"));
//! assert_eq!(model.word_prob(b, &[a], 1), -0.5);
//! assert_eq!(model.word_prob(a, &[b], 1), -1.0);
//! ```

use std::io::Write;
use std::path::Path;

use smallvec::SmallVec;
use tracing::info;

use crate::config::LmOptions;
use crate::error::{Error, Result};
use crate::stream;
use crate::trie::Trie;
use crate::vocab::{Vocab, UNK_TOKEN};

pub mod arpa;
pub mod binlm;
pub mod mix;

pub use mix::MixLm;

/// Query interface shared by every model kind.
pub trait LanguageModel {
    /// Longest n-gram the model scores.
    fn order(&self) -> usize;

    /// Log10 probability of `word` given `context`, which is most recent
    /// first. At most `context_length` context words are used.
    fn word_prob(&self, word: u32, context: &[u32], context_length: usize) -> f32;

    /// Drop any per-query caches. Callers do this between independent inputs.
    fn clear_cache(&mut self) {}
}

/// A loaded model, as returned by [`create`].
#[derive(Debug)]
pub enum Model {
    Trie(TrieLm),
    Mixture(MixLm),
}

impl LanguageModel for Model {
    fn order(&self) -> usize {
        match self {
            Model::Trie(m) => m.order(),
            Model::Mixture(m) => m.order(),
        }
    }

    fn word_prob(&self, word: u32, context: &[u32], context_length: usize) -> f32 {
        match self {
            Model::Trie(m) => m.word_prob(word, context, context_length),
            Model::Mixture(m) => m.word_prob(word, context, context_length),
        }
    }

    fn clear_cache(&mut self) {
        match self {
            Model::Trie(m) => m.clear_cache(),
            Model::Mixture(m) => m.clear_cache(),
        }
    }
}

/// Open the model at `path`, picking the loader from the file itself: a
/// `.mixlm` extension is a mixture, the BinLM header line is a binary model
/// and anything else is ARPA text (optionally gzipped).
pub fn create(path: impl AsRef<Path>, vocab: &mut Vocab, opts: &LmOptions) -> Result<Model> {
    let path = path.as_ref();
    opts.validate()?;
    if mix::is_mixture(path) {
        return Ok(Model::Mixture(MixLm::load(path, vocab, opts)?));
    }
    Ok(Model::Trie(TrieLm::load(path, vocab, opts)?))
}

/// A back-off model held in one `Trie<f32, f32>`.
///
/// Read-only once built; all queries take `&self`.
#[derive(Debug)]
pub struct TrieLm {
    trie: Trie<f32, f32>,
    order: usize,
    oov_unigram_prob: f32,
    /// Index of `<unk>` when the model has an `<unk>` unigram.
    unk: Option<u32>,
}

impl TrieLm {
    /// Wrap a populated trie. The model is open-vocabulary iff `vocab` knows
    /// `<unk>` and the trie holds a unigram for it.
    pub(crate) fn from_trie(trie: Trie<f32, f32>, order: usize, vocab: &Vocab, opts: &LmOptions) -> Self {
        let unk = vocab.get(UNK_TOKEN).filter(|&u| trie.contains_key(&[u]));
        Self {
            trie,
            order,
            oov_unigram_prob: opts.oov_unigram_prob,
            unk,
        }
    }

    /// Load a BinLM or ARPA file, chosen by the file's first line.
    pub fn load(path: impl AsRef<Path>, vocab: &mut Vocab, opts: &LmOptions) -> Result<Self> {
        let path = path.as_ref();
        opts.validate()?;
        let head = stream::peek(path, binlm::MAGIC_LINE.len())?;
        let lm = if binlm::is_binlm(&head) {
            binlm::load(path, vocab, opts)?
        } else {
            arpa::load(path, vocab, opts)?
        };
        info!(
            path = %path.display(),
            order = lm.order,
            ngrams = lm.trie.len(),
            open_vocab = lm.is_open_vocab(),
            memory = lm.trie.memory_usage(),
            "loaded language model"
        );
        Ok(lm)
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.order
    }

    #[inline]
    pub fn is_open_vocab(&self) -> bool {
        self.unk.is_some()
    }

    #[inline]
    pub fn oov_unigram_prob(&self) -> f32 {
        self.oov_unigram_prob
    }

    #[inline]
    pub fn trie(&self) -> &Trie<f32, f32> {
        &self.trie
    }

    /// `token`, or `<unk>` if this is an open-vocabulary model without a
    /// unigram for `token`.
    #[inline]
    fn map_token(&self, token: u32) -> u32 {
        match self.unk {
            Some(unk) if !self.trie.contains_key(&[token]) => unk,
            _ => token,
        }
    }

    /// Back-off query: the probability of the longest stored n-gram ending
    /// in `word`, plus the back-off weights of every longer context that was
    /// not matched.
    pub fn word_prob(&self, word: u32, context: &[u32], context_length: usize) -> f32 {
        let ctx_len = context_length
            .min(context.len())
            .min(self.order.saturating_sub(1));
        let mut key: SmallVec<[u32; 8]> = SmallVec::with_capacity(ctx_len + 1);
        key.push(self.map_token(word));
        key.extend(context[..ctx_len].iter().map(|&t| self.map_token(t)));

        let hit = self.trie.find(&key);
        if hit.found {
            return hit.value;
        }
        let (depth, base) = match hit.depth {
            0 => (1, self.oov_unigram_prob),
            d => (d, hit.value),
        };
        base + self.trie.sum_internal_node_values(&key[1..], depth, ctx_len)
    }

    /// Number of stored n-grams of each order; index 0 holds the unigrams.
    pub fn ngram_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.order];
        self.trie.traverse(|key, _| {
            if let Some(c) = counts.get_mut(key.len() - 1) {
                *c += 1;
            }
        });
        counts
    }

    /// Back-off weight of `ngram` given in reading order, if one is stored.
    pub fn backoff(&self, ngram: &[u32]) -> Option<f32> {
        let key: SmallVec<[u32; 8]> = ngram.iter().rev().copied().collect();
        self.trie
            .get_internal_node_value(&key)
            .filter(|&bo| bo != 0.0)
    }

    /// Dump the model as ARPA text.
    pub fn write_arpa<W: Write>(&self, w: &mut W, vocab: &Vocab) -> Result<()> {
        arpa::write(self, vocab, w)
    }

    /// Save as a BinLM file; `vocab` must be the vocabulary the model was
    /// loaded with. A `.gz` path is compressed.
    pub fn write_binary(&self, path: impl AsRef<Path>, vocab: &Vocab) -> Result<()> {
        binlm::save(self, vocab, path.as_ref())
    }

    /// Look up the vocabulary token for a key element of this model.
    pub(crate) fn token<'v>(vocab: &'v Vocab, index: u32) -> Result<&'v str> {
        vocab
            .word(index)
            .ok_or_else(|| Error::format(format!("index {index} is not in the vocabulary")))
    }
}

impl LanguageModel for TrieLm {
    fn order(&self) -> usize {
        self.order
    }

    fn word_prob(&self, word: u32, context: &[u32], context_length: usize) -> f32 {
        TrieLm::word_prob(self, word, context, context_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    pub(crate) const TOY_ARPA: &str = "\
\\data\\
ngram 1=4
ngram 2=3
ngram 3=1

\\1-grams:
-1.0\t<unk>
-1.0\ta\t-0.3
-2.0\tb\t-0.2
-1.5\tc

\\2-grams:
-0.5\ta b\t-0.1
-0.7\tb a
-0.9\tb c

\\3-grams:
-0.05\ta b c

\\end\\
";

    /// Collects the messages of WARN events emitted on this thread.
    struct WarnLayer(Arc<Mutex<Vec<String>>>);

    struct MessageVisitor<'a>(&'a mut String);

    impl Visit for MessageVisitor<'_> {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                *self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: Subscriber> Layer<S> for WarnLayer {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                let mut msg = String::new();
                event.record(&mut MessageVisitor(&mut msg));
                self.0.lock().unwrap().push(msg);
            }
        }
    }

    pub(crate) fn capture_warnings<R>(f: impl FnOnce() -> R) -> (R, Vec<String>) {
        let store = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(WarnLayer(store.clone()));
        let out = tracing::subscriber::with_default(subscriber, f);
        let warnings = store.lock().unwrap().clone();
        (out, warnings)
    }

    fn toy() -> (TrieLm, Vocab) {
        let mut vocab = Vocab::new();
        let lm = arpa::read(TOY_ARPA.as_bytes(), &mut vocab, &LmOptions::default()).unwrap();
        (lm, vocab)
    }

    #[test]
    fn test_two_gram_backoff_example() {
        let arpa = "\\data\\\nngram 1=2\nngram 2=1\n\n\\1-grams:\n-1.0\ta\n-2.0\tb\n\n\
                    \\2-grams:\n-0.5\ta b\n\n\\end\\\n";
        let mut vocab = Vocab::new();
        let lm = arpa::read(arpa.as_bytes(), &mut vocab, &LmOptions::default()).unwrap();
        let (a, b) = (vocab.index("a"), vocab.index("b"));
        assert_eq!(lm.word_prob(b, &[a], 1), -0.5);
        assert_eq!(lm.word_prob(a, &[b], 1), -1.0);
        assert!(!lm.is_open_vocab());
    }

    #[test]
    fn test_exact_hits() {
        let (lm, v) = toy();
        let (a, b, c) = (v.index("a"), v.index("b"), v.index("c"));
        assert_eq!(lm.order(), 3);
        assert_eq!(lm.word_prob(c, &[b, a], 2), -0.05);
        assert_eq!(lm.word_prob(b, &[a], 1), -0.5);
        assert_eq!(lm.word_prob(a, &[], 0), -1.0);
    }

    #[test]
    fn test_backoff_sums() {
        let (lm, v) = toy();
        let (a, b, c) = (v.index("a"), v.index("b"), v.index("c"));

        // p(c | a): no "a c"; back off to p(c) + bo(a).
        assert!((lm.word_prob(c, &[a], 1) - (-1.5 + -0.3)).abs() < 1e-6);

        // p(a | a b): "b a" exists (depth 2); add bo("a b") for the unmatched
        // longer context.
        assert!((lm.word_prob(a, &[b, a], 2) - (-0.7 + -0.1)).abs() < 1e-6);

        // p(b | c b): only the unigram b matches; bo(c) is unset, bo("b c")
        // is unset too.
        assert!((lm.word_prob(b, &[c, b], 2) - -2.0).abs() < 1e-6);

        // context_length caps the context actually used.
        assert_eq!(lm.word_prob(c, &[b, a], 1), -0.9);
    }

    #[test]
    fn test_context_is_capped_by_order() {
        let (lm, v) = toy();
        let (a, b, c) = (v.index("a"), v.index("b"), v.index("c"));
        // A 3-gram model ignores the fourth word of context.
        assert_eq!(lm.word_prob(c, &[b, a, a], 3), -0.05);
        assert_eq!(lm.word_prob(c, &[b, a], 10), -0.05);
    }

    #[test]
    fn test_open_vocab_maps_unknown_words() {
        let (lm, mut v) = toy();
        assert!(lm.is_open_vocab());
        let zzz = v.add("zzz");
        // An unseen word scores as <unk>.
        assert_eq!(lm.word_prob(zzz, &[], 0), -1.0);
        // An unseen context word backs off through <unk>'s (absent) weight.
        let a = v.index("a");
        assert!((lm.word_prob(a, &[zzz], 1) - -1.0).abs() < 1e-6);
    }

    #[test]
    fn test_closed_vocab_uses_oov_prob() {
        let arpa = "\\data\\\nngram 1=1\n\n\\1-grams:\n-1.0\ta\t-0.25\n\n\\end\\\n";
        let mut vocab = Vocab::new();
        let opts = LmOptions::default().oov_unigram_prob(-7.0);
        let lm = arpa::read(arpa.as_bytes(), &mut vocab, &opts).unwrap();
        let zzz = vocab.add("zzz");
        assert!(!lm.is_open_vocab());
        assert_eq!(lm.word_prob(zzz, &[], 0), -7.0);
        // Unigram model: context is never consulted.
        let a = vocab.index("a");
        assert_eq!(lm.word_prob(zzz, &[a], 1), -7.0);
    }

    #[test]
    fn test_ngram_counts_and_backoff() {
        let (lm, v) = toy();
        assert_eq!(lm.ngram_counts(), vec![4, 3, 1]);
        let (a, b) = (v.index("a"), v.index("b"));
        assert_eq!(lm.backoff(&[a]), Some(-0.3));
        assert_eq!(lm.backoff(&[a, b]), Some(-0.1));
        assert_eq!(lm.backoff(&[b, a]), None);
    }

    #[test]
    fn test_create_sniffs_format() {
        let dir = tempfile::tempdir().unwrap();
        let arpa_path = dir.path().join("toy.arpa.gz");
        let mut w = stream::open_write(&arpa_path).unwrap();
        w.write_all(TOY_ARPA.as_bytes()).unwrap();
        w.finish().unwrap();

        let mut vocab = Vocab::new();
        let opts = LmOptions::default();
        let from_text = create(&arpa_path, &mut vocab, &opts).unwrap();
        let Model::Trie(text_lm) = &from_text else {
            panic!("ARPA file should load as a trie model");
        };

        let bin_path = dir.path().join("toy.binlm");
        text_lm.write_binary(&bin_path, &vocab).unwrap();
        let from_bin = create(&bin_path, &mut vocab, &opts).unwrap();
        assert!(matches!(from_bin, Model::Trie(_)));

        let mix_path = dir.path().join("toy.mixlm");
        std::fs::write(&mix_path, "toy.binlm 1\n").unwrap();
        let mut from_mix = create(&mix_path, &mut vocab, &opts).unwrap();
        assert!(matches!(from_mix, Model::Mixture(_)));
        from_mix.clear_cache();

        let (a, b, c) = (vocab.index("a"), vocab.index("b"), vocab.index("c"));
        for (w, ctx) in [(c, vec![b, a]), (a, vec![b, a]), (c, vec![a]), (b, vec![c, b])] {
            let expected = from_text.word_prob(w, &ctx, 2);
            assert!((from_bin.word_prob(w, &ctx, 2) - expected).abs() < 1e-6);
            assert!((from_mix.word_prob(w, &ctx, 2) - expected).abs() < 1e-5);
        }
        assert_eq!(from_mix.order(), 3);
    }

    #[test]
    fn test_create_rejects_bad_options() {
        let mut vocab = Vocab::new();
        let opts = LmOptions::default().limit_order(0);
        assert!(matches!(
            create("does-not-matter.arpa", &mut vocab, &opts),
            Err(Error::Config(_))
        ));
    }
}
