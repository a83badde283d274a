//! Load options for language models.

use crate::error::{Error, Result};
use crate::trie::MAX_ROOT_HASH_BITS;

/// Configuration for [`lm::create`](crate::lm::create) and the individual
/// loaders.
#[derive(Clone, Debug)]
pub struct LmOptions {
    /// Keep only n-grams up to this order (`None` keeps everything).
    pub limit_order: Option<usize>,
    /// Drop n-grams containing words the caller's vocabulary does not
    /// already know, instead of adding them.
    pub limit_vocab: bool,
    /// Log10 probability returned for a word with no unigram.
    pub oov_unigram_prob: f32,
    /// Number of hashed root buckets is `2^root_hash_bits`. Only used when
    /// building from text; binary models carry their own.
    pub root_hash_bits: u8,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            limit_order: None,
            limit_vocab: false,
            oov_unigram_prob: -18.0,
            root_hash_bits: 8,
        }
    }
}

impl LmOptions {
    pub fn limit_order(mut self, order: usize) -> Self {
        self.limit_order = Some(order);
        self
    }

    pub fn limit_vocab(mut self, limit: bool) -> Self {
        self.limit_vocab = limit;
        self
    }

    pub fn oov_unigram_prob(mut self, prob: f32) -> Self {
        self.oov_unigram_prob = prob;
        self
    }

    pub fn root_hash_bits(mut self, bits: u8) -> Self {
        self.root_hash_bits = bits;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit_order == Some(0) {
            return Err(Error::config("limit_order must be at least 1"));
        }
        if self.root_hash_bits > MAX_ROOT_HASH_BITS {
            return Err(Error::config(format!(
                "root_hash_bits must be at most {MAX_ROOT_HASH_BITS}, got {}",
                self.root_hash_bits
            )));
        }
        if !self.oov_unigram_prob.is_finite() || self.oov_unigram_prob > 0.0 {
            return Err(Error::config(format!(
                "oov_unigram_prob must be a finite log10 probability, got {}",
                self.oov_unigram_prob
            )));
        }
        Ok(())
    }

    /// Effective order of a model whose file declares `order`.
    pub(crate) fn effective_order(&self, order: usize) -> usize {
        self.limit_order.map_or(order, |limit| limit.min(order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let o = LmOptions::default();
        assert!(o.validate().is_ok());
        assert_eq!(o.effective_order(5), 5);
    }

    #[test]
    fn test_builder_and_validation() {
        let o = LmOptions::default().limit_order(3).limit_vocab(true);
        assert!(o.validate().is_ok());
        assert_eq!(o.effective_order(5), 3);
        assert_eq!(o.effective_order(2), 2);

        assert!(matches!(
            LmOptions::default().limit_order(0).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            LmOptions::default().root_hash_bits(MAX_ROOT_HASH_BITS + 1).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            LmOptions::default().oov_unigram_prob(f32::NAN).validate(),
            Err(Error::Config(_))
        ));
    }
}
