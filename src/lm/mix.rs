//! Linear interpolation of several models.
//!
//! A `.mixlm` file lists one component per line as `<path> <weight>`. Relative
//! paths are resolved against the directory of the mixture file; blank lines
//! and lines starting with `#` are ignored. Weights are normalized to sum to 1.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::LmOptions;
use crate::error::{Error, Result};
use crate::stream;
use crate::vocab::Vocab;

use super::{LanguageModel, TrieLm};

pub fn is_mixture(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "mixlm")
}

/// Weighted mixture: `log10(Σ w_i · 10^{p_i})`.
#[derive(Debug)]
pub struct MixLm {
    components: Vec<TrieLm>,
    weights: Vec<f32>,
    order: usize,
}

impl MixLm {
    /// Combine loaded models. Weights must be positive; they are normalized.
    pub fn new(parts: Vec<(TrieLm, f32)>) -> Result<Self> {
        if parts.is_empty() {
            return Err(Error::format("mixture has no components"));
        }
        if let Some((_, w)) = parts.iter().find(|(_, w)| !(w.is_finite() && *w > 0.0)) {
            return Err(Error::format(format!("mixture weight {w} is not positive")));
        }
        let total: f32 = parts.iter().map(|(_, w)| w).sum();
        let order = parts.iter().map(|(m, _)| m.order()).max().unwrap_or(0);
        let (components, weights) = parts.into_iter().map(|(m, w)| (m, w / total)).unzip();
        Ok(Self {
            components,
            weights,
            order,
        })
    }

    pub fn load(path: &Path, vocab: &mut Vocab, opts: &LmOptions) -> Result<Self> {
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let mut specs: Vec<(PathBuf, f32)> = Vec::new();
        for (i, line) in stream::open_read(path)?.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let &[file, weight] = fields.as_slice() else {
                return Err(Error::format_at(i + 1, "expected `<model path> <weight>`"));
            };
            let weight: f32 = weight
                .parse()
                .map_err(|_| Error::format_at(i + 1, format!("bad weight {weight:?}")))?;
            specs.push((dir.join(file), weight));
        }

        let mut parts = Vec::with_capacity(specs.len());
        for (file, weight) in specs {
            if is_mixture(&file) {
                return Err(Error::format(format!(
                    "{}: nested mixtures are not supported",
                    file.display()
                )));
            }
            parts.push((TrieLm::load(&file, vocab, opts)?, weight));
        }
        let mix = Self::new(parts)?;
        info!(path = %path.display(), components = mix.components.len(), order = mix.order, "loaded mixture model");
        Ok(mix)
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn components(&self) -> &[TrieLm] {
        &self.components
    }
}

impl LanguageModel for MixLm {
    fn order(&self) -> usize {
        self.order
    }

    fn word_prob(&self, word: u32, context: &[u32], context_length: usize) -> f32 {
        let p: f32 = self
            .components
            .iter()
            .zip(&self.weights)
            .map(|(m, w)| w * 10f32.powf(m.word_prob(word, context, context_length)))
            .sum();
        p.log10()
    }

    fn clear_cache(&mut self) {
        for m in &mut self.components {
            LanguageModel::clear_cache(m);
        }
    }
}
