//! String ↔ index vocabulary shared by the models of one decoder.

use std::collections::HashMap;

/// Token standing for any word outside an open-vocabulary model.
pub const UNK_TOKEN: &str = "<unk>";

/// Dense token numbering: indices are assigned `0, 1, 2, …` in insertion order.
#[derive(Clone, Debug, Default)]
pub struct Vocab {
    words: Vec<String>,
    index: HashMap<String, u32>,
}

impl Vocab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `token`, adding it if new. Adding an existing token is a no-op.
    pub fn add(&mut self, token: &str) -> u32 {
        if let Some(&i) = self.index.get(token) {
            return i;
        }
        let i = self.words.len() as u32;
        self.words.push(token.to_owned());
        self.index.insert(token.to_owned(), i);
        i
    }

    /// Index of `token`, or [`size`](Self::size) when absent.
    #[inline]
    pub fn index(&self, token: &str) -> u32 {
        self.get(token).unwrap_or(self.size())
    }

    #[inline]
    pub fn get(&self, token: &str) -> Option<u32> {
        self.index.get(token).copied()
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.words.len() as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Token at `index`, if assigned.
    pub fn word(&self, index: u32) -> Option<&str> {
        self.words.get(index as usize).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.words.iter().enumerate().map(|(i, w)| (i as u32, w.as_str()))
    }
}

impl<S: AsRef<str>> FromIterator<S> for Vocab {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut v = Vocab::new();
        for w in iter {
            v.add(w.as_ref());
        }
        v
    }
}
