//! Vocabulary and merge rule bookkeeping.

use crate::{
    special::SpecialTokenSet,
    types::{BYTE_ALPHABET_SIZE, ByteSeq, Token, TokenPair},
};

/// A learned merge: `pair.0` followed by `pair.1` becomes `merged`.
///
/// The discovery index of a rule is its position in the merge list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MergeRule {
    pub pair: TokenPair,
    pub merged: Token,
}

impl MergeRule {
    pub fn new(left: Token, right: Token, merged: Token) -> Self {
        Self {
            pair: TokenPair(left, right),
            merged,
        }
    }
}

/// Dense map from token id to the bytes it stands for.
///
/// - `[0, 256)`: single bytes
/// - then special token literals, in id order
/// - then one entry per merge, in discovery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    entries: Vec<ByteSeq>,
}

impl Vocabulary {
    /// Vocabulary holding only the byte alphabet.
    pub fn bytes_only() -> Self {
        let entries = (0..=u8::MAX).map(|b| vec![b]).collect();
        Self { entries }
    }

    /// Byte alphabet followed by the special tokens at their ids.
    ///
    /// Specials built with [`SpecialTokenSet::new`] occupy the ids right after
    /// the byte alphabet, so this produces a dense table. Gaps left by sparse
    /// explicit ids are filled with empty entries.
    pub fn with_specials(specials: &SpecialTokenSet) -> Self {
        let mut vocab = Self::bytes_only();
        for special in specials.iter() {
            if vocab.entries.len() <= special.id {
                vocab.entries.resize(special.id + 1, ByteSeq::new());
            }
            vocab.entries[special.id] = special.bytes.clone();
        }
        vocab
    }

    /// Builds a vocabulary from a dense table, e.g. one loaded by a caller.
    ///
    /// Consistency with merges and specials is checked when a tokenizer is
    /// built from it.
    pub fn from_entries(entries: Vec<ByteSeq>) -> Self {
        Self { entries }
    }

    /// Appends the concatenation of `pair`'s two entries and returns its id.
    ///
    /// Returns `None` if either side is not in the vocabulary.
    pub fn push_merge(&mut self, pair: TokenPair) -> Option<Token> {
        let mut merged = self.entries.get(pair.0)?.clone();
        merged.extend_from_slice(self.entries.get(pair.1)?);
        self.entries.push(merged);
        Some(self.entries.len() - 1)
    }

    /// Bytes of token `id`.
    pub fn get(&self, id: Token) -> Option<&[u8]> {
        self.entries.get(id).map(Vec::as_slice)
    }

    /// Id the next pushed entry will receive.
    pub fn next_id(&self) -> Token {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(id, bytes)` for every entry, in id order.
    pub fn iter(&self) -> impl Iterator<Item = (Token, &[u8])> {
        self.entries.iter().map(Vec::as_slice).enumerate()
    }

    pub fn as_slice(&self) -> &[ByteSeq] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ByteSeq> {
        self.entries
    }

    /// First id in `[0, 256)` that is not mapped to its own byte.
    pub(crate) fn first_unbound_byte(&self) -> Option<Token> {
        (0..BYTE_ALPHABET_SIZE).find(|&id| {
            let byte = [id as u8];
            self.entries.get(id).map(Vec::as_slice) != Some(&byte[..])
        })
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::bytes_only()
    }
}
