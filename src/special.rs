//! Reserved special tokens.
//!
//! Special tokens are literal byte strings that always encode to a single
//! reserved id. They are matched on the raw byte stream before any
//! pretokenization runs, and are never merged with their neighbours.

use std::{
    collections::{HashMap, HashSet},
    fmt::Write,
    ops::Range,
};

use regex::bytes::Regex;

use crate::{
    error::SpecialTokenError,
    types::{BYTE_ALPHABET_SIZE, ByteSeq, Token},
};

/// A reserved literal and the id it encodes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialToken {
    pub bytes: ByteSeq,
    pub id: Token,
}

/// Ordered set of special tokens with a longest-first literal matcher.
///
/// Tokens keep their registration order; ids are either assigned right after
/// the byte alphabet ([`SpecialTokenSet::new`]) or supplied by the caller
/// ([`SpecialTokenSet::with_ids`]).
#[derive(Debug, Clone, Default)]
pub struct SpecialTokenSet {
    tokens: Vec<SpecialToken>,
    by_bytes: HashMap<ByteSeq, Token>,
    by_id: HashMap<Token, usize>,
    /// `None` when the set is empty.
    matcher: Option<Regex>,
    max_len: usize,
}

impl SpecialTokenSet {
    /// Creates an empty set. Nothing is ever matched.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registers `tokens` in order, assigning ids `256, 257, ...`.
    ///
    /// Repeated tokens keep the id of their first occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`SpecialTokenError::Empty`] for an empty token, or
    /// [`SpecialTokenError::Pattern`] if the matcher fails to compile.
    pub fn new<I, S>(tokens: I) -> Result<Self, SpecialTokenError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut pairs: Vec<(ByteSeq, Token)> = Vec::new();
        let mut seen: HashSet<ByteSeq> = HashSet::new();
        for tok in tokens {
            let bytes = tok.as_ref();
            if !seen.insert(bytes.to_vec()) {
                continue;
            }
            let id = BYTE_ALPHABET_SIZE + pairs.len();
            pairs.push((bytes.to_vec(), id));
        }
        Self::with_ids(pairs)
    }

    /// Registers tokens with explicit ids, e.g. when rebuilding a tokenizer
    /// from a stored vocabulary.
    ///
    /// # Errors
    ///
    /// Returns [`SpecialTokenError::IllegalToken`] if an id falls inside the
    /// byte alphabet or is used twice, [`SpecialTokenError::Empty`] for an
    /// empty token, or [`SpecialTokenError::Pattern`] if the matcher fails
    /// to compile.
    pub fn with_ids(
        tokens: impl IntoIterator<Item = (ByteSeq, Token)>,
    ) -> Result<Self, SpecialTokenError> {
        let mut set = Self::default();

        for (bytes, id) in tokens {
            if bytes.is_empty() {
                return Err(SpecialTokenError::Empty);
            }
            if id < BYTE_ALPHABET_SIZE || set.by_id.contains_key(&id) {
                return Err(SpecialTokenError::IllegalToken(id));
            }
            if set.by_bytes.contains_key(&bytes) {
                // same literal registered twice; first id wins
                continue;
            }
            set.max_len = set.max_len.max(bytes.len());
            set.by_bytes.insert(bytes.clone(), id);
            set.by_id.insert(id, set.tokens.len());
            set.tokens.push(SpecialToken { bytes, id });
        }

        set.matcher = set.build_matcher()?;
        Ok(set)
    }

    /// Builds a leftmost-first alternation of the literals, longest first,
    /// so that at any position the longest special token wins.
    fn build_matcher(&self) -> Result<Option<Regex>, SpecialTokenError> {
        if self.tokens.is_empty() {
            return Ok(None);
        }

        let mut literals: Vec<&[u8]> = self.tokens.iter().map(|t| t.bytes.as_slice()).collect();
        literals.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut pattern = String::from("(?-u)");
        for (i, lit) in literals.iter().enumerate() {
            if i > 0 {
                pattern.push('|');
            }
            pattern.push_str(&escape_bytes(lit));
        }

        Ok(Some(Regex::new(&pattern)?))
    }

    /// Number of registered special tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Byte length of the longest special token (0 when empty).
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Special tokens in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &SpecialToken> {
        self.tokens.iter()
    }

    /// Id of the special token spelled exactly `bytes`, if any.
    pub fn id_of(&self, bytes: &[u8]) -> Option<Token> {
        self.by_bytes.get(bytes).copied()
    }

    /// Literal bytes of the special token with id `id`, if any.
    pub fn bytes_of(&self, id: Token) -> Option<&[u8]> {
        self.by_id
            .get(&id)
            .and_then(|&i| self.tokens.get(i))
            .map(|t| t.bytes.as_slice())
    }

    pub fn contains_id(&self, id: Token) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Finds the earliest special token in `haystack`.
    ///
    /// Returns the matched byte range and the token id.
    pub fn find(&self, haystack: &[u8]) -> Option<(Range<usize>, Token)> {
        let m = self.matcher.as_ref()?.find(haystack)?;
        let id = self.id_of(m.as_bytes())?;
        Some((m.range(), id))
    }

    /// Iterates over non-overlapping special token matches, left to right.
    pub fn find_iter<'h>(
        &'h self,
        haystack: &'h [u8],
    ) -> impl Iterator<Item = (Range<usize>, Token)> + 'h {
        self.matcher
            .iter()
            .flat_map(move |re| re.find_iter(haystack))
            .filter_map(move |m| self.id_of(m.as_bytes()).map(|id| (m.range(), id)))
    }
}

/// Escapes every byte as `\xHH` so arbitrary (non UTF-8) literals can be
/// matched with a byte-oriented regex.
fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4);
    for b in bytes {
        // writing to a String cannot fail
        let _ = write!(out, "\\x{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(tokens: &[&str]) -> SpecialTokenSet {
        match SpecialTokenSet::new(tokens.iter().map(|t| t.as_bytes())) {
            Ok(s) => s,
            Err(e) => panic!("special token set failed: {e}"),
        }
    }

    #[test]
    fn test_ids_follow_byte_alphabet() {
        let s = set(&["<|endoftext|>", "<|pad|>"]);
        assert_eq!(s.id_of(b"<|endoftext|>"), Some(256));
        assert_eq!(s.id_of(b"<|pad|>"), Some(257));
        assert_eq!(s.bytes_of(257), Some(b"<|pad|>".as_slice()));
        assert_eq!(s.max_len(), 13);
    }

    #[test]
    fn test_duplicates_keep_first_id() {
        let s = set(&["<a>", "<b>", "<a>"]);
        assert_eq!(s.len(), 2);
        assert_eq!(s.id_of(b"<a>"), Some(256));
        assert_eq!(s.id_of(b"<b>"), Some(257));
    }

    #[test]
    fn test_longest_match_wins_on_shared_prefix() {
        let s = set(&["<|eot|>", "<|eot|><|eot|>"]);
        let (range, id) = s.find(b"xx<|eot|><|eot|>yy").expect("should match");
        assert_eq!(range, 2..16);
        assert_eq!(id, 257);
    }

    #[test]
    fn test_find_iter_back_to_back() {
        let s = set(&["<|endoftext|>"]);
        let hits: Vec<_> = s.find_iter(b"<|endoftext|><|endoftext|>").collect();
        assert_eq!(hits, vec![(0..13, 256), (13..26, 256)]);
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let s = set(&["a.b", "[x]"]);
        assert!(s.find(b"axb").is_none());
        assert_eq!(s.find(b"--a.b").map(|(r, _)| r), Some(2..5));
        assert_eq!(s.find(b"[x]").map(|(_, id)| id), Some(257));
    }

    #[test]
    fn test_non_utf8_literal() {
        let s = match SpecialTokenSet::new([&[0xFF, 0xFE][..]]) {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(s.find(&[0x00, 0xFF, 0xFE, 0x01]), Some((1..3, 256)));
        // U+00FF encoded as UTF-8 must not match the raw byte literal
        assert!(s.find("\u{ff}\u{fe}".as_bytes()).is_none());
    }

    #[test]
    fn test_empty_set_matches_nothing() {
        let s = SpecialTokenSet::empty();
        assert!(s.find(b"<|endoftext|>").is_none());
        assert_eq!(s.find_iter(b"anything").count(), 0);
        assert_eq!(s.max_len(), 0);
    }

    #[test]
    fn test_with_ids_rejects_byte_range_ids() {
        let result = SpecialTokenSet::with_ids([(b"<x>".to_vec(), 255)]);
        assert!(matches!(result, Err(SpecialTokenError::IllegalToken(255))));
    }

    #[test]
    fn test_with_ids_rejects_reused_id() {
        let result = SpecialTokenSet::with_ids([(b"<x>".to_vec(), 300), (b"<y>".to_vec(), 300)]);
        assert!(matches!(result, Err(SpecialTokenError::IllegalToken(300))));
    }

    #[test]
    fn test_empty_literal_rejected() {
        let result = SpecialTokenSet::new([""]);
        assert!(matches!(result, Err(SpecialTokenError::Empty)));
    }
}
