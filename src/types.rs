//! Type aliases and shared types for BPE training and encoding.
//!
//! These type aliases provide semantic clarity throughout the codebase.

/// Represents a token identifier in the vocabulary.
///
/// Ids 0-255 are the raw bytes, followed by the special tokens in
/// registration order, followed by one id per learned merge.
pub type Token = usize;

/// Frequency count for token pairs and pretokens during training.
///
/// Pretoken multiplicities are folded into pair frequencies, so this is a
/// corpus-wide occurrence count rather than a per-sequence one.
pub type TokenFreq = u64;

/// Merge order indicates when a merge rule was learned during training.
///
/// Lower values represent earlier merges (e.g., 0 = first merge, 1 = second merge).
pub(crate) type MergeOrder = usize;

/// Index of a pretoken in the trainer's pretoken table.
pub(crate) type PretokenIdx = usize;

/// A sequence of raw bytes.
///
/// Used for vocabulary entries, special tokens and pretokens.
pub type ByteSeq = Vec<u8>;

/// Number of tokens in the base byte alphabet.
pub const BYTE_ALPHABET_SIZE: usize = 256;

/// A pair of adjacent tokens.
///
/// Used as a key for looking up merge rules during encoding and for
/// tracking pair frequencies during training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenPair(pub Token, pub Token);
