//! BPE Converter - token encoding using learned merge rules.
//!
//! Merges are applied with a priority queue keyed on merge order, the same
//! idea the training loop uses to pick pairs:
//! "A Formal Perspective on Byte-Pair Encoding"
//! https://aclanthology.org/2023.findings-acl.38.pdf
//!
//! A pair created by a merge can only match a rule learned after that merge,
//! so popping candidates by (merge order, position) gives the same result as
//! applying rule 0 everywhere, then rule 1 everywhere, and so on.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, HashSet},
};

use crate::{
    error::{DecodeError, SpecialTokenError, TokenizerInitError},
    special::SpecialTokenSet,
    types::{BYTE_ALPHABET_SIZE, ByteSeq, MergeOrder, Token, TokenPair},
    vocab::{MergeRule, Vocabulary},
};

/// Item in the priority queue for merge ordering.
///
/// Candidates are ordered by merge_order (earliest first) with position
/// as a tiebreaker. This ensures we apply merges in the correct training order.
#[derive(Debug, PartialEq, Eq)]
struct MergeCandidate {
    /// Merge order from training (0 = first merge, 1 = second merge, etc.).
    ///
    /// Lower values have higher priority and will be applied first.
    merge_order: MergeOrder,

    /// The token pair to be merged.
    pair: TokenPair,

    /// Position in the token sequence where this pair starts.
    ///
    /// Earlier positions go first, so overlapping occurrences such as
    /// `a a a` under `(a, a)` merge left to right.
    position: usize,
}

impl PartialOrd for MergeCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // We reverse the comparison (other vs self) to create min-heap behavior
        // from Rust's max-heap BinaryHeap.
        other
            .merge_order
            .cmp(&self.merge_order)
            .then_with(|| other.position.cmp(&self.position))
    }
}

/// Applies learned merge rules to byte sequences and maps ids back to bytes.
///
/// Built from a vocabulary, its ordered merges and the special tokens; the
/// three are checked against each other once, at construction.
#[derive(Debug, Clone)]
pub(crate) struct BPEConverter {
    /// Maps token pairs to (merged_token, merge_order).
    merges: HashMap<TokenPair, (Token, MergeOrder)>,

    /// Merge rules in discovery order.
    rules: Vec<MergeRule>,

    /// Maps token IDs to their byte sequences.
    vocab: Vocabulary,

    /// Special tokens whose ids lie beyond the vocabulary table.
    extra_specials: HashMap<Token, ByteSeq>,
}

impl BPEConverter {
    /// Creates a converter, validating that `vocab`, `rules` and `specials`
    /// agree.
    ///
    /// # Errors
    ///
    /// - [`TokenizerInitError::ByteAlphabet`] if an id below 256 is not bound
    ///   to its own byte
    /// - [`TokenizerInitError::InvalidSpecialToken`] if a special token id
    ///   points at a vocabulary entry with different bytes
    /// - [`TokenizerInitError::InvalidMerge`] if a rule uses a parent that is
    ///   not defined before it, reuses an id, or disagrees with the
    ///   vocabulary
    /// - [`TokenizerInitError::VocabularyMismatch`] if the vocabulary holds
    ///   entries no byte, special token or merge accounts for
    pub(crate) fn new(
        vocab: Vocabulary,
        rules: Vec<MergeRule>,
        specials: &SpecialTokenSet,
    ) -> Result<Self, TokenizerInitError> {
        if let Some(id) = vocab.first_unbound_byte() {
            return Err(TokenizerInitError::ByteAlphabet(id));
        }

        let mut extra_specials = HashMap::new();
        let mut specials_in_vocab = 0;
        for special in specials.iter() {
            match vocab.get(special.id) {
                Some(bytes) if bytes == special.bytes.as_slice() => specials_in_vocab += 1,
                Some(_) => {
                    return Err(SpecialTokenError::IllegalToken(special.id).into());
                }
                None => {
                    extra_specials.insert(special.id, special.bytes.clone());
                }
            }
        }

        let mut merges = HashMap::with_capacity(rules.len());
        let mut defined: HashSet<Token> = HashSet::with_capacity(rules.len());
        for (index, rule) in rules.iter().enumerate() {
            let invalid = |reason| TokenizerInitError::InvalidMerge {
                index,
                pair: rule.pair,
                merged: rule.merged,
                reason,
            };
            let TokenPair(left, right) = rule.pair;

            for parent in [left, right] {
                if specials.contains_id(parent) {
                    return Err(invalid("special tokens cannot be merged"));
                }
                if parent >= BYTE_ALPHABET_SIZE && !defined.contains(&parent) {
                    return Err(invalid("parent is not defined by an earlier merge"));
                }
            }
            if rule.merged < BYTE_ALPHABET_SIZE || specials.contains_id(rule.merged) {
                return Err(invalid("merged id collides with a byte or special token"));
            }
            if !defined.insert(rule.merged) {
                return Err(invalid("merged id is assigned twice"));
            }
            if merges.insert(rule.pair, (rule.merged, index)).is_some() {
                return Err(invalid("pair is merged twice"));
            }

            let Some(merged_bytes) = vocab.get(rule.merged) else {
                return Err(invalid("merged id is missing from the vocabulary"));
            };
            let left_bytes = vocab.get(left).unwrap_or_default();
            let right_bytes = vocab.get(right).unwrap_or_default();
            if merged_bytes.len() != left_bytes.len() + right_bytes.len()
                || !merged_bytes.starts_with(left_bytes)
                || !merged_bytes.ends_with(right_bytes)
            {
                return Err(invalid("vocabulary entry is not the concatenation of its parents"));
            }
        }

        let expected = BYTE_ALPHABET_SIZE + specials_in_vocab + rules.len();
        if vocab.len() != expected {
            return Err(TokenizerInitError::VocabularyMismatch {
                expected,
                found: vocab.len(),
            });
        }

        Ok(Self {
            merges,
            rules,
            vocab,
            extra_specials,
        })
    }

    /// Encodes one pretoken's bytes.
    pub(crate) fn encode_bytes(&self, bytes: &[u8]) -> Vec<Token> {
        self.encode(bytes.iter().map(|&b| Token::from(b)).collect())
    }

    /// Encodes a token sequence by applying learned BPE merge rules.
    ///
    /// Merges are applied in the order they were learned during training,
    /// using a priority queue to efficiently find and apply the next merge.
    ///
    /// # Time Complexity
    ///
    /// O(N log N) where N is the input sequence length.
    pub(crate) fn encode(&self, tokens: Vec<Token>) -> Vec<Token> {
        if tokens.len() <= 1 || self.merges.is_empty() {
            return tokens;
        }

        let mut heap = BinaryHeap::new();

        // One slot per input position. A merge writes the new token into the
        // left slot and sets the right slot to None, so positions stored in
        // the heap stay valid and live neighbours are found by skipping None
        // slots. Candidates left stale by an earlier merge fail the pair
        // check below and are dropped.
        let mut results: Vec<Option<Token>> = tokens.iter().map(|&t| Some(t)).collect();

        self.initialize_minheap(&tokens, &mut heap);

        while let Some(candidate) = heap.pop() {
            let pos = candidate.position;

            // the left token may itself be the product of an earlier merge
            let Some(left) = results.get(pos).copied().flatten() else {
                continue;
            };
            // skip consumed slots to find the live right neighbour
            let mut right_idx = pos + 1;
            while right_idx < results.len() && matches!(results.get(right_idx), Some(None)) {
                right_idx += 1;
            }
            let Some(right) = results.get(right_idx).copied().flatten() else {
                continue;
            };

            if candidate.pair != TokenPair(left, right) {
                continue;
            }

            let Some(&(merge_tok, _order)) = self.merges.get(&candidate.pair) else {
                continue;
            };

            results[pos] = Some(merge_tok);
            results[right_idx] = None;

            self.track_new_merge_candidate(&mut heap, &results, pos, merge_tok, true);
            self.track_new_merge_candidate(&mut heap, &results, pos, merge_tok, false);
        }

        results.into_iter().flatten().collect()
    }

    /// Adds the pair the merged token forms with its left or right neighbour
    /// to the queue, if a rule exists for it.
    ///
    /// The candidate's position is the slot of the pair's left token, which
    /// is the neighbour's slot when looking left.
    fn track_new_merge_candidate(
        &self,
        heap: &mut BinaryHeap<MergeCandidate>,
        results: &[Option<Token>],
        pos: usize,
        merged_tok: Token,
        check_left: bool,
    ) {
        let mut idx;
        let n = results.len();

        if check_left {
            if pos == 0 {
                return;
            }
            idx = pos - 1;
            while idx > 0 && matches!(results.get(idx), Some(None)) {
                idx -= 1;
            }
        } else {
            if pos + 1 >= n {
                return;
            }
            idx = pos + 1;
            while idx < n && matches!(results.get(idx), Some(None)) {
                idx += 1;
            }
        };

        let Some(&Some(tok)) = results.get(idx) else {
            return;
        };

        let pair = if check_left {
            TokenPair(tok, merged_tok)
        } else {
            TokenPair(merged_tok, tok)
        };

        if let Some(&(_merge_tok, merge_order)) = self.merges.get(&pair) {
            let position = if check_left { idx } else { pos };
            heap.push(MergeCandidate {
                merge_order,
                pair,
                position,
            });
        };
    }

    /// Populates the priority queue with all initial mergeable pairs.
    fn initialize_minheap(&self, tokens: &[Token], heap: &mut BinaryHeap<MergeCandidate>) {
        for (i, w) in tokens.windows(2).enumerate() {
            let pair = TokenPair(w[0], w[1]);
            if let Some(&(_, merge_order)) = self.merges.get(&pair) {
                heap.push(MergeCandidate {
                    merge_order,
                    pair,
                    position: i,
                });
            }
        }
    }

    pub(crate) fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub(crate) fn rules(&self) -> &[MergeRule] {
        &self.rules
    }

    /// Number of distinct ids: vocabulary entries plus out-of-table specials.
    pub(crate) fn vocab_size(&self) -> usize {
        self.vocab.len() + self.extra_specials.len()
    }

    /// Bytes of a single token, special or not.
    pub(crate) fn token_bytes(&self, token: Token) -> Option<&[u8]> {
        self.vocab
            .get(token)
            .or_else(|| self.extra_specials.get(&token).map(Vec::as_slice))
    }

    /// Decodes a token sequence back into bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownToken`] for an id that is neither in the
    /// vocabulary nor a special token.
    pub(crate) fn decode(&self, tokens: &[Token]) -> Result<ByteSeq, DecodeError> {
        let mut result = Vec::with_capacity(tokens.len() * 4);
        for &token in tokens {
            let Some(bytes) = self.token_bytes(token) else {
                return Err(DecodeError::UnknownToken(token));
            };
            result.extend_from_slice(bytes);
        }
        Ok(result)
    }
}
