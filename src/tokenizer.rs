//! This module provides the complete encoding pipeline:
//! 1. Special token splitting on the raw bytes.
//! 2. Regex pretokenization of every plain segment.
//! 3. BPE merge application on each pretoken's bytes.
//!
//! The tokenizer supports both single-text and parallel batch encoding
//! via Rayon. It is immutable once built and can be shared across threads.

use indicatif::ParallelProgressIterator;
use rayon::prelude::*;

use crate::{
    converter::BPEConverter,
    error::{DecodeError, EncodeError, ErrorMode, TokenizerInitError},
    pretokenizer::{GPT2_PATTERN, Pretokenizer},
    progress::progress_bar,
    special::SpecialTokenSet,
    splitter::{Segment, segments},
    trainer::TrainOutput,
    types::{ByteSeq, Token},
    vocab::{MergeRule, Vocabulary},
};

/// BPE Tokenizer that performs special token splitting, pretokenization,
/// encoding and decoding.
///
/// This struct encapsulates the complete encoding pipeline by combining:
/// - The special tokens, matched before anything else.
/// - A compiled regex pattern for pretokenization.
/// - A BPE converter with learned merge rules.
#[derive(Debug, Clone)]
pub struct BPETokenizer {
    specials: SpecialTokenSet,
    pretokenizer: Pretokenizer,
    converter: BPEConverter,
}

impl BPETokenizer {
    /// Creates a tokenizer using the GPT-2 pretokenization pattern.
    ///
    /// # Arguments
    ///
    /// * `vocabulary` - Token id to bytes table.
    /// * `merges` - BPE merge rules in discovery order.
    /// * `specials` - Special tokens used at training time.
    ///
    /// # Errors
    ///
    /// Returns a [`TokenizerInitError`] if the three inputs disagree, see
    /// [`BPETokenizer::with_pattern`].
    pub fn new(
        vocabulary: Vocabulary,
        merges: Vec<MergeRule>,
        specials: SpecialTokenSet,
    ) -> Result<Self, TokenizerInitError> {
        Self::with_pattern(vocabulary, merges, specials, GPT2_PATTERN)
    }

    /// Creates a tokenizer with a custom pretokenization pattern.
    ///
    /// Only bytes matched by `pattern` reach the merge step. A pattern that
    /// does not cover every byte (such as `\S+`, which skips whitespace)
    /// makes encoding lossy: unmatched bytes are dropped and
    /// `decode(encode(x)) != x`. [`GPT2_PATTERN`] covers all input.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizerInitError::InvalidPattern`] if `pattern` fails to
    /// compile. Returns [`TokenizerInitError::ByteAlphabet`],
    /// [`TokenizerInitError::InvalidMerge`],
    /// [`TokenizerInitError::InvalidSpecialToken`] or
    /// [`TokenizerInitError::VocabularyMismatch`] if the vocabulary, merges
    /// and special tokens are not mutually consistent.
    pub fn with_pattern(
        vocabulary: Vocabulary,
        merges: Vec<MergeRule>,
        specials: SpecialTokenSet,
        pattern: &str,
    ) -> Result<Self, TokenizerInitError> {
        let converter = BPEConverter::new(vocabulary, merges, &specials)?;
        let pretokenizer = Pretokenizer::new(pattern)?;

        Ok(Self {
            specials,
            pretokenizer,
            converter,
        })
    }

    /// Encodes raw bytes: special tokens → pretokens → BPE.
    ///
    /// Special tokens are emitted as their reserved id. Every other byte
    /// ends up in some token, so encoding never fails for lack of a token.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RegexMatch`] if the regex engine fails during
    /// pretokenization (e.g. backtracking limit exceeded).
    pub fn encode(&self, bytes: &[u8]) -> Result<Vec<Token>, EncodeError> {
        if bytes.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_tokens = Vec::with_capacity(bytes.len() / 3);
        for segment in segments(bytes, &self.specials) {
            match segment {
                Segment::Special { id, .. } => all_tokens.push(id),
                Segment::Plain(plain) => self.encode_plain(plain, &mut all_tokens)?,
            }
        }

        Ok(all_tokens)
    }

    /// Encodes a string. See [`BPETokenizer::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RegexMatch`] if pretokenization fails.
    pub fn encode_text(&self, text: &str) -> Result<Vec<Token>, EncodeError> {
        self.encode(text.as_bytes())
    }

    /// Encodes bytes without special token handling: special token literals
    /// are treated as ordinary text.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RegexMatch`] if pretokenization fails.
    pub fn encode_ordinary(&self, bytes: &[u8]) -> Result<Vec<Token>, EncodeError> {
        let mut all_tokens = Vec::with_capacity(bytes.len() / 3);
        self.encode_plain(bytes, &mut all_tokens)?;
        Ok(all_tokens)
    }

    /// Encode many texts in parallel using Rayon.
    ///
    /// # Arguments
    ///
    /// * `texts` - Slice of text strings to encode.
    /// * `show_progress` - Whether to display a progress bar during encoding.
    ///
    /// # Returns
    ///
    /// Vector of token sequences in the same order as input texts.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RegexMatch`] if the regex engine fails during
    /// pretokenization, or [`EncodeError::ProgressBarSetup`] if the progress
    /// bar template fails to compile.
    pub fn encode_batch(
        &self,
        texts: &[&str],
        show_progress: bool,
    ) -> Result<Vec<Vec<Token>>, EncodeError> {
        let pb = progress_bar(texts.len() as u64, "Encoding texts", show_progress)
            .map_err(EncodeError::ProgressBarSetup)?;

        texts
            .par_iter()
            .progress_with(pb)
            .map(|text| self.encode_text(text))
            .collect()
    }

    /// Decodes a token sequence back into bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownToken`] if a token ID is not found in the
    /// vocabulary or among the special tokens.
    pub fn decode(&self, tokens: &[Token]) -> Result<ByteSeq, DecodeError> {
        self.converter.decode(tokens)
    }

    /// Decodes a token sequence back into a UTF-8 string.
    ///
    /// Tokens may end in the middle of a multi-byte character; validity is
    /// only checked on the concatenated bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownToken`] if a token ID is not found in the
    /// vocabulary, or [`DecodeError::InvalidUtf8`] if the decoded bytes are not
    /// valid UTF-8 (only in `Strict` mode).
    pub fn decode_text(&self, tokens: &[Token], errors: ErrorMode) -> Result<String, DecodeError> {
        let bytes = self.converter.decode(tokens)?;

        match errors {
            ErrorMode::Strict => String::from_utf8(bytes).map_err(DecodeError::from_utf8_error),
            ErrorMode::Replace => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }

    /// Decodes multiple token sequences in parallel.
    ///
    /// # Arguments
    ///
    /// * `token_seqs` - Slice of token sequences to decode.
    /// * `errors` - How to handle invalid UTF-8 in decoded bytes.
    /// * `show_progress` - Whether to display a progress bar during decoding.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownToken`] if a token ID is not found in the
    /// vocabulary, [`DecodeError::InvalidUtf8`] if the decoded bytes are not valid
    /// UTF-8 (only in `Strict` mode), or [`DecodeError::ProgressBarSetup`] if the
    /// progress bar template fails to compile.
    pub fn decode_batch(
        &self,
        token_seqs: &[&[Token]],
        errors: ErrorMode,
        show_progress: bool,
    ) -> Result<Vec<String>, DecodeError> {
        let pb = progress_bar(token_seqs.len() as u64, "Decoding tokens", show_progress)
            .map_err(DecodeError::ProgressBarSetup)?;

        token_seqs
            .par_iter()
            .progress_with(pb)
            .map(|tokens| self.decode_text(tokens, errors))
            .collect()
    }

    /// Number of distinct token ids, special tokens included.
    pub fn vocab_size(&self) -> usize {
        self.converter.vocab_size()
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        self.converter.vocab()
    }

    /// Merge rules in discovery order.
    pub fn merges(&self) -> &[MergeRule] {
        self.converter.rules()
    }

    pub fn special_tokens(&self) -> &SpecialTokenSet {
        &self.specials
    }

    /// Bytes of a single token.
    pub fn token_bytes(&self, token: Token) -> Option<&[u8]> {
        self.converter.token_bytes(token)
    }

    pub fn pattern(&self) -> &str {
        self.pretokenizer.pattern()
    }

    /// Pretokenizes a plain segment and appends the BPE tokens of every
    /// pretoken to `out`.
    #[inline]
    fn encode_plain(&self, plain: &[u8], out: &mut Vec<Token>) -> Result<(), EncodeError> {
        for pretoken in self.pretokenizer.pretokenize(plain)? {
            out.extend(self.converter.encode_bytes(pretoken));
        }
        Ok(())
    }
}

impl TryFrom<TrainOutput> for BPETokenizer {
    type Error = TokenizerInitError;

    fn try_from(output: TrainOutput) -> Result<Self, Self::Error> {
        Self::new(output.vocabulary, output.merges, output.special_tokens)
    }
}
