//! Training configuration.

use crate::{
    error::ConfigError,
    pretokenizer::GPT2_PATTERN,
    special::SpecialTokenSet,
    types::{BYTE_ALPHABET_SIZE, TokenFreq},
};

/// Special token registered by default.
pub const ENDOFTEXT: &str = "<|endoftext|>";

/// Parameters for [`crate::train`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainerConfig {
    /// Target vocabulary size, counting bytes, special tokens and merges.
    pub vocab_size: usize,
    /// Special tokens, in id order. Repeats are ignored.
    pub special_tokens: Vec<String>,
    /// Lookahead used when placing shard boundaries.
    ///
    /// Defaults to the byte length of the longest special token. Must not be
    /// shorter than it.
    pub max_special_token_len: Option<usize>,
    /// Training stops once the most frequent pair occurs fewer times than this.
    pub min_frequency: TokenFreq,
    /// Number of shards the corpus is split into for counting.
    pub num_chunks: usize,
    /// Pretokenization pattern.
    pub pattern: String,
    /// Show a progress bar for the merge loop.
    pub show_progress: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            vocab_size: 10_000,
            special_tokens: vec![ENDOFTEXT.to_string()],
            max_special_token_len: None,
            min_frequency: 2,
            num_chunks: rayon::current_num_threads(),
            pattern: GPT2_PATTERN.to_string(),
            show_progress: false,
        }
    }
}

impl TrainerConfig {
    /// Config with the given target size and default everything else.
    pub fn with_vocab_size(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            ..Self::default()
        }
    }

    /// Builds the special token set, ids `256..256 + k` in config order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Special`] for an empty or unmatchable token.
    pub fn special_token_set(&self) -> Result<SpecialTokenSet, ConfigError> {
        Ok(SpecialTokenSet::new(self.special_tokens.iter().map(String::as_bytes))?)
    }

    /// Checks the config and returns the special token set it describes.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::VocabTooSmall`] if `vocab_size < 256 + #specials`
    /// - [`ConfigError::LookaheadTooShort`] if `max_special_token_len` is
    ///   shorter than the longest special token
    /// - [`ConfigError::ZeroChunks`] if `num_chunks` is 0
    /// - [`ConfigError::Special`] for invalid special tokens
    pub fn validate(&self) -> Result<SpecialTokenSet, ConfigError> {
        let specials = self.special_token_set()?;

        let minimum = BYTE_ALPHABET_SIZE + specials.len();
        if self.vocab_size < minimum {
            return Err(ConfigError::VocabTooSmall {
                requested: self.vocab_size,
                minimum,
            });
        }

        if let Some(configured) = self.max_special_token_len
            && configured < specials.max_len()
        {
            return Err(ConfigError::LookaheadTooShort {
                configured,
                required: specials.max_len(),
            });
        }

        if self.num_chunks == 0 {
            return Err(ConfigError::ZeroChunks);
        }

        Ok(specials)
    }

    /// Lookahead length in bytes for shard boundary placement.
    pub fn lookahead(&self, specials: &SpecialTokenSet) -> usize {
        self.max_special_token_len.unwrap_or(specials.max_len())
    }
}
