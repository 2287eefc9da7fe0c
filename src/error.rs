//! Error types for BPE tokenizer and trainer operations.

use std::{error::Error, fmt, str::FromStr, string::FromUtf8Error};

use indicatif::style::TemplateError;

use crate::types::{ByteSeq, MergeOrder, Token, TokenPair};

/// Controls how UTF-8 decoding errors are handled.
///
/// Unknown token IDs always produce errors regardless of mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Fail on the first invalid UTF-8 sequence.
    #[default]
    Strict,
    /// Replace invalid UTF-8 sequences with U+FFFD.
    Replace,
}

impl FromStr for ErrorMode {
    type Err = String;

    /// Parses an error mode string ("strict" or "replace").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "replace" => Ok(Self::Replace),
            _ => Err(format!(
                "invalid error mode: {s:?} (expected \"strict\" or \"replace\")"
            )),
        }
    }
}

/// Errors that can occur during token decoding.
#[derive(Debug)]
pub enum DecodeError {
    /// Token ID not found in vocabulary.
    UnknownToken(Token),
    /// Decoded bytes are not valid UTF-8.
    ///
    /// `offset` is the byte position of the first invalid sequence in the
    /// decoded buffer and `bytes` holds the offending sequence. A truncated
    /// sequence at the end of the buffer reports everything from `offset`.
    InvalidUtf8 { offset: usize, bytes: ByteSeq },
    /// Progress bar template string was invalid.
    ProgressBarSetup(TemplateError),
}

impl DecodeError {
    pub(crate) fn from_utf8_error(err: FromUtf8Error) -> Self {
        let utf8 = err.utf8_error();
        let offset = utf8.valid_up_to();
        let buf = err.into_bytes();
        let end = match utf8.error_len() {
            Some(len) => offset + len,
            None => buf.len(),
        };
        Self::InvalidUtf8 {
            offset,
            bytes: buf[offset..end].to_vec(),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownToken(t) => write!(f, "unknown token id: {t}"),
            Self::InvalidUtf8 { offset, bytes } => write!(
                f,
                "invalid UTF-8 in decoded bytes at offset {offset}: {bytes:02x?}"
            ),
            Self::ProgressBarSetup(msg) => write!(f, "template parsing failed: {msg}"),
        }
    }
}

impl Error for DecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ProgressBarSetup(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors that can occur during text encoding.
#[derive(Debug)]
pub enum EncodeError {
    /// Regex engine failed during text splitting (e.g. backtracking limit exceeded).
    RegexMatch(String),
    /// Progress bar template string was invalid.
    ProgressBarSetup(TemplateError),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegexMatch(msg) => write!(f, "regex match failed: {msg}"),
            Self::ProgressBarSetup(msg) => write!(f, "template parsing failed: {msg}"),
        }
    }
}

impl Error for EncodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ProgressBarSetup(e) => Some(e),
            Self::RegexMatch(_) => None,
        }
    }
}

/// Errors that can occur when processing special tokens.
#[derive(Debug)]
pub enum SpecialTokenError {
    /// Token Id already exists in vocabulary.
    IllegalToken(Token),
    /// A special token with no bytes can never be matched.
    Empty,
    /// The literal matcher built from the special tokens failed to compile.
    Pattern(regex::Error),
}

impl fmt::Display for SpecialTokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalToken(tok) => write!(f, "token already exists: {tok}"),
            Self::Empty => write!(f, "special tokens must not be empty"),
            Self::Pattern(e) => write!(f, "special token matcher failed to compile: {e}"),
        }
    }
}

impl Error for SpecialTokenError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Pattern(e) => Some(e),
            _ => None,
        }
    }
}

impl From<regex::Error> for SpecialTokenError {
    fn from(e: regex::Error) -> Self {
        Self::Pattern(e)
    }
}

/// Errors that can occur when initializing a tokenizer.
#[derive(Debug)]
pub enum TokenizerInitError {
    /// The regex pattern failed to compile.
    InvalidPattern(fancy_regex::Error),
    /// A special token ID collides with an existing vocabulary entry.
    InvalidSpecialToken(SpecialTokenError),
    /// Ids 0-255 are not bound to their own byte.
    ByteAlphabet(Token),
    /// A merge rule is inconsistent with the vocabulary or with earlier rules.
    InvalidMerge {
        index: MergeOrder,
        pair: TokenPair,
        merged: Token,
        reason: &'static str,
    },
    /// The vocabulary holds entries that no byte, special token or merge accounts for.
    VocabularyMismatch { expected: usize, found: usize },
}

impl fmt::Display for TokenizerInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPattern(e) => write!(f, "invalid split pattern: {e}"),
            Self::InvalidSpecialToken(e) => write!(f, "invalid special token: {e}"),
            Self::ByteAlphabet(id) => write!(f, "token {id} is not bound to byte {id}"),
            Self::InvalidMerge {
                index,
                pair,
                merged,
                reason,
            } => write!(
                f,
                "merge #{index} ({}, {}) -> {merged} is invalid: {reason}",
                pair.0, pair.1
            ),
            Self::VocabularyMismatch { expected, found } => write!(
                f,
                "vocabulary has {found} entries, expected {expected}"
            ),
        }
    }
}

impl Error for TokenizerInitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidPattern(e) => Some(e),
            Self::InvalidSpecialToken(e) => Some(e),
            _ => None,
        }
    }
}

impl From<fancy_regex::Error> for TokenizerInitError {
    fn from(e: fancy_regex::Error) -> Self {
        Self::InvalidPattern(e)
    }
}

impl From<SpecialTokenError> for TokenizerInitError {
    fn from(e: SpecialTokenError) -> Self {
        Self::InvalidSpecialToken(e)
    }
}

/// Errors raised while splitting a byte buffer into segments or shards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    /// The requested byte range does not lie inside the buffer.
    InvalidRange { start: usize, end: usize, len: usize },
    /// Sharding was requested with zero chunks.
    ZeroChunks,
}

impl fmt::Display for SplitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRange { start, end, len } => {
                write!(f, "byte range {start}..{end} is outside buffer of {len} bytes")
            }
            Self::ZeroChunks => write!(f, "desired chunk count must be at least 1"),
        }
    }
}

impl Error for SplitError {}

/// Invalid training configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// `vocab_size` cannot even hold the byte alphabet and the special tokens.
    VocabTooSmall { requested: usize, minimum: usize },
    /// The configured lookahead cannot cover the longest special token.
    LookaheadTooShort { configured: usize, required: usize },
    /// `num_chunks` was zero.
    ZeroChunks,
    /// A special token could not be registered.
    Special(SpecialTokenError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VocabTooSmall { requested, minimum } => write!(
                f,
                "vocab_size {requested} is smaller than the {minimum} ids reserved for bytes and special tokens"
            ),
            Self::LookaheadTooShort {
                configured,
                required,
            } => write!(
                f,
                "max_special_token_len {configured} is shorter than the longest special token ({required} bytes)"
            ),
            Self::ZeroChunks => write!(f, "num_chunks must be at least 1"),
            Self::Special(e) => write!(f, "invalid special token: {e}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Special(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SpecialTokenError> for ConfigError {
    fn from(e: SpecialTokenError) -> Self {
        Self::Special(e)
    }
}

/// Errors that can occur while training.
#[derive(Debug)]
pub enum TrainError {
    Config(ConfigError),
    Split(SplitError),
    /// The pretokenization pattern failed to compile.
    InvalidPattern(fancy_regex::Error),
    /// Pretokenizing a shard failed.
    Encode(EncodeError),
    /// Progress bar template string was invalid.
    ProgressBarSetup(TemplateError),
}

impl fmt::Display for TrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "invalid training config: {e}"),
            Self::Split(e) => write!(f, "corpus split failed: {e}"),
            Self::InvalidPattern(e) => write!(f, "invalid split pattern: {e}"),
            Self::Encode(e) => write!(f, "pretokenization failed: {e}"),
            Self::ProgressBarSetup(msg) => write!(f, "template parsing failed: {msg}"),
        }
    }
}

impl Error for TrainError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Split(e) => Some(e),
            Self::InvalidPattern(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::ProgressBarSetup(e) => Some(e),
        }
    }
}

impl From<ConfigError> for TrainError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<SpecialTokenError> for TrainError {
    fn from(e: SpecialTokenError) -> Self {
        Self::Config(ConfigError::Special(e))
    }
}

impl From<SplitError> for TrainError {
    fn from(e: SplitError) -> Self {
        Self::Split(e)
    }
}

impl From<fancy_regex::Error> for TrainError {
    fn from(e: fancy_regex::Error) -> Self {
        Self::InvalidPattern(e)
    }
}

impl From<EncodeError> for TrainError {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mode_parse() {
        assert_eq!("strict".parse::<ErrorMode>(), Ok(ErrorMode::Strict));
        assert_eq!("replace".parse::<ErrorMode>(), Ok(ErrorMode::Replace));
        assert!("ignore".parse::<ErrorMode>().is_err());
    }

    #[test]
    fn test_invalid_utf8_reports_lone_continuation() {
        let err = match String::from_utf8(vec![b'a', b'b', 0x80, b'c']) {
            Err(e) => DecodeError::from_utf8_error(e),
            Ok(_) => panic!("lone continuation byte must be rejected"),
        };
        match err {
            DecodeError::InvalidUtf8 { offset, bytes } => {
                assert_eq!(offset, 2);
                assert_eq!(bytes, vec![0x80]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_utf8_reports_truncated_tail() {
        // first two bytes of a three-byte sequence (U+20AC)
        let err = match String::from_utf8(vec![b'x', 0xE2, 0x82]) {
            Err(e) => DecodeError::from_utf8_error(e),
            Ok(_) => panic!("truncated sequence must be rejected"),
        };
        match err {
            DecodeError::InvalidUtf8 { offset, bytes } => {
                assert_eq!(offset, 1);
                assert_eq!(bytes, vec![0xE2, 0x82]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
