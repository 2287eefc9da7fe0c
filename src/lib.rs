//! Byte-level BPE (Byte-Pair Encoding) tokenizer.
//!
//! This crate learns merge rules and a vocabulary from a byte corpus and
//! uses them to map arbitrary bytes to token ids and back. It supports:
//!
//! - Byte-level BPE: ids 0-255 are the raw bytes, so any input encodes
//! - Special tokens that are matched first and never split or merged
//! - Shard boundaries that never cut a special token, for parallel counting
//! - Incremental pair counting during training (only merge sites are recounted)
//! - Merge application in strict discovery order at encode time
//!
//! ## Pipeline
//!
//! raw bytes → [`splitter`] → [`pretokenizer`] → [`corpus`] counts →
//! [`trainer`] → {[`Vocabulary`], ordered [`MergeRule`]s} → [`BPETokenizer`]
//!
//! ## Usage
//!
//! ```ignore
//! use bytebpe::{BPETokenizer, ErrorMode, TrainerConfig, train};
//!
//! let config = TrainerConfig::with_vocab_size(1000);
//! let output = train(corpus.as_bytes(), &config)?;
//! let tokenizer = BPETokenizer::try_from(output)?;
//!
//! let ids = tokenizer.encode_text("hello<|endoftext|>world")?;
//! let text = tokenizer.decode_text(&ids, ErrorMode::Strict)?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(unused_must_use)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod config;
mod converter;
pub mod corpus;
pub mod error;
pub mod pretokenizer;
mod progress;
pub mod special;
pub mod splitter;
pub mod tokenizer;
pub mod trainer;
pub mod types;
pub mod vocab;

#[cfg(feature = "python")]
mod python;

pub use config::TrainerConfig;
pub use error::{
    ConfigError, DecodeError, EncodeError, ErrorMode, SpecialTokenError, SplitError, TokenizerInitError,
    TrainError,
};
pub use pretokenizer::{GPT2_PATTERN, Pretokenizer};
pub use special::{SpecialToken, SpecialTokenSet};
pub use splitter::{Segment, find_chunk_boundaries, split};
pub use tokenizer::BPETokenizer;
pub use trainer::{MergeTrainer, PairCounts, TrainOutput, count_pairs_reference, train};
pub use types::{BYTE_ALPHABET_SIZE, ByteSeq, Token, TokenFreq, TokenPair};
pub use vocab::{MergeRule, Vocabulary};

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &str = "The quick brown fox jumps over the lazy dog.<|endoftext|>\
        Le renard brun rapide saute par-dessus le chien paresseux.<|endoftext|>\
        \u{0411}\u{044b}\u{0441}\u{0442}\u{0440}\u{0430}\u{044f} \u{043b}\u{0438}\u{0441}\u{0430} \
        \u{043f}\u{0440}\u{044b}\u{0433}\u{0430}\u{0435}\u{0442}.<|endoftext|>\
        \u{7d20}\u{65e9}\u{3044}\u{8336}\u{8272}\u{306e}\u{72d0}\u{304c}\u{8df3}\u{3076}\u{3002}\n\
        It's 2024 and they'll say we've won 3 times!!<|endoftext|>";

    fn trained(vocab_size: usize, specials: &[&str]) -> BPETokenizer {
        let config = TrainerConfig {
            vocab_size,
            special_tokens: specials.iter().map(|s| s.to_string()).collect(),
            num_chunks: 3,
            ..TrainerConfig::default()
        };
        let output = match train(CORPUS.repeat(8).as_bytes(), &config) {
            Ok(out) => out,
            Err(e) => panic!("training failed: {e}"),
        };
        match BPETokenizer::try_from(output) {
            Ok(tok) => tok,
            Err(e) => panic!("tokenizer init failed: {e}"),
        }
    }

    #[test]
    fn test_full_pipeline_round_trip() {
        let tok = trained(600, &["<|endoftext|>"]);
        assert!(tok.merges().len() > 50);

        for text in [
            CORPUS,
            "the lazy fox",
            "unseen words: xylophone, \u{1F980}, \u{00e9}t\u{00e9}",
            "<|endoftext|><|endoftext|>",
            "  leading and trailing  \n\t",
            "",
        ] {
            let ids = tok.encode_text(text).expect("encodable");
            let back = tok.decode_text(&ids, ErrorMode::Strict).expect("decodable");
            assert_eq!(back, text);
        }
    }

    #[test]
    fn test_trained_merges_compress() {
        let tok = trained(600, &["<|endoftext|>"]);
        let ids = tok.encode_text("The quick brown fox jumps over the lazy dog.").expect("encodable");
        assert!(ids.len() < 20, "expected compression, got {} ids", ids.len());
    }

    #[test]
    fn test_hello_endoftext_scenario() {
        let tok = trained(400, &["<|endoftext|>"]);
        let eot = tok.special_tokens().id_of(b"<|endoftext|>").expect("registered");
        assert_eq!(eot, 256);

        let ids = tok.encode_text("hello<|endoftext|><|endoftext|>world").expect("encodable");
        let hello = tok.encode_text("hello").expect("encodable");
        let world = tok.encode_text("world").expect("encodable");

        let mut expected = hello;
        expected.extend([eot, eot]);
        expected.extend(world);
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_specials_are_atomic() {
        let tok = trained(500, &["<|endoftext|>", "<|pad|>"]);
        let ids = tok
            .encode_text("a<|pad|>b<|endoftext|>c<|pad|><|endoftext|>")
            .expect("encodable");
        let special_hits: Vec<Token> = ids.iter().copied().filter(|&id| id == 256 || id == 257).collect();
        assert_eq!(special_hits, vec![257, 256, 257, 256]);
        // no other id decodes to bytes containing a special delimiter
        for &id in ids.iter().filter(|&&id| id != 256 && id != 257) {
            let bytes = tok.token_bytes(id).expect("known id");
            assert!(!bytes.contains(&b'|'));
        }
    }

    #[test]
    fn test_longer_special_sharing_prefix_wins() {
        let tok = trained(300, &["<|eot|>", "<|eot|><|eot|>"]);
        let ids = tok.encode_text("x<|eot|><|eot|><|eot|>").expect("encodable");
        assert_eq!(ids, vec![b'x' as Token, 257, 256]);
    }

    #[test]
    fn test_rebuilt_tokenizer_matches() {
        let tok = trained(450, &["<|endoftext|>"]);
        let rebuilt = BPETokenizer::new(
            tok.vocabulary().clone(),
            tok.merges().to_vec(),
            tok.special_tokens().clone(),
        )
        .expect("consistent parts");
        let text = "It's the quick fox<|endoftext|>";
        assert_eq!(rebuilt.encode_text(text).expect("encodable"), tok.encode_text(text).expect("encodable"));
    }

    #[test]
    fn test_vocab_size_matches_target() {
        let tok = trained(300, &["<|endoftext|>"]);
        assert_eq!(tok.vocab_size(), 300);
        assert_eq!(tok.vocabulary().len(), 300);
    }
}
