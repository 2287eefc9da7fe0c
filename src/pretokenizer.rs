//! Pattern-based pretokenization of plain text segments.
//!
//! A pretoken is one match of the split pattern. Merges are only ever
//! learned and applied inside a pretoken, never across two of them.

use fancy_regex::Regex;

use crate::error::EncodeError;

/// GPT-2 split pattern: contractions, letter runs, number runs, runs of
/// other symbols (each optionally led by one space) and whitespace runs.
pub const GPT2_PATTERN: &str =
    r"'(?:[sdmt]|ll|ve|re)| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Splits plain bytes into pretokens with a fixed regex pattern.
#[derive(Debug, Clone)]
pub struct Pretokenizer {
    pattern: Regex,
}

impl Pretokenizer {
    /// Compiles `pattern` into a pretokenizer.
    ///
    /// # Errors
    ///
    /// Returns the regex compile error if `pattern` is invalid.
    pub fn new(pattern: &str) -> Result<Self, fancy_regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// Pretokenizer using [`GPT2_PATTERN`].
    ///
    /// # Errors
    ///
    /// Only fails if the regex engine rejects the built-in pattern.
    pub fn gpt2() -> Result<Self, fancy_regex::Error> {
        Self::new(GPT2_PATTERN)
    }

    /// The source pattern.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Splits `plain` into pretokens, borrowing from the input.
    ///
    /// Valid UTF-8 runs are matched with the pattern. Bytes that are not
    /// valid UTF-8 cannot be classified by it, so each maximal run of them
    /// becomes a pretoken of its own. With a pattern that matches every
    /// character (such as [`GPT2_PATTERN`]) the pretokens concatenate back to
    /// `plain` exactly.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RegexMatch`] if the regex engine fails
    /// (e.g. backtracking limit exceeded).
    pub fn pretokenize<'a>(&self, plain: &'a [u8]) -> Result<Vec<&'a [u8]>, EncodeError> {
        let mut pretokens = Vec::with_capacity(plain.len() / 4 + 1);
        let mut pos = 0;
        let mut invalid_start: Option<usize> = None;

        for chunk in plain.utf8_chunks() {
            let valid = chunk.valid();
            if !valid.is_empty() {
                if let Some(start) = invalid_start.take() {
                    pretokens.push(&plain[start..pos]);
                }
                for mat in self.pattern.find_iter(valid) {
                    let m = mat.map_err(|e| EncodeError::RegexMatch(e.to_string()))?;
                    if m.start() == m.end() {
                        continue;
                    }
                    pretokens.push(&plain[pos + m.start()..pos + m.end()]);
                }
                pos += valid.len();
            }

            let invalid = chunk.invalid();
            if !invalid.is_empty() {
                invalid_start.get_or_insert(pos);
                pos += invalid.len();
            }
        }

        if let Some(start) = invalid_start {
            pretokens.push(&plain[start..pos]);
        }

        Ok(pretokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpt2() -> Pretokenizer {
        match Pretokenizer::gpt2() {
            Ok(p) => p,
            Err(e) => panic!("pattern failed to compile: {e}"),
        }
    }

    fn pieces(p: &Pretokenizer, input: &[u8]) -> Vec<Vec<u8>> {
        match p.pretokenize(input) {
            Ok(toks) => toks.into_iter().map(<[u8]>::to_vec).collect(),
            Err(e) => panic!("pretokenize failed: {e}"),
        }
    }

    fn strs(items: &[&str]) -> Vec<Vec<u8>> {
        items.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_words_keep_leading_space() {
        assert_eq!(
            pieces(&gpt2(), b"low lower lowest"),
            strs(&["low", " lower", " lowest"])
        );
    }

    #[test]
    fn test_contractions_numbers_symbols() {
        assert_eq!(
            pieces(&gpt2(), b"it's 42 apples!!"),
            strs(&["it", "'s", " 42", " apples", "!!"])
        );
    }

    #[test]
    fn test_whitespace_run_leaves_last_space_for_word() {
        assert_eq!(pieces(&gpt2(), b"a   b"), strs(&["a", "  ", " b"]));
        assert_eq!(pieces(&gpt2(), b"end\n\n"), strs(&["end", "\n\n"]));
    }

    #[test]
    fn test_multibyte_scripts() {
        assert_eq!(
            pieces(&gpt2(), "h\u{e9}llo \u{4e16}\u{754c}".as_bytes()),
            strs(&["h\u{e9}llo", " \u{4e16}\u{754c}"])
        );
    }

    #[test]
    fn test_invalid_utf8_run_is_one_pretoken() {
        let input = b"ab\xff\xfe\x80cd";
        assert_eq!(
            pieces(&gpt2(), input),
            vec![b"ab".to_vec(), vec![0xff, 0xfe, 0x80], b"cd".to_vec()]
        );
    }

    #[test]
    fn test_trailing_truncated_sequence() {
        // first two bytes of U+20AC at the end of the segment
        let input = b"x \xe2\x82";
        assert_eq!(
            pieces(&gpt2(), input),
            vec![b"x".to_vec(), b" ".to_vec(), vec![0xe2, 0x82]]
        );
    }

    #[test]
    fn test_pretokens_cover_input() {
        let input = "Mixed\tscripts: \u{0416}\u{0443}\u{043a}, \u{3053}\u{3093}\u{306b}\u{3061}\u{306f} 123\r\n  ok".as_bytes();
        let joined: Vec<u8> = pieces(&gpt2(), input).concat();
        assert_eq!(joined, input);
    }

    #[test]
    fn test_empty_input() {
        assert!(pieces(&gpt2(), b"").is_empty());
    }

    #[test]
    fn test_custom_pattern() {
        let p = match Pretokenizer::new(r"\S+") {
            Ok(p) => p,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(p.pattern(), r"\S+");
        assert_eq!(pieces(&p, b"ab cd"), strs(&["ab", "cd"]));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(Pretokenizer::new(r"(unclosed").is_err());
    }
}
