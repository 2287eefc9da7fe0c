//! Core BPE training loop with incremental pair counting.
//!
//! Identical pretokens are stored once with a multiplicity. Pair frequencies
//! are counted once up front; after that every merge only touches the
//! pretokens that contain the merged pair and patches the counts of the
//! pairs around each merge site.
//!
//! A max heap holds candidate pairs. It may contain stale entries after
//! merges, so entries are validated against `pair_freqs` before use.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, HashSet},
    time::Instant,
};

use indicatif::ProgressBar;
use rayon::prelude::*;

use crate::{
    config::TrainerConfig,
    corpus::{PretokenCounts, count_pretokens_parallel},
    error::TrainError,
    pretokenizer::Pretokenizer,
    progress::progress_bar,
    special::SpecialTokenSet,
    splitter::find_chunk_boundaries_with_lookahead,
    types::{ByteSeq, PretokenIdx, Token, TokenFreq, TokenPair},
    vocab::{MergeRule, Vocabulary},
};

/// Frequency of every adjacent pair, weighted by pretoken multiplicity.
pub type PairCounts = HashMap<TokenPair, TokenFreq>;

type PairPositions = HashMap<TokenPair, HashSet<PretokenIdx>>;

/// Item in the max heap for tracking the most frequent token pair.
#[derive(Debug, PartialEq, Eq)]
struct HeapItem {
    /// Frequency count of this token pair when it was pushed.
    freq: TokenFreq,
    /// Bytes of the left token.
    left: ByteSeq,
    /// Bytes of the right token.
    right: ByteSeq,
    pair: TokenPair,
}

impl HeapItem {
    fn new(vocab: &Vocabulary, pair: TokenPair, freq: TokenFreq) -> Self {
        Self {
            freq,
            left: vocab.get(pair.0).map(<[u8]>::to_vec).unwrap_or_default(),
            right: vocab.get(pair.1).map(<[u8]>::to_vec).unwrap_or_default(),
            pair,
        }
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Highest frequency first. Equal frequencies go to the lexicographically
/// greatest `(left bytes, right bytes)`; distinct pairs spelling the same
/// bytes fall back to the smaller ids.
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.freq
            .cmp(&other.freq)
            .then_with(|| self.left.cmp(&other.left))
            .then_with(|| self.right.cmp(&other.right))
            .then_with(|| other.pair.cmp(&self.pair))
    }
}

/// Incremental BPE trainer over a table of distinct pretokens.
///
/// Every committed [`MergeTrainer::merge_step`] leaves the vocabulary and
/// the merge list consistent, so training may be stopped between steps.
#[derive(Debug)]
pub struct MergeTrainer {
    /// Current token ids of each distinct pretoken.
    pretokens: Vec<Vec<Token>>,

    /// Multiplicity of each pretoken in the corpus.
    counts: Vec<TokenFreq>,

    /// Current frequencies of each pair.
    ///
    /// Source of truth for pair frequencies. Pairs that no longer occur are
    /// removed.
    pair_freqs: PairCounts,

    /// Pretokens in which each pair may occur.
    ///
    /// A superset: entries are added when a pair appears in a pretoken and
    /// only dropped when the pair is merged or disappears from the corpus.
    pair_positions: PairPositions,

    /// Max heap of candidate pairs, possibly stale.
    heap: BinaryHeap<HeapItem>,

    vocab: Vocabulary,

    /// Learned merges in discovery order.
    merges: Vec<MergeRule>,

    /// Pairs seen fewer times than this are never merged.
    min_frequency: TokenFreq,
}

impl MergeTrainer {
    /// Creates a trainer from pretoken counts and a starting vocabulary
    /// (bytes and special tokens). New ids are allocated after the last
    /// vocabulary entry.
    pub fn new(pretoken_counts: PretokenCounts, vocabulary: Vocabulary) -> Self {
        let mut entries: Vec<(ByteSeq, TokenFreq)> = pretoken_counts
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .collect();
        // fixed pretoken order, independent of hash map iteration
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let (pretokens, counts): (Vec<Vec<Token>>, Vec<TokenFreq>) = entries
            .into_iter()
            .map(|(bytes, count)| (bytes.into_iter().map(Token::from).collect(), count))
            .unzip();

        let (pair_freqs, pair_positions) = count_pairs_parallel(&pretokens, &counts);
        let heap = pair_freqs
            .iter()
            .map(|(&pair, &freq)| HeapItem::new(&vocabulary, pair, freq))
            .collect();

        Self {
            pretokens,
            counts,
            pair_freqs,
            pair_positions,
            heap,
            vocab: vocabulary,
            merges: Vec::new(),
            min_frequency: 2,
        }
    }

    /// Sets the minimum pair frequency for a merge (at least 1).
    pub fn with_min_frequency(mut self, min_frequency: TokenFreq) -> Self {
        self.min_frequency = min_frequency.max(1);
        self
    }

    /// Performs one merge.
    ///
    /// Returns the learned rule, or `None` if no pair reaches the minimum
    /// frequency. Nothing changes when `None` is returned.
    pub fn merge_step(&mut self) -> Option<MergeRule> {
        let best = self.pop_best()?;
        if best.freq < self.min_frequency {
            self.heap.push(best);
            return None;
        }

        let pair = best.pair;
        let merged = self.vocab.push_merge(pair)?;
        let rule = MergeRule { pair, merged };
        self.merges.push(rule);

        log::debug!(
            "merge_step: #{} ({}, {}) -> {} {:?} x{}",
            self.merges.len() - 1,
            pair.0,
            pair.1,
            merged,
            String::from_utf8_lossy(self.vocab.get(merged).unwrap_or_default()),
            best.freq
        );

        let mut positions: Vec<PretokenIdx> = self
            .pair_positions
            .remove(&pair)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        positions.sort_unstable();

        // net change per pair, weighted by pretoken multiplicity
        let mut deltas: HashMap<TokenPair, i128> = HashMap::new();
        for idx in positions {
            let count = i128::from(self.counts[idx]);
            for (changed, delta) in merge_pretoken(&mut self.pretokens[idx], pair, merged) {
                *deltas.entry(changed).or_default() += i128::from(delta) * count;
                if delta > 0 {
                    self.pair_positions.entry(changed).or_default().insert(idx);
                }
            }
        }

        for (changed, delta) in deltas {
            if delta == 0 {
                continue;
            }
            let current = i128::from(self.pair_freqs.get(&changed).copied().unwrap_or(0));
            debug_assert!(current + delta >= 0, "negative count for {changed:?}");
            let updated = TokenFreq::try_from(current + delta).unwrap_or(0);

            if updated == 0 {
                self.pair_freqs.remove(&changed);
                self.pair_positions.remove(&changed);
                continue;
            }
            self.pair_freqs.insert(changed, updated);
            if delta > 0 {
                self.heap.push(HeapItem::new(&self.vocab, changed, updated));
            }
        }

        Some(rule)
    }

    /// Merges until the vocabulary holds `target_vocab_size` entries or no
    /// pair is frequent enough. Returns the number of merges performed.
    pub fn train(&mut self, target_vocab_size: usize) -> usize {
        self.train_with_progress(target_vocab_size, &ProgressBar::hidden())
    }

    /// Like [`MergeTrainer::train`], advancing `pb` once per merge.
    pub fn train_with_progress(&mut self, target_vocab_size: usize, pb: &ProgressBar) -> usize {
        let mut performed = 0;
        while self.vocab.len() < target_vocab_size {
            if self.merge_step().is_none() {
                break;
            }
            performed += 1;
            pb.inc(1);
        }
        performed
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn merges(&self) -> &[MergeRule] {
        &self.merges
    }

    /// Incrementally maintained pair frequencies.
    pub fn pair_counts(&self) -> &PairCounts {
        &self.pair_freqs
    }

    /// Pair frequencies recounted from scratch over the current pretokens.
    pub fn recount(&self) -> PairCounts {
        count_pairs_reference(&self.pretokens, &self.counts)
    }

    /// Current token ids of each distinct pretoken with its multiplicity.
    pub fn pretokens(&self) -> impl Iterator<Item = (&[Token], TokenFreq)> {
        self.pretokens
            .iter()
            .map(Vec::as_slice)
            .zip(self.counts.iter().copied())
    }

    pub fn into_parts(self) -> (Vocabulary, Vec<MergeRule>) {
        (self.vocab, self.merges)
    }

    /// Removes and returns the most frequent valid heap entry.
    ///
    /// Entries whose frequency no longer matches `pair_freqs` are re-pushed
    /// with the current frequency, or dropped if the pair is gone.
    fn pop_best(&mut self) -> Option<HeapItem> {
        while let Some(mut entry) = self.heap.pop() {
            let current = self.pair_freqs.get(&entry.pair).copied().unwrap_or(0);
            if current == entry.freq {
                return Some(entry);
            }
            if current > 0 {
                entry.freq = current;
                self.heap.push(entry);
            }
        }

        None
    }
}

/// Replaces every non-overlapping occurrence of `pair` in `ids`, scanning
/// left to right, and returns the pair count changes it caused.
///
/// For `a a a a` merged on `(a, a)` this yields `A A`. Deltas are computed
/// against the already rewritten left neighbour, so back-to-back merge sites
/// cancel out correctly.
fn merge_pretoken(ids: &mut Vec<Token>, pair: TokenPair, merged: Token) -> Vec<(TokenPair, i64)> {
    let TokenPair(left, right) = pair;
    let mut deltas = Vec::new();
    if ids.len() < 2 {
        return deltas;
    }

    let mut out: Vec<Token> = Vec::with_capacity(ids.len());
    let mut i = 0;
    while i < ids.len() {
        if i + 1 < ids.len() && ids[i] == left && ids[i + 1] == right {
            if let Some(&prev) = out.last() {
                deltas.push((TokenPair(prev, left), -1));
                deltas.push((TokenPair(prev, merged), 1));
            }
            deltas.push((pair, -1));
            if let Some(&next) = ids.get(i + 2) {
                deltas.push((TokenPair(right, next), -1));
                deltas.push((TokenPair(merged, next), 1));
            }
            out.push(merged);
            i += 2;
        } else {
            out.push(ids[i]);
            i += 1;
        }
    }

    *ids = out;
    deltas
}

/// Counts every adjacent pair, one partial map per rayon task, summed by a
/// single reduction. Also records which pretokens hold each pair.
fn count_pairs_parallel(pretokens: &[Vec<Token>], counts: &[TokenFreq]) -> (PairCounts, PairPositions) {
    pretokens
        .par_iter()
        .zip(counts.par_iter())
        .enumerate()
        .map(|(idx, (ids, &count))| {
            let mut local_freqs = PairCounts::new();
            let mut local_positions = PairPositions::new();
            for w in ids.windows(2) {
                let pair = TokenPair(w[0], w[1]);
                *local_freqs.entry(pair).or_default() += count;
                local_positions.entry(pair).or_default().insert(idx);
            }
            (local_freqs, local_positions)
        })
        .reduce(
            || (PairCounts::new(), PairPositions::new()),
            |(mut acc_freqs, mut acc_positions), (freqs, positions)| {
                for (pair, freq) in freqs {
                    *acc_freqs.entry(pair).or_default() += freq;
                }
                for (pair, set) in positions {
                    acc_positions.entry(pair).or_default().extend(set);
                }
                (acc_freqs, acc_positions)
            },
        )
}

/// Full single-threaded rescan of pair frequencies.
///
/// Slow but obviously correct; the incremental counts must always equal it.
pub fn count_pairs_reference(pretokens: &[Vec<Token>], counts: &[TokenFreq]) -> PairCounts {
    let mut freqs = PairCounts::new();
    for (ids, &count) in pretokens.iter().zip(counts) {
        for w in ids.windows(2) {
            *freqs.entry(TokenPair(w[0], w[1])).or_default() += count;
        }
    }
    freqs
}

/// Result of [`train`]: everything needed to build a tokenizer.
#[derive(Debug, Clone)]
pub struct TrainOutput {
    pub vocabulary: Vocabulary,
    /// Merges in discovery order.
    pub merges: Vec<MergeRule>,
    pub special_tokens: SpecialTokenSet,
}

/// Trains a byte-level BPE vocabulary on an in-memory corpus.
///
/// The corpus is cut into `config.num_chunks` shards at special token
/// starts, pretokens are counted per shard in parallel, and merges are
/// learned until `config.vocab_size` is reached or no pair occurs at least
/// `config.min_frequency` times. Stopping early is not an error.
///
/// # Errors
///
/// Returns [`TrainError`] for an invalid config or pattern, or if
/// pretokenization fails.
pub fn train(corpus: &[u8], config: &TrainerConfig) -> Result<TrainOutput, TrainError> {
    let start = Instant::now();
    let specials = config.validate()?;
    let pretokenizer = Pretokenizer::new(&config.pattern)?;

    log::info!(
        "train: {} bytes, target vocab {}, {} special tokens, {} chunks",
        corpus.len(),
        config.vocab_size,
        specials.len(),
        config.num_chunks
    );

    let boundaries = find_chunk_boundaries_with_lookahead(
        corpus,
        config.num_chunks,
        &specials,
        config.lookahead(&specials),
    )?;
    let pretoken_counts = count_pretokens_parallel(corpus, &boundaries, &specials, &pretokenizer)?;

    let mut trainer = MergeTrainer::new(pretoken_counts, Vocabulary::with_specials(&specials))
        .with_min_frequency(config.min_frequency);
    log::info!(
        "train: {} distinct pretokens, {} distinct pairs",
        trainer.pretokens.len(),
        trainer.pair_freqs.len()
    );

    let wanted = config.vocab_size.saturating_sub(trainer.vocab.len());
    let pb = progress_bar(wanted as u64, "Learning merges", config.show_progress)
        .map_err(TrainError::ProgressBarSetup)?;
    let performed = trainer.train_with_progress(config.vocab_size, &pb);
    pb.finish_and_clear();

    if performed < wanted {
        log::warn!(
            "train: stopped at vocab size {} of {}, no pair occurs {} or more times",
            trainer.vocab.len(),
            config.vocab_size,
            trainer.min_frequency
        );
    }
    log::info!(
        "train: learned {} merges in {:.2?}",
        performed,
        start.elapsed()
    );

    let (vocabulary, merges) = trainer.into_parts();
    Ok(TrainOutput {
        vocabulary,
        merges,
        special_tokens: specials,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

    fn counts_of(text: &str) -> PretokenCounts {
        let pre = match Pretokenizer::gpt2() {
            Ok(p) => p,
            Err(e) => panic!("{e}"),
        };
        let mut counts = PretokenCounts::new();
        match pre.pretokenize(text.as_bytes()) {
            Ok(pieces) => {
                for p in pieces {
                    *counts.entry(p.to_vec()).or_default() += 1;
                }
            }
            Err(e) => panic!("{e}"),
        }
        counts
    }

    fn merged_bytes(vocab: &Vocabulary, rules: &[MergeRule]) -> Vec<(Vec<u8>, Vec<u8>)> {
        rules
            .iter()
            .map(|r| {
                (
                    vocab.get(r.pair.0).unwrap_or_default().to_vec(),
                    vocab.get(r.pair.1).unwrap_or_default().to_vec(),
                )
            })
            .collect()
    }

    fn config(vocab_size: usize, specials: &[&str]) -> TrainerConfig {
        TrainerConfig {
            vocab_size,
            special_tokens: specials.iter().map(|s| s.to_string()).collect(),
            num_chunks: 4,
            ..TrainerConfig::default()
        }
    }

    #[test]
    fn test_low_lower_lowest_first_merges() {
        let mut trainer = MergeTrainer::new(counts_of("low lower lowest"), Vocabulary::bytes_only());
        assert_eq!(trainer.pair_counts(), &trainer.recount());
        assert_eq!(trainer.train(256 + 3), 3);

        // (l, o) and (o, w) both occur 3 times; the greater pair "o","w" wins
        let (vocab, merges) = trainer.into_parts();
        assert_eq!(
            merged_bytes(&vocab, &merges),
            vec![
                (b"o".to_vec(), b"w".to_vec()),
                (b"l".to_vec(), b"ow".to_vec()),
                (b"low".to_vec(), b"e".to_vec()),
            ]
        );
        assert_eq!(vocab.get(258), Some(&b"lowe"[..]));
    }

    #[test]
    fn test_overlapping_run_merges_twice() {
        let mut counts = PretokenCounts::new();
        counts.insert(b"aaaa".to_vec(), 1);
        let mut trainer = MergeTrainer::new(counts, Vocabulary::bytes_only()).with_min_frequency(1);
        assert_eq!(trainer.pair_counts().get(&TokenPair(97, 97)), Some(&3));

        let rule = trainer.merge_step();
        assert_eq!(rule, Some(MergeRule::new(97, 97, 256)));
        let ids: Vec<Vec<Token>> = trainer.pretokens().map(|(ids, _)| ids.to_vec()).collect();
        assert_eq!(ids, vec![vec![256, 256]]);

        let mut expected = PairCounts::new();
        expected.insert(TokenPair(256, 256), 1);
        assert_eq!(trainer.pair_counts(), &expected);
        assert_eq!(trainer.recount(), expected);
    }

    #[test]
    fn test_odd_run_leaves_tail() {
        let mut ids = vec![97, 97, 97];
        let deltas = merge_pretoken(&mut ids, TokenPair(97, 97), 256);
        assert_eq!(ids, vec![256, 97]);
        let net: i64 = deltas
            .iter()
            .filter(|(p, _)| *p == TokenPair(97, 97))
            .map(|(_, d)| d)
            .sum();
        assert_eq!(net, -2);
    }

    #[test]
    fn test_min_frequency_stops_training() {
        let mut counts = PretokenCounts::new();
        counts.insert(b"abcd".to_vec(), 1);
        let mut trainer = MergeTrainer::new(counts, Vocabulary::bytes_only());
        assert_eq!(trainer.merge_step(), None);
        // refusal leaves state untouched
        assert_eq!(trainer.merge_step(), None);
        assert!(trainer.merges().is_empty());
        assert_eq!(trainer.pair_counts().len(), 3);
    }

    #[test]
    fn test_incremental_matches_reference_every_step() {
        let text = "aaaa abab banana bandana aaaaaaa abababab nanana ana an a \
                    the cat sat on the mat; the bat sat on the hat. \u{e9}\u{e9}\u{e9} \u{4e16}\u{754c}\u{4e16}";
        let mut counts = counts_of(text);
        counts.insert(b"\xff\xff\xff\xff\xff".to_vec(), 3);
        let mut trainer = MergeTrainer::new(counts, Vocabulary::bytes_only()).with_min_frequency(1);

        let mut steps = 0;
        while let Some(rule) = trainer.merge_step() {
            steps += 1;
            assert_eq!(trainer.pair_counts(), &trainer.recount(), "diverged after {rule:?}");
        }
        assert!(steps > 20);
        assert!(trainer.pair_counts().is_empty());
    }

    #[test]
    fn test_multiplicity_weights_counts() {
        let mut counts = PretokenCounts::new();
        counts.insert(b"ab".to_vec(), 5);
        counts.insert(b"ba".to_vec(), 4);
        let trainer = MergeTrainer::new(counts, Vocabulary::bytes_only());
        assert_eq!(trainer.pair_counts().get(&TokenPair(97, 98)), Some(&5));
        assert_eq!(trainer.pair_counts().get(&TokenPair(98, 97)), Some(&4));
    }

    #[test]
    fn test_vocabulary_grows_by_concatenation() {
        let mut trainer = MergeTrainer::new(
            counts_of("the theme of these themes is thematic"),
            Vocabulary::bytes_only(),
        );
        let mut last_len = trainer.vocabulary().len();
        while let Some(rule) = trainer.merge_step() {
            let vocab = trainer.vocabulary();
            assert_eq!(vocab.len(), last_len + 1);
            assert_eq!(rule.merged, last_len);
            let mut joined = vocab.get(rule.pair.0).unwrap_or_default().to_vec();
            joined.extend_from_slice(vocab.get(rule.pair.1).unwrap_or_default());
            assert_eq!(vocab.get(rule.merged), Some(joined.as_slice()));
            last_len = vocab.len();
        }
    }

    #[test]
    fn test_train_is_deterministic() {
        let corpus = "a rose is a rose is a rose<|endoftext|>roses are red".repeat(20);
        let cfg = config(300, &["<|endoftext|>"]);
        let first = match train(corpus.as_bytes(), &cfg) {
            Ok(out) => out,
            Err(e) => panic!("{e}"),
        };
        let second = match train(corpus.as_bytes(), &cfg) {
            Ok(out) => out,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(first.vocabulary, second.vocabulary);
        assert_eq!(first.merges, second.merges);
    }

    #[test]
    fn test_train_never_merges_special_bytes() {
        let corpus = "one<|endoftext|>two<|endoftext|>one two".repeat(50);
        let out = match train(corpus.as_bytes(), &config(400, &["<|endoftext|>"])) {
            Ok(out) => out,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(out.vocabulary.get(256), Some(&b"<|endoftext|>"[..]));
        assert_eq!(out.special_tokens.id_of(b"<|endoftext|>"), Some(256));
        for rule in &out.merges {
            let bytes = out.vocabulary.get(rule.merged).unwrap_or_default();
            assert!(!bytes.contains(&b'|'), "special bytes leaked into {bytes:?}");
            assert!(rule.merged > 256);
        }
    }

    #[test]
    fn test_train_stops_early_on_exhausted_corpus() {
        let out = match train(b"abc", &config(1000, &[])) {
            Ok(out) => out,
            Err(e) => panic!("{e}"),
        };
        assert!(out.merges.is_empty());
        assert_eq!(out.vocabulary.len(), 256);
    }

    #[test]
    fn test_train_same_result_for_any_chunk_count() {
        let corpus = "hello world, hello there<|endoftext|>world of words\n".repeat(40);
        let reference = match train(corpus.as_bytes(), &TrainerConfig { num_chunks: 1, ..config(320, &["<|endoftext|>"]) }) {
            Ok(out) => out,
            Err(e) => panic!("{e}"),
        };
        for chunks in [2, 3, 8] {
            let out = match train(corpus.as_bytes(), &TrainerConfig { num_chunks: chunks, ..config(320, &["<|endoftext|>"]) }) {
                Ok(out) => out,
                Err(e) => panic!("{e}"),
            };
            assert_eq!(out.merges, reference.merges, "{chunks} chunks");
        }
    }

    #[test]
    fn test_train_rejects_tiny_vocab() {
        let result = train(b"abc", &config(256, &["<|endoftext|>"]));
        assert!(matches!(
            result,
            Err(TrainError::Config(ConfigError::VocabTooSmall { minimum: 257, .. }))
        ));
    }

    #[test]
    fn test_train_rejects_bad_pattern() {
        let cfg = TrainerConfig {
            pattern: "(".to_string(),
            ..config(300, &[])
        };
        assert!(matches!(train(b"abc", &cfg), Err(TrainError::InvalidPattern(_))));
    }
}
