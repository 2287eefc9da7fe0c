//! Pretoken counting over a corpus held in memory.
//!
//! The corpus is cut into shards at special token starts (see
//! [`crate::splitter::find_chunk_boundaries`]). Every shard is split and
//! pretokenized on its own; the per-shard tallies are summed by a single
//! reduction.

use std::{collections::HashMap, ops::Range, time::Instant};

use rayon::prelude::*;

use crate::{
    error::TrainError,
    pretokenizer::Pretokenizer,
    special::SpecialTokenSet,
    splitter::{Segment, boundary_ranges, split},
    types::{ByteSeq, TokenFreq},
};

/// Distinct pretoken bytes and how often each occurs.
pub type PretokenCounts = HashMap<ByteSeq, TokenFreq>;

/// Counts the pretokens of `bytes[range]`. Special tokens are dropped.
///
/// # Errors
///
/// Fails on an invalid range or a regex engine error.
pub fn count_pretokens(
    bytes: &[u8],
    range: Range<usize>,
    specials: &SpecialTokenSet,
    pretokenizer: &Pretokenizer,
) -> Result<PretokenCounts, TrainError> {
    let mut counts = PretokenCounts::new();
    for segment in split(bytes, specials, Some(range))? {
        let Segment::Plain(plain) = segment else {
            continue;
        };
        for pretoken in pretokenizer.pretokenize(plain)? {
            if let Some(count) = counts.get_mut(pretoken) {
                *count += 1;
            } else {
                counts.insert(pretoken.to_vec(), 1);
            }
        }
    }
    Ok(counts)
}

/// Counts pretokens of every shard described by `boundaries` in parallel.
///
/// `boundaries` must be sorted and start at 0, as returned by
/// [`crate::splitter::find_chunk_boundaries`].
///
/// # Errors
///
/// Returns the first shard error encountered.
pub fn count_pretokens_parallel(
    bytes: &[u8],
    boundaries: &[usize],
    specials: &SpecialTokenSet,
    pretokenizer: &Pretokenizer,
) -> Result<PretokenCounts, TrainError> {
    let start = Instant::now();
    let ranges = boundary_ranges(boundaries);

    let counts = ranges
        .into_par_iter()
        .map(|range| count_pretokens(bytes, range, specials, pretokenizer))
        .try_reduce(PretokenCounts::new, |mut acc, shard| {
            for (pretoken, count) in shard {
                *acc.entry(pretoken).or_default() += count;
            }
            Ok(acc)
        })?;

    log::info!(
        "count_pretokens_parallel: {} distinct pretokens ({} total) from {} bytes in {} shards, {:.2?}",
        counts.len(),
        counts.values().sum::<TokenFreq>(),
        bytes.len(),
        boundaries.len().saturating_sub(1),
        start.elapsed()
    );

    Ok(counts)
}
