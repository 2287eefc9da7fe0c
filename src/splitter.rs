//! Special-token aware splitting of raw bytes.
//!
//! Splitting happens in two places:
//! 1. [`split`] cuts a byte buffer (or a byte range of it) into alternating
//!    plain and special segments. Only plain segments are pretokenized.
//! 2. [`find_chunk_boundaries`] picks shard boundaries for parallel corpus
//!    scanning. Boundaries are moved onto special token starts so that no
//!    special token is ever cut in two by a shard edge.

use std::ops::Range;

use crate::{error::SplitError, special::SpecialTokenSet, types::Token};

/// Size of each forward scan window when searching for a shard boundary.
pub const MINI_CHUNK_SIZE: usize = 4096;

/// A contiguous piece of input, tagged by how it must be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// A reserved special token, emitted verbatim as `id`.
    Special { id: Token, bytes: &'a [u8] },
    /// Ordinary text that goes through pretokenization and merging.
    Plain(&'a [u8]),
}

impl<'a> Segment<'a> {
    /// Raw bytes covered by this segment.
    pub fn bytes(&self) -> &'a [u8] {
        match *self {
            Self::Special { bytes, .. } => bytes,
            Self::Plain(bytes) => bytes,
        }
    }

    pub fn is_special(&self) -> bool {
        matches!(self, Self::Special { .. })
    }
}

/// Splits `bytes` into plain and special segments.
///
/// Special tokens are located on the raw bytes before any pattern matching:
/// leftmost occurrence first, longest special token first at a given
/// position. Whitespace in front of a special token stays in the preceding
/// plain segment. Empty plain segments are never emitted.
///
/// When `range` is given only `bytes[range]` is split; the returned slices
/// still borrow from `bytes`.
///
/// # Errors
///
/// Returns [`SplitError::InvalidRange`] if `range` is not inside `bytes`.
pub fn split<'a>(
    bytes: &'a [u8],
    specials: &SpecialTokenSet,
    range: Option<Range<usize>>,
) -> Result<Vec<Segment<'a>>, SplitError> {
    let range = range.unwrap_or(0..bytes.len());
    if range.start > range.end || range.end > bytes.len() {
        return Err(SplitError::InvalidRange {
            start: range.start,
            end: range.end,
            len: bytes.len(),
        });
    }

    Ok(segments(&bytes[range], specials))
}

/// Splits all of `bytes` into plain and special segments.
///
/// Same rules as [`split`] without a range.
pub fn segments<'a>(window: &'a [u8], specials: &SpecialTokenSet) -> Vec<Segment<'a>> {
    let mut segments = Vec::new();
    let mut segment_start = 0;

    for (hit, id) in specials.find_iter(window) {
        // guard against empty plain segments when the window starts with a
        // special token or contains two consecutive special tokens.
        if hit.start > segment_start {
            segments.push(Segment::Plain(&window[segment_start..hit.start]));
        }
        segments.push(Segment::Special {
            id,
            bytes: &window[hit.clone()],
        });
        segment_start = hit.end;
    }
    // plain tail after the last special token
    if segment_start < window.len() {
        segments.push(Segment::Plain(&window[segment_start..]));
    }

    segments
}

/// Chooses up to `desired_chunks` shard boundaries over `bytes`.
///
/// Shorthand for [`find_chunk_boundaries_with_lookahead`] using the longest
/// registered special token as the lookahead length.
///
/// # Errors
///
/// Returns [`SplitError::ZeroChunks`] if `desired_chunks` is 0.
pub fn find_chunk_boundaries(
    bytes: &[u8],
    desired_chunks: usize,
    specials: &SpecialTokenSet,
) -> Result<Vec<usize>, SplitError> {
    find_chunk_boundaries_with_lookahead(bytes, desired_chunks, specials, specials.max_len())
}

/// Chooses up to `desired_chunks` shard boundaries over `bytes`.
///
/// Initial guesses are spaced uniformly. Each interior guess is then moved
/// to the start of the first special token that ends after it, scanning
/// forward in windows of [`MINI_CHUNK_SIZE`] bytes. Every window is extended
/// by `max_special_len - 1` bytes of lookahead and only matches that start
/// inside the window proper are accepted, so a token cut by the window edge
/// is seen whole by the next window. If no special token follows a guess
/// its boundary becomes `bytes.len()`.
///
/// The result always starts with 0, ends with `bytes.len()`, is sorted and
/// contains no duplicates; it may describe fewer chunks than requested.
///
/// With no special tokens the uniform guesses are returned unchanged.
///
/// # Errors
///
/// Returns [`SplitError::ZeroChunks`] if `desired_chunks` is 0.
pub fn find_chunk_boundaries_with_lookahead(
    bytes: &[u8],
    desired_chunks: usize,
    specials: &SpecialTokenSet,
    max_special_len: usize,
) -> Result<Vec<usize>, SplitError> {
    if desired_chunks == 0 {
        return Err(SplitError::ZeroChunks);
    }

    let len = bytes.len();
    let chunk_size = len / desired_chunks;

    // initial guesses for chunk boundary locations, uniformly spaced
    let mut boundaries: Vec<usize> = (0..=desired_chunks).map(|i| i * chunk_size).collect();
    if let Some(last) = boundaries.last_mut() {
        *last = len;
    }

    if !specials.is_empty() {
        let overlap = max_special_len.max(specials.max_len()).saturating_sub(1);
        let mut floor = 0;
        for bi in 1..boundaries.len() - 1 {
            let guess = boundaries[bi].max(floor);
            let boundary = next_special_start(bytes, guess, floor, specials, overlap);
            boundaries[bi] = boundary;
            floor = boundary;
        }
    }

    // make sure all boundaries are unique, but might be fewer than desired
    boundaries.sort_unstable();
    boundaries.dedup();
    Ok(boundaries)
}

/// Finds the start of the first special token that ends after `guess`.
///
/// The scan starts `overlap` bytes before `guess` (never before `floor`) so
/// a token straddling the guess is itself chosen rather than a later one.
fn next_special_start(
    bytes: &[u8],
    guess: usize,
    floor: usize,
    specials: &SpecialTokenSet,
    overlap: usize,
) -> usize {
    let len = bytes.len();
    let step = MINI_CHUNK_SIZE.max(overlap + 1);
    let mut scan_from = guess.saturating_sub(overlap).max(floor);

    while scan_from < len {
        // matches must start before `commit_end`; the extra `overlap` bytes
        // only exist so those matches are seen whole.
        let commit_end = (scan_from + step).min(len);
        let window_end = (commit_end + overlap).min(len);
        let window = &bytes[scan_from..window_end];

        for (hit, _) in specials.find_iter(window) {
            let start = scan_from + hit.start;
            if start >= commit_end {
                break;
            }
            if scan_from + hit.end > guess {
                return start;
            }
        }

        scan_from = commit_end;
    }

    len
}

/// Turns a sorted boundary list into consecutive shard ranges.
pub fn boundary_ranges(boundaries: &[usize]) -> Vec<Range<usize>> {
    boundaries.windows(2).map(|w| w[0]..w[1]).collect()
}
