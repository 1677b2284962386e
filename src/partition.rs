//! Chunk partitioning
//!
//! Splits a chunk of `len` rows into at most `parts` contiguous, near-equal
//! ranges. The first `len % parts` ranges carry one extra row. Empty ranges
//! are never produced, so a short chunk dispatches fewer sub-chunks than there
//! are workers.

use std::ops::Range;

/// Split `0..len` into at most `parts` contiguous near-equal ranges
pub fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1).min(len);
    if parts == 0 {
        return Vec::new();
    }

    let base = len / parts;
    let extra = len % parts;

    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let size = base + usize::from(i < extra);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}
