//! # Downsampler
//!
//! Reduces a two dimensional index space to an element budget while keeping
//! its aspect ratio, then picks evenly spaced indices on each axis. The same
//! two functions cap the number of (time, depth) tiles per request and the
//! number of (longitude, latitude) pixels per tile.

/// Aspect-preserving reduction of `total1 x total2` to at most `limit` cells.
///
/// Returns the totals unchanged when they already fit. Otherwise
/// `ratio = sqrt(total1 * total2 / limit)`, `n1 = trunc(total1 / ratio)` and
/// `n2 = limit / n1`, each clamped to `[1, total]`. The result does not depend
/// on anything but the three inputs.
///
/// `n1` truncates rather than rounds. Rounding turns `(5, 3, 4)` into
/// `(3, 1)`; truncation gives `(2, 2)`, the reduction existing tile sets
/// were generated with.
///
/// # Examples
///
/// ```rust
/// use nctiles::downsample::compute_grid;
///
/// assert_eq!(compute_grid(5, 3, 100), (5, 3));
/// assert_eq!(compute_grid(5, 3, 4), (2, 2));
/// ```
pub fn compute_grid(total1: usize, total2: usize, limit: usize) -> (usize, usize) {
    let limit = limit.max(1);
    let cells = total1 as u128 * total2 as u128;
    if cells <= limit as u128 {
        return (total1, total2);
    }

    let ratio = (cells as f64 / limit as f64).sqrt();
    let n1 = ((total1 as f64 / ratio) as usize).max(1).min(limit).min(total1);
    let n2 = (limit / n1).max(1).min(total2);
    (n1, n2)
}

/// Evenly spaced, centred indices into `0..total`.
///
/// A single sample is the middle index. Otherwise the step is
/// `total / (count - 1)` with the remainder split on both ends; if that would
/// run past the last index the step shrinks to fit `0..=total - 1`. Requests
/// for more samples than indices return every index.
///
/// ```rust
/// use nctiles::downsample::compute_indices;
///
/// assert_eq!(compute_indices(9, 1), vec![4]);
/// assert_eq!(compute_indices(10, 2), vec![0, 9]);
/// assert_eq!(compute_indices(60, 4), vec![1, 20, 39, 58]);
/// ```
pub fn compute_indices(total: usize, count: usize) -> Vec<usize> {
    if total == 0 || count == 0 {
        return Vec::new();
    }
    if count == 1 {
        return vec![total / 2];
    }
    let count = count.min(total);
    if count == 1 {
        return vec![0];
    }

    let gaps = count - 1;
    let mut step = total / gaps;
    let mut offset = (total % step) / 2;
    if offset + gaps * step >= total {
        step = ((total - 1) / gaps).max(1);
        offset = ((total - 1) - gaps * step) / 2;
    }
    (0..count).map(|i| offset + i * step).collect()
}
