//! Kendall's rank correlation with tie correction.
//!
//! Uses Knight's O(n log n) algorithm: sort jointly by `(x, y)` to count ties, then count
//! the exchanges a merge sort by `y` performs to count discordant pairs.
use std::cmp::Ordering;

use statrs::distribution::{ContinuousCDF, Normal};

#[inline]
fn tied_pairs(run_length: u64) -> u64 {
    run_length * run_length.saturating_sub(1) / 2
}

/// Compute Kendall's tau-b between two equally sized samples.
///
/// Returns `NaN` when fewer than two observations are given, when the lengths differ, or
/// when either sample is constant.
pub fn kendall_tau(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len();
    if n != y.len() || n < 2 {
        return f64::NAN;
    }

    let mut pairs: Vec<(f64, f64)> = x.iter().copied().zip(y.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.total_cmp(&b.1)));

    let n_pairs = tied_pairs(n as u64);

    let mut tied_x: u64 = 0;
    let mut tied_xy: u64 = 0;
    let mut x_run: u64 = 1;
    let mut xy_run: u64 = 1;
    for w in pairs.windows(2) {
        let (prev, cur) = (w[0], w[1]);
        if cur.0 == prev.0 {
            x_run += 1;
            if cur.1 == prev.1 {
                xy_run += 1;
            } else {
                tied_xy += tied_pairs(xy_run);
                xy_run = 1;
            }
        } else {
            tied_x += tied_pairs(x_run);
            x_run = 1;
            tied_xy += tied_pairs(xy_run);
            xy_run = 1;
        }
    }
    tied_x += tied_pairs(x_run);
    tied_xy += tied_pairs(xy_run);

    let swaps = merge_sort_count_swaps(&mut pairs);

    let mut tied_y: u64 = 0;
    let mut y_run: u64 = 1;
    for w in pairs.windows(2) {
        if w[1].1 == w[0].1 {
            y_run += 1;
        } else {
            tied_y += tied_pairs(y_run);
            y_run = 1;
        }
    }
    tied_y += tied_pairs(y_run);

    let non_tied_x = n_pairs - tied_x;
    let non_tied_y = n_pairs - tied_y;
    if non_tied_x == 0 || non_tied_y == 0 {
        return f64::NAN;
    }
    let concordant_minus_discordant =
        n_pairs as f64 - tied_x as f64 - tied_y as f64 + tied_xy as f64 - 2.0 * swaps as f64;
    concordant_minus_discordant / ((non_tied_x as f64) * (non_tied_y as f64)).sqrt()
}

/// Bottom-up merge sort of `pairs` by their second element, counting how many positions
/// elements from the right half jump over.
fn merge_sort_count_swaps(pairs: &mut Vec<(f64, f64)>) -> u64 {
    let n = pairs.len();
    let mut swaps: u64 = 0;
    let mut buffer = pairs.clone();
    let mut segment = 1;
    while segment < n {
        let mut offset = 0;
        while offset < n {
            let mut i = offset;
            let i_end = (i + segment).min(n);
            let mut j = i_end;
            let j_end = (j + segment).min(n);
            let mut k = offset;
            while i < i_end || j < j_end {
                let take_left = if i < i_end && j < j_end {
                    pairs[i].1.total_cmp(&pairs[j].1) != Ordering::Greater
                } else {
                    i < i_end
                };
                if take_left {
                    buffer[k] = pairs[i];
                    i += 1;
                } else {
                    buffer[k] = pairs[j];
                    j += 1;
                    if i < i_end {
                        swaps += (i_end - i) as u64;
                    }
                }
                k += 1;
            }
            offset += 2 * segment;
        }
        std::mem::swap(pairs, &mut buffer);
        segment <<= 1;
    }
    swaps
}

/// The one-sided probability of observing a correlation of at least `tau` over `k`
/// observations under the null hypothesis of independence, using the normal
/// approximation of the tau statistic.
///
/// Degenerate inputs (`k <= 1`, `tau` of zero or `NaN`) are treated as carrying no evidence
/// and map to 1.
pub fn kendall_tau_p_value(tau: f64, k: usize) -> f64 {
    if k <= 1 || tau.is_nan() || tau == 0.0 {
        return 1.0;
    }
    let k = k as f64;
    let variance = 2.0 * (2.0 * k + 5.0) / (9.0 * k * (k - 1.0));
    match Normal::new(0.0, variance.sqrt()) {
        Ok(dist) => dist.sf(tau),
        Err(_) => 1.0,
    }
}
