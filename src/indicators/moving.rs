//! Moving-average style smoothers: SMA, EMA, and the Ehlers ultimate
//! smoother. All kernels are pure functions over `&[f64]` using NaN as the
//! missing-value sentinel; a NaN anywhere in a window yields NaN output for
//! that index instead of poisoning later values.

use std::f64::consts::PI;

/// Fill a result buffer with NaN.
#[inline]
pub(crate) fn nan_vec(len: usize) -> Vec<f64> {
    vec![f64::NAN; len]
}

#[inline]
pub(crate) fn has_enough_data(len: usize, period: usize) -> bool {
    len >= period && period > 0
}

/// Simple moving average. `out[i]` is the mean of the last `period` values
/// when all of them are present; NaN otherwise. Indices below `period - 1`
/// are NaN.
///
/// Summation is a left-to-right rolling add/subtract, so outputs are
/// bit-stable across runs for identical inputs.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    if !has_enough_data(n, period) {
        return nan_vec(n);
    }

    let mut result = nan_vec(n);
    let mut sum = 0.0;
    let mut nan_in_window = 0usize;

    for i in 0..n {
        let v = values[i];
        if v.is_nan() {
            nan_in_window += 1;
        } else {
            sum += v;
        }
        if i >= period {
            let old = values[i - period];
            if old.is_nan() {
                nan_in_window -= 1;
            } else {
                sum -= old;
            }
        }
        if i >= period - 1 && nan_in_window == 0 {
            result[i] = sum / period as f64;
        }
    }

    result
}

/// Exponential moving average seeded with the SMA of the first `period`
/// defined values; thereafter `out[i] = α·x[i] + (1−α)·out[i−1]` with
/// `α = 2/(period+1)`. A NaN input leaves a NaN output at that index and
/// the recurrence re-seeds from the next defined value.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    if !has_enough_data(n, period) {
        return nan_vec(n);
    }

    let mut result = nan_vec(n);
    let alpha = 2.0 / (period as f64 + 1.0);

    let mut first_valid = 0;
    while first_valid < n && values[first_valid].is_nan() {
        first_valid += 1;
    }
    if first_valid + period > n {
        return result;
    }

    let seed_window = &values[first_valid..first_valid + period];
    if seed_window.iter().any(|v| v.is_nan()) {
        // Gap inside the seed window: give up on a clean seed and leave the
        // whole series undefined rather than smooth over a hole.
        return result;
    }
    let start = first_valid + period - 1;
    result[start] = seed_window.iter().sum::<f64>() / period as f64;

    for i in (start + 1)..n {
        if values[i].is_nan() {
            continue;
        }
        if result[i - 1].is_nan() {
            result[i] = values[i];
        } else {
            result[i] = alpha * values[i] + (1.0 - alpha) * result[i - 1];
        }
    }

    result
}

/// Ehlers ultimate smoother: a two-pole low-lag filter whose coefficients
/// derive from the window. The first `period - 1` samples pass through
/// unchanged, then
/// `out[i] = (1−c1)·x[i] + (2c1−c2)·x[i−1] − (c1+c3)·x[i−2] + c2·out[i−1] + c3·out[i−2]`.
pub fn ultimate_smoother(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    let period = period.max(1);

    let f = 1.414 * PI / period as f64;
    let a1 = (-f).exp();
    let c2 = 2.0 * a1 * f.cos();
    let c3 = -a1 * a1;
    let c1 = (1.0 + c2 - c3) / 4.0;

    let start = period.max(3) - 1;
    let mut result = nan_vec(n);
    for i in 0..n.min(start) {
        result[i] = values[i];
    }

    for i in start..n {
        if values[i].is_nan() || values[i - 1].is_nan() || values[i - 2].is_nan() {
            result[i] = values[i];
            continue;
        }
        let prev1 = if result[i - 1].is_nan() { values[i - 1] } else { result[i - 1] };
        let prev2 = if result[i - 2].is_nan() { values[i - 2] } else { result[i - 2] };
        result[i] = (1.0 - c1) * values[i] + (2.0 * c1 - c2) * values[i - 1]
            - (c1 + c3) * values[i - 2]
            + c2 * prev1
            + c3 * prev2;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sma_matches_hand_rolled_means() {
        let prices = [2.0, 4.0, 6.0, 8.0, 10.0];
        let out = sma(&prices, 3);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert_relative_eq!(out[2], 4.0);
        assert_relative_eq!(out[3], 6.0);
        assert_relative_eq!(out[4], 8.0);
    }

    #[test]
    fn sma_window_one_is_identity() {
        let prices = [3.0, 1.0, 4.0];
        assert_eq!(sma(&prices, 1), prices.to_vec());
    }

    #[test]
    fn sma_nan_gap_blanks_affected_windows_only() {
        let prices = [1.0, 2.0, f64::NAN, 4.0, 5.0, 6.0];
        let out = sma(&prices, 2);
        assert_relative_eq!(out[1], 1.5);
        assert!(out[2].is_nan());
        assert!(out[3].is_nan());
        assert_relative_eq!(out[4], 4.5);
        assert_relative_eq!(out[5], 5.5);
    }

    #[test]
    fn ema_seeds_with_sma_then_decays() {
        let prices = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = ema(&prices, 3);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert_relative_eq!(out[2], 2.0); // seed = mean(1,2,3)
        let alpha = 0.5;
        assert_relative_eq!(out[3], alpha * 4.0 + (1.0 - alpha) * 2.0);
        assert_relative_eq!(out[4], alpha * 5.0 + (1.0 - alpha) * out[3]);
    }

    #[test]
    fn ema_skips_nan_prefix() {
        let prices = [f64::NAN, f64::NAN, 1.0, 2.0, 3.0, 4.0];
        let out = ema(&prices, 3);
        assert!(out[3].is_nan());
        assert_relative_eq!(out[4], 2.0);
        assert!(out[5] > 2.0);
    }

    #[test]
    fn ultimate_smoother_passes_warmup_through() {
        let prices: Vec<f64> = (1..=10).map(f64::from).collect();
        let out = ultimate_smoother(&prices, 5);
        for i in 0..4 {
            assert_relative_eq!(out[i], prices[i]);
        }
        // A steady ramp should stay close to the ramp once the filter engages.
        for i in 4..10 {
            assert!((out[i] - prices[i]).abs() < 1.0, "index {i}: {}", out[i]);
        }
    }
}
