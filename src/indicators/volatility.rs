//! Dispersion and drawdown kernels.

use super::moving::{has_enough_data, nan_vec};

/// Rolling sample standard deviation (divisor `period − 1`). The window must
/// contain `period` defined samples; any NaN inside it yields NaN. Used on
/// the returns series, whose first element is always NaN, so output starts
/// one bar later there.
pub fn std_dev(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    if period < 2 || !has_enough_data(n, period) {
        return nan_vec(n);
    }

    let mut result = nan_vec(n);
    for i in (period - 1)..n {
        let window = &values[(i + 1 - period)..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance =
            window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (period as f64 - 1.0);
        result[i] = variance.sqrt();
    }
    result
}

/// Worst drawdown inside the trailing window: the minimum over the window of
/// `close[j] / max(close[k ≤ j in window]) − 1`. Always ≤ 0.
pub fn max_drawdown(closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    if !has_enough_data(n, period) {
        return nan_vec(n);
    }

    let mut result = nan_vec(n);
    for i in (period - 1)..n {
        let window = &closes[(i + 1 - period)..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        let mut peak = window[0];
        let mut worst = 0.0_f64;
        for &v in window {
            if v > peak {
                peak = v;
            }
            if peak > 0.0 {
                worst = worst.min(v / peak - 1.0);
            }
        }
        result[i] = worst;
    }
    result
}

/// Running drawdown from the all-time high so far:
/// `close[i] / max(close[0..=i]) − 1`. NaN closes stay NaN and do not move
/// the peak.
pub fn drawdown(closes: &[f64]) -> Vec<f64> {
    let n = closes.len();
    let mut result = nan_vec(n);
    let mut peak = f64::NAN;

    for i in 0..n {
        let v = closes[i];
        if v.is_nan() {
            continue;
        }
        if peak.is_nan() || v > peak {
            peak = v;
        }
        if peak > 0.0 {
            result[i] = v / peak - 1.0;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn std_dev_uses_sample_divisor() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let out = std_dev(&values, 8);
        // Known sample stdev of this set is sqrt(32/7).
        assert_relative_eq!(out[7], (32.0_f64 / 7.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn std_dev_skips_windows_with_gaps() {
        let values = [f64::NAN, 0.01, -0.01, 0.02];
        let out = std_dev(&values, 3);
        assert!(out[2].is_nan()); // window includes the NaN head
        assert!(!out[3].is_nan());
    }

    #[test]
    fn max_drawdown_is_nonpositive_and_windowed() {
        let closes = [10.0, 12.0, 9.0, 11.0, 13.0, 13.0];
        let out = max_drawdown(&closes, 3);
        // Window [12, 9, 11]: worst is 9/12 - 1 = -0.25
        assert_relative_eq!(out[3], 9.0 / 12.0 - 1.0, epsilon = 1e-12);
        // Window [11, 13, 13]: monotone rise, no drawdown
        assert_relative_eq!(out[5], 0.0);
        for v in out.iter().filter(|v| !v.is_nan()) {
            assert!(*v <= 0.0);
        }
    }

    #[test]
    fn drawdown_tracks_all_time_high() {
        let closes = [10.0, 12.0, 9.0, 12.0, 15.0];
        let out = drawdown(&closes);
        assert_relative_eq!(out[0], 0.0);
        assert_relative_eq!(out[1], 0.0);
        assert_relative_eq!(out[2], 9.0 / 12.0 - 1.0, epsilon = 1e-12);
        assert_relative_eq!(out[3], 0.0);
        assert_relative_eq!(out[4], 0.0);
    }
}
