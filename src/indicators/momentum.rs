//! Momentum kernels: Wilder RSI, rolling returns, the 13612 momentum
//! composites, and the MACD/PPO histogram pair.

use super::moving::{ema, has_enough_data, nan_vec};

/// Wilder RSI. Per-bar gains/losses come from consecutive closes; the first
/// average is the arithmetic mean of the first `period` changes, after which
/// Wilder smoothing applies: `new = (old·(period−1) + current) / period`.
/// When the average loss is zero RSI is 100. Indices up to `period` (the
/// seed) are NaN.
pub fn wilder_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    if !has_enough_data(n, period + 1) {
        return nan_vec(n);
    }

    let mut result = nan_vec(n);

    let mut first_valid = 0;
    while first_valid < n && closes[first_valid].is_nan() {
        first_valid += 1;
    }
    if first_valid + period >= n {
        return result;
    }

    let seed_end = first_valid + period;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in (first_valid + 1)..=seed_end {
        let change = closes[i] - closes[i - 1];
        if change.is_nan() {
            return result;
        }
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    result[seed_end] = rsi_from_averages(avg_gain, avg_loss);

    for i in (seed_end + 1)..n {
        let change = closes[i] - closes[i - 1];
        if change.is_nan() {
            continue;
        }
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        result[i] = rsi_from_averages(avg_gain, avg_loss);
    }

    result
}

#[inline]
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Rolling cumulative return: `out[i] = closes[i] / closes[i−period+1] − 1`.
pub fn rolling_return(closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    if !has_enough_data(n, period) {
        return nan_vec(n);
    }

    let mut result = nan_vec(n);
    for i in (period - 1)..n {
        let base = closes[i + 1 - period];
        if base.is_nan() || closes[i].is_nan() || base == 0.0 {
            continue;
        }
        result[i] = closes[i] / base - 1.0;
    }
    result
}

/// Daily returns series: `returns[i] = closes[i]/closes[i−1] − 1`, NaN at 0.
pub fn returns(closes: &[f64]) -> Vec<f64> {
    let n = closes.len();
    let mut out = nan_vec(n);
    for i in 1..n {
        let prev = closes[i - 1];
        if prev.is_nan() || closes[i].is_nan() || prev == 0.0 {
            continue;
        }
        out[i] = closes[i] / prev - 1.0;
    }
    out
}

const MONTH_BARS: [usize; 4] = [21, 63, 126, 252];

/// 13612W momentum: `(12·r1 + 4·r3 + 2·r6 + r12) / 19` where `rk` is the
/// return over 1/3/6/12 months of trading days. Needs a full year of bars.
pub fn momentum_weighted(closes: &[f64]) -> Vec<f64> {
    momentum_composite(closes, &[12.0, 4.0, 2.0, 1.0])
}

/// 13612U momentum: the unweighted mean of the same four returns.
pub fn momentum_unweighted(closes: &[f64]) -> Vec<f64> {
    momentum_composite(closes, &[1.0, 1.0, 1.0, 1.0])
}

fn momentum_composite(closes: &[f64], weights: &[f64; 4]) -> Vec<f64> {
    let n = closes.len();
    if n <= MONTH_BARS[3] {
        return nan_vec(n);
    }
    let weight_sum: f64 = weights.iter().sum();

    let mut result = nan_vec(n);
    'day: for i in MONTH_BARS[3]..n {
        if closes[i].is_nan() {
            continue;
        }
        let mut acc = 0.0;
        for (bars, weight) in MONTH_BARS.iter().zip(weights) {
            let base = closes[i - bars];
            if base.is_nan() || base == 0.0 {
                continue 'day;
            }
            acc += weight * (closes[i] / base - 1.0);
        }
        result[i] = acc / weight_sum;
    }
    result
}

/// 12-month SMA momentum: the ratio of close to its 252-bar SMA, minus 1.
pub fn momentum_sma12(closes: &[f64]) -> Vec<f64> {
    let base = super::moving::sma(closes, MONTH_BARS[3]);
    closes
        .iter()
        .zip(&base)
        .map(|(&c, &s)| {
            if c.is_nan() || s.is_nan() || s == 0.0 {
                f64::NAN
            } else {
                c / s - 1.0
            }
        })
        .collect()
}

/// MACD histogram with the standard 12/26/9 parameters:
/// `line = EMA12 − EMA26`, `hist = line − EMA9(line)`.
pub fn macd_histogram(closes: &[f64]) -> Vec<f64> {
    let fast = ema(closes, 12);
    let slow = ema(closes, 26);
    let line: Vec<f64> = fast
        .iter()
        .zip(&slow)
        .map(|(&f, &s)| if f.is_nan() || s.is_nan() { f64::NAN } else { f - s })
        .collect();
    subtract_signal(&line)
}

/// PPO histogram: the MACD expressed as a fraction of the slow EMA,
/// `line = (EMA12 − EMA26) / EMA26`, minus its own EMA9.
pub fn ppo_histogram(closes: &[f64]) -> Vec<f64> {
    let fast = ema(closes, 12);
    let slow = ema(closes, 26);
    let line: Vec<f64> = fast
        .iter()
        .zip(&slow)
        .map(|(&f, &s)| {
            if f.is_nan() || s.is_nan() || s == 0.0 {
                f64::NAN
            } else {
                (f - s) / s
            }
        })
        .collect();
    subtract_signal(&line)
}

fn subtract_signal(line: &[f64]) -> Vec<f64> {
    let signal = ema(line, 9);
    line.iter()
        .zip(&signal)
        .map(|(&l, &s)| if l.is_nan() || s.is_nan() { f64::NAN } else { l - s })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rsi_warmup_is_nan_then_bounded() {
        let closes = [10.0, 9.0, 8.0, 9.0, 10.0, 11.0, 10.0, 9.0];
        let out = wilder_rsi(&closes, 2);
        for v in &out[..2] {
            assert!(v.is_nan());
        }
        for v in &out[2..] {
            assert!((0.0..=100.0).contains(v), "rsi out of range: {v}");
        }
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let closes = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = wilder_rsi(&closes, 3);
        assert_relative_eq!(out[3], 100.0);
        assert_relative_eq!(out[4], 100.0);
    }

    #[test]
    fn rsi_seed_matches_wilder_formula() {
        // changes: -1, -1, +1, +1, +1 with period 2
        let closes = [10.0, 9.0, 8.0, 9.0, 10.0, 11.0];
        let out = wilder_rsi(&closes, 2);
        // seed: avg_gain = 0, avg_loss = 1 → RSI 0
        assert_relative_eq!(out[2], 0.0);
        // next: gain 1 → avg_gain (0*1+1)/2 = 0.5, avg_loss (1*1+0)/2 = 0.5 → RSI 50
        assert_relative_eq!(out[3], 50.0);
    }

    #[test]
    fn rolling_return_window() {
        let closes = [100.0, 110.0, 121.0];
        let out = rolling_return(&closes, 2);
        assert!(out[0].is_nan());
        assert_relative_eq!(out[1], 0.1, epsilon = 1e-12);
        assert_relative_eq!(out[2], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn weighted_momentum_on_linear_ramp() {
        let closes: Vec<f64> = (1..=300).map(f64::from).collect();
        let out = momentum_weighted(&closes);
        assert!(out[251].is_nan());
        let i = 252;
        let c = closes[i];
        let r = |bars: usize| c / closes[i - bars] - 1.0;
        let expected = (12.0 * r(21) + 4.0 * r(63) + 2.0 * r(126) + r(252)) / 19.0;
        assert_relative_eq!(out[i], expected, epsilon = 1e-12);
    }

    #[test]
    fn unweighted_momentum_is_plain_mean() {
        let closes: Vec<f64> = (1..=300).map(f64::from).collect();
        let out = momentum_unweighted(&closes);
        let i = 260;
        let c = closes[i];
        let r = |bars: usize| c / closes[i - bars] - 1.0;
        let expected = (r(21) + r(63) + r(126) + r(252)) / 4.0;
        assert_relative_eq!(out[i], expected, epsilon = 1e-12);
    }

    #[test]
    fn macd_histogram_defined_after_warmup() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let out = macd_histogram(&closes);
        assert!(out[10].is_nan());
        assert!(!out[40].is_nan());
    }
}
