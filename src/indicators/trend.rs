//! Trend kernels: Aroon family and trend clarity (regression R²).

use super::moving::{has_enough_data, nan_vec};

/// Aroon Up: `100 · (period − bars_since_high) / period`, where the high is
/// searched over the trailing `period + 1` bars. Ties resolve to the most
/// recent bar.
pub fn aroon_up(highs: &[f64], period: usize) -> Vec<f64> {
    aroon_line(highs, period, |window| {
        let mut best = 0usize;
        for (j, &v) in window.iter().enumerate() {
            if v >= window[best] {
                best = j;
            }
        }
        best
    })
}

/// Aroon Down: same shape over the lows.
pub fn aroon_down(lows: &[f64], period: usize) -> Vec<f64> {
    aroon_line(lows, period, |window| {
        let mut best = 0usize;
        for (j, &v) in window.iter().enumerate() {
            if v <= window[best] {
                best = j;
            }
        }
        best
    })
}

fn aroon_line(values: &[f64], period: usize, pick: impl Fn(&[f64]) -> usize) -> Vec<f64> {
    let n = values.len();
    if !has_enough_data(n, period + 1) {
        return nan_vec(n);
    }

    let mut result = nan_vec(n);
    for i in period..n {
        let window = &values[(i - period)..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        let extreme_idx = pick(window);
        let bars_since = period - extreme_idx;
        result[i] = 100.0 * (period - bars_since) as f64 / period as f64;
    }
    result
}

/// Aroon oscillator: Up − Down.
pub fn aroon_oscillator(highs: &[f64], lows: &[f64], period: usize) -> Vec<f64> {
    let up = aroon_up(highs, period);
    let down = aroon_down(lows, period);
    up.iter()
        .zip(&down)
        .map(|(&u, &d)| if u.is_nan() || d.is_nan() { f64::NAN } else { u - d })
        .collect()
}

/// Trend clarity: the coefficient of determination R² of a linear
/// regression of the window's values on time, in `[0, 1]`. A flat or
/// degenerate window reports 0.
pub fn trend_clarity(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    if period < 2 || !has_enough_data(n, period) {
        return nan_vec(n);
    }

    let mut result = nan_vec(n);
    let len = period as f64;
    // x = 0..period is fixed, so its sums are constants per window.
    let sum_x: f64 = (0..period).map(|x| x as f64).sum();
    let sum_x2: f64 = (0..period).map(|x| (x * x) as f64).sum();

    for i in (period - 1)..n {
        let window = &values[(i + 1 - period)..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        let mut sum_y = 0.0;
        let mut sum_xy = 0.0;
        let mut sum_y2 = 0.0;
        for (j, &y) in window.iter().enumerate() {
            let x = j as f64;
            sum_y += y;
            sum_xy += x * y;
            sum_y2 += y * y;
        }
        let num = len * sum_xy - sum_x * sum_y;
        let den = (len * sum_x2 - sum_x * sum_x) * (len * sum_y2 - sum_y * sum_y);
        if den <= 0.0 {
            result[i] = 0.0;
        } else {
            let r = num / den.sqrt();
            result[i] = r * r;
        }
    }
    result
}
