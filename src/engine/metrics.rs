//! Performance metrics over a produced equity series.
//!
//! Annualization assumes 252 trading days. All reductions run left to
//! right in index order so repeated runs are bit-identical.

use chrono::NaiveDate;
use statrs::statistics::Statistics;

use super::types::{Allocation, Metrics};
use crate::data::CASH_TICKER;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Compute the full metrics block. `equity`, `daily_returns`, `turnovers`
/// and `allocations` are aligned to `dates`; `benchmark_returns`, when
/// present, is aligned the same way.
pub fn compute_metrics(
    dates: &[NaiveDate],
    equity: &[f64],
    daily_returns: &[f64],
    benchmark_returns: Option<&[f64]>,
    turnovers: &[f64],
    allocations: &[Allocation],
) -> Metrics {
    if equity.is_empty() || daily_returns.is_empty() {
        return Metrics::default();
    }

    let days = daily_returns.len() as u32;
    let years = f64::from(days) / TRADING_DAYS_PER_YEAR;

    let final_equity = *equity.last().unwrap();
    let total_return = final_equity - 1.0;
    let cagr = if years > 0.0 && final_equity > 0.0 {
        final_equity.powf(1.0 / years) - 1.0
    } else {
        0.0
    };

    let volatility = if daily_returns.len() > 1 {
        daily_returns.iter().copied().std_dev() * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    let max_drawdown = max_drawdown(equity);
    let calmar = if max_drawdown != 0.0 {
        cagr / max_drawdown.abs()
    } else {
        0.0
    };
    let sharpe = if volatility > 0.0 { cagr / volatility } else { 0.0 };

    let downside = downside_deviation(daily_returns);
    let sortino = if downside > 0.0 { cagr / downside } else { 0.0 };

    let beta = benchmark_returns.and_then(|bench| beta(daily_returns, bench));
    let treynor = beta.and_then(|b| if b != 0.0 { Some(cagr / b) } else { None });

    let win_days = daily_returns.iter().filter(|&&r| r > 0.0).count();
    let win_rate = win_days as f64 / daily_returns.len() as f64;

    let best_day = daily_returns.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let worst_day = daily_returns.iter().copied().fold(f64::INFINITY, f64::min);

    // The first turnover is the initial entry; averaging starts after it.
    let avg_turnover = if turnovers.len() > 1 {
        turnovers[1..].iter().sum::<f64>() / (turnovers.len() - 1) as f64
    } else {
        0.0
    };

    let avg_holdings = if allocations.is_empty() {
        0.0
    } else {
        allocations
            .iter()
            .map(|a| invested_count(a) as f64)
            .sum::<f64>()
            / allocations.len() as f64
    };

    let invested_days = allocations.iter().filter(|a| invested_count(a) > 0).count();
    let time_in_market = if allocations.is_empty() {
        0.0
    } else {
        invested_days as f64 / allocations.len() as f64
    };
    let timar = if time_in_market > 0.0 {
        Some(total_return / time_in_market)
    } else {
        None
    };

    Metrics {
        start_date: dates.first().copied(),
        end_date: dates.last().copied(),
        days,
        years,
        total_return,
        cagr,
        volatility,
        max_drawdown,
        calmar,
        sharpe,
        sortino,
        beta,
        treynor,
        win_rate,
        best_day: if best_day.is_finite() { best_day } else { 0.0 },
        worst_day: if worst_day.is_finite() { worst_day } else { 0.0 },
        avg_turnover,
        avg_holdings,
        time_in_market,
        timar,
    }
}

fn invested_count(allocation: &Allocation) -> usize {
    allocation
        .iter()
        .filter(|(ticker, weight)| ticker.as_str() != CASH_TICKER && **weight > 0.0)
        .count()
}

/// Worst peak-to-trough loss, reported nonpositive.
fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = equity[0];
    let mut worst = 0.0_f64;
    for &value in equity {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            worst = worst.min(value / peak - 1.0);
        }
    }
    worst
}

fn downside_deviation(returns: &[f64]) -> f64 {
    let sum_sq: f64 = returns
        .iter()
        .filter(|&&r| r < 0.0)
        .map(|r| r * r)
        .sum();
    if sum_sq == 0.0 {
        return 0.0;
    }
    (sum_sq / returns.len() as f64).sqrt() * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Regression slope of strategy returns on benchmark returns. `None` when
/// the benchmark is degenerate or lengths mismatch.
fn beta(returns: &[f64], benchmark: &[f64]) -> Option<f64> {
    if returns.len() != benchmark.len() || returns.len() < 2 {
        return None;
    }
    let n = returns.len() as f64;
    let mean_r = returns.iter().sum::<f64>() / n;
    let mean_b = benchmark.iter().sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut variance_b = 0.0;
    for (r, b) in returns.iter().zip(benchmark) {
        covariance += (r - mean_r) * (b - mean_b);
        variance_b += (b - mean_b) * (b - mean_b);
    }
    if variance_b > 0.0 {
        Some(covariance / variance_b)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dates(n: usize) -> Vec<NaiveDate> {
        (0..n)
            .map(|i| {
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64)
            })
            .collect()
    }

    fn full_spy(n: usize) -> Vec<Allocation> {
        (0..n)
            .map(|_| [("SPY".to_string(), 1.0)].into_iter().collect())
            .collect()
    }

    #[test]
    fn max_drawdown_from_known_curve() {
        let equity = [1.0, 1.1, 1.2, 1.0, 0.8, 1.0, 1.1];
        let m = max_drawdown(&equity);
        assert_relative_eq!(m, 0.8 / 1.2 - 1.0, epsilon = 1e-12);
    }

    #[test]
    fn beta_of_identical_series_is_one() {
        let r = [0.01, -0.01, 0.02, -0.02, 0.01];
        assert_relative_eq!(beta(&r, &r).unwrap(), 1.0, epsilon = 1e-12);
        let flat = [0.0; 5];
        assert!(beta(&r, &flat).is_none());
    }

    #[test]
    fn tim_counts_invested_days_only() {
        let n = 4;
        let mut allocations = full_spy(n);
        allocations[1] = Allocation::default();
        allocations[2] = [(CASH_TICKER.to_string(), 1.0)].into_iter().collect();

        let equity = [1.0, 1.1, 1.1, 1.1];
        let returns = [0.0, 0.1, 0.0, 0.0];
        let turnovers = [0.5, 0.0, 0.0, 0.0];
        let m = compute_metrics(&dates(n), &equity, &returns, None, &turnovers, &allocations);
        assert_relative_eq!(m.time_in_market, 0.5);
        // TIMAR = total return / TIM
        assert_relative_eq!(m.timar.unwrap(), (1.1 - 1.0) / 0.5, epsilon = 1e-9);
    }

    #[test]
    fn always_cash_has_no_timar() {
        let n = 3;
        let allocations = vec![Allocation::default(); n];
        let equity = [1.0, 1.0, 1.0];
        let returns = [0.0, 0.0, 0.0];
        let turnovers = [0.0, 0.0, 0.0];
        let m = compute_metrics(&dates(n), &equity, &returns, None, &turnovers, &allocations);
        assert_eq!(m.time_in_market, 0.0);
        assert!(m.timar.is_none());
        assert_eq!(m.win_rate, 0.0);
    }

    #[test]
    fn one_year_cagr_equals_total_return() {
        let n = 252;
        let mut equity = Vec::with_capacity(n);
        let mut returns = Vec::with_capacity(n);
        let mut e = 1.0;
        for i in 0..n {
            let r = if i == 0 { 0.0 } else { 0.0005 };
            e *= 1.0 + r;
            equity.push(e);
            returns.push(r);
        }
        let turnovers = vec![0.0; n];
        let m = compute_metrics(
            &dates(n),
            &equity,
            &returns,
            None,
            &turnovers,
            &full_spy(n),
        );
        assert_relative_eq!(m.cagr, m.total_return, epsilon = 1e-9);
        assert_relative_eq!(m.years, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn avg_turnover_skips_the_entry_day() {
        let n = 3;
        let equity = [1.0, 1.01, 1.02];
        let returns = [0.0, 0.01, 0.0099];
        let turnovers = [0.5, 0.1, 0.3];
        let m = compute_metrics(
            &dates(n),
            &equity,
            &returns,
            None,
            &turnovers,
            &full_spy(n),
        );
        assert_relative_eq!(m.avg_turnover, 0.2, epsilon = 1e-12);
    }
}
