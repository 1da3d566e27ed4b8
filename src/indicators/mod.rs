//! Rolling-window indicator engine: pure kernels, a typed metric catalog,
//! and the per-backtest series cache that memoizes every computed series.

pub mod cache;
pub mod momentum;
pub mod moving;
pub mod trend;
pub mod volatility;

use std::rc::Rc;

use serde::{Deserialize, Serialize};

pub use cache::SeriesCache;

use crate::data::{PriceDb, CASH_TICKER};

/// Every metric a condition, function node or scaling node can reference.
/// Serde names match the external encoding; short aliases are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "Date")]
    Date,
    #[serde(rename = "Current Price", alias = "Price")]
    CurrentPrice,
    #[serde(rename = "Simple Moving Average", alias = "SMA")]
    Sma,
    #[serde(rename = "Exponential Moving Average", alias = "EMA")]
    Ema,
    #[serde(rename = "Relative Strength Index", alias = "RSI")]
    Rsi,
    #[serde(rename = "Standard Deviation", alias = "Standard Deviation of Returns")]
    StdDevReturns,
    #[serde(rename = "Max Drawdown")]
    MaxDrawdown,
    #[serde(rename = "Drawdown")]
    Drawdown,
    #[serde(rename = "Cumulative Return")]
    CumulativeReturn,
    #[serde(rename = "SMA of Returns")]
    SmaOfReturns,
    #[serde(rename = "Momentum (Weighted)", alias = "13612W")]
    MomentumWeighted,
    #[serde(rename = "Momentum (Unweighted)", alias = "13612U")]
    MomentumUnweighted,
    #[serde(rename = "Momentum (12-Month SMA)", alias = "SMA12")]
    MomentumSma12,
    #[serde(rename = "Aroon Up")]
    AroonUp,
    #[serde(rename = "Aroon Down")]
    AroonDown,
    #[serde(rename = "Aroon Oscillator")]
    AroonOscillator,
    #[serde(rename = "MACD Histogram")]
    MacdHistogram,
    #[serde(rename = "PPO Histogram")]
    PpoHistogram,
    #[serde(rename = "Trend Clarity")]
    TrendClarity,
    #[serde(rename = "Ultimate Smoother")]
    UltimateSmoother,
}

impl Metric {
    /// Whether the user-supplied window participates in the computation.
    /// Windowless metrics are cached under window 0.
    pub fn windowed(self) -> bool {
        !matches!(
            self,
            Metric::Date
                | Metric::CurrentPrice
                | Metric::Drawdown
                | Metric::MomentumWeighted
                | Metric::MomentumUnweighted
                | Metric::MomentumSma12
                | Metric::MacdHistogram
                | Metric::PpoHistogram
        )
    }

    /// Bars of history needed before this metric can produce a value.
    /// Drives the driver's warmup cutoff.
    pub fn lookback(self, window: u32) -> usize {
        let w = window.max(1) as usize;
        match self {
            Metric::Date | Metric::CurrentPrice | Metric::Drawdown => 0,
            Metric::MomentumWeighted | Metric::MomentumUnweighted | Metric::MomentumSma12 => 252,
            Metric::MacdHistogram | Metric::PpoHistogram => 35,
            // Returns-based and since-extreme metrics consume one extra bar.
            Metric::Rsi
            | Metric::StdDevReturns
            | Metric::SmaOfReturns
            | Metric::AroonUp
            | Metric::AroonDown
            | Metric::AroonOscillator => w + 1,
            Metric::Sma
            | Metric::Ema
            | Metric::MaxDrawdown
            | Metric::CumulativeReturn
            | Metric::TrendClarity
            | Metric::UltimateSmoother => w,
        }
    }
}

/// Cache key window for a metric: user window for windowed kernels
/// (coerced to at least 1), 0 for windowless ones.
fn cache_window(metric: Metric, window: u32) -> u32 {
    if metric.windowed() {
        window.max(1)
    } else {
        0
    }
}

/// Resolve the full series for `(metric, ticker, window)`, computing and
/// caching it on first use. Returns `None` for unknown tickers, the cash
/// ticker, and the meta metrics (`Date`, `Current Price`) that have no
/// cacheable series.
pub fn series(
    cache: &mut SeriesCache,
    db: &PriceDb,
    metric: Metric,
    ticker: &str,
    window: u32,
) -> Option<Rc<[f64]>> {
    if ticker.is_empty() || ticker == CASH_TICKER {
        return None;
    }
    let key_window = cache_window(metric, window);
    if let Some(cached) = cache.lookup(metric, ticker, key_window) {
        return cached;
    }

    let w = key_window.max(1) as usize;
    let produced: Option<Vec<f64>> = match metric {
        Metric::Date | Metric::CurrentPrice => None,
        Metric::Sma => cache.closes(db, ticker).map(|c| moving::sma(&c, w)),
        Metric::Ema => cache.closes(db, ticker).map(|c| moving::ema(&c, w)),
        Metric::UltimateSmoother => cache
            .closes(db, ticker)
            .map(|c| moving::ultimate_smoother(&c, w)),
        Metric::Rsi => cache
            .closes(db, ticker)
            .map(|c| momentum::wilder_rsi(&c, w)),
        Metric::CumulativeReturn => cache
            .closes(db, ticker)
            .map(|c| momentum::rolling_return(&c, w)),
        Metric::SmaOfReturns => cache.returns(db, ticker).map(|r| moving::sma(&r, w)),
        Metric::StdDevReturns => cache.returns(db, ticker).map(|r| volatility::std_dev(&r, w)),
        Metric::MaxDrawdown => cache
            .closes(db, ticker)
            .map(|c| volatility::max_drawdown(&c, w)),
        Metric::Drawdown => cache.closes(db, ticker).map(|c| volatility::drawdown(&c)),
        Metric::MomentumWeighted => cache
            .closes(db, ticker)
            .map(|c| momentum::momentum_weighted(&c)),
        Metric::MomentumUnweighted => cache
            .closes(db, ticker)
            .map(|c| momentum::momentum_unweighted(&c)),
        Metric::MomentumSma12 => cache
            .closes(db, ticker)
            .map(|c| momentum::momentum_sma12(&c)),
        Metric::MacdHistogram => cache
            .closes(db, ticker)
            .map(|c| momentum::macd_histogram(&c)),
        Metric::PpoHistogram => cache
            .closes(db, ticker)
            .map(|c| momentum::ppo_histogram(&c)),
        Metric::AroonUp => db.high_series(ticker).map(|h| trend::aroon_up(h, w)),
        Metric::AroonDown => db.low_series(ticker).map(|l| trend::aroon_down(l, w)),
        Metric::AroonOscillator => match (db.high_series(ticker), db.low_series(ticker)) {
            (Some(h), Some(l)) => Some(trend::aroon_oscillator(h, l, w)),
            _ => None,
        },
        Metric::TrendClarity => cache
            .closes(db, ticker)
            .map(|c| trend::trend_clarity(&c, w)),
    };

    cache.store(metric, ticker, key_window, produced)
}

/// The metric's value at one index, `None` when missing or NaN.
pub fn value_at(
    cache: &mut SeriesCache,
    db: &PriceDb,
    metric: Metric,
    ticker: &str,
    window: u32,
    index: usize,
) -> Option<f64> {
    let values = series(cache, db, metric, ticker, window)?;
    values.get(index).copied().filter(|v| !v.is_nan())
}
