pub mod parquet;

use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Reserved ticker meaning "hold cash": it never prices, never costs.
pub const CASH_TICKER: &str = "Empty";

#[derive(Debug, Error)]
pub enum DataError {
    #[error("no price data found under {0}")]
    Empty(String),
    #[error("series for {ticker} has length {got}, date axis has {expected}")]
    Misaligned {
        ticker: String,
        got: usize,
        expected: usize,
    },
    #[error("date axis is not strictly increasing at index {0}")]
    UnsortedDates(usize),
    #[error(transparent)]
    Polars(#[from] polars::error::PolarsError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One ticker's bars, aligned to the owning [`PriceDb`]'s date axis.
/// Missing bars are `f64::NAN`.
#[derive(Debug, Clone, Default)]
pub struct TickerSeries {
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub adj_close: Vec<f64>,
    pub volume: Vec<f64>,
}

/// Immutable price database: every ticker's arrays share one strictly
/// increasing, day-granular date axis. Built once per batch of backtests
/// and handed out by shared reference; never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct PriceDb {
    dates: Vec<NaiveDate>,
    series: FxHashMap<String, TickerSeries>,
}

impl PriceDb {
    /// Assemble a database from per-ticker series already aligned to `dates`.
    /// Validates axis ordering and per-ticker lengths.
    pub fn new(
        dates: Vec<NaiveDate>,
        series: FxHashMap<String, TickerSeries>,
    ) -> Result<Self, DataError> {
        for i in 1..dates.len() {
            if dates[i] <= dates[i - 1] {
                return Err(DataError::UnsortedDates(i));
            }
        }
        let n = dates.len();
        for (ticker, s) in &series {
            for len in [
                s.open.len(),
                s.high.len(),
                s.low.len(),
                s.close.len(),
                s.adj_close.len(),
                s.volume.len(),
            ] {
                if len != n {
                    return Err(DataError::Misaligned {
                        ticker: ticker.clone(),
                        got: len,
                        expected: n,
                    });
                }
            }
        }
        Ok(Self { dates, series })
    }

    /// Convenience constructor for tests and synthetic runs: a single
    /// adj-close series per ticker, with open/high/low/close mirroring it.
    pub fn from_closes(
        dates: Vec<NaiveDate>,
        closes: impl IntoIterator<Item = (String, Vec<f64>)>,
    ) -> Result<Self, DataError> {
        let mut series = FxHashMap::default();
        for (ticker, values) in closes {
            let s = TickerSeries {
                open: values.clone(),
                high: values.clone(),
                low: values.clone(),
                close: values.clone(),
                adj_close: values.clone(),
                volume: vec![0.0; values.len()],
            };
            series.insert(ticker, s);
        }
        Self::new(dates, series)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn date(&self, index: usize) -> Option<NaiveDate> {
        self.dates.get(index).copied()
    }

    pub fn has_ticker(&self, ticker: &str) -> bool {
        self.series.contains_key(ticker)
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    fn value(
        &self,
        ticker: &str,
        index: usize,
        pick: fn(&TickerSeries) -> &Vec<f64>,
    ) -> Option<f64> {
        self.series
            .get(ticker)
            .and_then(|s| pick(s).get(index).copied())
            .filter(|v| !v.is_nan())
    }

    pub fn open(&self, ticker: &str, index: usize) -> Option<f64> {
        self.value(ticker, index, |s| &s.open)
    }

    pub fn high(&self, ticker: &str, index: usize) -> Option<f64> {
        self.value(ticker, index, |s| &s.high)
    }

    pub fn low(&self, ticker: &str, index: usize) -> Option<f64> {
        self.value(ticker, index, |s| &s.low)
    }

    pub fn close(&self, ticker: &str, index: usize) -> Option<f64> {
        self.value(ticker, index, |s| &s.close)
    }

    /// Adjusted close, falling back to raw close when no adjustment exists.
    pub fn adj_close(&self, ticker: &str, index: usize) -> Option<f64> {
        self.value(ticker, index, |s| &s.adj_close)
            .or_else(|| self.close(ticker, index))
    }

    pub fn adj_close_series(&self, ticker: &str) -> Option<&[f64]> {
        self.series.get(ticker).map(|s| s.adj_close.as_slice())
    }

    pub fn high_series(&self, ticker: &str) -> Option<&[f64]> {
        self.series.get(ticker).map(|s| s.high.as_slice())
    }

    pub fn low_series(&self, ticker: &str) -> Option<&[f64]> {
        self.series.get(ticker).map(|s| s.low.as_slice())
    }

    pub fn open_series(&self, ticker: &str) -> Option<&[f64]> {
        self.series.get(ticker).map(|s| s.open.as_slice())
    }

    /// Resolve inclusive date bounds to an index window `[start, end)`.
    /// `None` bounds fall to the ends of the axis.
    pub fn index_range(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> (usize, usize) {
        let lo = match start {
            Some(d) => self.dates.partition_point(|x| *x < d),
            None => 0,
        };
        let hi = match end {
            Some(d) => self.dates.partition_point(|x| *x <= d),
            None => self.dates.len(),
        };
        (lo, hi.max(lo))
    }
}
