//! Per-backtest memoization of indicator series.
//!
//! The cache is task-local: each backtest owns one, so no synchronization is
//! needed and different parameter combinations can never observe each
//! other's windows. Series are stored as `Rc<[f64]>` so repeated reads are
//! pointer clones, and a producer runs exactly once per key — including
//! producers that fail, which are cached as absent.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::{momentum, Metric};
use crate::data::PriceDb;

#[derive(Default)]
pub struct SeriesCache {
    series: FxHashMap<(Metric, String, u32), Option<Rc<[f64]>>>,
    closes: FxHashMap<String, Option<Rc<[f64]>>>,
    returns: FxHashMap<String, Option<Rc<[f64]>>>,
    producer_runs: usize,
}

impl SeriesCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times a kernel producer has actually run. Cache hits do not
    /// move this counter.
    pub fn producer_runs(&self) -> usize {
        self.producer_runs
    }

    pub fn lookup(&self, metric: Metric, ticker: &str, window: u32) -> Option<Option<Rc<[f64]>>> {
        self.series
            .get(&(metric, ticker.to_string(), window))
            .cloned()
    }

    pub fn store(
        &mut self,
        metric: Metric,
        ticker: &str,
        window: u32,
        produced: Option<Vec<f64>>,
    ) -> Option<Rc<[f64]>> {
        self.producer_runs += 1;
        let shared: Option<Rc<[f64]>> = produced.map(Rc::from);
        self.series
            .insert((metric, ticker.to_string(), window), shared.clone());
        shared
    }

    /// Memoized adjusted-close array for a ticker.
    pub fn closes(&mut self, db: &PriceDb, ticker: &str) -> Option<Rc<[f64]>> {
        if let Some(cached) = self.closes.get(ticker) {
            return cached.clone();
        }
        let built: Option<Rc<[f64]>> = db.adj_close_series(ticker).map(Rc::from);
        self.closes.insert(ticker.to_string(), built.clone());
        built
    }

    /// Memoized daily-returns array for a ticker (`returns[0]` is NaN).
    pub fn returns(&mut self, db: &PriceDb, ticker: &str) -> Option<Rc<[f64]>> {
        if let Some(cached) = self.returns.get(ticker) {
            return cached.clone();
        }
        let built: Option<Rc<[f64]>> = self
            .closes(db, ticker)
            .map(|closes| Rc::from(momentum::returns(&closes)));
        self.returns.insert(ticker.to_string(), built.clone());
        built
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn db() -> PriceDb {
        let dates: Vec<NaiveDate> = (0..4)
            .map(|i| {
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i)
            })
            .collect();
        PriceDb::from_closes(dates, [("SPY".to_string(), vec![100.0, 110.0, 99.0, 108.9])])
            .unwrap()
    }

    #[test]
    fn second_fetch_is_the_same_allocation() {
        let db = db();
        let mut cache = SeriesCache::new();
        let a = crate::indicators::series(&mut cache, &db, Metric::Sma, "SPY", 2).unwrap();
        let runs = cache.producer_runs();
        let b = crate::indicators::series(&mut cache, &db, Metric::Sma, "SPY", 2).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(cache.producer_runs(), runs);
    }

    #[test]
    fn failed_producers_are_cached_too() {
        let db = db();
        let mut cache = SeriesCache::new();
        assert!(crate::indicators::series(&mut cache, &db, Metric::Sma, "MISSING", 2).is_none());
        let runs = cache.producer_runs();
        assert!(crate::indicators::series(&mut cache, &db, Metric::Sma, "MISSING", 2).is_none());
        assert_eq!(cache.producer_runs(), runs);
    }

    #[test]
    fn returns_series_starts_null() {
        let db = db();
        let mut cache = SeriesCache::new();
        let r = cache.returns(&db, "SPY").unwrap();
        assert!(r[0].is_nan());
        assert!((r[1] - 0.1).abs() < 1e-12);
    }
}
