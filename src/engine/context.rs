//! Per-day evaluation context: index mapping for the decision-price mode,
//! the series cache, the call registry, and the warning/trace sinks.

use chrono::NaiveDate;
use rustc_hash::FxHashMap;

use super::trace::TraceCollector;
use super::types::{DecisionPrice, FlowNode, Warning, WarningKind};
use crate::data::PriceDb;
use crate::indicators::{self, Metric, SeriesCache};

pub struct EvalContext<'a> {
    pub db: &'a PriceDb,
    pub cache: &'a mut SeriesCache,
    pub registry: &'a FxHashMap<String, FlowNode>,
    pub trace: &'a mut TraceCollector,
    pub warnings: &'a mut Vec<Warning>,
    /// Index of the day whose allocation is being decided.
    pub decision_index: usize,
    /// Index indicator reads come from: `decision_index` for close-decided
    /// modes, `decision_index − 1` for open-decided ones.
    pub indicator_index: usize,
    pub decision_price: DecisionPrice,
}

impl<'a> EvalContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: &'a PriceDb,
        cache: &'a mut SeriesCache,
        registry: &'a FxHashMap<String, FlowNode>,
        trace: &'a mut TraceCollector,
        warnings: &'a mut Vec<Warning>,
        decision_price: DecisionPrice,
        decision_index: usize,
    ) -> Self {
        let indicator_index = match decision_price {
            DecisionPrice::Open => decision_index.saturating_sub(1),
            DecisionPrice::Close => decision_index,
        };
        Self {
            db,
            cache,
            registry,
            trace,
            warnings,
            decision_index,
            indicator_index,
            decision_price,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.db.date(self.decision_index).unwrap_or_default()
    }

    pub fn warn(&mut self, kind: WarningKind, node_id: Option<&str>, message: impl Into<String>) {
        self.warnings.push(Warning {
            date: self.date(),
            kind,
            node_id: node_id.map(str::to_string),
            message: message.into(),
        });
    }

    pub fn resolve_call(&self, call_ref_id: &str) -> Option<&'a FlowNode> {
        self.registry.get(call_ref_id)
    }

    /// Read a metric `steps_back` indicator days before the current one.
    ///
    /// `Current Price` is the one meta metric: it reads the decision-price
    /// series at the *decision* index (the open is known at an open-decided
    /// decision, so this is not look-ahead) and is never cached.
    pub fn metric_value(
        &mut self,
        metric: Metric,
        ticker: &str,
        window: u32,
        steps_back: usize,
    ) -> Option<f64> {
        match metric {
            Metric::Date => None,
            Metric::CurrentPrice => {
                let index = self.decision_index.checked_sub(steps_back)?;
                match self.decision_price {
                    DecisionPrice::Close => self.db.adj_close(ticker, index),
                    DecisionPrice::Open => self.db.open(ticker, index),
                }
            }
            _ => {
                let index = self.indicator_index.checked_sub(steps_back)?;
                indicators::value_at(self.cache, self.db, metric, ticker, window, index)
            }
        }
    }
}
