//! Shared builders for the integration suites: synthetic price databases
//! and hand-assembled strategy trees.

use chrono::NaiveDate;
use quantflow::data::PriceDb;
use quantflow::engine::types::{
    ConditionLine, ConditionType, Comparator, FlowNode, NodeKind, StrategySpec,
};
use quantflow::indicators::Metric;

pub fn trading_dates(n: usize) -> Vec<NaiveDate> {
    (0..n)
        .map(|i| NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64))
        .collect()
}

pub fn db_from_closes(series: &[(&str, Vec<f64>)]) -> PriceDb {
    let n = series.first().map_or(0, |(_, v)| v.len());
    PriceDb::from_closes(
        trading_dates(n),
        series
            .iter()
            .map(|(ticker, values)| ((*ticker).to_string(), values.clone())),
    )
    .unwrap()
}

pub fn position(id: &str, tickers: &[&str]) -> FlowNode {
    let mut node = FlowNode::new(id, NodeKind::Position);
    node.positions = Some(tickers.iter().map(|t| (*t).to_string()).collect());
    node
}

pub fn condition(id: &str, metric: Metric, ticker: &str, window: u32) -> ConditionLine {
    ConditionLine {
        id: id.into(),
        cond_type: ConditionType::If,
        metric,
        ticker: ticker.into(),
        window,
        comparator: Comparator::Gt,
        threshold: 0.0,
        expanded: false,
        right_metric: None,
        right_ticker: None,
        right_window: None,
        for_days: 1,
        date_month: None,
        date_day: None,
        date_to: None,
    }
}

pub fn strategy(root: FlowNode) -> StrategySpec {
    StrategySpec::from(root)
}
