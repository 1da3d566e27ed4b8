//! Core engine types: the strategy tree, its external JSON encoding, run
//! options and the backtest result surface.

use chrono::NaiveDate;
use garde::Validate;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::indicators::Metric;

/// Allocation: ticker → nonnegative weight. Weights sum to at most 1; the
/// missing mass is cash. An empty map is "all cash".
pub type Allocation = FxHashMap<String, f64>;

pub fn empty_allocation() -> Allocation {
    Allocation::default()
}

/// Node dialects of the strategy tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Basic,
    Function,
    Indicator,
    Numbered,
    Position,
    Call,
    AltExit,
    Scaling,
}

/// How a node distributes weight across its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum WeightMode {
    #[default]
    Equal,
    Defined,
    Inverse,
    Pro,
    Capped,
}

/// Quantifier for numbered nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Quantifier {
    Any,
    All,
    None,
    Exactly,
    AtLeast,
    AtMost,
    Ladder,
}

/// Logical role of a condition line inside a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionType {
    If,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Comparator {
    Lt,
    #[default]
    Gt,
    CrossAbove,
    CrossBelow,
}

/// Rank direction for function nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RankChoice {
    #[default]
    Bottom,
    Top,
}

/// Month/day endpoint for date-range conditions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateStop {
    pub month: u32,
    pub day: u32,
}

/// One condition line. `expanded` switches the right-hand side from the
/// scalar `threshold` to a second indicator reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionLine {
    pub id: String,
    #[serde(rename = "type")]
    pub cond_type: ConditionType,
    pub metric: Metric,
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub window: u32,
    #[serde(default)]
    pub comparator: Comparator,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub expanded: bool,
    #[serde(default)]
    pub right_metric: Option<Metric>,
    #[serde(default)]
    pub right_ticker: Option<String>,
    #[serde(default)]
    pub right_window: Option<u32>,
    /// Condition must hold on each of the last N indicator days.
    #[serde(default = "default_one")]
    pub for_days: u32,
    #[serde(default)]
    pub date_month: Option<u32>,
    #[serde(default)]
    pub date_day: Option<u32>,
    #[serde(default)]
    pub date_to: Option<DateStop>,
}

fn default_one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberedItem {
    pub id: String,
    #[serde(default)]
    pub conditions: Vec<ConditionLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberedConfig {
    pub quantifier: Quantifier,
    #[serde(default)]
    pub n: u32,
    #[serde(default)]
    pub items: Vec<NumberedItem>,
}

/// A node of the strategy tree: one envelope shared by all dialects plus
/// kind-specific payload fields. Child slots hold `null` placeholders from
/// the external encoding, which evaluation skips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub children: FxHashMap<String, Vec<Option<Box<FlowNode>>>>,

    // Weighting envelope (with per-branch overrides).
    #[serde(default)]
    pub weighting: WeightMode,
    #[serde(default)]
    pub weighting_then: Option<WeightMode>,
    #[serde(default)]
    pub weighting_else: Option<WeightMode>,
    #[serde(default)]
    pub vol_window: Option<u32>,
    #[serde(default)]
    pub vol_window_then: Option<u32>,
    #[serde(default)]
    pub vol_window_else: Option<u32>,
    #[serde(default)]
    pub capped_fallback: Option<String>,
    #[serde(default)]
    pub capped_fallback_then: Option<String>,
    #[serde(default)]
    pub capped_fallback_else: Option<String>,

    // position
    #[serde(default)]
    pub positions: Option<Vec<String>>,

    // indicator
    #[serde(default)]
    pub conditions: Option<Vec<ConditionLine>>,

    // numbered
    #[serde(default)]
    pub numbered: Option<NumberedConfig>,

    // function
    #[serde(default)]
    pub metric: Option<Metric>,
    #[serde(default)]
    pub window: Option<u32>,
    #[serde(default)]
    pub bottom: Option<u32>,
    #[serde(default)]
    pub rank: Option<RankChoice>,

    // call
    #[serde(default)]
    pub call_ref_id: Option<String>,

    // altExit
    #[serde(default)]
    pub entry_conditions: Option<Vec<ConditionLine>>,
    #[serde(default)]
    pub exit_conditions: Option<Vec<ConditionLine>>,

    // scaling
    #[serde(default)]
    pub scale_metric: Option<Metric>,
    #[serde(default)]
    pub scale_window: Option<u32>,
    #[serde(default)]
    pub scale_ticker: Option<String>,
    #[serde(default)]
    pub scale_from: Option<f64>,
    #[serde(default)]
    pub scale_to: Option<f64>,
}

impl FlowNode {
    /// A bare node of the given kind, for tests and programmatic assembly.
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            title: String::new(),
            children: FxHashMap::default(),
            weighting: WeightMode::default(),
            weighting_then: None,
            weighting_else: None,
            vol_window: None,
            vol_window_then: None,
            vol_window_else: None,
            capped_fallback: None,
            capped_fallback_then: None,
            capped_fallback_else: None,
            positions: None,
            conditions: None,
            numbered: None,
            metric: None,
            window: None,
            bottom: None,
            rank: None,
            call_ref_id: None,
            entry_conditions: None,
            exit_conditions: None,
            scale_metric: None,
            scale_window: None,
            scale_ticker: None,
            scale_from: None,
            scale_to: None,
        }
    }

    /// Children in a slot, with null placeholders dropped.
    pub fn slot(&self, slot: &str) -> Vec<&FlowNode> {
        self.children
            .get(slot)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|c| c.as_ref().map(Box::as_ref))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn push_child(&mut self, slot: &str, child: FlowNode) {
        self.children
            .entry(slot.to_string())
            .or_default()
            .push(Some(Box::new(child)));
    }
}

/// A strategy: the root tree plus the registry of callable nodes that
/// `call` nodes resolve against by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySpec {
    pub root: FlowNode,
    #[serde(default)]
    pub callables: FxHashMap<String, FlowNode>,
}

impl From<FlowNode> for StrategySpec {
    fn from(root: FlowNode) -> Self {
        Self {
            root,
            callables: FxHashMap::default(),
        }
    }
}

/// Entry/exit bar timing. The decision price also fixes the indicator
/// index: open-decided modes read indicators from the previous day so no
/// same-day close information leaks into the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Mode {
    /// Close to close: decide at the close of day i with day-i indicators;
    /// the day marks adjClose\[i−1\] → adjClose\[i\].
    #[default]
    CC,
    /// Open to close, same bar: decide at the open of day i with day-(i−1)
    /// indicators; the day marks open\[i\] → adjClose\[i\].
    OC,
    /// Open to open: decide at the open with day-(i−1) indicators; the day
    /// marks open\[i−1\] → open\[i\].
    OO,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionPrice {
    Open,
    Close,
}

impl Mode {
    pub fn decision_price(self) -> DecisionPrice {
        match self {
            Mode::CC => DecisionPrice::Close,
            Mode::OC | Mode::OO => DecisionPrice::Open,
        }
    }
}

/// Inclusive date window restricting the evaluated days.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct BacktestOptions {
    #[garde(skip)]
    #[serde(default)]
    pub mode: Mode,
    /// Flat transaction cost per unit turnover, in basis points.
    #[garde(range(min = 0.0))]
    #[serde(default)]
    pub cost_bps: f64,
    #[garde(skip)]
    #[serde(default)]
    pub period: Period,
    #[garde(skip)]
    #[serde(default)]
    pub collect_trace: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WarningKind {
    MissingData,
    UnresolvedCall,
    CyclicCall,
    InvalidParameter,
}

/// A per-day quality issue. Warnings never abort a backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub date: NaiveDate,
    pub kind: WarningKind,
    #[serde(default)]
    pub node_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationEntry {
    pub ticker: String,
    pub weight: f64,
}

/// Per-day detail row for charting and inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRow {
    pub date: NaiveDate,
    pub equity: f64,
    pub drawdown: f64,
    pub gross_return: f64,
    pub net_return: f64,
    pub turnover: f64,
    pub cost: f64,
    pub holdings: Vec<AllocationEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyReturn {
    pub year: i32,
    pub month: u32,
    pub value: f64,
}

/// Performance metrics over the produced equity series. Ratios that need a
/// benchmark or a defined denominator are `None` when unreportable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub days: u32,
    pub years: f64,
    pub total_return: f64,
    pub cagr: f64,
    pub volatility: f64,
    /// Reported nonpositive: −0.25 is a 25% peak-to-trough loss.
    pub max_drawdown: f64,
    pub calmar: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub beta: Option<f64>,
    pub treynor: Option<f64>,
    pub win_rate: f64,
    pub best_day: f64,
    pub worst_day: f64,
    pub avg_turnover: f64,
    pub avg_holdings: f64,
    /// Fraction of evaluated days holding anything besides cash.
    pub time_in_market: f64,
    /// Total return divided by time in market; `None` for always-cash runs.
    pub timar: Option<f64>,
}

/// Full result of one backtest. Arrays are aligned to `dates`, the slice of
/// the price axis that was actually evaluated; equity starts at 1.0.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    pub dates: Vec<NaiveDate>,
    pub equity: Vec<f64>,
    pub daily_returns: Vec<f64>,
    pub target_allocations: Vec<Allocation>,
    pub actual_allocations: Vec<Allocation>,
    pub days: Vec<DayRow>,
    pub monthly: Vec<MonthlyReturn>,
    pub benchmark: Option<Vec<f64>>,
    pub warnings: Vec<Warning>,
    pub trace: Option<crate::engine::trace::Trace>,
    pub metrics: Metrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_node_round_trips_through_json() {
        let mut node = FlowNode::new("root", NodeKind::Indicator);
        node.weighting = WeightMode::Inverse;
        node.vol_window = Some(30);
        node.conditions = Some(vec![ConditionLine {
            id: "c1".into(),
            cond_type: ConditionType::If,
            metric: Metric::Rsi,
            ticker: "SPY".into(),
            window: 14,
            comparator: Comparator::Lt,
            threshold: 30.0,
            expanded: false,
            right_metric: None,
            right_ticker: None,
            right_window: None,
            for_days: 1,
            date_month: None,
            date_day: None,
            date_to: None,
        }]);
        node.push_child("then", FlowNode::new("p1", NodeKind::Position));

        let json = serde_json::to_string(&node).unwrap();
        let back: FlowNode = serde_json::from_str(&json).unwrap();
        assert_eq!(node, back);
    }

    #[test]
    fn tolerates_null_child_placeholders() {
        let json = r#"{
            "id": "b",
            "kind": "basic",
            "children": { "next": [null, {"id": "p", "kind": "position", "positions": ["SPY"]}] }
        }"#;
        let node: FlowNode = serde_json::from_str(json).unwrap();
        let next = node.slot("next");
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id, "p");
    }

    #[test]
    fn metric_names_match_external_encoding() {
        let cond: ConditionLine = serde_json::from_str(
            r#"{"id":"c","type":"if","metric":"Relative Strength Index","ticker":"SPY","window":14,"comparator":"lt","threshold":50.0}"#,
        )
        .unwrap();
        assert_eq!(cond.metric, Metric::Rsi);
        assert_eq!(cond.for_days, 1);
    }

    #[test]
    fn cost_bps_must_be_nonnegative() {
        let options = BacktestOptions {
            cost_bps: -1.0,
            ..BacktestOptions::default()
        };
        assert!(options.validate().is_err());
        let options = BacktestOptions::default();
        assert!(options.validate().is_ok());
    }
}
