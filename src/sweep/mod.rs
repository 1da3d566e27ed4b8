//! Parameter sweeps: combination enumeration, the in-process worker pool,
//! and the JSON-line protocol for subprocess workers.

pub mod combinator;
pub mod pool;
pub mod protocol;

use anyhow::Result;
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::data::PriceDb;
use crate::engine::types::{BacktestOptions, Metrics, Mode, Period, StrategySpec};

pub use combinator::{apply_combination, enumerate_combinations, Combination, ParameterRange};
pub use pool::{Progress, WorkerPool};

/// Options for one sweep task: the shared backtest knobs plus the
/// in-sample window and an optional out-of-sample window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskOptions {
    #[garde(skip)]
    #[serde(default)]
    pub mode: Mode,
    #[garde(range(min = 0.0))]
    #[serde(default)]
    pub cost_bps: f64,
    #[garde(skip)]
    #[serde(default)]
    pub is_period: Period,
    #[garde(skip)]
    #[serde(default)]
    pub oos_period: Option<Period>,
}

impl TaskOptions {
    pub fn backtest_options(&self, period: Period) -> BacktestOptions {
        BacktestOptions {
            mode: self.mode,
            cost_bps: self.cost_bps,
            period,
            collect_trace: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Success,
    Error,
}

/// Result of one branch of a sweep. `branch_id` lets callers reorder
/// results received from the pool in any completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchResult {
    pub branch_id: usize,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_metrics: Option<Metrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oos_metrics: Option<Metrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combination: Option<Combination>,
}

/// Run one concrete branch: the in-sample backtest, plus the out-of-sample
/// one when a window is configured.
pub fn run_branch(
    db: &PriceDb,
    strategy: &StrategySpec,
    options: &TaskOptions,
) -> Result<(Metrics, Option<Metrics>)> {
    let is_report = crate::engine::run_backtest(db, strategy, &options.backtest_options(options.is_period))?;
    let oos_metrics = match options.oos_period {
        Some(period) => {
            Some(crate::engine::run_backtest(db, strategy, &options.backtest_options(period))?.metrics)
        }
        None => None,
    };
    Ok((is_report.metrics, oos_metrics))
}
