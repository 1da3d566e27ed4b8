pub mod conditions;
pub mod context;
pub mod driver;
pub mod metrics;
pub mod nodes;
pub mod trace;
pub mod types;
pub mod weighting;

pub use driver::run_backtest;
pub use types::{Allocation, BacktestOptions, BacktestReport, Mode, StrategySpec};
