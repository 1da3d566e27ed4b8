//! The backtest driver: iterates trading days, evaluates the tree once per
//! day, applies transaction costs on turnover, and accumulates the equity
//! curve and result surface.

use anyhow::{bail, Result};
use chrono::Datelike;
use garde::Validate;

use super::context::EvalContext;
use super::metrics::compute_metrics;
use super::nodes::evaluate_tree;
use super::trace::TraceCollector;
use super::types::{
    Allocation, AllocationEntry, BacktestOptions, BacktestReport, DayRow, DecisionPrice, FlowNode,
    Mode, MonthlyReturn, StrategySpec,
};
use super::weighting::turnover_fraction;
use crate::data::{PriceDb, CASH_TICKER};
use crate::indicators::SeriesCache;

/// Benchmark used for Beta/Treynor and the benchmark curve when present.
pub const BENCHMARK_TICKER: &str = "SPY";

/// Run one backtest of `strategy` over `db` under `options`.
///
/// Per-day data problems become warnings on the report; only structural
/// problems (no evaluable days, invalid options) fail the run.
pub fn run_backtest(
    db: &PriceDb,
    strategy: &StrategySpec,
    options: &BacktestOptions,
) -> Result<BacktestReport> {
    options
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid backtest options: {e}"))?;

    let (lo, hi) = db.index_range(options.period.start, options.period.end);
    if lo >= hi {
        bail!("period contains no trading days");
    }

    let lookback = strategy_lookback(strategy);
    // Open-decided modes read indicators one day back, so they need one
    // extra bar of history once any indicator is referenced.
    let warmup = match options.mode.decision_price() {
        DecisionPrice::Open if lookback > 0 => lookback + 1,
        _ => lookback,
    };
    let start = lo.max(warmup);
    if start >= hi {
        bail!(
            "not enough history: warmup needs index {start}, period ends at {hi} ({} days)",
            hi - lo
        );
    }
    tracing::debug!(lookback, start, end = hi, "backtest window resolved");

    let mut cache = SeriesCache::new();
    let mut trace = TraceCollector::new(options.collect_trace);
    let mut warnings = Vec::new();
    let cost_rate = options.cost_bps / 10_000.0;

    let span = hi - start;
    let mut dates = Vec::with_capacity(span);
    let mut equity = Vec::with_capacity(span);
    let mut daily_returns = Vec::with_capacity(span);
    let mut turnovers = Vec::with_capacity(span);
    let mut target_allocations = Vec::with_capacity(span);
    let mut actual_allocations: Vec<Allocation> = Vec::with_capacity(span);
    let mut day_rows = Vec::with_capacity(span);

    let benchmark_available = db.has_ticker(BENCHMARK_TICKER);
    let mut benchmark_equity = Vec::with_capacity(if benchmark_available { span } else { 0 });
    let mut benchmark_returns = Vec::with_capacity(if benchmark_available { span } else { 0 });
    let mut bench_level = 1.0;

    let mut current_equity = 1.0;
    let mut peak = 1.0;

    for i in start..hi {
        let date = db.date(i).unwrap_or_default();
        trace.begin_day(date);

        let target = {
            let mut ctx = EvalContext::new(
                db,
                &mut cache,
                &strategy.callables,
                &mut trace,
                &mut warnings,
                options.mode.decision_price(),
                i,
            );
            evaluate_tree(&mut ctx, &strategy.root)
        };

        let gross = day_gross_return(db, &target, options.mode, i);
        let previous = actual_allocations.last();
        let turnover = turnover_fraction(
            previous.unwrap_or(&Allocation::default()),
            &target,
        );
        let cost = cost_rate * turnover;
        let net = gross - cost;

        current_equity *= 1.0 + net;
        if current_equity > peak {
            peak = current_equity;
        }
        let drawdown = if peak > 0.0 {
            current_equity / peak - 1.0
        } else {
            0.0
        };

        if benchmark_available {
            let r = close_to_close_return(db, BENCHMARK_TICKER, i);
            bench_level *= 1.0 + r;
            benchmark_returns.push(r);
            benchmark_equity.push(bench_level);
        }

        let holdings: Vec<AllocationEntry> = target
            .iter()
            .map(|(ticker, &weight)| AllocationEntry {
                ticker: ticker.clone(),
                weight,
            })
            .collect();
        day_rows.push(DayRow {
            date,
            equity: current_equity,
            drawdown,
            gross_return: gross,
            net_return: net,
            turnover,
            cost,
            holdings,
        });

        dates.push(date);
        equity.push(current_equity);
        daily_returns.push(net);
        turnovers.push(turnover);
        target_allocations.push(target.clone());
        actual_allocations.push(target);

        trace.end_day();
    }

    let metrics = compute_metrics(
        &dates,
        &equity,
        &daily_returns,
        benchmark_available.then_some(benchmark_returns.as_slice()),
        &turnovers,
        &actual_allocations,
    );
    let monthly = monthly_returns(&dates, &daily_returns);

    Ok(BacktestReport {
        dates,
        equity,
        daily_returns,
        target_allocations,
        actual_allocations,
        days: day_rows,
        monthly,
        benchmark: benchmark_available.then_some(benchmark_equity),
        warnings,
        trace: trace.into_trace(),
        metrics,
    })
}

/// The day's gross return for an allocation under the mode's entry/exit
/// bars. Tickers with a missing price contribute zero — their weight rides
/// the day as cash.
fn day_gross_return(db: &PriceDb, allocation: &Allocation, mode: Mode, index: usize) -> f64 {
    let mut total = 0.0;
    for (ticker, &weight) in allocation {
        if ticker == CASH_TICKER || weight <= 0.0 {
            continue;
        }
        let bars = match mode {
            Mode::CC => index
                .checked_sub(1)
                .and_then(|prev| Some((db.adj_close(ticker, prev)?, db.adj_close(ticker, index)?))),
            Mode::OC => db
                .open(ticker, index)
                .and_then(|entry| Some((entry, db.adj_close(ticker, index)?))),
            Mode::OO => index
                .checked_sub(1)
                .and_then(|prev| Some((db.open(ticker, prev)?, db.open(ticker, index)?))),
        };
        if let Some((entry, exit)) = bars {
            if entry > 0.0 {
                total += weight * (exit / entry - 1.0);
            }
        }
    }
    total
}

fn close_to_close_return(db: &PriceDb, ticker: &str, index: usize) -> f64 {
    let Some(prev_index) = index.checked_sub(1) else {
        return 0.0;
    };
    match (db.adj_close(ticker, prev_index), db.adj_close(ticker, index)) {
        (Some(prev), Some(cur)) if prev > 0.0 => cur / prev - 1.0,
        _ => 0.0,
    }
}

/// Largest lookback any referenced indicator needs, across the root tree
/// and every callable.
fn strategy_lookback(strategy: &StrategySpec) -> usize {
    let mut max = node_lookback(&strategy.root);
    for callable in strategy.callables.values() {
        max = max.max(node_lookback(callable));
    }
    max
}

fn node_lookback(node: &FlowNode) -> usize {
    let mut max = 0usize;

    let visit_conditions = |conditions: Option<&[super::types::ConditionLine]>, max: &mut usize| {
        for cond in conditions.unwrap_or(&[]) {
            // forDays looks back extra days; crossings read one more bar.
            let mut extra = cond.for_days.max(1) as usize - 1;
            if matches!(
                cond.comparator,
                super::types::Comparator::CrossAbove | super::types::Comparator::CrossBelow
            ) {
                extra += 1;
            }
            *max = (*max).max(cond.metric.lookback(cond.window) + extra);
            if cond.expanded {
                let metric = cond.right_metric.unwrap_or(cond.metric);
                let window = cond.right_window.unwrap_or(cond.window);
                *max = (*max).max(metric.lookback(window) + extra);
            }
        }
    };

    visit_conditions(node.conditions.as_deref(), &mut max);
    visit_conditions(node.entry_conditions.as_deref(), &mut max);
    visit_conditions(node.exit_conditions.as_deref(), &mut max);
    if let Some(numbered) = &node.numbered {
        for item in &numbered.items {
            visit_conditions(Some(&item.conditions), &mut max);
        }
    }
    if let Some(metric) = node.metric {
        max = max.max(metric.lookback(node.window.unwrap_or(1)));
    }
    if let Some(metric) = node.scale_metric {
        max = max.max(metric.lookback(node.scale_window.unwrap_or(14)));
    }

    for children in node.children.values() {
        for child in children.iter().flatten() {
            max = max.max(node_lookback(child));
        }
    }
    max
}

fn monthly_returns(dates: &[chrono::NaiveDate], returns: &[f64]) -> Vec<MonthlyReturn> {
    let mut monthly = Vec::new();
    let mut current: Option<(i32, u32)> = None;
    let mut level = 1.0;

    for (date, ret) in dates.iter().zip(returns) {
        let key = (date.year(), date.month());
        if current != Some(key) {
            if let Some((year, month)) = current {
                monthly.push(MonthlyReturn {
                    year,
                    month,
                    value: level - 1.0,
                });
            }
            current = Some(key);
            level = 1.0;
        }
        level *= 1.0 + ret;
    }
    if let Some((year, month)) = current {
        monthly.push(MonthlyReturn {
            year,
            month,
            value: level - 1.0,
        });
    }
    monthly
}
