//! Condition evaluation: date tests with wrap-around ranges, scalar and
//! indicator-vs-indicator comparisons, crossings, the `for N days`
//! quantifier, and AND-tighter-than-OR list folding.

use chrono::Datelike;

use super::context::EvalContext;
use super::types::{Comparator, ConditionLine, ConditionType, WarningKind};
use crate::indicators::Metric;

/// Fold a condition list. `and` binds tighter than `or`: the list is read
/// as a disjunction of AND-groups, with the leading entry treated as `if`.
/// An empty list is false.
pub fn eval_conditions(ctx: &mut EvalContext, conditions: &[ConditionLine]) -> bool {
    if conditions.is_empty() {
        return false;
    }

    let mut any_group_true = false;
    let mut current_group = true;

    for (i, cond) in conditions.iter().enumerate() {
        let outcome = eval_condition(ctx, cond);
        ctx.trace.record_condition(&cond.id, outcome);

        if i > 0 && cond.cond_type == ConditionType::Or {
            any_group_true |= current_group;
            current_group = outcome;
        } else {
            current_group &= outcome;
        }
    }

    any_group_true || current_group
}

/// One condition, including its `for N days` quantifier: true iff it holds
/// at each of the last N indicator days. Insufficient history is false.
pub fn eval_condition(ctx: &mut EvalContext, cond: &ConditionLine) -> bool {
    let for_days = cond.for_days.max(1) as usize;
    if for_days > 1 && ctx.indicator_index + 1 < for_days {
        return false;
    }
    (0..for_days).all(|offset| eval_condition_at(ctx, cond, offset))
}

fn eval_condition_at(ctx: &mut EvalContext, cond: &ConditionLine, steps_back: usize) -> bool {
    if cond.metric == Metric::Date {
        return eval_date_condition(ctx, cond, steps_back);
    }

    let Some(left) = left_value(ctx, cond, steps_back) else {
        warn_missing(ctx, cond, &cond.ticker);
        return false;
    };

    match cond.comparator {
        Comparator::Lt | Comparator::Gt => {
            let right = if cond.expanded {
                match right_value(ctx, cond, steps_back) {
                    Some(v) => v,
                    None => {
                        warn_missing(ctx, cond, cond.right_ticker.as_deref().unwrap_or(&cond.ticker));
                        return false;
                    }
                }
            } else {
                cond.threshold
            };
            match cond.comparator {
                Comparator::Lt => left < right,
                _ => left > right,
            }
        }
        Comparator::CrossAbove | Comparator::CrossBelow => {
            // Crossings need two consecutive defined readings on each side.
            let Some(left_prev) = left_value(ctx, cond, steps_back + 1) else {
                warn_missing(ctx, cond, &cond.ticker);
                return false;
            };
            let (right_prev, right) = if cond.expanded {
                match (
                    right_value(ctx, cond, steps_back + 1),
                    right_value(ctx, cond, steps_back),
                ) {
                    (Some(prev), Some(cur)) => (prev, cur),
                    _ => {
                        warn_missing(ctx, cond, cond.right_ticker.as_deref().unwrap_or(&cond.ticker));
                        return false;
                    }
                }
            } else {
                (cond.threshold, cond.threshold)
            };
            match cond.comparator {
                Comparator::CrossAbove => left_prev < right_prev && left >= right,
                _ => left_prev > right_prev && left <= right,
            }
        }
    }
}

fn left_value(ctx: &mut EvalContext, cond: &ConditionLine, steps_back: usize) -> Option<f64> {
    ctx.metric_value(cond.metric, &cond.ticker, cond.window, steps_back)
}

/// Right side of an expanded comparison; unset fields inherit the left's.
fn right_value(ctx: &mut EvalContext, cond: &ConditionLine, steps_back: usize) -> Option<f64> {
    let metric = cond.right_metric.unwrap_or(cond.metric);
    let ticker = cond.right_ticker.as_deref().unwrap_or(&cond.ticker);
    let window = cond.right_window.unwrap_or(cond.window);
    ctx.metric_value(metric, ticker, window, steps_back)
}

fn warn_missing(ctx: &mut EvalContext, cond: &ConditionLine, ticker: &str) {
    let message = format!("missing {:?} data for {ticker}", cond.metric);
    ctx.warn(WarningKind::MissingData, Some(&cond.id), message);
}

/// Date condition: match a single month/day, or a month/day range with
/// wrap-around across year end (`from > to` means Nov–Feb style windows).
fn eval_date_condition(ctx: &mut EvalContext, cond: &ConditionLine, steps_back: usize) -> bool {
    let Some(index) = ctx.decision_index.checked_sub(steps_back) else {
        return false;
    };
    let Some(date) = ctx.db.date(index) else {
        return false;
    };
    let current = date.month() * 100 + date.day();
    let from = cond.date_month.unwrap_or(1) * 100 + cond.date_day.unwrap_or(1);

    match cond.date_to {
        None => current == from,
        Some(stop) => {
            let to = stop.month * 100 + stop.day;
            if from <= to {
                current >= from && current <= to
            } else {
                current >= from || current <= to
            }
        }
    }
}
