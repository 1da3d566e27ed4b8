//! Node evaluation: dispatch over the eight dialects, producing one
//! allocation per node per day. The call stack of node ids travels with the
//! recursion so `call` cycles are cut at the first revisit.

use ordered_float::OrderedFloat;

use super::conditions::eval_conditions;
use super::context::EvalContext;
use super::trace::BranchState;
use super::types::{
    empty_allocation, Allocation, FlowNode, NodeKind, Quantifier, RankChoice, WarningKind,
};
use super::weighting::{combine_children, merge_into, normalize, BranchWeighting};
use crate::data::CASH_TICKER;
use crate::indicators::Metric;

/// Evaluate a whole tree for the context's day and normalize the result.
pub fn evaluate_tree(ctx: &mut EvalContext, root: &FlowNode) -> Allocation {
    let mut call_stack = Vec::new();
    let mut allocation = evaluate_node(ctx, root, &mut call_stack);
    normalize(&mut allocation);
    allocation
}

pub fn evaluate_node(
    ctx: &mut EvalContext,
    node: &FlowNode,
    call_stack: &mut Vec<String>,
) -> Allocation {
    let allocation = match node.kind {
        NodeKind::Position => evaluate_position(node),
        NodeKind::Call => evaluate_call(ctx, node, call_stack),
        NodeKind::Basic => evaluate_slot(ctx, node, "next", call_stack),
        NodeKind::Indicator => evaluate_indicator(ctx, node, call_stack),
        NodeKind::Numbered => evaluate_numbered(ctx, node, call_stack),
        NodeKind::Function => evaluate_function(ctx, node, call_stack),
        NodeKind::AltExit => evaluate_alt_exit(ctx, node, call_stack),
        NodeKind::Scaling => evaluate_scaling(ctx, node, call_stack),
    };
    ctx.trace.record_contribution(&node.id, &allocation);
    allocation
}

/// Position: dedupe tickers, drop the cash sentinel, equal-split the rest.
fn evaluate_position(node: &FlowNode) -> Allocation {
    let Some(positions) = &node.positions else {
        return empty_allocation();
    };

    let mut unique: Vec<&str> = Vec::new();
    for ticker in positions {
        if ticker.is_empty() || ticker == CASH_TICKER {
            continue;
        }
        if !unique.contains(&ticker.as_str()) {
            unique.push(ticker);
        }
    }
    if unique.is_empty() {
        return empty_allocation();
    }

    let weight = 1.0 / unique.len() as f64;
    unique
        .into_iter()
        .map(|t| (t.to_string(), weight))
        .collect()
}

/// Call: resolve the target through the registry, guarding against cycles
/// with the id stack.
fn evaluate_call(
    ctx: &mut EvalContext,
    node: &FlowNode,
    call_stack: &mut Vec<String>,
) -> Allocation {
    let Some(ref_id) = node.call_ref_id.as_deref().filter(|id| !id.is_empty()) else {
        ctx.warn(
            WarningKind::UnresolvedCall,
            Some(&node.id),
            "call node has no target",
        );
        return empty_allocation();
    };

    if call_stack.iter().any(|id| id == ref_id) {
        ctx.warn(
            WarningKind::CyclicCall,
            Some(&node.id),
            format!("self-referencing call to {ref_id}"),
        );
        return empty_allocation();
    }

    // Copy the registry reference out of the context so the target borrow
    // does not pin `ctx` for the recursion.
    let registry = ctx.registry;
    let Some(target) = registry.get(ref_id) else {
        ctx.warn(
            WarningKind::UnresolvedCall,
            Some(&node.id),
            format!("call target {ref_id} not found"),
        );
        return empty_allocation();
    };

    call_stack.push(ref_id.to_string());
    let allocation = evaluate_node(ctx, target, call_stack);
    call_stack.pop();
    allocation
}

/// Evaluate and combine one child slot under its branch weighting.
fn evaluate_slot(
    ctx: &mut EvalContext,
    node: &FlowNode,
    slot: &str,
    call_stack: &mut Vec<String>,
) -> Allocation {
    let children = node.slot(slot);
    if children.is_empty() {
        return empty_allocation();
    }
    let evaluated: Vec<(Allocation, &FlowNode)> = children
        .into_iter()
        .map(|child| (evaluate_node(ctx, child, call_stack), child))
        .collect();
    let weighting = BranchWeighting::resolve(node, slot);
    combine_children(ctx, &evaluated, &weighting)
}

fn evaluate_indicator(
    ctx: &mut EvalContext,
    node: &FlowNode,
    call_stack: &mut Vec<String>,
) -> Allocation {
    let conditions = node.conditions.as_deref().unwrap_or(&[]);
    let ok = eval_conditions(ctx, conditions);
    let slot = if ok { "then" } else { "else" };
    ctx.trace.record_branch(&node.id, slot);
    evaluate_slot(ctx, node, slot, call_stack)
}

fn evaluate_numbered(
    ctx: &mut EvalContext,
    node: &FlowNode,
    call_stack: &mut Vec<String>,
) -> Allocation {
    let Some(numbered) = &node.numbered else {
        return empty_allocation();
    };

    let true_count = numbered
        .items
        .iter()
        .filter(|item| eval_conditions(ctx, &item.conditions))
        .count();

    if numbered.quantifier == Quantifier::Ladder {
        let slot = format!("ladder-{true_count}");
        ctx.trace.record_branch(&node.id, &slot);
        return evaluate_slot(ctx, node, &slot, call_stack);
    }

    let n = numbered.n as usize;
    let ok = match numbered.quantifier {
        Quantifier::Any => true_count >= 1,
        Quantifier::All => true_count == numbered.items.len(),
        Quantifier::None => true_count == 0,
        Quantifier::Exactly => true_count == n,
        Quantifier::AtLeast => true_count >= n,
        Quantifier::AtMost => true_count <= n,
        Quantifier::Ladder => unreachable!(),
    };

    let slot = if ok { "then" } else { "else" };
    ctx.trace.record_branch(&node.id, slot);
    evaluate_slot(ctx, node, slot, call_stack)
}

/// Function: score every candidate child by the weighted sum of its
/// tickers' metric readings, then keep the bottom or top `pickN`.
fn evaluate_function(
    ctx: &mut EvalContext,
    node: &FlowNode,
    call_stack: &mut Vec<String>,
) -> Allocation {
    let children = node.slot("next");
    if children.is_empty() {
        return empty_allocation();
    }

    let metric = node.metric.unwrap_or(Metric::Rsi);
    let window = node.window.unwrap_or(1).max(1);
    let pick_n = node.bottom.unwrap_or(1).max(1) as usize;
    let rank = node.rank.unwrap_or_default();

    let mut scored: Vec<(f64, Allocation, &FlowNode)> = Vec::new();
    for child in children {
        let allocation = evaluate_node(ctx, child, call_stack);
        if allocation.is_empty() {
            continue;
        }
        if let Some(score) = candidate_score(ctx, &allocation, metric, window) {
            scored.push((score, allocation, child));
        }
    }
    if scored.is_empty() {
        return empty_allocation();
    }

    scored.sort_by_key(|(score, _, _)| OrderedFloat(*score));
    let selected: Vec<(Allocation, &FlowNode)> = match rank {
        RankChoice::Bottom => scored
            .into_iter()
            .take(pick_n)
            .map(|(_, a, c)| (a, c))
            .collect(),
        RankChoice::Top => {
            let skip = scored.len().saturating_sub(pick_n);
            scored
                .into_iter()
                .skip(skip)
                .map(|(_, a, c)| (a, c))
                .collect()
        }
    };

    let weighting = BranchWeighting::resolve(node, "next");
    combine_children(ctx, &selected, &weighting)
}

/// Σ metric(ticker) · weight over the candidate's tickers, skipping tickers
/// with no reading. A candidate with nothing scorable is dropped.
fn candidate_score(
    ctx: &mut EvalContext,
    allocation: &Allocation,
    metric: Metric,
    window: u32,
) -> Option<f64> {
    let mut total = 0.0;
    let mut scored_any = false;
    for (ticker, &weight) in allocation {
        if ticker == CASH_TICKER {
            continue;
        }
        if let Some(value) = ctx.metric_value(metric, ticker, window, 0) {
            total += value * weight;
            scored_any = true;
        }
    }
    scored_any.then_some(total)
}

/// AltExit: a two-state machine. Entry can only move `else → then`, exit
/// only `then → else`; the state rides in the trace between days.
fn evaluate_alt_exit(
    ctx: &mut EvalContext,
    node: &FlowNode,
    call_stack: &mut Vec<String>,
) -> Allocation {
    let entry = eval_conditions(ctx, node.entry_conditions.as_deref().unwrap_or(&[]));
    let exit = eval_conditions(ctx, node.exit_conditions.as_deref().unwrap_or(&[]));

    let state = match ctx.trace.alt_state(&node.id) {
        None | Some(BranchState::Else) => {
            if entry {
                BranchState::Then
            } else {
                BranchState::Else
            }
        }
        Some(BranchState::Then) => {
            if exit {
                BranchState::Else
            } else {
                BranchState::Then
            }
        }
    };
    ctx.trace.set_alt_state(&node.id, state);
    ctx.trace.record_branch(&node.id, state.slot());

    evaluate_slot(ctx, node, state.slot(), call_stack)
}

/// Scaling: blend both branches by where the metric sits between the two
/// endpoints. Endpoint order encodes inversion; a missing reading blends
/// 50/50.
fn evaluate_scaling(
    ctx: &mut EvalContext,
    node: &FlowNode,
    call_stack: &mut Vec<String>,
) -> Allocation {
    let metric = node.scale_metric.unwrap_or(Metric::Rsi);
    let window = node.scale_window.unwrap_or(14);
    let ticker = node.scale_ticker.clone().unwrap_or_default();
    let from = node.scale_from.unwrap_or(0.0);
    let to = node.scale_to.unwrap_or(0.0);

    let current = ctx.metric_value(metric, &ticker, window, 0);
    let (then_weight, else_weight) = scale_weights(current, from, to);

    let then_alloc = evaluate_slot(ctx, node, "then", call_stack);
    let else_alloc = evaluate_slot(ctx, node, "else", call_stack);

    let mut blended = Allocation::default();
    merge_into(&mut blended, &then_alloc, then_weight);
    merge_into(&mut blended, &else_alloc, else_weight);
    normalize(&mut blended);
    blended
}

fn scale_weights(current: Option<f64>, from: f64, to: f64) -> (f64, f64) {
    let Some(current) = current else {
        return (0.5, 0.5);
    };
    let inverted = from > to;
    let lo = from.min(to);
    let hi = from.max(to);

    // ≥ hi is checked first so degenerate endpoints (lo == hi) resolve
    // at-or-above to the high case.
    if current >= hi {
        return if inverted { (1.0, 0.0) } else { (0.0, 1.0) };
    }
    if current <= lo {
        return if inverted { (0.0, 1.0) } else { (1.0, 0.0) };
    }
    let ratio = (current - lo) / (hi - lo);
    let else_weight = if inverted { 1.0 - ratio } else { ratio };
    (1.0 - else_weight, else_weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn scale_weights_follow_the_endpoints() {
        // Normal direction: from 30 to 70.
        assert_eq!(scale_weights(Some(20.0), 30.0, 70.0), (1.0, 0.0));
        assert_eq!(scale_weights(Some(80.0), 30.0, 70.0), (0.0, 1.0));
        let (t, e) = scale_weights(Some(50.0), 30.0, 70.0);
        assert_relative_eq!(t, 0.5);
        assert_relative_eq!(e, 0.5);
        let (t, e) = scale_weights(Some(40.0), 30.0, 70.0);
        assert_relative_eq!(t, 0.75);
        assert_relative_eq!(e, 0.25);
    }

    #[test]
    fn scale_weights_invert_when_endpoints_swap() {
        assert_eq!(scale_weights(Some(20.0), 70.0, 30.0), (0.0, 1.0));
        assert_eq!(scale_weights(Some(80.0), 70.0, 30.0), (1.0, 0.0));
        let (t, e) = scale_weights(Some(40.0), 70.0, 30.0);
        assert_relative_eq!(t, 0.25);
        assert_relative_eq!(e, 0.75);
    }

    #[test]
    fn scale_weights_degenerate_endpoints() {
        // from == to: at-or-above behaves as ≥ hi, below as ≤ lo.
        assert_eq!(scale_weights(Some(50.0), 50.0, 50.0), (0.0, 1.0));
        assert_eq!(scale_weights(Some(49.0), 50.0, 50.0), (1.0, 0.0));
        assert_eq!(scale_weights(None, 30.0, 70.0), (0.5, 0.5));
    }

    #[test]
    fn position_dedupes_and_drops_cash() {
        let mut node = FlowNode::new("p", NodeKind::Position);
        node.positions = Some(vec![
            "SPY".into(),
            "Empty".into(),
            "TLT".into(),
            "SPY".into(),
        ]);
        let alloc = evaluate_position(&node);
        assert_eq!(alloc.len(), 2);
        assert_relative_eq!(alloc["SPY"], 0.5);
        assert_relative_eq!(alloc["TLT"], 0.5);
    }

    #[test]
    fn position_of_only_cash_is_empty() {
        let mut node = FlowNode::new("p", NodeKind::Position);
        node.positions = Some(vec!["Empty".into()]);
        assert!(evaluate_position(&node).is_empty());
    }
}
