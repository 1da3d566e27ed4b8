//! Allocation algebra: child-share computation across the five weight
//! modes, additive merge, normalization, and turnover.

use rustc_hash::FxHashSet;

use super::context::EvalContext;
use super::types::{Allocation, FlowNode, WeightMode};
use crate::data::CASH_TICKER;
use crate::indicators::Metric;

/// Tolerance on the "weights sum to at most 1" invariant.
pub const WEIGHT_EPSILON: f64 = 1e-9;

/// Per-child ceiling for capped weighting.
pub const DEFAULT_WEIGHT_CAP: f64 = 0.20;

const DEFAULT_VOL_WINDOW: u32 = 20;

/// Weighting parameters for one branch of a node, after per-branch
/// overrides have been resolved.
#[derive(Debug, Clone)]
pub struct BranchWeighting {
    pub mode: WeightMode,
    pub vol_window: u32,
    pub capped_fallback: Option<String>,
    pub cap: f64,
}

impl BranchWeighting {
    /// Resolve the weighting for `slot`, falling back from the per-branch
    /// override to the node default.
    pub fn resolve(node: &FlowNode, slot: &str) -> Self {
        let (mode, vol_window, fallback) = match slot {
            "then" => (
                node.weighting_then.unwrap_or(node.weighting),
                node.vol_window_then.or(node.vol_window),
                node.capped_fallback_then
                    .clone()
                    .or_else(|| node.capped_fallback.clone()),
            ),
            "else" => (
                node.weighting_else.unwrap_or(node.weighting),
                node.vol_window_else.or(node.vol_window),
                node.capped_fallback_else
                    .clone()
                    .or_else(|| node.capped_fallback.clone()),
            ),
            _ => (node.weighting, node.vol_window, node.capped_fallback.clone()),
        };
        Self {
            mode,
            vol_window: vol_window.unwrap_or(DEFAULT_VOL_WINDOW).max(2),
            capped_fallback: fallback,
            cap: DEFAULT_WEIGHT_CAP,
        }
    }
}

/// Merge evaluated children into one allocation under the branch weighting,
/// then normalize. Children keep their slot share even when they came back
/// empty — an all-cash child simply leaves its share in cash.
pub fn combine_children(
    ctx: &mut EvalContext,
    children: &[(Allocation, &FlowNode)],
    weighting: &BranchWeighting,
) -> Allocation {
    if children.is_empty() {
        return Allocation::default();
    }

    let shares = match weighting.mode {
        WeightMode::Equal => equal_shares(children.len()),
        WeightMode::Defined => defined_shares(children),
        WeightMode::Inverse => volatility_shares(ctx, children, weighting.vol_window, true),
        WeightMode::Pro => volatility_shares(ctx, children, weighting.vol_window, false),
        WeightMode::Capped => return combine_capped(children, weighting),
    };

    let mut merged = Allocation::default();
    for ((alloc, _), share) in children.iter().zip(&shares) {
        merge_into(&mut merged, alloc, *share);
    }
    normalize(&mut merged);
    merged
}

fn equal_shares(count: usize) -> Vec<f64> {
    vec![1.0 / count as f64; count]
}

/// Defined mode: each child carries its share in its `window` field (the
/// external encoding reuses that slot). Zero or missing total falls back
/// to equal.
fn defined_shares(children: &[(Allocation, &FlowNode)]) -> Vec<f64> {
    let raw: Vec<f64> = children
        .iter()
        .map(|(_, child)| child.window.unwrap_or(0) as f64)
        .collect();
    let total: f64 = raw.iter().sum();
    if total <= 0.0 {
        return equal_shares(children.len());
    }
    raw.iter().map(|w| w / total).collect()
}

/// Inverse / pro volatility. Each child's proxy volatility is the weighted
/// sum over its tickers of the stdev of daily returns at `vol_window`.
/// Children with a null or zero proxy take an equal 1/K share; the rest of
/// the mass is split across the others proportionally to 1/vol (inverse)
/// or vol (pro).
fn volatility_shares(
    ctx: &mut EvalContext,
    children: &[(Allocation, &FlowNode)],
    vol_window: u32,
    inverse: bool,
) -> Vec<f64> {
    let count = children.len();
    let vols: Vec<Option<f64>> = children
        .iter()
        .map(|(alloc, _)| allocation_volatility(ctx, alloc, vol_window))
        .collect();

    let degenerate = vols.iter().filter(|v| v.is_none()).count();
    if degenerate == count {
        return equal_shares(count);
    }

    let scores: Vec<Option<f64>> = vols
        .iter()
        .map(|v| v.map(|vol| if inverse { 1.0 / vol } else { vol }))
        .collect();
    let score_total: f64 = scores.iter().flatten().sum();

    let reserved = degenerate as f64 / count as f64;
    let scalable = 1.0 - reserved;

    scores
        .iter()
        .map(|score| match score {
            None => 1.0 / count as f64,
            Some(s) if score_total > 0.0 && score_total.is_finite() => scalable * s / score_total,
            Some(_) => scalable / (count - degenerate) as f64,
        })
        .collect()
}

/// Weighted sum of per-ticker return volatility for one child allocation.
/// `None` when the child is all cash or any priced ticker has no defined
/// stdev yet.
fn allocation_volatility(ctx: &mut EvalContext, alloc: &Allocation, vol_window: u32) -> Option<f64> {
    let mut total = 0.0;
    let mut priced = false;
    for (ticker, &weight) in alloc {
        if ticker == CASH_TICKER {
            continue;
        }
        let vol = ctx.metric_value(Metric::StdDevReturns, ticker, vol_window, 0)?;
        total += vol * weight;
        priced = true;
    }
    if !priced || total <= 0.0 {
        None
    } else {
        Some(total)
    }
}

/// Capped mode: start from defined shares (equal when none are defined),
/// then clamp every child at the cap, redistributing the excess in rounds
/// proportionally to the still-uncapped children. Whatever excess survives
/// with every child capped goes to the fallback ticker, or stays cash.
fn combine_capped(children: &[(Allocation, &FlowNode)], weighting: &BranchWeighting) -> Allocation {
    let count = children.len();
    let cap = weighting.cap.clamp(0.0, 1.0);
    let mut shares = defined_shares(children);

    for _round in 0..count {
        let mut excess = 0.0;
        let mut uncapped_total = 0.0;
        for share in &mut shares {
            if *share > cap {
                excess += *share - cap;
                *share = cap;
            } else if *share < cap {
                uncapped_total += *share;
            }
        }
        if excess <= WEIGHT_EPSILON {
            break;
        }
        if uncapped_total <= 0.0 {
            // Everyone is at the cap; the excess has nowhere to go.
            break;
        }
        let scale = excess / uncapped_total;
        for share in &mut shares {
            if *share < cap {
                *share += *share * scale;
            }
        }
    }

    let mut merged = Allocation::default();
    for ((alloc, _), share) in children.iter().zip(&shares) {
        merge_into(&mut merged, alloc, *share);
    }

    let residual = 1.0 - shares.iter().sum::<f64>();
    if residual > WEIGHT_EPSILON {
        if let Some(fallback) = weighting
            .capped_fallback
            .as_deref()
            .filter(|t| !t.is_empty() && *t != CASH_TICKER)
        {
            *merged.entry(fallback.to_string()).or_insert(0.0) += residual;
        }
        // No fallback: the residual stays in cash.
    }

    normalize(&mut merged);
    merged
}

/// Additively merge `alloc` scaled by `share` into `acc`.
pub fn merge_into(acc: &mut Allocation, alloc: &Allocation, share: f64) {
    if share == 0.0 {
        return;
    }
    for (ticker, &weight) in alloc {
        *acc.entry(ticker.clone()).or_insert(0.0) += weight * share;
    }
}

/// Clamp negatives to zero and scale down when the total exceeds 1 + ε.
/// A total below 1 is left alone: the missing mass is cash.
pub fn normalize(alloc: &mut Allocation) {
    alloc.retain(|_, weight| {
        if *weight < 0.0 {
            *weight = 0.0;
        }
        *weight > 0.0
    });
    let total: f64 = alloc.values().sum();
    if total > 1.0 + WEIGHT_EPSILON {
        for weight in alloc.values_mut() {
            *weight /= total;
        }
    }
}

/// Half the L1 distance between consecutive allocations: 1.0 means a full
/// portfolio replacement.
pub fn turnover_fraction(prev: &Allocation, next: &Allocation) -> f64 {
    let tickers: FxHashSet<&String> = prev.keys().chain(next.keys()).collect();
    let total: f64 = tickers
        .into_iter()
        .map(|t| {
            let a = prev.get(t).copied().unwrap_or(0.0);
            let b = next.get(t).copied().unwrap_or(0.0);
            (b - a).abs()
        })
        .sum();
    total / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn alloc(entries: &[(&str, f64)]) -> Allocation {
        entries
            .iter()
            .map(|(t, w)| ((*t).to_string(), *w))
            .collect()
    }

    #[test]
    fn normalize_scales_down_never_up() {
        let mut over = alloc(&[("A", 1.0), ("B", 1.0)]);
        normalize(&mut over);
        assert_relative_eq!(over.values().sum::<f64>(), 1.0, epsilon = 1e-12);

        let mut under = alloc(&[("A", 0.3)]);
        normalize(&mut under);
        assert_relative_eq!(under["A"], 0.3);
    }

    #[test]
    fn normalize_clamps_negatives() {
        let mut a = alloc(&[("A", -0.5), ("B", 0.5)]);
        normalize(&mut a);
        assert!(!a.contains_key("A"));
        assert_relative_eq!(a["B"], 0.5);
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut a = alloc(&[("A", 0.9), ("B", 0.6)]);
        normalize(&mut a);
        let once = a.clone();
        normalize(&mut a);
        assert_eq!(a, once);
    }

    #[test]
    fn turnover_of_identical_allocations_is_zero() {
        let a = alloc(&[("A", 0.5), ("B", 0.5)]);
        assert_relative_eq!(turnover_fraction(&a, &a), 0.0);
    }

    #[test]
    fn turnover_of_full_swap_is_one() {
        let a = alloc(&[("A", 1.0)]);
        let b = alloc(&[("B", 1.0)]);
        assert_relative_eq!(turnover_fraction(&a, &b), 1.0);
    }

    #[test]
    fn defined_shares_use_child_window_field() {
        use crate::engine::types::{FlowNode, NodeKind};
        let mut c1 = FlowNode::new("a", NodeKind::Position);
        c1.window = Some(3);
        let mut c2 = FlowNode::new("b", NodeKind::Position);
        c2.window = Some(1);
        let children = vec![
            (alloc(&[("A", 1.0)]), &c1),
            (alloc(&[("B", 1.0)]), &c2),
        ];
        let shares = defined_shares(&children);
        assert_relative_eq!(shares[0], 0.75);
        assert_relative_eq!(shares[1], 0.25);
    }

    #[test]
    fn defined_shares_fall_back_to_equal_when_unset() {
        use crate::engine::types::{FlowNode, NodeKind};
        let c1 = FlowNode::new("a", NodeKind::Position);
        let c2 = FlowNode::new("b", NodeKind::Position);
        let children = vec![
            (alloc(&[("A", 1.0)]), &c1),
            (alloc(&[("B", 1.0)]), &c2),
        ];
        let shares = defined_shares(&children);
        assert_relative_eq!(shares[0], 0.5);
        assert_relative_eq!(shares[1], 0.5);
    }

    #[test]
    fn capped_redistributes_in_rounds_then_falls_back() {
        use crate::engine::types::{FlowNode, NodeKind};
        // Four children at equal 0.25 against a 0.20 cap: all cap, residual
        // 0.20 goes to the fallback ticker.
        let nodes: Vec<FlowNode> = (0..4)
            .map(|i| FlowNode::new(format!("n{i}"), NodeKind::Position))
            .collect();
        let children: Vec<(Allocation, &FlowNode)> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (alloc(&[(format!("T{i}").as_str(), 1.0)]), n))
            .collect();
        let weighting = BranchWeighting {
            mode: WeightMode::Capped,
            vol_window: 20,
            capped_fallback: Some("BIL".to_string()),
            cap: DEFAULT_WEIGHT_CAP,
        };
        let merged = combine_capped(&children, &weighting);
        for i in 0..4 {
            assert_relative_eq!(merged[&format!("T{i}")], 0.20, epsilon = 1e-9);
        }
        assert_relative_eq!(merged["BIL"], 0.20, epsilon = 1e-9);
    }

    #[test]
    fn capped_without_fallback_leaves_cash() {
        use crate::engine::types::{FlowNode, NodeKind};
        let nodes: Vec<FlowNode> = (0..4)
            .map(|i| FlowNode::new(format!("n{i}"), NodeKind::Position))
            .collect();
        let children: Vec<(Allocation, &FlowNode)> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (alloc(&[(format!("T{i}").as_str(), 1.0)]), n))
            .collect();
        let weighting = BranchWeighting {
            mode: WeightMode::Capped,
            vol_window: 20,
            capped_fallback: None,
            cap: DEFAULT_WEIGHT_CAP,
        };
        let merged = combine_capped(&children, &weighting);
        assert_relative_eq!(merged.values().sum::<f64>(), 0.8, epsilon = 1e-9);
    }
}
