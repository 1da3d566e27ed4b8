//! Parameter-range enumeration and combination application.
//!
//! A sweep designates mutable numeric fields in a template tree by dotted
//! paths anchored at a node id. Each combination is applied to a deep clone
//! of the template, so parallel branches never share mutable state.

use garde::Validate;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::engine::types::{ConditionLine, FlowNode, StrategySpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RangeKind {
    Period,
    Threshold,
}

/// One sweepable field: a dotted path inside the node `node_id`, swept over
/// `min..=max` by `step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ParameterRange {
    #[garde(skip)]
    pub id: String,
    #[serde(rename = "type")]
    #[garde(skip)]
    pub kind: RangeKind,
    #[garde(skip)]
    pub node_id: String,
    #[garde(skip)]
    #[serde(default)]
    pub condition_id: Option<String>,
    #[garde(skip)]
    pub path: String,
    #[garde(skip)]
    #[serde(default)]
    pub current_value: f64,
    #[garde(skip)]
    #[serde(default)]
    pub enabled: bool,
    #[garde(skip)]
    pub min: f64,
    #[garde(custom(validate_max_gte_min(self.min)))]
    pub max: f64,
    #[garde(custom(validate_step_positive))]
    pub step: f64,
}

fn validate_max_gte_min(min: f64) -> impl FnOnce(&f64, &()) -> garde::Result {
    move |max: &f64, (): &()| {
        if min > *max {
            return Err(garde::Error::new(format!(
                "min ({min}) must be <= max ({max})"
            )));
        }
        Ok(())
    }
}

fn validate_step_positive(step: &f64, (): &()) -> garde::Result {
    if *step <= 0.0 {
        return Err(garde::Error::new(format!("step ({step}) must be > 0")));
    }
    Ok(())
}

impl ParameterRange {
    /// Discretized values: min, min+step, … inclusive of max when the step
    /// lands on it (within a half-step tolerance for float drift).
    pub fn values(&self) -> Vec<f64> {
        if self.step <= 0.0 || self.max < self.min {
            return vec![self.current_value];
        }
        let mut out = Vec::new();
        let mut v = self.min;
        let limit = self.max + self.step * 1e-9;
        while v <= limit {
            out.push(v);
            v += self.step;
        }
        out
    }
}

/// One concrete assignment of swept values (range id → value) plus any
/// ticker-list substitutions (list id → concrete symbol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Combination {
    #[serde(default)]
    pub values: Vec<(String, f64)>,
    #[serde(default)]
    pub ticker_lists: FxHashMap<String, String>,
}

impl Combination {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.ticker_lists.is_empty()
    }
}

/// Cartesian product of the enabled ranges' discretized values, first range
/// outermost. No enabled ranges yields the single empty combination.
pub fn enumerate_combinations(ranges: &[ParameterRange]) -> Vec<Combination> {
    let enabled: Vec<&ParameterRange> = ranges.iter().filter(|r| r.enabled).collect();
    if enabled.is_empty() {
        return vec![Combination::default()];
    }

    let mut combos: Vec<Vec<(String, f64)>> = vec![Vec::new()];
    for range in enabled {
        let values = range.values();
        let mut grown = Vec::with_capacity(combos.len() * values.len());
        for prefix in &combos {
            for &value in &values {
                let mut next = prefix.clone();
                next.push((range.id.clone(), value));
                grown.push(next);
            }
        }
        combos = grown;
    }

    combos
        .into_iter()
        .map(|values| Combination {
            values,
            ticker_lists: FxHashMap::default(),
        })
        .collect()
}

/// Apply a combination to a deep clone of the template. Unknown range ids
/// or unreachable paths are skipped with a log line; the sweep carries on
/// with the fields it could set.
pub fn apply_combination(
    template: &StrategySpec,
    combination: &Combination,
    ranges: &[ParameterRange],
) -> StrategySpec {
    let mut concrete = template.clone();

    for (range_id, value) in &combination.values {
        let Some(range) = ranges.iter().find(|r| &r.id == range_id) else {
            tracing::warn!(%range_id, "combination references unknown range");
            continue;
        };
        let applied = match find_node_mut(&mut concrete.root, &range.node_id) {
            Some(node) => apply_to_node(node, range, *value),
            None => concrete
                .callables
                .values_mut()
                .find_map(|root| find_node_mut(root, &range.node_id))
                .is_some_and(|node| apply_to_node(node, range, *value)),
        };
        if !applied {
            tracing::warn!(
                %range_id,
                node_id = %range.node_id,
                path = %range.path,
                "parameter path did not resolve"
            );
        }
    }

    if !combination.ticker_lists.is_empty() {
        substitute_tickers(&mut concrete.root, &combination.ticker_lists);
        for root in concrete.callables.values_mut() {
            substitute_tickers(root, &combination.ticker_lists);
        }
    }

    concrete
}

fn find_node_mut<'a>(node: &'a mut FlowNode, id: &str) -> Option<&'a mut FlowNode> {
    if node.id == id {
        return Some(node);
    }
    node.children
        .values_mut()
        .flat_map(|slot| slot.iter_mut())
        .flatten()
        .find_map(|child| find_node_mut(child, id))
}

/// Walk the dotted path inside one node and set the addressed field.
fn apply_to_node(node: &mut FlowNode, range: &ParameterRange, value: f64) -> bool {
    let segments: Vec<&str> = range.path.split('.').collect();
    match segments.as_slice() {
        ["conditions", rest @ ..] => {
            apply_to_conditions(node.conditions.as_deref_mut(), range, rest, value)
        }
        ["entryConditions", rest @ ..] => {
            apply_to_conditions(node.entry_conditions.as_deref_mut(), range, rest, value)
        }
        ["exitConditions", rest @ ..] => {
            apply_to_conditions(node.exit_conditions.as_deref_mut(), range, rest, value)
        }
        ["numbered", "n"] => {
            if let Some(numbered) = &mut node.numbered {
                numbered.n = coerce_count(value);
                true
            } else {
                false
            }
        }
        ["numbered", "items", item_id, "conditions", rest @ ..] => node
            .numbered
            .as_mut()
            .and_then(|numbered| {
                numbered
                    .items
                    .iter_mut()
                    .find(|item| id_matches(&item.id, item_id))
            })
            .is_some_and(|item| {
                apply_to_conditions(Some(item.conditions.as_mut_slice()), range, rest, value)
            }),
        [field] => set_node_field(node, field, value),
        _ => false,
    }
}

fn apply_to_conditions(
    conditions: Option<&mut [ConditionLine]>,
    range: &ParameterRange,
    rest: &[&str],
    value: f64,
) -> bool {
    let Some(conditions) = conditions else {
        return false;
    };
    let (cond_id, field) = match rest {
        [cond_id, field] => (*cond_id, *field),
        // Path without an embedded id: fall back to the range's conditionId.
        [field] => match range.condition_id.as_deref() {
            Some(cond_id) => (cond_id, *field),
            None => return false,
        },
        _ => return false,
    };
    conditions
        .iter_mut()
        .find(|cond| id_matches(&cond.id, cond_id))
        .is_some_and(|cond| set_condition_field(cond, field, value))
}

/// Condition ids coming back from persisted jobs sometimes carry prefix
/// decorations; match exact first, then either-way prefix.
fn id_matches(actual: &str, wanted: &str) -> bool {
    actual == wanted || actual.starts_with(wanted) || wanted.starts_with(actual)
}

fn set_condition_field(cond: &mut ConditionLine, field: &str, value: f64) -> bool {
    match field {
        "window" => cond.window = coerce_count(value),
        "threshold" => cond.threshold = value,
        "forDays" => cond.for_days = coerce_count(value),
        "rightWindow" => cond.right_window = Some(coerce_count(value)),
        _ => return false,
    }
    true
}

fn set_node_field(node: &mut FlowNode, field: &str, value: f64) -> bool {
    match field {
        "window" => node.window = Some(coerce_count(value)),
        "bottom" => node.bottom = Some(coerce_count(value)),
        "volWindow" => node.vol_window = Some(coerce_count(value)),
        "scaleWindow" => node.scale_window = Some(coerce_count(value)),
        "scaleFrom" => node.scale_from = Some(value),
        "scaleTo" => node.scale_to = Some(value),
        _ => return false,
    }
    true
}

/// Integer-valued parameters coerce through `max(1, floor(x))`.
fn coerce_count(value: f64) -> u32 {
    value.floor().max(1.0) as u32
}

fn substitute_tickers(node: &mut FlowNode, lists: &FxHashMap<String, String>) {
    let substitute = |ticker: &mut String| {
        if let Some(concrete) = lists.get(ticker.as_str()) {
            *ticker = concrete.clone();
        }
    };

    if let Some(positions) = &mut node.positions {
        positions.iter_mut().for_each(substitute);
    }
    for conditions in [
        node.conditions.as_deref_mut(),
        node.entry_conditions.as_deref_mut(),
        node.exit_conditions.as_deref_mut(),
    ]
    .into_iter()
    .flatten()
    {
        for cond in conditions {
            substitute(&mut cond.ticker);
            if let Some(right) = &mut cond.right_ticker {
                substitute(right);
            }
        }
    }
    if let Some(numbered) = &mut node.numbered {
        for item in &mut numbered.items {
            for cond in &mut item.conditions {
                substitute(&mut cond.ticker);
                if let Some(right) = &mut cond.right_ticker {
                    substitute(right);
                }
            }
        }
    }
    if let Some(ticker) = &mut node.scale_ticker {
        substitute(ticker);
    }

    for slot in node.children.values_mut() {
        for child in slot.iter_mut().flatten() {
            substitute_tickers(child, lists);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{ConditionType, NodeKind};
    use crate::indicators::Metric;

    fn range(id: &str, node_id: &str, path: &str, min: f64, max: f64, step: f64) -> ParameterRange {
        ParameterRange {
            id: id.into(),
            kind: RangeKind::Period,
            node_id: node_id.into(),
            condition_id: None,
            path: path.into(),
            current_value: min,
            enabled: true,
            min,
            max,
            step,
        }
    }

    fn template() -> StrategySpec {
        let mut root = FlowNode::new("root", NodeKind::Indicator);
        root.conditions = Some(vec![ConditionLine {
            id: "cond-1".into(),
            cond_type: ConditionType::If,
            metric: Metric::Rsi,
            ticker: "SPY".into(),
            window: 14,
            comparator: Default::default(),
            threshold: 50.0,
            expanded: false,
            right_metric: None,
            right_ticker: None,
            right_window: None,
            for_days: 1,
            date_month: None,
            date_day: None,
            date_to: None,
        }]);
        let mut then = FlowNode::new("p1", NodeKind::Position);
        then.positions = Some(vec!["list-a".into()]);
        root.push_child("then", then);
        StrategySpec::from(root)
    }

    #[test]
    fn discretization_includes_both_ends() {
        let r = range("r", "n", "window", 5.0, 7.0, 1.0);
        assert_eq!(r.values(), vec![5.0, 6.0, 7.0]);
        let r = range("r", "n", "window", 5.0, 8.0, 2.0);
        assert_eq!(r.values(), vec![5.0, 7.0]);
    }

    #[test]
    fn cartesian_product_over_enabled_ranges() {
        let r1 = range("a", "n", "window", 1.0, 2.0, 1.0);
        let r2 = range("b", "n", "threshold", 10.0, 30.0, 10.0);
        let mut disabled = range("c", "n", "window", 0.0, 9.0, 1.0);
        disabled.enabled = false;

        let combos = enumerate_combinations(&[r1, r2, disabled]);
        assert_eq!(combos.len(), 6);
        assert_eq!(combos[0].values, vec![("a".into(), 1.0), ("b".into(), 10.0)]);
        assert_eq!(combos[5].values, vec![("a".into(), 2.0), ("b".into(), 30.0)]);
    }

    #[test]
    fn no_enabled_ranges_yields_one_empty_combination() {
        let combos = enumerate_combinations(&[]);
        assert_eq!(combos.len(), 1);
        assert!(combos[0].is_empty());
    }

    #[test]
    fn empty_combination_is_identity() {
        let t = template();
        let out = apply_combination(&t, &Combination::default(), &[]);
        assert_eq!(t, out);
    }

    #[test]
    fn applies_condition_window_with_prefix_tolerant_id() {
        let t = template();
        let r = range("r", "root", "conditions.cond.window", 5.0, 7.0, 1.0);
        let combo = Combination {
            values: vec![("r".into(), 6.7)],
            ticker_lists: FxHashMap::default(),
        };
        let out = apply_combination(&t, &combo, &[r]);
        // Period coercion: max(1, floor(6.7)) = 6; "cond" prefix matches "cond-1".
        assert_eq!(out.root.conditions.as_ref().unwrap()[0].window, 6);
        // Everything else is untouched.
        assert_eq!(out.root.conditions.as_ref().unwrap()[0].threshold, 50.0);
    }

    #[test]
    fn round_trip_restores_structural_equality() {
        let t = template();
        let r = range("r", "root", "conditions.cond-1.threshold", 0.0, 100.0, 1.0);
        let forward = Combination {
            values: vec![("r".into(), 75.0)],
            ticker_lists: FxHashMap::default(),
        };
        let changed = apply_combination(&t, &forward, std::slice::from_ref(&r));
        assert_ne!(t, changed);
        let back = Combination {
            values: vec![("r".into(), 50.0)],
            ticker_lists: FxHashMap::default(),
        };
        let restored = apply_combination(&changed, &back, &[r]);
        assert_eq!(t, restored);
    }

    #[test]
    fn ticker_lists_substitute_everywhere() {
        let t = template();
        let mut lists = FxHashMap::default();
        lists.insert("list-a".to_string(), "QQQ".to_string());
        let combo = Combination {
            values: Vec::new(),
            ticker_lists: lists,
        };
        let out = apply_combination(&t, &combo, &[]);
        let then = out.root.slot("then");
        assert_eq!(then[0].positions.as_ref().unwrap()[0], "QQQ");
    }

    #[test]
    fn unknown_path_is_skipped_not_fatal() {
        let t = template();
        let r = range("r", "root", "nonsense.path", 1.0, 1.0, 1.0);
        let combo = Combination {
            values: vec![("r".into(), 1.0)],
            ticker_lists: FxHashMap::default(),
        };
        let out = apply_combination(&t, &combo, &[r]);
        assert_eq!(t, out);
    }

    #[test]
    fn range_validation_rejects_bad_bounds() {
        let mut r = range("r", "n", "window", 5.0, 4.0, 1.0);
        assert!(r.validate().is_err());
        r.max = 6.0;
        r.step = 0.0;
        assert!(r.validate().is_err());
        r.step = 1.0;
        assert!(r.validate().is_ok());
    }
}
