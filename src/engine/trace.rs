//! Execution trace: which branch every node took, how each condition
//! resolved, what every node contributed, and the altExit state machine's
//! carry-over between days.
//!
//! The collector always exists because altExit state must persist across
//! days even when the caller did not ask for a trace; day records are only
//! materialized when recording is on.

use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::types::Allocation;

/// The two stable branches of a stateful node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BranchState {
    Then,
    Else,
}

impl BranchState {
    pub fn slot(self) -> &'static str {
        match self {
            BranchState::Then => "then",
            BranchState::Else => "else",
        }
    }
}

/// Everything recorded for one evaluated day.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayTrace {
    pub date: Option<NaiveDate>,
    /// node id → slot the evaluator dispatched into.
    pub branches: FxHashMap<String, String>,
    /// condition id → outcome.
    pub conditions: FxHashMap<String, bool>,
    /// node id → the allocation that node returned.
    pub contributions: FxHashMap<String, Allocation>,
    /// altExit node id → state after this day's transition.
    pub alt_states: FxHashMap<String, BranchState>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Trace {
    pub days: Vec<DayTrace>,
}

#[derive(Debug, Default)]
pub struct TraceCollector {
    recording: bool,
    alt_state: FxHashMap<String, BranchState>,
    days: Vec<DayTrace>,
    current: DayTrace,
}

impl TraceCollector {
    pub fn new(recording: bool) -> Self {
        Self {
            recording,
            ..Self::default()
        }
    }

    pub fn begin_day(&mut self, date: NaiveDate) {
        if self.recording {
            self.current = DayTrace {
                date: Some(date),
                ..DayTrace::default()
            };
        }
    }

    pub fn end_day(&mut self) {
        if self.recording {
            self.days.push(std::mem::take(&mut self.current));
        }
    }

    pub fn record_branch(&mut self, node_id: &str, slot: &str) {
        if self.recording {
            self.current
                .branches
                .insert(node_id.to_string(), slot.to_string());
        }
    }

    pub fn record_condition(&mut self, condition_id: &str, outcome: bool) {
        if self.recording {
            self.current
                .conditions
                .insert(condition_id.to_string(), outcome);
        }
    }

    pub fn record_contribution(&mut self, node_id: &str, allocation: &Allocation) {
        if self.recording {
            self.current
                .contributions
                .insert(node_id.to_string(), allocation.clone());
        }
    }

    /// AltExit state carried over from the previous day; `None` on day one.
    pub fn alt_state(&self, node_id: &str) -> Option<BranchState> {
        self.alt_state.get(node_id).copied()
    }

    pub fn set_alt_state(&mut self, node_id: &str, state: BranchState) {
        self.alt_state.insert(node_id.to_string(), state);
        if self.recording {
            self.current.alt_states.insert(node_id.to_string(), state);
        }
    }

    pub fn into_trace(self) -> Option<Trace> {
        self.recording.then_some(Trace { days: self.days })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alt_state_persists_without_recording() {
        let mut collector = TraceCollector::new(false);
        assert_eq!(collector.alt_state("a"), None);
        collector.set_alt_state("a", BranchState::Then);
        collector.end_day();
        assert_eq!(collector.alt_state("a"), Some(BranchState::Then));
        assert!(collector.into_trace().is_none());
    }

    #[test]
    fn recorded_days_capture_branches_and_conditions() {
        let mut collector = TraceCollector::new(true);
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        collector.begin_day(day);
        collector.record_branch("n1", "then");
        collector.record_condition("c1", true);
        collector.end_day();

        let trace = collector.into_trace().unwrap();
        assert_eq!(trace.days.len(), 1);
        assert_eq!(trace.days[0].date, Some(day));
        assert_eq!(trace.days[0].branches.get("n1").map(String::as_str), Some("then"));
        assert_eq!(trace.days[0].conditions.get("c1"), Some(&true));
    }
}
