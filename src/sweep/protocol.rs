//! JSON-line wire protocol for subprocess workers.
//!
//! A worker reads one init line, answers `{"status":"ready"}` once its
//! price database is loaded, then serves one task per input line until a
//! `{"command":"shutdown"}` line arrives. Responses go to stdout one per
//! line; anything diagnostic belongs on stderr so the response stream stays
//! machine-parseable.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::TaskOptions;
use crate::engine::types::{FlowNode, StrategySpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInit {
    pub parquet_dir: PathBuf,
    /// Restrict loading to these tickers; omit to load the directory.
    #[serde(default)]
    pub tickers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ready {
    pub status: String,
}

impl Ready {
    pub fn ok() -> Self {
        Self {
            status: "ready".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerCommand {
    Shutdown,
}

/// The tree payload accepts either a full strategy (root + callables) or a
/// bare root node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreePayload {
    Spec(StrategySpec),
    Node(Box<FlowNode>),
}

impl From<TreePayload> for StrategySpec {
    fn from(payload: TreePayload) -> Self {
        match payload {
            TreePayload::Spec(spec) => spec,
            TreePayload::Node(node) => StrategySpec::from(*node),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerTask {
    pub branch_id: usize,
    pub tree: TreePayload,
    #[serde(default)]
    pub options: TaskOptions,
}

/// One input line: either a control command or a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerRequest {
    Command { command: WorkerCommand },
    Task(WorkerTask),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_line_parses_as_command() {
        let line = r#"{"command":"shutdown"}"#;
        let request: WorkerRequest = serde_json::from_str(line).unwrap();
        assert!(matches!(
            request,
            WorkerRequest::Command {
                command: WorkerCommand::Shutdown
            }
        ));
    }

    #[test]
    fn task_line_with_bare_node_tree() {
        let line = r#"{
            "branchId": 3,
            "tree": {"id": "p", "kind": "position", "positions": ["SPY"]},
            "options": {"mode": "CC", "costBps": 5.0}
        }"#;
        let request: WorkerRequest = serde_json::from_str(line).unwrap();
        let WorkerRequest::Task(task) = request else {
            panic!("expected task");
        };
        assert_eq!(task.branch_id, 3);
        assert_eq!(task.options.cost_bps, 5.0);
        let spec: StrategySpec = task.tree.into();
        assert_eq!(spec.root.id, "p");
    }

    #[test]
    fn task_line_with_full_strategy_tree() {
        let line = r#"{
            "branchId": 0,
            "tree": {"root": {"id": "r", "kind": "basic"}, "callables": {}}
        }"#;
        let request: WorkerRequest = serde_json::from_str(line).unwrap();
        let WorkerRequest::Task(task) = request else {
            panic!("expected task");
        };
        let spec: StrategySpec = task.tree.into();
        assert_eq!(spec.root.id, "r");
    }
}
