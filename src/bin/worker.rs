//! Long-lived subprocess worker.
//!
//! Protocol, one JSON object per line:
//! - stdin line 1: `{"parquetDir": "...", "tickers": [...]?}`
//! - stdout line 1: `{"status": "ready"}` once the price DB is warm
//! - then per task line `{branchId, tree, options}` → one response line
//!   `{branchId, status, isMetrics?, oosMetrics?, error?}`
//! - `{"command": "shutdown"}` flushes and exits.
//!
//! All logging goes to stderr; stdout carries nothing but protocol lines.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use quantflow::data::parquet;
use quantflow::engine::StrategySpec;
use quantflow::sweep::protocol::{Ready, WorkerCommand, WorkerInit, WorkerRequest};
use quantflow::sweep::{run_branch, BranchResult, TaskStatus};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let init_line = lines
        .next()
        .context("worker started with no init line")??;
    let init: WorkerInit = serde_json::from_str(&init_line).context("parsing init line")?;

    let db = parquet::load_dir(&init.parquet_dir, init.tickers.as_deref())
        .with_context(|| format!("loading {}", init.parquet_dir.display()))?;
    tracing::info!(days = db.len(), "worker price database loaded");

    writeln!(out, "{}", serde_json::to_string(&Ready::ok())?)?;
    out.flush()?;

    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: WorkerRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(error) => {
                tracing::error!(%error, "unparseable request line");
                continue;
            }
        };

        match request {
            WorkerRequest::Command {
                command: WorkerCommand::Shutdown,
            } => {
                tracing::info!("shutdown received");
                break;
            }
            WorkerRequest::Task(task) => {
                let branch_id = task.branch_id;
                let strategy: StrategySpec = task.tree.into();
                let response = match run_branch(&db, &strategy, &task.options) {
                    Ok((is_metrics, oos_metrics)) => BranchResult {
                        branch_id,
                        status: TaskStatus::Success,
                        is_metrics: Some(is_metrics),
                        oos_metrics,
                        error: None,
                        combination: None,
                    },
                    Err(error) => {
                        tracing::warn!(branch_id, %error, "task failed");
                        BranchResult {
                            branch_id,
                            status: TaskStatus::Error,
                            is_metrics: None,
                            oos_metrics: None,
                            error: Some(error.to_string()),
                            combination: None,
                        }
                    }
                };
                writeln!(out, "{}", serde_json::to_string(&response)?)?;
                out.flush()?;
            }
        }
    }

    Ok(())
}
