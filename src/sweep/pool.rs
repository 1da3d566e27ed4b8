//! In-process worker pool for sweeps.
//!
//! Tasks are independent backtests over the shared immutable price
//! database, so the only synchronized state is the FIFO cursor over the
//! enumerated combinations, the progress counters, and the result channel.
//! Cancellation is cooperative: workers stop dequeuing, in-flight tasks run
//! to completion, and partial results come back.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use serde::Serialize;

use super::combinator::{apply_combination, enumerate_combinations, Combination, ParameterRange};
use super::{run_branch, BranchResult, TaskOptions, TaskStatus};
use crate::data::PriceDb;
use crate::engine::types::StrategySpec;

/// Snapshot handed to the progress callback at least once per completed
/// task. Counter reads may lag the workers slightly.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub passing: usize,
    pub failed: usize,
}

pub struct WorkerPool {
    workers: usize,
    cancel: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Default sizing: all cores but one, at least one.
    pub fn new() -> Self {
        Self::with_workers(default_worker_count())
    }

    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag shared with the running sweep; set it from any thread to stop
    /// dequeuing. Workers finish their current task, never mid-task.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Expand the sweep and run every branch across the pool. Results come
    /// back sorted by branch id; on cancellation the vector holds the
    /// branches that completed.
    pub fn run_sweep(
        &self,
        db: &PriceDb,
        template: &StrategySpec,
        ranges: &[ParameterRange],
        options: &TaskOptions,
        progress: impl Fn(Progress) + Send + Sync,
    ) -> Vec<BranchResult> {
        let combinations = enumerate_combinations(ranges);
        let total = combinations.len();
        let cursor = AtomicUsize::new(0);
        let counters = Mutex::new(Progress {
            total,
            ..Progress::default()
        });
        let (sender, receiver) = mpsc::channel::<BranchResult>();

        std::thread::scope(|scope| {
            for _ in 0..self.workers.min(total.max(1)) {
                let sender = sender.clone();
                let cursor = &cursor;
                let counters = &counters;
                let combinations = &combinations;
                let cancel = &self.cancel;
                let progress = &progress;
                scope.spawn(move || {
                    loop {
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        let branch_id = cursor.fetch_add(1, Ordering::Relaxed);
                        if branch_id >= total {
                            break;
                        }
                        let result = run_task(
                            db,
                            template,
                            ranges,
                            &combinations[branch_id],
                            options,
                            branch_id,
                        );
                        let ok = result.status == TaskStatus::Success;
                        if sender.send(result).is_err() {
                            break;
                        }
                        let snapshot = {
                            let mut counters = counters.lock().unwrap();
                            counters.completed += 1;
                            if ok {
                                counters.passing += 1;
                            } else {
                                counters.failed += 1;
                            }
                            *counters
                        };
                        progress(snapshot);
                    }
                });
            }
            drop(sender);
        });

        let mut results: Vec<BranchResult> = receiver.try_iter().collect();
        results.sort_by_key(|r| r.branch_id);
        results
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// One branch: apply the combination, run in-sample (and out-of-sample when
/// configured). A panic inside the task is isolated into an error result so
/// the worker survives and the pool keeps capacity.
fn run_task(
    db: &PriceDb,
    template: &StrategySpec,
    ranges: &[ParameterRange],
    combination: &Combination,
    options: &TaskOptions,
    branch_id: usize,
) -> BranchResult {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let concrete = apply_combination(template, combination, ranges);
        run_branch(db, &concrete, options)
    }));

    match outcome {
        Ok(Ok((is_metrics, oos_metrics))) => BranchResult {
            branch_id,
            status: TaskStatus::Success,
            is_metrics: Some(is_metrics),
            oos_metrics,
            error: None,
            combination: Some(combination.clone()),
        },
        Ok(Err(error)) => {
            tracing::warn!(branch_id, %error, "sweep branch failed");
            BranchResult {
                branch_id,
                status: TaskStatus::Error,
                is_metrics: None,
                oos_metrics: None,
                error: Some(error.to_string()),
                combination: Some(combination.clone()),
            }
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "task panicked".to_string());
            tracing::warn!(branch_id, %message, "sweep branch panicked");
            BranchResult {
                branch_id,
                status: TaskStatus::Error,
                is_metrics: None,
                oos_metrics: None,
                error: Some(message),
                combination: Some(combination.clone()),
            }
        }
    }
}
