//! Enumerate a parameter sweep and run it across the worker pool with a
//! progress bar, printing the per-branch results as JSON lines.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use quantflow::data::parquet;
use quantflow::engine::StrategySpec;
use quantflow::sweep::protocol::TreePayload;
use quantflow::sweep::{enumerate_combinations, ParameterRange, TaskOptions, WorkerPool};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (strategy_path, ranges_path, data_dir, options_path) = match args.as_slice() {
        [strategy, ranges, data] => (
            PathBuf::from(strategy),
            PathBuf::from(ranges),
            PathBuf::from(data),
            None,
        ),
        [strategy, ranges, data, options] => (
            PathBuf::from(strategy),
            PathBuf::from(ranges),
            PathBuf::from(data),
            Some(PathBuf::from(options)),
        ),
        _ => bail!("usage: sweep <strategy.json> <ranges.json> <parquet-dir> [options.json]"),
    };

    let raw = std::fs::read_to_string(&strategy_path)
        .with_context(|| format!("reading {}", strategy_path.display()))?;
    let payload: TreePayload = serde_json::from_str(&raw)?;
    let strategy: StrategySpec = payload.into();

    let raw = std::fs::read_to_string(&ranges_path)
        .with_context(|| format!("reading {}", ranges_path.display()))?;
    let ranges: Vec<ParameterRange> = serde_json::from_str(&raw)?;

    let options = match options_path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<TaskOptions>(&raw)?
        }
        None => TaskOptions::default(),
    };

    let db = parquet::load_dir(&data_dir, None)
        .with_context(|| format!("loading price data from {}", data_dir.display()))?;

    let total = enumerate_combinations(&ranges).len() as u64;
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({msg})",
        )?
        .progress_chars("##-"),
    );

    let pool = WorkerPool::new();
    let results = pool.run_sweep(&db, &strategy, &ranges, &options, |progress| {
        bar.set_position(progress.completed as u64);
        bar.set_message(format!(
            "{} ok / {} failed",
            progress.passing, progress.failed
        ));
    });
    bar.finish();

    for result in &results {
        println!("{}", serde_json::to_string(result)?);
    }
    tracing::info!(branches = results.len(), "sweep complete");
    Ok(())
}
