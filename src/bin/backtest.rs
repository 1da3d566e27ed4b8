//! Run one strategy file against a parquet price directory and print the
//! resulting metrics (and warnings) as JSON.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use quantflow::data::parquet;
use quantflow::engine::{run_backtest, BacktestOptions, StrategySpec};
use quantflow::sweep::protocol::TreePayload;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (strategy_path, data_dir, options_path) = match args.as_slice() {
        [strategy, data] => (PathBuf::from(strategy), PathBuf::from(data), None),
        [strategy, data, options] => (
            PathBuf::from(strategy),
            PathBuf::from(data),
            Some(PathBuf::from(options)),
        ),
        _ => bail!("usage: backtest <strategy.json> <parquet-dir> [options.json]"),
    };

    let strategy = read_strategy(&strategy_path)?;
    let options = match options_path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<BacktestOptions>(&raw)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => BacktestOptions::default(),
    };

    let db = parquet::load_dir(&data_dir, None)
        .with_context(|| format!("loading price data from {}", data_dir.display()))?;
    tracing::info!(days = db.len(), "price database loaded");

    let report = run_backtest(&db, &strategy, &options)?;

    let summary = serde_json::json!({
        "metrics": report.metrics,
        "warnings": report.warnings,
        "finalEquity": report.equity.last(),
        "days": report.dates.len(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn read_strategy(path: &Path) -> Result<StrategySpec> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let payload: TreePayload =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(payload.into())
}
