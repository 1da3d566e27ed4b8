use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use rustc_hash::FxHashMap;

use super::{DataError, PriceDb, TickerSeries};

/// The canonical date column name after normalization.
pub const DATE_COL: &str = "date";

/// Accepted spellings for the date column in source files.
const DATE_ALIASES: &[&str] = &["date", "Date", "quote_date", "timestamp"];

#[derive(Debug, Clone, Copy)]
struct Bar {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    adj_close: f64,
    volume: f64,
}

/// Load `<TICKER>.parquet` files from a directory and align every series to
/// the union of their trading dates. Tickers without a bar on a given date
/// get NaN bars there.
///
/// When `tickers` is given only those symbols are loaded; otherwise every
/// parquet file in the directory becomes a ticker.
pub fn load_dir(dir: &Path, tickers: Option<&[String]>) -> Result<PriceDb, DataError> {
    let mut per_ticker: Vec<(String, BTreeMap<NaiveDate, Bar>)> = Vec::new();

    match tickers {
        Some(list) => {
            for ticker in list {
                let path = dir.join(format!("{ticker}.parquet"));
                if !path.exists() {
                    tracing::warn!(%ticker, "no parquet file, ticker will price as missing");
                    continue;
                }
                per_ticker.push((ticker.to_uppercase(), read_ticker_file(&path)?));
            }
        }
        None => {
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                per_ticker.push((stem.to_uppercase(), read_ticker_file(&path)?));
            }
        }
    }

    if per_ticker.is_empty() {
        return Err(DataError::Empty(dir.display().to_string()));
    }

    let axis: BTreeSet<NaiveDate> = per_ticker
        .iter()
        .flat_map(|(_, bars)| bars.keys().copied())
        .collect();
    let dates: Vec<NaiveDate> = axis.into_iter().collect();
    let n = dates.len();

    tracing::debug!(
        tickers = per_ticker.len(),
        days = n,
        "aligned price database"
    );

    let mut series = FxHashMap::default();
    for (ticker, bars) in per_ticker {
        let mut s = TickerSeries {
            open: vec![f64::NAN; n],
            high: vec![f64::NAN; n],
            low: vec![f64::NAN; n],
            close: vec![f64::NAN; n],
            adj_close: vec![f64::NAN; n],
            volume: vec![f64::NAN; n],
        };
        for (i, date) in dates.iter().enumerate() {
            if let Some(bar) = bars.get(date) {
                s.open[i] = bar.open;
                s.high[i] = bar.high;
                s.low[i] = bar.low;
                s.close[i] = bar.close;
                s.adj_close[i] = bar.adj_close;
                s.volume[i] = bar.volume;
            }
        }
        series.insert(ticker, s);
    }

    PriceDb::new(dates, series)
}

fn read_ticker_file(path: &Path) -> Result<BTreeMap<NaiveDate, Bar>, DataError> {
    let path_str = path.to_string_lossy().to_string();
    let df = LazyFrame::scan_parquet(path_str.as_str().into(), ScanArgsParquet::default())?
        .collect()?;
    let df = normalize_date_column(df)?;

    let dates = date_values(&df)?;
    let open = float_column(&df, &["open", "Open"])?;
    let high = float_column(&df, &["high", "High"])?;
    let low = float_column(&df, &["low", "Low"])?;
    let close = float_column(&df, &["close", "Close"])?;
    // Adjusted close is optional in source files; fall back to close.
    let adj_close = float_column(&df, &["adj_close", "Adj Close", "adjClose", "adjclose"])
        .unwrap_or_else(|_| close.clone());
    let volume = float_column(&df, &["volume", "Volume"])?;

    let mut bars = BTreeMap::new();
    for (i, date) in dates.into_iter().enumerate() {
        let Some(date) = date else { continue };
        bars.insert(
            date,
            Bar {
                open: open[i],
                high: high[i],
                low: low[i],
                close: close[i],
                adj_close: adj_close[i],
                volume: volume[i],
            },
        );
    }
    Ok(bars)
}

/// Normalize whichever date spelling the file uses to a `Date` column named
/// `date`. Datetime and string sources are cast down to day granularity.
pub fn normalize_date_column(df: DataFrame) -> Result<DataFrame, DataError> {
    let src = DATE_ALIASES
        .iter()
        .find(|name| df.column(name).is_ok())
        .copied()
        .ok_or_else(|| {
            DataError::Empty("no date column (tried date/Date/quote_date/timestamp)".to_string())
        })?;

    let out = df
        .lazy()
        .with_column(col(src).cast(DataType::Date).alias(DATE_COL))
        .collect()?;
    if src == DATE_COL {
        Ok(out)
    } else {
        Ok(out.drop(src)?)
    }
}

fn date_values(df: &DataFrame) -> Result<Vec<Option<NaiveDate>>, DataError> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
    let days = df
        .column(DATE_COL)?
        .cast(&DataType::Int32)?
        .i32()?
        .into_iter()
        .map(|d| d.map(|days| epoch + Duration::days(i64::from(days))))
        .collect();
    Ok(days)
}

fn float_column(df: &DataFrame, names: &[&str]) -> Result<Vec<f64>, DataError> {
    let src = names
        .iter()
        .find(|name| df.column(name).is_ok())
        .copied()
        .ok_or_else(|| DataError::Empty(format!("missing column (tried {names:?})")))?;
    let values = df
        .column(src)?
        .cast(&DataType::Float64)?
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect();
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(dates: &[&str], closes: &[f64]) -> DataFrame {
        let n = closes.len();
        df! {
            "Date" => dates.iter().map(|s| (*s).to_string()).collect::<Vec<_>>(),
            "Open" => closes,
            "High" => closes,
            "Low" => closes,
            "Close" => closes,
            "Adj Close" => closes,
            "Volume" => vec![1_000.0; n],
        }
        .unwrap()
        .lazy()
        .with_column(col("Date").cast(DataType::Date))
        .collect()
        .unwrap()
    }

    #[test]
    fn loads_and_aligns_two_tickers() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = frame(&["2024-01-02", "2024-01-03", "2024-01-04"], &[10.0, 11.0, 12.0]);
        // B is missing Jan 3 — its bar there must come back NaN.
        let mut b = frame(&["2024-01-02", "2024-01-04"], &[20.0, 22.0]);

        for (name, frame) in [("AAA", &mut a), ("BBB", &mut b)] {
            let file = std::fs::File::create(dir.path().join(format!("{name}.parquet"))).unwrap();
            ParquetWriter::new(file).finish(frame).unwrap();
        }

        let db = load_dir(dir.path(), None).unwrap();
        assert_eq!(db.len(), 3);
        assert_eq!(db.adj_close("AAA", 1), Some(11.0));
        assert_eq!(db.adj_close("BBB", 1), None);
        assert_eq!(db.adj_close("BBB", 2), Some(22.0));
    }

    #[test]
    fn missing_directory_contents_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_dir(dir.path(), None);
        assert!(matches!(err, Err(DataError::Empty(_))));
    }
}
