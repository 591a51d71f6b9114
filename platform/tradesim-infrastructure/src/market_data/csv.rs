use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;
use tradesim_domain::repositories::market_data::{BarQuery, MarketDataRepository};
use tradesim_domain::services::ohlcv::{data_quality_from_bars, DataQualityReport};
use tradesim_domain::value_objects::bar::Bar;

pub const DEFAULT_FILE_PATTERN: &str = "{symbol}.csv";

#[derive(Debug, Deserialize)]
struct OhlcvRecord {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Reads one CSV per symbol from a directory. Rows keep their file order; nothing is
/// sorted or deduplicated here.
#[derive(Debug, Clone)]
pub struct CsvMarketDataRepository {
    dir: PathBuf,
    file_pattern: String,
}

impl CsvMarketDataRepository {
    pub fn new(dir: impl AsRef<Path>, file_pattern: Option<&str>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            file_pattern: file_pattern.unwrap_or(DEFAULT_FILE_PATTERN).to_string(),
        }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(self.file_pattern.replace("{symbol}", symbol))
    }
}

impl MarketDataRepository for CsvMarketDataRepository {
    fn load_bars(&self, query: &BarQuery) -> Result<(Vec<Bar>, DataQualityReport), String> {
        metrics::counter!("tradesim.infra.market_data.load_calls_total").increment(1);
        let path = self.path_for(&query.symbol);
        let rows = load_csv(&path)?;
        let bars: Vec<Bar> = rows
            .into_iter()
            .filter(|bar| query.contains(bar.timestamp))
            .collect();
        let report = data_quality_from_bars(&bars, query.expected_step_seconds);
        debug!(
            symbol = %query.symbol,
            path = %path.display(),
            rows = report.rows,
            "loaded OHLCV CSV"
        );
        Ok((bars, report))
    }
}

pub fn load_csv(path: &Path) -> Result<Vec<Bar>, String> {
    let file = File::open(path)
        .map_err(|err| format!("failed to open OHLCV CSV {}: {}", path.display(), err))?;
    let mut reader = ::csv::ReaderBuilder::new().trim(::csv::Trim::All).from_reader(file);

    let mut bars = Vec::new();
    for (idx, result) in reader.deserialize::<OhlcvRecord>().enumerate() {
        let record = result.map_err(|err| {
            format!(
                "failed to parse CSV row {} in {}: {}",
                idx + 1,
                path.display(),
                err
            )
        })?;
        bars.push(Bar {
            timestamp: parse_timestamp(&record.timestamp)?,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
        });
    }
    Ok(bars)
}

fn parse_timestamp(value: &str) -> Result<i64, String> {
    if let Ok(seconds) = value.parse::<i64>() {
        return Ok(seconds);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        let dt: DateTime<Utc> = Utc.from_utc_datetime(&naive);
        return Ok(dt.timestamp());
    }

    Err(format!("unsupported timestamp format: {}", value))
}
