use crate::value_objects::bar::Bar;
use serde::Serialize;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DataQualityReport {
    pub rows: usize,
    pub duplicates: usize,
    pub gaps: usize,
    pub out_of_order: usize,
    pub invalid_close: usize,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
    pub first_gap: Option<i64>,
    pub first_duplicate: Option<i64>,
    pub first_out_of_order: Option<i64>,
    pub first_invalid_close: Option<i64>,
    pub max_gap_seconds: Option<i64>,
}

impl DataQualityReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates == 0 && self.out_of_order == 0 && self.invalid_close == 0
    }
}

pub fn data_quality_from_bars(
    bars: &[Bar],
    expected_step_seconds: Option<i64>,
) -> DataQualityReport {
    let mut report = DataQualityReport {
        rows: bars.len(),
        ..DataQualityReport::default()
    };
    let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
        return report;
    };
    report.first_timestamp = Some(first.timestamp);
    report.last_timestamp = Some(last.timestamp);

    let mut last_ts: Option<i64> = None;
    let mut max_gap: Option<i64> = None;

    for bar in bars {
        let ts = bar.timestamp;

        if !bar.close.is_finite() || bar.close <= 0.0 {
            report.invalid_close += 1;
            if report.first_invalid_close.is_none() {
                report.first_invalid_close = Some(ts);
            }
        }

        if let Some(prev) = last_ts {
            if ts == prev {
                report.duplicates += 1;
                if report.first_duplicate.is_none() {
                    report.first_duplicate = Some(ts);
                }
            } else if ts < prev {
                report.out_of_order += 1;
                if report.first_out_of_order.is_none() {
                    report.first_out_of_order = Some(ts);
                }
            } else if let Some(step) = expected_step_seconds.filter(|step| *step > 0) {
                let diff = ts - prev;
                if diff > step {
                    report.gaps += 1;
                    if report.first_gap.is_none() {
                        report.first_gap = Some(ts);
                    }
                    max_gap = Some(max_gap.map_or(diff, |current| current.max(diff)));
                }
            }
        }

        last_ts = Some(ts);
    }

    report.max_gap_seconds = max_gap;
    report
}

/// Rejects a series the simulator cannot replay: empty, non-increasing timestamps, or
/// prices that are not finite and positive.
pub fn validate_series(symbol: &str, bars: &[Bar]) -> Result<(), String> {
    if bars.is_empty() {
        return Err(format!("no bars for symbol {symbol}"));
    }
    for pair in bars.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(format!(
                "timestamps for {symbol} must be strictly increasing ({} followed by {})",
                pair[0].timestamp, pair[1].timestamp
            ));
        }
    }
    for bar in bars {
        let prices = [bar.open, bar.high, bar.low, bar.close];
        if prices.iter().any(|price| !price.is_finite() || *price <= 0.0) {
            return Err(format!(
                "invalid price for {symbol} at timestamp {}",
                bar.timestamp
            ));
        }
        if bar.high < bar.low {
            return Err(format!(
                "high below low for {symbol} at timestamp {}",
                bar.timestamp
            ));
        }
    }
    Ok(())
}
