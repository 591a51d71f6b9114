use crate::services::ohlcv::DataQualityReport;
use crate::value_objects::bar::Bar;

#[derive(Debug, Clone)]
pub struct BarQuery {
    pub symbol: String,
    /// Inclusive epoch-second bounds; `None` leaves that side open.
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub expected_step_seconds: Option<i64>,
}

impl BarQuery {
    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            start: None,
            end: None,
            expected_step_seconds: None,
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.start.map_or(true, |start| timestamp >= start)
            && self.end.map_or(true, |end| timestamp <= end)
    }
}

/// Source of historical bars. Implementations return rows in stored order.
pub trait MarketDataRepository {
    fn load_bars(&self, query: &BarQuery) -> Result<(Vec<Bar>, DataQualityReport), String>;
}
