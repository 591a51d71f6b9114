use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    /// 1-based take-profit level number, nearest level first.
    TakeProfit(usize),
    BacktestEnd,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => f.write_str("stop_loss"),
            ExitReason::TakeProfit(level) => write!(f, "take_profit_{level}"),
            ExitReason::BacktestEnd => f.write_str("backtest_end"),
        }
    }
}

impl Serialize for ExitReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::ExitReason;

    #[test]
    fn renders_reason_labels() {
        assert_eq!(ExitReason::StopLoss.to_string(), "stop_loss");
        assert_eq!(ExitReason::TakeProfit(2).to_string(), "take_profit_2");
        assert_eq!(ExitReason::BacktestEnd.to_string(), "backtest_end");
        assert_eq!(
            serde_json::to_string(&ExitReason::TakeProfit(1)).unwrap(),
            "\"take_profit_1\""
        );
    }
}
