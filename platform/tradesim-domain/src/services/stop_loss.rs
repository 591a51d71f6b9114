use crate::entities::risk::StopPolicy;
use crate::entities::trade::Trade;
use crate::services::indicators::atr;
use crate::value_objects::bar::Bar;
use crate::value_objects::side::Side;

#[derive(Debug, Clone, PartialEq)]
pub struct InitialStop {
    pub price: f64,
    /// Reason the ATR stop degraded to a percentage stop.
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct StopLossEngine {
    policy: StopPolicy,
}

impl StopLossEngine {
    pub fn new(policy: StopPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &StopPolicy {
        &self.policy
    }

    pub fn initial_stop(&self, side: Side, entry_price: f64, history: &[Bar]) -> InitialStop {
        match self.policy {
            StopPolicy::Percentage { pct } => InitialStop {
                price: percentage_stop(side, entry_price, pct),
                fallback: None,
            },
            StopPolicy::Trailing { initial_pct, .. } => InitialStop {
                price: percentage_stop(side, entry_price, initial_pct),
                fallback: None,
            },
            StopPolicy::Atr {
                period,
                multiplier,
                fallback_pct,
            } => match atr(history, period) {
                Some(value) if value > 0.0 => InitialStop {
                    price: entry_price - side.sign() * value * multiplier,
                    fallback: None,
                },
                _ => InitialStop {
                    price: percentage_stop(side, entry_price, fallback_pct),
                    fallback: Some(format!(
                        "ATR({period}) unavailable with {} bars of history",
                        history.len()
                    )),
                },
            },
        }
    }

    /// New stop a trailing policy proposes at `price`, once the trade is far enough in
    /// profit. The caller still has to accept it through `Trade::tighten_stop`.
    pub fn trailing_candidate(&self, trade: &Trade, price: f64) -> Option<f64> {
        let StopPolicy::Trailing {
            trailing_pct,
            activation_pct,
            ..
        } = self.policy
        else {
            return None;
        };
        let entry = trade.entry_price();
        if entry <= 0.0 || !price.is_finite() {
            return None;
        }
        let profit = (price - entry) / entry * trade.side().sign();
        if profit < activation_pct {
            return None;
        }
        Some(price * (1.0 - trade.side().sign() * trailing_pct))
    }

    /// Ratchets the trade's stop toward `price`; returns whether it moved.
    pub fn update_trailing(&self, trade: &mut Trade, price: f64) -> bool {
        match self.trailing_candidate(trade, price) {
            Some(candidate) => trade.tighten_stop(candidate),
            None => false,
        }
    }

    pub fn hit(trade: &Trade, price: f64) -> bool {
        match trade.side() {
            Side::Long => price <= trade.stop_price(),
            Side::Short => price >= trade.stop_price(),
        }
    }
}

fn percentage_stop(side: Side, entry_price: f64, pct: f64) -> f64 {
    entry_price * (1.0 - side.sign() * pct)
}
