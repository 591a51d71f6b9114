use crate::entities::risk::{KellyParams, SizingLimits, SizingMethod, SizingPolicy};
use crate::entities::trade::Trade;

/// Ledger statistics consumed by fractional Kelly sizing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeStats {
    pub closed_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    /// Mean net P&L of losing trades; breakeven trades count as neither wins nor losses.
    pub avg_loss: f64,
}

impl TradeStats {
    pub fn from_trades(trades: &[Trade]) -> Option<Self> {
        if trades.is_empty() {
            return None;
        }
        let mut wins = Vec::new();
        let mut losses = Vec::new();
        for trade in trades {
            let pnl = trade.net_pnl();
            if pnl > 0.0 {
                wins.push(pnl);
            } else if pnl < 0.0 {
                losses.push(pnl);
            }
        }
        Some(Self {
            closed_trades: trades.len(),
            win_rate: wins.len() as f64 / trades.len() as f64,
            avg_win: mean(&wins),
            avg_loss: mean(&losses),
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sizing {
    pub size: f64,
    /// Fraction of capital put at risk.
    pub risk_fraction: f64,
    /// Set when Kelly sizing could not use the ledger statistics.
    pub fallback: Option<&'static str>,
}

/// Dollar amount lost if the position is stopped out at `stop_price`.
pub fn risk_amount(size: f64, entry_price: f64, stop_price: f64) -> f64 {
    size * (entry_price - stop_price).abs()
}

#[derive(Debug, Clone, Copy)]
pub struct PositionSizer {
    policy: SizingPolicy,
}

impl PositionSizer {
    pub fn new(policy: SizingPolicy) -> Self {
        Self { policy }
    }

    pub fn limits(&self) -> &SizingLimits {
        &self.policy.limits
    }

    pub fn size(
        &self,
        capital: f64,
        entry_price: f64,
        stop_price: f64,
        leverage: f64,
        stats: Option<&TradeStats>,
    ) -> Sizing {
        let (risk_fraction, fallback) = match self.policy.method {
            SizingMethod::FixedRisk { risk_per_trade } => (risk_per_trade, None),
            SizingMethod::Kelly(params) => kelly_fraction(&params, stats),
        };
        Sizing {
            size: fixed_fraction_size(capital, entry_price, stop_price, leverage, risk_fraction),
            risk_fraction,
            fallback,
        }
    }

    /// Applies exchange-style order limits: zero below the minimum, capped at the maximum,
    /// and never more margin than `capital`.
    pub fn validate(&self, size: f64, entry_price: f64, capital: f64, leverage: f64) -> f64 {
        let limits = &self.policy.limits;
        if !size.is_finite() || size < limits.min_order_size || size <= 0.0 {
            return 0.0;
        }
        let mut size = size;
        if let Some(max) = limits.max_order_size {
            size = size.min(max);
        }
        if entry_price > 0.0 && leverage > 0.0 {
            let required = size * entry_price / leverage;
            if required > capital {
                size = (capital * leverage / entry_price).max(0.0);
            }
        }
        size
    }

    /// Zero once every slot is used; past half the slots the size shrinks linearly.
    pub fn adjust_for_open_positions(&self, size: f64, open_positions: usize) -> f64 {
        let Some(max) = self.policy.limits.max_open_trades else {
            return size;
        };
        if open_positions >= max {
            return 0.0;
        }
        let open = open_positions as f64;
        let max = max as f64;
        if open > max / 2.0 {
            size * (1.0 - open / (max * 2.0))
        } else {
            size
        }
    }
}

fn fixed_fraction_size(
    capital: f64,
    entry_price: f64,
    stop_price: f64,
    leverage: f64,
    risk_fraction: f64,
) -> f64 {
    let price_risk = (entry_price - stop_price).abs();
    if !price_risk.is_finite() || price_risk <= 0.0 || entry_price <= 0.0 || capital <= 0.0 {
        return 0.0;
    }
    let size = capital * risk_fraction / price_risk * leverage;
    let cap = capital * leverage / entry_price;
    size.min(cap)
}

fn kelly_fraction(
    params: &KellyParams,
    stats: Option<&TradeStats>,
) -> (f64, Option<&'static str>) {
    let Some(stats) = stats.filter(|stats| stats.closed_trades >= params.min_trades) else {
        return (params.risk_per_trade, Some("insufficient trade statistics"));
    };
    if stats.win_rate <= 0.0 || stats.win_rate >= 1.0 {
        return (params.risk_per_trade, Some("win rate outside (0, 1)"));
    }
    if stats.avg_loss == 0.0 || stats.avg_win <= 0.0 {
        return (params.risk_per_trade, Some("degenerate win/loss averages"));
    }
    let payoff = stats.avg_win / stats.avg_loss.abs();
    let kelly = stats.win_rate - (1.0 - stats.win_rate) / payoff;
    let fraction = (kelly * params.kelly_fraction).clamp(params.min_fraction, params.max_fraction);
    (fraction, None)
}
