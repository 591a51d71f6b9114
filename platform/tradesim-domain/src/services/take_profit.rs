use crate::entities::risk::{TakeProfitKind, TakeProfitPolicy};
use crate::entities::trade::{TakeProfitLevel, Trade};
use crate::services::indicators::return_volatility;
use crate::value_objects::bar::Bar;
use crate::value_objects::side::Side;

#[derive(Debug, Clone, PartialEq)]
pub struct TargetPlan {
    /// Levels ordered nearest to entry first.
    pub levels: Vec<TakeProfitLevel>,
    pub fallback: Option<String>,
}

/// A level reached by the current price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TakeProfitFill {
    pub index: usize,
    pub price: f64,
    pub exit_fraction: f64,
    /// The fill closes everything still open.
    pub closes_remaining: bool,
}

impl TakeProfitFill {
    /// 1-based level number used in exit reasons.
    pub fn level_number(&self) -> usize {
        self.index + 1
    }
}

#[derive(Debug, Clone)]
pub struct TakeProfitEngine {
    policy: TakeProfitPolicy,
}

impl TakeProfitEngine {
    pub fn new(policy: TakeProfitPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &TakeProfitPolicy {
        &self.policy
    }

    pub fn targets(
        &self,
        side: Side,
        entry_price: f64,
        stop_price: f64,
        history: &[Bar],
    ) -> TargetPlan {
        let sign = side.sign();
        let mut fallback = None;
        let mut levels = match &self.policy.kind {
            TakeProfitKind::RiskReward { targets } => {
                let risk = (entry_price - stop_price).abs();
                if !risk.is_finite() || risk <= 0.0 {
                    return TargetPlan {
                        levels: Vec::new(),
                        fallback: Some("zero risk distance".to_string()),
                    };
                }
                targets
                    .iter()
                    .map(|target| {
                        TakeProfitLevel::new(
                            entry_price + sign * target.ratio * risk,
                            target.exit_fraction,
                        )
                    })
                    .collect::<Vec<_>>()
            }
            TakeProfitKind::MultiLevel { levels } => levels
                .iter()
                .map(|level| {
                    TakeProfitLevel::new(entry_price * (1.0 + sign * level.pct), level.exit_fraction)
                })
                .collect(),
            TakeProfitKind::Dynamic {
                base_target,
                max_target,
                volatility_multiplier,
                period,
            } => {
                let volatility = return_volatility(history, *period);
                if volatility.is_none() {
                    fallback = Some(format!(
                        "return volatility({period}) unavailable with {} bars of history",
                        history.len()
                    ));
                }
                let pct =
                    dynamic_target_pct(*base_target, *max_target, *volatility_multiplier, volatility);
                vec![TakeProfitLevel::new(entry_price * (1.0 + sign * pct), 1.0)]
            }
        };

        levels.sort_by(|a, b| {
            let (a, b) = match side {
                Side::Long => (a.price, b.price),
                Side::Short => (b.price, a.price),
            };
            a.total_cmp(&b)
        });
        TargetPlan { levels, fallback }
    }

    /// Nearest unfilled level reached at `price`. At most one level fires per call.
    pub fn check(&self, trade: &Trade, price: f64) -> Option<TakeProfitFill> {
        let levels = trade.take_profit();
        let (index, level) = levels.iter().enumerate().find(|(_, level)| !level.filled)?;
        let reached = match trade.side() {
            Side::Long => price >= level.price,
            Side::Short => price <= level.price,
        };
        if !reached {
            return None;
        }
        let is_last = levels[index + 1..].iter().all(|level| level.filled);
        Some(TakeProfitFill {
            index,
            price: level.price,
            exit_fraction: level.exit_fraction,
            closes_remaining: is_last && self.policy.close_remaining_on_last_level,
        })
    }

    /// Size the fill closes: its fraction of the original size, or the whole remainder.
    pub fn exit_size(trade: &Trade, fill: &TakeProfitFill) -> f64 {
        if fill.closes_remaining {
            trade.remaining_size()
        } else {
            trade.clamp_exit_size(trade.original_size() * fill.exit_fraction)
        }
    }

    pub fn all_filled(trade: &Trade) -> bool {
        trade.take_profit().iter().all(|level| level.filled)
    }
}

/// Volatility-scaled target as a fraction of entry, inside `[base, max]`.
pub fn dynamic_target_pct(
    base_target: f64,
    max_target: f64,
    volatility_multiplier: f64,
    volatility: Option<f64>,
) -> f64 {
    match volatility {
        Some(vol) if vol.is_finite() => (base_target * (1.0 + vol * volatility_multiplier))
            .min(max_target)
            .max(base_target),
        _ => base_target,
    }
}
