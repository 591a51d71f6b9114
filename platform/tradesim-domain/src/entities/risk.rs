use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KellyParams {
    /// Fixed-fractional risk used whenever the statistics are missing or invalid.
    pub risk_per_trade: f64,
    pub kelly_fraction: f64,
    pub min_fraction: f64,
    pub max_fraction: f64,
    /// Closed trades required before the ledger statistics are trusted.
    pub min_trades: usize,
}

impl Default for KellyParams {
    fn default() -> Self {
        Self {
            risk_per_trade: 0.02,
            kelly_fraction: 0.25,
            min_fraction: 0.01,
            max_fraction: 0.10,
            min_trades: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SizingMethod {
    FixedRisk { risk_per_trade: f64 },
    Kelly(KellyParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SizingLimits {
    pub min_order_size: f64,
    pub max_order_size: Option<f64>,
    pub max_open_trades: Option<usize>,
}

impl Default for SizingLimits {
    fn default() -> Self {
        Self {
            min_order_size: 0.001,
            max_order_size: None,
            max_open_trades: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SizingPolicy {
    pub method: SizingMethod,
    pub limits: SizingLimits,
}

impl Default for SizingPolicy {
    fn default() -> Self {
        Self {
            method: SizingMethod::FixedRisk {
                risk_per_trade: 0.02,
            },
            limits: SizingLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StopPolicy {
    Percentage {
        pct: f64,
    },
    Atr {
        period: usize,
        multiplier: f64,
        fallback_pct: f64,
    },
    Trailing {
        /// Distance of the initial stop from entry.
        initial_pct: f64,
        trailing_pct: f64,
        /// Unrealized profit (fraction of entry) required before trailing starts.
        activation_pct: f64,
    },
}

impl Default for StopPolicy {
    fn default() -> Self {
        StopPolicy::Percentage { pct: 0.02 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RewardTarget {
    pub ratio: f64,
    pub exit_fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentTarget {
    pub pct: f64,
    pub exit_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TakeProfitKind {
    RiskReward {
        targets: Vec<RewardTarget>,
    },
    MultiLevel {
        levels: Vec<PercentTarget>,
    },
    Dynamic {
        base_target: f64,
        max_target: f64,
        volatility_multiplier: f64,
        period: usize,
    },
}

impl TakeProfitKind {
    pub fn single_risk_reward(ratio: f64) -> Self {
        TakeProfitKind::RiskReward {
            targets: vec![RewardTarget {
                ratio,
                exit_fraction: 1.0,
            }],
        }
    }

    pub fn default_levels() -> Vec<PercentTarget> {
        vec![
            PercentTarget {
                pct: 0.02,
                exit_fraction: 0.33,
            },
            PercentTarget {
                pct: 0.04,
                exit_fraction: 0.33,
            },
            PercentTarget {
                pct: 0.06,
                exit_fraction: 0.34,
            },
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TakeProfitPolicy {
    pub kind: TakeProfitKind,
    /// When the last unfilled level fires, close whatever is still open.
    pub close_remaining_on_last_level: bool,
}

impl Default for TakeProfitPolicy {
    fn default() -> Self {
        Self {
            kind: TakeProfitKind::single_risk_reward(2.0),
            close_remaining_on_last_level: true,
        }
    }
}

/// Sizing, stop and take-profit rules fixed for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RiskPolicy {
    pub sizing: SizingPolicy,
    pub stop: StopPolicy,
    pub take_profit: TakeProfitPolicy,
}

impl RiskPolicy {
    pub fn validate(&self) -> Result<(), String> {
        match self.sizing.method {
            SizingMethod::FixedRisk { risk_per_trade } => {
                check_fraction("sizing.risk_per_trade", risk_per_trade)?;
            }
            SizingMethod::Kelly(params) => {
                check_fraction("sizing.risk_per_trade", params.risk_per_trade)?;
                check_fraction("sizing.kelly_fraction", params.kelly_fraction)?;
                check_fraction("sizing.kelly_min_fraction", params.min_fraction)?;
                check_fraction("sizing.kelly_max_fraction", params.max_fraction)?;
                if params.min_fraction > params.max_fraction {
                    return Err(
                        "sizing.kelly_min_fraction must be <= sizing.kelly_max_fraction"
                            .to_string(),
                    );
                }
            }
        }

        let limits = &self.sizing.limits;
        check_non_negative("sizing.min_order_size", limits.min_order_size)?;
        if let Some(max) = limits.max_order_size {
            check_positive("sizing.max_order_size", max)?;
            if max < limits.min_order_size {
                return Err("sizing.max_order_size must be >= sizing.min_order_size".to_string());
            }
        }
        if limits.max_open_trades == Some(0) {
            return Err("sizing.max_open_trades must be >= 1".to_string());
        }

        match self.stop {
            StopPolicy::Percentage { pct } => check_fraction("stop.value", pct)?,
            StopPolicy::Atr {
                period,
                multiplier,
                fallback_pct,
            } => {
                if period == 0 {
                    return Err("stop.atr_period must be >= 1".to_string());
                }
                check_positive("stop.multiplier", multiplier)?;
                check_fraction("stop.value", fallback_pct)?;
            }
            StopPolicy::Trailing {
                initial_pct,
                trailing_pct,
                activation_pct,
            } => {
                check_fraction("stop.initial_stop", initial_pct)?;
                check_fraction("stop.trailing_pct", trailing_pct)?;
                check_non_negative("stop.activation_pct", activation_pct)?;
            }
        }

        match &self.take_profit.kind {
            TakeProfitKind::RiskReward { targets } => {
                if targets.is_empty() {
                    return Err("take_profit.partial_exits cannot be empty".to_string());
                }
                for target in targets {
                    check_positive("take_profit.ratio", target.ratio)?;
                    check_exit_fraction(target.exit_fraction)?;
                }
            }
            TakeProfitKind::MultiLevel { levels } => {
                if levels.is_empty() {
                    return Err("take_profit.levels cannot be empty".to_string());
                }
                for level in levels {
                    check_positive("take_profit.levels.percentage", level.pct)?;
                    check_exit_fraction(level.exit_fraction)?;
                }
            }
            TakeProfitKind::Dynamic {
                base_target,
                max_target,
                volatility_multiplier,
                period,
            } => {
                check_positive("take_profit.base_target", *base_target)?;
                check_positive("take_profit.max_target", *max_target)?;
                check_non_negative("take_profit.volatility_multiplier", *volatility_multiplier)?;
                if max_target < base_target {
                    return Err(
                        "take_profit.max_target must be >= take_profit.base_target".to_string()
                    );
                }
                if *period < 2 {
                    return Err("take_profit.volatility_period must be >= 2".to_string());
                }
            }
        }

        Ok(())
    }
}

fn check_positive(name: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("{name} must be finite and > 0 (got {value})"));
    }
    Ok(())
}

fn check_non_negative(name: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{name} must be finite and >= 0 (got {value})"));
    }
    Ok(())
}

fn check_fraction(name: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() || value <= 0.0 || value >= 1.0 {
        return Err(format!("{name} must be in (0, 1) (got {value})"));
    }
    Ok(())
}

fn check_exit_fraction(value: f64) -> Result<(), String> {
    if !value.is_finite() || value <= 0.0 || value > 1.0 {
        return Err(format!(
            "take-profit exit fraction must be in (0, 1] (got {value})"
        ));
    }
    Ok(())
}
