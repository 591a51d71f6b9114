use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsConfig {
    /// Annual risk-free rate as a fraction.
    pub risk_free_rate: f64,
    /// Bars per year used to annualize per-bar statistics.
    pub periods_per_year: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.0,
            periods_per_year: 365.0,
        }
    }
}

impl MetricsConfig {
    pub fn per_period_risk_free(&self) -> f64 {
        if self.periods_per_year <= 0.0 {
            return 0.0;
        }
        (1.0 + self.risk_free_rate).powf(1.0 / self.periods_per_year) - 1.0
    }
}

/// Run summary derived once from the closed-trade ledger and the equity curve.
///
/// `profit_factor` is `+inf` when there were winners and no losers; serde_json writes
/// that as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub net_profit: f64,
    pub total_return: f64,
    pub total_return_pct: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub annualized_volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub recovery_factor: f64,
    pub calmar: f64,
    pub avg_trade_duration_hours: f64,
    pub bars_processed: usize,
}

impl PerformanceReport {
    /// Looks a metric up by its field name, for leaderboards and walk-forward selection.
    pub fn metric(&self, name: &str) -> Option<f64> {
        let value = match name {
            "initial_capital" => self.initial_capital,
            "final_equity" => self.final_equity,
            "net_profit" => self.net_profit,
            "total_return" => self.total_return,
            "total_return_pct" => self.total_return_pct,
            "annualized_return" => self.annualized_return,
            "volatility" => self.volatility,
            "annualized_volatility" => self.annualized_volatility,
            "sharpe" => self.sharpe,
            "sortino" => self.sortino,
            "max_drawdown" => self.max_drawdown,
            "max_drawdown_pct" => self.max_drawdown_pct,
            "total_trades" => self.total_trades as f64,
            "winning_trades" => self.winning_trades as f64,
            "losing_trades" => self.losing_trades as f64,
            "win_rate" => self.win_rate,
            "avg_win" => self.avg_win,
            "avg_loss" => self.avg_loss,
            "avg_win_pct" => self.avg_win_pct,
            "avg_loss_pct" => self.avg_loss_pct,
            "largest_win" => self.largest_win,
            "largest_loss" => self.largest_loss,
            "profit_factor" => self.profit_factor,
            "expectancy" => self.expectancy,
            "recovery_factor" => self.recovery_factor,
            "calmar" => self.calmar,
            "avg_trade_duration_hours" => self.avg_trade_duration_hours,
            "bars_processed" => self.bars_processed as f64,
            _ => return None,
        };
        Some(value)
    }
}
