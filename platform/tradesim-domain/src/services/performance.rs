use crate::entities::metrics::{MetricsConfig, PerformanceReport};
use crate::entities::trade::Trade;
use crate::value_objects::equity_point::EquityPoint;

const SECONDS_PER_DAY: i64 = 86_400;
const DAYS_PER_YEAR: f64 = 365.25;

/// Simple per-bar returns of an equity series; samples after a non-positive value are skipped.
pub fn period_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .filter(|pair| pair[0] > 0.0)
        .map(|pair| pair[1] / pair[0] - 1.0)
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values
        .iter()
        .map(|value| {
            let diff = value - m;
            diff * diff
        })
        .sum::<f64>()
        / values.len() as f64;
    var.sqrt()
}

pub fn sharpe_ratio(returns: &[f64], config: &MetricsConfig) -> f64 {
    let rf = config.per_period_risk_free();
    let excess: Vec<f64> = returns.iter().map(|ret| ret - rf).collect();
    let std = std_dev(&excess);
    if excess.is_empty() || std == 0.0 {
        return 0.0;
    }
    mean(&excess) / std * config.periods_per_year.max(0.0).sqrt()
}

pub fn sortino_ratio(returns: &[f64], config: &MetricsConfig) -> f64 {
    let rf = config.per_period_risk_free();
    let excess: Vec<f64> = returns.iter().map(|ret| ret - rf).collect();
    let downside: Vec<f64> = excess.iter().copied().filter(|ret| *ret < 0.0).collect();
    if downside.is_empty() {
        return 0.0;
    }
    let downside_dev = std_dev(&downside);
    if downside_dev == 0.0 {
        return 0.0;
    }
    mean(&excess) / downside_dev * config.periods_per_year.max(0.0).sqrt()
}

/// Largest peak-to-trough decline as `(dollars, percent of the running peak)`.
pub fn max_drawdown(equity: &[f64]) -> (f64, f64) {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    let mut max_dd_pct = 0.0_f64;
    for value in equity {
        peak = peak.max(*value);
        let dd = peak - value;
        max_dd = max_dd.max(dd);
        if peak > 0.0 {
            max_dd_pct = max_dd_pct.max(dd / peak * 100.0);
        }
    }
    (max_dd, max_dd_pct)
}

pub fn profit_factor(gross_profit: f64, gross_loss: f64) -> f64 {
    let gross_loss = gross_loss.abs();
    if gross_loss == 0.0 {
        if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    } else {
        gross_profit / gross_loss
    }
}

/// Compound annual growth rate as a fraction; zero when the span is shorter than a day.
pub fn annualized_return(initial: f64, final_equity: f64, first_ts: i64, last_ts: i64) -> f64 {
    let days = (last_ts - first_ts) / SECONDS_PER_DAY;
    if days <= 0 || initial <= 0.0 || final_equity <= 0.0 {
        return 0.0;
    }
    let years = days as f64 / DAYS_PER_YEAR;
    (final_equity / initial).powf(1.0 / years) - 1.0
}

pub fn compute_report(
    trades: &[Trade],
    equity: &[EquityPoint],
    initial_capital: f64,
    final_equity: f64,
    config: &MetricsConfig,
) -> PerformanceReport {
    let values: Vec<f64> = equity.iter().map(|point| point.equity).collect();
    let returns = period_returns(&values);
    let volatility = std_dev(&returns);
    let (max_dd, max_dd_pct) = max_drawdown(&values);

    let net_profit = final_equity - initial_capital;
    let total_return = if initial_capital > 0.0 {
        final_equity / initial_capital - 1.0
    } else {
        0.0
    };
    let annualized = match (equity.first(), equity.last()) {
        (Some(first), Some(last)) => annualized_return(
            initial_capital,
            final_equity,
            first.timestamp,
            last.timestamp,
        ),
        _ => 0.0,
    };

    let wins: Vec<&Trade> = trades.iter().filter(|t| t.net_pnl() > 0.0).collect();
    let losses: Vec<&Trade> = trades.iter().filter(|t| t.net_pnl() < 0.0).collect();
    let win_pnls: Vec<f64> = wins.iter().map(|t| t.net_pnl()).collect();
    let loss_pnls: Vec<f64> = losses.iter().map(|t| t.net_pnl()).collect();
    let gross_profit: f64 = win_pnls.iter().sum();
    let gross_loss: f64 = loss_pnls.iter().sum();

    let win_rate = if trades.is_empty() {
        0.0
    } else {
        wins.len() as f64 / trades.len() as f64
    };
    let avg_win = mean(&win_pnls);
    let avg_loss = mean(&loss_pnls);
    let expectancy = if trades.is_empty() {
        0.0
    } else {
        win_rate * avg_win - (1.0 - win_rate) * avg_loss.abs()
    };

    let durations: Vec<f64> = trades
        .iter()
        .filter_map(|t| t.holding_seconds())
        .map(|secs| secs as f64 / 3600.0)
        .collect();

    PerformanceReport {
        initial_capital,
        final_equity,
        net_profit,
        total_return,
        total_return_pct: total_return * 100.0,
        annualized_return: annualized,
        volatility,
        annualized_volatility: volatility * config.periods_per_year.max(0.0).sqrt(),
        sharpe: sharpe_ratio(&returns, config),
        sortino: sortino_ratio(&returns, config),
        max_drawdown: max_dd,
        max_drawdown_pct: max_dd_pct,
        total_trades: trades.len(),
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        win_rate,
        avg_win,
        avg_loss,
        avg_win_pct: mean(&wins.iter().map(|t| t.pnl_pct()).collect::<Vec<_>>()),
        avg_loss_pct: mean(&losses.iter().map(|t| t.pnl_pct()).collect::<Vec<_>>()),
        largest_win: win_pnls.iter().copied().fold(0.0, f64::max),
        largest_loss: loss_pnls.iter().copied().fold(0.0, f64::min),
        profit_factor: profit_factor(gross_profit, gross_loss),
        expectancy,
        recovery_factor: if max_dd > 0.0 { net_profit / max_dd } else { 0.0 },
        calmar: if max_dd_pct > 0.0 {
            annualized * 100.0 / max_dd_pct
        } else {
            0.0
        },
        avg_trade_duration_hours: mean(&durations),
        bars_processed: equity.len(),
    }
}
