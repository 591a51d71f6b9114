use crate::entities::metrics::{MetricsConfig, PerformanceReport};
use crate::entities::risk::RiskPolicy;
use crate::entities::trade::Trade;
use crate::services::audit::AuditEvent;
use crate::services::engine::execution::ExecutionCosts;
use crate::services::ohlcv::validate_series;
use crate::services::performance::compute_report;
use crate::services::sizing::{PositionSizer, TradeStats};
use crate::services::stop_loss::StopLossEngine;
use crate::services::strategy::StrategyAdapter;
use crate::services::take_profit::TakeProfitEngine;
use crate::value_objects::bar::Bar;
use crate::value_objects::equity_point::EquityPoint;
use crate::value_objects::exit_reason::ExitReason;
use crate::value_objects::side::Side;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Historical bars per symbol. Every series must be strictly increasing in time.
pub type MarketData = BTreeMap<String, Vec<Bar>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    pub run_id: String,
    pub initial_capital: f64,
    pub leverage: f64,
    /// Bars of history (current bar included) required before the strategy is asked.
    pub warmup_bars: usize,
    pub costs: ExecutionCosts,
    pub metrics: MetricsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_id: "run".to_string(),
            initial_capital: 10_000.0,
            leverage: 1.0,
            warmup_bars: 100,
            costs: ExecutionCosts::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(format!(
                "initial_capital must be finite and > 0 (got {})",
                self.initial_capital
            ));
        }
        if !self.leverage.is_finite() || self.leverage < 1.0 {
            return Err(format!("leverage must be >= 1 (got {})", self.leverage));
        }
        if !self.metrics.periods_per_year.is_finite() || self.metrics.periods_per_year <= 0.0 {
            return Err(format!(
                "periods_per_year must be > 0 (got {})",
                self.metrics.periods_per_year
            ));
        }
        if !self.metrics.risk_free_rate.is_finite() || self.metrics.risk_free_rate <= -1.0 {
            return Err(format!(
                "risk_free_rate must be > -1 (got {})",
                self.metrics.risk_free_rate
            ));
        }
        self.costs.validate()
    }
}

/// A strategy failure on one bar; the bar was treated as Hold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalError {
    pub symbol: String,
    pub timestamp: i64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResults {
    /// Closed trades ordered by entry time.
    pub trades: Vec<Trade>,
    /// One sample per timestamp, taken before that bar's exits. The `backtest_end` close
    /// comes after the last sample, so its slippage and commission show up in
    /// `final_cash` and `report.final_equity` but not here.
    pub equity: Vec<EquityPoint>,
    pub report: PerformanceReport,
    pub final_cash: f64,
    pub signal_errors: Vec<SignalError>,
    pub audit_events: Vec<AuditEvent>,
}

/// Bar-by-bar simulator. Holds only immutable configuration, so one engine can replay
/// any number of data sets; all run state lives inside [`BacktestEngine::run`].
pub struct BacktestEngine<S: StrategyAdapter> {
    config: EngineConfig,
    strategy: S,
    sizer: PositionSizer,
    stops: StopLossEngine,
    targets: TakeProfitEngine,
}

struct RunState {
    cash: f64,
    open: BTreeMap<String, Trade>,
    ledger: Vec<Trade>,
    equity: Vec<EquityPoint>,
    last_close: BTreeMap<String, (i64, f64)>,
    signal_errors: Vec<SignalError>,
    audit_events: Vec<AuditEvent>,
}

impl<S: StrategyAdapter> BacktestEngine<S> {
    pub fn new(config: EngineConfig, policy: RiskPolicy, strategy: S) -> Result<Self, String> {
        config.validate()?;
        policy.validate()?;
        Ok(Self {
            sizer: PositionSizer::new(policy.sizing),
            stops: StopLossEngine::new(policy.stop),
            targets: TakeProfitEngine::new(policy.take_profit),
            config,
            strategy,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn run(&self, data: &MarketData) -> Result<BacktestResults, String> {
        if data.is_empty() {
            return Err("market data contains no symbols".to_string());
        }
        for (symbol, bars) in data {
            validate_series(symbol, bars)?;
        }

        let series: Vec<(&str, &[Bar])> = data
            .iter()
            .map(|(symbol, bars)| (symbol.as_str(), bars.as_slice()))
            .collect();
        let mut timeline: Vec<i64> = series
            .iter()
            .flat_map(|(_, bars)| bars.iter().map(|bar| bar.timestamp))
            .collect();
        timeline.sort_unstable();
        timeline.dedup();

        let mut state = RunState {
            cash: self.config.initial_capital,
            open: BTreeMap::new(),
            ledger: Vec::new(),
            equity: Vec::with_capacity(timeline.len()),
            last_close: BTreeMap::new(),
            signal_errors: Vec::new(),
            audit_events: Vec::new(),
        };
        state.audit_events.push(self.event(
            timeline.first().copied().unwrap_or_default(),
            "engine",
            None,
            "start",
            None,
            json!({
                "strategy": self.strategy.name(),
                "symbols": series.iter().map(|(symbol, _)| *symbol).collect::<Vec<_>>(),
                "initial_capital": self.config.initial_capital,
                "leverage": self.config.leverage,
                "warmup_bars": self.config.warmup_bars,
            }),
        ));

        let mut cursors = vec![0usize; series.len()];
        let mut active: Vec<(&str, &[Bar], usize)> = Vec::with_capacity(series.len());
        for &ts in &timeline {
            active.clear();
            for (slot, &(symbol, bars)) in series.iter().enumerate() {
                let idx = cursors[slot];
                if idx < bars.len() && bars[idx].timestamp == ts {
                    active.push((symbol, bars, idx));
                    cursors[slot] += 1;
                    state
                        .last_close
                        .insert(symbol.to_string(), (ts, bars[idx].close));
                }
            }

            self.mark_to_market(&mut state, ts);

            for &(symbol, bars, idx) in &active {
                self.process_exits(&mut state, symbol, &bars[idx])?;
            }

            // Entries come after exits so a symbol closed on this bar can be re-entered.
            for &(symbol, bars, idx) in &active {
                self.consider_entry(&mut state, symbol, &bars[..=idx])?;
            }
        }

        let remaining: Vec<String> = state.open.keys().cloned().collect();
        for symbol in remaining {
            let Some(mut trade) = state.open.remove(&symbol) else {
                continue;
            };
            let (ts, close) = state
                .last_close
                .get(&symbol)
                .copied()
                .ok_or_else(|| format!("no closing price recorded for {symbol}"))?;
            let size = trade.remaining_size();
            self.fill_exit(&mut state, &mut trade, ts, close, size, ExitReason::BacktestEnd)?;
            state.ledger.push(trade);
        }

        state.ledger.sort_by(|a, b| {
            a.entry_time()
                .cmp(&b.entry_time())
                .then_with(|| a.symbol().cmp(b.symbol()))
        });

        let report = compute_report(
            &state.ledger,
            &state.equity,
            self.config.initial_capital,
            state.cash,
            &self.config.metrics,
        );

        state.audit_events.push(self.event(
            timeline.last().copied().unwrap_or_default(),
            "engine",
            None,
            "complete",
            None,
            json!({
                "bars_processed": report.bars_processed,
                "trades": report.total_trades,
                "net_profit": report.net_profit,
                "sharpe": report.sharpe,
                "max_drawdown": report.max_drawdown,
                "signal_errors": state.signal_errors.len(),
            }),
        ));

        Ok(BacktestResults {
            trades: state.ledger,
            equity: state.equity,
            report,
            final_cash: state.cash,
            signal_errors: state.signal_errors,
            audit_events: state.audit_events,
        })
    }

    fn mark_to_market(&self, state: &mut RunState, ts: i64) {
        let unrealized: f64 = state
            .open
            .iter()
            .filter_map(|(symbol, trade)| {
                state
                    .last_close
                    .get(symbol)
                    .map(|(_, close)| trade.unrealized_pnl(*close))
            })
            .sum();
        state.equity.push(EquityPoint {
            timestamp: ts,
            equity: state.cash + unrealized,
            cash: state.cash,
            unrealized_pnl: unrealized,
            open_trades: state.open.len(),
        });
    }

    fn process_exits(&self, state: &mut RunState, symbol: &str, bar: &Bar) -> Result<(), String> {
        let Some(mut trade) = state.open.remove(symbol) else {
            return Ok(());
        };

        let (adverse, favorable) = match trade.side() {
            Side::Long => (bar.low, bar.high),
            Side::Short => (bar.high, bar.low),
        };

        // Stop is evaluated first, so a bar that spans both levels exits at the stop.
        if StopLossEngine::hit(&trade, adverse) {
            let stop = trade.stop_price();
            let size = trade.remaining_size();
            self.fill_exit(state, &mut trade, bar.timestamp, stop, size, ExitReason::StopLoss)?;
        } else if let Some(fill) = self.targets.check(&trade, favorable) {
            let size = TakeProfitEngine::exit_size(&trade, &fill);
            trade.mark_level_filled(fill.index)?;
            self.fill_exit(
                state,
                &mut trade,
                bar.timestamp,
                fill.price,
                size,
                ExitReason::TakeProfit(fill.level_number()),
            )?;
        }

        if trade.is_closed() {
            state.ledger.push(trade);
            return Ok(());
        }

        let previous = trade.stop_price();
        if self.stops.update_trailing(&mut trade, bar.close) {
            debug!(
                symbol,
                timestamp = bar.timestamp,
                from = previous,
                to = trade.stop_price(),
                "trailing stop tightened"
            );
        }
        state.open.insert(symbol.to_string(), trade);
        Ok(())
    }

    fn fill_exit(
        &self,
        state: &mut RunState,
        trade: &mut Trade,
        ts: i64,
        reference_price: f64,
        size: f64,
        reason: ExitReason,
    ) -> Result<(), String> {
        let price = self.config.costs.exit_price(trade.side(), reference_price);
        let size = trade.clamp_exit_size(size);
        let commission = self.config.costs.commission(price, size);
        let exit = trade
            .close_partial(ts, price, size, commission, reason)
            .map_err(|err| format!("failed to close {} at {ts}: {err}", trade.symbol()))?;
        state.cash += exit.pnl - exit.commission;

        debug!(
            symbol = trade.symbol(),
            timestamp = ts,
            reason = %reason,
            price,
            size,
            pnl = exit.pnl,
            "exit filled"
        );
        state.audit_events.push(self.event(
            ts,
            "trade",
            Some(trade.symbol()),
            "exit",
            None,
            json!({
                "side": trade.side().as_str(),
                "reason": reason.to_string(),
                "price": price,
                "size": size,
                "pnl": exit.pnl,
                "commission": exit.commission,
                "remaining_size": trade.remaining_size(),
            }),
        ));
        Ok(())
    }

    fn consider_entry(
        &self,
        state: &mut RunState,
        symbol: &str,
        history: &[Bar],
    ) -> Result<(), String> {
        if state.open.contains_key(symbol) || history.len() < self.config.warmup_bars {
            return Ok(());
        }
        let Some(bar) = history.last() else {
            return Ok(());
        };
        let ts = bar.timestamp;

        let signal = match self.strategy.generate_signal(symbol, history) {
            Ok(signal) => signal,
            Err(err) => {
                warn!(symbol, timestamp = ts, error = %err, "strategy failed; treating bar as hold");
                state.audit_events.push(self.event(
                    ts,
                    "strategy",
                    Some(symbol),
                    "signal_error",
                    Some(err.clone()),
                    json!({ "strategy": self.strategy.name() }),
                ));
                state.signal_errors.push(SignalError {
                    symbol: symbol.to_string(),
                    timestamp: ts,
                    error: err,
                });
                return Ok(());
            }
        };
        let Some(side) = signal.entry_side() else {
            return Ok(());
        };

        if state.cash <= 0.0 {
            state.audit_events.push(self.skip_event(ts, symbol, side, "insufficient_cash"));
            return Ok(());
        }

        let entry_price = self.config.costs.entry_price(side, bar.close);
        let stop = self.stops.initial_stop(side, entry_price, history);
        if let Some(reason) = &stop.fallback {
            self.record_fallback(state, ts, symbol, "stop_loss", reason);
        }

        let stats = TradeStats::from_trades(&state.ledger);
        let sizing = self.sizer.size(
            state.cash,
            entry_price,
            stop.price,
            self.config.leverage,
            stats.as_ref(),
        );
        if let Some(reason) = sizing.fallback {
            self.record_fallback(state, ts, symbol, "sizing", reason);
        }
        let size = self
            .sizer
            .adjust_for_open_positions(sizing.size, state.open.len());
        let size = self
            .sizer
            .validate(size, entry_price, state.cash, self.config.leverage);
        if size <= 0.0 {
            state.audit_events.push(self.skip_event(ts, symbol, side, "zero_size"));
            return Ok(());
        }

        let plan = self.targets.targets(side, entry_price, stop.price, history);
        if let Some(reason) = &plan.fallback {
            self.record_fallback(state, ts, symbol, "take_profit", reason);
        }

        let commission = self.config.costs.commission(entry_price, size);
        let trade = Trade::open(
            symbol.to_string(),
            side,
            ts,
            entry_price,
            size,
            stop.price,
            plan.levels,
            commission,
        )
        .map_err(|err| format!("failed to open {symbol} trade at {ts}: {err}"))?;
        state.cash -= commission;

        debug!(
            symbol,
            timestamp = ts,
            side = side.as_str(),
            price = entry_price,
            size,
            stop = stop.price,
            "entry filled"
        );
        state.audit_events.push(self.event(
            ts,
            "trade",
            Some(symbol),
            "entry",
            None,
            json!({
                "side": side.as_str(),
                "price": entry_price,
                "size": size,
                "stop": stop.price,
                "targets": trade.take_profit().iter().map(|level| level.price).collect::<Vec<_>>(),
                "risk_fraction": sizing.risk_fraction,
                "commission": commission,
                "strength": signal.strength,
            }),
        ));
        state.open.insert(symbol.to_string(), trade);
        Ok(())
    }

    fn record_fallback(
        &self,
        state: &mut RunState,
        ts: i64,
        symbol: &str,
        component: &str,
        reason: &str,
    ) {
        warn!(symbol, timestamp = ts, component, reason, "risk policy fallback");
        state.audit_events.push(self.event(
            ts,
            "risk",
            Some(symbol),
            "fallback",
            None,
            json!({ "component": component, "reason": reason }),
        ));
    }

    fn skip_event(&self, ts: i64, symbol: &str, side: Side, reason: &str) -> AuditEvent {
        self.event(
            ts,
            "trade",
            Some(symbol),
            "entry_skipped",
            None,
            json!({ "side": side.as_str(), "reason": reason }),
        )
    }

    fn event(
        &self,
        ts: i64,
        stage: &str,
        symbol: Option<&str>,
        action: &str,
        error: Option<String>,
        details: serde_json::Value,
    ) -> AuditEvent {
        AuditEvent {
            run_id: self.config.run_id.clone(),
            timestamp: ts,
            stage: stage.to_string(),
            symbol: symbol.map(str::to_string),
            action: action.to_string(),
            error,
            details,
        }
    }
}
